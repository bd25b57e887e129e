//! Analysis result types

use crate::ai::{AiAnalysis, AiError};
use crate::error::ErrorInfo;
use crate::indicators::IndicatorSet;
use crate::market::Instrument;
use crate::scoring::Score;
use crate::series::Quote;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a pipeline is, or where it ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Fetching,
    Computing,
    Scoring,
    AiAnalyzing,
    Complete,
    /// Everything but the narrative succeeded
    Degraded,
    Failed,
}

impl PipelineState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Degraded | Self::Failed)
    }
}

/// Outcome of the narrative stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AiStatus {
    Pending,
    Completed,
    /// Disabled for this request or not configured
    Skipped,
    Failed { kind: String, message: String },
}

impl From<&AiError> for AiStatus {
    fn from(err: &AiError) -> Self {
        Self::Failed {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageFlags {
    pub fetched: bool,
    pub computed: bool,
    pub scored: bool,
    pub ai: AiStatus,
}

impl Default for StageFlags {
    fn default() -> Self {
        Self {
            fetched: false,
            computed: false,
            scored: false,
            ai: AiStatus::Pending,
        }
    }
}

/// Analysis of one instrument
///
/// Partial while the pipeline runs; fields fill in stage by stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub instrument: Instrument,
    pub state: PipelineState,
    pub stages: StageFlags,
    pub quote: Option<Quote>,
    /// Bars the indicators were computed from
    pub bar_count: usize,
    pub indicators: Option<IndicatorSet>,
    pub score: Option<Score>,
    pub ai: Option<AiAnalysis>,
    pub generated_at: DateTime<Utc>,
}

impl AnalysisResult {
    pub fn new(instrument: Instrument) -> Self {
        Self {
            instrument,
            state: PipelineState::Fetching,
            stages: StageFlags::default(),
            quote: None,
            bar_count: 0,
            indicators: None,
            score: None,
            ai: None,
            generated_at: Utc::now(),
        }
    }

    /// Composite score value, if rated
    pub fn score_value(&self) -> Option<f64> {
        self.score.as_ref().and_then(Score::value)
    }

    pub fn is_degraded(&self) -> bool {
        self.state == PipelineState::Degraded
    }
}

/// Item of a streamed analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AnalysisEvent {
    /// Snapshot after a stage; `state` mirrors `result.state`
    Stage {
        state: PipelineState,
        result: Box<AnalysisResult>,
    },
    /// Narrative text as the model produces it
    Narrative { instrument: Instrument, text: String },
    /// Fatal error; always the last event
    Failed {
        instrument: Instrument,
        error: ErrorInfo,
    },
}

impl AnalysisEvent {
    pub fn stage(result: AnalysisResult) -> Self {
        Self::Stage {
            state: result.state,
            result: Box::new(result),
        }
    }

    pub fn is_terminal(&self) -> bool {
        match self {
            Self::Stage { state, .. } => state.is_terminal(),
            Self::Narrative { .. } => false,
            Self::Failed { .. } => true,
        }
    }
}
