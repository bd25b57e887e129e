//! AI narrative analysis
//!
//! An [`AiAnalyzer`] turns a bounded summary of one instrument into a
//! narrative plus a few structured fields. Failures here never abort an
//! analysis; the coordinator records them and degrades the result.

mod llm;
mod parse;

pub use llm::LlmAnalyzer;
pub use parse::ReplyParser;

use crate::indicators::IndicatorSet;
use crate::market::Instrument;
use crate::scoring::Score;
use crate::series::{PriceSeries, Quote};
use agent_llm::LLMError;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Non-fatal failure of the narrative step
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AiError {
    #[error("AI endpoint timed out")]
    UpstreamTimeout,

    /// Transport failure, or a malformed or empty reply
    #[error("AI endpoint error: {0}")]
    UpstreamError(String),

    #[error("AI endpoint rate limited")]
    RateLimited,
}

impl AiError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UpstreamTimeout => "upstream_timeout",
            Self::UpstreamError(_) => "upstream_error",
            Self::RateLimited => "rate_limited",
        }
    }
}

impl From<LLMError> for AiError {
    fn from(err: LLMError) -> Self {
        if err.is_timeout() {
            Self::UpstreamTimeout
        } else if err.is_rate_limited() {
            Self::RateLimited
        } else {
            Self::UpstreamError(err.to_string())
        }
    }
}

/// Percent returns over recent windows
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Returns {
    pub five_day: Option<f64>,
    pub twenty_day: Option<f64>,
}

/// What the model is shown about one instrument
///
/// Holds the latest quote and indicator snapshot, never the series itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiRequest {
    pub instrument: Instrument,
    pub quote: Quote,
    pub indicators: IndicatorSet,
    pub score: Score,
    pub returns: Returns,
}

impl AiRequest {
    pub fn new(series: &PriceSeries, quote: Quote, indicators: IndicatorSet, score: Score) -> Self {
        Self {
            instrument: series.instrument().clone(),
            quote,
            indicators,
            score,
            returns: Returns {
                five_day: series.return_over(5),
                twenty_day: series.return_over(20),
            },
        }
    }
}

/// Direction the narrative leans
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stance {
    Buy,
    Sell,
    Hold,
    #[default]
    Watch,
}

impl fmt::Display for Stance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
            Self::Hold => "hold",
            Self::Watch => "watch",
        };
        f.write_str(s)
    }
}

/// Parsed model reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiAnalysis {
    pub trend: Option<String>,
    pub risk: Option<String>,
    pub target_price: Option<f64>,
    /// Model's stated confidence in percent
    pub confidence: Option<f64>,
    pub stance: Stance,
    pub narrative: String,
    pub model: String,
}

/// Piece of a streamed narrative
#[derive(Debug, Clone, PartialEq)]
pub enum NarrativeChunk {
    /// Text as the model produced it
    Text(String),
    /// The whole reply, parsed; always the last item
    Done(AiAnalysis),
}

pub type NarrativeStream = BoxStream<'static, Result<NarrativeChunk, AiError>>;

/// Narrative analysis of one instrument
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AiAnalyzer: Send + Sync {
    /// Full reply at once
    async fn analyze(&self, request: &AiRequest) -> Result<AiAnalysis, AiError>;

    /// Reply as it is produced, ending with [`NarrativeChunk::Done`]
    async fn analyze_stream(&self, request: &AiRequest) -> Result<NarrativeStream, AiError>;
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_llm_error_mapping() {
        assert_eq!(AiError::from(LLMError::Timeout(5)), AiError::UpstreamTimeout);
        assert_eq!(
            AiError::from(LLMError::RateLimitExceeded("slow down".into())),
            AiError::RateLimited
        );
        assert_eq!(
            AiError::from(LLMError::RequestFailed("boom".into())).kind(),
            "upstream_error"
        );
    }

    #[test]
    fn test_request_is_bounded_summary() {
        let request = fixtures::request();
        assert_eq!(request.instrument.code(), "600519");
        assert!(request.returns.five_day.unwrap() > 0.0);
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("bars").is_none());
    }
}
