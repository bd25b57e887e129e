//! Shared fakes for the integration tests

#![allow(dead_code)]

use agent_llm::{CompletionRequest, CompletionResponse, CompletionStream, LLMError, LLMProvider, Message, StopReason};
use agent_stock::ai::{AiAnalyzer, LlmAnalyzer};
use agent_stock::config::AiConfig;
use agent_stock::engine::AnalysisCoordinator;
use agent_stock::error::{Result, StockError};
use agent_stock::market::{Instrument, MarketType};
use agent_stock::provider::DataProvider;
use agent_stock::scoring::Scorer;
use agent_stock::series::{Bar, DateRange, PriceSeries};
use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use futures::{StreamExt, stream};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

pub const REPLY: [&str; 4] = [
    "TREND: steady uptrend above all moving averages\n",
    "RISK: medium, momentum is stretched\n",
    "TARGET_PRICE: 26.80\nCONFIDENCE: 72\n",
    "RECOMMENDATION: BUY\nThe series keeps printing higher closes.",
];

pub fn series(code: &str, closes: &[f64]) -> PriceSeries {
    let instrument = Instrument::parse(code, MarketType::AShare).unwrap();
    let start = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
    let bars = closes
        .iter()
        .enumerate()
        .map(|(i, &c)| {
            Bar::new(
                start + Duration::days(i as i64),
                c,
                c * 1.01,
                c * 0.99,
                c,
                1_000.0 + i as f64,
            )
        })
        .collect();
    PriceSeries::new(instrument, bars).unwrap()
}

/// 10.0, 10.5, 11.0, ...
pub fn ascending(code: &str, n: usize) -> PriceSeries {
    let closes: Vec<f64> = (0..n).map(|i| 10.0 + i as f64 * 0.5).collect();
    series(code, &closes)
}

/// 30.0, 29.5, 29.0, ...
pub fn descending(code: &str, n: usize) -> PriceSeries {
    let closes: Vec<f64> = (0..n).map(|i| 30.0 - i as f64 * 0.5).collect();
    series(code, &closes)
}

/// Serves fixed series by code; unknown codes are `NotFound`
#[derive(Default)]
pub struct FakeProvider {
    series: HashMap<String, Arc<PriceSeries>>,
    fetches: AtomicUsize,
}

impl FakeProvider {
    pub fn with(mut self, series: PriceSeries) -> Self {
        self.series.insert(series.instrument().code().to_string(), Arc::new(series));
        self
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataProvider for FakeProvider {
    async fn fetch_history(&self, instrument: &Instrument, _range: DateRange) -> Result<Arc<PriceSeries>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.series
            .get(instrument.code())
            .cloned()
            .ok_or_else(|| StockError::NotFound(instrument.to_string()))
    }
}

/// Language model replaying a fixed reply, or failing
pub struct ScriptedLlm {
    chunks: Vec<&'static str>,
    fail: bool,
    calls: AtomicUsize,
}

impl ScriptedLlm {
    pub fn replying(chunks: &[&'static str]) -> Self {
        Self {
            chunks: chunks.to_vec(),
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            chunks: Vec::new(),
            fail: true,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn start(&self) -> agent_llm::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            Err(LLMError::RequestFailed("model overloaded".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl LLMProvider for ScriptedLlm {
    async fn complete(&self, request: CompletionRequest) -> agent_llm::Result<CompletionResponse> {
        self.start()?;
        Ok(CompletionResponse {
            message: Message::assistant(self.chunks.concat()),
            model: request.model,
            stop_reason: StopReason::EndTurn,
            usage: None,
        })
    }

    async fn complete_stream(&self, _request: CompletionRequest) -> agent_llm::Result<CompletionStream> {
        self.start()?;
        let chunks: Vec<agent_llm::Result<String>> = self.chunks.iter().map(|c| Ok((*c).to_string())).collect();
        Ok(stream::iter(chunks).boxed())
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

pub fn analyzer(llm: Arc<ScriptedLlm>) -> Arc<dyn AiAnalyzer> {
    let config = AiConfig::new("http://localhost:1234/", "test-key");
    Arc::new(LlmAnalyzer::new(llm, &config).unwrap())
}

pub fn coordinator(provider: Arc<FakeProvider>, llm: Option<Arc<ScriptedLlm>>) -> AnalysisCoordinator {
    let coordinator = AnalysisCoordinator::new(provider, Scorer::default());
    match llm {
        Some(llm) => coordinator.with_analyzer(analyzer(llm)),
        None => coordinator,
    }
}

pub fn instrument(code: &str) -> Instrument {
    Instrument::parse(code, MarketType::AShare).unwrap()
}
