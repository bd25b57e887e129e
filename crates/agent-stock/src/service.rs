//! Operations shared by the HTTP routes and the tools
//!
//! Both surfaces accept the same query shapes and return the same payloads;
//! they differ only in transport.

use crate::ai::{AiAnalysis, AiError, LlmAnalyzer};
use crate::config::ServiceConfig;
use crate::engine::{
    AnalysisCoordinator, AnalysisEvent, AnalysisOptions, AnalysisResult, FailurePolicy, ScanCoordinator,
    ScanEvent, ScanReport, ScanRequest,
};
use crate::error::{Result, StockError};
use crate::indicators::{IndicatorSet, MaTrend, MacdSignal, VolumeStatus};
use crate::market::{Instrument, MarketType};
use crate::provider::{DataProvider, MarketDataProvider};
use crate::scoring::{Score, Scorer};
use crate::series::{DateRange, Quote};
use chrono::NaiveDate;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Largest accepted scan
pub const MAX_SCAN_INSTRUMENTS: usize = 500;

/// Identifies one instrument and an optional history window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockQuery {
    pub stock_code: String,
    /// `A`, `HK`, `US`, `ETF`, `LOF` or `FUND`; `A` when absent
    #[serde(default)]
    pub market_type: Option<String>,
    /// `YYYYMMDD` or `YYYY-MM-DD`
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
}

impl StockQuery {
    pub fn new(stock_code: impl Into<String>, market: MarketType) -> Self {
        Self {
            stock_code: stock_code.into(),
            market_type: Some(market.as_str().to_string()),
            start_date: None,
            end_date: None,
        }
    }

    pub fn instrument(&self) -> Result<Instrument> {
        Instrument::parse(&self.stock_code, parse_market(self.market_type.as_deref())?)
    }

    /// Explicit window, or `None` for the configured default
    pub fn range(&self) -> Result<Option<DateRange>> {
        if self.start_date.is_none() && self.end_date.is_none() {
            return Ok(None);
        }
        DateRange::parse(self.start_date.as_deref(), self.end_date.as_deref()).map(Some)
    }
}

/// Batch scan parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanQuery {
    pub stock_codes: Vec<String>,
    #[serde(default)]
    pub market_type: Option<String>,
    #[serde(default)]
    pub min_score: f64,
    /// NDJSON events instead of one report; HTTP only
    #[serde(default = "default_true")]
    pub stream: bool,
    #[serde(default = "default_true")]
    pub with_ai: bool,
    #[serde(default = "default_true")]
    pub report_failures: bool,
}

fn default_true() -> bool {
    true
}

impl ScanQuery {
    /// Validate every code up front
    pub fn into_request(self) -> Result<ScanRequest> {
        if self.stock_codes.len() > MAX_SCAN_INSTRUMENTS {
            return Err(StockError::InvalidInput(format!(
                "at most {MAX_SCAN_INSTRUMENTS} instruments per scan, got {}",
                self.stock_codes.len()
            )));
        }
        if !self.min_score.is_finite() {
            return Err(StockError::InvalidInput("min_score must be a number".to_string()));
        }

        let market = parse_market(self.market_type.as_deref())?;
        let instruments = self
            .stock_codes
            .iter()
            .map(|code| Instrument::parse(code, market))
            .collect::<Result<Vec<_>>>()?;

        let policy = if self.report_failures {
            FailurePolicy::Report
        } else {
            FailurePolicy::Skip
        };
        Ok(ScanRequest::new(instruments, self.min_score)
            .with_ai(self.with_ai)
            .failure_policy(policy))
    }
}

fn parse_market(raw: Option<&str>) -> Result<MarketType> {
    raw.map_or(Ok(MarketType::AShare), str::parse)
}

/// Indicator snapshot with derived labels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TechnicalSummary {
    pub instrument: Instrument,
    pub date: NaiveDate,
    pub price: f64,
    pub bar_count: usize,
    pub indicators: IndicatorSet,
    pub ma_trend: Option<MaTrend>,
    pub macd_signal: Option<MacdSignal>,
    pub volume_status: Option<VolumeStatus>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreSummary {
    pub instrument: Instrument,
    pub date: NaiveDate,
    pub price: f64,
    pub score: Score,
}

/// Facade over the provider and coordinators
#[derive(Debug, Clone)]
pub struct StockService {
    analysis: AnalysisCoordinator,
    scanner: ScanCoordinator,
}

impl StockService {
    pub fn new(analysis: AnalysisCoordinator, scan_concurrency: usize) -> Self {
        let scanner = ScanCoordinator::new(analysis.clone(), scan_concurrency);
        Self { analysis, scanner }
    }

    /// Wire up live sources and, when configured, the AI endpoint
    pub fn from_config(config: &ServiceConfig) -> Result<Self> {
        let provider: Arc<dyn DataProvider> = Arc::new(MarketDataProvider::from_config(config)?);
        let mut analysis = AnalysisCoordinator::new(provider, Scorer::new(config.scoring.clone()))
            .with_params(config.indicators.clone())
            .with_history_days(config.history_days);

        match &config.ai {
            Some(ai) => {
                info!(model = %ai.model, url = %ai.api_url, "AI analysis enabled");
                analysis = analysis.with_analyzer(Arc::new(LlmAnalyzer::from_config(ai)?));
            }
            None => info!("AI analysis disabled, API_URL or API_KEY not set"),
        }

        Ok(Self::new(analysis, config.scan_concurrency))
    }

    pub fn analysis(&self) -> &AnalysisCoordinator {
        &self.analysis
    }

    pub fn scanner(&self) -> &ScanCoordinator {
        &self.scanner
    }

    pub async fn price(&self, query: &StockQuery) -> Result<Quote> {
        let instrument = query.instrument()?;
        self.analysis.provider().fetch_quote(&instrument).await
    }

    pub async fn technical(&self, query: &StockQuery) -> Result<TechnicalSummary> {
        let instrument = query.instrument()?;
        let prepared = self.analysis.prepare(&instrument, query.range()?).await?;
        let result = prepared.result();
        let (quote, indicators) = match (&result.quote, &result.indicators) {
            (Some(q), Some(i)) => (q, i),
            _ => return Err(StockError::Internal("analysis produced no indicators".to_string())),
        };

        Ok(TechnicalSummary {
            instrument,
            date: quote.date,
            price: quote.price,
            bar_count: result.bar_count,
            ma_trend: indicators.ma_trend(),
            macd_signal: indicators.macd_signal(),
            volume_status: indicators.volume_status(),
            indicators: indicators.clone(),
        })
    }

    pub async fn score(&self, query: &StockQuery) -> Result<ScoreSummary> {
        let instrument = query.instrument()?;
        let prepared = self.analysis.prepare(&instrument, query.range()?).await?;
        let result = prepared.result();
        match (&result.quote, &result.score) {
            (Some(quote), Some(score)) => Ok(ScoreSummary {
                instrument,
                date: quote.date,
                price: quote.price,
                score: score.clone(),
            }),
            _ => Err(StockError::Internal("analysis produced no score".to_string())),
        }
    }

    /// Narrative only; here an AI failure is the caller's error
    pub async fn ai_analysis(&self, query: &StockQuery) -> Result<AiAnalysis> {
        let instrument = query.instrument()?;
        if !self.analysis.has_ai() {
            return Err(StockError::AiAnalysisFailed("no AI endpoint is configured".to_string()));
        }

        let result = self.analysis.analyze(&instrument, &analysis_options(query, true)?).await?;
        match (result.ai, result.stages.ai) {
            (Some(analysis), _) => Ok(analysis),
            (None, crate::engine::AiStatus::Failed { kind, message }) => Err(ai_error_to_stock(&kind, message)),
            (None, _) => Err(StockError::AiAnalysisFailed("no narrative produced".to_string())),
        }
    }

    pub async fn analyze(&self, query: &StockQuery, with_ai: bool) -> Result<AnalysisResult> {
        let instrument = query.instrument()?;
        self.analysis.analyze(&instrument, &analysis_options(query, with_ai)?).await
    }

    /// Validates the query eagerly so input errors surface before streaming
    pub fn analyze_stream(&self, query: &StockQuery, with_ai: bool) -> Result<BoxStream<'static, AnalysisEvent>> {
        let instrument = query.instrument()?;
        Ok(self.analysis.analyze_stream(instrument, analysis_options(query, with_ai)?))
    }

    pub async fn scan(&self, query: ScanQuery) -> Result<ScanReport> {
        let request = query.into_request()?;
        Ok(self.scanner.scan(request).await)
    }

    pub fn scan_stream(&self, query: ScanQuery) -> Result<BoxStream<'static, ScanEvent>> {
        let request = query.into_request()?;
        Ok(self.scanner.scan_stream(request))
    }
}

fn analysis_options(query: &StockQuery, with_ai: bool) -> Result<AnalysisOptions> {
    Ok(AnalysisOptions {
        range: query.range()?,
        with_ai,
    })
}

fn ai_error_to_stock(kind: &str, message: String) -> StockError {
    let source_name = "ai".to_string();
    match kind {
        k if k == AiError::UpstreamTimeout.kind() => StockError::UpstreamTimeout { source_name },
        k if k == AiError::RateLimited.kind() => StockError::RateLimited { source_name },
        _ => StockError::AiAnalysisFailed(message),
    }
}
