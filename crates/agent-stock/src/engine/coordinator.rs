//! Per-instrument analysis pipeline
//!
//! Fetching, Computing, Scoring and AiAnalyzing run strictly in order. A
//! fetch failure is fatal; a narrative failure only degrades the result.

use super::result::{AiStatus, AnalysisEvent, AnalysisResult, PipelineState};
use crate::ai::{AiAnalyzer, AiError, AiRequest, NarrativeChunk, NarrativeStream};
use crate::error::{ErrorInfo, Result, StockError};
use crate::indicators::{self, IndicatorParams};
use crate::market::Instrument;
use crate::provider::DataProvider;
use crate::scoring::Scorer;
use crate::series::{DateRange, PriceSeries};
use futures::stream::{self, BoxStream, StreamExt};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Per-request options
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnalysisOptions {
    /// History window; the configured trailing window when `None`
    pub range: Option<DateRange>,
    pub with_ai: bool,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            range: None,
            with_ai: true,
        }
    }
}

impl AnalysisOptions {
    pub fn without_ai() -> Self {
        Self {
            with_ai: false,
            ..Self::default()
        }
    }
}

/// Result of the deterministic stages, ready for the narrative
#[derive(Debug, Clone)]
pub struct PreparedAnalysis {
    series: Arc<PriceSeries>,
    result: AnalysisResult,
}

impl PreparedAnalysis {
    pub fn result(&self) -> &AnalysisResult {
        &self.result
    }

    pub fn series(&self) -> &Arc<PriceSeries> {
        &self.series
    }

    /// Finish without a narrative
    pub fn skip_ai(mut self) -> AnalysisResult {
        self.result.stages.ai = AiStatus::Skipped;
        self.result.state = PipelineState::Complete;
        self.result
    }

    fn ai_request(&self) -> Option<AiRequest> {
        let result = &self.result;
        Some(AiRequest::new(
            &self.series,
            result.quote.clone()?,
            result.indicators.clone()?,
            result.score.clone()?,
        ))
    }
}

/// Runs the analysis pipeline for single instruments
#[derive(Clone)]
pub struct AnalysisCoordinator {
    provider: Arc<dyn DataProvider>,
    analyzer: Option<Arc<dyn AiAnalyzer>>,
    params: Arc<IndicatorParams>,
    scorer: Arc<Scorer>,
    history_days: i64,
}

impl AnalysisCoordinator {
    pub fn new(provider: Arc<dyn DataProvider>, scorer: Scorer) -> Self {
        Self {
            provider,
            analyzer: None,
            params: Arc::new(IndicatorParams::default()),
            scorer: Arc::new(scorer),
            history_days: crate::series::DEFAULT_HISTORY_DAYS,
        }
    }

    pub fn with_analyzer(mut self, analyzer: Arc<dyn AiAnalyzer>) -> Self {
        self.analyzer = Some(analyzer);
        self
    }

    pub fn with_params(mut self, params: IndicatorParams) -> Self {
        self.params = Arc::new(params);
        self
    }

    pub fn with_history_days(mut self, days: i64) -> Self {
        self.history_days = days;
        self
    }

    pub fn provider(&self) -> &Arc<dyn DataProvider> {
        &self.provider
    }

    pub fn analyzer(&self) -> Option<&Arc<dyn AiAnalyzer>> {
        self.analyzer.as_ref()
    }

    pub fn params(&self) -> &IndicatorParams {
        &self.params
    }

    pub fn scorer(&self) -> &Scorer {
        &self.scorer
    }

    pub fn has_ai(&self) -> bool {
        self.analyzer.is_some()
    }

    pub fn default_range(&self) -> DateRange {
        DateRange::trailing(self.history_days)
    }

    /// Fetching through Scoring
    pub async fn prepare(&self, instrument: &Instrument, range: Option<DateRange>) -> Result<PreparedAnalysis> {
        let range = range.unwrap_or_else(|| self.default_range());
        let mut result = AnalysisResult::new(instrument.clone());

        let series = self.fetch(&mut result, range).await?;
        self.compute(&mut result, &series);
        self.score(&mut result);
        Ok(PreparedAnalysis { series, result })
    }

    /// The narrative stage; failures degrade instead of erroring
    pub async fn enrich(&self, prepared: PreparedAnalysis) -> AnalysisResult {
        let Some(analyzer) = self.analyzer.as_ref() else {
            return prepared.skip_ai();
        };
        let Some(request) = prepared.ai_request() else {
            return prepared.skip_ai();
        };

        let mut result = prepared.result;
        result.state = PipelineState::AiAnalyzing;
        match analyzer.analyze(&request).await {
            Ok(analysis) => finish_with_ai(result, analysis),
            Err(err) => degrade(result, &err),
        }
    }

    /// Single-shot analysis
    pub async fn analyze(&self, instrument: &Instrument, options: &AnalysisOptions) -> Result<AnalysisResult> {
        let prepared = self.prepare(instrument, options.range).await?;
        let result = if options.with_ai {
            self.enrich(prepared).await
        } else {
            prepared.skip_ai()
        };
        log_finished(&result);
        Ok(result)
    }

    /// Streamed analysis
    ///
    /// Lazy and finite; the last event is terminal. Dropping the stream
    /// abandons whatever stage is in flight.
    pub fn analyze_stream(&self, instrument: Instrument, options: AnalysisOptions) -> BoxStream<'static, AnalysisEvent> {
        let state = StreamState {
            coordinator: self.clone(),
            step: Step::Fetch {
                instrument,
                range: options.range.unwrap_or_else(|| self.default_range()),
            },
            with_ai: options.with_ai,
        };
        stream::unfold(state, StreamState::advance).boxed()
    }

    async fn fetch(&self, result: &mut AnalysisResult, range: DateRange) -> Result<Arc<PriceSeries>> {
        let instrument = result.instrument.clone();
        let series = self
            .provider
            .fetch_history(&instrument, range)
            .await
            .inspect_err(|e| warn!(%instrument, kind = e.kind(), "Fetching failed: {e}"))?;

        let quote = series
            .latest_quote()
            .ok_or_else(|| StockError::NotFound(format!("no bars for {instrument}")))?;
        result.quote = Some(quote);
        result.bar_count = series.len();
        result.stages.fetched = true;
        result.state = PipelineState::Computing;
        Ok(series)
    }

    fn compute(&self, result: &mut AnalysisResult, series: &PriceSeries) {
        let set = indicators::compute(series, &self.params);
        debug!(instrument = %result.instrument, available = set.available_count(), "Indicators computed");
        result.indicators = Some(set);
        result.stages.computed = true;
        result.state = PipelineState::Scoring;
    }

    fn score(&self, result: &mut AnalysisResult) {
        if let Some(set) = &result.indicators {
            result.score = Some(self.scorer.score(set));
        }
        result.stages.scored = true;
        result.state = PipelineState::AiAnalyzing;
    }
}

impl std::fmt::Debug for AnalysisCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisCoordinator")
            .field("has_ai", &self.has_ai())
            .field("params", &self.params)
            .field("history_days", &self.history_days)
            .finish_non_exhaustive()
    }
}

fn finish_with_ai(mut result: AnalysisResult, analysis: crate::ai::AiAnalysis) -> AnalysisResult {
    result.ai = Some(analysis);
    result.stages.ai = AiStatus::Completed;
    result.state = PipelineState::Complete;
    result
}

fn degrade(mut result: AnalysisResult, err: &AiError) -> AnalysisResult {
    warn!(instrument = %result.instrument, kind = err.kind(), "AI analysis failed: {err}");
    result.stages.ai = AiStatus::from(err);
    result.state = PipelineState::Degraded;
    result
}

fn log_finished(result: &AnalysisResult) {
    info!(
        instrument = %result.instrument,
        state = ?result.state,
        score = ?result.score_value(),
        "Analysis finished"
    );
}

enum Step {
    Fetch {
        instrument: Instrument,
        range: DateRange,
    },
    Compute {
        series: Arc<PriceSeries>,
        result: AnalysisResult,
    },
    Score {
        series: Arc<PriceSeries>,
        result: AnalysisResult,
    },
    Ai {
        prepared: PreparedAnalysis,
    },
    Narrate {
        chunks: NarrativeStream,
        result: AnalysisResult,
    },
    Done,
}

struct StreamState {
    coordinator: AnalysisCoordinator,
    step: Step,
    with_ai: bool,
}

impl StreamState {
    /// Run until the next event
    async fn advance(mut self) -> Option<(AnalysisEvent, Self)> {
        loop {
            match std::mem::replace(&mut self.step, Step::Done) {
                Step::Done => return None,

                Step::Fetch { instrument, range } => {
                    let mut result = AnalysisResult::new(instrument.clone());
                    match self.coordinator.fetch(&mut result, range).await {
                        Ok(series) => {
                            let event = AnalysisEvent::stage(result.clone());
                            self.step = Step::Compute { series, result };
                            return Some((event, self));
                        }
                        Err(err) => {
                            let event = AnalysisEvent::Failed {
                                instrument,
                                error: ErrorInfo::from(&err),
                            };
                            return Some((event, self));
                        }
                    }
                }

                Step::Compute { series, mut result } => {
                    self.coordinator.compute(&mut result, &series);
                    let event = AnalysisEvent::stage(result.clone());
                    self.step = Step::Score { series, result };
                    return Some((event, self));
                }

                Step::Score { series, mut result } => {
                    self.coordinator.score(&mut result);
                    let prepared = PreparedAnalysis { series, result };
                    if !(self.with_ai && self.coordinator.has_ai()) {
                        let result = prepared.skip_ai();
                        log_finished(&result);
                        return Some((AnalysisEvent::stage(result), self));
                    }
                    let event = AnalysisEvent::stage(prepared.result.clone());
                    self.step = Step::Ai { prepared };
                    return Some((event, self));
                }

                Step::Ai { prepared } => {
                    let (Some(analyzer), Some(request)) = (self.coordinator.analyzer.clone(), prepared.ai_request())
                    else {
                        return Some((AnalysisEvent::stage(prepared.skip_ai()), self));
                    };
                    match analyzer.analyze_stream(&request).await {
                        Ok(chunks) => {
                            self.step = Step::Narrate {
                                chunks,
                                result: prepared.result,
                            };
                        }
                        Err(err) => {
                            let result = degrade(prepared.result, &err);
                            log_finished(&result);
                            return Some((AnalysisEvent::stage(result), self));
                        }
                    }
                }

                Step::Narrate { mut chunks, result } => {
                    let finished = match chunks.next().await {
                        Some(Ok(NarrativeChunk::Text(text))) => {
                            let event = AnalysisEvent::Narrative {
                                instrument: result.instrument.clone(),
                                text,
                            };
                            self.step = Step::Narrate { chunks, result };
                            return Some((event, self));
                        }
                        Some(Ok(NarrativeChunk::Done(analysis))) => finish_with_ai(result, analysis),
                        Some(Err(err)) => degrade(result, &err),
                        None => degrade(result, &AiError::UpstreamError("reply ended without a result".to_string())),
                    };
                    log_finished(&finished);
                    return Some((AnalysisEvent::stage(finished), self));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::fixtures::analysis;
    use crate::ai::MockAiAnalyzer;
    use crate::series::fixtures::ascending;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Provider serving one fixed series, or NotFound for other codes
    struct FixedProvider {
        series: Arc<PriceSeries>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl DataProvider for FixedProvider {
        async fn fetch_history(&self, instrument: &Instrument, _range: DateRange) -> Result<Arc<PriceSeries>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if instrument == self.series.instrument() {
                Ok(Arc::clone(&self.series))
            } else {
                Err(StockError::NotFound(instrument.to_string()))
            }
        }
    }

    fn provider() -> Arc<FixedProvider> {
        Arc::new(FixedProvider {
            series: Arc::new(ascending("600519", 30)),
            calls: AtomicUsize::new(0),
        })
    }

    fn instrument(code: &str) -> Instrument {
        Instrument::parse(code, crate::market::MarketType::AShare).unwrap()
    }

    fn coordinator(analyzer: Option<MockAiAnalyzer>) -> AnalysisCoordinator {
        let coordinator = AnalysisCoordinator::new(provider(), Scorer::default());
        match analyzer {
            Some(mock) => coordinator.with_analyzer(Arc::new(mock)),
            None => coordinator,
        }
    }

    fn narrative(chunks: Vec<std::result::Result<NarrativeChunk, AiError>>) -> NarrativeStream {
        stream::iter(chunks).boxed()
    }

    #[tokio::test]
    async fn test_analyze_without_analyzer_skips_ai() {
        let result = coordinator(None)
            .analyze(&instrument("600519"), &AnalysisOptions::default())
            .await
            .unwrap();

        assert_eq!(result.state, PipelineState::Complete);
        assert_eq!(result.stages.ai, AiStatus::Skipped);
        assert!(result.stages.fetched && result.stages.computed && result.stages.scored);
        assert_eq!(result.bar_count, 30);
        assert!(result.score_value().unwrap() >= 60.0);
    }

    #[tokio::test]
    async fn test_analyze_with_ai() {
        let mut mock = MockAiAnalyzer::new();
        mock.expect_analyze()
            .times(1)
            .returning(|_| Ok(analysis("steady climb")));

        let result = coordinator(Some(mock))
            .analyze(&instrument("600519"), &AnalysisOptions::default())
            .await
            .unwrap();

        assert_eq!(result.state, PipelineState::Complete);
        assert_eq!(result.stages.ai, AiStatus::Completed);
        assert_eq!(result.ai.unwrap().narrative, "steady climb");
    }

    #[tokio::test]
    async fn test_ai_failure_degrades() {
        let mut mock = MockAiAnalyzer::new();
        mock.expect_analyze().returning(|_| Err(AiError::UpstreamTimeout));

        let result = coordinator(Some(mock))
            .analyze(&instrument("600519"), &AnalysisOptions::default())
            .await
            .unwrap();

        assert_eq!(result.state, PipelineState::Degraded);
        assert!(result.ai.is_none());
        assert!(result.score.is_some());
        assert!(matches!(result.stages.ai, AiStatus::Failed { ref kind, .. } if kind == "upstream_timeout"));
    }

    #[tokio::test]
    async fn test_with_ai_false_never_calls_analyzer() {
        let mut mock = MockAiAnalyzer::new();
        mock.expect_analyze().never();
        mock.expect_analyze_stream().never();

        let coordinator = coordinator(Some(mock));
        let result = coordinator
            .analyze(&instrument("600519"), &AnalysisOptions::without_ai())
            .await
            .unwrap();
        assert_eq!(result.stages.ai, AiStatus::Skipped);

        let events: Vec<_> = coordinator
            .analyze_stream(instrument("600519"), AnalysisOptions::without_ai())
            .collect()
            .await;
        assert_eq!(events.len(), 3);
    }

    #[tokio::test]
    async fn test_fetch_failure_is_fatal() {
        let err = coordinator(None)
            .analyze(&instrument("000001"), &AnalysisOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[tokio::test]
    async fn test_stream_stages_in_order() {
        let mut mock = MockAiAnalyzer::new();
        mock.expect_analyze_stream().times(1).returning(|_| {
            Ok(narrative(vec![
                Ok(NarrativeChunk::Text("part one ".into())),
                Ok(NarrativeChunk::Text("part two".into())),
                Ok(NarrativeChunk::Done(analysis("part one part two"))),
            ]))
        });

        let events: Vec<_> = coordinator(Some(mock))
            .analyze_stream(instrument("600519"), AnalysisOptions::default())
            .collect()
            .await;

        let states: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                AnalysisEvent::Stage { state, .. } => Some(*state),
                _ => None,
            })
            .collect();
        assert_eq!(
            states,
            vec![
                PipelineState::Computing,
                PipelineState::Scoring,
                PipelineState::AiAnalyzing,
                PipelineState::Complete
            ]
        );
        let narrative_count = events
            .iter()
            .filter(|e| matches!(e, AnalysisEvent::Narrative { .. }))
            .count();
        assert_eq!(narrative_count, 2);
        assert!(events.last().unwrap().is_terminal());
    }

    #[tokio::test]
    async fn test_stream_error_mid_narrative_degrades() {
        let mut mock = MockAiAnalyzer::new();
        mock.expect_analyze_stream().returning(|_| {
            Ok(narrative(vec![
                Ok(NarrativeChunk::Text("partial".into())),
                Err(AiError::RateLimited),
            ]))
        });

        let events: Vec<_> = coordinator(Some(mock))
            .analyze_stream(instrument("600519"), AnalysisOptions::default())
            .collect()
            .await;

        match events.last().unwrap() {
            AnalysisEvent::Stage { state, result } => {
                assert_eq!(*state, PipelineState::Degraded);
                assert!(result.score.is_some());
            }
            other => panic!("unexpected final event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_stream_fetch_failure_emits_failed() {
        let events: Vec<_> = coordinator(None)
            .analyze_stream(instrument("000001"), AnalysisOptions::default())
            .collect()
            .await;

        assert_eq!(events.len(), 1);
        match &events[0] {
            AnalysisEvent::Failed { error, .. } => assert_eq!(error.kind, "not_found"),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_stream_is_lazy() {
        let provider = provider();
        let coordinator = AnalysisCoordinator::new(provider.clone(), Scorer::default());
        let stream = coordinator.analyze_stream(instrument("600519"), AnalysisOptions::default());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
        drop(stream);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_prepare_then_enrich() {
        let mut mock = MockAiAnalyzer::new();
        mock.expect_analyze().returning(|_| Ok(analysis("ok")));
        let coordinator = coordinator(Some(mock));

        let prepared = coordinator.prepare(&instrument("600519"), None).await.unwrap();
        assert_eq!(prepared.result().state, PipelineState::AiAnalyzing);
        assert!(prepared.result().ai.is_none());

        let result = coordinator.enrich(prepared).await;
        assert_eq!(result.state, PipelineState::Complete);
    }
}
