//! Batch scanning with bounded concurrency
//!
//! Instruments run through the coordinator at most `concurrency` at a time.
//! Results stream out in completion order. The score filter runs before the
//! narrative stage, so only passing instruments cost an AI call.

use super::coordinator::AnalysisCoordinator;
use super::result::AnalysisResult;
use crate::error::{ErrorInfo, StockError};
use crate::market::Instrument;
use crate::series::DateRange;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

/// Pipelines run at once when nothing is configured
pub const DEFAULT_CONCURRENCY: usize = 5;

/// What to do with instruments whose pipeline failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Emit a `Failed` event per instrument
    #[default]
    Report,
    /// Count the failure but emit nothing
    Skip,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScanRequest {
    pub instruments: Vec<Instrument>,
    pub min_score: f64,
    pub with_ai: bool,
    pub failure_policy: FailurePolicy,
    pub range: Option<DateRange>,
}

impl ScanRequest {
    pub fn new(instruments: Vec<Instrument>, min_score: f64) -> Self {
        Self {
            instruments,
            min_score,
            with_ai: true,
            failure_policy: FailurePolicy::Report,
            range: None,
        }
    }

    pub fn with_ai(mut self, with_ai: bool) -> Self {
        self.with_ai = with_ai;
        self
    }

    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }
}

/// Item of a streamed scan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ScanEvent {
    Started {
        scan_id: Uuid,
        total: usize,
    },
    /// An instrument that passed the filter
    Result { result: Box<AnalysisResult> },
    Failed {
        instrument: Instrument,
        error: ErrorInfo,
    },
    /// Always the last event
    Completed {
        scan_id: Uuid,
        scanned: usize,
        matched: usize,
        failed: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanFailure {
    pub instrument: Instrument,
    pub error: ErrorInfo,
}

/// Buffered outcome of a scan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanReport {
    pub scan_id: Uuid,
    /// Passing results, highest score first
    pub results: Vec<AnalysisResult>,
    pub failures: Vec<ScanFailure>,
    pub scanned: usize,
    pub matched: usize,
    pub failed: usize,
}

enum Outcome {
    Matched(AnalysisResult),
    Filtered,
    Failed(Instrument, StockError),
}

/// Fans analyses out over many instruments
#[derive(Debug, Clone)]
pub struct ScanCoordinator {
    analysis: AnalysisCoordinator,
    concurrency: usize,
}

impl ScanCoordinator {
    pub fn new(analysis: AnalysisCoordinator, concurrency: usize) -> Self {
        Self {
            analysis,
            concurrency: concurrency.max(1),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn analysis(&self) -> &AnalysisCoordinator {
        &self.analysis
    }

    /// Stream events in completion order
    ///
    /// Dropping the stream stops new pipelines from starting and abandons
    /// those in flight.
    pub fn scan_stream(&self, request: ScanRequest) -> BoxStream<'static, ScanEvent> {
        let scan_id = Uuid::new_v4();
        let total = request.instruments.len();
        let ScanRequest {
            instruments,
            min_score,
            with_ai,
            failure_policy,
            range,
        } = request;

        info!(%scan_id, total, min_score, with_ai, concurrency = self.concurrency, "Scan started");

        let analysis = self.analysis.clone();
        let outcomes = stream::iter(instruments)
            .map(move |instrument| {
                let analysis = analysis.clone();
                async move { run_one(&analysis, instrument, min_score, with_ai, range).await }
            })
            .buffer_unordered(self.concurrency)
            .boxed();

        let state = ScanState {
            scan_id,
            total,
            outcomes,
            failure_policy,
            phase: Phase::Start,
            scanned: 0,
            matched: 0,
            failed: 0,
        };
        stream::unfold(state, ScanState::advance).boxed()
    }

    /// Run a whole scan and collect the results, highest score first
    pub async fn scan(&self, request: ScanRequest) -> ScanReport {
        let mut events = self.scan_stream(request);
        let mut report = ScanReport {
            scan_id: Uuid::nil(),
            results: Vec::new(),
            failures: Vec::new(),
            scanned: 0,
            matched: 0,
            failed: 0,
        };

        while let Some(event) = events.next().await {
            match event {
                ScanEvent::Started { scan_id, .. } => report.scan_id = scan_id,
                ScanEvent::Result { result } => report.results.push(*result),
                ScanEvent::Failed { instrument, error } => report.failures.push(ScanFailure { instrument, error }),
                ScanEvent::Completed {
                    scanned,
                    matched,
                    failed,
                    ..
                } => {
                    report.scanned = scanned;
                    report.matched = matched;
                    report.failed = failed;
                }
            }
        }

        report.results.sort_by(|a, b| {
            let key = |r: &AnalysisResult| r.score.as_ref().map_or(f64::NEG_INFINITY, |s| s.sort_key());
            key(b).total_cmp(&key(a))
        });
        report
    }
}

async fn run_one(
    analysis: &AnalysisCoordinator,
    instrument: Instrument,
    min_score: f64,
    with_ai: bool,
    range: Option<DateRange>,
) -> Outcome {
    let prepared = match analysis.prepare(&instrument, range).await {
        Ok(prepared) => prepared,
        Err(err) => return Outcome::Failed(instrument, err),
    };

    let passes = prepared
        .result()
        .score
        .as_ref()
        .is_some_and(|score| score.passes(min_score));
    if !passes {
        debug!(%instrument, score = ?prepared.result().score_value(), "Filtered out");
        return Outcome::Filtered;
    }

    let result = if with_ai {
        analysis.enrich(prepared).await
    } else {
        prepared.skip_ai()
    };
    Outcome::Matched(result)
}

enum Phase {
    Start,
    Running,
    Done,
}

struct ScanState {
    scan_id: Uuid,
    total: usize,
    outcomes: BoxStream<'static, Outcome>,
    failure_policy: FailurePolicy,
    phase: Phase,
    scanned: usize,
    matched: usize,
    failed: usize,
}

impl ScanState {
    async fn advance(mut self) -> Option<(ScanEvent, Self)> {
        match self.phase {
            Phase::Done => return None,
            Phase::Start => {
                self.phase = Phase::Running;
                let event = ScanEvent::Started {
                    scan_id: self.scan_id,
                    total: self.total,
                };
                return Some((event, self));
            }
            Phase::Running => {}
        }

        while let Some(outcome) = self.outcomes.next().await {
            self.scanned += 1;
            match outcome {
                Outcome::Filtered => {}
                Outcome::Matched(result) => {
                    self.matched += 1;
                    return Some((
                        ScanEvent::Result {
                            result: Box::new(result),
                        },
                        self,
                    ));
                }
                Outcome::Failed(instrument, err) => {
                    self.failed += 1;
                    if self.failure_policy == FailurePolicy::Report {
                        let error = ErrorInfo::from(&err);
                        return Some((ScanEvent::Failed { instrument, error }, self));
                    }
                }
            }
        }

        self.phase = Phase::Done;
        info!(
            scan_id = %self.scan_id,
            scanned = self.scanned,
            matched = self.matched,
            failed = self.failed,
            "Scan completed"
        );
        let event = ScanEvent::Completed {
            scan_id: self.scan_id,
            scanned: self.scanned,
            matched: self.matched,
            failed: self.failed,
        };
        Some((event, self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::MockAiAnalyzer;
    use crate::ai::fixtures::analysis;
    use crate::error::Result;
    use crate::market::MarketType;
    use crate::provider::DataProvider;
    use crate::scoring::Scorer;
    use crate::series::PriceSeries;
    use crate::series::fixtures::{ascending, descending, series_from_closes};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Provider over a fixed map, tracking peak concurrency
    struct MapProvider {
        series: HashMap<String, Arc<PriceSeries>>,
        delay: Duration,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl MapProvider {
        fn new(entries: Vec<PriceSeries>, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                series: entries
                    .into_iter()
                    .map(|s| (s.instrument().code().to_string(), Arc::new(s)))
                    .collect(),
                delay,
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl DataProvider for MapProvider {
        async fn fetch_history(&self, instrument: &Instrument, _range: DateRange) -> Result<Arc<PriceSeries>> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            self.series
                .get(instrument.code())
                .cloned()
                .ok_or_else(|| StockError::NotFound(instrument.to_string()))
        }
    }

    fn instruments(codes: &[&str]) -> Vec<Instrument> {
        codes
            .iter()
            .map(|c| Instrument::parse(c, MarketType::AShare).unwrap())
            .collect()
    }

    fn scanner(provider: Arc<MapProvider>, mock: Option<MockAiAnalyzer>, concurrency: usize) -> ScanCoordinator {
        let mut analysis = AnalysisCoordinator::new(provider, Scorer::default());
        if let Some(mock) = mock {
            analysis = analysis.with_analyzer(Arc::new(mock));
        }
        ScanCoordinator::new(analysis, concurrency)
    }

    #[tokio::test]
    async fn test_filter_runs_before_ai() {
        let provider = MapProvider::new(
            vec![descending("000001", 30), ascending("600519", 30)],
            Duration::ZERO,
        );
        let mut mock = MockAiAnalyzer::new();
        mock.expect_analyze()
            .withf(|req| req.instrument.code() == "600519")
            .times(1)
            .returning(|_| Ok(analysis("up")));

        let report = scanner(provider, Some(mock), 5)
            .scan(ScanRequest::new(instruments(&["000001", "600519"]), 80.0))
            .await;

        assert_eq!(report.scanned, 2);
        assert_eq!(report.matched, 1);
        assert_eq!(report.results[0].instrument.code(), "600519");
        assert!(report.results[0].ai.is_some());
    }

    #[tokio::test]
    async fn test_failures_are_isolated() {
        let provider = MapProvider::new(
            vec![
                ascending("600001", 30),
                ascending("600002", 30),
                ascending("600003", 30),
                ascending("600004", 30),
            ],
            Duration::ZERO,
        );
        let codes = ["600001", "600002", "999999", "600003", "600004"];

        let report = scanner(provider, None, 5)
            .scan(ScanRequest::new(instruments(&codes), 0.0))
            .await;

        assert_eq!(report.scanned, 5);
        assert_eq!(report.matched, 4);
        assert_eq!(report.failed, 1);
        assert_eq!(report.failures[0].instrument.code(), "999999");
        assert_eq!(report.failures[0].error.kind, "not_found");
    }

    #[tokio::test]
    async fn test_skip_policy_hides_failures() {
        let provider = MapProvider::new(vec![ascending("600001", 30)], Duration::ZERO);
        let request = ScanRequest::new(instruments(&["600001", "999999"]), 0.0).failure_policy(FailurePolicy::Skip);

        let events: Vec<_> = scanner(provider, None, 2).scan_stream(request).collect().await;
        assert!(!events.iter().any(|e| matches!(e, ScanEvent::Failed { .. })));
        match events.last().unwrap() {
            ScanEvent::Completed { scanned, failed, .. } => {
                assert_eq!(*scanned, 2);
                assert_eq!(*failed, 1);
            }
            other => panic!("unexpected final event {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_is_bounded() {
        let entries = (0..12).map(|i| ascending(&format!("6000{i:02}"), 30)).collect();
        let provider = MapProvider::new(entries, Duration::from_millis(50));
        let codes: Vec<String> = (0..12).map(|i| format!("6000{i:02}")).collect();
        let codes: Vec<&str> = codes.iter().map(String::as_str).collect();

        let report = scanner(provider.clone(), None, 3)
            .scan(ScanRequest::new(instruments(&codes), 0.0).with_ai(false))
            .await;

        assert_eq!(report.matched, 12);
        assert_eq!(provider.peak.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_insufficient_data_passes_only_zero_threshold() {
        let provider = MapProvider::new(vec![series_from_closes("600519", &[10.0])], Duration::ZERO);
        let scanner = scanner(provider, None, 1);

        let report = scanner
            .scan(ScanRequest::new(instruments(&["600519"]), 0.0).with_ai(false))
            .await;
        assert_eq!(report.matched, 1);

        let report = scanner
            .scan(ScanRequest::new(instruments(&["600519"]), 1.0).with_ai(false))
            .await;
        assert_eq!(report.matched, 0);
    }

    #[tokio::test]
    async fn test_results_sorted_by_score() {
        let provider = MapProvider::new(
            vec![descending("000001", 30), ascending("600519", 30)],
            Duration::ZERO,
        );
        let report = scanner(provider, None, 2)
            .scan(ScanRequest::new(instruments(&["000001", "600519"]), 0.0).with_ai(false))
            .await;

        let scores: Vec<f64> = report.results.iter().filter_map(AnalysisResult::score_value).collect();
        assert_eq!(scores.len(), 2);
        assert!(scores[0] >= scores[1]);
    }

    #[tokio::test]
    async fn test_stream_brackets_results() {
        let provider = MapProvider::new(vec![ascending("600519", 30)], Duration::ZERO);
        let events: Vec<_> = scanner(provider, None, 1)
            .scan_stream(ScanRequest::new(instruments(&["600519"]), 0.0))
            .collect()
            .await;

        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], ScanEvent::Started { total: 1, .. }));
        assert!(matches!(events[1], ScanEvent::Result { .. }));
        assert!(matches!(events[2], ScanEvent::Completed { matched: 1, .. }));
    }

    #[tokio::test]
    async fn test_empty_scan_completes() {
        let provider = MapProvider::new(vec![], Duration::ZERO);
        let report = scanner(provider, None, 1).scan(ScanRequest::new(vec![], 0.0)).await;
        assert_eq!(report.scanned, 0);
        assert!(report.results.is_empty());
    }
}
