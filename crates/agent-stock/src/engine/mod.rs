//! Analysis engine
//!
//! Coordination layer running the fetch, indicator, scoring and narrative
//! stages for one instrument or a batch of them.

pub mod coordinator;
pub mod result;
pub mod scan;

pub use coordinator::{AnalysisCoordinator, AnalysisOptions, PreparedAnalysis};
pub use result::{AiStatus, AnalysisEvent, AnalysisResult, PipelineState, StageFlags};
pub use scan::{FailurePolicy, ScanCoordinator, ScanEvent, ScanFailure, ScanReport, ScanRequest};
