//! HTTP surface
//!
//! REST endpoints, tool invocation and a minimal MCP endpoint, all backed by
//! one [`StockService`].

mod mcp;
mod routes;

use agent_tools::{ToolError, ToolRegistry};
use axum::Json;
use axum::body::Body;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use futures::{Stream, StreamExt};
use serde::Serialize;
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use tracing::error;

use crate::error::{ErrorInfo, StockError};
use crate::service::StockService;
use crate::tools::tool_registry;

pub use routes::build_router;

pub(crate) const NDJSON: &str = "application/x-ndjson";

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<StockService>,
    pub tools: Arc<ToolRegistry>,
}

impl AppState {
    pub fn new(service: StockService) -> Self {
        Self::from_shared(Arc::new(service))
    }

    /// State over a service already shared elsewhere
    pub fn from_shared(service: Arc<StockService>) -> Self {
        let tools = Arc::new(tool_registry(Arc::clone(&service)));
        Self { service, tools }
    }
}

/// Error body `{"error": {"kind", "message", "retryable"}}` with a mapped status
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    info: ErrorInfo,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<StockError> for ApiError {
    fn from(err: StockError) -> Self {
        let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            error!(kind = err.kind(), "Request failed: {err}");
        }
        Self {
            status,
            info: ErrorInfo::from(&err),
        }
    }
}

impl From<ToolError> for ApiError {
    fn from(err: ToolError) -> Self {
        let status = match err.kind() {
            "unknown_tool" | "not_found" => StatusCode::NOT_FOUND,
            "invalid_input" | "invalid_range" => StatusCode::BAD_REQUEST,
            "rate_limited" => StatusCode::TOO_MANY_REQUESTS,
            "upstream_timeout" => StatusCode::GATEWAY_TIMEOUT,
            "upstream_unavailable" | "ai_analysis_failed" => StatusCode::BAD_GATEWAY,
            "insufficient_data" => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            info: ErrorInfo {
                kind: err.kind().to_string(),
                message: err.to_string(),
                retryable: err.is_retryable(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.info }))).into_response()
    }
}

/// One JSON document per line, flushed as each item arrives
pub(crate) fn ndjson<S, T>(events: S) -> Response
where
    S: Stream<Item = T> + Send + 'static,
    T: Serialize,
{
    let lines = events.map(|event| {
        let mut line = serde_json::to_vec(&event).unwrap_or_else(|e| {
            serde_json::to_vec(&json!({
                "event": "failed",
                "error": {"kind": "internal", "message": e.to_string(), "retryable": false}
            }))
            .unwrap_or_default()
        });
        line.push(b'\n');
        Ok::<_, Infallible>(line)
    });

    ([(header::CONTENT_TYPE, NDJSON)], Body::from_stream(lines)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let err = ApiError::from(StockError::NotFound("A:600000".into()));
        assert_eq!(err.status(), StatusCode::NOT_FOUND);

        let err = ApiError::from(StockError::RateLimited {
            source_name: "eastmoney".into(),
        });
        assert_eq!(err.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(err.info.retryable);

        let err = ApiError::from(ToolError::UnknownTool("nope".into()));
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert_eq!(err.info.kind, "unknown_tool");
    }
}
