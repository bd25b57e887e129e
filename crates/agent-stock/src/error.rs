//! Error types for stock analysis operations

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stock analysis specific errors
#[derive(Debug, Error)]
pub enum StockError {
    /// The instrument or its data does not exist upstream
    #[error("Not found: {0}")]
    NotFound(String),

    /// Malformed code, market type or parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Date range outside of what the service accepts
    #[error("Invalid date range: {0}")]
    InvalidRange(String),

    /// Upstream data source failed or returned garbage
    #[error("Upstream {source_name} unavailable: {reason}")]
    UpstreamUnavailable {
        source_name: String,
        reason: String,
    },

    /// Upstream data source did not answer in time
    #[error("Upstream {source_name} timed out")]
    UpstreamTimeout {
        source_name: String,
    },

    /// Rate limit exceeded for a source
    #[error("Rate limit exceeded for {source_name}")]
    RateLimited {
        source_name: String,
    },

    /// Too few bars to compute anything meaningful
    #[error("Insufficient data for {0}")]
    InsufficientData(String),

    /// The language model step failed
    #[error("AI analysis failed: {0}")]
    AiAnalysisFailed(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Anything else
    #[error("{0}")]
    Internal(String),
}

/// Result type alias for stock operations
pub type Result<T> = std::result::Result<T, StockError>;

impl StockError {
    pub(crate) fn unavailable(source: &str, reason: impl Into<String>) -> Self {
        Self::UpstreamUnavailable {
            source_name: source.to_string(),
            reason: reason.into(),
        }
    }

    /// Stable snake_case code used on the wire
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::InvalidInput(_) => "invalid_input",
            Self::InvalidRange(_) => "invalid_range",
            Self::UpstreamUnavailable { .. } => "upstream_unavailable",
            Self::UpstreamTimeout { .. } => "upstream_timeout",
            Self::RateLimited { .. } => "rate_limited",
            Self::InsufficientData(_) => "insufficient_data",
            Self::AiAnalysisFailed(_) => "ai_analysis_failed",
            Self::Config(_) => "config",
            Self::Internal(_) => "internal",
        }
    }

    /// Transient upstream failures the caller may retry
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::UpstreamUnavailable { .. } | Self::UpstreamTimeout { .. } | Self::RateLimited { .. }
        )
    }

    /// HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::InvalidInput(_) | Self::InvalidRange(_) => 400,
            Self::RateLimited { .. } => 429,
            Self::UpstreamTimeout { .. } => 504,
            Self::UpstreamUnavailable { .. } | Self::AiAnalysisFailed(_) => 502,
            Self::InsufficientData(_) => 422,
            Self::Config(_) | Self::Internal(_) => 500,
        }
    }
}

/// Wire form of an error
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: String,
    pub message: String,
    pub retryable: bool,
}

impl From<&StockError> for ErrorInfo {
    fn from(err: &StockError) -> Self {
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
            retryable: err.is_retryable(),
        }
    }
}

impl From<reqwest::Error> for StockError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::UpstreamTimeout {
                source_name: "http".to_string(),
            }
        } else {
            Self::unavailable("http", err.to_string())
        }
    }
}

impl From<agent_utils::EnvError> for StockError {
    fn from(err: agent_utils::EnvError) -> Self {
        Self::Config(err.to_string())
    }
}

impl StockError {
    /// Convert for tool callers, keeping the kind and retry hint
    pub fn into_tool_error(self, tool: &str) -> agent_tools::ToolError {
        match self {
            Self::InvalidInput(reason) | Self::InvalidRange(reason) => {
                agent_tools::ToolError::InvalidParams {
                    tool: tool.to_string(),
                    reason,
                }
            }
            other => agent_tools::ToolError::ExecutionFailed {
                tool: tool.to_string(),
                kind: other.kind().to_string(),
                retryable: other.is_retryable(),
                message: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StockError::InvalidInput("bad code".to_string());
        assert_eq!(err.to_string(), "Invalid input: bad code");

        let err = StockError::RateLimited {
            source_name: "eastmoney".to_string(),
        };
        assert_eq!(err.to_string(), "Rate limit exceeded for eastmoney");
    }

    #[test]
    fn test_kind_and_status() {
        assert_eq!(StockError::NotFound("x".into()).status_code(), 404);
        assert_eq!(StockError::InvalidRange("x".into()).status_code(), 400);
        assert_eq!(
            StockError::UpstreamTimeout {
                source_name: "yahoo".into()
            }
            .status_code(),
            504
        );
        assert_eq!(StockError::Internal("x".into()).kind(), "internal");
    }

    #[test]
    fn test_retryable() {
        assert!(StockError::unavailable("yahoo", "503").is_retryable());
        assert!(!StockError::NotFound("x".into()).is_retryable());
        assert!(!StockError::InvalidInput("x".into()).is_retryable());
    }

    #[test]
    fn test_tool_error_conversion() {
        let err = StockError::InvalidInput("bad".into()).into_tool_error("get_stock_price");
        assert_eq!(err.kind(), "invalid_input");

        let err = StockError::RateLimited {
            source_name: "yahoo".into(),
        }
        .into_tool_error("get_stock_price");
        assert_eq!(err.kind(), "rate_limited");
        assert!(err.is_retryable());
    }
}
