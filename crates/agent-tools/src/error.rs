//! Error types for tool invocation

use thiserror::Error;

/// Result type alias for tool operations
pub type Result<T> = std::result::Result<T, ToolError>;

/// Error type for tool operations
#[derive(Error, Debug)]
pub enum ToolError {
    /// No tool with this name is registered
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// Input did not match the tool's schema
    #[error("Invalid parameters for {tool}: {reason}")]
    InvalidParams {
        /// Tool name
        tool: String,
        /// What was wrong
        reason: String,
    },

    /// The tool ran and failed
    #[error("Tool {tool} failed: {message}")]
    ExecutionFailed {
        /// Tool name
        tool: String,
        /// Stable error kind of the underlying failure
        kind: String,
        /// Human readable message
        message: String,
        /// Whether the caller may retry
        retryable: bool,
    },
}

impl ToolError {
    /// Stable snake_case code of this error
    pub fn kind(&self) -> &str {
        match self {
            Self::UnknownTool(_) => "unknown_tool",
            Self::InvalidParams { .. } => "invalid_input",
            Self::ExecutionFailed { kind, .. } => kind,
        }
    }

    /// Whether retrying the same call may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ExecutionFailed { retryable: true, .. })
    }
}
