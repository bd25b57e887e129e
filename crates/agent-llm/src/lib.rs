//! LLM provider abstraction layer
//!
//! This crate provides provider-agnostic abstractions for talking to chat
//! completion models. It includes:
//!
//! - Message types for LLM communication
//! - Completion request/response types
//! - Provider trait with blocking and streamed completion
//! - An OpenAI-compatible provider (behind the `openai` feature)

pub mod completion;
pub mod error;
pub mod messages;
pub mod provider;

// Re-export main types
pub use completion::{CompletionRequest, CompletionResponse, StopReason, TokenUsage};
pub use error::{LLMError, Result};
pub use messages::{Message, Role};
pub use provider::{CompletionStream, LLMProvider};

// Provider implementations (feature-gated)
#[cfg(feature = "openai")]
pub mod providers;
