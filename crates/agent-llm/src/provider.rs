//! LLM provider trait definition

use crate::{CompletionRequest, CompletionResponse, Result};
use async_trait::async_trait;
use futures::stream::{self, BoxStream};

/// Stream of text deltas produced by a streamed completion
pub type CompletionStream = BoxStream<'static, Result<String>>;

/// Trait for LLM providers
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Generate a completion from the LLM
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse>;

    /// Generate a completion as a stream of text deltas
    ///
    /// Providers without native streaming yield the full reply as one chunk.
    async fn complete_stream(&self, request: CompletionRequest) -> Result<CompletionStream> {
        let response = self.complete(request).await?;
        Ok(Box::pin(stream::once(async move {
            Ok(response.message.content)
        })))
    }

    /// Get the provider name (e.g., "openai")
    fn name(&self) -> &str;
}
