//! Narrative analysis over a chat completion endpoint

use super::{AiAnalysis, AiAnalyzer, AiError, AiRequest, NarrativeChunk, NarrativeStream, ReplyParser};
use crate::config::AiConfig;
use crate::error::{Result, StockError};
use crate::prompts::PromptSet;
use agent_llm::providers::{OpenAIConfig, OpenAIProvider};
use agent_llm::{CompletionRequest, CompletionStream, LLMProvider, Message};
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

/// [`AiAnalyzer`] backed by any [`LLMProvider`]
pub struct LlmAnalyzer {
    provider: Arc<dyn LLMProvider>,
    model: String,
    temperature: f32,
    max_tokens: usize,
    timeout: Duration,
    prompts: PromptSet,
    parser: Arc<ReplyParser>,
}

impl LlmAnalyzer {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &AiConfig) -> Result<Self> {
        let prompts = PromptSet::new().map_err(|e| StockError::Config(format!("prompt templates: {e}")))?;
        let parser = ReplyParser::new().map_err(|e| StockError::Config(format!("reply patterns: {e}")))?;
        Ok(Self {
            provider,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            timeout: config.timeout,
            prompts,
            parser: Arc::new(parser),
        })
    }

    /// Analyzer talking to the OpenAI compatible endpoint in `config`
    pub fn from_config(config: &AiConfig) -> Result<Self> {
        let llm_config = OpenAIConfig::new(config.api_key.clone())
            .with_api_base(config.api_url.clone())
            .with_timeout(config.timeout.as_secs().max(1));
        let provider = OpenAIProvider::with_config(llm_config)
            .map_err(|e| StockError::Config(format!("AI client: {e}")))?;
        Self::new(Arc::new(provider), config)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_request(&self, request: &AiRequest) -> std::result::Result<CompletionRequest, AiError> {
        let render_err = |e: minijinja::Error| AiError::UpstreamError(format!("prompt rendering failed: {e}"));
        let system = self.prompts.system().map_err(render_err)?;
        let user = self.prompts.analysis(request).map_err(render_err)?;

        Ok(CompletionRequest::builder(&self.model)
            .system(system)
            .add_message(Message::user(user))
            .max_tokens(self.max_tokens)
            .temperature(self.temperature)
            .build())
    }
}

#[async_trait]
impl AiAnalyzer for LlmAnalyzer {
    #[instrument(skip(self, request), fields(instrument = %request.instrument, model = %self.model))]
    async fn analyze(&self, request: &AiRequest) -> std::result::Result<AiAnalysis, AiError> {
        let completion = self.build_request(request)?;

        let response = tokio::time::timeout(self.timeout, self.provider.complete(completion))
            .await
            .map_err(|_| AiError::UpstreamTimeout)?
            .inspect_err(|e| warn!("Completion failed: {e}"))?;

        let text = response.message.content;
        if text.trim().is_empty() {
            return Err(AiError::UpstreamError("empty reply".to_string()));
        }
        if let Some(usage) = response.usage {
            debug!(tokens = usage.total(), "Completion finished");
        }
        Ok(self.parser.parse(&text, &response.model))
    }

    #[instrument(skip(self, request), fields(instrument = %request.instrument, model = %self.model))]
    async fn analyze_stream(&self, request: &AiRequest) -> std::result::Result<NarrativeStream, AiError> {
        let completion = self.build_request(request)?;
        let deadline = Instant::now() + self.timeout;

        let chunks = tokio::time::timeout_at(deadline, self.provider.complete_stream(completion))
            .await
            .map_err(|_| AiError::UpstreamTimeout)??;

        Ok(narrative_stream(
            chunks,
            deadline,
            Arc::clone(&self.parser),
            self.model.clone(),
        ))
    }
}

struct StreamState {
    chunks: CompletionStream,
    deadline: Instant,
    parser: Arc<ReplyParser>,
    model: String,
    text: String,
    finished: bool,
}

/// Forward text chunks until the upstream ends, then emit the parsed reply
///
/// The whole stream shares one deadline. Errors end the stream.
fn narrative_stream(chunks: CompletionStream, deadline: Instant, parser: Arc<ReplyParser>, model: String) -> NarrativeStream {
    let state = StreamState {
        chunks,
        deadline,
        parser,
        model,
        text: String::new(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        if state.finished {
            return None;
        }

        loop {
            match tokio::time::timeout_at(state.deadline, state.chunks.next()).await {
                Err(_) => {
                    state.finished = true;
                    return Some((Err(AiError::UpstreamTimeout), state));
                }
                Ok(Some(Err(e))) => {
                    state.finished = true;
                    return Some((Err(AiError::from(e)), state));
                }
                Ok(Some(Ok(delta))) if delta.is_empty() => {}
                Ok(Some(Ok(delta))) => {
                    state.text.push_str(&delta);
                    return Some((Ok(NarrativeChunk::Text(delta)), state));
                }
                Ok(None) => {
                    state.finished = true;
                    if state.text.trim().is_empty() {
                        return Some((Err(AiError::UpstreamError("empty reply".to_string())), state));
                    }
                    let analysis = state.parser.parse(&state.text, &state.model);
                    return Some((Ok(NarrativeChunk::Done(analysis)), state));
                }
            }
        }
    })
    .boxed()
}
