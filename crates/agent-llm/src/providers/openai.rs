//! OpenAI-compatible provider implementation
//!
//! Talks to any server exposing the `chat/completions` endpoint, including
//! local deployments and hosted gateways. Both the blocking and the
//! server-sent-events (SSE) streaming forms are supported.
//!
//! # Example
//!
//! ```no_run
//! use agent_llm::{CompletionRequest, LLMProvider, Message};
//! use agent_llm::providers::{OpenAIConfig, OpenAIProvider};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = OpenAIConfig::new("sk-...")
//!         .with_api_base("https://api.openai.com/")
//!         .with_timeout(60);
//!     let provider = OpenAIProvider::with_config(config)?;
//!
//!     let request = CompletionRequest::builder("gpt-3.5-turbo")
//!         .add_message(Message::user("Hello!"))
//!         .build();
//!
//!     let response = provider.complete(request).await?;
//!     println!("{}", response.message.text());
//!     Ok(())
//! }
//! ```

use crate::{
    CompletionRequest, CompletionResponse, CompletionStream, LLMError, LLMProvider, Message,
    Result, Role, StopReason, TokenUsage,
};
use async_trait::async_trait;
use eventsource_stream::{EventStream, EventStreamError, Eventsource};
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument, warn};

const DEFAULT_API_BASE: &str = "https://api.openai.com";
const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Resolve the chat completions endpoint from a configured base URL
///
/// - a base ending in `#` is used verbatim, without the `#`
/// - a base ending in `/` gets `chat/completions` appended
/// - anything else gets `/v1/chat/completions` appended
pub fn chat_completions_url(base: &str) -> String {
    if let Some(exact) = base.strip_suffix('#') {
        exact.to_string()
    } else if base.ends_with('/') {
        format!("{base}chat/completions")
    } else {
        format!("{base}/v1/chat/completions")
    }
}

/// Configuration for the OpenAI-compatible provider
#[derive(Debug, Clone)]
pub struct OpenAIConfig {
    /// API key sent as a bearer token
    pub api_key: String,

    /// Base URL, resolved with [`chat_completions_url`]
    pub api_base: String,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl OpenAIConfig {
    /// Create a new config with the given API key and default settings
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            ..Self::default()
        }
    }

    /// Create config from `API_KEY`, `API_URL` and `API_TIMEOUT`
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("API_KEY").map_err(|_| {
            LLMError::ConfigurationError("API_KEY environment variable not set".to_string())
        })?;
        let api_base = std::env::var("API_URL").unwrap_or_else(|_| DEFAULT_API_BASE.to_string());
        let timeout_secs = match std::env::var("API_TIMEOUT") {
            Ok(raw) => raw.trim().parse().map_err(|_| {
                LLMError::ConfigurationError(format!("API_TIMEOUT is not a number: {raw}"))
            })?,
            Err(_) => DEFAULT_TIMEOUT_SECS,
        };

        Ok(Self {
            api_key,
            api_base,
            timeout_secs,
        })
    }

    /// Set custom API base URL
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    /// Set request timeout in seconds
    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// Fully resolved endpoint URL
    pub fn endpoint(&self) -> String {
        chat_completions_url(&self.api_base)
    }
}

impl Default for OpenAIConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base: DEFAULT_API_BASE.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

/// OpenAI-compatible chat completion provider
pub struct OpenAIProvider {
    client: Client,
    config: OpenAIConfig,
}

impl OpenAIProvider {
    /// Create a new provider with custom configuration
    pub fn with_config(config: OpenAIConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { client, config })
    }

    /// Create a new provider with API key and default settings
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Self::with_config(OpenAIConfig::new(api_key))
    }

    /// Create a provider from the environment
    pub fn from_env() -> Result<Self> {
        Self::with_config(OpenAIConfig::from_env()?)
    }

    /// Get the current configuration
    pub fn config(&self) -> &OpenAIConfig {
        &self.config
    }

    async fn send(&self, request: &CompletionRequest, stream: bool) -> Result<Response> {
        let body = OpenAIRequest {
            model: &request.model,
            messages: build_openai_messages(request.system.as_deref(), &request.messages),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            stream,
        };

        let response = self
            .client
            .post(self.config.endpoint())
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let error_text = response.text().await.unwrap_or_default();
        Err(match status.as_u16() {
            401 | 403 => LLMError::AuthenticationFailed,
            429 => LLMError::RateLimitExceeded(error_text),
            400 => LLMError::InvalidRequest(error_text),
            404 => LLMError::ModelNotFound(request.model.clone()),
            408 | 504 => LLMError::Timeout(self.config.timeout_secs),
            _ => LLMError::RequestFailed(format!("HTTP {status}: {error_text}")),
        })
    }

    fn transport_error(&self, e: reqwest::Error) -> LLMError {
        if e.is_timeout() {
            LLMError::Timeout(self.config.timeout_secs)
        } else {
            LLMError::HttpError(e)
        }
    }
}

#[async_trait]
impl LLMProvider for OpenAIProvider {
    #[instrument(skip(self, request), fields(model = %request.model))]
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        debug!("Sending completion request to {}", self.config.endpoint());

        let response = self.send(&request, false).await?;
        let parsed: OpenAIResponse = response
            .json()
            .await
            .map_err(|e| LLMError::UnexpectedResponse(format!("Failed to parse response: {e}")))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LLMError::UnexpectedResponse("No choices in response".to_string()))?;

        let usage = parsed.usage.map(|u| TokenUsage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
        });
        debug!(?usage, finish_reason = ?choice.finish_reason, "Received completion");

        Ok(CompletionResponse {
            message: Message::assistant(choice.message.content.unwrap_or_default()),
            model: parsed.model.unwrap_or(request.model),
            stop_reason: StopReason::from_finish_reason(choice.finish_reason.as_deref()),
            usage,
        })
    }

    #[instrument(skip(self, request), fields(model = %request.model))]
    async fn complete_stream(&self, request: CompletionRequest) -> Result<CompletionStream> {
        debug!("Opening completion stream to {}", self.config.endpoint());

        let response = self.send(&request, true).await?;
        let timeout_secs = self.config.timeout_secs;
        let body = response
            .bytes_stream()
            .map(move |chunk| {
                chunk.map(|b| b.to_vec()).map_err(|e| {
                    if e.is_timeout() {
                        LLMError::Timeout(timeout_secs)
                    } else {
                        LLMError::HttpError(e)
                    }
                })
            })
            .boxed();

        Ok(sse_deltas(body))
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

// ============================================================================
// Server-sent events
// ============================================================================

/// What one decoded event contributes to the reply
#[derive(Debug, PartialEq, Eq)]
enum ChunkEvent {
    Chunk {
        text: Option<String>,
        finish_reason: Option<String>,
    },
    Done,
}

fn parse_chunk(data: &str) -> Result<ChunkEvent> {
    let data = data.trim();
    if data == "[DONE]" {
        return Ok(ChunkEvent::Done);
    }

    let chunk: StreamChunk = serde_json::from_str(data)
        .map_err(|e| LLMError::UnexpectedResponse(format!("Malformed stream chunk: {e}")))?;
    Ok(match chunk.choices.into_iter().next() {
        Some(choice) => ChunkEvent::Chunk {
            text: choice.delta.content.filter(|text| !text.is_empty()),
            finish_reason: choice.finish_reason,
        },
        None => ChunkEvent::Chunk {
            text: None,
            finish_reason: None,
        },
    })
}

fn stream_error(err: EventStreamError<LLMError>) -> LLMError {
    match err {
        EventStreamError::Transport(e) => e,
        EventStreamError::Utf8(e) => LLMError::UnexpectedResponse(format!("Invalid UTF-8 in stream: {e}")),
        EventStreamError::Parser(e) => LLMError::UnexpectedResponse(format!("Invalid event stream: {e}")),
    }
}

struct SseState {
    events: EventStream<BoxStream<'static, Result<Vec<u8>>>>,
    finish_reason: Option<String>,
    finished: bool,
}

/// Turn an SSE byte stream into text deltas
///
/// The reply ends at `[DONE]`, or at the end of the body once a choice has
/// reported a finish reason. A body that stops before either, a malformed
/// chunk or a transport error yields one error and ends the stream.
fn sse_deltas(body: BoxStream<'static, Result<Vec<u8>>>) -> CompletionStream {
    let state = SseState {
        events: body.eventsource(),
        finish_reason: None,
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        if state.finished {
            return None;
        }

        loop {
            let event = match state.events.next().await {
                Some(Ok(event)) => event,
                Some(Err(e)) => {
                    state.finished = true;
                    return Some((Err(stream_error(e)), state));
                }
                None => {
                    state.finished = true;
                    if state.finish_reason.is_some() {
                        return None;
                    }
                    let err = LLMError::UnexpectedResponse("stream ended before [DONE]".to_string());
                    return Some((Err(err), state));
                }
            };
            if event.data.trim().is_empty() {
                continue;
            }

            match parse_chunk(&event.data) {
                Ok(ChunkEvent::Chunk { text, finish_reason }) => {
                    if finish_reason.is_some() {
                        debug!(?finish_reason, "Stream finished");
                        state.finish_reason = finish_reason;
                    }
                    if let Some(text) = text {
                        return Some((Ok(text), state));
                    }
                }
                Ok(ChunkEvent::Done) => return None,
                Err(e) => {
                    warn!("{e}");
                    state.finished = true;
                    return Some((Err(e), state));
                }
            }
        }
    })
    .boxed()
}

// ============================================================================
// OpenAI-specific wire types
// ============================================================================

#[derive(Debug, Serialize)]
struct OpenAIRequest<'a> {
    model: &'a str,
    messages: Vec<OpenAIMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
struct OpenAIMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<OpenAIChoice>,
    #[serde(default)]
    usage: Option<OpenAIUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIUsage {
    prompt_tokens: usize,
    completion_tokens: usize,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

fn role_name(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::System => "system",
    }
}

fn build_openai_messages<'a>(
    system: Option<&'a str>,
    messages: &'a [Message],
) -> Vec<OpenAIMessage<'a>> {
    system
        .map(|content| OpenAIMessage {
            role: "system",
            content,
        })
        .into_iter()
        .chain(messages.iter().map(|m| OpenAIMessage {
            role: role_name(m.role),
            content: &m.content,
        }))
        .collect()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider_for(server: &MockServer) -> OpenAIProvider {
        let config = OpenAIConfig::new("test-key")
            .with_api_base(server.uri())
            .with_timeout(5);
        OpenAIProvider::with_config(config).unwrap()
    }

    fn request() -> CompletionRequest {
        CompletionRequest::builder("gpt-3.5-turbo")
            .system("You are a stock analyst")
            .add_message(Message::user("Analyze 600519"))
            .temperature(0.7)
            .build()
    }

    #[test]
    fn test_chat_completions_url_rules() {
        assert_eq!(
            chat_completions_url("https://api.example.com/"),
            "https://api.example.com/chat/completions"
        );
        assert_eq!(
            chat_completions_url("https://api.example.com/v2/chat#"),
            "https://api.example.com/v2/chat"
        );
        assert_eq!(
            chat_completions_url("https://api.example.com"),
            "https://api.example.com/v1/chat/completions"
        );
    }

    #[test]
    fn test_config_builder() {
        let config = OpenAIConfig::new("sk-test")
            .with_api_base("http://localhost:8000/")
            .with_timeout(30);
        assert_eq!(config.api_key, "sk-test");
        assert_eq!(config.timeout_secs, 30);
        assert_eq!(config.endpoint(), "http://localhost:8000/chat/completions");
    }

    #[test]
    fn test_system_message_goes_first() {
        let messages = vec![Message::user("hi")];
        let built = build_openai_messages(Some("sys"), &messages);
        assert_eq!(
            built,
            vec![
                OpenAIMessage { role: "system", content: "sys" },
                OpenAIMessage { role: "user", content: "hi" },
            ]
        );
        assert_eq!(build_openai_messages(None, &messages).len(), 1);
    }

    #[test]
    fn test_parse_chunk() {
        assert_eq!(
            parse_chunk(r#"{"choices":[{"delta":{"content":"Hi"}}]}"#).unwrap(),
            ChunkEvent::Chunk {
                text: Some("Hi".to_string()),
                finish_reason: None
            }
        );
        assert_eq!(parse_chunk(" [DONE]").unwrap(), ChunkEvent::Done);
        assert_eq!(
            parse_chunk(r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#).unwrap(),
            ChunkEvent::Chunk {
                text: None,
                finish_reason: Some("stop".to_string())
            }
        );
        assert!(matches!(parse_chunk("{not json"), Err(LLMError::UnexpectedResponse(_))));
    }

    async fn collect(text: &'static str) -> Vec<Result<String>> {
        let chunks: Vec<Result<Vec<u8>>> = vec![Ok(text.as_bytes().to_vec())];
        sse_deltas(stream::iter(chunks).boxed()).collect().await
    }

    #[tokio::test]
    async fn test_sse_joins_multiline_data_into_one_event() {
        // two data lines form one event, which is not valid JSON
        let items = collect(
            "data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\r\ndata: {bad\r\n\r\n",
        )
        .await;
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(LLMError::UnexpectedResponse(_))), "{items:?}");
    }

    #[tokio::test]
    async fn test_sse_crlf_framing() {
        let items = collect(concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\r\n\r\n",
            ": keep-alive\r\n\r\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"b\"}}]}\r\n\r\n",
            "data: [DONE]\r\n\r\n",
        ))
        .await;
        let text: Vec<String> = items.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(text, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn test_sse_truncated_body_is_error() {
        let items = collect("data: {\"choices\":[{\"delta\":{\"content\":\"TREND\"}}]}\n\ndata: {\"choi").await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_deref().unwrap(), "TREND");
        assert!(matches!(items[1], Err(LLMError::UnexpectedResponse(_))), "{items:?}");
    }

    #[tokio::test]
    async fn test_sse_finish_reason_ends_without_done() {
        let items = collect(concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"up\"},\"finish_reason\":null}]}\n\n",
            "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
        ))
        .await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].as_deref().unwrap(), "up");
    }

    #[tokio::test]
    async fn test_sse_transport_error_ends_stream() {
        let chunks: Vec<Result<Vec<u8>>> = vec![
            Ok(b"data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n\n".to_vec()),
            Err(LLMError::Timeout(5)),
            Ok(b"data: {\"choices\":[{\"delta\":{\"content\":\"b\"}}]}\n\n".to_vec()),
        ];
        let items: Vec<Result<String>> = sse_deltas(stream::iter(chunks).boxed()).collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_deref().unwrap(), "a");
        assert!(items[1].as_ref().is_err_and(LLMError::is_timeout));
    }

    #[tokio::test]
    async fn test_sse_reassembles_split_chunks() {
        let text = "data: {\"choices\":[{\"delta\":{\"content\":\"上涨\"}}]}\n\ndata: [DONE]\n\n";
        let bytes = text.as_bytes();
        // split inside the multi-byte character
        let split = text.find('上').unwrap() + 1;
        let chunks: Vec<Result<Vec<u8>>> =
            vec![Ok(bytes[..split].to_vec()), Ok(bytes[split..].to_vec())];

        let deltas: Vec<String> = sse_deltas(stream::iter(chunks).boxed())
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(deltas, vec!["上涨".to_string()]);
    }

    #[tokio::test]
    async fn test_complete_against_mock_server() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .and(body_partial_json(json!({"model": "gpt-3.5-turbo", "stream": false})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "model": "gpt-3.5-turbo-0125",
                "choices": [{
                    "message": {"role": "assistant", "content": "TREND: up"},
                    "finish_reason": "stop"
                }],
                "usage": {"prompt_tokens": 12, "completion_tokens": 3}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let response = provider_for(&server).complete(request()).await.unwrap();
        assert_eq!(response.message.text(), "TREND: up");
        assert_eq!(response.model, "gpt-3.5-turbo-0125");
        assert_eq!(response.stop_reason, StopReason::EndTurn);
        assert_eq!(response.usage.map(|u| u.total()), Some(15));
    }

    #[tokio::test]
    async fn test_complete_maps_rate_limit() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&server)
            .await;

        let err = provider_for(&server).complete(request()).await.unwrap_err();
        assert!(err.is_rate_limited(), "unexpected error: {err}");
    }

    #[tokio::test]
    async fn test_complete_rejects_empty_choices() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
            .mount(&server)
            .await;

        let err = provider_for(&server).complete(request()).await.unwrap_err();
        assert!(matches!(err, LLMError::UnexpectedResponse(_)));
    }

    #[tokio::test]
    async fn test_complete_stream_against_mock_server() {
        let server = MockServer::start().await;
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"TREND: \"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"up\"}}]}\n\n",
            "data: [DONE]\n\n",
        );
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"stream": true})))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&server)
            .await;

        let stream = provider_for(&server).complete_stream(request()).await.unwrap();
        let text: String = stream.map(|r| r.unwrap()).collect::<Vec<_>>().await.concat();
        assert_eq!(text, "TREND: up");
    }

    async fn open_stream_error(server: &MockServer) -> LLMError {
        match provider_for(server).complete_stream(request()).await {
            Ok(_) => panic!("expected the stream to be refused"),
            Err(e) => e,
        }
    }

    #[tokio::test]
    async fn test_complete_stream_maps_rate_limit() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"stream": true})))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&server)
            .await;

        let err = open_stream_error(&server).await;
        assert!(err.is_rate_limited(), "unexpected error: {err}");
    }

    #[tokio::test]
    async fn test_complete_stream_maps_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let err = open_stream_error(&server).await;
        assert!(matches!(err, LLMError::RequestFailed(ref msg) if msg.contains("503")), "{err}");
    }

    #[tokio::test]
    async fn test_complete_stream_truncated_body() {
        let server = MockServer::start().await;
        let body = "data: {\"choices\":[{\"delta\":{\"content\":\"TREND: \"}}]}\n\n";
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&server)
            .await;

        let stream = provider_for(&server).complete_stream(request()).await.unwrap();
        let items: Vec<Result<String>> = stream.collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_deref().unwrap(), "TREND: ");
        assert!(matches!(items[1], Err(LLMError::UnexpectedResponse(_))));
    }
}
