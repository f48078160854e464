//! OpenAI-compatible Chat Completions adapter.
//!
//! Talks to any endpoint implementing `POST {base_url}/chat/completions`
//! with `stream: true`, including Gemini's OpenAI compatibility layer.
//! Tool-call argument deltas are assembled per index and emitted as whole
//! [`ToolCall`]s once the model finishes the round.
//!
//! ```rust,no_run
//! use ada::llm::openai::{OpenAiAdapter, OpenAiConfig};
//! use ada::llm::provider::{ProviderAdapter, RequestOptions};
//! use ada::llm::message::Message;
//!
//! # async fn example() -> Result<(), ada::llm::error::LlmError> {
//! let adapter = OpenAiAdapter::new(OpenAiConfig::new("sk-...", "gpt-4o-mini"));
//! let stream = adapter.send(&[Message::user("Hello")], &RequestOptions::new(), &[]).await?;
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;

use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use serde_json::{Value, json};

use super::error::LlmError;
use super::events::{FinishReason, LlmEvent};
use super::message::{ContentPart, Message, Role, ToolCall};
use super::provider::{LlmEventStream, ProviderAdapter, RequestOptions, ToolDefinition};
use super::sse::SseLineParser;

// ── Configuration ─────────────────────────────────────────────

/// Default base URL (includes the API version segment).
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Configuration for [`OpenAiAdapter`].
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// Bearer API key.
    pub api_key: String,
    /// Base URL up to and including the version segment.
    pub base_url: String,
    /// Model name.
    pub model: String,
}

impl OpenAiConfig {
    /// Create a config for the public OpenAI endpoint.
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_OPENAI_BASE_URL.into(),
            model: model.into(),
        }
    }

    /// Point at a different OpenAI-compatible endpoint.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_owned();
        self
    }
}

// ── Request Building ──────────────────────────────────────────

/// Build the JSON body for a streaming Chat Completions request.
pub fn build_completions_request(
    model: &str,
    messages: &[Message],
    options: &RequestOptions,
    tools: &[ToolDefinition],
) -> Value {
    let mut body = json!({
        "model": model,
        "messages": messages.iter().flat_map(message_to_openai).collect::<Vec<_>>(),
        "stream": true,
    });

    if let Some(obj) = body.as_object_mut() {
        if let Some(max_tokens) = options.max_tokens {
            obj.insert("max_tokens".into(), json!(max_tokens));
        }
        if let Some(temp) = options.temperature {
            obj.insert("temperature".into(), json!(temp));
        }
        if !tools.is_empty() {
            let tools_json: Vec<Value> = tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect();
            obj.insert("tools".into(), Value::Array(tools_json));
        }
    }

    body
}

/// Convert one message; a tool-results message expands to one entry per call.
fn message_to_openai(msg: &Message) -> Vec<Value> {
    match msg.role {
        Role::Tool => msg
            .results()
            .map(|r| {
                json!({
                    "role": "tool",
                    "tool_call_id": r.call_id,
                    "content": r.payload.to_string(),
                })
            })
            .collect(),
        Role::User if msg.parts.iter().any(|p| matches!(p, ContentPart::Image { .. })) => {
            let parts: Vec<Value> = msg
                .parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text(text) => Some(json!({"type": "text", "text": text})),
                    ContentPart::Image { mime_type, data } => {
                        let encoded = base64::engine::general_purpose::STANDARD.encode(data);
                        Some(json!({
                            "type": "image_url",
                            "image_url": { "url": format!("data:{mime_type};base64,{encoded}") }
                        }))
                    }
                    ContentPart::ToolResult(_) => None,
                })
                .collect();
            vec![json!({"role": "user", "content": parts})]
        }
        role => {
            let mut obj = json!({
                "role": role.to_string(),
                "content": msg.text(),
            });
            if !msg.tool_calls.is_empty()
                && let Some(map) = obj.as_object_mut()
            {
                let calls: Vec<Value> = msg
                    .tool_calls
                    .iter()
                    .map(|tc| {
                        json!({
                            "id": tc.id,
                            "type": "function",
                            "function": { "name": tc.name, "arguments": tc.arguments_json() }
                        })
                    })
                    .collect();
                map.insert("tool_calls".into(), Value::Array(calls));
            }
            vec![obj]
        }
    }
}

// ── Response Parsing ──────────────────────────────────────────

fn map_finish_reason(reason: &str) -> FinishReason {
    match reason {
        "stop" => FinishReason::Stop,
        "length" => FinishReason::Length,
        "tool_calls" | "function_call" => FinishReason::ToolCalls,
        "content_filter" => FinishReason::ContentFilter,
        _ => FinishReason::Other,
    }
}

#[derive(Debug, Default)]
struct PartialCall {
    id: String,
    name: String,
    arguments: String,
}

/// Assembles streamed tool-call fragments, keyed by their index.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    calls: BTreeMap<u64, PartialCall>,
}

impl ToolCallAccumulator {
    /// Create an empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one streamed fragment.
    pub fn process_chunk(
        &mut self,
        index: u64,
        id: Option<&str>,
        name: Option<&str>,
        args_fragment: Option<&str>,
    ) {
        let call = self.calls.entry(index).or_default();
        if let Some(id) = id.filter(|s| !s.is_empty()) {
            call.id = id.to_owned();
        }
        if let Some(name) = name.filter(|s| !s.is_empty()) {
            call.name = name.to_owned();
        }
        if let Some(args) = args_fragment {
            call.arguments.push_str(args);
        }
    }

    /// Whether any call is still being assembled.
    pub fn has_active_calls(&self) -> bool {
        !self.calls.is_empty()
    }

    /// Emit every assembled call in index order and reset.
    pub fn finish_all(&mut self) -> Vec<LlmEvent> {
        std::mem::take(&mut self.calls)
            .into_iter()
            .map(|(index, call)| {
                let id = if call.id.is_empty() {
                    format!("call_{index}")
                } else {
                    call.id
                };
                LlmEvent::ToolCall(ToolCall::from_json_arguments(id, call.name, &call.arguments))
            })
            .collect()
    }
}

/// Parse one `data:` payload into events. Malformed JSON yields nothing.
pub fn parse_completions_chunk(data: &str, accumulator: &mut ToolCallAccumulator) -> Vec<LlmEvent> {
    let Ok(parsed) = serde_json::from_str::<Value>(data) else {
        return Vec::new();
    };

    let mut events = Vec::new();
    let Some(choices) = parsed.get("choices").and_then(Value::as_array) else {
        return events;
    };

    for choice in choices {
        if let Some(delta) = choice.get("delta") {
            if let Some(content) = delta.get("content").and_then(Value::as_str)
                && !content.is_empty()
            {
                events.push(LlmEvent::TextDelta {
                    text: content.to_owned(),
                });
            }

            if let Some(tool_calls) = delta.get("tool_calls").and_then(Value::as_array) {
                for tc in tool_calls {
                    let index = tc.get("index").and_then(Value::as_u64).unwrap_or(0);
                    let function = tc.get("function");
                    accumulator.process_chunk(
                        index,
                        tc.get("id").and_then(Value::as_str),
                        function.and_then(|f| f.get("name")).and_then(Value::as_str),
                        function.and_then(|f| f.get("arguments")).and_then(Value::as_str),
                    );
                }
            }
        }

        if let Some(reason) = choice.get("finish_reason").and_then(Value::as_str) {
            events.extend(accumulator.finish_all());
            events.push(LlmEvent::StreamEnd {
                finish_reason: map_finish_reason(reason),
            });
        }
    }

    events
}

/// Pull `error.message` out of an error body, falling back to the raw body.
pub(crate) fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(Value::as_str)
                .map(String::from)
        })
        .unwrap_or_else(|| body.to_owned())
}

pub(crate) fn map_http_error(status: reqwest::StatusCode, body: &str) -> LlmError {
    let message = extract_error_message(body);
    match status.as_u16() {
        401 | 403 => LlmError::AuthError(format!("authentication failed: {message}")),
        429 => LlmError::RequestError(format!("rate limited: {message}")),
        code => LlmError::ProviderError(format!("HTTP {code}: {message}")),
    }
}

// ── Adapter ───────────────────────────────────────────────────

/// OpenAI-compatible streaming adapter.
pub struct OpenAiAdapter {
    config: OpenAiConfig,
    client: reqwest::Client,
}

impl std::fmt::Debug for OpenAiAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiAdapter")
            .field("model", &self.config.model)
            .field("base_url", &self.config.base_url)
            .finish()
    }
}

impl OpenAiAdapter {
    /// Create an adapter with its own HTTP client.
    pub fn new(config: OpenAiConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    fn name(&self) -> &str {
        "openai"
    }

    async fn send(
        &self,
        messages: &[Message],
        options: &RequestOptions,
        tools: &[ToolDefinition],
    ) -> Result<LlmEventStream, LlmError> {
        let url = format!("{}/chat/completions", self.config.base_url);
        let body = build_completions_request(&self.config.model, messages, options, tools);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::RequestError(format!("request to {url} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(map_http_error(status, &body_text));
        }

        let request_id = response
            .headers()
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .map(String::from)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        Ok(Box::pin(create_event_stream(
            response.bytes_stream(),
            request_id,
            self.config.model.clone(),
        )))
    }
}

struct StreamState<S> {
    byte_stream: std::pin::Pin<Box<S>>,
    parser: SseLineParser,
    accumulator: ToolCallAccumulator,
    request_id: String,
    model: String,
    started: bool,
    finished: bool,
    buffer: std::collections::VecDeque<LlmEvent>,
}

impl<S> StreamState<S> {
    fn absorb(&mut self, data: &str) {
        let events = parse_completions_chunk(data, &mut self.accumulator);
        if events.iter().any(|e| matches!(e, LlmEvent::StreamEnd { .. })) {
            self.finished = true;
        }
        self.buffer.extend(events);
    }
}

fn create_event_stream<S>(
    byte_stream: S,
    request_id: String,
    model: String,
) -> impl Stream<Item = LlmEvent> + Send
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
{
    let state = StreamState {
        byte_stream: Box::pin(byte_stream),
        parser: SseLineParser::new(),
        accumulator: ToolCallAccumulator::new(),
        request_id,
        model,
        started: false,
        finished: false,
        buffer: std::collections::VecDeque::new(),
    };

    futures_util::stream::unfold(Some(state), |state| async move {
        let Some(mut state) = state else {
            return None;
        };
        loop {
            if let Some(event) = state.buffer.pop_front() {
                return Some((event, Some(state)));
            }

            if !state.started {
                state.started = true;
                let start = LlmEvent::StreamStart {
                    request_id: state.request_id.clone(),
                    model: state.model.clone(),
                };
                return Some((start, Some(state)));
            }

            match state.byte_stream.next().await {
                Some(Ok(chunk)) => {
                    for event in state.parser.push(&chunk) {
                        if !event.is_done() {
                            state.absorb(&event.data);
                        }
                    }
                }
                Some(Err(e)) => {
                    let err = LlmEvent::StreamError {
                        error: format!("stream read error: {e}"),
                    };
                    return Some((err, None));
                }
                None => {
                    if let Some(event) = state.parser.flush()
                        && !event.is_done()
                    {
                        state.absorb(&event.data);
                    }
                    if !state.finished {
                        state.finished = true;
                        let pending = state.accumulator.finish_all();
                        state.buffer.extend(pending);
                        state.buffer.push_back(LlmEvent::StreamEnd {
                            finish_reason: FinishReason::Other,
                        });
                    }
                    if state.buffer.is_empty() {
                        return None;
                    }
                }
            }
        }
    })
}
