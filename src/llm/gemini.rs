//! Google Gemini `streamGenerateContent` adapter.
//!
//! Requests go to `POST {base_url}/models/{model}:streamGenerateContent?alt=sse`
//! with the key in the `x-goog-api-key` header. Each SSE event carries a
//! full `GenerateContentResponse` chunk whose `candidates[0].content.parts`
//! hold text, function calls, or server-side code execution output.
//!
//! Gemini reports `finishReason: "STOP"` even when a round ends in function
//! calls; the adapter turns that into [`FinishReason::ToolCalls`] so callers
//! can rely on one signal regardless of provider.

use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use serde_json::{Map, Value, json};
use tracing::debug;

use super::error::LlmError;
use super::events::{FinishReason, LlmEvent};
use super::message::{ContentPart, Message, Role, ToolCall};
use super::openai::map_http_error;
use super::provider::{LlmEventStream, ProviderAdapter, RequestOptions, ToolDefinition};
use super::sse::SseLineParser;
use crate::config::DEFAULT_GEMINI_BASE_URL;

/// Connection settings for the Gemini API.
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    /// API key.
    pub api_key: String,
    /// REST base URL, without trailing slash.
    pub base_url: String,
    /// Model identifier (e.g. `gemini-1.5-flash-latest`).
    pub model: String,
}

impl GeminiConfig {
    /// Settings for the public endpoint.
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_GEMINI_BASE_URL.to_owned(),
            model: model.into(),
        }
    }

    /// Override the base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_owned();
        self
    }
}

// ── Request encoding ──────────────────────────────────────────

/// Build the `generateContent` request body.
pub fn build_generate_request(
    messages: &[Message],
    options: &RequestOptions,
    tools: &[ToolDefinition],
) -> Value {
    let system: Vec<String> = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(Message::text)
        .filter(|t| !t.is_empty())
        .collect();

    let contents: Vec<Value> = messages
        .iter()
        .filter(|m| m.role != Role::System)
        .filter_map(message_to_content)
        .collect();

    let mut body = json!({ "contents": contents });
    if !system.is_empty() {
        body["systemInstruction"] = json!({ "parts": [{ "text": system.join("\n\n") }] });
    }

    let mut tool_entries = Vec::new();
    if !tools.is_empty() {
        let declarations: Vec<Value> = tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.parameters,
                })
            })
            .collect();
        tool_entries.push(json!({ "functionDeclarations": declarations }));
    }
    if options.code_execution {
        tool_entries.push(json!({ "codeExecution": {} }));
    }
    if !tool_entries.is_empty() {
        body["tools"] = Value::Array(tool_entries);
    }

    let mut generation = Map::new();
    if let Some(t) = options.temperature {
        generation.insert("temperature".into(), json!(t));
    }
    if let Some(max) = options.max_tokens {
        generation.insert("maxOutputTokens".into(), json!(max));
    }
    if !generation.is_empty() {
        body["generationConfig"] = Value::Object(generation);
    }
    body
}

fn message_to_content(msg: &Message) -> Option<Value> {
    let role = match msg.role {
        Role::Assistant => "model",
        // Function responses travel in a user turn.
        Role::User | Role::Tool => "user",
        Role::System => return None,
    };

    let mut parts: Vec<Value> = Vec::new();
    for part in &msg.parts {
        match part {
            ContentPart::Text(text) if !text.is_empty() => parts.push(json!({ "text": text })),
            ContentPart::Text(_) => {}
            ContentPart::Image { mime_type, data } => parts.push(json!({
                "inlineData": {
                    "mimeType": mime_type,
                    "data": base64::engine::general_purpose::STANDARD.encode(data),
                }
            })),
            ContentPart::ToolResult(result) => {
                let response = match &result.payload {
                    Value::Object(_) => result.payload.clone(),
                    other => json!({ "result": other }),
                };
                parts.push(json!({
                    "functionResponse": { "name": result.name, "response": response }
                }));
            }
        }
    }
    for call in &msg.tool_calls {
        parts.push(json!({
            "functionCall": { "name": call.name, "args": call.arguments }
        }));
    }

    if parts.is_empty() {
        return None;
    }
    Some(json!({ "role": role, "parts": parts }))
}

// ── Response decoding ─────────────────────────────────────────

fn map_finish_reason(reason: &str, saw_tool_call: bool) -> FinishReason {
    match reason {
        "STOP" if saw_tool_call => FinishReason::ToolCalls,
        "STOP" => FinishReason::Stop,
        "MAX_TOKENS" => FinishReason::Length,
        "SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT" | "SPII" => {
            FinishReason::ContentFilter
        }
        _ => FinishReason::Other,
    }
}

/// Per-stream decoding state.
#[derive(Debug, Default)]
pub struct ChunkDecoder {
    saw_tool_call: bool,
    finished: bool,
}

impl ChunkDecoder {
    /// Create a decoder for one response stream.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a `StreamEnd` has been produced.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Decode one SSE `data` payload.
    pub fn decode(&mut self, data: &str) -> Vec<LlmEvent> {
        if self.finished {
            return Vec::new();
        }
        let chunk: Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => {
                debug!("skipping undecodable Gemini chunk: {e}");
                return Vec::new();
            }
        };

        if let Some(error) = chunk.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown provider error");
            self.finished = true;
            return vec![LlmEvent::StreamError {
                error: message.to_owned(),
            }];
        }

        let mut events = Vec::new();
        let Some(candidate) = chunk
            .get("candidates")
            .and_then(Value::as_array)
            .and_then(|c| c.first())
        else {
            if chunk.pointer("/promptFeedback/blockReason").is_some() {
                self.finished = true;
                events.push(LlmEvent::StreamEnd {
                    finish_reason: FinishReason::ContentFilter,
                });
            }
            return events;
        };

        let parts = candidate
            .pointer("/content/parts")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        for part in parts {
            self.decode_part(part, &mut events);
        }

        if let Some(reason) = candidate.get("finishReason").and_then(Value::as_str) {
            self.finished = true;
            events.push(LlmEvent::StreamEnd {
                finish_reason: map_finish_reason(reason, self.saw_tool_call),
            });
        }
        events
    }

    fn decode_part(&mut self, part: &Value, events: &mut Vec<LlmEvent>) {
        if part.get("thought").and_then(Value::as_bool) == Some(true) {
            return;
        }
        if let Some(text) = part.get("text").and_then(Value::as_str) {
            if !text.is_empty() {
                events.push(LlmEvent::TextDelta {
                    text: text.to_owned(),
                });
            }
        } else if let Some(call) = part.get("functionCall") {
            let name = call.get("name").and_then(Value::as_str).unwrap_or_default();
            let id = call
                .get("id")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple()));
            let args = call.get("args").cloned().unwrap_or(Value::Null);
            self.saw_tool_call = true;
            events.push(LlmEvent::ToolCall(ToolCall::new(id, name, args)));
        } else if let Some(code) = part.get("executableCode") {
            events.push(LlmEvent::ExecutableCode {
                language: str_field(code, "language"),
                code: str_field(code, "code"),
            });
        } else if let Some(result) = part.get("codeExecutionResult") {
            events.push(LlmEvent::CodeExecutionResult {
                outcome: str_field(result, "outcome"),
                output: str_field(result, "output"),
            });
        }
    }

    /// Close the stream if the provider never sent a finish reason.
    pub fn finish(&mut self) -> Option<LlmEvent> {
        if self.finished {
            return None;
        }
        self.finished = true;
        let finish_reason = if self.saw_tool_call {
            FinishReason::ToolCalls
        } else {
            FinishReason::Other
        };
        Some(LlmEvent::StreamEnd { finish_reason })
    }
}

fn str_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned()
}

fn create_event_stream<S>(
    byte_stream: S,
    request_id: String,
    model: String,
) -> impl Stream<Item = LlmEvent> + Send
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
{
    async_stream::stream! {
        yield LlmEvent::StreamStart { request_id, model };

        let mut byte_stream = Box::pin(byte_stream);
        let mut parser = SseLineParser::new();
        let mut decoder = ChunkDecoder::new();

        while let Some(chunk) = byte_stream.next().await {
            let bytes = match chunk {
                Ok(bytes) => bytes,
                Err(e) => {
                    yield LlmEvent::StreamError { error: format!("stream read error: {e}") };
                    return;
                }
            };
            for event in parser.push(&bytes) {
                for decoded in decoder.decode(&event.data) {
                    yield decoded;
                }
            }
            if decoder.is_finished() {
                return;
            }
        }

        if let Some(event) = parser.flush() {
            for decoded in decoder.decode(&event.data) {
                yield decoded;
            }
        }
        if let Some(end) = decoder.finish() {
            yield end;
        }
    }
}

// ── Adapter ───────────────────────────────────────────────────

/// Streaming Gemini adapter.
pub struct GeminiAdapter {
    config: GeminiConfig,
    client: reqwest::Client,
}

impl std::fmt::Debug for GeminiAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiAdapter")
            .field("model", &self.config.model)
            .field("base_url", &self.config.base_url)
            .finish()
    }
}

impl GeminiAdapter {
    /// Create an adapter with its own HTTP client.
    pub fn new(config: GeminiConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ProviderAdapter for GeminiAdapter {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn send(
        &self,
        messages: &[Message],
        options: &RequestOptions,
        tools: &[ToolDefinition],
    ) -> Result<LlmEventStream, LlmError> {
        let url = format!(
            "{}/models/{}:streamGenerateContent",
            self.config.base_url, self.config.model
        );
        let body = build_generate_request(messages, options, tools);

        let response = self
            .client
            .post(&url)
            .query(&[("alt", "sse")])
            .header("x-goog-api-key", &self.config.api_key)
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
            .get("x-goog-request-id")
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
