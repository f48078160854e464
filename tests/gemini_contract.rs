//! Gemini Provider Contract Tests
//!
//! These tests verify HTTP API format compliance for the Gemini adapter
//! against a mock server:
//! - Request shape (path, `alt=sse`, key header, system instruction, tools)
//! - SSE response parsing into normalized events
//! - HTTP error mapping to `LlmError`

#![allow(clippy::unwrap_used, clippy::expect_used)]

use ada::llm::{
    FinishReason, GeminiAdapter, GeminiConfig, LlmError, LlmEvent, Message, ProviderAdapter,
    RequestOptions, ToolDefinition,
};
use futures_util::StreamExt;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const STREAM_PATH: &str = "/models/gemini-test:streamGenerateContent";

fn adapter(server: &MockServer) -> GeminiAdapter {
    GeminiAdapter::new(GeminiConfig::new("test-key", "gemini-test").with_base_url(server.uri()))
}

fn sse(chunks: &[serde_json::Value]) -> String {
    chunks
        .iter()
        .map(|c| format!("data: {c}\r\n\r\n"))
        .collect()
}

async fn collect(
    adapter: &GeminiAdapter,
    messages: &[Message],
    tools: &[ToolDefinition],
) -> Vec<LlmEvent> {
    let stream = adapter
        .send(messages, &RequestOptions::new(), tools)
        .await
        .expect("request should succeed");
    stream.collect().await
}

fn weather_tool() -> ToolDefinition {
    ToolDefinition::new(
        "get_weather",
        "Get the current weather for a location",
        json!({
            "type": "object",
            "properties": {"location": {"type": "string"}},
            "required": ["location"]
        }),
    )
}

// ────────────────────────────────────────────────────────────────────────────
// Request Format Validation Tests
// ────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_request_targets_streaming_endpoint_with_key() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(STREAM_PATH))
        .and(query_param("alt", "sse"))
        .and(header("x-goog-api-key", "test-key"))
        .and(body_partial_json(json!({
            "systemInstruction": {"parts": [{"text": "You are Ada."}]},
            "contents": [{"role": "user", "parts": [{"text": "Hello"}]}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_string(sse(&[json!({
            "candidates": [{"content": {"parts": [{"text": "Hi"}]}, "finishReason": "STOP"}]
        })])))
        .expect(1)
        .mount(&server)
        .await;

    let messages = vec![Message::system("You are Ada."), Message::user("Hello")];
    let events = collect(&adapter(&server), &messages, &[]).await;
    assert!(!events.is_empty());
}

#[tokio::test]
async fn test_request_declares_tools() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(STREAM_PATH))
        .and(body_partial_json(json!({
            "tools": [{"functionDeclarations": [{"name": "get_weather"}]}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_string(sse(&[json!({
            "candidates": [{"content": {"parts": [{"text": "ok"}]}, "finishReason": "STOP"}]
        })])))
        .expect(1)
        .mount(&server)
        .await;

    collect(&adapter(&server), &[Message::user("Weather?")], &[weather_tool()]).await;
}

// ────────────────────────────────────────────────────────────────────────────
// Streaming Response Tests
// ────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_streamed_text_arrives_in_order() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(STREAM_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-goog-request-id", "req-42")
                .set_body_string(sse(&[
                    json!({"candidates": [{"content": {"parts": [{"text": "It's 68 "}]}}]}),
                    json!({"candidates": [{"content": {"parts": [{"text": "degrees."}]}, "finishReason": "STOP"}]}),
                ])),
        )
        .mount(&server)
        .await;

    let events = collect(&adapter(&server), &[Message::user("Weather?")], &[]).await;
    assert_eq!(
        events,
        vec![
            LlmEvent::StreamStart {
                request_id: "req-42".into(),
                model: "gemini-test".into(),
            },
            LlmEvent::TextDelta {
                text: "It's 68 ".into()
            },
            LlmEvent::TextDelta {
                text: "degrees.".into()
            },
            LlmEvent::StreamEnd {
                finish_reason: FinishReason::Stop
            },
        ]
    );
}

#[tokio::test]
async fn test_function_call_is_emitted_with_arguments() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(STREAM_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string(sse(&[json!({
            "candidates": [{
                "content": {"parts": [{"functionCall": {
                    "id": "fc-1",
                    "name": "get_weather",
                    "args": {"location": "Reno, NV"}
                }}]},
                "finishReason": "STOP"
            }]
        })])))
        .mount(&server)
        .await;

    let events = collect(
        &adapter(&server),
        &[Message::user("Weather in Reno?")],
        &[weather_tool()],
    )
    .await;
    let call = events
        .iter()
        .find_map(|e| match e {
            LlmEvent::ToolCall(call) => Some(call.clone()),
            _ => None,
        })
        .expect("tool call event");
    assert_eq!(call.id, "fc-1");
    assert_eq!(call.name, "get_weather");
    assert_eq!(call.arguments.get("location"), Some(&json!("Reno, NV")));
    assert_eq!(
        events.last(),
        Some(&LlmEvent::StreamEnd {
            finish_reason: FinishReason::ToolCalls
        })
    );
}

#[tokio::test]
async fn test_in_stream_error_becomes_stream_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(STREAM_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string(sse(&[
            json!({"candidates": [{"content": {"parts": [{"text": "Partial"}]}}]}),
            json!({"error": {"code": 500, "message": "backend overloaded"}}),
        ])))
        .mount(&server)
        .await;

    let events = collect(&adapter(&server), &[Message::user("Hi")], &[]).await;
    assert_eq!(
        events.last(),
        Some(&LlmEvent::StreamError {
            error: "backend overloaded".into()
        })
    );
}

#[tokio::test]
async fn test_stream_without_finish_reason_still_ends() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(STREAM_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string(sse(&[json!({
            "candidates": [{"content": {"parts": [{"text": "Cut short"}]}}]
        })])))
        .mount(&server)
        .await;

    let events = collect(&adapter(&server), &[Message::user("Hi")], &[]).await;
    assert!(matches!(events.last(), Some(LlmEvent::StreamEnd { .. })));
}

// ────────────────────────────────────────────────────────────────────────────
// Error Mapping Tests
// ────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_auth_failure_maps_to_auth_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(STREAM_PATH))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "error": {"code": 403, "message": "API key not valid", "status": "PERMISSION_DENIED"}
        })))
        .mount(&server)
        .await;

    let result = adapter(&server)
        .send(&[Message::user("Hi")], &RequestOptions::new(), &[])
        .await;
    let err = result.err().expect("should fail");
    assert!(matches!(err, LlmError::AuthError(_)));
    assert!(err.to_string().contains("API key not valid"));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_rate_limit_is_retryable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(STREAM_PATH))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "error": {"code": 429, "message": "Resource has been exhausted"}
        })))
        .mount(&server)
        .await;

    let err = adapter(&server)
        .send(&[Message::user("Hi")], &RequestOptions::new(), &[])
        .await
        .err()
        .expect("should fail");
    assert!(matches!(err, LlmError::RequestError(_)));
    assert!(err.is_retryable());
}
