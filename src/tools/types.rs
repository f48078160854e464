//! Core tool types: the [`Tool`] capability, its errors and results.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// Named arguments passed to a tool.
pub type ToolArgs = Map<String, Value>;

/// Why a tool invocation failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ToolError {
    /// The model supplied missing or mistyped arguments.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// A credential the tool needs is not configured.
    #[error("missing credential: {0}")]
    MissingCredential(String),

    /// The upstream service failed or returned something unusable.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// The invocation exceeded its deadline.
    #[error("timed out after {0}s")]
    Timeout(u64),
}

/// The answer to one tool call, sent back to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Id of the originating call.
    pub call_id: String,
    /// Name of the tool the model asked for.
    pub name: String,
    /// Result mapping; `{"error": "..."}` on failure.
    pub payload: Value,
    /// Whether `payload` describes a failure.
    pub is_error: bool,
}

impl ToolResult {
    /// A successful result.
    pub fn success(call_id: impl Into<String>, name: impl Into<String>, payload: Value) -> Self {
        Self {
            call_id: call_id.into(),
            name: name.into(),
            payload,
            is_error: false,
        }
    }

    /// A failed result carrying `{"error": message}`.
    pub fn failure(
        call_id: impl Into<String>,
        name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            name: name.into(),
            payload: json!({ "error": message.into() }),
            is_error: true,
        }
    }

    /// Wrap a tool's output; a top-level `"error"` key marks it as a failure.
    pub fn from_output(
        call_id: impl Into<String>,
        name: impl Into<String>,
        payload: Value,
    ) -> Self {
        let is_error = payload.get("error").is_some();
        Self {
            call_id: call_id.into(),
            name: name.into(),
            payload,
            is_error,
        }
    }

    /// The error text, if this is a failure.
    pub fn error_message(&self) -> Option<&str> {
        if !self.is_error {
            return None;
        }
        self.payload.get("error").and_then(Value::as_str)
    }
}

/// A capability the model can invoke by name.
///
/// Implementations report upstream problems (missing credentials, network
/// errors, no results) either as a structured error payload in `Ok` or as
/// a [`ToolError`]; they must never panic past their own boundary.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name declared to the model.
    fn name(&self) -> &str;

    /// Description shown to the model.
    fn description(&self) -> &str;

    /// JSON Schema of the arguments.
    fn schema(&self) -> Value;

    /// Run the tool.
    async fn invoke(&self, args: ToolArgs) -> Result<Value, ToolError>;
}

/// Fetch a required, non-empty string argument.
pub fn required_str<'a>(args: &'a ToolArgs, key: &str) -> Result<&'a str, ToolError> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ToolError::InvalidArguments(format!("missing required argument: {key}")))
}

/// Fetch an optional string argument; blank strings count as absent.
pub fn optional_str<'a>(args: &'a ToolArgs, key: &str) -> Option<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Truncate to at most `max_chars` characters, appending `...` when cut.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => format!("{}...", &text[..byte_idx]),
        None => text.to_owned(),
    }
}
