//! Provider adapter trait for dialogue-model backends.
//!
//! Adapters normalize a provider's streaming API into [`LlmEvent`]s so the
//! orchestrator never sees wire formats.

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;
use serde::{Deserialize, Serialize};

use super::error::LlmError;
use super::events::LlmEvent;
use super::message::Message;

/// A tool declaration offered to the model for function calling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name (e.g. `"get_weather"`).
    pub name: String,
    /// What the tool does, as shown to the model.
    pub description: String,
    /// JSON Schema of the tool's arguments.
    pub parameters: serde_json::Value,
}

impl ToolDefinition {
    /// Create a new tool definition.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// Per-request generation options.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestOptions {
    /// Maximum tokens to generate. `None` means provider default.
    pub max_tokens: Option<usize>,
    /// Sampling temperature.
    pub temperature: Option<f64>,
    /// Let the provider run code server-side (Gemini only).
    pub code_execution: bool,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            max_tokens: Some(1024),
            temperature: Some(0.7),
            code_execution: false,
        }
    }
}

impl RequestOptions {
    /// Create request options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of tokens to generate.
    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Set the sampling temperature.
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Enable server-side code execution.
    pub fn with_code_execution(mut self, enabled: bool) -> Self {
        self.code_execution = enabled;
        self
    }
}

/// A boxed stream of normalized events.
pub type LlmEventStream = Pin<Box<dyn Stream<Item = LlmEvent> + Send>>;

/// A streaming dialogue-model backend.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Provider name for logs (e.g. `"gemini"`).
    fn name(&self) -> &str;

    /// Submit the full conversation and open a response stream.
    ///
    /// Errors here are request-level (connection, auth, HTTP status);
    /// failures after the stream opens arrive as [`LlmEvent::StreamError`].
    async fn send(
        &self,
        messages: &[Message],
        options: &RequestOptions,
        tools: &[ToolDefinition],
    ) -> Result<LlmEventStream, LlmError>;
}
