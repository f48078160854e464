//! Dialogue-model transport.
//!
//! Providers normalize their streaming output to [`LlmEvent`]s, so the
//! orchestrator works the same against Gemini or any OpenAI-compatible
//! endpoint.
//!
//! # Submodules
//!
//! - [`error`]: [`LlmError`] with stable error codes
//! - [`events`]: normalized streaming event model
//! - [`message`]: conversation messages and tool calls
//! - [`provider`]: the [`ProviderAdapter`] trait
//! - [`sse`]: incremental Server-Sent Events decoding
//! - [`gemini`], [`openai`]: provider implementations
//! - [`session`]: persistent chat session with history

pub mod error;
pub mod events;
pub mod gemini;
pub mod message;
pub mod openai;
pub mod provider;
pub mod session;
pub mod sse;

use std::sync::Arc;

use tracing::info;

use crate::config::{LlmConfig, LlmProvider};

pub use error::LlmError;
pub use events::{FinishReason, LlmEvent};
pub use gemini::{GeminiAdapter, GeminiConfig};
pub use message::{ContentPart, Message, Role, ToolCall};
pub use openai::{OpenAiAdapter, OpenAiConfig};
pub use provider::{LlmEventStream, ProviderAdapter, RequestOptions, ToolDefinition};
pub use session::{ChatSession, Checkpoint};

/// Build the configured provider.
///
/// # Errors
///
/// Returns [`LlmError::ConfigError`] when no API key is configured.
pub fn build_provider(config: &LlmConfig) -> Result<Arc<dyn ProviderAdapter>, LlmError> {
    let api_key = config
        .api_key
        .clone()
        .filter(|k| !k.trim().is_empty())
        .ok_or_else(|| LlmError::ConfigError("no API key configured (GOOGLE_API_KEY)".into()))?;
    let base_url = config.effective_base_url();
    info!(provider = ?config.provider, model = %config.model, base_url, "dialogue model");

    let provider: Arc<dyn ProviderAdapter> = match config.provider {
        LlmProvider::Gemini => Arc::new(GeminiAdapter::new(
            GeminiConfig::new(api_key, &config.model).with_base_url(base_url),
        )),
        LlmProvider::OpenAi => Arc::new(OpenAiAdapter::new(
            OpenAiConfig::new(api_key, &config.model).with_base_url(base_url),
        )),
    };
    Ok(provider)
}

/// Request options derived from configuration.
pub fn request_options(config: &LlmConfig) -> RequestOptions {
    RequestOptions::new()
        .with_max_tokens(config.max_tokens)
        .with_temperature(config.temperature)
        .with_code_execution(config.code_execution && config.provider == LlmProvider::Gemini)
}
