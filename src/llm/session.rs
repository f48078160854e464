//! Persistent multi-turn chat session.
//!
//! Holds the system prompt, the tools offered to the model and the running
//! message history, and opens one response stream per request. The
//! orchestrator takes a [`Checkpoint`] before each turn and rolls back to
//! it when the turn fails, so a half-finished tool exchange never leaks
//! into later requests.

use std::sync::Arc;

use tracing::{debug, warn};

use super::error::LlmError;
use super::message::{Message, Role, ToolCall};
use super::provider::{LlmEventStream, ProviderAdapter, RequestOptions, ToolDefinition};
use crate::retry::RetryPolicy;
use crate::tools::ToolResult;

/// History position to roll back to.
///
/// Positions are absolute (they count messages trimmed since), so a
/// checkpoint stays valid across history trimming.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint(usize);

/// A conversation with one dialogue model.
pub struct ChatSession {
    provider: Arc<dyn ProviderAdapter>,
    tools: Vec<ToolDefinition>,
    options: RequestOptions,
    /// `messages[0]` is the system prompt.
    messages: Vec<Message>,
    trimmed: usize,
    max_history_messages: usize,
    retry: RetryPolicy,
}

impl std::fmt::Debug for ChatSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatSession")
            .field("provider", &self.provider.name())
            .field("tools", &self.tools.len())
            .field("history", &self.history().len())
            .finish()
    }
}

impl ChatSession {
    /// Start a session with a system prompt and the tools to offer.
    pub fn new(
        provider: Arc<dyn ProviderAdapter>,
        system_prompt: impl Into<String>,
        tools: Vec<ToolDefinition>,
    ) -> Self {
        Self {
            provider,
            tools,
            options: RequestOptions::default(),
            messages: vec![Message::system(system_prompt)],
            trimmed: 0,
            max_history_messages: 48,
            retry: RetryPolicy::new().with_max_attempts(0),
        }
    }

    /// Set per-request generation options.
    pub fn with_options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }

    /// Cap the history (system prompt excluded). Zero means unbounded.
    pub fn with_max_history(mut self, max_messages: usize) -> Self {
        self.max_history_messages = max_messages;
        self
    }

    /// Retry transient send failures with this policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Provider name, for logs.
    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Tools offered to the model.
    pub fn tools(&self) -> &[ToolDefinition] {
        &self.tools
    }

    /// Conversation history, system prompt excluded.
    pub fn history(&self) -> &[Message] {
        &self.messages[1..]
    }

    /// Remember the current history position.
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint(self.trimmed + self.messages.len())
    }

    /// Drop everything appended since `checkpoint`.
    pub fn rollback(&mut self, checkpoint: Checkpoint) {
        let keep = checkpoint.0.saturating_sub(self.trimmed).max(1);
        if keep < self.messages.len() {
            debug!(
                dropped = self.messages.len() - keep,
                "rolling back session history"
            );
            self.messages.truncate(keep);
        }
    }

    /// Append a user message and open a response stream.
    ///
    /// # Errors
    ///
    /// Returns the provider's error once retries are exhausted. The user
    /// message stays in history; callers roll back to a checkpoint.
    pub async fn send(&mut self, message: Message) -> Result<LlmEventStream, LlmError> {
        self.messages.push(message);
        self.trim();
        self.open_stream().await
    }

    /// Append one message carrying every result of a tool round and open
    /// the follow-up stream.
    ///
    /// # Errors
    ///
    /// As for [`ChatSession::send`].
    pub async fn send_tool_results(
        &mut self,
        results: Vec<ToolResult>,
    ) -> Result<LlmEventStream, LlmError> {
        self.messages.push(Message::tool_results(results));
        self.open_stream().await
    }

    /// Record the model's reply for the round that just finished.
    pub fn record_assistant(&mut self, text: impl Into<String>, tool_calls: Vec<ToolCall>) {
        let message = Message::assistant(text, tool_calls);
        if message.parts.is_empty() && message.tool_calls.is_empty() {
            return;
        }
        self.messages.push(message);
    }

    /// Drop the oldest exchanges, cutting only at user-message boundaries.
    fn trim(&mut self) {
        if self.max_history_messages == 0 {
            return;
        }
        while self.messages.len() - 1 > self.max_history_messages {
            let Some(cut) = self
                .messages
                .iter()
                .enumerate()
                .skip(2)
                .find(|(_, m)| m.role == Role::User)
                .map(|(i, _)| i)
            else {
                break;
            };
            self.messages.drain(1..cut);
            self.trimmed += cut - 1;
        }
    }

    async fn open_stream(&self) -> Result<LlmEventStream, LlmError> {
        let mut retries = 0;
        loop {
            match self
                .provider
                .send(&self.messages, &self.options, &self.tools)
                .await
            {
                Ok(stream) => return Ok(stream),
                Err(e) if e.is_retryable() && self.retry.should_retry(retries) => {
                    retries += 1;
                    let delay = self.retry.delay_for_attempt(retries);
                    warn!(
                        provider = self.provider.name(),
                        attempt = retries,
                        delay_ms = delay.as_millis() as u64,
                        "send failed, retrying: {e}"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
