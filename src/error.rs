//! Error types for the conversational agent.

use crate::llm::error::LlmError;

/// Top-level error type for the agent and its pipeline stages.
#[derive(Debug, thiserror::Error)]
pub enum AdaError {
    /// Audio device error (enumeration, open, write).
    #[error("audio error: {0}")]
    Audio(String),

    /// Speech-to-text error.
    #[error("STT error: {0}")]
    Stt(String),

    /// Dialogue model transport error.
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    /// Text-to-speech error.
    #[error("TTS error: {0}")]
    Tts(String),

    /// Tool dispatch error.
    #[error("tool error: {0}")]
    Tool(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Pipeline orchestration error.
    #[error("pipeline error: {0}")]
    Pipeline(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Queue or channel closed unexpectedly.
    #[error("channel error: {0}")]
    Channel(String),
}

/// Convenience result type for agent operations.
pub type Result<T> = std::result::Result<T, AdaError>;
