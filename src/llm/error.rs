//! Errors raised by the dialogue-model transport.
//!
//! Every variant carries a stable code that prefixes its Display output and
//! is available through [`LlmError::code`].

/// Stable codes for programmatic handling of transport failures.
pub mod error_codes {
    /// Invalid or missing configuration (model, base URL, key).
    pub const CONFIG_INVALID: &str = "CONFIG_INVALID";

    /// The provider rejected our credentials.
    pub const AUTH_FAILED: &str = "AUTH_FAILED";

    /// The HTTP request could not be sent or was rate limited.
    pub const REQUEST_FAILED: &str = "REQUEST_FAILED";

    /// The response stream broke or carried malformed data.
    pub const STREAM_FAILED: &str = "STREAM_FAILED";

    /// The request or stream exceeded its deadline.
    pub const TIMEOUT_ERROR: &str = "TIMEOUT_ERROR";

    /// Any other provider-side failure (5xx, unexpected status).
    pub const PROVIDER_ERROR: &str = "PROVIDER_ERROR";
}

/// Errors produced by provider adapters and the chat session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LlmError {
    /// Invalid or missing configuration.
    #[error("[{}] {}", error_codes::CONFIG_INVALID, .0)]
    ConfigError(String),

    /// Authentication failed.
    #[error("[{}] {}", error_codes::AUTH_FAILED, .0)]
    AuthError(String),

    /// Request could not be sent, or was throttled.
    #[error("[{}] {}", error_codes::REQUEST_FAILED, .0)]
    RequestError(String),

    /// Stream interrupted or malformed.
    #[error("[{}] {}", error_codes::STREAM_FAILED, .0)]
    StreamError(String),

    /// Deadline exceeded.
    #[error("[{}] {}", error_codes::TIMEOUT_ERROR, .0)]
    TimeoutError(String),

    /// Provider-specific failure.
    #[error("[{}] {}", error_codes::PROVIDER_ERROR, .0)]
    ProviderError(String),
}

impl LlmError {
    /// The stable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConfigError(_) => error_codes::CONFIG_INVALID,
            Self::AuthError(_) => error_codes::AUTH_FAILED,
            Self::RequestError(_) => error_codes::REQUEST_FAILED,
            Self::StreamError(_) => error_codes::STREAM_FAILED,
            Self::TimeoutError(_) => error_codes::TIMEOUT_ERROR,
            Self::ProviderError(_) => error_codes::PROVIDER_ERROR,
        }
    }

    /// The inner message without the code prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::ConfigError(m)
            | Self::AuthError(m)
            | Self::RequestError(m)
            | Self::StreamError(m)
            | Self::TimeoutError(m)
            | Self::ProviderError(m) => m,
        }
    }

    /// Whether a retry of the same request can reasonably succeed.
    ///
    /// Configuration and credential problems need operator action; network,
    /// throttling, stream and server failures are transient.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ConfigError(_) | Self::AuthError(_) => false,
            Self::RequestError(_)
            | Self::StreamError(_)
            | Self::TimeoutError(_)
            | Self::ProviderError(_) => true,
        }
    }
}
