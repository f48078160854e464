//! Normalized streaming units from the dialogue model.
//!
//! Adapters turn provider wire formats into [`LlmEvent`]s. A stream flows:
//!
//! ```text
//! StreamStart → (TextDelta | ToolCall | ExecutableCode | CodeExecutionResult)* → StreamEnd
//! ```
//!
//! and may end with a `StreamError` instead of `StreamEnd`. Tool calls are
//! only emitted once their arguments are complete, so consumers never see
//! partial JSON.

use super::message::ToolCall;

/// A unit received from the dialogue model's response stream.
#[derive(Debug, Clone, PartialEq)]
pub enum LlmEvent {
    /// Stream has started. First event in every stream.
    StreamStart {
        /// Provider request identifier.
        request_id: String,
        /// Model serving the request.
        model: String,
    },

    /// A chunk of generated text.
    TextDelta {
        /// The text fragment.
        text: String,
    },

    /// A complete tool call requested by the model.
    ToolCall(ToolCall),

    /// Code the model executed server-side (diagnostic only).
    ExecutableCode {
        /// Source language reported by the provider.
        language: String,
        /// The code itself.
        code: String,
    },

    /// Outcome of server-side code execution (diagnostic only).
    CodeExecutionResult {
        /// Provider outcome label, e.g. `OUTCOME_OK`.
        outcome: String,
        /// Captured output.
        output: String,
    },

    /// Stream finished.
    StreamEnd {
        /// Why the model stopped.
        finish_reason: FinishReason,
    },

    /// Stream broke; no further events follow.
    StreamError {
        /// Description of what went wrong.
        error: String,
    },
}

/// The reason the model stopped generating output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Natural stop.
    Stop,
    /// Hit the token limit.
    Length,
    /// Stopped to let the caller run tools.
    ToolCalls,
    /// Blocked by a safety filter.
    ContentFilter,
    /// Anything else the provider reported.
    Other,
}

impl std::fmt::Display for FinishReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Stop => "stop",
            Self::Length => "length",
            Self::ToolCalls => "tool_calls",
            Self::ContentFilter => "content_filter",
            Self::Other => "other",
        };
        f.write_str(s)
    }
}
