//! Message types passed between pipeline stages.
//!
//! Every item that crosses a queue carries the generation of the turn it
//! belongs to. A final input advances the generation; consumers discard
//! anything stamped with an older one.

use base64::Engine;
use chrono::{DateTime, Utc};

use crate::audio::AudioFormat;
use crate::error::{AdaError, Result};

/// An image sent alongside a turn (e.g. a webcam frame).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// Raw image bytes.
    pub data: Vec<u8>,
    /// MIME type, e.g. `image/jpeg`.
    pub mime_type: String,
}

impl Attachment {
    /// Wrap bytes with a known MIME type.
    pub fn new(data: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            data,
            mime_type: mime_type.into(),
        }
    }

    /// Parse a `data:<mime>;base64,<payload>` URL as produced by browser
    /// canvas captures.
    ///
    /// # Errors
    ///
    /// Returns [`AdaError::Pipeline`] when the URL is not a base64 data URL.
    pub fn from_data_url(url: &str) -> Result<Self> {
        let rest = url
            .strip_prefix("data:")
            .ok_or_else(|| AdaError::Pipeline("attachment is not a data URL".into()))?;
        let (header, payload) = rest
            .split_once(',')
            .ok_or_else(|| AdaError::Pipeline("data URL has no payload".into()))?;
        let mime_type = header
            .strip_suffix(";base64")
            .ok_or_else(|| AdaError::Pipeline("data URL is not base64-encoded".into()))?;
        let mime_type = if mime_type.is_empty() {
            "application/octet-stream"
        } else {
            mime_type
        };
        let data = base64::engine::general_purpose::STANDARD
            .decode(payload.trim())
            .map_err(|e| AdaError::Pipeline(format!("invalid data URL payload: {e}")))?;
        Ok(Self::new(data, mime_type))
    }

    /// Wrap raw image bytes, detecting the MIME type from their content.
    ///
    /// # Errors
    ///
    /// Returns [`AdaError::Pipeline`] when the bytes are not a recognized
    /// image format.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        let format = image::guess_format(&data)
            .map_err(|e| AdaError::Pipeline(format!("unrecognized image: {e}")))?;
        Ok(Self::new(data, format.to_mime_type()))
    }
}

/// One unit of user input.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnInput {
    /// User text.
    pub content: String,
    /// Optional image.
    pub attachment: Option<Attachment>,
    /// Only final inputs start a turn.
    pub is_final: bool,
    /// Assigned by the input stage when the input is accepted.
    pub generation: u64,
    /// When the input was created.
    pub submitted_at: DateTime<Utc>,
}

impl TurnInput {
    /// A final text input.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            attachment: None,
            is_final: true,
            generation: 0,
            submitted_at: Utc::now(),
        }
    }

    /// A partial (non-final) input, e.g. an interim transcript.
    pub fn partial(content: impl Into<String>) -> Self {
        Self {
            is_final: false,
            ..Self::text(content)
        }
    }

    /// Attach an image.
    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachment = Some(attachment);
        self
    }

    /// Whether there is nothing to send.
    pub fn is_blank(&self) -> bool {
        self.content.trim().is_empty() && self.attachment.is_none()
    }
}

/// Body of a response queue item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseKind {
    /// Model text, in stream order.
    Fragment(String),
    /// The turn is over; no more fragments follow for this generation.
    EndOfTurn,
}

/// An item on the response queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseItem {
    pub generation: u64,
    pub kind: ResponseKind,
}

impl ResponseItem {
    /// A text fragment.
    pub fn fragment(generation: u64, text: impl Into<String>) -> Self {
        Self {
            generation,
            kind: ResponseKind::Fragment(text.into()),
        }
    }

    /// The end-of-turn marker.
    pub fn end_of_turn(generation: u64) -> Self {
        Self {
            generation,
            kind: ResponseKind::EndOfTurn,
        }
    }
}

/// Synthesized speech for one turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioBuffer {
    pub generation: u64,
    /// s16le PCM.
    pub pcm: Vec<u8>,
    pub format: AudioFormat,
}

/// An item on the audio queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioItem {
    /// Audio to play.
    Buffer(AudioBuffer),
    /// Close the device and end the output stage.
    Stop,
}

/// Where the orchestrator is within the current turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TurnState {
    /// Waiting for the next final input.
    #[default]
    AwaitingInput,
    /// Submitting the request.
    Sending,
    /// Reading the first response stream.
    Streaming,
    /// Tool calls collected, about to run.
    ToolPending,
    /// Tools running.
    ToolDispatched,
    /// Reading a follow-up stream after tool results.
    StreamingFinal,
    /// Turn finished (successfully or not).
    Done,
}

impl std::fmt::Display for TurnState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::AwaitingInput => "awaiting_input",
            Self::Sending => "sending",
            Self::Streaming => "streaming",
            Self::ToolPending => "tool_pending",
            Self::ToolDispatched => "tool_dispatched",
            Self::StreamingFinal => "streaming_final",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

/// Summary of a finished turn, for front ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnReport {
    pub generation: u64,
    /// Everything the model said during the turn.
    pub reply: String,
    /// Tool calls dispatched (including error-answered ones).
    pub tool_calls: usize,
    /// Error that aborted the turn, if any.
    pub error: Option<String>,
}
