//! Text-to-speech collaborator.
//!
//! A [`SpeechSynthesizer`] turns one complete response into raw PCM
//! (signed 16-bit little-endian, mono, at the configured output rate).

mod gemini;

use async_trait::async_trait;

use crate::error::Result;

pub use gemini::GeminiTts;

/// Converts text to speech audio.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize `text` into s16le PCM bytes.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::AdaError::Tts`] when the backend fails or
    /// returns no audio.
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>>;
}
