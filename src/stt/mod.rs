//! Speech-to-text collaborator.
//!
//! A [`Transcriber`] turns whatever it listens to into finalized
//! utterances. It is polled from a blocking thread by the input stage,
//! so implementations may block while waiting for speech.

use std::io::BufRead;

use crate::error::{AdaError, Result};

/// Produces finalized utterances.
pub trait Transcriber: Send {
    /// Block until the next finalized utterance.
    ///
    /// Returns `Ok(None)` when the feed has ended for good.
    ///
    /// # Errors
    ///
    /// Returns [`AdaError::Stt`] on a transient failure; the caller
    /// backs off and polls again.
    fn next_utterance(&mut self) -> Result<Option<String>>;
}

/// Treats each non-blank line of a reader as one utterance.
///
/// Drives the `listen` command from stdin (or a pipe from an external
/// recognizer) and scripted feeds in tests.
#[derive(Debug)]
pub struct LineTranscriber<R> {
    reader: R,
    min_chars: usize,
    line: String,
}

impl<R: BufRead> LineTranscriber<R> {
    /// Wrap a line reader.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            min_chars: 1,
            line: String::new(),
        }
    }

    /// Drop utterances shorter than `min_chars` characters (after trimming).
    pub fn with_min_chars(mut self, min_chars: usize) -> Self {
        self.min_chars = min_chars.max(1);
        self
    }
}

impl<R: BufRead + Send> Transcriber for LineTranscriber<R> {
    fn next_utterance(&mut self) -> Result<Option<String>> {
        loop {
            self.line.clear();
            let read = self
                .reader
                .read_line(&mut self.line)
                .map_err(|e| AdaError::Stt(format!("feed read failed: {e}")))?;
            if read == 0 {
                return Ok(None);
            }
            let text = self.line.trim();
            if text.chars().count() >= self.min_chars {
                return Ok(Some(text.to_owned()));
            }
        }
    }
}
