//! Input stage: turns transcripts and programmatic submissions into turn
//! inputs.
//!
//! Every final input is a barge-in, blank ones included. The response and
//! audio queues are flushed before the input lands in the turn slot.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::messages::{Attachment, TurnInput};
use super::queues::PipelineQueues;
use crate::retry::RetryPolicy;
use crate::stt::Transcriber;

/// Cloneable handle for submitting input to a running pipeline.
#[derive(Debug, Clone)]
pub struct InputHandle {
    queues: PipelineQueues,
}

impl InputHandle {
    pub fn new(queues: PipelineQueues) -> Self {
        Self { queues }
    }

    /// Submit an input.
    ///
    /// Returns the generation assigned to the input, or `None` if it was
    /// discarded (partial, blank, or the pipeline has shut down).
    pub fn submit(&self, mut input: TurnInput) -> Option<u64> {
        if !input.is_final {
            debug!(chars = input.content.len(), "partial input discarded");
            return None;
        }
        if self.queues.turns.is_closed() {
            warn!("pipeline is shut down, input dropped");
            return None;
        }

        // A final input interrupts the current turn even when it is blank.
        let generation = self.queues.barge_in();
        if input.is_blank() {
            debug!(generation, "empty input ignored");
            return None;
        }
        input.generation = generation;
        debug!(
            generation,
            chars = input.content.len(),
            image = input.attachment.is_some(),
            "input accepted"
        );
        self.queues.turns.put(input);
        Some(generation)
    }

    /// Submit final text.
    pub fn submit_text(&self, text: impl Into<String>) -> Option<u64> {
        self.submit(TurnInput::text(text))
    }

    /// Submit final text with an image.
    pub fn submit_with_image(
        &self,
        text: impl Into<String>,
        attachment: Attachment,
    ) -> Option<u64> {
        self.submit(TurnInput::text(text).with_attachment(attachment))
    }

    /// Stop accepting input. The pending turn still runs and its reply is
    /// played, then the pipeline winds down on its own.
    pub fn close(&self) {
        if !self.queues.turns.is_closed() {
            info!("input closed");
            self.queues.turns.close();
        }
    }
}

/// Poll `transcriber` until its feed ends or `cancel` fires.
///
/// Each finalized utterance is submitted as a final input. Transcriber
/// errors back off per `retry` and polling continues.
pub async fn run_transcription_feed(
    mut transcriber: Box<dyn Transcriber>,
    input: InputHandle,
    retry: RetryPolicy,
    cancel: CancellationToken,
) {
    info!("transcription feed started");
    let mut failures: u32 = 0;

    loop {
        let poll = tokio::task::spawn_blocking(move || {
            let result = transcriber.next_utterance();
            (transcriber, result)
        });
        let (returned, result) = tokio::select! {
            () = cancel.cancelled() => break,
            joined = poll => match joined {
                Ok(polled) => polled,
                Err(e) => {
                    error!("transcriber thread failed: {e}");
                    break;
                }
            },
        };
        transcriber = returned;

        match result {
            Ok(Some(text)) => {
                failures = 0;
                info!(chars = text.len(), "utterance transcribed");
                input.submit_text(text);
            }
            Ok(None) => {
                info!("transcription feed ended");
                input.close();
                break;
            }
            Err(e) => {
                failures = failures.saturating_add(1);
                let delay = retry.delay_for_attempt(failures);
                warn!(
                    consecutive_failures = failures,
                    delay_ms = duration_ms(delay),
                    "transcription failed, retrying: {e}"
                );
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
