//! Speech synthesis stage.
//!
//! Accumulates a turn's fragments until its end-of-turn marker, then
//! synthesizes the whole reply in one call. Blank replies are never sent
//! to the backend and backend errors only cost the turn its audio.

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::messages::{AudioBuffer, AudioItem, ResponseKind};
use super::queues::PipelineQueues;
use crate::audio::AudioFormat;
use crate::tts::SpeechSynthesizer;

/// Text collected for the turn currently being read.
#[derive(Debug, Default)]
struct Pending {
    generation: u64,
    text: String,
}

impl Pending {
    /// Reset when fragments of a newer turn start arriving.
    fn for_generation(&mut self, generation: u64) -> &mut String {
        if self.generation != generation {
            if !self.text.is_empty() {
                debug!(
                    stale = self.generation,
                    chars = self.text.len(),
                    "discarding unfinished reply"
                );
            }
            self.generation = generation;
            self.text.clear();
        }
        &mut self.text
    }
}

/// Run until the response queue closes or `cancel` fires.
pub async fn run_synthesis_stage(
    queues: PipelineQueues,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    format: AudioFormat,
    cancel: CancellationToken,
) {
    info!("synthesis stage started");
    let mut pending = Pending::default();

    loop {
        let item = tokio::select! {
            () = cancel.cancelled() => break,
            item = queues.responses.recv() => match item {
                Some(item) => item,
                None => {
                    // Responses are finished; let the output stage drain.
                    queues.audio.close();
                    break;
                }
            },
        };

        if !queues.generation.is_current(item.generation) {
            debug!(generation = item.generation, "stale response item dropped");
            continue;
        }

        match item.kind {
            ResponseKind::Fragment(text) => {
                pending.for_generation(item.generation).push_str(&text);
            }
            ResponseKind::EndOfTurn => {
                let text = std::mem::take(pending.for_generation(item.generation));
                let text = text.trim();
                if text.is_empty() {
                    debug!(generation = item.generation, "no text to speak");
                    continue;
                }

                let started = Instant::now();
                let pcm = tokio::select! {
                    () = cancel.cancelled() => break,
                    result = synthesizer.synthesize(text) => match result {
                        Ok(pcm) => pcm,
                        Err(e) => {
                            warn!(
                                generation = item.generation,
                                "synthesis failed, turn will be silent: {e}"
                            );
                            continue;
                        }
                    },
                };

                if !queues.generation.is_current(item.generation) {
                    debug!(generation = item.generation, "audio superseded during synthesis");
                    continue;
                }
                if pcm.is_empty() {
                    warn!(generation = item.generation, "synthesizer returned no audio");
                    continue;
                }

                info!(
                    generation = item.generation,
                    chars = text.len(),
                    bytes = pcm.len(),
                    duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                    "reply synthesized"
                );
                queues.audio.push(AudioItem::Buffer(AudioBuffer {
                    generation: item.generation,
                    pcm,
                    format,
                }));
            }
        }
    }
    info!("synthesis stage stopped");
}
