//! Audio output stage.
//!
//! Opens the device once and plays buffers in arrival order. Each buffer is
//! written in pieces of `chunk_frames` frames and the generation is
//! re-checked before every piece, so a barge-in cuts playback off at the
//! next piece boundary.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::messages::{AudioBuffer, AudioItem};
use super::queues::PipelineQueues;
use crate::audio::{AudioDevice, AudioFormat, AudioOutput};
use crate::error::Result;

/// Output stage tuning.
#[derive(Debug, Clone, Copy)]
pub struct OutputSettings {
    pub format: AudioFormat,
    /// Frames per device write.
    pub chunk_frames: usize,
    /// Sleep before retrying a failed write.
    pub retry_delay: Duration,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            format: AudioFormat::default(),
            chunk_frames: 1024,
            retry_delay: Duration::from_millis(100),
        }
    }
}

/// Run until an [`AudioItem::Stop`] arrives or the audio queue closes.
///
/// A device that cannot be opened ends this stage only; the rest of the
/// pipeline keeps serving turns without sound.
pub async fn run_output_stage(
    queues: PipelineQueues,
    device: Arc<dyn AudioDevice>,
    settings: OutputSettings,
) {
    let format = settings.format;
    let opened = tokio::task::spawn_blocking(move || device.open(format)).await;
    let mut output = match opened {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            error!("failed to open audio output, playback disabled: {e}");
            return;
        }
        Err(e) => {
            error!("audio open task failed, playback disabled: {e}");
            return;
        }
    };
    info!(
        sample_rate = format.sample_rate,
        channels = format.channels,
        "output stage started"
    );

    let piece_bytes = settings.chunk_frames.max(1) * format.bytes_per_frame();
    while let Some(item) = queues.audio.recv().await {
        let buffer = match item {
            AudioItem::Buffer(buffer) => buffer,
            AudioItem::Stop => {
                debug!("stop requested");
                break;
            }
        };
        if buffer.pcm.is_empty() {
            continue;
        }
        if !queues.generation.is_current(buffer.generation) {
            debug!(generation = buffer.generation, "stale audio dropped");
            continue;
        }
        if buffer.format != format {
            warn!(
                generation = buffer.generation,
                buffer_rate = buffer.format.sample_rate,
                device_rate = format.sample_rate,
                "audio format differs from the open device"
            );
        }

        output = match play(output, buffer, piece_bytes, &queues, settings.retry_delay).await {
            Some(output) => output,
            None => return,
        };
    }

    match tokio::task::spawn_blocking(move || output.close()).await {
        Ok(Ok(())) => info!("output stage stopped"),
        Ok(Err(e)) => warn!("audio output did not close cleanly: {e}"),
        Err(e) => error!("audio close task failed: {e}"),
    }
}

/// Write one buffer piece by piece. Returns the handle for the next buffer,
/// or `None` if the blocking writer died.
async fn play(
    mut output: Box<dyn AudioOutput>,
    buffer: AudioBuffer,
    piece_bytes: usize,
    queues: &PipelineQueues,
    retry_delay: Duration,
) -> Option<Box<dyn AudioOutput>> {
    let generation = buffer.generation;
    let pcm = Arc::new(buffer.pcm);
    let mut offset = 0;
    let mut written = 0usize;

    while offset < pcm.len() {
        if !queues.generation.is_current(generation) {
            info!(generation, written_bytes = written, "playback interrupted by barge-in");
            output.discard();
            return Some(output);
        }
        let end = (offset + piece_bytes).min(pcm.len());

        let (returned, result) = write_piece(output, Arc::clone(&pcm), offset, end).await?;
        output = returned;
        if let Err(e) = result {
            warn!(generation, "audio write failed, retrying: {e}");
            tokio::time::sleep(retry_delay).await;
            let (returned, retry) = write_piece(output, Arc::clone(&pcm), offset, end).await?;
            output = returned;
            if let Err(e) = retry {
                error!(generation, "audio write failed again, piece skipped: {e}");
            }
        }
        written += end - offset;
        offset = end;
    }
    debug!(generation, bytes = written, "buffer played");
    Some(output)
}

async fn write_piece(
    mut output: Box<dyn AudioOutput>,
    pcm: Arc<Vec<u8>>,
    start: usize,
    end: usize,
) -> Option<(Box<dyn AudioOutput>, Result<()>)> {
    let joined = tokio::task::spawn_blocking(move || {
        let result = output.write(&pcm[start..end]);
        (output, result)
    })
    .await;
    match joined {
        Ok(done) => Some(done),
        Err(e) => {
            error!("audio write task failed: {e}");
            None
        }
    }
}
