//! WAV file output for headless runs.

use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

use tracing::info;

use super::{AudioDevice, AudioFormat, AudioOutput};
use crate::error::{AdaError, Result};

/// Writes everything played into a single WAV file.
#[derive(Debug, Clone)]
pub struct WavDevice {
    path: PathBuf,
}

impl WavDevice {
    /// Target file; created (or truncated) on open.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl AudioDevice for WavDevice {
    fn open(&self, format: AudioFormat) -> Result<Box<dyn AudioOutput>> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let spec = hound::WavSpec {
            channels: format.channels,
            sample_rate: format.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let writer = hound::WavWriter::create(&self.path, spec)
            .map_err(|e| AdaError::Audio(format!("cannot create {}: {e}", self.path.display())))?;
        info!(path = %self.path.display(), "writing audio to WAV file");
        Ok(Box::new(WavOutput { writer }))
    }
}

struct WavOutput {
    writer: hound::WavWriter<BufWriter<File>>,
}

impl AudioOutput for WavOutput {
    fn write(&mut self, pcm: &[u8]) -> Result<()> {
        for bytes in pcm.chunks_exact(2) {
            self.writer
                .write_sample(i16::from_le_bytes([bytes[0], bytes[1]]))
                .map_err(|e| AdaError::Audio(format!("WAV write failed: {e}")))?;
        }
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<()> {
        self.writer
            .finalize()
            .map_err(|e| AdaError::Audio(format!("WAV finalize failed: {e}")))
    }
}
