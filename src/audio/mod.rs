//! Audio output devices.
//!
//! The output stage opens an [`AudioDevice`] once and writes PCM through
//! the returned [`AudioOutput`] handle. Two devices ship:
//!
//! - [`playback::CpalDevice`]: system speakers via cpal
//! - [`wav::WavDevice`]: a WAV file, for headless runs

pub mod playback;
pub mod wav;

use crate::error::Result;

pub use playback::{CpalDevice, list_output_devices};
pub use wav::WavDevice;

/// PCM sample encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SampleFormat {
    /// Signed 16-bit little-endian.
    #[default]
    Int16,
}

impl SampleFormat {
    /// Bytes per sample.
    pub fn bytes_per_sample(self) -> usize {
        match self {
            Self::Int16 => 2,
        }
    }
}

/// Shape of the PCM written to a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub sample_format: SampleFormat,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            sample_rate: 24_000,
            channels: 1,
            sample_format: SampleFormat::Int16,
        }
    }
}

impl AudioFormat {
    /// Mono s16le at `sample_rate`.
    pub fn mono(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            ..Self::default()
        }
    }

    /// Bytes per frame (one sample for every channel).
    pub fn bytes_per_frame(&self) -> usize {
        self.sample_format.bytes_per_sample() * usize::from(self.channels.max(1))
    }
}

/// Something that can be opened for playback.
pub trait AudioDevice: Send + Sync {
    /// Open the device for `format`. May block.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::AdaError::Audio`] when the device is missing
    /// or rejects the format.
    fn open(&self, format: AudioFormat) -> Result<Box<dyn AudioOutput>>;
}

/// An open playback handle.
pub trait AudioOutput: Send {
    /// Write PCM bytes. May block while the device catches up.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::AdaError::Audio`] when the device fails.
    fn write(&mut self, pcm: &[u8]) -> Result<()>;

    /// Drop audio accepted but not yet played.
    fn discard(&mut self) {}

    /// Play out what is buffered and release the device.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::AdaError::Audio`] when shutdown fails.
    fn close(self: Box<Self>) -> Result<()>;
}

/// Decode s16le bytes into `[-1, 1]` floats. A trailing odd byte is ignored.
pub fn pcm16_to_f32(pcm: &[u8]) -> Vec<f32> {
    pcm.chunks_exact(2)
        .map(|b| f32::from(i16::from_le_bytes([b[0], b[1]])) / 32_768.0)
        .collect()
}
