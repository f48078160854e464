//! Audio playback to system speakers via cpal.
//!
//! A cpal `Stream` is not `Send`, so each opened output owns a dedicated
//! thread that builds the stream and keeps it alive. Writes go through a
//! shared sample queue drained by the device callback; [`CpalOutput::write`]
//! blocks while more than [`MAX_BUFFERED_MS`] of audio is queued.

use std::collections::VecDeque;
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use cpal::StreamConfig;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tracing::{debug, error, info};

use super::{AudioDevice, AudioFormat, AudioOutput, pcm16_to_f32};
use crate::error::{AdaError, Result};

/// Audio queued ahead of the device before writes block.
pub const MAX_BUFFERED_MS: u64 = 200;

/// The system (or a named) output device.
#[derive(Debug, Clone, Default)]
pub struct CpalDevice {
    device_name: Option<String>,
}

impl CpalDevice {
    /// Use the named device, or the system default for `None`.
    pub fn new(device_name: Option<String>) -> Self {
        Self { device_name }
    }
}

fn select_device(name: Option<&str>) -> Result<cpal::Device> {
    let host = cpal::default_host();
    match name {
        Some(name) => host
            .output_devices()
            .map_err(|e| AdaError::Audio(format!("cannot enumerate devices: {e}")))?
            .find(|d| {
                d.description()
                    .ok()
                    .map(|desc| desc.name() == name)
                    .unwrap_or(false)
            })
            .ok_or_else(|| AdaError::Audio(format!("output device '{name}' not found"))),
        None => host
            .default_output_device()
            .ok_or_else(|| AdaError::Audio("no default output device".into())),
    }
}

/// List available output devices.
///
/// # Errors
///
/// Returns an error if devices cannot be enumerated.
pub fn list_output_devices() -> Result<Vec<String>> {
    let host = cpal::default_host();
    let devices = host
        .output_devices()
        .map_err(|e| AdaError::Audio(format!("cannot enumerate devices: {e}")))?;
    Ok(devices
        .filter_map(|d| d.description().ok().map(|desc| desc.name().to_owned()))
        .collect())
}

#[derive(Default)]
struct SampleQueue {
    samples: VecDeque<f32>,
    failed: Option<String>,
}

struct Shared {
    queue: Mutex<SampleQueue>,
    drained: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SampleQueue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl AudioDevice for CpalDevice {
    fn open(&self, format: AudioFormat) -> Result<Box<dyn AudioOutput>> {
        let shared = Arc::new(Shared {
            queue: Mutex::new(SampleQueue::default()),
            drained: Condvar::new(),
        });
        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<()>>(1);
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let name = self.device_name.clone();
        let thread_shared = Arc::clone(&shared);
        let thread = std::thread::Builder::new()
            .name("ada-audio-out".into())
            .spawn(move || {
                let stream = match build_stream(name.as_deref(), format, &thread_shared) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                // Keep the stream alive until closed or the handle is dropped.
                let _ = stop_rx.recv();
                drop(stream);
                debug!("audio output stream released");
            })
            .map_err(|e| AdaError::Audio(format!("failed to spawn audio thread: {e}")))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => {
                let _ = thread.join();
                return Err(AdaError::Audio("audio thread exited during open".into()));
            }
        }

        let max_buffered =
            (u64::from(format.sample_rate) * u64::from(format.channels) * MAX_BUFFERED_MS / 1000)
                as usize;
        Ok(Box::new(CpalOutput {
            shared,
            stop: Some(stop_tx),
            thread: Some(thread),
            max_buffered: max_buffered.max(1),
            format,
        }))
    }
}

fn build_stream(
    name: Option<&str>,
    format: AudioFormat,
    shared: &Arc<Shared>,
) -> Result<cpal::Stream> {
    let device = select_device(name)?;
    let device_name = device
        .description()
        .map(|d| d.name().to_owned())
        .unwrap_or_else(|_| "<unknown>".into());
    info!(
        device = %device_name,
        sample_rate = format.sample_rate,
        channels = format.channels,
        "opening output device"
    );

    let stream_config = StreamConfig {
        channels: format.channels,
        sample_rate: format.sample_rate,
        buffer_size: cpal::BufferSize::Default,
    };

    let data_shared = Arc::clone(shared);
    let err_shared = Arc::clone(shared);
    let stream = device
        .build_output_stream(
            &stream_config,
            move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                let mut queue = data_shared.lock();
                for sample in data.iter_mut() {
                    *sample = queue.samples.pop_front().unwrap_or(0.0);
                }
                drop(queue);
                data_shared.drained.notify_all();
            },
            move |err| {
                error!("audio output stream error: {err}");
                err_shared.lock().failed = Some(err.to_string());
                err_shared.drained.notify_all();
            },
            None,
        )
        .map_err(|e| AdaError::Audio(format!("failed to build output stream: {e}")))?;

    stream
        .play()
        .map_err(|e| AdaError::Audio(format!("failed to start output stream: {e}")))?;
    Ok(stream)
}

/// An open cpal output.
pub struct CpalOutput {
    shared: Arc<Shared>,
    stop: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
    max_buffered: usize,
    format: AudioFormat,
}

impl CpalOutput {
    fn release(&mut self) {
        drop(self.stop.take());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl AudioOutput for CpalOutput {
    fn write(&mut self, pcm: &[u8]) -> Result<()> {
        let samples = pcm16_to_f32(pcm);
        let mut queue = self.shared.lock();
        if let Some(err) = queue.failed.take() {
            return Err(AdaError::Audio(format!("output stream failed: {err}")));
        }
        queue.samples.extend(samples);

        while queue.samples.len() > self.max_buffered {
            let (guard, timeout) = self
                .shared
                .drained
                .wait_timeout(queue, Duration::from_secs(2))
                .unwrap_or_else(PoisonError::into_inner);
            queue = guard;
            if let Some(err) = queue.failed.take() {
                return Err(AdaError::Audio(format!("output stream failed: {err}")));
            }
            if timeout.timed_out() {
                return Err(AdaError::Audio("output device stopped consuming audio".into()));
            }
        }
        Ok(())
    }

    fn discard(&mut self) {
        let dropped = {
            let mut queue = self.shared.lock();
            let n = queue.samples.len();
            queue.samples.clear();
            n
        };
        if dropped > 0 {
            debug!(samples = dropped, "discarded buffered audio");
        }
    }

    fn close(mut self: Box<Self>) -> Result<()> {
        let remaining = self.shared.lock().samples.len() as u64;
        let per_sec = u64::from(self.format.sample_rate) * u64::from(self.format.channels.max(1));
        let budget = Duration::from_millis(remaining * 1000 / per_sec.max(1) + 500);

        let queue = self.shared.lock();
        let (queue, _) = self
            .shared
            .drained
            .wait_timeout_while(queue, budget, |q| !q.samples.is_empty() && q.failed.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        drop(queue);

        self.release();
        Ok(())
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.release();
    }
}
