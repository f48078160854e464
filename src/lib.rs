//! Ada: a voice and text conversational agent.
//!
//! This crate provides an interruptible turn pipeline for spoken
//! conversations with a streaming dialogue model:
//! Input → Dialogue model (+ tools) → TTS → Speaker
//!
//! # Architecture
//!
//! The pipeline is built from independent stages connected by queues:
//! - **Input**: Transcribed utterances or typed text, with optional images
//! - **Orchestrator**: Streams the model's reply and runs tool calls
//! - **TTS**: Synthesizes each complete reply via Gemini speech generation
//! - **Audio playback**: Plays synthesized audio via `cpal` (or a WAV file)
//!
//! A new final input interrupts whatever the previous turn was still
//! saying: queued text and audio are discarded and playback stops at the
//! next write boundary.

pub mod audio;
pub mod config;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod retry;
pub mod stt;
pub mod tools;
pub mod tts;

pub use config::AdaConfig;
pub use error::{AdaError, Result};
pub use pipeline::{InputHandle, PipelineCoordinator, TurnInput, TurnState};
