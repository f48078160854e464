//! The interruptible turn pipeline.
//!
//! ```text
//! input ─▶ turn slot ─▶ orchestrator ─▶ responses ─▶ synthesis ─▶ audio ─▶ output
//! ```
//!
//! Each final input is a barge-in: it advances the generation and flushes
//! the response and audio queues before landing in the turn slot.

pub mod coordinator;
pub mod input;
pub mod messages;
pub mod orchestrator;
pub mod output;
pub mod queues;
pub mod synthesis;

pub use coordinator::PipelineCoordinator;
pub use input::{InputHandle, run_transcription_feed};
pub use messages::{
    Attachment, AudioBuffer, AudioItem, ResponseItem, ResponseKind, TurnInput, TurnReport,
    TurnState,
};
pub use orchestrator::DialogueOrchestrator;
pub use output::{OutputSettings, run_output_stage};
pub use queues::{FlushableQueue, GenerationCounter, PipelineQueues, TurnSlot};
pub use synthesis::run_synthesis_stage;
