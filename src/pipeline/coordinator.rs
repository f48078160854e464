//! Pipeline coordinator: builds the queues, wires the stages and owns
//! their lifetimes.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::input::{InputHandle, run_transcription_feed};
use super::messages::{AudioItem, TurnReport, TurnState};
use super::orchestrator::DialogueOrchestrator;
use super::output::{OutputSettings, run_output_stage};
use super::queues::PipelineQueues;
use super::synthesis::run_synthesis_stage;
use crate::audio::{AudioDevice, AudioFormat};
use crate::config::{AdaConfig, PipelineConfig};
use crate::error::Result;
use crate::llm::session::ChatSession;
use crate::stt::Transcriber;
use crate::tools::ToolRegistry;
use crate::tts::SpeechSynthesizer;

/// Orchestrates the full input → dialogue → synthesis → playback pipeline.
pub struct PipelineCoordinator {
    pipeline: PipelineConfig,
    format: AudioFormat,
    session: ChatSession,
    registry: Arc<ToolRegistry>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    device: Arc<dyn AudioDevice>,
    transcriber: Option<Box<dyn Transcriber>>,
    state_tx: Option<watch::Sender<TurnState>>,
    report_tx: Option<mpsc::UnboundedSender<TurnReport>>,
    queues: PipelineQueues,
    cancel: CancellationToken,
}

impl std::fmt::Debug for PipelineCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineCoordinator")
            .field("format", &self.format)
            .field("registry", &self.registry)
            .field("transcriber", &self.transcriber.is_some())
            .finish_non_exhaustive()
    }
}

impl PipelineCoordinator {
    /// Create a coordinator from configuration and collaborators.
    pub fn new(
        config: &AdaConfig,
        session: ChatSession,
        registry: Arc<ToolRegistry>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        device: Arc<dyn AudioDevice>,
    ) -> Self {
        let format = AudioFormat {
            sample_rate: config.audio.output_sample_rate,
            channels: config.audio.output_channels,
            ..AudioFormat::default()
        };
        Self {
            pipeline: config.pipeline.clone(),
            format,
            session,
            registry,
            synthesizer,
            device,
            transcriber: None,
            state_tx: None,
            report_tx: None,
            queues: PipelineQueues::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Feed finalized utterances from a speech-to-text source.
    pub fn with_transcriber(mut self, transcriber: Box<dyn Transcriber>) -> Self {
        self.transcriber = Some(transcriber);
        self
    }

    /// Publish orchestrator turn state on `tx`.
    pub fn with_state_events(mut self, tx: watch::Sender<TurnState>) -> Self {
        self.state_tx = Some(tx);
        self
    }

    /// Send a report after every finished turn.
    pub fn with_turn_reports(mut self, tx: mpsc::UnboundedSender<TurnReport>) -> Self {
        self.report_tx = Some(tx);
        self
    }

    /// Handle for submitting text and image input.
    pub fn input_handle(&self) -> InputHandle {
        InputHandle::new(self.queues.clone())
    }

    /// The queues shared by the stages.
    pub fn queues(&self) -> &PipelineQueues {
        &self.queues
    }

    /// Request graceful shutdown of the pipeline.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Get a clone of the cancellation token for external use.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run every stage until cancelled or until input is closed and the
    /// last reply has played.
    ///
    /// Cancellation interrupts playback at the next piece boundary; closing
    /// the input (see [`InputHandle::close`]) lets queued work finish first.
    ///
    /// # Errors
    ///
    /// Currently always `Ok`; stage failures are logged and never
    /// propagate past the pipeline.
    pub async fn run(self) -> Result<()> {
        let Self {
            pipeline,
            format,
            session,
            registry,
            synthesizer,
            device,
            transcriber,
            state_tx,
            report_tx,
            queues,
            cancel,
        } = self;

        let mut orchestrator =
            DialogueOrchestrator::new(session, registry, queues.clone(), &pipeline);
        if let Some(tx) = state_tx {
            orchestrator = orchestrator.with_state_sender(tx);
        }
        if let Some(tx) = report_tx {
            orchestrator = orchestrator.with_turn_reports(tx);
        }

        let output = OutputSettings {
            format,
            chunk_frames: pipeline.write_chunk_frames,
            retry_delay: Duration::from_millis(pipeline.output_retry_delay_ms),
        };

        let mut stages: JoinSet<&'static str> = JoinSet::new();
        stages.spawn({
            let cancel = cancel.clone();
            async move {
                orchestrator.run(cancel).await;
                "orchestrator"
            }
        });
        stages.spawn({
            let (queues, cancel) = (queues.clone(), cancel.clone());
            async move {
                run_synthesis_stage(queues, synthesizer, format, cancel).await;
                "synthesis"
            }
        });
        stages.spawn({
            let queues = queues.clone();
            async move {
                run_output_stage(queues, device, output).await;
                "output"
            }
        });
        if let Some(transcriber) = transcriber {
            let input = InputHandle::new(queues.clone());
            let (retry, cancel) = (pipeline.stt_retry.clone(), cancel.clone());
            stages.spawn(async move {
                run_transcription_feed(transcriber, input, retry, cancel).await;
                "input"
            });
        }
        info!(stages = stages.len(), "pipeline running");

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                joined = stages.join_next() => match joined {
                    Some(joined) => log_stage_exit(joined),
                    None => {
                        info!("pipeline drained and stopped");
                        return Ok(());
                    }
                },
            }
        }

        info!("pipeline shutting down");
        let dropped = queues.audio.len();
        // Advancing the generation cuts off the buffer being played.
        let generation = queues.barge_in();
        queues.audio.push(AudioItem::Stop);
        queues.close();

        while let Some(joined) = stages.join_next().await {
            log_stage_exit(joined);
        }
        info!(generation, audio_dropped = dropped, "pipeline stopped");
        Ok(())
    }
}

fn log_stage_exit(joined: std::result::Result<&'static str, JoinError>) {
    match joined {
        Ok(stage) => debug!(stage, "stage finished"),
        Err(e) => error!("stage task failed: {e}"),
    }
}
