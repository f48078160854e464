//! CLI binary for ada.

use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use ada::audio::{AudioDevice, CpalDevice, WavDevice, list_output_devices};
use ada::llm::{ChatSession, build_provider, request_options};
use ada::pipeline::{Attachment, InputHandle, TurnReport};
use ada::stt::LineTranscriber;
use ada::tools::builtin_registry;
use ada::tts::GeminiTts;
use ada::{AdaConfig, PipelineCoordinator, TurnInput};
use anyhow::Context as _;
use clap::{Parser, Subcommand};
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Ada: a voice and text conversational agent.
#[derive(Parser)]
#[command(name = "ada", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write logs to daily rolling files in this directory instead of stderr.
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Write speech to this WAV file instead of the speakers.
    #[arg(long)]
    wav: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    command: Option<Command>,
}

/// Available commands.
#[derive(Subcommand)]
enum Command {
    /// Type to talk with Ada.
    Chat,

    /// Treat each stdin line as a transcribed utterance.
    Listen,

    /// List available audio output devices.
    Devices,

    /// Print the effective configuration (API keys omitted).
    Config,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _log_guard = init_logging(cli.log_dir.as_deref())?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    let result = runtime.block_on(run(cli));
    // A blocking stdin read may still be parked on a worker thread.
    runtime.shutdown_timeout(Duration::from_millis(500));
    result
}

fn init_logging(log_dir: Option<&Path>) -> anyhow::Result<Option<WorkerGuard>> {
    // Users can override with RUST_LOG=debug to see everything.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("ada=info,hyper=warn,reqwest=warn"));

    match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("cannot create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, "ada.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Ok(Some(guard))
        }
        None => {
            // Stdout carries the conversation; logs go to stderr.
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
            Ok(None)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = AdaConfig::load(cli.config.as_deref())?;
    config.apply_env();

    match cli.command.unwrap_or(Command::Chat) {
        Command::Chat => run_chat(config, cli.wav).await,
        Command::Listen => run_listen(config, cli.wav).await,
        Command::Devices => list_devices(),
        Command::Config => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

fn build_pipeline(config: &AdaConfig, wav: Option<PathBuf>) -> anyhow::Result<PipelineCoordinator> {
    let provider = build_provider(&config.llm)?;
    let registry = Arc::new(builtin_registry(&config.tools));
    info!(tools = ?registry.names(), "tools registered");

    let session = ChatSession::new(provider, &config.llm.system_prompt, registry.definitions())
        .with_options(request_options(&config.llm))
        .with_max_history(config.llm.max_history_messages)
        .with_retry(config.pipeline.send_retry.clone());
    let synthesizer = Arc::new(GeminiTts::new(&config.tts)?);
    let device: Arc<dyn AudioDevice> = match wav {
        Some(path) => Arc::new(WavDevice::new(path)),
        None => Arc::new(CpalDevice::new(config.audio.output_device.clone())),
    };

    Ok(PipelineCoordinator::new(
        config,
        session,
        registry,
        synthesizer,
        device,
    ))
}

fn cancel_on_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received Ctrl+C, shutting down...");
            cancel.cancel();
        }
    });
}

/// Print each finished turn's reply until the pipeline drops its sender.
fn print_replies(mut reports: mpsc::UnboundedReceiver<TurnReport>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(report) = reports.recv().await {
            let reply = report.reply.trim();
            if !reply.is_empty() {
                println!("Ada: {reply}");
            }
            if let Some(error) = report.error {
                println!("(turn failed: {error})");
            }
            print!("> ");
            let _ = std::io::stdout().flush();
        }
    })
}

async fn run_chat(config: AdaConfig, wav: Option<PathBuf>) -> anyhow::Result<()> {
    println!("Ada v{}", env!("CARGO_PKG_VERSION"));

    let (report_tx, report_rx) = mpsc::unbounded_channel();
    let pipeline = build_pipeline(&config, wav)?.with_turn_reports(report_tx);
    let cancel = pipeline.cancel_token();
    let input = pipeline.input_handle();
    cancel_on_ctrl_c(cancel.clone());
    let printer = print_replies(report_rx);

    let pipeline_task = tokio::spawn(pipeline.run());

    println!("\nReady! Type a message, `:image <path>` to attach a picture, or `exit` to quit.\n");
    print!("> ");
    let _ = std::io::stdout().flush();
    read_chat_lines(&input, &cancel).await;

    // `exit` or end of stdin: finish the turn in flight, then stop.
    // Ctrl-C still cancels immediately.
    input.close();
    pipeline_task.await??;
    let _ = printer.await;
    Ok(())
}

async fn read_chat_lines(input: &InputHandle, cancel: &CancellationToken) {
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    let mut attachment: Option<Attachment> = None;

    loop {
        let line = tokio::select! {
            () = cancel.cancelled() => return,
            line = lines.next_line() => match line {
                Ok(Some(line)) => line,
                Ok(None) => return,
                Err(e) => {
                    warn!("stdin read failed: {e}");
                    return;
                }
            },
        };
        let line = line.trim();
        if line.eq_ignore_ascii_case("exit") {
            return;
        }
        if let Some(path) = line.strip_prefix(":image") {
            match load_image(Path::new(path.trim())) {
                Ok(image) => {
                    println!("(image attached: {})", image.mime_type);
                    attachment = Some(image);
                }
                Err(e) => println!("(cannot attach image: {e:#})"),
            }
            print!("> ");
            let _ = std::io::stdout().flush();
            continue;
        }

        let mut turn = TurnInput::text(line);
        if let Some(image) = attachment.take() {
            turn = turn.with_attachment(image);
        }
        if input.submit(turn).is_none() {
            print!("> ");
            let _ = std::io::stdout().flush();
        }
    }
}

fn load_image(path: &Path) -> anyhow::Result<Attachment> {
    let data =
        std::fs::read(path).with_context(|| format!("cannot read {}", path.display()))?;
    Ok(Attachment::from_bytes(data)?)
}

async fn run_listen(config: AdaConfig, wav: Option<PathBuf>) -> anyhow::Result<()> {
    println!("Ada v{} - Listening on stdin", env!("CARGO_PKG_VERSION"));

    let transcriber = LineTranscriber::new(std::io::BufReader::new(std::io::stdin()))
        .with_min_chars(config.stt.min_utterance_chars);
    let (report_tx, report_rx) = mpsc::unbounded_channel();
    let pipeline = build_pipeline(&config, wav)?
        .with_transcriber(Box::new(transcriber))
        .with_turn_reports(report_tx);
    cancel_on_ctrl_c(pipeline.cancel_token());
    let printer = print_replies(report_rx);

    println!("\nReady! Each line is one utterance. Press Ctrl+C to stop.\n");
    pipeline.run().await?;
    let _ = printer.await;
    Ok(())
}

fn list_devices() -> anyhow::Result<()> {
    println!("Output devices:");
    for name in list_output_devices()? {
        println!("  - {name}");
    }
    Ok(())
}
