//! Main entrypoint for the RepCoach client
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Building the session from its collaborators (signed URL issuer,
//!    WebSocket connector, camera, audio output, recorder, tools).
//! 3. Driving the session from line commands on stdin until it stops.

use anyhow::Context;
use clap::Parser;
use repcoach_client::{
    audio::TimedPlayback,
    capture::ImageDirSource,
    config::Config,
    form_tool::{FormSnapshotTool, GET_FORM_TOOL},
    orchestrator::{SessionBuilder, SessionHandle},
    recorder::JsonlRecorder,
    signed_url::{HttpSignedUrlIssuer, SignedUrlIssuer, StaticUrl},
    ws::TungsteniteConnector,
};
use repcoach_core::session::SessionState;
use repcoach_core::summary::{DiscardRecorder, SessionRecorder};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

/// Coached workout session against a conversational voice agent.
#[derive(Parser, Debug)]
#[command(name = "coach", about = "Run a coached workout session")]
struct Cli {
    /// Directory of still images used as the camera feed.
    #[arg(long)]
    frames_dir: Option<PathBuf>,

    /// Connect to this WebSocket URL instead of requesting a signed one.
    #[arg(long)]
    url: Option<String>,

    /// Start the countdown immediately instead of waiting for `start`.
    #[arg(long)]
    auto_start: bool,
}

const HELP: &str = "commands: start | cancel | pause | resume | stop | status";

async fn run_command(handle: &SessionHandle, line: &str) {
    let result = match line {
        "start" => handle.start().await,
        "cancel" => handle.cancel_countdown().await,
        "pause" => handle.pause().await,
        "resume" => handle.resume().await,
        "stop" => handle.stop().await,
        "status" => {
            println!("{:?}", handle.status());
            return;
        }
        "" => return,
        _ => {
            println!("{HELP}");
            return;
        }
    };
    if let Err(e) = result {
        println!("{line}: {e}");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Building session...");

    // --- 3. Build the Session ---
    let issuer: Arc<dyn SignedUrlIssuer> = match cli.url {
        Some(url) => Arc::new(StaticUrl(url)),
        None => Arc::new(HttpSignedUrlIssuer::new(
            config.signed_url_base.clone(),
            config.api_key.clone(),
        )),
    };
    let frames_dir = cli.frames_dir.unwrap_or_else(|| config.camera_frames_dir.clone());
    let camera = Arc::new(ImageDirSource::new(
        frames_dir,
        config.frame_width,
        config.frame_height,
    ));
    let recorder: Arc<dyn SessionRecorder> = match &config.session_log_path {
        Some(path) => Arc::new(JsonlRecorder::new(path)),
        None => Arc::new(DiscardRecorder),
    };

    let builder = SessionBuilder::new(
        config.session_settings(),
        issuer,
        Arc::new(TungsteniteConnector),
        camera,
        Arc::new(TimedPlayback),
    )
    .with_recorder(recorder);
    let form_tool = FormSnapshotTool::new(builder.snapshots());
    let handle = builder.register_tool(GET_FORM_TOOL, form_tool).spawn();

    let mut events = handle.events().subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(record) => match serde_json::to_string(&record) {
                    Ok(line) => info!(target: "session_events", "{line}"),
                    Err(e) => warn!(error = %e, "Unserializable session event"),
                },
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Session event log lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    // --- 4. Drive the Session ---
    if cli.auto_start {
        run_command(&handle, "start").await;
    }
    println!("{HELP}");

    let mut status = handle.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line.context("Failed to read stdin")? {
                Some(line) => run_command(&handle, line.trim()).await,
                None => {
                    info!("stdin closed, stopping session");
                    let _ = handle.stop().await;
                    break;
                }
            },
            changed = status.changed() => {
                if changed.is_err() || status.borrow().state == SessionState::Stopped {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal. Stopping session...");
                let _ = handle.stop().await;
                break;
            }
        }
    }

    let summary = handle.join().await.context("Session task failed")?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
