//! clip-receiver — listens on the clipboard and reassembles incoming
//! transfers into `$HOME/.cliptransfer/` (or a directory given on the
//! command line).
//!
//! ```text
//! clip-receiver                       Listen with the saved/default config
//! clip-receiver --download-dir <dir>  Override the output directory
//! clip-receiver --config <path>       Load a custom config.properties
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use clip_core::{Config, SystemClipboard, TaskStore};
use clip_receiver::{ReceiverEngine, ReceiverEvent, default_state_dir};

#[derive(Parser, Debug)]
#[command(name = "clip-receiver", about = "Clipboard file-transfer receiver")]
struct Cli {
    /// Path to `config.properties`. Defaults to `$HOME/.cliptransfer/config.properties`.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Overrides the configured download directory for this run.
    #[arg(long)]
    download_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let state_dir = default_state_dir();
    std::fs::create_dir_all(&state_dir)?;
    std::fs::create_dir_all(state_dir.join("tasks"))?;
    std::fs::create_dir_all(state_dir.join("logs"))?;

    let config_path = cli.config.unwrap_or_else(|| state_dir.join("config.properties"));
    if !config_path.exists() {
        clip_core::Config::write_default(&config_path)?;
    }
    let mut config = Config::load(&config_path);
    if let Some(dir) = cli.download_dir {
        config.download.path = dir;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("clip-receiver v{}", env!("CARGO_PKG_VERSION"));
    info!("download directory: {}", config.download.path.display());
    info!("receive interval: {} ms", config.receive.interval_ms);

    let store = Arc::new(TaskStore::open(state_dir.join("tasks/tasks.json"))?);
    let clipboard = Arc::new(SystemClipboard::new()?);
    let sink = |event: ReceiverEvent| match event {
        ReceiverEvent::ListeningStarted => info!("listening for incoming transfers"),
        ReceiverEvent::ListeningStopped => info!("stopped listening"),
        ReceiverEvent::TaskStarted(task) => {
            info!(task_id = %task.task_id, file = %task.file_name, "transfer started")
        }
        ReceiverEvent::Progress { task, completed, total } => {
            info!(task_id = %task.task_id, "{completed}/{total} chunks received")
        }
        ReceiverEvent::TaskCompleted(task, path) => {
            info!(task_id = %task.task_id, output = %path.display(), "transfer completed")
        }
        ReceiverEvent::TaskFailed(task, error) => {
            tracing::error!(task_id = %task.task_id, %error, "transfer failed")
        }
        ReceiverEvent::TaskIncomplete(task, missing) => {
            tracing::warn!(task_id = %task.task_id, ?missing, "transfer ended with missing chunks")
        }
        ReceiverEvent::Error(message) => tracing::error!(%message, "receiver error"),
    };

    let engine = ReceiverEngine::new(config, store, clipboard, Arc::new(sink));
    engine.start_listening();

    tokio::signal::ctrl_c().await?;
    info!("Ctrl-C received — shutting down");
    engine.stop_listening();

    Ok(())
}
