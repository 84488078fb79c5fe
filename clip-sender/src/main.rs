//! clip-sender — pushes a file or folder across the clipboard.
//!
//! ```text
//! clip-sender send <path>             Send a file or folder
//! clip-sender list                    List every tracked task
//! clip-sender stats                   Aggregate task-store statistics
//! clip-sender cleanup <days>          Remove completed tasks older than <days>
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use clip_core::{Config, SystemClipboard, TaskStore};
use clip_sender::{SenderEngine, SenderEvent, default_state_dir};

#[derive(Parser, Debug)]
#[command(name = "clip-sender", about = "Clipboard file-transfer sender")]
struct Cli {
    /// Path to `config.properties`. Defaults to `$HOME/.cliptransfer/config.properties`.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send a file or folder through the clipboard.
    Send { path: PathBuf },
    /// List every task the store has recorded.
    List,
    /// Print aggregate task-store statistics.
    Stats,
    /// Remove completed tasks whose end time is older than `days` days.
    Cleanup { days: i64 },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let state_dir = default_state_dir();
    std::fs::create_dir_all(&state_dir)?;
    std::fs::create_dir_all(state_dir.join("tasks"))?;
    std::fs::create_dir_all(state_dir.join("logs"))?;

    let config_path = cli
        .config
        .unwrap_or_else(|| state_dir.join("config.properties"));
    if !config_path.exists() {
        Config::write_default(&config_path)?;
    }
    let config = Config::load(&config_path);

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let store = Arc::new(TaskStore::open(state_dir.join("tasks/tasks.json"))?);

    match cli.command {
        Command::Send { path } => send(config, store, &path).await,
        Command::List => {
            for task in store.list() {
                println!(
                    "{}  {:?}  {}  {}/{} chunks",
                    task.task_id,
                    task.status,
                    task.file_name,
                    task.completed_chunks.len(),
                    task.chunk_total
                );
            }
            Ok(())
        }
        Command::Stats => {
            let stats = store.statistics();
            println!("total tasks:        {}", stats.total);
            println!("total bytes:        {}", stats.total_size_bytes);
            println!("completed bytes:    {}", stats.completed_size_bytes);
            for (status, count) in &stats.by_status {
                println!("  {status}: {count}");
            }
            Ok(())
        }
        Command::Cleanup { days } => {
            let removed = store.cleanup_completed(days)?;
            println!("removed {removed} completed task(s) older than {days} day(s)");
            Ok(())
        }
    }
}

async fn send(
    config: Config,
    store: Arc<TaskStore>,
    path: &std::path::Path,
) -> Result<(), Box<dyn std::error::Error>> {
    info!("clip-sender v{}", env!("CARGO_PKG_VERSION"));
    info!("chunk size: {} bytes", config.chunk.size);
    info!("send interval: {} ms", config.send.interval_ms);

    let clipboard = Arc::new(SystemClipboard::new()?);
    let sink = |event: SenderEvent| match event {
        SenderEvent::TaskStarted(task) => {
            info!(task_id = %task.task_id, file = %task.file_name, total = task.chunk_total, "transfer started")
        }
        SenderEvent::Progress { task, completed, total } => {
            info!(task_id = %task.task_id, "{completed}/{total} chunks sent")
        }
        SenderEvent::TaskCompleted(task) => {
            info!(task_id = %task.task_id, "transfer completed")
        }
        SenderEvent::TaskFailed(task, error) => {
            tracing::error!(task_id = %task.task_id, %error, "transfer failed")
        }
        SenderEvent::TaskPaused(task) => info!(task_id = %task.task_id, "transfer paused"),
        SenderEvent::TaskResumed(task) => info!(task_id = %task.task_id, "transfer resumed"),
        SenderEvent::TaskCancelled(task) => info!(task_id = %task.task_id, "transfer cancelled"),
        SenderEvent::Error(message) => tracing::error!(%message, "sender error"),
    };

    let engine = Arc::new(SenderEngine::new(config, store, clipboard, Arc::new(sink)));

    let stop_engine = Arc::clone(&engine);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received — cancelling transfer");
            stop_engine.stop();
        }
    });

    engine.send(path).await?;
    Ok(())
}
