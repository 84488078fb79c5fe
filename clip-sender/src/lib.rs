//! # clip-sender
//!
//! The sender engine: drives exactly one active transfer at a time through a
//! [`ClipboardBackend`], producing a well-formed START / CHUNK* / END
//! sequence, with a pause/resume/stop state machine and a synchronous event
//! sink that mirrors the engine's own ordering.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::Engine as _;
use chrono::Utc;
use uuid::Uuid;

use clip_core::{
    ClipTransferError, ClipboardBackend, Config, Packet, TaskSnapshot, TaskStatus, TaskStore,
    TransferTask, TransferType, archive_folder, compute_chunk_total, encode, md5, md5_file,
};

/// Number of clipboard-publish attempts before a chunk is marked failed.
const PUBLISH_ATTEMPTS: u32 = 3;
const PUBLISH_RETRY_DELAY: Duration = Duration::from_millis(500);
const PAUSE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Events emitted by [`SenderEngine`], delivered synchronously on the
/// engine's own transfer loop so ordering matches the wire order.
#[derive(Debug, Clone)]
pub enum SenderEvent {
    TaskStarted(TaskSnapshot),
    Progress {
        task: TaskSnapshot,
        completed: u32,
        total: u32,
    },
    TaskCompleted(TaskSnapshot),
    TaskFailed(TaskSnapshot, String),
    TaskPaused(TaskSnapshot),
    TaskResumed(TaskSnapshot),
    TaskCancelled(TaskSnapshot),
    Error(String),
}

/// The sink a [`SenderEngine`] delivers events through.
pub trait SenderEventSink: Send + Sync {
    fn handle(&self, event: SenderEvent);
}

impl<F: Fn(SenderEvent) + Send + Sync> SenderEventSink for F {
    fn handle(&self, event: SenderEvent) {
        self(event)
    }
}

/// A sink that drops every event, for callers that only care about the
/// task store's persisted state.
pub struct NullSink;

impl SenderEventSink for NullSink {
    fn handle(&self, _event: SenderEvent) {}
}

/// Drives a single active file (or folder) transfer through a clipboard.
///
/// `send` validates and registers the task, then runs the chunking/publish
/// loop to completion; `pause`/`resume`/`stop` are observed by that loop at
/// its between-chunk polling points, matching the teacher's paced
/// `ScreenService::run` worker-loop shape.
pub struct SenderEngine {
    config: Config,
    store: Arc<TaskStore>,
    clipboard: Arc<dyn ClipboardBackend>,
    sink: Arc<dyn SenderEventSink>,
    current_task_id: Mutex<Option<String>>,
    paused: Arc<AtomicBool>,
    cancelled: Arc<AtomicBool>,
}

impl SenderEngine {
    pub fn new(
        config: Config,
        store: Arc<TaskStore>,
        clipboard: Arc<dyn ClipboardBackend>,
        sink: Arc<dyn SenderEventSink>,
    ) -> Self {
        Self {
            config,
            store,
            clipboard,
            sink,
            current_task_id: Mutex::new(None),
            paused: Arc::new(AtomicBool::new(false)),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.current_task_id.lock().unwrap().is_some()
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn current_task(&self) -> Option<String> {
        self.current_task_id.lock().unwrap().clone()
    }

    /// Sets the paused flag observed at the transfer loop's between-chunk
    /// checks. No-op when idle.
    pub fn pause(&self) {
        if !self.is_running() {
            return;
        }
        if !self.paused.swap(true, Ordering::SeqCst) {
            self.transition(TaskStatus::Paused, SenderEvent::TaskPaused);
        }
    }

    /// Clears the paused flag. No-op when idle.
    pub fn resume(&self) {
        if !self.is_running() {
            return;
        }
        if self.paused.swap(false, Ordering::SeqCst) {
            self.transition(TaskStatus::Running, SenderEvent::TaskResumed);
        }
    }

    /// Requests cancellation, observed at the next between-chunk check.
    /// No-op when idle.
    pub fn stop(&self) {
        if self.is_running() {
            self.cancelled.store(true, Ordering::SeqCst);
        }
    }

    fn transition(&self, status: TaskStatus, event: impl FnOnce(TaskSnapshot) -> SenderEvent) {
        let Some(task_id) = self.current_task() else {
            return;
        };
        let _ = self.store.update(&task_id, |t| t.set_status(status));
        if let Some(snapshot) = self.store.get(&task_id) {
            self.sink.handle(event(snapshot));
        }
    }

    /// Submits `path` for transfer. Rejects only on missing source path; any
    /// failure past that point surfaces as a `TaskFailed` event and a FAILED
    /// task, not as an `Err` here.
    pub async fn send(&self, path: &Path) -> Result<String, ClipTransferError> {
        if self.is_running() {
            return Err(ClipTransferError::Other(
                "a transfer is already in progress".into(),
            ));
        }
        if !path.exists() {
            return Err(ClipTransferError::PathNotFound(path.display().to_string()));
        }

        self.paused.store(false, Ordering::SeqCst);
        self.cancelled.store(false, Ordering::SeqCst);

        let (wire_path, file_name, transfer_type, manifest, cleanup_archive) = if path.is_dir() {
            let (archive_path, manifest) = archive_folder(path)?;
            let stem = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "folder".to_string());
            (archive_path, format!("{stem}.zip"), TransferType::Folder, manifest, true)
        } else {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "file".to_string());
            (path.to_path_buf(), name, TransferType::File, Vec::new(), false)
        };

        let setup = self.prepare_task(path, &wire_path, &file_name, transfer_type, manifest);
        let (task_id, total_size, chunk_total) = match setup {
            Ok(v) => v,
            Err(e) => {
                if cleanup_archive {
                    let _ = std::fs::remove_file(&wire_path);
                }
                return Err(e);
            }
        };

        *self.current_task_id.lock().unwrap() = Some(task_id.clone());
        self.run_transfer(&task_id, &wire_path, total_size, chunk_total, &file_name)
            .await;
        if cleanup_archive {
            let _ = std::fs::remove_file(&wire_path);
        }
        *self.current_task_id.lock().unwrap() = None;

        Ok(task_id)
    }

    fn prepare_task(
        &self,
        source_path: &Path,
        wire_path: &Path,
        file_name: &str,
        transfer_type: TransferType,
        manifest: Vec<clip_core::FolderManifestEntry>,
    ) -> Result<(String, u64, u32), ClipTransferError> {
        let total_size = std::fs::metadata(wire_path)?.len();
        let chunk_size = self.config.chunk.size;
        let chunk_total = compute_chunk_total(total_size, chunk_size);
        let file_md5 = md5_file(wire_path)?;

        let task_id = Uuid::new_v4().to_string();
        let task = TransferTask::new_outbound(
            task_id.clone(),
            file_name.to_string(),
            source_path.display().to_string(),
            transfer_type,
            total_size,
            chunk_size,
            chunk_total,
            file_md5,
            manifest,
        );
        self.store.add(task)?;
        Ok((task_id, total_size, chunk_total))
    }

    async fn run_transfer(
        &self,
        task_id: &str,
        wire_path: &Path,
        total_size: u64,
        chunk_total: u32,
        file_name: &str,
    ) {
        let send_interval = Duration::from_millis(self.config.send.interval_ms);
        let Some(mut snapshot) = self.store.get(task_id) else {
            return;
        };

        let _ = self.store.update(task_id, |t| t.mark_started());
        if let Some(snap) = self.store.get(task_id) {
            self.sink.handle(SenderEvent::TaskStarted(snap));
        }

        let start_packet = Packet::Start {
            file_id: task_id.to_string(),
            file_name: file_name.to_string(),
            transfer_type: snapshot.transfer_type,
            total_size,
            chunk_size: snapshot.chunk_size,
            chunk_total,
            file_md5: snapshot.file_md5.clone().unwrap_or_default(),
            folder_manifest: std::mem::take(&mut snapshot.folder_manifest),
            start_time: Utc::now(),
        };

        let Ok(text) = encode(&start_packet) else {
            self.fail(task_id, "failed to encode START packet".into());
            return;
        };
        if self.publish(&text).await.is_err() {
            self.fail(task_id, "failed to publish START".into());
            return;
        }
        tokio::time::sleep(send_interval).await;

        let mut file = match std::fs::File::open(wire_path) {
            Ok(f) => f,
            Err(e) => {
                self.fail(task_id, format!("failed to open source file: {e}"));
                return;
            }
        };

        let chunk_size = snapshot.chunk_size;
        for index in 0..chunk_total {
            if !self.wait_for_resume_or_cancel(task_id).await {
                return;
            }

            let offset = index as u64 * chunk_size;
            let len = chunk_size.min(total_size - offset);
            let bytes = match read_chunk(&mut file, offset, len) {
                Ok(b) => b,
                Err(e) => {
                    self.fail(task_id, format!("failed to read chunk {index}: {e}"));
                    return;
                }
            };

            let chunk_md5 = md5(&bytes);
            let data = base64::engine::general_purpose::STANDARD.encode(&bytes);
            let chunk_packet = Packet::Chunk {
                file_id: task_id.to_string(),
                chunk_index: index,
                chunk_total,
                chunk_md5,
                data,
                send_time: Utc::now(),
            };

            match encode(&chunk_packet) {
                Ok(text) => match self.publish(&text).await {
                    Ok(()) => {
                        let _ = self
                            .store
                            .update(task_id, |t| t.mark_chunk_complete(index, len));
                    }
                    Err(_) => {
                        tracing::warn!(task_id, chunk = index, "clipboard publish failed after retries");
                        let _ = self
                            .store
                            .update(task_id, |t| t.mark_chunk_failed(index, "clipboard write failed"));
                    }
                },
                Err(e) => {
                    let _ = self
                        .store
                        .update(task_id, |t| t.mark_chunk_failed(index, e.to_string()));
                }
            }

            if let Some(snap) = self.store.get(task_id) {
                let completed = snap.completed_chunks.len() as u32;
                self.sink.handle(SenderEvent::Progress {
                    task: snap,
                    completed,
                    total: chunk_total,
                });
            }

            tokio::time::sleep(send_interval).await;
        }

        let end_packet = Packet::End {
            file_id: task_id.to_string(),
            file_name: file_name.to_string(),
            chunk_total,
            end_time: Utc::now(),
        };
        let Ok(text) = encode(&end_packet) else {
            self.fail(task_id, "failed to encode END packet".into());
            return;
        };
        if self.publish(&text).await.is_err() {
            self.fail(task_id, "failed to publish END".into());
            return;
        }

        let _ = self
            .store
            .update(task_id, |t| t.mark_finished(TaskStatus::Completed));
        if let Some(snap) = self.store.get(task_id) {
            tracing::info!(task_id, "transfer completed");
            self.sink.handle(SenderEvent::TaskCompleted(snap));
        }
    }

    /// Returns `false` if the transfer was cancelled while waiting (caller
    /// should stop the loop); `true` once no longer paused.
    async fn wait_for_resume_or_cancel(&self, task_id: &str) -> bool {
        loop {
            if self.cancelled.load(Ordering::SeqCst) {
                let _ = self
                    .store
                    .update(task_id, |t| t.mark_finished(TaskStatus::Cancelled));
                if let Some(snap) = self.store.get(task_id) {
                    tracing::info!(task_id, "transfer cancelled");
                    self.sink.handle(SenderEvent::TaskCancelled(snap));
                }
                return false;
            }
            if !self.paused.load(Ordering::SeqCst) {
                return true;
            }
            tokio::time::sleep(PAUSE_POLL_INTERVAL).await;
        }
    }

    fn fail(&self, task_id: &str, message: String) {
        tracing::error!(task_id, error = %message, "transfer failed");
        let _ = self.store.update(task_id, |t| {
            t.set_error(message.clone());
            t.mark_finished(TaskStatus::Failed);
        });
        if let Some(snap) = self.store.get(task_id) {
            self.sink.handle(SenderEvent::TaskFailed(snap, message));
        } else {
            self.sink.handle(SenderEvent::Error(message));
        }
    }

    /// Writes `text` into the clipboard, retrying up to [`PUBLISH_ATTEMPTS`]
    /// times with [`PUBLISH_RETRY_DELAY`] spacing.
    async fn publish(&self, text: &str) -> Result<(), ClipTransferError> {
        let mut last_err = None;
        for attempt in 0..PUBLISH_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(PUBLISH_RETRY_DELAY).await;
            }
            match self.clipboard.set_text(text) {
                Ok(()) => return Ok(()),
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or(ClipTransferError::ClipboardWriteFailed))
    }
}

fn read_chunk(file: &mut std::fs::File, offset: u64, len: u64) -> std::io::Result<Vec<u8>> {
    use std::io::{Read, Seek, SeekFrom};
    file.seek(SeekFrom::Start(offset))?;
    let mut buf = vec![0u8; len as usize];
    file.read_exact(&mut buf)?;
    Ok(buf)
}

/// Resolves the default config/journal paths under `$HOME/.cliptransfer/`.
pub fn default_state_dir() -> PathBuf {
    let home = std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    home.join(".cliptransfer")
}
