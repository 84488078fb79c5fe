//! # clip-receiver
//!
//! The receiver engine: polls a [`ClipboardBackend`] at a fixed delay,
//! recognizes protocol packets, and reassembles files into chunk buffers
//! keyed by `file_id`. Polling and assembly run on separate Tokio tasks so a
//! large file's final write never blocks the next poll tick — mirroring the
//! teacher's split between a capture loop and the work it triggers.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::Engine as _;
use dashmap::DashMap;
use tokio::task::JoinHandle;

use clip_core::{
    ClipTransferError, ClipboardBackend, Config, Packet, TaskSnapshot, TaskStatus, TaskStore,
    TransferTask, TransferType, decode, extract_archive, md5, md5_file,
};

/// Per-file in-memory assembly state, held from START until finalization.
struct AssemblyBuffer {
    chunks: BTreeMap<u32, Vec<u8>>,
    file_name: String,
    chunk_total: u32,
}

/// Events emitted by [`ReceiverEngine`], delivered synchronously on the
/// worker that produced them (poll loop for protocol events, assembly task
/// for completion/failure).
#[derive(Debug, Clone)]
pub enum ReceiverEvent {
    ListeningStarted,
    ListeningStopped,
    TaskStarted(TaskSnapshot),
    Progress {
        task: TaskSnapshot,
        completed: u32,
        total: u32,
    },
    TaskCompleted(TaskSnapshot, PathBuf),
    TaskFailed(TaskSnapshot, String),
    TaskIncomplete(TaskSnapshot, Vec<u32>),
    Error(String),
}

/// The sink a [`ReceiverEngine`] delivers events through.
pub trait ReceiverEventSink: Send + Sync {
    fn handle(&self, event: ReceiverEvent);
}

impl<F: Fn(ReceiverEvent) + Send + Sync> ReceiverEventSink for F {
    fn handle(&self, event: ReceiverEvent) {
        self(event)
    }
}

/// A sink that drops every event.
pub struct NullSink;

impl ReceiverEventSink for NullSink {
    fn handle(&self, _event: ReceiverEvent) {}
}

/// Polls a clipboard for transfer packets and reassembles files.
///
/// Must be held behind an `Arc` to call [`start_listening`](Self::start_listening):
/// the poll loop and any in-flight assembly both need a shared handle back
/// into the engine.
pub struct ReceiverEngine {
    config: Config,
    store: Arc<TaskStore>,
    clipboard: Arc<dyn ClipboardBackend>,
    sink: Arc<dyn ReceiverEventSink>,
    listening: Arc<AtomicBool>,
    last_observed: Mutex<Option<String>>,
    buffers: DashMap<String, AssemblyBuffer>,
    poll_handle: Mutex<Option<JoinHandle<()>>>,
}

impl ReceiverEngine {
    pub fn new(
        config: Config,
        store: Arc<TaskStore>,
        clipboard: Arc<dyn ClipboardBackend>,
        sink: Arc<dyn ReceiverEventSink>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            store,
            clipboard,
            sink,
            listening: Arc::new(AtomicBool::new(false)),
            last_observed: Mutex::new(None),
            buffers: DashMap::new(),
            poll_handle: Mutex::new(None),
        })
    }

    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }

    /// `file_id`s of every transfer currently being assembled.
    pub fn receiving_tasks(&self) -> Vec<String> {
        self.buffers.iter().map(|e| e.key().clone()).collect()
    }

    /// Starts the polling worker. Idempotent: a second call while already
    /// listening is a no-op.
    pub fn start_listening(self: &Arc<Self>) {
        if self.listening.swap(true, Ordering::SeqCst) {
            return;
        }
        self.sink.handle(ReceiverEvent::ListeningStarted);

        let engine = Arc::clone(self);
        let interval = Duration::from_millis(self.config.receive.interval_ms);
        let handle = tokio::spawn(async move {
            while engine.listening.load(Ordering::SeqCst) {
                engine.poll_tick();
                tokio::time::sleep(interval).await;
            }
        });
        *self.poll_handle.lock().unwrap() = Some(handle);
    }

    /// Stops the polling worker. Idempotent.
    pub fn stop_listening(&self) {
        if !self.listening.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.poll_handle.lock().unwrap().take() {
            handle.abort();
        }
        self.sink.handle(ReceiverEvent::ListeningStopped);
    }

    /// One poll tick: read, dedup-latch, decode, dispatch. Never panics and
    /// never blocks past a single clipboard read.
    fn poll_tick(self: &Arc<Self>) {
        let text = match self.clipboard.get_text() {
            Ok(Some(t)) => t,
            Ok(None) => return,
            Err(e) => {
                self.sink.handle(ReceiverEvent::Error(e.to_string()));
                return;
            }
        };

        {
            let mut last = self.last_observed.lock().unwrap();
            if last.as_deref() == Some(text.as_str()) {
                return;
            }
            // Latch unconditionally, even if decode rejects below — a
            // malformed sample still "claims" the slot so stable user text
            // reappearing unchanged does not get reprocessed.
            *last = Some(text.clone());
        }

        let packet = match decode(&text) {
            Ok(p) => p,
            Err(_) => return,
        };

        match packet {
            Packet::Start { .. } => self.handle_start(packet),
            Packet::Chunk { .. } => self.handle_chunk(packet),
            Packet::End { .. } => self.handle_end(packet),
        }
    }

    fn handle_start(&self, packet: Packet) {
        let Packet::Start {
            file_id,
            file_name,
            transfer_type,
            total_size,
            chunk_size,
            chunk_total,
            file_md5,
            folder_manifest,
            ..
        } = packet
        else {
            return;
        };

        if self.buffers.contains_key(&file_id) {
            // Duplicate START for an already-assembling transfer.
            return;
        }

        let task = TransferTask::new_inbound(
            file_id.clone(),
            file_name.clone(),
            transfer_type,
            total_size,
            chunk_size,
            chunk_total,
            if file_md5.is_empty() { None } else { Some(file_md5) },
            folder_manifest,
        );
        if let Err(e) = self.store.add(task) {
            self.sink.handle(ReceiverEvent::Error(e.to_string()));
            return;
        }

        self.buffers.insert(
            file_id.clone(),
            AssemblyBuffer {
                chunks: BTreeMap::new(),
                file_name,
                chunk_total,
            },
        );

        if let Some(snap) = self.store.get(&file_id) {
            tracing::info!(task_id = %file_id, "transfer started");
            self.sink.handle(ReceiverEvent::TaskStarted(snap));
        }
    }

    fn handle_chunk(&self, packet: Packet) {
        let Packet::Chunk {
            file_id,
            chunk_index,
            chunk_md5,
            data,
            ..
        } = packet
        else {
            return;
        };

        let Some(mut buffer) = self.buffers.get_mut(&file_id) else {
            return;
        };
        if buffer.chunks.contains_key(&chunk_index) {
            return;
        }

        let Ok(bytes) = base64::engine::general_purpose::STANDARD.decode(data.as_bytes()) else {
            let _ = self
                .store
                .update(&file_id, |t| t.mark_chunk_failed(chunk_index, "base64 decode failed"));
            return;
        };

        if md5(&bytes) != chunk_md5 {
            let reason = ClipTransferError::ChunkIntegrity(chunk_index);
            tracing::warn!(task_id = %file_id, chunk = chunk_index, "chunk integrity check failed");
            let _ = self
                .store
                .update(&file_id, |t| t.mark_chunk_failed(chunk_index, reason.to_string()));
            return;
        }

        let len = bytes.len() as u64;
        buffer.chunks.insert(chunk_index, bytes);
        drop(buffer);

        let _ = self
            .store
            .update(&file_id, |t| t.mark_chunk_complete(chunk_index, len));

        if let Some(snap) = self.store.get(&file_id) {
            let completed = snap.completed_chunks.len() as u32;
            let total = snap.chunk_total;
            self.sink.handle(ReceiverEvent::Progress {
                task: snap,
                completed,
                total,
            });
        }
    }

    fn handle_end(self: &Arc<Self>, packet: Packet) {
        let Packet::End { file_id, .. } = packet else {
            return;
        };

        let Some(task) = self.store.get(&file_id) else {
            return;
        };
        if !self.buffers.contains_key(&file_id) {
            return;
        }

        let ready = task.completed_chunks.len() as u32 == task.chunk_total && task.failed_chunks.is_empty();
        if !ready {
            let missing: Vec<u32> = (0..task.chunk_total)
                .filter(|i| !task.completed_chunks.contains(i))
                .collect();
            tracing::info!(task_id = %file_id, missing = ?missing, "END received before transfer complete");
            self.sink.handle(ReceiverEvent::TaskIncomplete(task, missing));
            return;
        }

        let engine = Arc::clone(self);
        tokio::spawn(async move { engine.assemble(file_id).await });
    }

    /// Drains the assembly buffer for `file_id` into the download directory,
    /// verifies the whole-file hash, extracts a folder archive if
    /// applicable, then marks the task terminal and evicts the buffer.
    async fn assemble(&self, file_id: String) {
        let Some((_, buffer)) = self.buffers.remove(&file_id) else {
            return;
        };
        let Some(task) = self.store.get(&file_id) else {
            return;
        };

        if let Err(e) = std::fs::create_dir_all(&self.config.download.path) {
            self.fail(&file_id, format!("cannot create download directory: {e}"));
            return;
        }

        let target = unique_path(&self.config.download.path, &buffer.file_name);
        if let Err(e) = write_assembly(&target, &buffer) {
            self.fail(&file_id, e.to_string());
            return;
        }

        if let Some(expected) = task.file_md5.as_deref() {
            match md5_file(&target) {
                Ok(actual) if actual.eq_ignore_ascii_case(expected) => {}
                Ok(actual) => {
                    self.fail(
                        &file_id,
                        ClipTransferError::FileIntegrity {
                            expected: expected.to_string(),
                            actual,
                        }
                        .to_string(),
                    );
                    return;
                }
                Err(e) => {
                    self.fail(&file_id, format!("failed to verify file hash: {e}"));
                    return;
                }
            }
        }

        let output_path = if task.transfer_type == TransferType::Folder {
            let dir_name = target
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "folder".to_string());
            let out_dir = unique_path_dir(&self.config.download.path, &dir_name);
            if let Err(e) = extract_archive(&target, &out_dir, Some(&task.folder_manifest)) {
                self.fail(&file_id, format!("archive extraction failed: {e}"));
                return;
            }
            let _ = std::fs::remove_file(&target);
            out_dir
        } else {
            target
        };

        let _ = self
            .store
            .update(&file_id, |t| t.mark_finished(TaskStatus::Completed));
        if let Some(snap) = self.store.get(&file_id) {
            tracing::info!(task_id = %file_id, output = %output_path.display(), "transfer completed");
            self.sink
                .handle(ReceiverEvent::TaskCompleted(snap, output_path));
        }
    }

    fn fail(&self, file_id: &str, message: String) {
        tracing::error!(task_id = %file_id, error = %message, "assembly failed");
        let _ = self.store.update(file_id, |t| {
            t.set_error(message.clone());
            t.mark_finished(TaskStatus::Failed);
        });
        if let Some(snap) = self.store.get(file_id) {
            self.sink.handle(ReceiverEvent::TaskFailed(snap, message));
        } else {
            self.sink.handle(ReceiverEvent::Error(message));
        }
    }
}

/// Writes every chunk of `buffer` to `target` in index order. Any missing
/// index fails the whole assembly and removes the partial file.
fn write_assembly(target: &Path, buffer: &AssemblyBuffer) -> Result<(), ClipTransferError> {
    use std::io::Write;

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(target)
        .map_err(ClipTransferError::Io)?;

    for index in 0..buffer.chunk_total {
        match buffer.chunks.get(&index) {
            Some(bytes) => file.write_all(bytes).map_err(ClipTransferError::Io)?,
            None => {
                drop(file);
                let _ = std::fs::remove_file(target);
                return Err(ClipTransferError::Other(format!(
                    "missing chunk {index} during assembly"
                )));
            }
        }
    }
    file.flush().map_err(ClipTransferError::Io)?;
    Ok(())
}

/// Resolves `dir/file_name` to a path that does not yet exist, appending
/// `_1`, `_2`, … before the extension on collision.
fn unique_path(dir: &Path, file_name: &str) -> PathBuf {
    let candidate = dir.join(file_name);
    if !candidate.exists() {
        return candidate;
    }

    let path = Path::new(file_name);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| file_name.to_string());
    let ext = path.extension().map(|e| e.to_string_lossy().into_owned());

    let mut n = 1u32;
    loop {
        let candidate_name = match &ext {
            Some(ext) => format!("{stem}_{n}.{ext}"),
            None => format!("{stem}_{n}"),
        };
        let candidate = dir.join(candidate_name);
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}

/// Same collision-avoidance as [`unique_path`], for a directory name that
/// has no extension to preserve.
fn unique_path_dir(dir: &Path, name: &str) -> PathBuf {
    let candidate = dir.join(name);
    if !candidate.exists() {
        return candidate;
    }
    let mut n = 1u32;
    loop {
        let candidate = dir.join(format!("{name}_{n}"));
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}

/// Resolves the default config/journal paths under `$HOME/.cliptransfer/`.
pub fn default_state_dir() -> PathBuf {
    let home = std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    home.join(".cliptransfer")
}

#[cfg(test)]
mod tests {
    use super::*;
    use clip_core::{Config, InMemoryClipboard, encode};
    use std::sync::Mutex as StdMutex;
    use std::time::Duration as StdDuration;

    fn engine_with(
        clipboard: Arc<InMemoryClipboard>,
    ) -> (Arc<ReceiverEngine>, Arc<TaskStore>, Arc<StdMutex<Vec<ReceiverEvent>>>, PathBuf) {
        let journal_dir = tempfile::tempdir().unwrap();
        let store = Arc::new(TaskStore::open(journal_dir.path().join("tasks.json")).unwrap());
        std::mem::forget(journal_dir);

        let download_tmp = tempfile::tempdir().unwrap();
        let download_dir = download_tmp.path().to_path_buf();
        std::mem::forget(download_tmp);
        let mut config = Config::default();
        config.download.path = download_dir.clone();
        config.receive.interval_ms = 5;

        let events = Arc::new(StdMutex::new(Vec::new()));
        let events_clone = events.clone();
        let sink = move |e: ReceiverEvent| events_clone.lock().unwrap().push(e);

        let engine = ReceiverEngine::new(config, store.clone(), clipboard, Arc::new(sink));
        (engine, store, events, download_dir)
    }

    fn start_packet(file_id: &str, total_size: u64, chunk_size: u64, chunk_total: u32, md5: &str) -> Packet {
        Packet::Start {
            file_id: file_id.into(),
            file_name: "payload.bin".into(),
            transfer_type: TransferType::File,
            total_size,
            chunk_size,
            chunk_total,
            file_md5: md5.into(),
            folder_manifest: Vec::new(),
            start_time: chrono::Utc::now(),
        }
    }

    fn chunk_packet(file_id: &str, index: u32, total: u32, bytes: &[u8]) -> Packet {
        Packet::Chunk {
            file_id: file_id.into(),
            chunk_index: index,
            chunk_total: total,
            chunk_md5: md5(bytes),
            data: base64::engine::general_purpose::STANDARD.encode(bytes),
            send_time: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn duplicate_start_creates_one_task() {
        let clipboard = Arc::new(InMemoryClipboard::new());
        let (engine, store, _events, _dir) = engine_with(clipboard.clone());

        let pkt = start_packet("dup-1", 10, 5, 2, "abc");
        let text = encode(&pkt).unwrap();
        clipboard.set_text(&text).unwrap();
        engine.poll_tick();
        clipboard.set_text(&text).unwrap();
        engine.poll_tick();

        assert_eq!(store.list().len(), 1);
        assert_eq!(engine.receiving_tasks().len(), 1);
    }

    #[tokio::test]
    async fn chunk_reordering_assembles_correctly() {
        let data = vec![9u8; 3];
        let whole = [data.clone(), data.clone(), vec![1u8]].concat();
        let file_md5 = md5(&whole);

        let clipboard = Arc::new(InMemoryClipboard::new());
        let (engine, store, events, dir) = engine_with(clipboard.clone());

        let start = start_packet("reorder-1", 7, 3, 3, &file_md5);
        clipboard.set_text(&encode(&start).unwrap()).unwrap();
        engine.poll_tick();

        let c0 = chunk_packet("reorder-1", 0, 3, &data);
        let c1 = chunk_packet("reorder-1", 1, 3, &data);
        let c2 = chunk_packet("reorder-1", 2, 3, &[1u8]);

        for pkt in [&c2, &c0, &c1] {
            clipboard.set_text(&encode(pkt).unwrap()).unwrap();
            engine.poll_tick();
        }

        let end = Packet::End {
            file_id: "reorder-1".into(),
            file_name: "payload.bin".into(),
            chunk_total: 3,
            end_time: chrono::Utc::now(),
        };
        clipboard.set_text(&encode(&end).unwrap()).unwrap();
        engine.poll_tick();

        tokio::time::sleep(StdDuration::from_millis(50)).await;

        let snap = store.get("reorder-1").unwrap();
        assert_eq!(snap.status, TaskStatus::Completed);
        assert_eq!(std::fs::read(dir.join("payload.bin")).unwrap(), whole);
        assert!(events
            .lock()
            .unwrap()
            .iter()
            .any(|e| matches!(e, ReceiverEvent::TaskCompleted(..))));
    }

    #[tokio::test]
    async fn corrupt_chunk_reports_incomplete_and_writes_nothing() {
        let clipboard = Arc::new(InMemoryClipboard::new());
        let (engine, store, events, dir) = engine_with(clipboard.clone());

        let start = start_packet("corrupt-1", 6, 3, 2, "deadbeef");
        clipboard.set_text(&encode(&start).unwrap()).unwrap();
        engine.poll_tick();

        let good = chunk_packet("corrupt-1", 0, 2, &[1, 2, 3]);
        clipboard.set_text(&encode(&good).unwrap()).unwrap();
        engine.poll_tick();

        // Corrupt chunk 1: correct md5 field from different bytes than `data`.
        let mut corrupted = chunk_packet("corrupt-1", 1, 2, &[4, 5, 6]);
        if let Packet::Chunk { ref mut data, .. } = corrupted {
            *data = base64::engine::general_purpose::STANDARD.encode([9, 9, 9]);
        }
        clipboard.set_text(&encode(&corrupted).unwrap()).unwrap();
        engine.poll_tick();

        let end = Packet::End {
            file_id: "corrupt-1".into(),
            file_name: "payload.bin".into(),
            chunk_total: 2,
            end_time: chrono::Utc::now(),
        };
        clipboard.set_text(&encode(&end).unwrap()).unwrap();
        engine.poll_tick();

        let snap = store.get("corrupt-1").unwrap();
        assert!(!snap.status.is_terminal());
        assert!(!dir.join("payload.bin").exists());
        assert!(events
            .lock()
            .unwrap()
            .iter()
            .any(|e| matches!(e, ReceiverEvent::TaskIncomplete(_, missing) if missing == &vec![1])));
    }

    #[tokio::test]
    async fn folder_manifest_roundtrip_extracts_directory() {
        let src = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join("a.txt"), b"x").unwrap();
        std::fs::create_dir_all(src.path().join("sub")).unwrap();
        std::fs::write(src.path().join("sub/b.bin"), vec![2u8; 256]).unwrap();

        let (archive_path, manifest) = clip_core::archive_folder(src.path()).unwrap();
        let archive_bytes = std::fs::read(&archive_path).unwrap();
        let file_md5 = md5(&archive_bytes);
        let _ = std::fs::remove_file(&archive_path);

        let clipboard = Arc::new(InMemoryClipboard::new());
        let (engine, store, _events, dir) = engine_with(clipboard.clone());

        let chunk_size = 4096u64;
        let chunk_total = clip_core::compute_chunk_total(archive_bytes.len() as u64, chunk_size);
        let start = Packet::Start {
            file_id: "folder-1".into(),
            file_name: "photos.zip".into(),
            transfer_type: TransferType::Folder,
            total_size: archive_bytes.len() as u64,
            chunk_size,
            chunk_total,
            file_md5,
            folder_manifest: manifest.clone(),
            start_time: chrono::Utc::now(),
        };
        clipboard.set_text(&encode(&start).unwrap()).unwrap();
        engine.poll_tick();

        for (i, chunk) in archive_bytes.chunks(chunk_size as usize).enumerate() {
            let pkt = chunk_packet("folder-1", i as u32, chunk_total, chunk);
            clipboard.set_text(&encode(&pkt).unwrap()).unwrap();
            engine.poll_tick();
        }

        let end = Packet::End {
            file_id: "folder-1".into(),
            file_name: "photos.zip".into(),
            chunk_total,
            end_time: chrono::Utc::now(),
        };
        clipboard.set_text(&encode(&end).unwrap()).unwrap();
        engine.poll_tick();

        tokio::time::sleep(StdDuration::from_millis(50)).await;

        let snap = store.get("folder-1").unwrap();
        assert_eq!(snap.status, TaskStatus::Completed);
        assert_eq!(std::fs::read(dir.join("photos").join("a.txt")).unwrap(), b"x");
        assert_eq!(
            std::fs::read(dir.join("photos").join("sub/b.bin")).unwrap(),
            vec![2u8; 256]
        );
        assert!(!dir.join("photos.zip").exists());
    }

    #[test]
    fn unique_path_appends_suffix_on_collision() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"1").unwrap();
        let p = unique_path(dir.path(), "a.txt");
        assert_eq!(p.file_name().unwrap().to_str().unwrap(), "a_1.txt");

        std::fs::write(&p, b"2").unwrap();
        let p2 = unique_path(dir.path(), "a.txt");
        assert_eq!(p2.file_name().unwrap().to_str().unwrap(), "a_2.txt");
    }

    #[test]
    fn stop_listening_is_idempotent_when_idle() {
        let clipboard = Arc::new(InMemoryClipboard::new());
        let (engine, _store, _events, _dir) = engine_with(clipboard);
        engine.stop_listening();
        assert!(!engine.is_listening());
    }
}
