//! The transfer task model — one record per file (or folder) transfer,
//! tracked identically whether it originated on the sender or receiver side.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::packet::{FolderManifestEntry, TransferType};

/// Lifecycle state of a [`TransferTask`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Whether this status is one a task never leaves once reached.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Non-terminal statuses persisted across a crash are not trustworthy —
    /// nothing was actually running while the process was down.
    fn normalized_on_reload(self) -> Self {
        match self {
            TaskStatus::Running | TaskStatus::Paused => TaskStatus::Pending,
            other => other,
        }
    }
}

/// The on-disk / on-wire shape of a [`TransferTask`], and the single entry
/// point for constructing one — replacing field-by-field mutation with one
/// validated builder call.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub task_id: String,
    pub file_name: String,
    pub file_path: Option<String>,
    pub transfer_type: TransferType,
    pub total_size: u64,
    pub chunk_size: u64,
    pub chunk_total: u32,
    pub file_md5: Option<String>,
    #[serde(default)]
    pub folder_manifest: Vec<FolderManifestEntry>,
    pub status: TaskStatus,
    #[serde(default)]
    pub completed_chunks: BTreeSet<u32>,
    #[serde(default)]
    pub failed_chunks: BTreeMap<u32, String>,
    #[serde(default)]
    pub transferred_bytes: u64,
    pub create_time: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

/// A tracked file or folder transfer.
///
/// Mutated by exactly one side at a time: the sender thread for a task it
/// created, the receiver's polling worker for one seeded from a START
/// packet. The [`crate::store::TaskStore`] owns the persisted copy; engines
/// hold live references and push deltas through `update`.
#[derive(Clone, Debug)]
pub struct TransferTask {
    snapshot: TaskSnapshot,
    last_progress_time: Option<DateTime<Utc>>,
    last_transferred_bytes: u64,
}

impl TransferTask {
    /// The single constructor: build a task from a fully-formed snapshot.
    ///
    /// Replaces piecemeal field assignment with one validated entry point,
    /// matching how the rest of the store and engines always have a
    /// complete snapshot in hand (from a decoded START packet, a resumed
    /// journal entry, or a freshly-submitted send).
    pub fn from_snapshot(snapshot: TaskSnapshot) -> Self {
        Self {
            snapshot,
            last_progress_time: None,
            last_transferred_bytes: 0,
        }
    }

    /// Builds a fresh sender-side task: no source path is implied by the
    /// protocol fields themselves, so the caller supplies one alongside the
    /// wire-shape data that will become the outgoing START.
    #[allow(clippy::too_many_arguments)]
    pub fn new_outbound(
        task_id: String,
        file_name: String,
        file_path: String,
        transfer_type: TransferType,
        total_size: u64,
        chunk_size: u64,
        chunk_total: u32,
        file_md5: String,
        folder_manifest: Vec<FolderManifestEntry>,
    ) -> Self {
        Self::from_snapshot(TaskSnapshot {
            task_id,
            file_name,
            file_path: Some(file_path),
            transfer_type,
            total_size,
            chunk_size,
            chunk_total,
            file_md5: Some(file_md5),
            folder_manifest,
            status: TaskStatus::Pending,
            completed_chunks: BTreeSet::new(),
            failed_chunks: BTreeMap::new(),
            transferred_bytes: 0,
            create_time: Utc::now(),
            start_time: None,
            end_time: None,
            error_message: None,
        })
    }

    /// Builds a fresh receiver-side task, seeded from an inbound START
    /// packet's fields. There is no source path on this side.
    pub fn new_inbound(
        task_id: String,
        file_name: String,
        transfer_type: TransferType,
        total_size: u64,
        chunk_size: u64,
        chunk_total: u32,
        file_md5: Option<String>,
        folder_manifest: Vec<FolderManifestEntry>,
    ) -> Self {
        Self::from_snapshot(TaskSnapshot {
            task_id,
            file_name,
            file_path: None,
            transfer_type,
            total_size,
            chunk_size,
            chunk_total,
            file_md5,
            folder_manifest,
            status: TaskStatus::Pending,
            completed_chunks: BTreeSet::new(),
            failed_chunks: BTreeMap::new(),
            transferred_bytes: 0,
            create_time: Utc::now(),
            start_time: None,
            end_time: None,
            error_message: None,
        })
    }

    pub fn snapshot(&self) -> &TaskSnapshot {
        &self.snapshot
    }

    pub fn into_snapshot(self) -> TaskSnapshot {
        self.snapshot
    }

    pub fn task_id(&self) -> &str {
        &self.snapshot.task_id
    }

    pub fn status(&self) -> TaskStatus {
        self.snapshot.status
    }

    pub fn set_status(&mut self, status: TaskStatus) {
        self.snapshot.status = status;
    }

    /// A task is completion-ready iff every chunk has been marked complete
    /// and none remain marked failed.
    pub fn is_completion_ready(&self) -> bool {
        self.snapshot.completed_chunks.len() as u32 == self.snapshot.chunk_total
            && self.snapshot.failed_chunks.is_empty()
    }

    /// Sorted indices still missing from `completed_chunks`.
    pub fn missing_chunks(&self) -> Vec<u32> {
        (0..self.snapshot.chunk_total)
            .filter(|i| !self.snapshot.completed_chunks.contains(i))
            .collect()
    }

    /// Marks a chunk complete, evicting it from `failed_chunks` if present,
    /// and advances the transferred-byte counter and speed window.
    pub fn mark_chunk_complete(&mut self, index: u32, bytes: u64) {
        self.snapshot.failed_chunks.remove(&index);
        self.snapshot.completed_chunks.insert(index);
        self.snapshot.transferred_bytes += bytes;
        self.last_progress_time = Some(Utc::now());
        self.last_transferred_bytes = self.snapshot.transferred_bytes;
    }

    /// Marks a chunk failed, evicting it from `completed_chunks` if present.
    pub fn mark_chunk_failed(&mut self, index: u32, reason: impl Into<String>) {
        self.snapshot.completed_chunks.remove(&index);
        self.snapshot
            .failed_chunks
            .insert(index, reason.into());
    }

    /// Instantaneous transfer rate in bytes/sec since the last progress
    /// sample, or `None` before the first chunk completes.
    pub fn recent_speed_bytes_per_sec(&self) -> Option<f64> {
        let last = self.last_progress_time?;
        let elapsed = (Utc::now() - last).num_milliseconds().max(1) as f64 / 1000.0;
        let delta = self
            .snapshot
            .transferred_bytes
            .saturating_sub(self.last_transferred_bytes) as f64;
        Some(delta / elapsed)
    }

    pub fn mark_started(&mut self) {
        self.snapshot.start_time = Some(Utc::now());
        self.snapshot.status = TaskStatus::Running;
    }

    pub fn mark_finished(&mut self, status: TaskStatus) {
        debug_assert!(status.is_terminal());
        self.snapshot.status = status;
        self.snapshot.end_time = Some(Utc::now());
    }

    pub fn set_error(&mut self, message: impl Into<String>) {
        self.snapshot.error_message = Some(message.into());
    }

    /// Remaps RUNNING/PAUSED back to PENDING, per the store's reload rule.
    pub fn normalize_after_reload(&mut self) {
        self.snapshot.status = self.snapshot.status.normalized_on_reload();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> TaskSnapshot {
        TaskSnapshot {
            task_id: "t-1".into(),
            file_name: "report.pdf".into(),
            file_path: Some("/tmp/report.pdf".into()),
            transfer_type: TransferType::File,
            total_size: 1200,
            chunk_size: 512,
            chunk_total: 3,
            file_md5: Some("abc".into()),
            folder_manifest: Vec::new(),
            status: TaskStatus::Pending,
            completed_chunks: BTreeSet::new(),
            failed_chunks: BTreeMap::new(),
            transferred_bytes: 0,
            create_time: Utc::now(),
            start_time: None,
            end_time: None,
            error_message: None,
        }
    }

    #[test]
    fn completion_ready_requires_all_chunks_and_no_failures() {
        let mut task = TransferTask::from_snapshot(snapshot());
        assert!(!task.is_completion_ready());

        task.mark_chunk_complete(0, 512);
        task.mark_chunk_complete(1, 512);
        task.mark_chunk_complete(2, 176);
        assert!(task.is_completion_ready());
        assert!(task.missing_chunks().is_empty());
    }

    #[test]
    fn mark_complete_evicts_from_failed_and_vice_versa() {
        let mut task = TransferTask::from_snapshot(snapshot());
        task.mark_chunk_failed(1, "chunk integrity failed");
        assert!(!task.is_completion_ready());

        task.mark_chunk_complete(1, 512);
        assert!(!task.snapshot().failed_chunks.contains_key(&1));
        assert!(task.snapshot().completed_chunks.contains(&1));

        task.mark_chunk_failed(1, "retransmit requested");
        assert!(!task.snapshot().completed_chunks.contains(&1));
    }

    #[test]
    fn reload_normalizes_non_terminal_statuses() {
        let mut task = TransferTask::from_snapshot(snapshot());
        task.set_status(TaskStatus::Running);
        task.normalize_after_reload();
        assert_eq!(task.status(), TaskStatus::Pending);

        task.set_status(TaskStatus::Completed);
        task.normalize_after_reload();
        assert_eq!(task.status(), TaskStatus::Completed);
    }

    #[test]
    fn missing_chunks_reports_sorted_gaps() {
        let mut task = TransferTask::from_snapshot(snapshot());
        task.mark_chunk_complete(2, 176);
        assert_eq!(task.missing_chunks(), vec![0, 1]);
    }

    #[test]
    fn outbound_constructor_has_source_path_and_no_chunks() {
        let task = TransferTask::new_outbound(
            "t-2".into(),
            "report.pdf".into(),
            "/tmp/report.pdf".into(),
            TransferType::File,
            1200,
            512,
            3,
            "abc".into(),
            Vec::new(),
        );
        assert_eq!(task.status(), TaskStatus::Pending);
        assert_eq!(task.snapshot().file_path.as_deref(), Some("/tmp/report.pdf"));
        assert!(task.missing_chunks().len() == 3);
    }

    #[test]
    fn inbound_constructor_has_no_source_path() {
        let task = TransferTask::new_inbound(
            "t-3".into(),
            "report.pdf".into(),
            TransferType::File,
            1200,
            512,
            3,
            Some("abc".into()),
            Vec::new(),
        );
        assert_eq!(task.snapshot().file_path, None);
        assert_eq!(task.status(), TaskStatus::Pending);
    }
}
