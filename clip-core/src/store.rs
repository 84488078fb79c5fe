//! The task store — a journaled, thread-safe map of every transfer task.
//!
//! Not a process global: engines and binaries hold it behind an `Arc` and
//! pass it in explicitly, so tests can construct isolated stores pointed at
//! a temp journal file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use dashmap::DashMap;
use tracing::info;

use crate::error::ClipTransferError;
use crate::task::{TaskSnapshot, TaskStatus, TransferTask};

/// Aggregate counters returned by [`TaskStore::statistics`].
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct TaskStatistics {
    pub total: usize,
    pub by_status: BTreeMap<String, usize>,
    pub total_size_bytes: u64,
    pub completed_size_bytes: u64,
}

/// A thread-safe, journaled collection of [`TransferTask`]s.
///
/// The in-memory map is a [`DashMap`] so concurrent readers and writers
/// don't contend on a single lock; the journal file itself is guarded by a
/// dedicated write lock so concurrent mutations serialize into one
/// consistent on-disk snapshot rather than racing each other's writes.
pub struct TaskStore {
    tasks: DashMap<String, TransferTask>,
    journal_path: PathBuf,
    journal_lock: Mutex<()>,
}

impl TaskStore {
    /// Opens (or creates) a store journaled at `journal_path`.
    ///
    /// If the file exists, every entry is loaded and any RUNNING/PAUSED
    /// status is normalized back to PENDING — nothing was actually running
    /// while the process was down.
    pub fn open(journal_path: impl Into<PathBuf>) -> Result<Self, ClipTransferError> {
        let journal_path = journal_path.into();
        let tasks = DashMap::new();

        if journal_path.exists() {
            let raw = std::fs::read_to_string(&journal_path)
                .map_err(|e| ClipTransferError::Store(e.to_string()))?;
            let snapshots: Vec<TaskSnapshot> = serde_json::from_str(&raw)
                .map_err(|e| ClipTransferError::Store(format!("corrupt journal: {e}")))?;
            for snapshot in snapshots {
                let mut task = TransferTask::from_snapshot(snapshot);
                task.normalize_after_reload();
                tasks.insert(task.task_id().to_string(), task);
            }
            info!(count = tasks.len(), "loaded task journal");
        }

        Ok(Self {
            tasks,
            journal_path,
            journal_lock: Mutex::new(()),
        })
    }

    /// Inserts a new task and journals the updated map.
    pub fn add(&self, task: TransferTask) -> Result<(), ClipTransferError> {
        self.tasks.insert(task.task_id().to_string(), task);
        self.journal()
    }

    /// Applies `f` to the task with `task_id`, if present, then journals.
    pub fn update(
        &self,
        task_id: &str,
        f: impl FnOnce(&mut TransferTask),
    ) -> Result<(), ClipTransferError> {
        {
            let mut entry = self
                .tasks
                .get_mut(task_id)
                .ok_or_else(|| ClipTransferError::UnknownTask(task_id.to_string()))?;
            f(&mut entry);
        }
        self.journal()
    }

    /// Removes a task and journals the updated map.
    pub fn remove(&self, task_id: &str) -> Result<(), ClipTransferError> {
        self.tasks.remove(task_id);
        self.journal()
    }

    /// Returns a snapshot copy of one task.
    pub fn get(&self, task_id: &str) -> Option<TaskSnapshot> {
        self.tasks.get(task_id).map(|t| t.snapshot().clone())
    }

    /// Returns snapshot copies of every task.
    pub fn list(&self) -> Vec<TaskSnapshot> {
        self.tasks.iter().map(|t| t.snapshot().clone()).collect()
    }

    /// Returns snapshot copies of tasks matching `status`.
    pub fn list_by_status(&self, status: TaskStatus) -> Vec<TaskSnapshot> {
        self.tasks
            .iter()
            .filter(|t| t.status() == status)
            .map(|t| t.snapshot().clone())
            .collect()
    }

    /// Removes every COMPLETED task whose `end_time` is older than
    /// `keep_days` days. `keep_days = 0` removes all completed tasks.
    pub fn cleanup_completed(&self, keep_days: i64) -> Result<usize, ClipTransferError> {
        let cutoff = Utc::now() - chrono::Duration::days(keep_days.max(0));
        let stale: Vec<String> = self
            .tasks
            .iter()
            .filter(|t| {
                t.status() == TaskStatus::Completed
                    && t.snapshot()
                        .end_time
                        .map(|end| keep_days == 0 || end < cutoff)
                        .unwrap_or(false)
            })
            .map(|t| t.task_id().to_string())
            .collect();

        for id in &stale {
            self.tasks.remove(id);
        }
        if !stale.is_empty() {
            self.journal()?;
        }
        Ok(stale.len())
    }

    /// Aggregate counts and byte totals across every tracked task.
    pub fn statistics(&self) -> TaskStatistics {
        let mut stats = TaskStatistics::default();
        for entry in self.tasks.iter() {
            let snap = entry.snapshot();
            stats.total += 1;
            *stats
                .by_status
                .entry(format!("{:?}", snap.status).to_uppercase())
                .or_insert(0) += 1;
            stats.total_size_bytes += snap.total_size;
            if snap.status == TaskStatus::Completed {
                stats.completed_size_bytes += snap.total_size;
            }
        }
        stats
    }

    /// Writes the full task map to the journal file via write-temp-then-
    /// rename, so a crash mid-write never leaves a truncated journal.
    fn journal(&self) -> Result<(), ClipTransferError> {
        let _guard = self.journal_lock.lock().unwrap();

        let snapshots: Vec<TaskSnapshot> =
            self.tasks.iter().map(|t| t.snapshot().clone()).collect();
        let body = serde_json::to_vec_pretty(&snapshots)
            .map_err(|e| ClipTransferError::Store(e.to_string()))?;

        let tmp_path = tmp_path_for(&self.journal_path);
        std::fs::write(&tmp_path, &body).map_err(|e| ClipTransferError::Store(e.to_string()))?;
        std::fs::rename(&tmp_path, &self.journal_path)
            .map_err(|e| ClipTransferError::Store(e.to_string()))?;
        Ok(())
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::TransferType;
    use crate::task::TaskSnapshot;
    use std::collections::{BTreeMap as Map, BTreeSet};

    fn snapshot(id: &str, status: TaskStatus) -> TaskSnapshot {
        TaskSnapshot {
            task_id: id.into(),
            file_name: "a.txt".into(),
            file_path: None,
            transfer_type: TransferType::File,
            total_size: 100,
            chunk_size: 50,
            chunk_total: 2,
            file_md5: None,
            folder_manifest: Vec::new(),
            status,
            completed_chunks: BTreeSet::new(),
            failed_chunks: Map::new(),
            transferred_bytes: 0,
            create_time: Utc::now(),
            start_time: None,
            end_time: Some(Utc::now() - chrono::Duration::days(10)),
            error_message: None,
        }
    }

    #[test]
    fn add_get_and_journal_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let journal = dir.path().join("tasks.json");

        let store = TaskStore::open(&journal).unwrap();
        store
            .add(TransferTask::from_snapshot(snapshot("t-1", TaskStatus::Pending)))
            .unwrap();
        assert!(store.get("t-1").is_some());
        assert!(journal.exists());

        let reopened = TaskStore::open(&journal).unwrap();
        assert!(reopened.get("t-1").is_some());
    }

    #[test]
    fn reload_normalizes_running_and_paused() {
        let dir = tempfile::tempdir().unwrap();
        let journal = dir.path().join("tasks.json");

        let store = TaskStore::open(&journal).unwrap();
        store
            .add(TransferTask::from_snapshot(snapshot("t-1", TaskStatus::Running)))
            .unwrap();
        store
            .add(TransferTask::from_snapshot(snapshot("t-2", TaskStatus::Paused)))
            .unwrap();

        let reopened = TaskStore::open(&journal).unwrap();
        assert_eq!(reopened.get("t-1").unwrap().status, TaskStatus::Pending);
        assert_eq!(reopened.get("t-2").unwrap().status, TaskStatus::Pending);
    }

    #[test]
    fn cleanup_completed_respects_keep_days() {
        let dir = tempfile::tempdir().unwrap();
        let journal = dir.path().join("tasks.json");
        let store = TaskStore::open(&journal).unwrap();

        store
            .add(TransferTask::from_snapshot(snapshot("old", TaskStatus::Completed)))
            .unwrap();

        let mut recent = snapshot("recent", TaskStatus::Completed);
        recent.end_time = Some(Utc::now());
        store.add(TransferTask::from_snapshot(recent)).unwrap();

        let removed = store.cleanup_completed(5).unwrap();
        assert_eq!(removed, 1);
        assert!(store.get("old").is_none());
        assert!(store.get("recent").is_some());
    }

    #[test]
    fn cleanup_zero_removes_all_completed() {
        let dir = tempfile::tempdir().unwrap();
        let journal = dir.path().join("tasks.json");
        let store = TaskStore::open(&journal).unwrap();

        store
            .add(TransferTask::from_snapshot(snapshot("a", TaskStatus::Completed)))
            .unwrap();
        store
            .add(TransferTask::from_snapshot(snapshot("b", TaskStatus::Pending)))
            .unwrap();

        let removed = store.cleanup_completed(0).unwrap();
        assert_eq!(removed, 1);
        assert!(store.get("b").is_some());
    }

    #[test]
    fn statistics_counts_by_status_and_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let journal = dir.path().join("tasks.json");
        let store = TaskStore::open(&journal).unwrap();

        store
            .add(TransferTask::from_snapshot(snapshot("a", TaskStatus::Completed)))
            .unwrap();
        store
            .add(TransferTask::from_snapshot(snapshot("b", TaskStatus::Pending)))
            .unwrap();

        let stats = store.statistics();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.total_size_bytes, 200);
        assert_eq!(stats.completed_size_bytes, 100);
    }

    #[test]
    fn update_unknown_task_errors() {
        let dir = tempfile::tempdir().unwrap();
        let journal = dir.path().join("tasks.json");
        let store = TaskStore::open(&journal).unwrap();

        let err = store.update("missing", |_| {}).unwrap_err();
        assert!(matches!(err, ClipTransferError::UnknownTask(_)));
    }
}
