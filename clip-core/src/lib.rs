//! # clip-core
//!
//! Core library for the one-way clipboard file-transfer protocol.
//!
//! This crate contains:
//! - **Packet codec**: `Packet`, `encode`/`decode`, `TransferType`, `FolderManifestEntry`
//! - **Digest & archive**: MD5 helpers and folder-to-ZIP archiving with a manifest
//! - **Task model**: `TransferTask`, `TaskStatus`, `TaskSnapshot`
//! - **Task store**: `TaskStore`, a journaled, thread-safe task map
//! - **Config**: `Config`, loaded from a `key=value` properties file
//! - **Clipboard**: `ClipboardBackend` trait plus an in-memory fake and a real backend
//! - **Error**: `ClipTransferError` — typed, `thiserror`-based error hierarchy

pub mod archive;
pub mod clipboard;
pub mod config;
pub mod digest;
pub mod error;
pub mod packet;
pub mod store;
pub mod task;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use archive::{archive_folder, extract_archive};
pub use clipboard::{ClipboardBackend, InMemoryClipboard, SystemClipboard};
pub use config::Config;
pub use digest::{md5, md5_file, md5_stream, verify_file};
pub use error::ClipTransferError;
pub use packet::{FolderManifestEntry, Packet, TransferType, compute_chunk_total, decode, encode};
pub use store::TaskStore;
pub use task::{TaskSnapshot, TaskStatus, TransferTask};
