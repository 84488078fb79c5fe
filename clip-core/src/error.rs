//! Domain-specific error type for the clipboard file-transfer protocol.
//!
//! All fallible operations return `Result<T, ClipTransferError>`.
//! No panics on invalid input — every error is typed and recoverable.

use thiserror::Error;

/// The canonical error type for this crate.
#[derive(Debug, Error)]
pub enum ClipTransferError {
    // ── Packet errors ────────────────────────────────────────────
    /// The clipboard sample was not a recognizable packet at all.
    #[error("not a transfer packet")]
    NotAPacket,

    /// The packet's `type` field did not match any known variant.
    #[error("unknown packet type: {0}")]
    UnknownPacketType(String),

    /// A required field was missing or had the wrong shape.
    #[error("invalid field: {0}")]
    InvalidField(&'static str),

    /// The packet text failed to parse as JSON.
    #[error("malformed packet JSON: {0}")]
    MalformedJson(#[from] serde_json::Error),

    /// A decoded chunk's payload did not match its declared MD5.
    #[error("chunk integrity failed at index {0}")]
    ChunkIntegrity(u32),

    /// The reassembled file's MD5 did not match the END packet's checksum.
    #[error("file integrity failed: expected {expected}, got {actual}")]
    FileIntegrity { expected: String, actual: String },

    // ── I/O & archive errors ─────────────────────────────────────
    /// Filesystem or clipboard I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Folder archiving or extraction failed.
    #[error("archive error: {0}")]
    Archive(String),

    /// The system clipboard refused a write.
    #[error("clipboard write failed")]
    ClipboardWriteFailed,

    // ── Task store errors ───────────────────────────────────────
    /// A task id was referenced that the store has no record of.
    #[error("unknown task: {0}")]
    UnknownTask(String),

    /// The task journal could not be read or written.
    #[error("task store error: {0}")]
    Store(String),

    /// A path named by a task or config entry does not exist.
    #[error("path not found: {0}")]
    PathNotFound(String),

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

impl From<String> for ClipTransferError {
    fn from(s: String) -> Self {
        ClipTransferError::Other(s)
    }
}

impl From<&str> for ClipTransferError {
    fn from(s: &str) -> Self {
        ClipTransferError::Other(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let e = ClipTransferError::ChunkIntegrity(3);
        assert!(e.to_string().contains('3'));

        let e = ClipTransferError::FileIntegrity {
            expected: "aaaa".into(),
            actual: "bbbb".into(),
        };
        assert!(e.to_string().contains("aaaa"));
        assert!(e.to_string().contains("bbbb"));
    }

    #[test]
    fn from_string() {
        let e: ClipTransferError = "something broke".into();
        assert!(matches!(e, ClipTransferError::Other(_)));
    }

    #[test]
    fn from_json_error() {
        let parsed: Result<serde_json::Value, _> = serde_json::from_str("{not json");
        let e: ClipTransferError = parsed.unwrap_err().into();
        assert!(matches!(e, ClipTransferError::MalformedJson(_)));
    }
}
