//! The clipboard abstraction: a trait at the boundary between the
//! transport-agnostic protocol core and a real desktop clipboard, so engines
//! can be exercised in tests against an in-memory fake instead of touching
//! an actual OS clipboard.

use std::sync::Mutex;

use crate::error::ClipTransferError;

/// Opaque text slot with get/set/content-changed semantics — the clipboard
/// is treated as a single-writer resource the core never needs to know the
/// transport of.
pub trait ClipboardBackend: Send + Sync {
    /// Returns the current clipboard text, or `None` if it holds nothing
    /// (or something the backend cannot represent as text).
    fn get_text(&self) -> Result<Option<String>, ClipTransferError>;

    /// Replaces the clipboard's text content.
    ///
    /// Implementations should treat transient contention (another writer
    /// holding the selection momentarily) as retryable rather than fatal.
    fn set_text(&self, text: &str) -> Result<(), ClipTransferError>;

    /// Optional hook invoked when the backend can detect a content change
    /// without polling. The default no-op means callers always fall back to
    /// polling `get_text`.
    fn on_change(&self, _callback: Box<dyn Fn(&str) + Send + Sync>) {}
}

/// An in-memory fake clipboard, used by engine tests and by anything that
/// wants a `ClipboardBackend` without touching the real OS selection.
#[derive(Default)]
pub struct InMemoryClipboard {
    text: Mutex<Option<String>>,
}

impl InMemoryClipboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the clipboard with initial text, as a convenience for tests.
    pub fn with_text(text: impl Into<String>) -> Self {
        Self {
            text: Mutex::new(Some(text.into())),
        }
    }
}

impl ClipboardBackend for InMemoryClipboard {
    fn get_text(&self) -> Result<Option<String>, ClipTransferError> {
        Ok(self.text.lock().unwrap().clone())
    }

    fn set_text(&self, text: &str) -> Result<(), ClipTransferError> {
        *self.text.lock().unwrap() = Some(text.to_string());
        Ok(())
    }
}

/// The real OS clipboard backend, wired into the two binaries only — never
/// into engine unit tests.
pub struct SystemClipboard {
    inner: Mutex<arboard::Clipboard>,
}

impl SystemClipboard {
    pub fn new() -> Result<Self, ClipTransferError> {
        let clipboard = arboard::Clipboard::new()
            .map_err(|e| ClipTransferError::Other(format!("clipboard init failed: {e}")))?;
        Ok(Self {
            inner: Mutex::new(clipboard),
        })
    }
}

impl ClipboardBackend for SystemClipboard {
    fn get_text(&self) -> Result<Option<String>, ClipTransferError> {
        let mut clipboard = self.inner.lock().unwrap();
        match clipboard.get_text() {
            Ok(text) => Ok(Some(text)),
            Err(arboard::Error::ContentNotAvailable) => Ok(None),
            Err(e) => Err(ClipTransferError::Other(e.to_string())),
        }
    }

    fn set_text(&self, text: &str) -> Result<(), ClipTransferError> {
        let mut clipboard = self.inner.lock().unwrap();
        clipboard
            .set_text(text.to_string())
            .map_err(|_| ClipTransferError::ClipboardWriteFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_clipboard_roundtrips() {
        let clip = InMemoryClipboard::new();
        assert_eq!(clip.get_text().unwrap(), None);

        clip.set_text("hello").unwrap();
        assert_eq!(clip.get_text().unwrap(), Some("hello".to_string()));

        clip.set_text("world").unwrap();
        assert_eq!(clip.get_text().unwrap(), Some("world".to_string()));
    }

    #[test]
    fn seeded_clipboard_starts_with_text() {
        let clip = InMemoryClipboard::with_text("seed");
        assert_eq!(clip.get_text().unwrap(), Some("seed".to_string()));
    }
}
