//! Clipboard preload for a task.
//!
//! A caller can hand the task a text payload (and optionally a file) that
//! should end up in the target application verbatim. The text is written to
//! the clipboard as soon as the task starts; the first time the model types
//! something substantial, or pastes without copying first, the preload is
//! considered consumed and the file, if any, becomes due for the clipboard.

use crate::CoreError;
use std::path::{Component, Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::info;

#[derive(Debug, Default)]
struct PreloadState {
    text: Option<String>,
    file: Option<PathBuf>,
    consumed: bool,
    file_due: bool,
}

/// Per-task clipboard preload, consulted by the executor.
#[derive(Debug, Default)]
pub struct ClipboardPreload {
    state: Mutex<PreloadState>,
}

impl ClipboardPreload {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, PreloadState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Install the payloads for a new task, resetting consumption.
    pub fn set(&self, text: Option<String>, file: Option<PathBuf>) {
        *self.lock() = PreloadState {
            text,
            file,
            consumed: false,
            file_due: false,
        };
    }

    pub fn clear(&self) {
        *self.lock() = PreloadState::default();
    }

    pub fn text(&self) -> Option<String> {
        self.lock().text.clone()
    }

    pub fn file(&self) -> Option<PathBuf> {
        self.lock().file.clone()
    }

    /// A text preload exists and has not been used yet.
    pub fn is_pending(&self) -> bool {
        let state = self.lock();
        state.text.is_some() && !state.consumed
    }

    pub fn is_consumed(&self) -> bool {
        self.lock().consumed
    }

    /// Offer the model's `proposed` text. Returns the preload to use instead
    /// when it is pending, the proposal is longer than `min_len` characters
    /// and differs from the preload (ignoring surrounding whitespace).
    pub fn substitute(&self, proposed: &str, min_len: usize) -> Option<String> {
        let mut state = self.lock();
        if state.consumed {
            return None;
        }
        let preload = state.text.clone()?;
        if proposed.chars().count() <= min_len || proposed.trim() == preload.trim() {
            return None;
        }

        info!(
            "Substituting typed text ({} chars) with clipboard preload",
            proposed.chars().count()
        );
        state.consumed = true;
        state.file_due = state.file.is_some();
        Some(preload)
    }

    /// Record a paste of the preloaded clipboard. Returns whether this
    /// consumed the preload.
    pub fn consume(&self) -> bool {
        let mut state = self.lock();
        if state.text.is_none() || state.consumed {
            return false;
        }
        state.consumed = true;
        state.file_due = state.file.is_some();
        true
    }

    /// The file that should now be placed on the clipboard, once.
    pub fn take_due_file(&self) -> Option<PathBuf> {
        let mut state = self.lock();
        if !state.file_due {
            return None;
        }
        state.file_due = false;
        state.file.clone()
    }
}

/// Check that `path` is absolute, free of `..` components and names an
/// existing regular file.
pub fn validate_file_path(path: &Path) -> Result<PathBuf, CoreError> {
    if !path.is_absolute() {
        return Err(CoreError::InvalidRequest(format!(
            "File path must be absolute: {}",
            path.display()
        )));
    }
    if path.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(CoreError::InvalidRequest(format!(
            "Path traversal detected: {}",
            path.display()
        )));
    }
    if !path.is_file() {
        return Err(CoreError::InvalidRequest(format!(
            "File not found: {}",
            path.display()
        )));
    }
    Ok(path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_substitution_rules() {
        let preload = ClipboardPreload::new();
        assert_eq!(preload.substitute("hello world", 2), None);

        preload.set(Some("预设消息".into()), None);
        assert!(preload.is_pending());
        // Too short
        assert_eq!(preload.substitute("ok", 2), None);
        // Same as the preload
        assert_eq!(preload.substitute("  预设消息 ", 2), None);
        assert!(preload.is_pending());

        assert_eq!(
            preload.substitute("model text", 2),
            Some("预设消息".to_string())
        );
        assert!(preload.is_consumed());
        assert_eq!(preload.substitute("model text", 2), None);
    }

    #[test]
    fn test_file_becomes_due_once() {
        let preload = ClipboardPreload::new();
        preload.set(Some("caption".into()), Some(PathBuf::from("/tmp/a.png")));
        assert_eq!(preload.take_due_file(), None);

        assert!(preload.consume());
        assert!(!preload.consume());
        assert_eq!(preload.take_due_file(), Some(PathBuf::from("/tmp/a.png")));
        assert_eq!(preload.take_due_file(), None);

        preload.clear();
        assert!(!preload.is_pending());
        assert_eq!(preload.file(), None);
    }

    #[test]
    fn test_validate_file_path() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("photo.png");
        std::fs::write(&file, b"png").unwrap();

        assert_eq!(validate_file_path(&file).unwrap(), file);
        assert!(validate_file_path(Path::new("relative/photo.png")).is_err());
        assert!(validate_file_path(&dir.path().join("sub/../photo.png")).is_err());
        assert!(validate_file_path(&dir.path().join("missing.png")).is_err());
        assert!(validate_file_path(dir.path()).is_err());
    }
}
