//! System clipboard access.
//!
//! Text goes through the platform clipboard tools (`xclip`, `pbcopy`,
//! PowerShell `Set-Clipboard`) spawned with `tokio::process`, so no call
//! blocks the runtime. Files can be placed on the clipboard either as an
//! image (pasteable into chat applications) or as a file reference.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Errors that can occur while using the clipboard.
#[derive(Error, Debug)]
pub enum ClipboardError {
    #[error("Clipboard not available on this platform")]
    NotAvailable,

    #[error("Clipboard command failed: {0}")]
    CommandFailed(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result type for clipboard operations.
pub type ClipboardResult<T> = Result<T, ClipboardError>;

/// File extensions copied as bitmap data instead of a file reference.
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "gif", "webp"];

/// Whether a path names an image the clipboard should carry as pixels.
pub fn is_image_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Trait for clipboard implementations.
#[async_trait]
pub trait Clipboard: Send + Sync {
    /// Replace the clipboard content with text.
    async fn set_text(&self, text: &str) -> ClipboardResult<()>;

    /// Read the clipboard as text.
    async fn get_text(&self) -> ClipboardResult<String>;

    /// Place a file on the clipboard (as an image when `is_image_path`).
    async fn set_file(&self, path: &Path) -> ClipboardResult<()>;
}

/// Clipboard backed by the platform's command-line tools.
#[derive(Debug, Default, Clone)]
pub struct CommandClipboard;

impl CommandClipboard {
    /// Create a new command-backed clipboard.
    pub fn new() -> Self {
        Self
    }

    async fn run_with_stdin(program: &str, args: &[&str], input: &[u8]) -> ClipboardResult<()> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ClipboardError::CommandFailed(format!("Failed to spawn {}: {}", program, e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(input).await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(ClipboardError::CommandFailed(format!(
                "{} exited with {}: {}",
                program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }

    async fn run_capture(program: &str, args: &[&str]) -> ClipboardResult<String> {
        let output = Command::new(program)
            .args(args)
            .output()
            .await
            .map_err(|e| ClipboardError::CommandFailed(format!("Failed to spawn {}: {}", program, e)))?;

        if !output.status.success() {
            return Err(ClipboardError::CommandFailed(format!(
                "{} exited with {}",
                program, output.status
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn path_arg(path: &Path) -> String {
        path.to_string_lossy().into_owned()
    }
}

#[async_trait]
impl Clipboard for CommandClipboard {
    async fn set_text(&self, text: &str) -> ClipboardResult<()> {
        if cfg!(target_os = "windows") {
            // Stdin keeps the payload out of the command line
            Self::run_with_stdin(
                "powershell",
                &["-NoProfile", "-Command", "$input | Set-Clipboard"],
                text.as_bytes(),
            )
            .await
        } else if cfg!(target_os = "macos") {
            Self::run_with_stdin("pbcopy", &[], text.as_bytes()).await
        } else {
            Self::run_with_stdin("xclip", &["-selection", "clipboard"], text.as_bytes()).await
        }
    }

    async fn get_text(&self) -> ClipboardResult<String> {
        if cfg!(target_os = "windows") {
            Self::run_capture("powershell", &["-NoProfile", "-Command", "Get-Clipboard"])
                .await
                .map(|s| s.trim_end_matches(['\r', '\n']).to_string())
        } else if cfg!(target_os = "macos") {
            Self::run_capture("pbpaste", &[]).await
        } else {
            Self::run_capture("xclip", &["-selection", "clipboard", "-o"]).await
        }
    }

    async fn set_file(&self, path: &Path) -> ClipboardResult<()> {
        let arg = Self::path_arg(path);
        let image = is_image_path(path);

        if cfg!(target_os = "windows") {
            // The path is passed as a script argument, never interpolated
            let script = if image {
                "param($p) Add-Type -AssemblyName System.Windows.Forms; Add-Type -AssemblyName System.Drawing; [System.Windows.Forms.Clipboard]::SetImage([System.Drawing.Image]::FromFile($p))"
            } else {
                "param($p) Set-Clipboard -Path $p"
            };
            let block = format!("& {{ {} }} $args[0]", script);
            Self::run_with_stdin(
                "powershell",
                &["-NoProfile", "-STA", "-Command", &block, &arg],
                &[],
            )
            .await
        } else if cfg!(target_os = "macos") {
            let class = if image { "«class PNGf»" } else { "«class furl»" };
            let script = format!(
                "on run argv\nset the clipboard to (read (POSIX file (item 1 of argv)) as {})\nend run",
                class
            );
            Self::run_with_stdin("osascript", &["-e", &script, &arg], &[]).await
        } else if image {
            let mime = match path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.to_lowercase())
                .as_deref()
            {
                Some("jpg") | Some("jpeg") => "image/jpeg",
                Some("gif") => "image/gif",
                Some("bmp") => "image/bmp",
                Some("webp") => "image/webp",
                _ => "image/png",
            };
            Self::run_with_stdin(
                "xclip",
                &["-selection", "clipboard", "-t", mime, "-i", &arg],
                &[],
            )
            .await
        } else {
            let uri = format!("file://{}", arg);
            Self::run_with_stdin(
                "xclip",
                &["-selection", "clipboard", "-t", "text/uri-list"],
                uri.as_bytes(),
            )
            .await
        }
    }
}

/// Mock clipboard for testing.
pub mod mock {
    use super::*;
    use tokio::sync::Mutex;

    /// What the mock clipboard currently holds.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum ClipboardContent {
        Empty,
        Text(String),
        File(PathBuf),
    }

    /// In-memory clipboard that records every write.
    pub struct MockClipboard {
        content: Mutex<ClipboardContent>,
        history: Mutex<Vec<ClipboardContent>>,
    }

    impl MockClipboard {
        /// Create an empty clipboard.
        pub fn new() -> Self {
            Self {
                content: Mutex::new(ClipboardContent::Empty),
                history: Mutex::new(Vec::new()),
            }
        }

        /// Current content.
        pub async fn content(&self) -> ClipboardContent {
            self.content.lock().await.clone()
        }

        /// Every value written, oldest first.
        pub async fn history(&self) -> Vec<ClipboardContent> {
            self.history.lock().await.clone()
        }

        async fn store(&self, value: ClipboardContent) {
            *self.content.lock().await = value.clone();
            self.history.lock().await.push(value);
        }
    }

    impl Default for MockClipboard {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl Clipboard for MockClipboard {
        async fn set_text(&self, text: &str) -> ClipboardResult<()> {
            self.store(ClipboardContent::Text(text.to_string())).await;
            Ok(())
        }

        async fn get_text(&self) -> ClipboardResult<String> {
            match &*self.content.lock().await {
                ClipboardContent::Text(text) => Ok(text.clone()),
                _ => Ok(String::new()),
            }
        }

        async fn set_file(&self, path: &Path) -> ClipboardResult<()> {
            self.store(ClipboardContent::File(path.to_path_buf())).await;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::{ClipboardContent, MockClipboard};
    use super::*;

    #[test]
    fn test_image_detection() {
        assert!(is_image_path(Path::new("/tmp/photo.PNG")));
        assert!(is_image_path(Path::new("/tmp/photo.jpeg")));
        assert!(!is_image_path(Path::new("/tmp/report.pdf")));
        assert!(!is_image_path(Path::new("/tmp/noext")));
    }

    #[tokio::test]
    async fn test_mock_clipboard_records_writes() {
        let clipboard = MockClipboard::new();
        clipboard.set_text("你好").await.unwrap();
        assert_eq!(clipboard.get_text().await.unwrap(), "你好");

        clipboard.set_file(Path::new("/tmp/a.png")).await.unwrap();
        assert_eq!(
            clipboard.content().await,
            ClipboardContent::File(PathBuf::from("/tmp/a.png"))
        );
        assert_eq!(clipboard.history().await.len(), 2);
        assert_eq!(clipboard.get_text().await.unwrap(), "");
    }
}
