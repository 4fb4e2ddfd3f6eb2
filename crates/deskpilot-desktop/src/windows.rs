//! Window enumeration, focus tracking and activation.
//!
//! On Linux this shells out to `xdotool`/`wmctrl`, on Windows to
//! PowerShell, on macOS to `osascript`. Every call is async and spawns a
//! short-lived helper process.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

/// Errors that can occur while querying windows.
#[derive(Error, Debug)]
pub enum WindowError {
    #[error("Window management not available on this platform")]
    NotAvailable,

    #[error("Window command failed: {0}")]
    CommandFailed(String),
}

/// Result type for window operations.
pub type WindowResult<T> = Result<T, WindowError>;

/// Identity used when the foreground process is not recognised.
pub const UNKNOWN_APP: &str = "unknown";

/// A top-level window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct WindowInfo {
    /// Platform window handle, as text
    pub id: String,
    /// Window title
    pub title: String,
    /// Owning process executable name
    pub process_name: String,
    /// Owning process id
    pub pid: u32,
}

/// Map a process executable name to an application identity.
pub fn app_for_process(process_name: &str) -> &'static str {
    let lower = process_name.trim().to_lowercase();
    let stem = lower.strip_suffix(".exe").unwrap_or(&lower);
    match stem {
        "wechat" | "weixin" => "wechat",
        "chrome" | "google-chrome" => "chrome",
        "msedge" | "microsoft-edge" => "edge",
        "explorer" => "file_explorer",
        "notepad" => "notepad",
        "winword" => "word",
        "excel" => "excel",
        "powerpnt" => "powerpoint",
        "code" => "vscode",
        _ => UNKNOWN_APP,
    }
}

/// Trait for window management implementations.
#[async_trait]
pub trait WindowManager: Send + Sync {
    /// The window that currently has keyboard focus.
    async fn active_window(&self) -> WindowResult<WindowInfo>;

    /// All visible, titled windows.
    async fn list_windows(&self) -> WindowResult<Vec<WindowInfo>>;

    /// Bring the first window whose title contains `title_pattern`
    /// (case-insensitive) to the foreground. Returns `false` when no
    /// window matched.
    async fn activate_window(&self, title_pattern: &str) -> WindowResult<bool>;

    /// Application identity of the focused window.
    async fn detect_app(&self) -> String {
        match self.active_window().await {
            Ok(window) => app_for_process(&window.process_name).to_string(),
            Err(e) => {
                debug!("Active window unavailable: {}", e);
                UNKNOWN_APP.to_string()
            }
        }
    }
}

/// Find the first window whose title contains `pattern`, ignoring case.
pub fn find_by_title<'a>(windows: &'a [WindowInfo], pattern: &str) -> Option<&'a WindowInfo> {
    let target = pattern.to_lowercase();
    windows
        .iter()
        .find(|w| w.title.to_lowercase().contains(&target))
}

/// Window manager backed by platform helper commands.
#[derive(Debug, Default, Clone)]
pub struct CommandWindowManager;

impl CommandWindowManager {
    /// Create a new command-backed window manager.
    pub fn new() -> Self {
        Self
    }

    async fn run(program: &str, args: &[&str]) -> WindowResult<String> {
        let output = Command::new(program)
            .args(args)
            .output()
            .await
            .map_err(|e| WindowError::CommandFailed(format!("{} failed: {}", program, e)))?;

        if !output.status.success() {
            return Err(WindowError::CommandFailed(format!(
                "{} exited with {}",
                program, output.status
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn process_name(pid: u32) -> String {
        if pid == 0 {
            return UNKNOWN_APP.to_string();
        }
        match tokio::fs::read_to_string(format!("/proc/{}/comm", pid)).await {
            Ok(name) => name.trim().to_string(),
            Err(_) => UNKNOWN_APP.to_string(),
        }
    }

    /// Parse `wmctrl -l -p` output: id, desktop, pid, host, title.
    fn parse_wmctrl(stdout: &str) -> Vec<(String, u32, String)> {
        stdout
            .lines()
            .filter_map(|line| {
                let parts: Vec<&str> = line.split_whitespace().collect();
                if parts.len() < 5 {
                    return None;
                }
                let pid = parts[2].parse().unwrap_or(0);
                Some((parts[0].to_string(), pid, parts[4..].join(" ")))
            })
            .filter(|(_, _, title)| !title.is_empty())
            .collect()
    }

    /// Parse `Get-Process` CSV rows: Id, ProcessName, MainWindowTitle.
    fn parse_powershell_rows(stdout: &str) -> Vec<WindowInfo> {
        stdout
            .lines()
            .filter_map(|line| {
                let mut parts = line.trim().splitn(3, '\t');
                let pid: u32 = parts.next()?.trim().parse().ok()?;
                let name = parts.next()?.trim().to_string();
                let title = parts.next()?.trim().to_string();
                if title.is_empty() {
                    return None;
                }
                Some(WindowInfo {
                    id: pid.to_string(),
                    title,
                    process_name: format!("{}.exe", name),
                    pid,
                })
            })
            .collect()
    }

    const PS_LIST: &'static str = "Get-Process | Where-Object { $_.MainWindowTitle } | ForEach-Object { \"$($_.Id)`t$($_.ProcessName)`t$($_.MainWindowTitle)\" }";

    const PS_ACTIVE: &'static str = "Add-Type 'using System;using System.Runtime.InteropServices;public class Fg{[DllImport(\"user32.dll\")]public static extern IntPtr GetForegroundWindow();[DllImport(\"user32.dll\")]public static extern int GetWindowThreadProcessId(IntPtr h,out int p);}'; $p=0; [void][Fg]::GetWindowThreadProcessId([Fg]::GetForegroundWindow(),[ref]$p); $g=Get-Process -Id $p; \"$($g.Id)`t$($g.ProcessName)`t$($g.MainWindowTitle)\"";
}

#[async_trait]
impl WindowManager for CommandWindowManager {
    async fn active_window(&self) -> WindowResult<WindowInfo> {
        if cfg!(target_os = "windows") {
            let out = Self::run("powershell", &["-NoProfile", "-Command", Self::PS_ACTIVE]).await?;
            Self::parse_powershell_rows(&out)
                .into_iter()
                .next()
                .ok_or_else(|| WindowError::CommandFailed("no foreground window".to_string()))
        } else if cfg!(target_os = "macos") {
            let out = Self::run(
                "osascript",
                &[
                    "-e",
                    "tell application \"System Events\" to set p to first application process whose frontmost is true",
                    "-e",
                    "tell application \"System Events\" to return (unix id of p as text) & tab & (name of p) & tab & (name of front window of p)",
                ],
            )
            .await?;
            let mut parts = out.trim().splitn(3, '\t');
            let pid = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
            let process_name = parts.next().unwrap_or(UNKNOWN_APP).to_string();
            let title = parts.next().unwrap_or_default().to_string();
            Ok(WindowInfo {
                id: pid.to_string(),
                title,
                process_name,
                pid,
            })
        } else {
            let id = Self::run("xdotool", &["getactivewindow"]).await?.trim().to_string();
            let title = Self::run("xdotool", &["getwindowname", &id])
                .await
                .map(|t| t.trim().to_string())
                .unwrap_or_default();
            let pid: u32 = Self::run("xdotool", &["getwindowpid", &id])
                .await
                .ok()
                .and_then(|p| p.trim().parse().ok())
                .unwrap_or(0);
            Ok(WindowInfo {
                id,
                title,
                process_name: Self::process_name(pid).await,
                pid,
            })
        }
    }

    async fn list_windows(&self) -> WindowResult<Vec<WindowInfo>> {
        if cfg!(target_os = "windows") {
            let out = Self::run("powershell", &["-NoProfile", "-Command", Self::PS_LIST]).await?;
            Ok(Self::parse_powershell_rows(&out))
        } else if cfg!(target_os = "macos") {
            // Only the frontmost window is cheaply available through System Events
            Ok(vec![self.active_window().await?])
        } else {
            let out = Self::run("wmctrl", &["-l", "-p"]).await?;
            let mut windows = Vec::new();
            for (id, pid, title) in Self::parse_wmctrl(&out) {
                windows.push(WindowInfo {
                    id,
                    title,
                    process_name: Self::process_name(pid).await,
                    pid,
                });
            }
            Ok(windows)
        }
    }

    async fn activate_window(&self, title_pattern: &str) -> WindowResult<bool> {
        let windows = self.list_windows().await?;
        let Some(window) = find_by_title(&windows, title_pattern) else {
            warn!("No window matching '{}'", title_pattern);
            return Ok(false);
        };

        let result = if cfg!(target_os = "windows") {
            let script = format!(
                "(New-Object -ComObject WScript.Shell).AppActivate({}) | Out-Null",
                window.pid
            );
            Self::run("powershell", &["-NoProfile", "-Command", &script]).await
        } else if cfg!(target_os = "macos") {
            let script = format!(
                "tell application \"System Events\" to set frontmost of (first process whose unix id is {}) to true",
                window.pid
            );
            Self::run("osascript", &["-e", &script]).await
        } else {
            Self::run("wmctrl", &["-i", "-a", &window.id]).await
        };

        match result {
            Ok(_) => {
                debug!("Activated window: {}", window.title);
                Ok(true)
            }
            Err(e) => {
                warn!("Failed to activate window '{}': {}", window.title, e);
                Ok(false)
            }
        }
    }
}

/// Mock window manager for testing.
pub mod mock {
    use super::*;
    use tokio::sync::Mutex;

    /// Scriptable window manager: the test sets the focused window and
    /// what activation does.
    pub struct MockWindowManager {
        active: Mutex<WindowInfo>,
        windows: Mutex<Vec<WindowInfo>>,
        activations: Mutex<Vec<String>>,
    }

    impl MockWindowManager {
        /// Create a manager whose focused window belongs to `process_name`.
        pub fn new(process_name: &str, title: &str) -> Self {
            let window = WindowInfo {
                id: "1".to_string(),
                title: title.to_string(),
                process_name: process_name.to_string(),
                pid: 1,
            };
            Self {
                active: Mutex::new(window.clone()),
                windows: Mutex::new(vec![window]),
                activations: Mutex::new(Vec::new()),
            }
        }

        /// Add a window that can be activated by title.
        pub async fn add_window(&self, process_name: &str, title: &str) {
            let mut windows = self.windows.lock().await;
            let pid = windows.len() as u32 + 1;
            windows.push(WindowInfo {
                id: pid.to_string(),
                title: title.to_string(),
                process_name: process_name.to_string(),
                pid,
            });
        }

        /// Change the focused window.
        pub async fn focus(&self, process_name: &str, title: &str) {
            let mut active = self.active.lock().await;
            active.process_name = process_name.to_string();
            active.title = title.to_string();
        }

        /// Title patterns passed to `activate_window`.
        pub async fn activations(&self) -> Vec<String> {
            self.activations.lock().await.clone()
        }
    }

    #[async_trait]
    impl WindowManager for MockWindowManager {
        async fn active_window(&self) -> WindowResult<WindowInfo> {
            Ok(self.active.lock().await.clone())
        }

        async fn list_windows(&self) -> WindowResult<Vec<WindowInfo>> {
            Ok(self.windows.lock().await.clone())
        }

        async fn activate_window(&self, title_pattern: &str) -> WindowResult<bool> {
            self.activations.lock().await.push(title_pattern.to_string());
            let windows = self.windows.lock().await;
            match find_by_title(&windows, title_pattern) {
                Some(window) => {
                    *self.active.lock().await = window.clone();
                    Ok(true)
                }
                None => Ok(false),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockWindowManager;
    use super::*;

    #[test]
    fn test_app_mapping() {
        assert_eq!(app_for_process("WeChat.exe"), "wechat");
        assert_eq!(app_for_process("Weixin.exe"), "wechat");
        assert_eq!(app_for_process("msedge.exe"), "edge");
        assert_eq!(app_for_process("chrome"), "chrome");
        assert_eq!(app_for_process("code.exe"), "vscode");
        assert_eq!(app_for_process("bash"), UNKNOWN_APP);
    }

    #[test]
    fn test_parse_wmctrl() {
        let out = "0x03a00004  0 1234   host Terminal - bash\n0x04000001 -1 99 host \nbad line\n";
        let rows = CommandWindowManager::parse_wmctrl(out);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].0, "0x03a00004");
        assert_eq!(rows[0].1, 1234);
        assert_eq!(rows[0].2, "Terminal - bash");
    }

    #[test]
    fn test_parse_powershell_rows() {
        let out = "4242\tWeChat\t微信\r\n17\tsvchost\t\r\n";
        let rows = CommandWindowManager::parse_powershell_rows(out);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].process_name, "WeChat.exe");
        assert_eq!(rows[0].title, "微信");
        assert_eq!(app_for_process(&rows[0].process_name), "wechat");
    }

    #[tokio::test]
    async fn test_mock_activation_switches_focus() {
        let wm = MockWindowManager::new("notepad.exe", "Untitled - Notepad");
        wm.add_window("WeChat.exe", "微信").await;
        assert_eq!(wm.detect_app().await, "notepad");

        assert!(wm.activate_window("微信").await.unwrap());
        assert_eq!(wm.detect_app().await, "wechat");
        assert!(!wm.activate_window("Chrome").await.unwrap());
        assert_eq!(wm.activations().await, vec!["微信", "Chrome"]);
    }
}
