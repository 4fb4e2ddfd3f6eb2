//! Focus-drift and error-dialog detection.
//!
//! The recovery manager never acts on the task itself. It may refocus the
//! expected application once, and otherwise produces a hint that is added
//! to the next prompt.

use chrono::{DateTime, Utc};
use deskpilot_desktop::{app_for_process, Screenshot, WindowManager, UNKNOWN_APP};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Checkpoints kept per task.
pub const MAX_CHECKPOINTS: usize = 10;

/// Title fragments that suggest an error or warning dialog.
const DIALOG_KEYWORDS: &[&str] = &["错误", "Error", "警告", "Warning"];

/// Window titles used to bring an application back to the foreground.
const APP_TITLES: &[(&str, &str)] = &[("wechat", "微信"), ("chrome", "Chrome"), ("edge", "Edge")];

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RecoveryOutcome {
    pub needs_recovery: bool,
    pub hint: Option<String>,
}

impl RecoveryOutcome {
    fn clear() -> Self {
        Self::default()
    }

    fn hint(needs_recovery: bool, hint: String) -> Self {
        Self {
            needs_recovery,
            hint: Some(hint),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub step: u32,
    pub screenshot: Screenshot,
    pub taken_at: DateTime<Utc>,
}

pub struct RecoveryManager {
    windows: Arc<dyn WindowManager>,
    checkpoints: VecDeque<Checkpoint>,
}

impl RecoveryManager {
    pub fn new(windows: Arc<dyn WindowManager>) -> Self {
        Self {
            windows,
            checkpoints: VecDeque::with_capacity(MAX_CHECKPOINTS),
        }
    }

    pub fn save_checkpoint(&mut self, step: u32, screenshot: Screenshot) {
        if self.checkpoints.len() == MAX_CHECKPOINTS {
            self.checkpoints.pop_front();
        }
        self.checkpoints.push_back(Checkpoint {
            step,
            screenshot,
            taken_at: Utc::now(),
        });
    }

    pub fn latest_checkpoint(&self) -> Option<&Checkpoint> {
        self.checkpoints.back()
    }

    /// An outcome that needs the model's attention, logged against the
    /// last known-good checkpoint.
    fn needs_recovery(&self, step: u32, hint: String) -> RecoveryOutcome {
        match self.latest_checkpoint() {
            Some(checkpoint) => warn!(
                step,
                checkpoint_step = checkpoint.step,
                checkpoint_age_ms = (Utc::now() - checkpoint.taken_at).num_milliseconds(),
                "Recovery needed: {}",
                hint
            ),
            None => warn!(step, "Recovery needed: {}", hint),
        }
        RecoveryOutcome::hint(true, hint)
    }

    /// Compare the focused application with `expected_app` and look for
    /// an error dialog in the foreground.
    pub async fn check_and_recover(&self, step: u32, expected_app: &str) -> RecoveryOutcome {
        let active = match self.windows.active_window().await {
            Ok(window) => window,
            Err(e) => {
                debug!("Recovery check skipped at step {}: {}", step, e);
                return RecoveryOutcome::clear();
            }
        };
        let current_app = app_for_process(&active.process_name);

        if expected_app != UNKNOWN_APP && current_app != expected_app {
            warn!(
                step,
                "App switched: expected={}, current={}", expected_app, current_app
            );
            if let Some((_, title)) = APP_TITLES.iter().find(|(app, _)| *app == expected_app) {
                match self.windows.activate_window(title).await {
                    Ok(true) => {
                        info!("Refocused {}", expected_app);
                        return RecoveryOutcome::hint(
                            false,
                            format!("Auto-switched back to {}", expected_app),
                        );
                    }
                    Ok(false) => {}
                    Err(e) => debug!("Activation of '{}' failed: {}", title, e),
                }
            }
            return self.needs_recovery(
                step,
                format!(
                    "Target app '{}' lost focus. Current: {}",
                    expected_app, current_app
                ),
            );
        }

        if !active.title.is_empty() && DIALOG_KEYWORDS.iter().any(|kw| active.title.contains(kw)) {
            return self.needs_recovery(
                step,
                format!(
                    "Error dialog detected: {}. Try pressing Escape or clicking Cancel.",
                    active.title
                ),
            );
        }

        RecoveryOutcome::clear()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deskpilot_desktop::capture::mock::solid_frame;
    use deskpilot_desktop::windows::mock::MockWindowManager;

    #[tokio::test]
    async fn test_no_drift_no_hint() {
        let windows = Arc::new(MockWindowManager::new("WeChat.exe", "微信"));
        let manager = RecoveryManager::new(windows);
        assert_eq!(
            manager.check_and_recover(1, "wechat").await,
            RecoveryOutcome::clear()
        );
        assert_eq!(
            manager.check_and_recover(1, UNKNOWN_APP).await,
            RecoveryOutcome::clear()
        );
    }

    #[tokio::test]
    async fn test_drift_is_repaired_by_activation() {
        let windows = Arc::new(MockWindowManager::new("notepad.exe", "Untitled - Notepad"));
        windows.add_window("WeChat.exe", "微信").await;
        let manager = RecoveryManager::new(windows.clone());

        let outcome = manager.check_and_recover(2, "wechat").await;
        assert!(!outcome.needs_recovery);
        assert_eq!(outcome.hint.as_deref(), Some("Auto-switched back to wechat"));
        assert_eq!(windows.activations().await, vec!["微信".to_string()]);
    }

    #[tokio::test]
    async fn test_drift_without_known_title_needs_recovery() {
        let windows = Arc::new(MockWindowManager::new("notepad.exe", "Untitled - Notepad"));
        let manager = RecoveryManager::new(windows.clone());

        let outcome = manager.check_and_recover(3, "excel").await;
        assert!(outcome.needs_recovery);
        assert_eq!(
            outcome.hint.as_deref(),
            Some("Target app 'excel' lost focus. Current: notepad")
        );
        assert!(windows.activations().await.is_empty());
    }

    #[tokio::test]
    async fn test_error_dialog_detected() {
        let windows = Arc::new(MockWindowManager::new("chrome.exe", "Error - Chrome"));
        let mut manager = RecoveryManager::new(windows);
        manager.save_checkpoint(1, Screenshot::from_image(solid_frame(2, 2, 0), "test"));
        let outcome = manager.check_and_recover(1, "chrome").await;
        assert!(outcome.needs_recovery);
        assert_eq!(
            outcome.hint.as_deref(),
            Some("Error dialog detected: Error - Chrome. Try pressing Escape or clicking Cancel.")
        );
    }

    #[test]
    fn test_checkpoints_are_bounded() {
        let windows = Arc::new(MockWindowManager::new("notepad.exe", "n"));
        let mut manager = RecoveryManager::new(windows);
        for step in 1..=15 {
            manager.save_checkpoint(step, Screenshot::from_image(solid_frame(2, 2, 0), "test"));
        }
        assert_eq!(manager.checkpoints.len(), MAX_CHECKPOINTS);
        assert_eq!(manager.checkpoints.front().map(|c| c.step), Some(6));
        assert_eq!(manager.latest_checkpoint().map(|c| c.step), Some(15));
    }
}
