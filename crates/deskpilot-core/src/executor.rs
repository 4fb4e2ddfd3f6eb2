//! # Sandboxed Executor
//!
//! Runs compiled scripts against the desktop. Every script goes through
//! the whitelist validator first; accepted scripts are evaluated by the
//! capability interpreter with [`DesktopHost`] as the only way to reach
//! the operating system.
//!
//! ```text
//! script ──► sentinel? ──► duplicate? ──► validate ──► interpret ──► DesktopHost
//!              │               │             │             │
//!              ▼               ▼             ▼             ▼
//!          fixed result   "Skipped"    "unsafe code"  "Execution error"
//! ```
//!
//! Nothing here returns an error to the caller: every outcome is an
//! [`ExecutionResult`].

use crate::action::Sentinel;
use crate::config::{Platform, SandboxConfig};
use crate::context::Desktop;
use crate::preload::ClipboardPreload;
use crate::script::{validate, Host, Interpreter, Invocation, RuntimeError, Value, WhitelistPolicy};
use async_trait::async_trait;
use deskpilot_desktop::{Key, KeyInput, MouseAction};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Delay between the paste that consumed the preload and loading the file.
const FILE_PRELOAD_DELAY: Duration = Duration::from_secs(1);

/// Outcome of one script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub message: Option<String>,
    pub error: Option<String>,
}

impl ExecutionResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>, message: Option<String>) -> Self {
        Self {
            success: false,
            message,
            error: Some(error.into()),
        }
    }

    /// The sentinel this result stands for, if any.
    pub fn sentinel(&self) -> Option<Sentinel> {
        self.message.as_deref().and_then(Sentinel::parse)
    }
}

/// Interpreter host backed by the desktop collaborators.
pub struct DesktopHost {
    desktop: Desktop,
    preload: Arc<ClipboardPreload>,
    platform: Platform,
    min_substitution_len: usize,
    /// Text copied so far in the current run.
    last_copy: Mutex<Option<String>>,
}

impl DesktopHost {
    pub fn new(desktop: Desktop, preload: Arc<ClipboardPreload>, config: &SandboxConfig) -> Self {
        Self {
            desktop,
            preload,
            platform: config.platform,
            min_substitution_len: config.min_substitution_len,
            last_copy: Mutex::new(None),
        }
    }

    fn begin_run(&self) {
        *self.last_copy.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    fn record_copy(&self, text: &str) {
        *self.last_copy.lock().unwrap_or_else(|e| e.into_inner()) = Some(text.to_string());
    }

    fn paste_chord(&self) -> Vec<KeyInput> {
        let modifier = match self.platform {
            Platform::Macos => Key::Meta,
            Platform::Windows | Platform::Linux => Key::Control,
        };
        vec![modifier.into(), 'v'.into()]
    }

    fn is_paste(keys: &[KeyInput]) -> bool {
        keys.len() == 2
            && matches!(
                keys[0],
                KeyInput::Special(Key::Control) | KeyInput::Special(Key::Meta)
            )
            && keys[1] == KeyInput::Char('v')
    }

    /// A paste of whatever the preload put on the clipboard counts as
    /// consuming it. Pasting text the script copied itself does not,
    /// unless that text is the preload.
    fn note_paste(&self) {
        let last_copy = self
            .last_copy
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let pastes_preload = match (last_copy, self.preload.text()) {
            (None, _) => true,
            (Some(copied), Some(preload)) => copied.trim() == preload.trim(),
            (Some(_), None) => false,
        };
        if pastes_preload && self.preload.consume() {
            info!("Clipboard preload consumed by paste");
        }
    }

    /// Put `text` on the clipboard, or the pending preload in its place.
    async fn copy(&self, text: &str) -> Result<(), RuntimeError> {
        let substituted = self.preload.substitute(text, self.min_substitution_len);
        let text = substituted.as_deref().unwrap_or(text);
        self.desktop
            .clipboard
            .set_text(text)
            .await
            .map_err(|e| RuntimeError::Host(e.to_string()))?;
        self.record_copy(text);
        Ok(())
    }
}

fn host_error(e: impl std::fmt::Display) -> RuntimeError {
    RuntimeError::Host(e.to_string())
}

#[async_trait]
impl Host for DesktopHost {
    async fn perform(&self, invocation: Invocation) -> Result<Value, RuntimeError> {
        let input = &self.desktop.input;
        match invocation {
            Invocation::Click {
                position,
                button,
                clicks,
            } => {
                let action = MouseAction {
                    position,
                    button,
                    clicks,
                };
                input.mouse_click(&action).await.map_err(host_error)?;
            }
            Invocation::MoveTo { x, y } => input.mouse_move(x, y).await.map_err(host_error)?,
            Invocation::MoveRel { dx, dy } => {
                let (x, y) = input.mouse_position().await.map_err(host_error)?;
                input
                    .mouse_move(x.saturating_add(dx), y.saturating_add(dy))
                    .await
                    .map_err(host_error)?;
            }
            Invocation::DragTo { x, y, button } => {
                input.drag_to(x, y, button).await.map_err(host_error)?
            }
            Invocation::DragRel { dx, dy, button } => {
                let (x, y) = input.mouse_position().await.map_err(host_error)?;
                input
                    .drag_to(x.saturating_add(dx), y.saturating_add(dy), button)
                    .await
                    .map_err(host_error)?;
            }
            Invocation::Scroll {
                amount,
                axis,
                position,
            } => {
                if let Some((x, y)) = position {
                    input.mouse_move(x, y).await.map_err(host_error)?;
                }
                input.mouse_scroll(amount, axis).await.map_err(host_error)?;
            }
            Invocation::Press { keys, presses } => {
                for _ in 0..presses {
                    for key in &keys {
                        input.key_press(*key).await.map_err(host_error)?;
                    }
                }
            }
            Invocation::KeyDown(key) => input.key_down(key).await.map_err(host_error)?,
            Invocation::KeyUp(key) => input.key_up(key).await.map_err(host_error)?,
            Invocation::Hotkey(keys) => {
                if Self::is_paste(&keys) {
                    self.note_paste();
                }
                input.chord(&keys).await.map_err(host_error)?;
            }
            Invocation::Write(text) => {
                // Keystroke injection is unreliable for non-ASCII text
                self.copy(&text).await?;
                let chord = self.paste_chord();
                self.note_paste();
                input.chord(&chord).await.map_err(host_error)?;
            }
            Invocation::Screenshot => {
                self.desktop
                    .capture
                    .capture_screen()
                    .await
                    .map_err(host_error)?;
            }
            Invocation::Position => {
                let (x, y) = input.mouse_position().await.map_err(host_error)?;
                return Ok(Value::Tuple(vec![Value::Int(x as i64), Value::Int(y as i64)]));
            }
            Invocation::Size => {
                let (w, h) = self
                    .desktop
                    .capture
                    .screen_size()
                    .await
                    .map_err(host_error)?;
                return Ok(Value::Tuple(vec![Value::Int(w as i64), Value::Int(h as i64)]));
            }
            Invocation::Sleep(duration) => tokio::time::sleep(duration).await,
            Invocation::Copy(text) => self.copy(&text).await?,
            Invocation::Paste => {
                let text = self
                    .desktop
                    .clipboard
                    .get_text()
                    .await
                    .map_err(host_error)?;
                return Ok(Value::Str(text));
            }
        }
        Ok(Value::None)
    }
}

/// Validates and runs scripts for one task.
pub struct SandboxedExecutor {
    host: DesktopHost,
    policy: Arc<WhitelistPolicy>,
    max_sleep: Duration,
    last_script: Option<String>,
    repeat_count: u32,
}

impl SandboxedExecutor {
    pub fn new(desktop: Desktop, preload: Arc<ClipboardPreload>, config: &SandboxConfig) -> Self {
        Self {
            host: DesktopHost::new(desktop, preload, config),
            policy: WhitelistPolicy::shared(),
            max_sleep: config.max_sleep(),
            last_script: None,
            repeat_count: 0,
        }
    }

    pub fn with_policy(mut self, policy: Arc<WhitelistPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Forget the duplicate-detection state.
    pub fn reset(&mut self) {
        self.last_script = None;
        self.repeat_count = 0;
    }

    pub async fn execute(&mut self, script: &str) -> ExecutionResult {
        match Sentinel::parse(script) {
            Some(Sentinel::Wait) => {
                info!("Executing WAIT command");
                return ExecutionResult::ok(Sentinel::Wait.as_str());
            }
            Some(Sentinel::Done) => {
                info!("Task completed successfully");
                return ExecutionResult::ok(Sentinel::Done.as_str());
            }
            Some(Sentinel::Fail) => {
                warn!("Task failed");
                return ExecutionResult::failed("Task failed", Some(Sentinel::Fail.to_string()));
            }
            None => {}
        }

        if self.last_script.as_deref() == Some(script) {
            self.repeat_count += 1;
            if self.repeat_count >= 2 {
                warn!(
                    repeat = self.repeat_count,
                    "Skipping repeated execution: {}",
                    preview(script)
                );
                return ExecutionResult::ok("Skipped duplicate");
            }
        } else {
            self.last_script = Some(script.to_string());
            self.repeat_count = 0;
        }

        let program = match validate(script, &self.policy) {
            Ok(program) => program,
            Err(rejection) => {
                warn!("Script rejected: {}", rejection);
                return ExecutionResult::failed("unsafe code", Some(rejection.to_string()));
            }
        };

        debug!("Executing script: {}", preview(script));
        self.host.begin_run();
        let mut interpreter = Interpreter::new(&self.host).with_max_sleep(self.max_sleep);
        if let Err(e) = interpreter.run(&program).await {
            warn!("Script execution failed: {}", e);
            return ExecutionResult::failed(format!("Execution error: {}", e), None);
        }

        self.load_due_file().await;
        ExecutionResult::ok("Executed successfully")
    }

    /// Put the file preload on the clipboard once its text has been pasted.
    async fn load_due_file(&self) {
        let Some(path) = self.host.preload.take_due_file() else {
            return;
        };
        tokio::time::sleep(FILE_PRELOAD_DELAY).await;
        info!("Loading file preload into clipboard: {}", path.display());
        if let Err(e) = self.host.desktop.clipboard.set_file(&path).await {
            warn!("Failed to load file preload: {}", e);
        }
    }
}

fn preview(script: &str) -> String {
    script.chars().take(80).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use deskpilot_desktop::capture::mock::MockCapture;
    use deskpilot_desktop::clipboard::mock::{ClipboardContent, MockClipboard};
    use deskpilot_desktop::input::mock::MockSimulator;
    use deskpilot_desktop::windows::mock::MockWindowManager;
    use std::path::PathBuf;

    struct Fixture {
        executor: SandboxedExecutor,
        input: Arc<MockSimulator>,
        clipboard: Arc<MockClipboard>,
        preload: Arc<ClipboardPreload>,
    }

    fn fixture() -> Fixture {
        let input = Arc::new(MockSimulator::new());
        let clipboard = Arc::new(MockClipboard::new());
        let preload = Arc::new(ClipboardPreload::new());
        let desktop = Desktop {
            capture: Arc::new(MockCapture::solid(1920, 1080, 0)),
            input: input.clone(),
            clipboard: clipboard.clone(),
            windows: Arc::new(MockWindowManager::new("notepad.exe", "Untitled")),
        };
        let config = SandboxConfig {
            platform: Platform::Windows,
            ..SandboxConfig::default()
        };
        Fixture {
            executor: SandboxedExecutor::new(desktop, preload.clone(), &config),
            input,
            clipboard,
            preload,
        }
    }

    #[tokio::test]
    async fn test_sentinels_short_circuit() {
        let mut f = fixture();
        assert_eq!(f.executor.execute("WAIT").await, ExecutionResult::ok("WAIT"));
        assert_eq!(f.executor.execute("DONE").await, ExecutionResult::ok("DONE"));

        let fail = f.executor.execute("FAIL").await;
        assert!(!fail.success);
        assert_eq!(fail.message.as_deref(), Some("FAIL"));
        assert_eq!(fail.error.as_deref(), Some("Task failed"));
        assert_eq!(fail.sentinel(), Some(Sentinel::Fail));
        assert!(f.input.actions().await.is_empty());
    }

    #[tokio::test]
    async fn test_third_identical_script_is_skipped() {
        let mut f = fixture();
        let script = "pyautogui.click(x=10, y=20)";

        assert_eq!(f.executor.execute(script).await.message.as_deref(), Some("Executed successfully"));
        assert_eq!(f.executor.execute(script).await.message.as_deref(), Some("Executed successfully"));
        let third = f.executor.execute(script).await;
        assert!(third.success);
        assert_eq!(third.message.as_deref(), Some("Skipped duplicate"));
        assert_eq!(f.input.actions().await.len(), 2);

        // A different script resets the counter
        f.executor.execute("pyautogui.press('enter')").await;
        assert_eq!(f.executor.execute(script).await.message.as_deref(), Some("Executed successfully"));
    }

    #[tokio::test]
    async fn test_unsafe_script_never_runs() {
        let mut f = fixture();
        let result = f.executor.execute("import os\npyautogui.click(x=1, y=1)").await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("unsafe code"));
        assert_eq!(result.message.as_deref(), Some("Disallowed import: os"));
        assert!(f.input.actions().await.is_empty());
    }

    #[tokio::test]
    async fn test_runtime_error_is_reported() {
        let mut f = fixture();
        let result = f.executor.execute("pyautogui.press('nosuchkey')").await;
        assert!(!result.success);
        assert!(result.error.unwrap().starts_with("Execution error:"));
    }

    #[tokio::test]
    async fn test_compiled_actions_reach_the_desktop() {
        let mut f = fixture();
        let result = f
            .executor
            .execute("pyautogui.click(x=800, y=450)\npyperclip.copy('你好')\npyautogui.hotkey('ctrl', 'v')\npyautogui.scroll(-15)")
            .await;
        assert!(result.success, "{:?}", result);

        let actions = f.input.actions().await;
        assert_eq!(actions[0], "click(800, 450, Left, 1)");
        assert!(actions.contains(&"key_down(Special(Control))".to_string()));
        assert!(actions.contains(&"key_down(Char('v'))".to_string()));
        assert_eq!(actions.last().unwrap(), "scroll(-15, Vertical)");
        assert_eq!(
            f.clipboard.content().await,
            ClipboardContent::Text("你好".into())
        );
    }

    #[tokio::test]
    async fn test_write_goes_through_clipboard() {
        let mut f = fixture();
        let result = f.executor.execute("pyautogui.write('héllo')").await;
        assert!(result.success);
        assert_eq!(
            f.clipboard.content().await,
            ClipboardContent::Text("héllo".into())
        );
        assert!(!f
            .input
            .actions()
            .await
            .iter()
            .any(|a| a.starts_with("type(")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_paste_consumes_preload_then_loads_file() {
        let mut f = fixture();
        let file = PathBuf::from("/tmp/report.png");
        f.preload.set(Some("报告".into()), Some(file.clone()));

        let result = f.executor.execute("pyautogui.hotkey('ctrl', 'v')").await;
        assert!(result.success);
        assert!(f.preload.is_consumed());
        assert_eq!(f.clipboard.content().await, ClipboardContent::File(file));
    }

    #[tokio::test]
    async fn test_copy_is_replaced_by_pending_preload() {
        let mut f = fixture();
        f.preload.set(Some("the real message".into()), None);

        let typed = "pyperclip.copy('model guess')\npyautogui.hotkey('ctrl', 'v')";
        assert!(f.executor.execute(typed).await.success);
        assert!(f.preload.is_consumed());
        assert_eq!(
            f.clipboard.content().await,
            ClipboardContent::Text("the real message".into())
        );

        assert!(f.executor.execute(typed).await.success);
        assert_eq!(
            f.clipboard.content().await,
            ClipboardContent::Text("model guess".into())
        );
    }

    #[tokio::test]
    async fn test_skipped_duplicate_keeps_preload() {
        let mut f = fixture();
        let typed = "pyperclip.copy('model guess')\npyautogui.hotkey('ctrl', 'v')";
        f.executor.execute(typed).await;
        f.executor.execute(typed).await;

        f.preload.set(Some("the real message".into()), None);
        let skipped = f.executor.execute(typed).await;
        assert_eq!(skipped.message.as_deref(), Some("Skipped duplicate"));
        assert!(f.preload.is_pending());

        let typed_again = "pyautogui.click(x=5, y=5)\npyperclip.copy('model guess')\npyautogui.hotkey('ctrl', 'v')";
        assert!(f.executor.execute(typed_again).await.success);
        assert_eq!(
            f.clipboard.content().await,
            ClipboardContent::Text("the real message".into())
        );
    }

    #[tokio::test]
    async fn test_pasting_own_copy_keeps_preload() {
        let mut f = fixture();
        f.preload.set(Some("预设".into()), None);

        f.executor
            .execute("pyperclip.copy('ok')\npyautogui.hotkey('ctrl', 'v')")
            .await;
        assert!(f.preload.is_pending());
    }
}
