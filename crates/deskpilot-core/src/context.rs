//! Per-step screen context.
//!
//! Before every decision the orchestrator asks a [`ContextSource`] for the
//! current screen, a downscaled copy for the model, and what has focus.

use crate::{CoreError, Result};
use async_trait::async_trait;
use deskpilot_desktop::{
    CaptureSettings, Clipboard, InputSimulator, ScreenCapture, Screenshot, WindowInfo,
    WindowManager, UNKNOWN_APP,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// The operating-system collaborators the core drives.
#[derive(Clone)]
pub struct Desktop {
    pub capture: Arc<dyn ScreenCapture>,
    pub input: Arc<dyn InputSimulator>,
    pub clipboard: Arc<dyn Clipboard>,
    pub windows: Arc<dyn WindowManager>,
}

/// Everything known about the screen at the start of a step.
#[derive(Debug, Clone)]
pub struct ScreenContext {
    /// Full-resolution capture, used for effect comparison.
    pub screenshot: Screenshot,
    /// Copy sent to the model.
    pub model_image: Screenshot,
    /// Factor mapping model-image pixels back to screen pixels.
    pub scale: f64,
    pub active_window: Option<WindowInfo>,
    /// Application identity of the focused window.
    pub app: String,
    pub windows: Vec<WindowInfo>,
    /// Recovery hint added to the prompt for this step.
    pub recovery_hint: Option<String>,
}

impl ScreenContext {
    /// Build a context around a capture with no window information.
    pub fn from_screenshot(screenshot: Screenshot, max_dimension: u32) -> Self {
        let (model_image, scale) = screenshot.downscaled(max_dimension);
        Self {
            screenshot,
            model_image,
            scale,
            active_window: None,
            app: UNKNOWN_APP.to_string(),
            windows: Vec::new(),
            recovery_hint: None,
        }
    }

    pub fn screen_size(&self) -> (u32, u32) {
        (self.screenshot.width(), self.screenshot.height())
    }

    pub fn window_title(&self) -> &str {
        self.active_window
            .as_ref()
            .map(|w| w.title.as_str())
            .unwrap_or("")
    }
}

/// Source of per-step context.
#[async_trait]
pub trait ContextSource: Send + Sync {
    async fn collect(&self) -> Result<ScreenContext>;

    /// A fresh full-resolution capture.
    async fn capture(&self) -> Result<Screenshot>;
}

/// Context collected from the live desktop.
pub struct DesktopContextSource {
    desktop: Desktop,
    settings: CaptureSettings,
}

impl DesktopContextSource {
    pub fn new(desktop: Desktop, settings: CaptureSettings) -> Self {
        Self { desktop, settings }
    }
}

#[async_trait]
impl ContextSource for DesktopContextSource {
    async fn collect(&self) -> Result<ScreenContext> {
        let started = Instant::now();
        let screenshot = self.capture().await?;

        let mut context = ScreenContext::from_screenshot(screenshot, self.settings.max_dimension);

        match self.desktop.windows.active_window().await {
            Ok(window) => {
                context.app = deskpilot_desktop::app_for_process(&window.process_name).to_string();
                context.active_window = Some(window);
            }
            Err(e) => debug!("Active window unavailable: {}", e),
        }
        match self.desktop.windows.list_windows().await {
            Ok(windows) => context.windows = windows,
            Err(e) => debug!("Window list unavailable: {}", e),
        }

        info!(
            app = %context.app,
            scale = context.scale,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Context collected"
        );
        Ok(context)
    }

    async fn capture(&self) -> Result<Screenshot> {
        self.desktop
            .capture
            .capture_screen()
            .await
            .map_err(|e| CoreError::Capture(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deskpilot_desktop::capture::mock::MockCapture;
    use deskpilot_desktop::clipboard::mock::MockClipboard;
    use deskpilot_desktop::input::mock::MockSimulator;
    use deskpilot_desktop::windows::mock::MockWindowManager;

    fn desktop(capture: Arc<dyn ScreenCapture>) -> Desktop {
        Desktop {
            capture,
            input: Arc::new(MockSimulator::new()),
            clipboard: Arc::new(MockClipboard::new()),
            windows: Arc::new(MockWindowManager::new("WeChat.exe", "微信")),
        }
    }

    #[tokio::test]
    async fn test_collect_downscales_and_detects_app() {
        let source = DesktopContextSource::new(
            desktop(Arc::new(MockCapture::solid(2560, 1440, 10))),
            CaptureSettings::default(),
        );
        let context = source.collect().await.unwrap();

        assert_eq!(context.screen_size(), (2560, 1440));
        assert_eq!(context.model_image.width(), 1280);
        assert!((context.scale - 2.0).abs() < 1e-9);
        assert_eq!(context.app, "wechat");
        assert_eq!(context.window_title(), "微信");
        assert_eq!(context.recovery_hint, None);
    }

    #[tokio::test]
    async fn test_capture_failure_is_reported() {
        use deskpilot_desktop::capture::mock::UnavailableCapture;
        let source = DesktopContextSource::new(
            desktop(Arc::new(UnavailableCapture)),
            CaptureSettings::default(),
        );
        assert!(matches!(
            source.collect().await,
            Err(CoreError::Capture(_))
        ));
    }
}
