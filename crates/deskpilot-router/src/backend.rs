//! # Decision Backends
//!
//! One backend is one model endpoint. A backend call is a single attempt:
//! transport and API failures come back as errors so the failover router
//! can retry, while a reply the backend cannot use at all may still become
//! a Fail decision.

use crate::{AnthropicBackend, OpenAiBackend, Result, RouterError};
use async_trait::async_trait;
use deskpilot_core::config::{BackendConfig, BackendKind, ProjectionConfig};
use deskpilot_core::projector::{CoordinateSpace, Projector};
use deskpilot_core::{Decision, HistoryEntry, ScreenContext};
use deskpilot_desktop::CaptureSettings;
use std::sync::Arc;

/// Everything a backend is asked for one step.
#[derive(Debug, Clone, Copy)]
pub struct DecisionRequest<'a> {
    pub instruction: &'a str,
    pub context: &'a ScreenContext,
    pub history: &'a [HistoryEntry],
    pub step: u32,
}

#[async_trait]
pub trait DecisionBackend: Send + Sync {
    /// Backend name for logs, e.g. "anthropic:claude-sonnet-4"
    fn name(&self) -> &str;

    /// Ask the model for the next decision.
    async fn decide(&self, request: &DecisionRequest<'_>) -> Result<Decision>;

    /// Clear per-task state.
    async fn reset(&self) {}
}

/// Shared request settings derived from the configuration.
#[derive(Debug, Clone)]
pub struct BackendSettings {
    pub projection: ProjectionConfig,
    pub capture: CaptureSettings,
    pub history_window: usize,
}

impl BackendSettings {
    /// Projector for `context`, in `space`. The configured screen size
    /// wins over the captured one.
    pub fn projector(&self, space: CoordinateSpace, context: &ScreenContext) -> Result<Projector> {
        let (width, height) = self
            .projection
            .fixed_screen()
            .unwrap_or_else(|| context.screen_size());
        Projector::with_resize(space, width, height, self.projection.resize_params())
            .map_err(|e| RouterError::ConfigError(e.to_string()))
    }

    /// Base64 model image and its MIME type.
    pub fn encode_image(&self, context: &ScreenContext) -> Result<(String, &'static str)> {
        let data = context
            .model_image
            .to_base64(&self.capture)
            .map_err(|e| RouterError::EncodingError(e.to_string()))?;
        Ok((data, self.capture.format.mime_type()))
    }
}

/// Build the backend described by `config`.
pub fn build_backend(
    config: &BackendConfig,
    settings: BackendSettings,
) -> Result<Arc<dyn DecisionBackend>> {
    if config.model.trim().is_empty() {
        return Err(RouterError::ConfigError("backend model is empty".into()));
    }
    let backend: Arc<dyn DecisionBackend> = match config.kind {
        BackendKind::Anthropic => Arc::new(AnthropicBackend::new(config, settings)?),
        BackendKind::Openai => Arc::new(OpenAiBackend::new(config, settings)?),
    };
    Ok(backend)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use deskpilot_desktop::capture::mock::solid_frame;
    use deskpilot_desktop::Screenshot;

    pub fn settings() -> BackendSettings {
        BackendSettings {
            projection: ProjectionConfig::default(),
            capture: CaptureSettings::default(),
            history_window: 10,
        }
    }

    /// A 2560x1440 capture, downscaled to 1280x720 for the model.
    pub fn context() -> ScreenContext {
        let shot = Screenshot::from_image(solid_frame(2560, 1440, 30), "test");
        ScreenContext::from_screenshot(shot, 1280)
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_projector_prefers_fixed_screen() {
        let mut settings = settings();
        let context = context();
        let projector = settings
            .projector(CoordinateSpace::Relative, &context)
            .unwrap();
        assert_eq!(projector.screen_size(), (2560, 1440));

        settings.projection.screen_width = 1920;
        settings.projection.screen_height = 1080;
        let projector = settings
            .projector(CoordinateSpace::Relative, &context)
            .unwrap();
        assert_eq!(projector.screen_size(), (1920, 1080));
    }

    #[test]
    fn test_build_rejects_empty_model() {
        let config = BackendConfig::anthropic(" ");
        assert!(matches!(
            build_backend(&config, settings()),
            Err(RouterError::ConfigError(_))
        ));
    }
}
