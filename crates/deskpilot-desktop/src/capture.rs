//! Screen capture for the agent loop.
//!
//! This module provides:
//! - Platform-abstracted screen capture via the `ScreenCapture` trait
//! - Primary-monitor capture (xcap, behind `gui-automation`)
//! - Downscaling for model input with the scale factor needed to map back
//! - PNG/JPEG encoding, base64 and data-URL helpers

use crate::config::{CaptureSettings, ImageFormat};
use async_trait::async_trait;
use image::{DynamicImage, GenericImageView};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use thiserror::Error;

/// Errors that can occur during screen capture.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Screen capture not available on this platform")]
    NotAvailable,

    #[error("Failed to capture screen: {0}")]
    CaptureFailed(String),

    #[error("Monitor not found: {0}")]
    MonitorNotFound(u32),

    #[error("Image encoding failed: {0}")]
    EncodingFailed(String),
}

/// Result type for capture operations.
pub type CaptureResult<T> = Result<T, CaptureError>;

/// A rectangular region on the screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    /// X coordinate of the top-left corner
    pub x: i32,
    /// Y coordinate of the top-left corner
    pub y: i32,
    /// Width of the region
    pub width: u32,
    /// Height of the region
    pub height: u32,
}

impl Region {
    /// Create a new region.
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// A captured screenshot.
#[derive(Debug, Clone)]
pub struct Screenshot {
    /// The captured image
    pub image: DynamicImage,
    /// Region that was captured
    pub region: Region,
    /// Timestamp of capture (Unix milliseconds)
    pub timestamp: i64,
    /// Source of the capture (monitor name, "mock", ...)
    pub source: String,
}

impl Screenshot {
    /// Create a new screenshot from an image.
    pub fn new(image: DynamicImage, region: Region, source: impl Into<String>) -> Self {
        Self {
            image,
            region,
            timestamp: chrono::Utc::now().timestamp_millis(),
            source: source.into(),
        }
    }

    /// Wrap an image captured at the origin.
    pub fn from_image(image: DynamicImage, source: impl Into<String>) -> Self {
        let (width, height) = image.dimensions();
        Self::new(image, Region::new(0, 0, width, height), source)
    }

    /// Get the width of the screenshot.
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    /// Get the height of the screenshot.
    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Shrink so the longer side fits `max_dimension`.
    ///
    /// Returns the resized screenshot and the factor that maps image
    /// coordinates back to capture coordinates (`>= 1.0`).
    pub fn downscaled(&self, max_dimension: u32) -> (Screenshot, f64) {
        let longest = self.width().max(self.height());
        if max_dimension == 0 || longest <= max_dimension {
            return (self.clone(), 1.0);
        }

        let ratio = max_dimension as f64 / longest as f64;
        let new_width = ((self.width() as f64 * ratio) as u32).max(1);
        let new_height = ((self.height() as f64 * ratio) as u32).max(1);
        let image = self
            .image
            .resize_exact(new_width, new_height, image::imageops::FilterType::Triangle);

        let scale = self.width() as f64 / new_width as f64;
        let resized = Screenshot {
            image,
            region: self.region,
            timestamp: self.timestamp,
            source: format!("{} (scaled)", self.source),
        };
        (resized, scale)
    }

    /// Encode the screenshot to bytes in the configured format.
    pub fn encode(&self, settings: &CaptureSettings) -> CaptureResult<Vec<u8>> {
        let mut buffer = Cursor::new(Vec::new());

        match settings.format {
            ImageFormat::Png => {
                self.image
                    .write_to(&mut buffer, image::ImageFormat::Png)
                    .map_err(|e| CaptureError::EncodingFailed(e.to_string()))?;
            }
            ImageFormat::Jpeg => {
                let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(
                    &mut buffer,
                    settings.jpeg_quality,
                );
                // JPEG has no alpha channel
                DynamicImage::ImageRgb8(self.image.to_rgb8())
                    .write_with_encoder(encoder)
                    .map_err(|e| CaptureError::EncodingFailed(e.to_string()))?;
            }
        }

        Ok(buffer.into_inner())
    }

    /// Encode to base64 for API transmission.
    pub fn to_base64(&self, settings: &CaptureSettings) -> CaptureResult<String> {
        let bytes = self.encode(settings)?;
        Ok(base64::Engine::encode(
            &base64::engine::general_purpose::STANDARD,
            &bytes,
        ))
    }

    /// Encode as a `data:` URL.
    pub fn to_data_url(&self, settings: &CaptureSettings) -> CaptureResult<String> {
        Ok(format!(
            "data:{};base64,{}",
            settings.format.mime_type(),
            self.to_base64(settings)?
        ))
    }
}

/// Trait for platform-specific screen capture implementations.
#[async_trait]
pub trait ScreenCapture: Send + Sync {
    /// Check if screen capture is available on this platform.
    fn is_available(&self) -> bool;

    /// Capture the primary screen.
    async fn capture_screen(&self) -> CaptureResult<Screenshot>;

    /// Size of the primary screen in pixels.
    async fn screen_size(&self) -> CaptureResult<(u32, u32)> {
        let shot = self.capture_screen().await?;
        Ok((shot.width(), shot.height()))
    }
}

/// Platform-specific screen capture implementation using xcap.
#[cfg(feature = "gui-automation")]
pub mod platform {
    use super::*;
    use image::{ImageBuffer, Rgba};

    /// Primary-monitor capture backed by xcap.
    #[derive(Debug, Default)]
    pub struct XcapCapture;

    impl XcapCapture {
        /// Create a new xcap-based capture implementation.
        pub fn new() -> Self {
            Self
        }

        fn capture_primary() -> CaptureResult<Screenshot> {
            let monitor = xcap::Monitor::all()
                .map_err(|e| CaptureError::CaptureFailed(e.to_string()))?
                .into_iter()
                .find(|m| m.is_primary().unwrap_or(false))
                .ok_or(CaptureError::MonitorNotFound(0))?;

            let capture = monitor
                .capture_image()
                .map_err(|e| CaptureError::CaptureFailed(e.to_string()))?;

            let width = capture.width();
            let height = capture.height();
            let buffer: ImageBuffer<Rgba<u8>, Vec<u8>> =
                ImageBuffer::from_raw(width, height, capture.into_raw()).ok_or_else(|| {
                    CaptureError::CaptureFailed("Failed to create image buffer".to_string())
                })?;

            let x = monitor.x().unwrap_or(0);
            let y = monitor.y().unwrap_or(0);
            let name = monitor.name().unwrap_or_else(|_| "primary".to_string());

            Ok(Screenshot::new(
                DynamicImage::ImageRgba8(buffer),
                Region::new(x, y, width, height),
                name,
            ))
        }
    }

    #[async_trait]
    impl ScreenCapture for XcapCapture {
        fn is_available(&self) -> bool {
            true
        }

        async fn capture_screen(&self) -> CaptureResult<Screenshot> {
            tokio::task::spawn_blocking(Self::capture_primary)
                .await
                .map_err(|e| CaptureError::CaptureFailed(e.to_string()))?
        }
    }
}

/// Create the default screen capture implementation for the current platform.
#[cfg(feature = "gui-automation")]
pub fn create_screen_capture() -> Box<dyn ScreenCapture> {
    Box::new(platform::XcapCapture::new())
}

/// Create the default screen capture implementation for the current platform.
#[cfg(not(feature = "gui-automation"))]
pub fn create_screen_capture() -> Box<dyn ScreenCapture> {
    Box::new(mock::UnavailableCapture)
}

/// Mock screen capture for testing or when gui-automation is disabled.
pub mod mock {
    use super::*;
    use image::{GrayImage, Luma};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Capture that always reports the platform as unavailable.
    pub struct UnavailableCapture;

    #[async_trait]
    impl ScreenCapture for UnavailableCapture {
        fn is_available(&self) -> bool {
            false
        }

        async fn capture_screen(&self) -> CaptureResult<Screenshot> {
            Err(CaptureError::NotAvailable)
        }
    }

    /// Capture that replays queued frames, then repeats the last one.
    pub struct MockCapture {
        frames: Mutex<VecDeque<DynamicImage>>,
        last: Mutex<DynamicImage>,
    }

    impl MockCapture {
        /// A capture that always returns a uniform grey frame.
        pub fn solid(width: u32, height: u32, luma: u8) -> Self {
            Self::with_frames(vec![solid_frame(width, height, luma)])
        }

        /// A capture that returns `frames` in order.
        pub fn with_frames(frames: Vec<DynamicImage>) -> Self {
            let last = frames
                .last()
                .cloned()
                .unwrap_or_else(|| solid_frame(1, 1, 0));
            Self {
                frames: Mutex::new(frames.into()),
                last: Mutex::new(last),
            }
        }

        /// Queue another frame.
        pub fn push_frame(&self, frame: DynamicImage) {
            if let Ok(mut frames) = self.frames.lock() {
                frames.push_back(frame);
            }
        }
    }

    /// Build a uniform greyscale frame.
    pub fn solid_frame(width: u32, height: u32, luma: u8) -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::from_pixel(width, height, Luma([luma])))
    }

    #[async_trait]
    impl ScreenCapture for MockCapture {
        fn is_available(&self) -> bool {
            true
        }

        async fn capture_screen(&self) -> CaptureResult<Screenshot> {
            let mut frames = self
                .frames
                .lock()
                .map_err(|e| CaptureError::CaptureFailed(e.to_string()))?;
            let mut last = self
                .last
                .lock()
                .map_err(|e| CaptureError::CaptureFailed(e.to_string()))?;

            if let Some(frame) = frames.pop_front() {
                *last = frame;
            }
            Ok(Screenshot::from_image(last.clone(), "mock"))
        }
    }
}
