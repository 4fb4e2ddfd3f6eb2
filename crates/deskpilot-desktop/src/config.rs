//! Configuration for desktop collaborators.
//!
//! This module provides:
//! - Capture encoding settings (format, quality)
//! - The downscale bound applied to images sent to the decision model

use serde::{Deserialize, Serialize};

/// Image format for screen captures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    /// PNG format (lossless, larger files)
    #[default]
    Png,
    /// JPEG format (lossy, smaller files)
    Jpeg,
}

impl ImageFormat {
    /// Get the file extension for this format.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
        }
    }

    /// Get the MIME type for this format.
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
        }
    }
}

/// Capture quality settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    /// Image format for encoded captures
    pub format: ImageFormat,
    /// JPEG quality (1-100), only used for JPEG format
    pub jpeg_quality: u8,
    /// Maximum image dimension (width or height) of the model image.
    /// Larger captures are scaled down and the scale factor is reported.
    pub max_dimension: u32,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            format: ImageFormat::Png,
            jpeg_quality: 85,
            max_dimension: 1280,
        }
    }
}

impl CaptureSettings {
    /// Set the downscale bound.
    pub fn with_max_dimension(mut self, max_dimension: u32) -> Self {
        self.max_dimension = max_dimension;
        self
    }

    /// Set the encoding format.
    pub fn with_format(mut self, format: ImageFormat) -> Self {
        self.format = format;
        self
    }

    /// Validate the settings.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_dimension == 0 {
            return Err("capture.max_dimension must be positive".to_string());
        }
        if self.jpeg_quality == 0 || self.jpeg_quality > 100 {
            return Err("capture.jpeg_quality must be within 1..=100".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_are_valid() {
        assert!(CaptureSettings::default().validate().is_ok());
    }

    #[test]
    fn test_zero_dimension_rejected() {
        let settings = CaptureSettings::default().with_max_dimension(0);
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_format_metadata() {
        assert_eq!(ImageFormat::Png.mime_type(), "image/png");
        assert_eq!(ImageFormat::Jpeg.extension(), "jpg");
    }
}
