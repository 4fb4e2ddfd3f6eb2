//! # Deskpilot Router
//!
//! Decision backends that turn a screenshot, the task instruction and the
//! step history into one [`Decision`](deskpilot_core::Decision).
//!
//! ## Supported Backends
//!
//! - Anthropic Messages API: JSON actions in model-image pixels
//! - OpenAI-compatible chat completions: restricted script in a code block,
//!   with coordinates in the configured convention
//!
//! ## Failover
//!
//! [`FailoverRouter`] tries backends in order, retrying each with bounded
//! exponential backoff. When every backend is exhausted it answers with a
//! Fail decision instead of an error.

pub mod anthropic;
pub mod backend;
pub mod failover;
pub mod openai;
pub mod parse;
pub mod prompt;

pub use anthropic::AnthropicBackend;
pub use backend::{build_backend, BackendSettings, DecisionBackend, DecisionRequest};
pub use failover::{backoff_delay, FailoverRouter};
pub use openai::OpenAiBackend;

use thiserror::Error;

/// Router errors
#[derive(Error, Debug)]
pub enum RouterError {
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Image encoding failed: {0}")]
    EncodingError(String),

    #[error("Serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

pub type Result<T> = std::result::Result<T, RouterError>;
