//! # Configuration
//!
//! Service configuration with sensible defaults.
//!
//! ## Configuration Sources (in priority order)
//!
//! 1. Command-line flags (applied by the binary)
//! 2. `DESKPILOT_*` environment variables
//! 3. File passed with `--config`
//! 4. Global config (`~/.config/deskpilot/config.toml`)
//! 5. Built-in defaults
//!
//! ## Example
//!
//! ```toml
//! [server]
//! port = 8100
//! api_key = "change-me"
//!
//! [sandbox]
//! platform = "windows"
//!
//! [[router.backends]]
//! kind = "anthropic"
//! model = "claude-sonnet-4-20250514"
//! ```

use crate::projector::{
    CoordinateSpace, ResizeParams, DEFAULT_ALIGNMENT_FACTOR, DEFAULT_MAX_PIXELS,
    DEFAULT_MIN_PIXELS,
};
use deskpilot_desktop::CaptureSettings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Configuration not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Operating system the sandbox emits input for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Windows,
    Linux,
    Macos,
}

impl Platform {
    /// The platform this binary was built for.
    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            Self::Windows
        } else if cfg!(target_os = "macos") {
            Self::Macos
        } else {
            Self::Linux
        }
    }

    /// Wheel multiplier applied when none is configured.
    pub fn default_scroll_factor(self) -> i32 {
        match self {
            Self::Windows => 5,
            Self::Linux | Self::Macos => 1,
        }
    }

    /// Modifier held for paste.
    pub fn paste_modifier(self) -> &'static str {
        match self {
            Self::Macos => "command",
            Self::Windows | Self::Linux => "ctrl",
        }
    }
}

impl Default for Platform {
    fn default() -> Self {
        Self::current()
    }
}

impl std::str::FromStr for Platform {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "windows" | "win" => Ok(Self::Windows),
            "linux" => Ok(Self::Linux),
            "macos" | "mac" | "darwin" => Ok(Self::Macos),
            other => Err(ConfigError::InvalidConfig(format!(
                "Unknown platform: {}",
                other
            ))),
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Bearer token every request must carry
    #[serde(default)]
    pub api_key: Option<String>,

    /// Log level when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8100
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            api_key: None,
            log_level: default_log_level(),
        }
    }
}

/// Task loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Step budget when a request does not set one
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,

    /// Wall-clock budget when a request does not set one
    #[serde(default = "default_task_timeout")]
    pub task_timeout_secs: u64,

    /// Pause after a WAIT decision
    #[serde(default = "default_wait_delay")]
    pub wait_delay_secs: u64,

    /// Pause after every executed action
    #[serde(default = "default_settle_delay")]
    pub settle_delay_ms: u64,

    /// How long a send waits for confirmation
    #[serde(default = "default_confirm_timeout")]
    pub confirm_timeout_secs: u64,

    /// Post-send verification rounds
    #[serde(default = "default_send_verify_rounds")]
    pub send_verify_rounds: u32,

    /// Pause before each verification round
    #[serde(default = "default_send_verify_delay")]
    pub send_verify_delay_secs: u64,

    /// Registry capacity
    #[serde(default = "default_max_tasks")]
    pub max_tasks: usize,

    #[serde(default = "default_max_prompt_len")]
    pub max_prompt_len: usize,

    #[serde(default = "default_max_clipboard_preload_len")]
    pub max_clipboard_preload_len: usize,

    #[serde(default = "default_max_file_preload_len")]
    pub max_file_preload_len: usize,
}

fn default_max_steps() -> u32 {
    30
}

fn default_task_timeout() -> u64 {
    1800
}

fn default_wait_delay() -> u64 {
    20
}

fn default_settle_delay() -> u64 {
    1000
}

fn default_confirm_timeout() -> u64 {
    300
}

fn default_send_verify_rounds() -> u32 {
    3
}

fn default_send_verify_delay() -> u64 {
    3
}

fn default_max_tasks() -> usize {
    50
}

fn default_max_prompt_len() -> usize {
    10_000
}

fn default_max_clipboard_preload_len() -> usize {
    1000
}

fn default_max_file_preload_len() -> usize {
    500
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            task_timeout_secs: default_task_timeout(),
            wait_delay_secs: default_wait_delay(),
            settle_delay_ms: default_settle_delay(),
            confirm_timeout_secs: default_confirm_timeout(),
            send_verify_rounds: default_send_verify_rounds(),
            send_verify_delay_secs: default_send_verify_delay(),
            max_tasks: default_max_tasks(),
            max_prompt_len: default_max_prompt_len(),
            max_clipboard_preload_len: default_max_clipboard_preload_len(),
            max_file_preload_len: default_max_file_preload_len(),
        }
    }
}

impl AgentConfig {
    pub fn wait_delay(&self) -> Duration {
        Duration::from_secs(self.wait_delay_secs)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_secs(self.confirm_timeout_secs)
    }

    pub fn send_verify_delay(&self) -> Duration {
        Duration::from_secs(self.send_verify_delay_secs)
    }
}

/// Script sandbox configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Target platform (defaults to the build platform)
    #[serde(default)]
    pub platform: Platform,

    /// Wheel multiplier; the platform default when unset
    #[serde(default)]
    pub scroll_factor: Option<i32>,

    /// Typed text this short never replaces the clipboard preload
    #[serde(default = "default_min_substitution_len")]
    pub min_substitution_len: usize,

    /// Cap on a single scripted sleep
    #[serde(default = "default_max_sleep")]
    pub max_sleep_secs: u64,
}

fn default_min_substitution_len() -> usize {
    2
}

fn default_max_sleep() -> u64 {
    30
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            platform: Platform::default(),
            scroll_factor: None,
            min_substitution_len: default_min_substitution_len(),
            max_sleep_secs: default_max_sleep(),
        }
    }
}

impl SandboxConfig {
    pub fn effective_scroll_factor(&self) -> i32 {
        self.scroll_factor
            .unwrap_or_else(|| self.platform.default_scroll_factor())
    }

    pub fn max_sleep(&self) -> Duration {
        Duration::from_secs(self.max_sleep_secs)
    }
}

/// Effect verification configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifierConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Configured retry budget; the orchestrator never retries more than once
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Fraction of changed pixels above which the screen counts as changed
    #[serde(default = "default_change_threshold")]
    pub change_threshold: f64,

    /// Per-pixel intensity delta that counts as a change
    #[serde(default = "default_pixel_threshold")]
    pub pixel_threshold: u8,

    /// Click jitter in pixels
    #[serde(default = "default_jitter")]
    pub jitter_px: i32,
}

fn default_true() -> bool {
    true
}

fn default_max_retries() -> u32 {
    3
}

fn default_change_threshold() -> f64 {
    0.02
}

fn default_pixel_threshold() -> u8 {
    15
}

fn default_jitter() -> i32 {
    3
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: default_max_retries(),
            change_threshold: default_change_threshold(),
            pixel_threshold: default_pixel_threshold(),
            jitter_px: default_jitter(),
        }
    }
}

/// Coordinate projection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectionConfig {
    #[serde(default)]
    pub coordinate_space: CoordinateSpace,

    /// Screen width in pixels, 0 to take it from the capture
    #[serde(default)]
    pub screen_width: u32,

    /// Screen height in pixels, 0 to take it from the capture
    #[serde(default)]
    pub screen_height: u32,

    #[serde(default = "default_alignment_factor")]
    pub alignment_factor: u32,

    #[serde(default = "default_min_pixels")]
    pub min_pixels: u64,

    #[serde(default = "default_max_pixels")]
    pub max_pixels: u64,
}

fn default_alignment_factor() -> u32 {
    DEFAULT_ALIGNMENT_FACTOR
}

fn default_min_pixels() -> u64 {
    DEFAULT_MIN_PIXELS
}

fn default_max_pixels() -> u64 {
    DEFAULT_MAX_PIXELS
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self {
            coordinate_space: CoordinateSpace::default(),
            screen_width: 0,
            screen_height: 0,
            alignment_factor: default_alignment_factor(),
            min_pixels: default_min_pixels(),
            max_pixels: default_max_pixels(),
        }
    }
}

impl ProjectionConfig {
    pub fn resize_params(&self) -> ResizeParams {
        ResizeParams {
            factor: self.alignment_factor,
            min_pixels: self.min_pixels,
            max_pixels: self.max_pixels,
        }
    }

    /// Configured screen size, if both dimensions are set.
    pub fn fixed_screen(&self) -> Option<(u32, u32)> {
        (self.screen_width > 0 && self.screen_height > 0)
            .then_some((self.screen_width, self.screen_height))
    }
}

/// Decision model wire protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Anthropic Messages API
    Anthropic,
    /// OpenAI-compatible chat completions
    Openai,
}

impl std::str::FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "anthropic" | "claude" => Ok(Self::Anthropic),
            "openai" | "openai-compatible" => Ok(Self::Openai),
            other => Err(ConfigError::InvalidConfig(format!(
                "Unknown backend kind: {}",
                other
            ))),
        }
    }
}

/// One decision model endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub kind: BackendKind,

    /// API base URL (provider default when unset)
    #[serde(default)]
    pub base_url: Option<String>,

    pub model: String,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_backend_timeout")]
    pub timeout_secs: u64,
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_backend_timeout() -> u64 {
    120
}

impl BackendConfig {
    pub fn anthropic(model: impl Into<String>) -> Self {
        Self {
            kind: BackendKind::Anthropic,
            base_url: None,
            model: model.into(),
            api_key: None,
            max_tokens: default_max_tokens(),
            timeout_secs: default_backend_timeout(),
        }
    }

    pub fn openai(model: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            kind: BackendKind::Openai,
            base_url: Some(base_url.into()),
            model: model.into(),
            api_key: None,
            max_tokens: default_max_tokens(),
            timeout_secs: default_backend_timeout(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Decision router configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Backends in failover order
    #[serde(default = "default_backends")]
    pub backends: Vec<BackendConfig>,

    /// Attempts per backend
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Cap on the exponential backoff between attempts
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,

    /// History entries summarised into each prompt
    #[serde(default = "default_history_window")]
    pub history_window: usize,
}

fn default_backends() -> Vec<BackendConfig> {
    vec![BackendConfig::anthropic("claude-sonnet-4-20250514")]
}

fn default_max_attempts() -> u32 {
    5
}

fn default_max_backoff() -> u64 {
    30
}

fn default_history_window() -> usize {
    10
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            backends: default_backends(),
            max_attempts: default_max_attempts(),
            max_backoff_secs: default_max_backoff(),
            history_window: default_history_window(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoreConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub agent: AgentConfig,

    #[serde(default)]
    pub sandbox: SandboxConfig,

    #[serde(default)]
    pub verifier: VerifierConfig,

    #[serde(default)]
    pub projection: ProjectionConfig,

    #[serde(default)]
    pub router: RouterConfig,

    #[serde(default)]
    pub capture: CaptureSettings,

    /// Path this config was loaded from
    #[serde(skip)]
    loaded_from: Option<PathBuf>,
}

impl CoreConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from the global location, then `explicit` (which must exist
    /// when given), then the environment.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                debug!("Loading global config from {:?}", global_path);
                config = Self::load_from_file(&global_path)?;
            }
        }

        if let Some(path) = explicit {
            if !path.exists() {
                return Err(ConfigError::NotFound(path.display().to_string()));
            }
            debug!("Loading config from {:?}", path);
            config = Self::load_from_file(path)?;
        }

        Ok(config.apply_env_overrides())
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&content)?;
        config.loaded_from = Some(path.to_path_buf());
        Ok(config)
    }

    pub fn loaded_from(&self) -> Option<&Path> {
        self.loaded_from.as_deref()
    }

    /// Apply `DESKPILOT_*` environment variables.
    pub fn apply_env_overrides(self) -> Self {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`, keyed by environment variable name.
    pub fn apply_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(host) = lookup("DESKPILOT_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("DESKPILOT_PORT").and_then(|p| p.parse().ok()) {
            self.server.port = port;
        }
        if let Some(key) = lookup("DESKPILOT_API_KEY") {
            self.server.api_key = Some(key);
        }
        if let Some(level) = lookup("DESKPILOT_LOG_LEVEL") {
            self.server.log_level = level;
        }

        if let Some(steps) = lookup("DESKPILOT_MAX_STEPS").and_then(|s| s.parse().ok()) {
            self.agent.max_steps = steps;
        }

        if let Some(platform) = lookup("DESKPILOT_PLATFORM").and_then(|p| p.parse().ok()) {
            debug!("Platform from env: {:?}", platform);
            self.sandbox.platform = platform;
        }
        if let Some(factor) = lookup("DESKPILOT_SCROLL_FACTOR").and_then(|f| f.parse().ok()) {
            self.sandbox.scroll_factor = Some(factor);
        }

        if let Some(space) = lookup("DESKPILOT_COORDINATE_SPACE").and_then(|s| s.parse().ok()) {
            self.projection.coordinate_space = space;
        }

        // Model settings apply to the primary backend
        let kind = lookup("DESKPILOT_MODEL_KIND").and_then(|k| k.parse::<BackendKind>().ok());
        let model = lookup("DESKPILOT_MODEL");
        let base_url = lookup("DESKPILOT_MODEL_BASE_URL");
        let api_key = lookup("DESKPILOT_MODEL_API_KEY");
        if kind.is_some() || model.is_some() || base_url.is_some() || api_key.is_some() {
            if self.router.backends.is_empty() {
                self.router.backends = default_backends();
            }
            let primary = &mut self.router.backends[0];
            if let Some(kind) = kind {
                primary.kind = kind;
            }
            if let Some(model) = model {
                primary.model = model;
            }
            if base_url.is_some() {
                primary.base_url = base_url;
            }
            if api_key.is_some() {
                primary.api_key = api_key;
            }
        }

        self
    }

    /// Save configuration to a file
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializationError(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the global config path
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("deskpilot").join("config.toml"))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(ConfigError::InvalidConfig(msg.to_string()));

        if !(1..=100).contains(&self.agent.max_steps) {
            return invalid("agent.max_steps must be within 1..=100");
        }
        if self.agent.task_timeout_secs == 0 {
            return invalid("agent.task_timeout_secs must be greater than 0");
        }
        if self.agent.confirm_timeout_secs == 0 {
            return invalid("agent.confirm_timeout_secs must be greater than 0");
        }
        if self.agent.max_tasks == 0 {
            return invalid("agent.max_tasks must be greater than 0");
        }
        if !(0.0..=1.0).contains(&self.verifier.change_threshold) {
            return invalid("verifier.change_threshold must be between 0.0 and 1.0");
        }
        if self.projection.alignment_factor == 0 {
            return invalid("projection.alignment_factor must be greater than 0");
        }
        if self.projection.min_pixels > self.projection.max_pixels {
            return invalid("projection.min_pixels must not exceed projection.max_pixels");
        }
        if self.router.backends.is_empty() {
            return invalid("router.backends must name at least one backend");
        }
        if self.router.max_attempts == 0 {
            return invalid("router.max_attempts must be greater than 0");
        }
        if self.router.backends.iter().any(|b| b.model.trim().is_empty()) {
            return invalid("router backend model must not be empty");
        }
        self.capture.validate().map_err(ConfigError::InvalidConfig)
    }
}
