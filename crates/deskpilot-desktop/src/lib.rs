//! # Deskpilot Desktop
//!
//! Operating-system collaborators for the Deskpilot agent.
//!
//! Everything that touches the real desktop lives here, behind async
//! traits, so the sandbox and orchestrator can be exercised against mocks:
//!
//! - **Screen Capture** (`ScreenCapture`): primary-monitor capture, downscaling
//!   for model input, PNG/JPEG encoding and data URLs
//! - **Input Simulation** (`InputSimulator`): mouse, wheel and keyboard injection
//! - **Clipboard** (`Clipboard`): text and file clipboard writes
//! - **Windows** (`WindowManager`): focused window, window list, activation by title
//!
//! ## Features
//!
//! - `gui-automation`: real capture (xcap) and input injection (enigo).
//!   Without it the factories return unavailable backends and only the
//!   mocks inject anything.
//!
//! Every trait has an in-memory implementation in its module's `mock`
//! submodule that records the effects it would have had.

pub mod capture;
pub mod clipboard;
pub mod config;
pub mod input;
pub mod windows;

pub use capture::{
    create_screen_capture, CaptureError, CaptureResult, Region, ScreenCapture, Screenshot,
};
pub use clipboard::{
    is_image_path, Clipboard, ClipboardError, ClipboardResult, CommandClipboard, IMAGE_EXTENSIONS,
};
pub use config::{CaptureSettings, ImageFormat};
pub use input::{
    create_input_simulator, InputError, InputResult, InputSimulator, Key, KeyInput, MouseAction,
    MouseButton, ScrollAxis,
};
pub use windows::{
    app_for_process, find_by_title, CommandWindowManager, WindowError, WindowInfo, WindowManager,
    WindowResult, UNKNOWN_APP,
};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
