//! Input simulation for the agent loop.
//!
//! This module provides:
//! - Mouse movement, clicks, drags and wheel scrolling
//! - Keyboard input (single keys, held keys, chords, text)
//! - Key-name parsing for the names models emit (`ctrl`, `enter`, `win`, ...)
//! - An enigo-backed implementation behind `gui-automation`
//! - A recording mock used by tests

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

/// Errors that can occur during input simulation.
#[derive(Error, Debug)]
pub enum InputError {
    #[error("Input simulation not available on this platform")]
    NotAvailable,

    #[error("Failed to simulate input: {0}")]
    SimulationFailed(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),
}

/// Result type for input operations.
pub type InputResult<T> = Result<T, InputError>;

// ============================================================================
// Mouse Types
// ============================================================================

/// Mouse buttons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MouseButton {
    #[default]
    Left,
    Right,
    Middle,
}

impl MouseButton {
    /// Parse a button name (`left`, `right`, `middle`, `primary`, `secondary`).
    pub fn parse(name: &str) -> InputResult<Self> {
        match name.to_lowercase().as_str() {
            "left" | "primary" => Ok(Self::Left),
            "right" | "secondary" => Ok(Self::Right),
            "middle" => Ok(Self::Middle),
            other => Err(InputError::InvalidKey(format!("Unknown mouse button: {}", other))),
        }
    }
}

/// A click at an optional position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MouseAction {
    /// Target position, or the current cursor position when `None`
    pub position: Option<(i32, i32)>,
    /// Button to click
    pub button: MouseButton,
    /// Number of clicks (1 = single, 2 = double, ...)
    pub clicks: u32,
}

impl MouseAction {
    /// Single left click at coordinates.
    pub fn click(x: i32, y: i32) -> Self {
        Self {
            position: Some((x, y)),
            button: MouseButton::Left,
            clicks: 1,
        }
    }

    /// Set the button.
    pub fn with_button(mut self, button: MouseButton) -> Self {
        self.button = button;
        self
    }

    /// Set the click count.
    pub fn with_clicks(mut self, clicks: u32) -> Self {
        self.clicks = clicks;
        self
    }
}

/// Wheel axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrollAxis {
    Vertical,
    Horizontal,
}

// ============================================================================
// Keyboard Types
// ============================================================================

/// Special keys that can be pressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Key {
    F1,
    F2,
    F3,
    F4,
    F5,
    F6,
    F7,
    F8,
    F9,
    F10,
    F11,
    F12,
    Escape,
    Tab,
    CapsLock,
    Backspace,
    Enter,
    Space,
    Delete,
    Home,
    End,
    PageUp,
    PageDown,
    Up,
    Down,
    Left,
    Right,
    Shift,
    Control,
    Alt,
    Meta,
}

/// Key input type (character or special key).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyInput {
    /// A regular character
    Char(char),
    /// A special key
    Special(Key),
}

impl From<char> for KeyInput {
    fn from(c: char) -> Self {
        KeyInput::Char(c)
    }
}

impl From<Key> for KeyInput {
    fn from(k: Key) -> Self {
        KeyInput::Special(k)
    }
}

impl KeyInput {
    /// Parse a key name as emitted by decision models.
    pub fn parse(name: &str) -> InputResult<Self> {
        let trimmed = name.trim();
        let mut chars = trimmed.chars();
        if let (Some(c), None) = (chars.next(), chars.next()) {
            return Ok(KeyInput::Char(c.to_ascii_lowercase()));
        }

        let key = match trimmed.to_lowercase().as_str() {
            "f1" => Key::F1,
            "f2" => Key::F2,
            "f3" => Key::F3,
            "f4" => Key::F4,
            "f5" => Key::F5,
            "f6" => Key::F6,
            "f7" => Key::F7,
            "f8" => Key::F8,
            "f9" => Key::F9,
            "f10" => Key::F10,
            "f11" => Key::F11,
            "f12" => Key::F12,
            "escape" | "esc" => Key::Escape,
            "tab" => Key::Tab,
            "capslock" => Key::CapsLock,
            "backspace" | "back" => Key::Backspace,
            "enter" | "return" => Key::Enter,
            "space" => Key::Space,
            "delete" | "del" => Key::Delete,
            "home" => Key::Home,
            "end" => Key::End,
            "pageup" | "pgup" => Key::PageUp,
            "pagedown" | "pgdn" => Key::PageDown,
            "up" => Key::Up,
            "down" => Key::Down,
            "left" => Key::Left,
            "right" => Key::Right,
            "shift" | "shiftleft" | "shiftright" => Key::Shift,
            "ctrl" | "control" | "ctrlleft" | "ctrlright" => Key::Control,
            "alt" | "altleft" | "altright" | "option" => Key::Alt,
            "win" | "winleft" | "winright" | "cmd" | "command" | "super" | "meta" => Key::Meta,
            _ => return Err(InputError::InvalidKey(format!("Unknown key: {}", name))),
        };
        Ok(KeyInput::Special(key))
    }
}

// ============================================================================
// InputSimulator Trait
// ============================================================================

/// Trait for platform-specific input simulation.
#[async_trait]
pub trait InputSimulator: Send + Sync {
    /// Check if input simulation is available.
    fn is_available(&self) -> bool;

    /// Get the current mouse position.
    async fn mouse_position(&self) -> InputResult<(i32, i32)>;

    /// Move the mouse to absolute coordinates.
    async fn mouse_move(&self, x: i32, y: i32) -> InputResult<()>;

    /// Perform a mouse click.
    async fn mouse_click(&self, action: &MouseAction) -> InputResult<()>;

    /// Press a mouse button without releasing it.
    async fn mouse_down(&self, button: MouseButton) -> InputResult<()>;

    /// Release a mouse button.
    async fn mouse_up(&self, button: MouseButton) -> InputResult<()>;

    /// Scroll the wheel. Positive amounts scroll up (or right).
    async fn mouse_scroll(&self, amount: i32, axis: ScrollAxis) -> InputResult<()>;

    /// Type a string of text.
    async fn type_text(&self, text: &str) -> InputResult<()>;

    /// Press and release a single key.
    async fn key_press(&self, key: KeyInput) -> InputResult<()>;

    /// Hold down a key.
    async fn key_down(&self, key: KeyInput) -> InputResult<()>;

    /// Release a key.
    async fn key_up(&self, key: KeyInput) -> InputResult<()>;

    // Convenience methods with default implementations

    /// Press keys in order, then release them in reverse order.
    async fn chord(&self, keys: &[KeyInput]) -> InputResult<()> {
        for key in keys {
            self.key_down(*key).await?;
        }
        for key in keys.iter().rev() {
            self.key_up(*key).await?;
        }
        Ok(())
    }

    /// Drag with `button` held from the current position to `(x, y)`.
    async fn drag_to(&self, x: i32, y: i32, button: MouseButton) -> InputResult<()> {
        self.mouse_down(button).await?;
        self.mouse_move(x, y).await?;
        self.mouse_up(button).await
    }

    /// Paste (Ctrl+V).
    async fn paste(&self) -> InputResult<()> {
        self.chord(&[Key::Control.into(), 'v'.into()]).await
    }
}

// ============================================================================
// Platform Implementation (Enigo)
// ============================================================================

/// Platform-specific input simulation using enigo.
#[cfg(feature = "gui-automation")]
pub mod platform {
    use super::*;
    use enigo::{
        Axis, Button, Coordinate, Direction, Enigo, Key as EnigoKey, Keyboard, Mouse, Settings,
    };
    use std::sync::Mutex as StdMutex;

    /// Enigo-based input simulator. Every call runs on the blocking pool.
    pub struct EnigoSimulator {
        enigo: Arc<StdMutex<Enigo>>,
    }

    impl EnigoSimulator {
        /// Create a new Enigo-based simulator.
        pub fn new() -> InputResult<Self> {
            let enigo = Enigo::new(&Settings::default())
                .map_err(|e| InputError::SimulationFailed(e.to_string()))?;
            Ok(Self {
                enigo: Arc::new(StdMutex::new(enigo)),
            })
        }

        async fn run<F, R>(&self, f: F) -> InputResult<R>
        where
            F: FnOnce(&mut Enigo) -> InputResult<R> + Send + 'static,
            R: Send + 'static,
        {
            let enigo = Arc::clone(&self.enigo);
            tokio::task::spawn_blocking(move || {
                let mut guard = enigo.lock().map_err(|e| {
                    InputError::SimulationFailed(format!("Failed to lock enigo: {}", e))
                })?;
                f(&mut *guard)
            })
            .await
            .map_err(|e| InputError::SimulationFailed(e.to_string()))?
        }

        fn convert_key(key: KeyInput) -> EnigoKey {
            match key {
                KeyInput::Char(c) => EnigoKey::Unicode(c),
                KeyInput::Special(k) => match k {
                    Key::F1 => EnigoKey::F1,
                    Key::F2 => EnigoKey::F2,
                    Key::F3 => EnigoKey::F3,
                    Key::F4 => EnigoKey::F4,
                    Key::F5 => EnigoKey::F5,
                    Key::F6 => EnigoKey::F6,
                    Key::F7 => EnigoKey::F7,
                    Key::F8 => EnigoKey::F8,
                    Key::F9 => EnigoKey::F9,
                    Key::F10 => EnigoKey::F10,
                    Key::F11 => EnigoKey::F11,
                    Key::F12 => EnigoKey::F12,
                    Key::Escape => EnigoKey::Escape,
                    Key::Tab => EnigoKey::Tab,
                    Key::CapsLock => EnigoKey::CapsLock,
                    Key::Backspace => EnigoKey::Backspace,
                    Key::Enter => EnigoKey::Return,
                    Key::Space => EnigoKey::Space,
                    Key::Delete => EnigoKey::Delete,
                    Key::Home => EnigoKey::Home,
                    Key::End => EnigoKey::End,
                    Key::PageUp => EnigoKey::PageUp,
                    Key::PageDown => EnigoKey::PageDown,
                    Key::Up => EnigoKey::UpArrow,
                    Key::Down => EnigoKey::DownArrow,
                    Key::Left => EnigoKey::LeftArrow,
                    Key::Right => EnigoKey::RightArrow,
                    Key::Shift => EnigoKey::Shift,
                    Key::Control => EnigoKey::Control,
                    Key::Alt => EnigoKey::Alt,
                    Key::Meta => EnigoKey::Meta,
                },
            }
        }

        fn convert_button(button: MouseButton) -> Button {
            match button {
                MouseButton::Left => Button::Left,
                MouseButton::Right => Button::Right,
                MouseButton::Middle => Button::Middle,
            }
        }

        fn failed(e: impl std::fmt::Display) -> InputError {
            InputError::SimulationFailed(e.to_string())
        }
    }

    #[async_trait]
    impl InputSimulator for EnigoSimulator {
        fn is_available(&self) -> bool {
            true
        }

        async fn mouse_position(&self) -> InputResult<(i32, i32)> {
            self.run(|enigo| enigo.location().map_err(Self::failed)).await
        }

        async fn mouse_move(&self, x: i32, y: i32) -> InputResult<()> {
            self.run(move |enigo| {
                enigo
                    .move_mouse(x, y, Coordinate::Abs)
                    .map_err(Self::failed)
            })
            .await
        }

        async fn mouse_click(&self, action: &MouseAction) -> InputResult<()> {
            let action = action.clone();
            self.run(move |enigo| {
                if let Some((x, y)) = action.position {
                    enigo
                        .move_mouse(x, y, Coordinate::Abs)
                        .map_err(Self::failed)?;
                }
                let button = Self::convert_button(action.button);
                for _ in 0..action.clicks.max(1) {
                    enigo.button(button, Direction::Click).map_err(Self::failed)?;
                }
                Ok(())
            })
            .await
        }

        async fn mouse_down(&self, button: MouseButton) -> InputResult<()> {
            self.run(move |enigo| {
                enigo
                    .button(Self::convert_button(button), Direction::Press)
                    .map_err(Self::failed)
            })
            .await
        }

        async fn mouse_up(&self, button: MouseButton) -> InputResult<()> {
            self.run(move |enigo| {
                enigo
                    .button(Self::convert_button(button), Direction::Release)
                    .map_err(Self::failed)
            })
            .await
        }

        async fn mouse_scroll(&self, amount: i32, axis: ScrollAxis) -> InputResult<()> {
            // enigo scrolls down/right for positive lengths
            self.run(move |enigo| {
                let axis = match axis {
                    ScrollAxis::Vertical => Axis::Vertical,
                    ScrollAxis::Horizontal => Axis::Horizontal,
                };
                enigo.scroll(-amount, axis).map_err(Self::failed)
            })
            .await
        }

        async fn type_text(&self, text: &str) -> InputResult<()> {
            let text = text.to_string();
            self.run(move |enigo| enigo.text(&text).map_err(Self::failed))
                .await
        }

        async fn key_press(&self, key: KeyInput) -> InputResult<()> {
            self.run(move |enigo| {
                enigo
                    .key(Self::convert_key(key), Direction::Click)
                    .map_err(Self::failed)
            })
            .await
        }

        async fn key_down(&self, key: KeyInput) -> InputResult<()> {
            self.run(move |enigo| {
                enigo
                    .key(Self::convert_key(key), Direction::Press)
                    .map_err(Self::failed)
            })
            .await
        }

        async fn key_up(&self, key: KeyInput) -> InputResult<()> {
            self.run(move |enigo| {
                enigo
                    .key(Self::convert_key(key), Direction::Release)
                    .map_err(Self::failed)
            })
            .await
        }
    }
}

/// Create the default input simulator for the current platform.
#[cfg(feature = "gui-automation")]
pub fn create_input_simulator() -> InputResult<Box<dyn InputSimulator>> {
    Ok(Box::new(platform::EnigoSimulator::new()?))
}

/// Create the default input simulator for the current platform.
#[cfg(not(feature = "gui-automation"))]
pub fn create_input_simulator() -> InputResult<Box<dyn InputSimulator>> {
    Err(InputError::NotAvailable)
}

// ============================================================================
// Mock Implementation
// ============================================================================

/// Mock input simulator for testing.
/// Always available, even when gui-automation is enabled.
pub mod mock {
    use super::*;
    use std::collections::VecDeque;

    /// Mock input simulator that records calls instead of injecting input.
    pub struct MockSimulator {
        /// Simulated mouse position
        position: Arc<RwLock<(i32, i32)>>,
        /// Action log for verification
        actions: Arc<Mutex<VecDeque<String>>>,
        /// Maximum actions to keep in log
        max_log_size: usize,
    }

    impl MockSimulator {
        /// Create a new mock simulator.
        pub fn new() -> Self {
            Self {
                position: Arc::new(RwLock::new((0, 0))),
                actions: Arc::new(Mutex::new(VecDeque::new())),
                max_log_size: 1000,
            }
        }

        /// Get the action log.
        pub async fn actions(&self) -> Vec<String> {
            self.actions.lock().await.iter().cloned().collect()
        }

        /// Clear the action log.
        pub async fn clear_log(&self) {
            self.actions.lock().await.clear();
        }

        async fn log(&self, action: String) {
            let mut actions = self.actions.lock().await;
            if actions.len() >= self.max_log_size {
                actions.pop_front();
            }
            actions.push_back(action);
        }
    }

    impl Default for MockSimulator {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl InputSimulator for MockSimulator {
        fn is_available(&self) -> bool {
            true
        }

        async fn mouse_position(&self) -> InputResult<(i32, i32)> {
            Ok(*self.position.read().await)
        }

        async fn mouse_move(&self, x: i32, y: i32) -> InputResult<()> {
            *self.position.write().await = (x, y);
            self.log(format!("move({}, {})", x, y)).await;
            Ok(())
        }

        async fn mouse_click(&self, action: &MouseAction) -> InputResult<()> {
            let (x, y) = match action.position {
                Some(pos) => {
                    *self.position.write().await = pos;
                    pos
                }
                None => *self.position.read().await,
            };
            self.log(format!(
                "click({}, {}, {:?}, {})",
                x, y, action.button, action.clicks
            ))
            .await;
            Ok(())
        }

        async fn mouse_down(&self, button: MouseButton) -> InputResult<()> {
            self.log(format!("mouse_down({:?})", button)).await;
            Ok(())
        }

        async fn mouse_up(&self, button: MouseButton) -> InputResult<()> {
            self.log(format!("mouse_up({:?})", button)).await;
            Ok(())
        }

        async fn mouse_scroll(&self, amount: i32, axis: ScrollAxis) -> InputResult<()> {
            self.log(format!("scroll({}, {:?})", amount, axis)).await;
            Ok(())
        }

        async fn type_text(&self, text: &str) -> InputResult<()> {
            self.log(format!("type({})", text)).await;
            Ok(())
        }

        async fn key_press(&self, key: KeyInput) -> InputResult<()> {
            self.log(format!("key_press({:?})", key)).await;
            Ok(())
        }

        async fn key_down(&self, key: KeyInput) -> InputResult<()> {
            self.log(format!("key_down({:?})", key)).await;
            Ok(())
        }

        async fn key_up(&self, key: KeyInput) -> InputResult<()> {
            self.log(format!("key_up({:?})", key)).await;
            Ok(())
        }
    }
}
