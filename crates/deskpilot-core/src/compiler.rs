//! # Action Compiler
//!
//! Turns an [`AgentAction`] into restricted script text. Every emitted line
//! is a whitelisted call; Wait, Done and Fail become sentinel tokens.
//!
//! Text is never typed key by key. It is copied to the clipboard and pasted;
//! the executor may swap the copied text for the task's clipboard preload
//! when the script actually runs. Compiling has no side effects.

use crate::action::{AgentAction, ClickKind, ScrollDirection, Sentinel, DEFAULT_SCROLL_AMOUNT};
use crate::config::SandboxConfig;
use crate::script::ast::quote;

pub struct ActionCompiler {
    scroll_factor: i32,
    paste_modifier: &'static str,
}

impl ActionCompiler {
    pub fn new(config: &SandboxConfig) -> Self {
        Self {
            scroll_factor: config.effective_scroll_factor(),
            paste_modifier: config.platform.paste_modifier(),
        }
    }

    pub fn scroll_factor(&self) -> i32 {
        self.scroll_factor
    }

    /// Signed wheel clicks for a scroll: down and left are negative.
    pub fn scroll_amount(&self, direction: ScrollDirection, amount: Option<i32>) -> i32 {
        let magnitude = amount.unwrap_or(DEFAULT_SCROLL_AMOUNT).saturating_abs();
        let signed = match direction {
            ScrollDirection::Down | ScrollDirection::Left => -magnitude,
            ScrollDirection::Up | ScrollDirection::Right => magnitude,
        };
        signed.saturating_mul(self.scroll_factor)
    }

    /// Compile one action.
    pub fn compile(&self, action: &AgentAction) -> String {
        match action {
            AgentAction::Click { x, y, kind } => {
                let function = match kind {
                    ClickKind::Single => "click",
                    ClickKind::Double => "doubleClick",
                    ClickKind::Right => "rightClick",
                };
                format!("pyautogui.{}(x={}, y={})", function, x, y)
            }
            AgentAction::Type { text, x, y } => {
                let paste = format!(
                    "pyperclip.copy({})\npyautogui.hotkey('{}', 'v')",
                    quote(text),
                    self.paste_modifier
                );
                match (x, y) {
                    (Some(x), Some(y)) => format!("pyautogui.click(x={}, y={})\n{}", x, y, paste),
                    _ => paste,
                }
            }
            AgentAction::Scroll { direction, amount } => {
                let function = if direction.is_horizontal() {
                    "hscroll"
                } else {
                    "scroll"
                };
                format!(
                    "pyautogui.{}({})",
                    function,
                    self.scroll_amount(*direction, *amount)
                )
            }
            AgentAction::Hotkey { keys } => {
                let keys: Vec<String> = keys
                    .iter()
                    .flat_map(|k| split_combo(k))
                    .map(|k| quote(&k))
                    .collect();
                format!("pyautogui.hotkey({})", keys.join(", "))
            }
            AgentAction::Drag {
                from_x,
                from_y,
                to_x,
                to_y,
            } => format!(
                "pyautogui.moveTo(x={}, y={})\npyautogui.dragTo(x={}, y={}, button='left')",
                from_x, from_y, to_x, to_y
            ),
            AgentAction::Script { code } => code.trim().to_string(),
            AgentAction::Wait => Sentinel::Wait.to_string(),
            AgentAction::Done => Sentinel::Done.to_string(),
            AgentAction::Fail => Sentinel::Fail.to_string(),
        }
    }
}

/// Split `"ctrl+s"` into `["ctrl", "s"]`; a lone `"+"` stays a key.
fn split_combo(key: &str) -> Vec<String> {
    let key = key.trim();
    if key.chars().count() > 1 && key.contains('+') {
        key.split('+')
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect()
    } else if key.is_empty() {
        Vec::new()
    } else {
        vec![key.to_lowercase()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Platform;

    fn compiler(platform: Platform) -> ActionCompiler {
        ActionCompiler::new(&SandboxConfig {
            platform,
            ..SandboxConfig::default()
        })
    }

    #[test]
    fn test_clicks() {
        let c = compiler(Platform::Windows);
        assert_eq!(
            c.compile(&AgentAction::Click {
                x: 800,
                y: 450,
                kind: ClickKind::Single
            }),
            "pyautogui.click(x=800, y=450)"
        );
        assert_eq!(
            c.compile(&AgentAction::Click {
                x: 1,
                y: 2,
                kind: ClickKind::Double
            }),
            "pyautogui.doubleClick(x=1, y=2)"
        );
        assert_eq!(
            c.compile(&AgentAction::Click {
                x: 1,
                y: 2,
                kind: ClickKind::Right
            }),
            "pyautogui.rightClick(x=1, y=2)"
        );
    }

    #[test]
    fn test_scroll_scaling_is_signed_and_linear() {
        let c = compiler(Platform::Windows);
        assert_eq!(c.scroll_factor(), 5);
        assert_eq!(
            c.compile(&AgentAction::Scroll {
                direction: ScrollDirection::Down,
                amount: Some(-3)
            }),
            "pyautogui.scroll(-15)"
        );
        assert_eq!(
            c.compile(&AgentAction::Scroll {
                direction: ScrollDirection::Up,
                amount: None
            }),
            "pyautogui.scroll(15)"
        );
        assert_eq!(
            c.compile(&AgentAction::Scroll {
                direction: ScrollDirection::Left,
                amount: Some(2)
            }),
            "pyautogui.hscroll(-10)"
        );

        let linux = compiler(Platform::Linux);
        assert_eq!(linux.scroll_amount(ScrollDirection::Down, Some(3)), -3);
    }

    #[test]
    fn test_type_goes_through_clipboard() {
        let c = compiler(Platform::Windows);
        assert_eq!(
            c.compile(&AgentAction::Type {
                text: "it's 你好".into(),
                x: None,
                y: None
            }),
            "pyperclip.copy('it\\'s 你好')\npyautogui.hotkey('ctrl', 'v')"
        );
        assert_eq!(
            c.compile(&AgentAction::Type {
                text: "hi".into(),
                x: Some(5),
                y: Some(6)
            }),
            "pyautogui.click(x=5, y=6)\npyperclip.copy('hi')\npyautogui.hotkey('ctrl', 'v')"
        );

        let mac = compiler(Platform::Macos);
        assert!(mac
            .compile(&AgentAction::Type {
                text: "x".into(),
                x: None,
                y: None
            })
            .ends_with("pyautogui.hotkey('command', 'v')"));
    }

    #[test]
    fn test_hotkey_and_sentinels() {
        let c = compiler(Platform::Windows);
        assert_eq!(
            c.compile(&AgentAction::Hotkey {
                keys: vec!["Ctrl+S".into()]
            }),
            "pyautogui.hotkey('ctrl', 's')"
        );
        assert_eq!(
            c.compile(&AgentAction::Hotkey {
                keys: vec!["alt".into(), "f4".into()]
            }),
            "pyautogui.hotkey('alt', 'f4')"
        );
        assert_eq!(c.compile(&AgentAction::Wait), "WAIT");
        assert_eq!(c.compile(&AgentAction::Done), "DONE");
        assert_eq!(c.compile(&AgentAction::Fail), "FAIL");
        assert_eq!(
            c.compile(&AgentAction::Drag {
                from_x: 1,
                from_y: 2,
                to_x: 3,
                to_y: 4
            }),
            "pyautogui.moveTo(x=1, y=2)\npyautogui.dragTo(x=3, y=4, button='left')"
        );
    }
}
