//! Normalized decisions produced by the decision router.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which mouse gesture a click performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ClickKind {
    #[default]
    Single,
    Double,
    Right,
}

/// Wheel direction. Down and left are encoded as negative amounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScrollDirection {
    Up,
    #[default]
    Down,
    Left,
    Right,
}

impl ScrollDirection {
    /// The direction that undoes this one.
    pub fn opposite(self) -> Self {
        match self {
            Self::Up => Self::Down,
            Self::Down => Self::Up,
            Self::Left => Self::Right,
            Self::Right => Self::Left,
        }
    }

    /// Whether this direction scrolls the horizontal axis.
    pub fn is_horizontal(self) -> bool {
        matches!(self, Self::Left | Self::Right)
    }

    /// Parse a direction name, defaulting to down.
    pub fn parse(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "up" => Self::Up,
            "left" => Self::Left,
            "right" => Self::Right,
            _ => Self::Down,
        }
    }
}

/// Wheel clicks used when the model omits an amount.
pub const DEFAULT_SCROLL_AMOUNT: i32 = 3;

/// One decision from the model, in screen pixel coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentAction {
    Click {
        x: i32,
        y: i32,
        #[serde(default)]
        kind: ClickKind,
    },
    Type {
        text: String,
        /// Optional field to click before pasting.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        x: Option<i32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        y: Option<i32>,
    },
    Scroll {
        #[serde(default)]
        direction: ScrollDirection,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        amount: Option<i32>,
    },
    Hotkey {
        keys: Vec<String>,
    },
    Drag {
        from_x: i32,
        from_y: i32,
        to_x: i32,
        to_y: i32,
    },
    /// Restricted script proposed verbatim by a code-emitting model.
    Script {
        code: String,
    },
    Wait,
    Done,
    Fail,
}

impl AgentAction {
    /// Short kind name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Click { .. } => "click",
            Self::Type { .. } => "type",
            Self::Scroll { .. } => "scroll",
            Self::Hotkey { .. } => "hotkey",
            Self::Drag { .. } => "drag",
            Self::Script { .. } => "script",
            Self::Wait => "wait",
            Self::Done => "done",
            Self::Fail => "fail",
        }
    }

    /// Whether the effect of this action can be judged by screen change.
    pub fn is_verifiable(&self) -> bool {
        matches!(self, Self::Click { .. } | Self::Scroll { .. })
    }

    /// Wait, Done and Fail never touch the desktop.
    pub fn is_sentinel(&self) -> bool {
        matches!(self, Self::Wait | Self::Done | Self::Fail)
    }
}

/// Sentinel tokens that stand in for non-executable decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sentinel {
    Wait,
    Done,
    Fail,
}

impl Sentinel {
    /// Token text.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Wait => "WAIT",
            Self::Done => "DONE",
            Self::Fail => "FAIL",
        }
    }

    /// Recognise a sentinel token (surrounding whitespace ignored).
    pub fn parse(script: &str) -> Option<Self> {
        match script.trim() {
            "WAIT" => Some(Self::Wait),
            "DONE" => Some(Self::Done),
            "FAIL" => Some(Self::Fail),
            _ => None,
        }
    }
}

impl fmt::Display for Sentinel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An action together with what the model said about it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub action: AgentAction,
    /// The model's stated rationale.
    #[serde(default)]
    pub thought: Option<String>,
    /// Raw model output the action was parsed from.
    #[serde(default)]
    pub raw_response: Option<String>,
}

impl Decision {
    pub fn new(action: AgentAction) -> Self {
        Self {
            action,
            thought: None,
            raw_response: None,
        }
    }

    pub fn with_thought(mut self, thought: impl Into<String>) -> Self {
        self.thought = Some(thought.into());
        self
    }

    pub fn with_raw_response(mut self, raw: impl Into<String>) -> Self {
        self.raw_response = Some(raw.into());
        self
    }

    /// A Fail decision carrying the reason as its raw response.
    pub fn fail(reason: impl Into<String>) -> Self {
        Self::new(AgentAction::Fail).with_raw_response(reason)
    }

    /// Natural-language description used by send detection.
    pub fn description(&self) -> &str {
        self.thought.as_deref().unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_serde_is_tagged() {
        let action = AgentAction::Click {
            x: 10,
            y: 20,
            kind: ClickKind::Double,
        };
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["type"], "click");
        assert_eq!(json["kind"], "double");

        let parsed: AgentAction =
            serde_json::from_str(r#"{"type":"scroll","direction":"up"}"#).unwrap();
        assert_eq!(
            parsed,
            AgentAction::Scroll {
                direction: ScrollDirection::Up,
                amount: None
            }
        );
    }

    #[test]
    fn test_sentinel_parse() {
        assert_eq!(Sentinel::parse(" DONE\n"), Some(Sentinel::Done));
        assert_eq!(Sentinel::parse("done"), None);
        assert_eq!(Sentinel::Wait.to_string(), "WAIT");
    }

    #[test]
    fn test_scroll_direction_helpers() {
        assert_eq!(ScrollDirection::parse("UP"), ScrollDirection::Up);
        assert_eq!(ScrollDirection::parse("sideways"), ScrollDirection::Down);
        assert_eq!(ScrollDirection::Left.opposite(), ScrollDirection::Right);
        assert!(ScrollDirection::Right.is_horizontal());
    }

    #[test]
    fn test_fail_decision_keeps_reason() {
        let decision = Decision::fail("router exhausted");
        assert_eq!(decision.action, AgentAction::Fail);
        assert_eq!(decision.raw_response.as_deref(), Some("router exhausted"));
        assert_eq!(decision.description(), "");
    }
}
