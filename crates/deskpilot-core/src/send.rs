//! Detection of "send" actions that need confirmation.

use crate::action::Decision;

pub trait SendDetector: Send + Sync {
    fn is_send(&self, decision: &Decision) -> bool;
}

/// Phrases in the model's description of a step that mean it is about to
/// press a send button.
pub const SEND_PATTERNS: &[&str] = &[
    "点击发送",
    "点击\"发送\"",
    "点击“发送”",
    "确认发送",
    "click the send",
    "click send",
    "press send",
    "click the \"send\"",
    "click the 'send'",
    "发送(s)",
    "发送按钮",
];

/// Case-insensitive substring match against [`SEND_PATTERNS`].
#[derive(Debug, Clone)]
pub struct PatternSendDetector {
    patterns: Vec<String>,
}

impl PatternSendDetector {
    pub fn new(patterns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            patterns: patterns
                .into_iter()
                .map(|p| p.into().to_lowercase())
                .collect(),
        }
    }
}

impl Default for PatternSendDetector {
    fn default() -> Self {
        Self::new(SEND_PATTERNS.iter().copied())
    }
}

impl SendDetector for PatternSendDetector {
    fn is_send(&self, decision: &Decision) -> bool {
        let description = decision.description().to_lowercase();
        self.patterns.iter().any(|p| description.contains(p.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{AgentAction, ClickKind};

    fn click_with(thought: &str) -> Decision {
        Decision::new(AgentAction::Click {
            x: 1,
            y: 1,
            kind: ClickKind::Single,
        })
        .with_thought(thought)
    }

    #[test]
    fn test_send_phrases() {
        let detector = PatternSendDetector::default();
        assert!(detector.is_send(&click_with("Now Click Send to deliver the message")));
        assert!(detector.is_send(&click_with("点击发送按钮完成")));
        assert!(detector.is_send(&click_with("按下 发送(S)")));
        assert!(!detector.is_send(&click_with("Type the message into the box")));
        assert!(!detector.is_send(&Decision::new(AgentAction::Done)));
    }
}
