//! The decision router boundary.
//!
//! A router turns the instruction, the current screen and the step history
//! into one [`Decision`]. It owns its own retries and never fails: when
//! every backend is exhausted it answers with a Fail decision.

use crate::action::Decision;
use crate::context::ScreenContext;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// What the router is told about an earlier step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub step: u32,
    pub thought: Option<String>,
    /// Compiled script of the step.
    pub action: String,
    pub raw_response: Option<String>,
    /// Effect verifier verdict, when the action was checked.
    pub changed: Option<bool>,
}

#[async_trait]
pub trait DecisionRouter: Send + Sync {
    async fn predict(
        &self,
        instruction: &str,
        context: &ScreenContext,
        history: &[HistoryEntry],
        step: u32,
    ) -> Decision;

    /// Clear per-task state before a new task starts.
    async fn reset(&self) {}
}

/// Router that replays a fixed list of decisions.
pub mod mock {
    use super::*;
    use crate::action::AgentAction;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays queued decisions, then answers Fail.
    #[derive(Default)]
    pub struct ScriptedRouter {
        decisions: Mutex<VecDeque<Decision>>,
        calls: Mutex<Vec<(String, u32)>>,
    }

    impl ScriptedRouter {
        pub fn new(decisions: Vec<Decision>) -> Self {
            Self {
                decisions: Mutex::new(decisions.into()),
                calls: Mutex::new(Vec::new()),
            }
        }

        /// `(instruction, step)` of every prediction so far.
        pub fn calls(&self) -> Vec<(String, u32)> {
            self.calls.lock().map(|c| c.clone()).unwrap_or_default()
        }
    }

    #[async_trait]
    impl DecisionRouter for ScriptedRouter {
        async fn predict(
            &self,
            instruction: &str,
            _context: &ScreenContext,
            _history: &[HistoryEntry],
            step: u32,
        ) -> Decision {
            if let Ok(mut calls) = self.calls.lock() {
                calls.push((instruction.to_string(), step));
            }
            self.decisions
                .lock()
                .ok()
                .and_then(|mut d| d.pop_front())
                .unwrap_or_else(|| Decision::new(AgentAction::Fail))
        }
    }
}
