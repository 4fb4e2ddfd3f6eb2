//! # Tasks
//!
//! A task is created from a [`TaskRequest`], lives in the registry as a
//! shared [`TaskHandle`], and is driven by exactly one orchestrator loop.
//!
//! ## Lifecycle
//!
//! ```text
//! pending ──► running ◄──► awaiting_confirm
//!                │                │
//!                ▼                ▼
//!   completed | failed | stopped | timeout | cancelled | error
//! ```
//!
//! Terminal states are sinks: [`TaskHandle::finish`] ignores every call
//! after the first. The stop and confirm entry points only raise a flag or
//! resolve the gate; the loop performs the transition.

use crate::config::AgentConfig;
use crate::gate::ConfirmationGate;
use crate::preload::validate_file_path;
use crate::{CoreError, Result};
use chrono::{DateTime, Utc};
use deskpilot_desktop::Screenshot;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    AwaitingConfirm,
    Completed,
    Failed,
    Stopped,
    Timeout,
    Cancelled,
    Error,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::AwaitingConfirm => "awaiting_confirm",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::Error => "error",
        }
    }

    /// Holds the single-task slot.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Running | Self::AwaitingConfirm)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A task as submitted by a client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskRequest {
    pub prompt: String,
    #[serde(default)]
    pub max_steps: Option<u32>,
    /// Wall-clock budget in seconds.
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub clipboard_preload: Option<String>,
    #[serde(default)]
    pub file_preload: Option<String>,
    #[serde(default)]
    pub confirm_before_send: bool,
}

impl TaskRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }
}

/// A request that passed validation, with defaults filled in.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskSpec {
    pub prompt: String,
    pub max_steps: u32,
    pub timeout: Duration,
    pub clipboard_preload: Option<String>,
    pub file_preload: Option<PathBuf>,
    pub confirm_before_send: bool,
}

impl TaskSpec {
    pub fn from_request(request: TaskRequest, limits: &AgentConfig) -> Result<Self> {
        let invalid = |msg: String| Err(CoreError::InvalidRequest(msg));

        if request.prompt.trim().is_empty() {
            return invalid("prompt must not be empty".into());
        }
        if request.prompt.chars().count() > limits.max_prompt_len {
            return invalid(format!(
                "prompt exceeds {} characters",
                limits.max_prompt_len
            ));
        }

        let max_steps = request.max_steps.unwrap_or(limits.max_steps);
        if !(1..=100).contains(&max_steps) {
            return invalid("max_steps must be within 1..=100".into());
        }

        let timeout = match request.timeout {
            Some(secs) if !(10..=600).contains(&secs) => {
                return invalid("timeout must be within 10..=600 seconds".into());
            }
            Some(secs) => secs,
            None => limits.task_timeout_secs,
        };

        if let Some(text) = &request.clipboard_preload {
            if text.chars().count() > limits.max_clipboard_preload_len {
                return invalid(format!(
                    "clipboard_preload exceeds {} characters",
                    limits.max_clipboard_preload_len
                ));
            }
        }

        let file_preload = match &request.file_preload {
            Some(path) if path.chars().count() > limits.max_file_preload_len => {
                return invalid(format!(
                    "file_preload exceeds {} characters",
                    limits.max_file_preload_len
                ));
            }
            Some(path) => Some(validate_file_path(Path::new(path))?),
            None => None,
        };

        Ok(Self {
            prompt: request.prompt,
            max_steps,
            timeout: Duration::from_secs(timeout),
            clipboard_preload: request.clipboard_preload,
            file_preload,
            confirm_before_send: request.confirm_before_send,
        })
    }
}

/// One executed (or decided) step. Never modified after it is appended.
#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub step: u32,
    pub thought: Option<String>,
    /// Compiled script, or a sentinel.
    pub action: String,
    pub response: Option<String>,
    /// Set when the step is a post-send verification round.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verify_round: Option<u32>,
    /// Effect verifier verdict.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub changed: Option<bool>,
    /// Capture taken before the step.
    #[serde(skip)]
    pub screenshot: Option<Arc<Screenshot>>,
}

#[derive(Debug)]
struct TaskState {
    status: TaskStatus,
    steps: u32,
    result: Option<String>,
    error: Option<String>,
    history: Vec<StepRecord>,
}

/// Point-in-time copy of a task for the API.
#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    pub task_id: Uuid,
    pub status: TaskStatus,
    pub prompt: String,
    pub steps: u32,
    pub result: Option<String>,
    pub error: Option<String>,
    pub history: Vec<StepRecord>,
    pub created_at: DateTime<Utc>,
}

/// Shared view of one task.
#[derive(Debug)]
pub struct TaskHandle {
    id: Uuid,
    spec: TaskSpec,
    created_at: DateTime<Utc>,
    state: Mutex<TaskState>,
    stop: watch::Sender<bool>,
    gate: ConfirmationGate,
}

impl TaskHandle {
    pub fn new(spec: TaskSpec) -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            id: Uuid::new_v4(),
            spec,
            created_at: Utc::now(),
            state: Mutex::new(TaskState {
                status: TaskStatus::Pending,
                steps: 0,
                result: None,
                error: None,
                history: Vec::new(),
            }),
            stop,
            gate: ConfirmationGate::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TaskState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn spec(&self) -> &TaskSpec {
        &self.spec
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn status(&self) -> TaskStatus {
        self.lock().status
    }

    pub fn steps(&self) -> u32 {
        self.lock().steps
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        let state = self.lock();
        TaskSnapshot {
            task_id: self.id,
            status: state.status,
            prompt: self.spec.prompt.clone(),
            steps: state.steps,
            result: state.result.clone(),
            error: state.error.clone(),
            history: state.history.clone(),
            created_at: self.created_at,
        }
    }

    /// Move between active states. Ignored once the task has finished.
    pub fn set_status(&self, status: TaskStatus) -> bool {
        let mut state = self.lock();
        if state.status.is_terminal() || status.is_terminal() {
            return false;
        }
        if state.status != status {
            debug!(task_id = %self.id, from = %state.status, to = %status, "Task status changed");
        }
        state.status = status;
        true
    }

    pub fn set_steps(&self, steps: u32) {
        self.lock().steps = steps;
    }

    pub fn push_step(&self, record: StepRecord) {
        self.lock().history.push(record);
    }

    /// Enter a terminal state. Only the first call has any effect.
    pub fn finish(&self, status: TaskStatus, message: impl Into<String>) -> bool {
        debug_assert!(status.is_terminal());
        let mut state = self.lock();
        if state.status.is_terminal() || status.is_active() {
            return false;
        }
        let message = message.into();
        state.status = status;
        if status == TaskStatus::Completed {
            state.result = Some(message);
        } else {
            state.error = Some(message);
        }
        info!(task_id = %self.id, steps = state.steps, "Task finished with status: {}", status);
        true
    }

    /// Ask the loop to stop and release a pending confirmation.
    pub fn request_stop(&self) {
        self.stop.send_replace(true);
        self.gate.resolve(false);
    }

    pub fn stop_requested(&self) -> bool {
        *self.stop.borrow()
    }

    pub fn stop_signal(&self) -> watch::Receiver<bool> {
        self.stop.subscribe()
    }

    pub fn gate(&self) -> &ConfirmationGate {
        &self.gate
    }
}
