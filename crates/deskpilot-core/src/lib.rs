//! # Deskpilot Core
//!
//! Turns model-proposed desktop actions into safe, verified effects and
//! drives each task from submission to a terminal state.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          Orchestrator                            │
//! │                                                                  │
//! │  ┌──────────┐  ┌──────────┐  ┌──────────┐  ┌──────────────────┐  │
//! │  │ Context  │─▶│  Router  │─▶│ Compiler │─▶│ Sandboxed        │  │
//! │  │ Source   │  │ (trait)  │  │          │  │ Executor         │  │
//! │  └──────────┘  └──────────┘  └──────────┘  │  validate ─▶ run │  │
//! │                                            └──────────────────┘  │
//! │  ┌──────────┐  ┌──────────┐  ┌──────────┐  ┌──────────┐          │
//! │  │ Verifier │  │ Recovery │  │   Gate   │  │ Registry │          │
//! │  └──────────┘  └──────────┘  └──────────┘  └──────────┘          │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Nothing below the orchestrator returns an error across its contract:
//! the executor reports an [`ExecutionResult`], the router answers with a
//! Fail decision, and recovery produces a hint.

pub mod action;
pub mod compiler;
pub mod config;
pub mod context;
pub mod executor;
pub mod gate;
pub mod orchestrator;
pub mod preload;
pub mod projector;
pub mod recovery;
pub mod registry;
pub mod router;
pub mod script;
pub mod send;
pub mod task;
pub mod verifier;

pub use action::{AgentAction, ClickKind, Decision, ScrollDirection, Sentinel};
pub use compiler::ActionCompiler;
pub use config::{ConfigError, CoreConfig, Platform};
pub use context::{ContextSource, Desktop, DesktopContextSource, ScreenContext};
pub use executor::{ExecutionResult, SandboxedExecutor};
pub use orchestrator::{Orchestrator, SEND_VERIFY_INSTRUCTION};
pub use projector::{CoordinateSpace, Projector};
pub use registry::{BoundedRegistry, TaskRegistry};
pub use router::{DecisionRouter, HistoryEntry};
pub use send::{PatternSendDetector, SendDetector};
pub use task::{StepRecord, TaskHandle, TaskRequest, TaskSnapshot, TaskStatus};
pub use verifier::EffectVerifier;

use thiserror::Error;

/// Errors surfaced to callers of the orchestrator.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("{0}")]
    InvalidRequest(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Screen capture failed: {0}")]
    Capture(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, CoreError>;
