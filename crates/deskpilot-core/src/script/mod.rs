//! # Restricted Automation Scripts
//!
//! Model output and compiled actions are expressed in a tiny statement
//! language that only knows how to call the approved desktop capabilities.
//! Handling a script is two-phase:
//!
//! 1. [`validate`] parses the text and walks the tree against the
//!    [`WhitelistPolicy`]. It has no side effects.
//! 2. [`Interpreter`] evaluates an accepted tree. Its only way to reach the
//!    outside world is a [`Capability`] looked up in the same table the
//!    policy is built from, dispatched to a [`Host`].
//!
//! ```text
//! source ──▶ lexer ──▶ parser ──▶ validator ──▶ interpreter ──▶ Host
//!                                     │                           │
//!                                WhitelistPolicy ◀── CAPABILITIES ┘
//! ```

pub mod ast;
pub mod interpreter;
pub mod lexer;
pub mod parser;
pub mod policy;
pub mod validator;

pub use ast::{Expr, Program, Stmt};
pub use interpreter::{Host, Interpreter, Invocation, RuntimeError, Value};
pub use parser::parse;
pub use policy::{Capability, WhitelistPolicy, CAPABILITIES};
pub use validator::{validate, validate_program, Rejection};

use thiserror::Error;

/// Errors raised while reading script text.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScriptError {
    #[error("Syntax error on line {line}: {message}")]
    Syntax { line: usize, message: String },
}
