//! # Deskpilot Server
//!
//! The HTTP control surface. Every route requires `Authorization: Bearer
//! <api_key>`; at most one task runs at a time.
//!
//! | Route | Effect |
//! |---|---|
//! | `GET /` | Service banner |
//! | `POST /task` | Create a task |
//! | `GET /task/{id}` | Status, result and step history |
//! | `POST /task/{id}/stop` | Stop an active task |
//! | `POST /task/{id}/confirm` | Answer a pending send confirmation |
//! | `GET /task/{id}/screenshot` | Current screen with the task status |
//! | `GET /screenshot` | Current screen |

pub mod api;
pub mod error;

pub use api::{build_router, AppState};
pub use error::{ApiError, ApiResult};
