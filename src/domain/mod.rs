// Domain module - Shared types, configuration model and errors
pub mod config;
pub mod error;
pub mod exit;

pub use config::{GlobalConfig, NimareConfig};
pub use error::{FailureKind, NimareError, NimareResult, WorkflowFailure};
