//! NiMARE Library
//!
//! Neuroimaging meta-analysis workflows behind a single command dispatcher:
//! a registry of named workflow units, a dispatcher that resolves and binds
//! their arguments, and the coordinate and image based analyses themselves.

pub mod cli;
pub mod core;
pub mod domain;
pub mod infrastructure;
pub mod io;
pub mod stats;
pub mod workflows;

pub use crate::core::{CommandRegistry, Dispatcher, Invocation, Outcome, Payload, WorkflowUnit};
pub use domain::config::NimareConfig;
pub use domain::error::{FailureKind, NimareError, NimareResult, WorkflowFailure};
pub use workflows::build_registry;
