use clap::Command;

use crate::core::schema::{ArgumentSchema, BoundArgs};
use crate::domain::error::WorkflowFailure;

/// Success value of a workflow. Opaque to the dispatcher.
pub type Payload = serde_json::Value;

/// Single outcome channel of a workflow invocation
pub type Outcome = Result<Payload, WorkflowFailure>;

/// An independently invokable meta-analysis procedure.
///
/// Implementations read only their bound arguments and the resources they open
/// themselves. They report every failure through [`Outcome`] and never exit the
/// process; the dispatcher owns the exit status.
pub trait WorkflowUnit: Send + Sync {
    /// Command name, unique within a registry
    fn name(&self) -> &'static str;

    /// One-line description shown in the help listing
    fn about(&self) -> &'static str;

    /// Options accepted by this workflow
    fn schema(&self) -> ArgumentSchema;

    /// Run the workflow with validated arguments
    fn invoke(&self, args: &BoundArgs) -> Outcome;

    /// Clap command compiled from [`WorkflowUnit::schema`]
    fn command(&self) -> Command {
        self.schema().to_command(self.name(), self.about())
    }
}
