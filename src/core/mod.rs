// Core module - Command registry, dispatcher and the workflow contract
pub mod dispatcher;
pub mod registry;
pub mod schema;
pub mod workflow;

pub use dispatcher::{Completion, Dispatcher, Invocation, InvocationState};
pub use registry::{CommandRegistry, CommandSummary, RegistryBuilder, RESERVED_NAMES};
pub use schema::{ArgValue, ArgumentSchema, Arity, BoundArgs, OptionSpec, ValueKind};
pub use workflow::{Outcome, Payload, WorkflowUnit};
