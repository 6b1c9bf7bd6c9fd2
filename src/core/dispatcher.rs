//! Resolution of a command name to its workflow, argument binding, invocation
//! and outcome reporting.
//!
//! The dispatcher is I/O free: [`Dispatcher::run`] returns an [`Invocation`]
//! describing where the invocation ended and what it produced, and the CLI
//! layer decides how to render it.

use clap::error::ErrorKind;
use tracing::{debug, info, warn};

use crate::core::registry::{CommandRegistry, CommandSummary};
use crate::core::schema::BoundArgs;
use crate::core::workflow::{Payload, WorkflowUnit};
use crate::domain::error::{NimareError, NimareResult};
use crate::domain::exit;

/// Position of an invocation in the dispatch state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationState {
    Start,
    ParsedName,
    Help,
    ResolveFailed,
    Resolved,
    ArgParseFailed,
    ArgsBound,
    WorkflowSuccess,
    WorkflowFailure,
}

impl InvocationState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Help
                | Self::ResolveFailed
                | Self::ArgParseFailed
                | Self::WorkflowSuccess
                | Self::WorkflowFailure
        )
    }
}

/// What a successful invocation produced
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    /// Program-level help: every registered command, in registration order
    Listing(Vec<CommandSummary>),
    /// Usage text of a single command
    Usage { command: &'static str, text: String },
    /// Program version
    Version(String),
    /// Workflow returned a payload
    Finished {
        command: &'static str,
        payload: Payload,
    },
}

/// Result of one dispatch
#[derive(Debug)]
pub struct Invocation {
    state: InvocationState,
    result: NimareResult<Completion>,
}

impl Invocation {
    pub fn state(&self) -> InvocationState {
        self.state
    }

    pub fn result(&self) -> &NimareResult<Completion> {
        &self.result
    }

    pub fn into_result(self) -> NimareResult<Completion> {
        self.result
    }

    /// Process exit status for this invocation
    pub fn exit_code(&self) -> i32 {
        match &self.result {
            Ok(_) => exit::OK,
            Err(err) => err.exit_code(),
        }
    }

    pub fn payload(&self) -> Option<&Payload> {
        match &self.result {
            Ok(Completion::Finished { payload, .. }) => Some(payload),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&NimareError> {
        self.result.as_ref().err()
    }
}

/// Ephemeral per-invocation state owned by the dispatcher
struct InvocationContext {
    argv: Vec<String>,
    state: InvocationState,
    bound: Option<BoundArgs>,
}

impl InvocationContext {
    fn new(argv: Vec<String>) -> Self {
        Self {
            argv,
            state: InvocationState::Start,
            bound: None,
        }
    }

    fn advance(&mut self, next: InvocationState) {
        debug!(from = ?self.state, to = ?next, "invocation state");
        self.state = next;
    }

    fn finish(mut self, state: InvocationState, result: NimareResult<Completion>) -> Invocation {
        self.advance(state);
        Invocation {
            state: self.state,
            result,
        }
    }
}

/// Program-level request recognised before command resolution
enum Request<'a> {
    Listing,
    CommandHelp(&'a str),
    Version,
    Command(&'a str),
}

fn classify(argv: &[String]) -> Request<'_> {
    match argv.first().map(String::as_str) {
        None | Some("-h") | Some("--help") => Request::Listing,
        Some("help") => match argv.get(1) {
            Some(name) => Request::CommandHelp(name),
            None => Request::Listing,
        },
        Some("-V") | Some("--version") => Request::Version,
        Some(name) => Request::Command(name),
    }
}

/// Entry point that routes an argument vector to one registered workflow
#[derive(Debug)]
pub struct Dispatcher {
    registry: CommandRegistry,
}

impl Dispatcher {
    pub fn new(registry: CommandRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    /// Dispatch one invocation. `argv` excludes the program name.
    pub fn run<I, T>(&self, argv: I) -> Invocation
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let mut ctx = InvocationContext::new(argv.into_iter().map(Into::into).collect());
        let argv = ctx.argv.clone();

        if argv.is_empty() {
            return ctx.finish(InvocationState::Help, Ok(self.listing()));
        }
        ctx.advance(InvocationState::ParsedName);

        let name = match classify(&argv) {
            Request::Listing => return ctx.finish(InvocationState::Help, Ok(self.listing())),
            Request::Version => {
                let version = format!("nimare {}", env!("CARGO_PKG_VERSION"));
                return ctx.finish(InvocationState::Help, Ok(Completion::Version(version)));
            }
            Request::CommandHelp(name) => {
                return match self.registry.resolve(name) {
                    Ok(unit) => {
                        let text = unit.command().render_long_help().to_string();
                        ctx.finish(
                            InvocationState::Help,
                            Ok(Completion::Usage {
                                command: unit.name(),
                                text,
                            }),
                        )
                    }
                    Err(err) => ctx.finish(InvocationState::ResolveFailed, Err(err)),
                };
            }
            Request::Command(name) => name,
        };

        let unit = match self.registry.resolve(name) {
            Ok(unit) => unit,
            Err(err) => {
                warn!(command = name, "unknown command");
                return ctx.finish(InvocationState::ResolveFailed, Err(err));
            }
        };
        ctx.advance(InvocationState::Resolved);

        let bound = match bind_arguments(unit, &argv[1..]) {
            Ok(Binding::Bound(bound)) => bound,
            Ok(Binding::Usage(text)) => {
                return ctx.finish(
                    InvocationState::Help,
                    Ok(Completion::Usage {
                        command: unit.name(),
                        text,
                    }),
                )
            }
            Err(err) => return ctx.finish(InvocationState::ArgParseFailed, Err(err)),
        };
        ctx.advance(InvocationState::ArgsBound);
        let bound = ctx.bound.insert(bound);

        info!(command = unit.name(), arguments = bound.len(), "invoking workflow");
        match unit.invoke(bound) {
            Ok(payload) => {
                info!(command = unit.name(), "workflow completed");
                ctx.finish(
                    InvocationState::WorkflowSuccess,
                    Ok(Completion::Finished {
                        command: unit.name(),
                        payload,
                    }),
                )
            }
            Err(failure) => {
                warn!(command = unit.name(), kind = %failure.kind, "workflow failed");
                ctx.finish(
                    InvocationState::WorkflowFailure,
                    Err(NimareError::Workflow(failure)),
                )
            }
        }
    }

    fn listing(&self) -> Completion {
        Completion::Listing(self.registry.list().collect())
    }
}

enum Binding {
    Bound(BoundArgs),
    Usage(String),
}

fn bind_arguments(unit: &dyn WorkflowUnit, tokens: &[String]) -> NimareResult<Binding> {
    let schema = unit.schema();
    let matches = match schema
        .to_command(unit.name(), unit.about())
        .try_get_matches_from(tokens)
    {
        Ok(matches) => matches,
        Err(err) if err.kind() == ErrorKind::DisplayHelp => {
            return Ok(Binding::Usage(err.render().to_string()));
        }
        Err(err) => {
            return Err(NimareError::ArgumentParse {
                command: unit.name().to_string(),
                message: clap_message(&err),
            })
        }
    };
    schema.bind(unit.name(), &matches).map(Binding::Bound)
}

fn clap_message(err: &clap::Error) -> String {
    let rendered = err.render().to_string();
    rendered
        .trim()
        .strip_prefix("error: ")
        .unwrap_or(rendered.trim())
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::registry::RegistryBuilder;
    use crate::core::schema::{ArgumentSchema, OptionSpec, ValueKind};
    use crate::core::workflow::Outcome;
    use crate::domain::error::{FailureKind, WorkflowFailure};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Counting {
        calls: Arc<AtomicUsize>,
    }

    impl WorkflowUnit for Counting {
        fn name(&self) -> &'static str {
            "count"
        }

        fn about(&self) -> &'static str {
            "Counts invocations"
        }

        fn schema(&self) -> ArgumentSchema {
            ArgumentSchema::new().option(
                OptionSpec::named("times", ValueKind::Integer, "Times")
                    .default("1")
                    .at_least(1.0),
            )
        }

        fn invoke(&self, args: &BoundArgs) -> Outcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let times = args.integer("times")?;
            if times > 10 {
                return Err(WorkflowFailure::new(FailureKind::Computation, "too many"));
            }
            Ok(serde_json::json!({ "times": times }))
        }
    }

    fn dispatcher() -> (Dispatcher, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut builder = RegistryBuilder::new();
        builder
            .register(Counting {
                calls: calls.clone(),
            })
            .unwrap();
        (Dispatcher::new(builder.build()), calls)
    }

    #[test]
    fn test_success_path_states() {
        let (dispatcher, calls) = dispatcher();
        let invocation = dispatcher.run(["count", "--times", "3"]);
        assert_eq!(invocation.state(), InvocationState::WorkflowSuccess);
        assert_eq!(invocation.exit_code(), 0);
        assert_eq!(invocation.payload(), Some(&serde_json::json!({ "times": 3 })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failure_path_states() {
        let (dispatcher, _) = dispatcher();
        let invocation = dispatcher.run(["count", "--times", "11"]);
        assert_eq!(invocation.state(), InvocationState::WorkflowFailure);
        assert_eq!(invocation.exit_code(), exit::FAILURE);
        assert_eq!(invocation.error().unwrap().to_string(), "too many");
    }

    #[test]
    fn test_help_variants() {
        let (dispatcher, calls) = dispatcher();
        let cases: [&[&str]; 4] = [&[], &["--help"], &["-h"], &["help"]];
        for argv in cases {
            let invocation = dispatcher.run(argv.iter().copied());
            assert_eq!(invocation.state(), InvocationState::Help);
            assert!(matches!(invocation.result(), Ok(Completion::Listing(list)) if list.len() == 1));
        }

        let usage = dispatcher.run(["help", "count"]);
        assert!(matches!(usage.result(), Ok(Completion::Usage { command: "count", .. })));

        let usage = dispatcher.run(["count", "--help"]);
        assert_eq!(usage.exit_code(), 0);
        assert!(matches!(usage.result(), Ok(Completion::Usage { text, .. }) if text.contains("--times")));

        assert!(matches!(dispatcher.run(["--version"]).result(), Ok(Completion::Version(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_resolve_and_parse_failures() {
        let (dispatcher, calls) = dispatcher();

        let unknown = dispatcher.run(["counting"]);
        assert_eq!(unknown.state(), InvocationState::ResolveFailed);
        assert_eq!(unknown.exit_code(), exit::USAGE);
        assert!(unknown.error().unwrap().to_string().contains("'counting'"));

        let help_unknown = dispatcher.run(["help", "counting"]);
        assert_eq!(help_unknown.state(), InvocationState::ResolveFailed);

        let bad_flag = dispatcher.run(["count", "--bad-flag"]);
        assert_eq!(bad_flag.state(), InvocationState::ArgParseFailed);
        assert_ne!(bad_flag.exit_code(), 0);

        let out_of_range = dispatcher.run(["count", "--times", "0"]);
        assert_eq!(out_of_range.state(), InvocationState::ArgParseFailed);

        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_terminal_states() {
        assert!(InvocationState::Help.is_terminal());
        assert!(InvocationState::WorkflowFailure.is_terminal());
        assert!(!InvocationState::Resolved.is_terminal());
        assert!(!InvocationState::ArgsBound.is_terminal());
    }
}
