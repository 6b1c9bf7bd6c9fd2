use tracing::error;

use crate::cli::output::OutputWriter;
use crate::core::dispatcher::{Completion, Dispatcher, Invocation};
use crate::domain::error::NimareError;
use crate::domain::exit;

/// Dispatch `argv`, render the outcome through `writer`, and return the
/// process exit status.
pub fn execute_command<I, T, W>(dispatcher: &Dispatcher, argv: I, writer: &mut W) -> i32
where
    I: IntoIterator<Item = T>,
    T: Into<String>,
    W: OutputWriter,
{
    let invocation = dispatcher.run(argv);
    render_invocation(&invocation, writer)
}

/// Render a finished invocation. Workflow errors are written verbatim.
pub fn render_invocation<W: OutputWriter>(invocation: &Invocation, writer: &mut W) -> i32 {
    let rendered = match invocation.result() {
        Ok(Completion::Listing(commands)) => writer.write_commands(commands),
        Ok(Completion::Usage { text, .. }) => writer.write_usage(text),
        Ok(Completion::Version(version)) => writer.write_message(version),
        Ok(Completion::Finished { command, payload }) => writer.write_payload(command, payload),
        Err(err) => writer.write_error(&err.to_string()),
    };

    match rendered {
        Ok(()) => invocation.exit_code(),
        Err(err) => {
            let err = NimareError::from(err);
            error!(error = %err, "failed to render command output");
            if invocation.exit_code() == exit::OK {
                err.exit_code()
            } else {
                invocation.exit_code()
            }
        }
    }
}
