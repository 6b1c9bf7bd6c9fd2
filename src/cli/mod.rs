// CLI module - Command line interface
pub mod args;
pub mod commands;
pub mod output;

pub use args::{OutputFormat, PROGRAM_NAME};
pub use commands::{execute_command, render_invocation};
pub use output::{ConsoleWriter, OutputError, OutputWriter};
