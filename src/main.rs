// NiMARE - Neuroimaging meta-analysis command line
use std::process::ExitCode;

use anyhow::{Context, Result};
use tracing::debug;

use nimare::cli::{execute_command, ConsoleWriter};
use nimare::domain::exit;
use nimare::infrastructure::{init_logging, ConfigManager, LoggingError};
use nimare::{build_registry, Dispatcher, NimareError};

/// Load configuration, set up logging and dispatch the command line.
/// Returns the exit status of the dispatched command.
fn try_main() -> Result<i32> {
    let config = ConfigManager::new()
        .load_config()
        .context("failed to load configuration")?;

    if let Err(err) = init_logging(&config.global.log_level) {
        report_logging_init_error(&err);
        return Ok(exit::CONFIG);
    }
    debug!(format = %config.global.output_format, "configuration loaded");

    let registry = build_registry().context("failed to register workflows")?;
    let dispatcher = Dispatcher::new(registry);
    let mut writer = ConsoleWriter::stdio(config.global.output_format);
    let argv = std::env::args_os()
        .skip(1)
        .map(|arg| arg.to_string_lossy().into_owned());
    Ok(execute_command(&dispatcher, argv, &mut writer))
}

fn main() -> ExitCode {
    match try_main() {
        Ok(code) => to_exit_code(code),
        Err(err) => {
            let code = err
                .downcast_ref::<NimareError>()
                .map_or(exit::SOFTWARE, NimareError::exit_code);
            eprintln!("Error: {err:#}");
            to_exit_code(code)
        }
    }
}

fn to_exit_code(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

fn report_logging_init_error(err: &LoggingError) {
    eprintln!("failed to initialize logging: {err}");
}
