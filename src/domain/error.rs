use std::fmt;
use std::io;
use std::path::Path;
use thiserror::Error;

use crate::domain::exit;

/// Nimare unified error type
#[derive(Error, Debug)]
pub enum NimareError {
    #[error("Unknown command: '{name}'")]
    UnknownCommand { name: String },

    #[error("Duplicate command registration: '{name}'")]
    DuplicateCommand { name: String },

    #[error("Command name '{name}' is reserved for help and version requests")]
    ReservedCommand { name: String },

    #[error("Invalid arguments for '{command}': {message}")]
    ArgumentParse { command: String, message: String },

    /// Failure reported by a workflow; displays the workflow's message unchanged.
    #[error(transparent)]
    Workflow(#[from] WorkflowFailure),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Output error: {0}")]
    Output(String),
}

impl NimareError {
    /// Process exit status for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::UnknownCommand { .. } | Self::ArgumentParse { .. } => exit::USAGE,
            Self::DuplicateCommand { .. } | Self::ReservedCommand { .. } => exit::SOFTWARE,
            Self::Workflow(failure) => failure.kind.exit_code(),
            Self::Config { .. } => exit::CONFIG,
            Self::Output(_) => exit::IOERR,
        }
    }
}

pub type NimareResult<T> = Result<T, NimareError>;

/// Category of a workflow failure, chosen by the workflow itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Input data is present but malformed or statistically unusable
    InvalidInput,
    /// Input resource could not be opened
    MissingInput,
    /// Results could not be written
    OutputFailed,
    /// The analysis itself could not be completed
    Computation,
}

impl FailureKind {
    pub fn exit_code(self) -> i32 {
        match self {
            Self::InvalidInput => exit::DATAERR,
            Self::MissingInput => exit::NOINPUT,
            Self::OutputFailed => exit::CANTCREAT,
            Self::Computation => exit::FAILURE,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::InvalidInput => write!(f, "invalid-input"),
            FailureKind::MissingInput => write!(f, "missing-input"),
            FailureKind::OutputFailed => write!(f, "output-failed"),
            FailureKind::Computation => write!(f, "computation"),
        }
    }
}

/// Typed failure returned through a workflow's outcome channel
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct WorkflowFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl WorkflowFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(FailureKind::InvalidInput, message)
    }

    pub fn computation(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Computation, message)
    }

    /// Failure while reading `path`
    pub fn read(path: &Path, err: io::Error) -> Self {
        let kind = match err.kind() {
            io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => FailureKind::MissingInput,
            _ => FailureKind::InvalidInput,
        };
        Self::new(kind, format!("Failed to read {}: {}", path.display(), err))
    }

    /// Failure while writing `path`
    pub fn write(path: &Path, err: impl fmt::Display) -> Self {
        Self::new(
            FailureKind::OutputFailed,
            format!("Failed to write {}: {}", path.display(), err),
        )
    }
}
