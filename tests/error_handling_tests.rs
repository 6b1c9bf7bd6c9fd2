use std::error::Error;
use std::io;
use std::path::Path;

use nimare::core::{ArgumentSchema, BoundArgs, RegistryBuilder};
use nimare::domain::exit;
use nimare::{FailureKind, NimareError, NimareResult, Outcome, WorkflowFailure, WorkflowUnit};

/// Error display, conversion and exit status tests
#[cfg(test)]
mod error_handling_tests {
    use super::*;

    struct Named(&'static str);

    impl WorkflowUnit for Named {
        fn name(&self) -> &'static str {
            self.0
        }

        fn about(&self) -> &'static str {
            "named test unit"
        }

        fn schema(&self) -> ArgumentSchema {
            ArgumentSchema::new()
        }

        fn invoke(&self, _args: &BoundArgs) -> Outcome {
            Ok(serde_json::Value::Null)
        }
    }

    #[test]
    fn test_error_types() {
        let errors = vec![
            (
                NimareError::UnknownCommand {
                    name: "alee".to_string(),
                },
                exit::USAGE,
            ),
            (
                NimareError::ArgumentParse {
                    command: "ale".to_string(),
                    message: "unexpected argument '--bad-flag' found".to_string(),
                },
                exit::USAGE,
            ),
            (
                NimareError::DuplicateCommand {
                    name: "ale".to_string(),
                },
                exit::SOFTWARE,
            ),
            (
                NimareError::Config {
                    message: "bad toml".to_string(),
                },
                exit::CONFIG,
            ),
            (NimareError::Output("broken pipe".to_string()), exit::IOERR),
            (
                NimareError::ReservedCommand {
                    name: "help".to_string(),
                },
                exit::SOFTWARE,
            ),
        ];

        for (error, code) in errors {
            assert!(!error.to_string().is_empty());
            assert_eq!(error.exit_code(), code, "{error}");
            assert_ne!(error.exit_code(), exit::OK);
        }

        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<NimareError>();
    }

    #[test]
    fn test_workflow_failure_is_transparent() {
        let message = "No coordinates found in dataset.json";
        let error: NimareError = WorkflowFailure::invalid_input(message).into();
        assert_eq!(error.to_string(), message);
        assert_eq!(error.exit_code(), exit::DATAERR);
        assert!(error.source().is_none());
    }

    #[test]
    fn test_failure_kind_exit_codes() {
        let codes: Vec<i32> = [
            FailureKind::InvalidInput,
            FailureKind::MissingInput,
            FailureKind::OutputFailed,
            FailureKind::Computation,
        ]
        .into_iter()
        .map(FailureKind::exit_code)
        .collect();
        assert_eq!(codes, vec![exit::DATAERR, exit::NOINPUT, exit::CANTCREAT, exit::FAILURE]);
        assert_eq!(FailureKind::MissingInput.to_string(), "missing-input");
    }

    #[test]
    fn test_read_failure_kinds() {
        let path = Path::new("studies.txt");
        let missing = WorkflowFailure::read(path, io::Error::new(io::ErrorKind::NotFound, "gone"));
        assert_eq!(missing.kind, FailureKind::MissingInput);
        assert!(missing.message.contains("studies.txt"));

        let garbled = WorkflowFailure::read(path, io::Error::new(io::ErrorKind::InvalidData, "not utf-8"));
        assert_eq!(garbled.kind, FailureKind::InvalidInput);

        let unwritable = WorkflowFailure::write(Path::new("out/ale.tsv"), "read-only file system");
        assert_eq!(unwritable.kind, FailureKind::OutputFailed);
        assert_eq!(unwritable.to_string(), "Failed to write out/ale.tsv: read-only file system");
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut builder = RegistryBuilder::new();
        builder.register(Named("ale")).unwrap();
        builder.register(Named("scale")).unwrap();
        let err = builder.register(Named("ale")).err().unwrap();
        assert!(matches!(err, NimareError::DuplicateCommand { ref name } if name == "ale"));

        let err = builder.register(Named("--version")).err().unwrap();
        assert!(matches!(err, NimareError::ReservedCommand { .. }));
        assert!(err.to_string().contains("'--version'"));

        let registry = builder.build();
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["ale", "scale"]);
    }

    #[test]
    fn test_result_type() {
        fn resolve(known: bool) -> NimareResult<&'static str> {
            if known {
                Ok("ale")
            } else {
                Err(NimareError::UnknownCommand {
                    name: "alee".to_string(),
                })
            }
        }

        assert_eq!(resolve(true).unwrap(), "ale");
        assert!(resolve(false).unwrap_err().to_string().contains("'alee'"));
    }
}
