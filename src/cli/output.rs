use std::io::{self, Stderr, Stdout, Write};

use serde_json::Value;
use tabled::{Table, Tabled};

use crate::cli::args::{OutputFormat, ABOUT, PROGRAM_NAME};
use crate::core::registry::CommandSummary;
use crate::core::workflow::Payload;

/// Output writer trait for different formats
pub trait OutputWriter {
    fn write_commands(&mut self, commands: &[CommandSummary]) -> Result<(), OutputError>;
    fn write_usage(&mut self, text: &str) -> Result<(), OutputError>;
    fn write_payload(&mut self, command: &str, payload: &Payload) -> Result<(), OutputError>;
    fn write_message(&mut self, message: &str) -> Result<(), OutputError>;
    fn write_error(&mut self, error: &str) -> Result<(), OutputError>;
}

/// Output formatting errors
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
}

impl From<OutputError> for crate::domain::error::NimareError {
    fn from(err: OutputError) -> Self {
        Self::Output(err.to_string())
    }
}

/// Console output writer. Results go to `out`, diagnostics to `err`.
pub struct ConsoleWriter<O = Stdout, E = Stderr> {
    format: OutputFormat,
    out: O,
    err: E,
}

impl ConsoleWriter {
    /// Writer bound to the process's stdout and stderr
    pub fn stdio(format: OutputFormat) -> Self {
        Self::new(format, io::stdout(), io::stderr())
    }
}

impl<O: Write, E: Write> ConsoleWriter<O, E> {
    pub fn new(format: OutputFormat, out: O, err: E) -> Self {
        Self { format, out, err }
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    pub fn into_parts(self) -> (O, E) {
        (self.out, self.err)
    }
}

/// Table row for one top-level payload field
#[derive(Tabled)]
struct FieldRow {
    #[tabled(rename = "Field")]
    field: String,
    #[tabled(rename = "Value")]
    value: String,
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) if items.iter().all(Value::is_string) => items
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    }
}

impl<O: Write, E: Write> OutputWriter for ConsoleWriter<O, E> {
    fn write_commands(&mut self, commands: &[CommandSummary]) -> Result<(), OutputError> {
        match self.format {
            OutputFormat::Text => {
                writeln!(self.out, "{ABOUT}")?;
                writeln!(self.out)?;
                writeln!(self.out, "Usage: {PROGRAM_NAME} <COMMAND> [OPTIONS]")?;
                writeln!(self.out)?;
                writeln!(self.out, "Commands:")?;
                let width = commands.iter().map(|c| c.name.len()).max().unwrap_or(0);
                for command in commands {
                    writeln!(self.out, "  {:<width$}  {}", command.name, command.about)?;
                }
                writeln!(self.out)?;
                writeln!(
                    self.out,
                    "Run '{PROGRAM_NAME} help <COMMAND>' for the options of a command."
                )?;
            }
            OutputFormat::Json => {
                let output = serde_json::to_string_pretty(commands)?;
                writeln!(self.out, "{}", output)?;
            }
            OutputFormat::Table => {
                let table = Table::new(commands.iter().copied());
                writeln!(self.out, "{}", table)?;
            }
        }
        Ok(())
    }

    fn write_usage(&mut self, text: &str) -> Result<(), OutputError> {
        writeln!(self.out, "{}", text.trim_end())?;
        Ok(())
    }

    fn write_payload(&mut self, command: &str, payload: &Payload) -> Result<(), OutputError> {
        match self.format {
            OutputFormat::Json => {
                let output = serde_json::to_string_pretty(payload)?;
                writeln!(self.out, "{}", output)?;
            }
            OutputFormat::Text => {
                writeln!(self.out, "{command} finished")?;
                match payload {
                    Value::Object(fields) => {
                        for (key, value) in fields {
                            writeln!(self.out, "  {}: {}", key, render_value(value))?;
                        }
                    }
                    Value::Null => {}
                    other => writeln!(self.out, "  {}", render_value(other))?,
                }
            }
            OutputFormat::Table => {
                let rows: Vec<FieldRow> = match payload {
                    Value::Object(fields) => fields
                        .iter()
                        .map(|(key, value)| FieldRow {
                            field: key.clone(),
                            value: render_value(value),
                        })
                        .collect(),
                    other => vec![FieldRow {
                        field: command.to_string(),
                        value: render_value(other),
                    }],
                };
                writeln!(self.out, "{}", Table::new(rows))?;
            }
        }
        Ok(())
    }

    fn write_message(&mut self, message: &str) -> Result<(), OutputError> {
        writeln!(self.out, "{}", message)?;
        Ok(())
    }

    fn write_error(&mut self, error: &str) -> Result<(), OutputError> {
        writeln!(self.err, "Error: {}", error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn writer(format: OutputFormat) -> ConsoleWriter<Vec<u8>, Vec<u8>> {
        ConsoleWriter::new(format, Vec::new(), Vec::new())
    }

    fn commands() -> Vec<CommandSummary> {
        vec![
            CommandSummary {
                name: "ale",
                about: "ALE",
            },
            CommandSummary {
                name: "conperm",
                about: "Permutation",
            },
        ]
    }

    #[test]
    fn test_text_listing_in_order() {
        let mut w = writer(OutputFormat::Text);
        w.write_commands(&commands()).unwrap();
        let (out, _) = w.into_parts();
        let text = String::from_utf8(out).unwrap();
        let ale = text.find("  ale").unwrap();
        let conperm = text.find("  conperm").unwrap();
        assert!(ale < conperm);
        assert!(text.contains("Usage: nimare"));
    }

    #[test]
    fn test_json_listing() {
        let mut w = writer(OutputFormat::Json);
        w.write_commands(&commands()).unwrap();
        let (out, _) = w.into_parts();
        let parsed: Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(parsed[1]["name"], "conperm");
    }

    #[test]
    fn test_table_listing() {
        let mut w = writer(OutputFormat::Table);
        w.write_commands(&commands()).unwrap();
        let (out, _) = w.into_parts();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Command"));
        assert!(text.contains("conperm"));
    }

    #[test]
    fn test_payload_formats() {
        let payload = serde_json::json!({ "files": ["a.tsv", "b.tsv"], "n_iters": 5 });

        let mut w = writer(OutputFormat::Text);
        w.write_payload("ale", &payload).unwrap();
        let text = String::from_utf8(w.into_parts().0).unwrap();
        assert!(text.contains("files: a.tsv, b.tsv"));
        assert!(text.contains("n_iters: 5"));

        let mut w = writer(OutputFormat::Json);
        w.write_payload("ale", &payload).unwrap();
        let parsed: Value = serde_json::from_slice(&w.into_parts().0).unwrap();
        assert_eq!(parsed, payload);
    }

    #[test]
    fn test_errors_go_to_stderr() {
        let mut w = writer(OutputFormat::Text);
        w.write_error("boom").unwrap();
        let (out, err) = w.into_parts();
        assert!(out.is_empty());
        assert_eq!(String::from_utf8(err).unwrap(), "Error: boom\n");
    }
}
