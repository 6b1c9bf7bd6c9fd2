use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Binary name used in usage lines
pub const PROGRAM_NAME: &str = "nimare";

/// One-line description of the program
pub const ABOUT: &str = "Neuroimaging meta-analysis workflows";

/// Output format options
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable text output
    #[default]
    Text,
    /// JSON output
    Json,
    /// Table output
    Table,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Table => write!(f, "table"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_format_names() {
        assert_eq!(OutputFormat::Json.to_string(), "json");
        assert_eq!(OutputFormat::from_str("table", true).unwrap(), OutputFormat::Table);
        assert_eq!(OutputFormat::default(), OutputFormat::Text);
    }
}
