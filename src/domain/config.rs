use serde::{Deserialize, Serialize};

use crate::cli::args::OutputFormat;

/// Nimare configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NimareConfig {
    /// Global configuration
    #[serde(default)]
    pub global: GlobalConfig,
}

/// Global configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Default log level
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// How help listings and workflow results are rendered
    #[serde(default)]
    pub output_format: OutputFormat,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            output_format: OutputFormat::default(),
        }
    }
}
