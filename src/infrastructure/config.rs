use crate::cli::args::OutputFormat;
use crate::domain::{config::NimareConfig, error::{NimareError, NimareResult}};
use clap::ValueEnum;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variable naming an explicit configuration file
pub const CONFIG_ENV: &str = "NIMARE_CONFIG";

/// Environment variable overriding the configured output format
pub const OUTPUT_ENV: &str = "NIMARE_OUTPUT";

/// Configuration manager
pub struct ConfigManager {
    global_config_path: Option<PathBuf>,
    project_config_path: Option<PathBuf>,
    explicit_config_path: Option<PathBuf>,
}

impl ConfigManager {
    /// Create a configuration manager using the user's home directory, the
    /// nearest `.nimare/config.toml`, and `NIMARE_CONFIG`.
    pub fn new() -> Self {
        Self {
            global_config_path: Self::get_global_config_path(),
            project_config_path: std::env::current_dir()
                .ok()
                .and_then(|dir| Self::find_project_config_path(&dir)),
            explicit_config_path: std::env::var_os(CONFIG_ENV).map(PathBuf::from),
        }
    }

    /// Create a configuration manager with explicit paths
    pub fn with_paths(global: Option<PathBuf>, project: Option<PathBuf>) -> Self {
        Self {
            global_config_path: global,
            project_config_path: project,
            explicit_config_path: None,
        }
    }

    /// Load configuration from files.
    ///
    /// An explicit `NIMARE_CONFIG` file replaces the global and project files.
    /// Otherwise the project file, when present, overrides the global one.
    pub fn load_config(&self) -> NimareResult<NimareConfig> {
        let mut config = if let Some(explicit) = &self.explicit_config_path {
            self.load_config_from_path(explicit)?
        } else {
            let mut config = NimareConfig::default();
            for path in [&self.global_config_path, &self.project_config_path]
                .into_iter()
                .flatten()
            {
                if path.exists() {
                    debug!(path = %path.display(), "loading configuration");
                    config = self.load_config_from_path(path)?;
                }
            }
            config
        };

        if let Ok(format) = std::env::var(OUTPUT_ENV) {
            config.global.output_format =
                OutputFormat::from_str(&format, true).map_err(|_| NimareError::Config {
                    message: format!("Invalid {} value '{}'", OUTPUT_ENV, format),
                })?;
        }

        Ok(config)
    }

    /// Get global configuration path
    fn get_global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".config").join("nimare").join("config.toml"))
    }

    /// Find project configuration path by walking up directory tree
    pub fn find_project_config_path(start: &Path) -> Option<PathBuf> {
        let mut path = start;

        loop {
            let config_path = path.join(".nimare").join("config.toml");
            if config_path.exists() {
                return Some(config_path);
            }

            path = path.parent()?;
        }
    }

    /// Load configuration from specific path
    pub fn load_config_from_path(&self, path: &Path) -> NimareResult<NimareConfig> {
        let content = fs::read_to_string(path).map_err(|e| NimareError::Config {
            message: format!("Failed to read config file {}: {}", path.display(), e),
        })?;

        toml::from_str(&content).map_err(|e| NimareError::Config {
            message: format!("Failed to parse config file {}: {}", path.display(), e),
        })
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}
