use config::{Config as ConfigBuilder, ConfigError, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::params::Parameters;

/// Settings of the filescout runner.
///
/// # Configuration Locations
///
/// Configuration is layered from these locations, later ones winning:
/// 1. Global `$CONFIG_DIR/filescout/config.yaml`
/// 2. Local `.filescout.yaml` in the current directory
/// 3. Custom config file specified via `--config`
///
/// Command-line flags are applied on top with [`ScoutConfig::merge_with_cli`].
///
/// # Configuration Format
///
/// ```yaml
/// # Log level (trace, debug, info, warn, error)
/// log_level: "info"
///
/// # Only print files that matched
/// found_only: true
///
/// # Print the raw JSON result instead of text lines
/// json: false
/// pretty: false
///
/// # Error cap applied to searches that do not set `maxerrors`
/// max_errors: 30
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoutConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Skip "0 match found" lines, errors and statistics in text output
    #[serde(default)]
    pub found_only: bool,

    /// Print the JSON result instead of text lines
    #[serde(default)]
    pub json: bool,

    /// Indent JSON output
    #[serde(default)]
    pub pretty: bool,

    /// Error cap for searches without one; 0 leaves them unlimited
    #[serde(default = "default_max_errors")]
    pub max_errors: u64,
}

fn default_log_level() -> String {
    "warn".to_string()
}

fn default_max_errors() -> u64 {
    30
}

impl Default for ScoutConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            found_only: false,
            json: false,
            pretty: false,
            max_errors: default_max_errors(),
        }
    }
}

impl ScoutConfig {
    /// Loads configuration from the default locations
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Loads configuration from the default locations plus a specific file,
    /// which must exist.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if !path.exists() {
                return Err(ConfigError::NotFound(path.display().to_string()));
            }
        }

        let config_files = [
            // Global config
            dirs::config_dir().map(|p| p.join("filescout/config.yaml")),
            // Local config
            Some(PathBuf::from(".filescout.yaml")),
            // Custom config
            config_path.map(PathBuf::from),
        ];

        for path in config_files.iter().flatten() {
            if path.exists() {
                builder = builder.add_source(File::from(path.as_path()));
            }
        }

        builder.build()?.try_deserialize()
    }

    /// Merges CLI arguments with configuration file values
    pub fn merge_with_cli(mut self, cli_config: ScoutConfig) -> Self {
        // CLI values take precedence over config file values
        if cli_config.log_level != default_log_level() {
            self.log_level = cli_config.log_level;
        }
        if cli_config.found_only {
            self.found_only = true;
        }
        if cli_config.json {
            self.json = true;
        }
        if cli_config.pretty {
            self.pretty = true;
        }
        if cli_config.max_errors != default_max_errors() {
            self.max_errors = cli_config.max_errors;
        }
        self
    }

    /// Sets the configured error cap on searches that leave `maxerrors` unset.
    pub fn apply_defaults(&self, params: &mut Parameters) {
        for search in params.searches.values_mut() {
            if search.options.max_errors == 0 {
                search.options.max_errors = self.max_errors;
            }
        }
    }
}
