//! Configuration file parsing
//!
//! Reads `stratum.toml`. Every key is optional; command line flags and
//! environment variables take precedence over the file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use stratum_core::{DEFAULT_LEDGER_TABLE, Guidelines, is_identifier};
use thiserror::Error;

/// Config file read when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "stratum.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// `sqlite://...` or `mysql://...`
    #[serde(default)]
    pub database_url: Option<String>,

    /// Directory holding the `.sql` changeset files
    #[serde(default = "default_migrations_dir")]
    pub migrations_dir: PathBuf,

    #[serde(default = "default_ledger_table")]
    pub ledger_table: String,

    #[serde(default)]
    pub guidelines: Guidelines,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            migrations_dir: default_migrations_dir(),
            ledger_table: default_ledger_table(),
            guidelines: Guidelines::default(),
        }
    }
}

fn default_migrations_dir() -> PathBuf {
    PathBuf::from("migrations")
}

fn default_ledger_table() -> String {
    DEFAULT_LEDGER_TABLE.to_string()
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path` when given, which must then exist. Otherwise loads
    /// [`DEFAULT_CONFIG_FILE`] from the working directory if present, and
    /// falls back to defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    Self::from_file(default_path)
                } else {
                    tracing::debug!("No {DEFAULT_CONFIG_FILE} found, using defaults");
                    Ok(Self::default())
                }
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        // The ledger table name is spliced into SQL text.
        if !is_identifier(&self.ledger_table) {
            return Err(ConfigError::Validation(format!(
                "invalid ledger_table '{}'. Use letters, digits and underscores only",
                self.ledger_table
            )));
        }
        if let Some(url) = &self.database_url {
            if url.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "database_url must not be empty".to_string(),
                ));
            }
        }
        if self.guidelines.denied_types.iter().any(|t| t.trim().is_empty()) {
            return Err(ConfigError::Validation(
                "guidelines.denied_types must not contain empty entries".to_string(),
            ));
        }
        Ok(())
    }
}
