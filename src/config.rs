//! Top-level configuration, loaded from RON or TOML.

use std::path::{Path, PathBuf};

use courier_delivery::{Dsn, DsnError, TransportConfig};
use courier_spool::SpoolConfig;
use serde::Deserialize;
use thiserror::Error;

/// Environment variable naming the configuration file
pub const CONFIG_VAR: &str = "COURIER_CONFIG";

const DEFAULT_PATHS: [&str; 2] = ["./courier.config.ron", "/etc/courier/courier.config.ron"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config from {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid RON config: {0}")]
    Ron(#[from] ron::error::SpannedError),

    #[error("Invalid TOML config: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Unsupported config format for {0} (expected .ron or .toml)")]
    UnsupportedFormat(PathBuf),

    #[error("No configuration file found, tried: {0}")]
    NotFound(String),

    #[error("{CONFIG_VAR} points to non-existent file: {0}")]
    MissingFile(PathBuf),
}

/// ```ron
/// (
///     dsn: Some("https://key@o1.ingest.example.com/42"),
///     transport: (send_client_reports: false),
/// )
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CourierConfig {
    /// Where envelopes are delivered. Without one nothing can be sent.
    #[serde(default)]
    pub dsn: Option<String>,

    #[serde(default)]
    pub spool: SpoolConfig,

    #[serde(default)]
    pub transport: TransportConfig,
}

impl CourierConfig {
    /// Load a configuration file, picking the format from its extension.
    ///
    /// # Errors
    /// If the file cannot be read, has an unknown extension or fails to parse
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        let parse: fn(&str) -> Result<Self, ConfigError> =
            match path.extension().and_then(|ext| ext.to_str()) {
                Some("ron") => Self::from_ron,
                Some("toml") => Self::from_toml,
                _ => return Err(ConfigError::UnsupportedFormat(path.to_path_buf())),
            };

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        parse(&content)
    }

    /// # Errors
    /// If `content` is not a valid RON configuration
    pub fn from_ron(content: &str) -> Result<Self, ConfigError> {
        Ok(ron::from_str(content)?)
    }

    /// # Errors
    /// If `content` is not a valid TOML configuration
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Parse the configured DSN, if there is one.
    ///
    /// # Errors
    /// If the DSN is present but malformed
    pub fn dsn(&self) -> Result<Option<Dsn>, DsnError> {
        self.dsn.as_deref().map(str::parse).transpose()
    }
}

/// Find the configuration file using the following precedence:
/// 1. `COURIER_CONFIG` environment variable
/// 2. ./courier.config.ron (current working directory)
/// 3. /etc/courier/courier.config.ron (system-wide config)
///
/// # Errors
/// If `COURIER_CONFIG` names a missing file, or none of the defaults exist
pub fn find_config_file() -> Result<PathBuf, ConfigError> {
    if let Ok(env_path) = std::env::var(CONFIG_VAR) {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        }
        return Err(ConfigError::MissingFile(path));
    }

    DEFAULT_PATHS
        .iter()
        .map(PathBuf::from)
        .find(|path| path.exists())
        .ok_or_else(|| {
            ConfigError::NotFound(format!("{CONFIG_VAR}, {}", DEFAULT_PATHS.join(", ")))
        })
}
