//! YAML configuration for the `invman` binary.
//!
//! Instance settings that belong to the data (registration, session
//! lifetime) live in the database; this file only holds how the process
//! opens and talks to that database.
//!
//! # Example YAML
//!
//! ```yaml
//! database: /var/lib/invman/storage
//! table_prefix: invman_
//! busy_timeout_ms: 5000
//! page_size: 256
//! password:
//!   memory_kib: 19456
//!   iterations: 2
//!   parallelism: 1
//! log:
//!   level: warn
//!   format: compact
//! ```

use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "INVMAN_CONFIG";

/// Argon2 cost parameters used when hashing new passwords.
///
/// Existing hashes carry their own parameters, so changing these only
/// affects passwords set afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PasswordConfig {
    /// Memory cost in KiB.
    pub memory_kib: u32,
    /// Number of passes.
    pub iterations: u32,
    /// Degree of parallelism.
    pub parallelism: u32,
}

impl Default for PasswordConfig {
    fn default() -> Self {
        Self {
            memory_kib: 19_456,
            iterations: 2,
            parallelism: 1,
        }
    }
}

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Single-line human-readable output.
    #[default]
    Compact,
    /// Newline-delimited JSON.
    Json,
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter directive used when `RUST_LOG` is unset, e.g. `warn` or
    /// `invman_sqlite=debug`.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            format: LogFormat::Compact,
        }
    }
}

/// Top-level process configuration.
///
/// # Examples
///
/// ```
/// use invman_config::AppConfig;
///
/// let config: AppConfig = serde_yaml::from_str("page_size: 50").unwrap();
/// assert_eq!(config.page_size, 50);
/// assert_eq!(config.table_prefix, "invman_");
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Path of the SQLite database file.
    pub database: PathBuf,
    /// Prefix prepended to every table name.
    pub table_prefix: String,
    /// How long a writer waits for a competing lock before giving up.
    pub busy_timeout_ms: u64,
    /// Rows fetched per page by lazy listings.
    pub page_size: u32,
    pub password: PasswordConfig,
    pub log: LogConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: PathBuf::from("./storage"),
            table_prefix: "invman_".to_string(),
            busy_timeout_ms: 5_000,
            page_size: 256,
            password: PasswordConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl AppConfig {
    /// Loads configuration from a YAML file and validates it.
    ///
    /// # Errors
    ///
    /// Returns [`IoError`](crate::ConfigError::IoError) if the file cannot
    /// be read, [`YamlError`](crate::ConfigError::YamlError) if parsing
    /// fails, or [`Invalid`](crate::ConfigError::Invalid) if a value is out
    /// of range.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let reader = BufReader::new(file);
        let config: Self = serde_yaml::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }

    /// Saves the configuration as YAML.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = std::fs::File::create(path)?;
        let writer = BufWriter::new(file);
        serde_yaml::to_writer(writer, self)?;
        Ok(())
    }

    /// Resolves the configuration: `explicit` if given, else the file named
    /// by `INVMAN_CONFIG`, else the defaults.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        match std::env::var_os(CONFIG_ENV) {
            Some(path) if !path.is_empty() => Self::load(PathBuf::from(path)),
            _ => Ok(Self::default()),
        }
    }

    /// Checks value ranges.
    pub fn validate(&self) -> Result<()> {
        let prefix_ok = !self.table_prefix.is_empty()
            && self
                .table_prefix
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !prefix_ok {
            return Err(ConfigError::Invalid(format!(
                "table_prefix '{}' must be non-empty and use only letters, digits and underscores",
                self.table_prefix
            )));
        }
        if self.page_size == 0 {
            return Err(ConfigError::Invalid("page_size must be greater than 0".into()));
        }
        if self.password.iterations == 0 || self.password.parallelism == 0 {
            return Err(ConfigError::Invalid(
                "password iterations and parallelism must be greater than 0".into(),
            ));
        }
        if self.database.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("database path is empty".into()));
        }
        Ok(())
    }
}
