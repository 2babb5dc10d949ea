//! Process configuration for the invman inventory tracker.
//!
//! Configuration is a YAML file resolved from an explicit path, the
//! `INVMAN_CONFIG` environment variable, or built-in defaults. Every field
//! is optional in the file.
//!
//! # Quick start
//!
//! ```no_run
//! use invman_config::AppConfig;
//!
//! let config = AppConfig::resolve(None).unwrap();
//! println!("database at {}", config.database.display());
//! ```

mod config;
mod error;

pub use config::{AppConfig, CONFIG_ENV, LogConfig, LogFormat, PasswordConfig};
pub use error::{ConfigError, Result};
