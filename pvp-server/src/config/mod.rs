//! Configuration module for pvp-server.
//!
//! Loads the TOML file configuration; the database URL comes from the
//! environment so credentials stay out of the config file.

pub mod file;

pub use file::FileConfig;

use std::path::Path;
use thiserror::Error;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("DATABASE_URL environment variable not set")]
    MissingDatabaseUrl,
}

/// Load and parse the configuration file.
pub fn load_config(path: impl AsRef<Path>) -> Result<FileConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&contents)?)
}

/// Get the database URL from the environment.
pub fn get_database_url() -> Result<String, ConfigError> {
    std::env::var("DATABASE_URL").map_err(|_| ConfigError::MissingDatabaseUrl)
}
