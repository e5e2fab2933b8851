//! Error handling for the Bluelink CLI

use bluelink_core::{ConfigError, SessionError};
use thiserror::Error;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No device matches {query:?}")]
    DeviceNotFound { query: String },

    #[error("Config file already exists at {0} (use --force to overwrite)")]
    ConfigExists(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Failed to load configuration: {0}")]
    Loading(String),

    #[error("TOML writing error: {0}")]
    TomlWriting(#[from] toml::ser::Error),
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        CliError::Config(err.to_string())
    }
}

impl From<bluelink_ble::BleRadioError> for CliError {
    fn from(err: bluelink_ble::BleRadioError) -> Self {
        CliError::Config(err.to_string())
    }
}

impl From<anyhow::Error> for CliError {
    fn from(err: anyhow::Error) -> Self {
        CliError::Config(err.to_string())
    }
}
