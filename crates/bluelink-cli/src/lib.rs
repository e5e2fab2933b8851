//! Bluelink CLI library
//!
//! Components behind the `bluelink` binary: argument parsing, TOML configuration,
//! radio selection and the scan/chat/status command handlers.

pub mod app;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;

pub use app::{BluelinkApp, StatusReport, Transcript};
pub use cli::{Cli, Commands};
pub use config::{AppConfig, CliConfig};
pub use error::{CliError, Result};
