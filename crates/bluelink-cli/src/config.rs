//! Bluelink CLI configuration
//!
//! One TOML file holds every layer's settings:
//!
//! ```toml
//! [session]
//! connect_timeout_ms = 15000
//!
//! [ble]
//! name_prefix = "Sensor"
//!
//! [simulation]
//! echo = true
//!
//! [cli]
//! prompt = "bluelink> "
//! ```
//!
//! Settings are layered, later layers winning: built-in defaults, the TOML file
//! (`--config`, or `<config dir>/bluelink/config.toml`), then `BLUELINK_` environment
//! variables with `__` between section and key, e.g.
//! `BLUELINK_SESSION__CONNECT_TIMEOUT_MS=3000`.

use std::path::{Path, PathBuf};

use anyhow::Context;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use bluelink_ble::BleRadioConfig;
use bluelink_core::SessionConfig;
use bluelink_runtime::SimulationConfig;

use crate::error::{CliError, Result};

// ----------------------------------------------------------------------------
// CLI Application Configuration
// ----------------------------------------------------------------------------

/// Complete configuration for the CLI application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub session: SessionConfig,
    pub ble: BleRadioConfig,
    /// Scripted radio used with `--simulated`
    pub simulation: SimulationConfig,
    pub cli: CliConfig,
}

/// Terminal front-end settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub prompt: String,
    /// Use the simulated radio even without `--simulated`
    pub simulated: bool,
    /// Prefix chat lines with the message timestamp
    pub show_timestamps: bool,
    /// Transitions shown by `status`
    pub audit_entries: usize,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            prompt: "bluelink> ".to_string(),
            simulated: false,
            show_timestamps: false,
            audit_entries: 10,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            ble: BleRadioConfig::default(),
            simulation: SimulationConfig::demo(),
            cli: CliConfig::default(),
        }
    }
}

// ----------------------------------------------------------------------------
// Loading and Saving
// ----------------------------------------------------------------------------

/// Environment variables overriding file settings start with this prefix
pub const ENV_PREFIX: &str = "BLUELINK_";

impl AppConfig {
    /// Default config file location, if the platform has a config directory
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("bluelink").join("config.toml"))
    }

    /// Load defaults, the config file and the environment
    ///
    /// `path` replaces the default config location. A missing file is not an error;
    /// its layer is simply empty.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = path.map(Path::to_path_buf).or_else(Self::default_config_path);
        let mut figment = Figment::new().merge(Serialized::defaults(Self::default()));
        if let Some(file) = file {
            figment = figment.merge(Toml::file(file));
        }
        Self::extract(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    /// Load defaults overlaid with one config file, ignoring the environment
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::extract(
            Figment::new()
                .merge(Serialized::defaults(Self::default()))
                .merge(Toml::file(path.as_ref())),
        )
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Self::extract(
            Figment::new()
                .merge(Serialized::defaults(Self::default()))
                .merge(Toml::string(text)),
        )
    }

    fn extract(figment: Figment) -> Result<Self> {
        let config: AppConfig = figment
            .extract()
            .map_err(|e| CliError::Loading(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Write the configuration, creating parent directories
    pub fn save_to_file(&self, path: impl AsRef<Path>, overwrite: bool) -> Result<()> {
        let path = path.as_ref();
        if path.exists() && !overwrite {
            return Err(CliError::ConfigExists(path.display().to_string()));
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_toml()?)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.session.validate()?;
        self.ble.validate()?;
        if self.cli.prompt.trim().is_empty() {
            return Err(CliError::Config("cli.prompt must not be empty".to_string()));
        }
        Ok(())
    }
}
