//! Session configuration
//!
//! All timing values are stored in milliseconds so the struct round-trips cleanly
//! through TOML; use the accessor methods to get `Duration`s.

use core::time::Duration;
use serde::{Deserialize, Serialize};

/// Maximum characters in a single message body, matching the chat input cap
pub const DEFAULT_MAX_MESSAGE_CHARS: usize = 500;

// ----------------------------------------------------------------------------
// Session Configuration
// ----------------------------------------------------------------------------

/// Configuration for the session store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How long a connect attempt may take before it fails with `Timeout`
    pub connect_timeout_ms: u64,
    /// Upper bound on draining in-flight writes during a disconnect
    pub drain_grace_ms: u64,
    /// How long a scan runs before it is stopped automatically
    pub scan_duration_ms: u64,
    /// Maximum characters per message body
    pub max_message_chars: usize,
    /// Clear the device list whenever a new scan starts
    pub clear_devices_on_scan: bool,
    /// Accepted for compatibility with the settings surface; has no effect
    pub auto_connect: bool,
    /// Buffer size of the command channel
    pub command_buffer_size: usize,
    /// Buffer size of the session event broadcast channel
    pub event_buffer_size: usize,
    /// Number of transitions kept in the connection audit trail
    pub audit_trail_len: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 15_000,
            drain_grace_ms: 2_000,
            scan_duration_ms: 10_000,
            max_message_chars: DEFAULT_MAX_MESSAGE_CHARS,
            clear_devices_on_scan: false,
            auto_connect: false,
            command_buffer_size: 64,
            event_buffer_size: 256,
            audit_trail_len: 256,
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Short timeouts suitable for tests against a simulated radio
    pub fn testing() -> Self {
        Self {
            connect_timeout_ms: 500,
            drain_grace_ms: 100,
            scan_duration_ms: 200,
            ..Self::default()
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn drain_grace(&self) -> Duration {
        Duration::from_millis(self.drain_grace_ms)
    }

    pub fn scan_duration(&self) -> Duration {
        Duration::from_millis(self.scan_duration_ms)
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_drain_grace(mut self, grace: Duration) -> Self {
        self.drain_grace_ms = grace.as_millis() as u64;
        self
    }

    pub fn with_scan_duration(mut self, duration: Duration) -> Self {
        self.scan_duration_ms = duration.as_millis() as u64;
        self
    }

    pub fn with_max_message_chars(mut self, max: usize) -> Self {
        self.max_message_chars = max;
        self
    }

    pub fn with_clear_devices_on_scan(mut self, enabled: bool) -> Self {
        self.clear_devices_on_scan = enabled;
        self
    }

    /// Check values that would make the store unusable
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "connect_timeout_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.max_message_chars == 0 {
            return Err(ConfigError::Invalid {
                field: "max_message_chars",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.command_buffer_size == 0 || self.event_buffer_size == 0 {
            return Err(ConfigError::Invalid {
                field: "buffer sizes",
                reason: "channel buffers must hold at least one item".to_string(),
            });
        }
        Ok(())
    }
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}
