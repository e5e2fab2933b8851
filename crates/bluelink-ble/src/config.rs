//! BLE radio configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::BleRadioError;
use crate::protocol::{DEFAULT_WRITE_CHUNK, MAX_ATT_PAYLOAD};

// ----------------------------------------------------------------------------
// Configuration
// ----------------------------------------------------------------------------

/// Configuration for the btleplug-backed radio
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BleRadioConfig {
    /// Index into the adapters reported by the platform manager
    pub adapter_index: usize,
    /// Only report peripherals advertising the UART service
    pub filter_by_service: bool,
    /// Only report peripherals whose advertised name starts with this prefix
    pub name_prefix: Option<String>,
    /// Largest payload handed to a single characteristic write
    pub write_chunk_size: usize,
    /// Ask the peripheral to acknowledge every chunk
    pub write_with_response: bool,
    /// Upper bound on GATT service discovery after a link is up
    pub service_discovery_timeout_ms: u64,
}

impl Default for BleRadioConfig {
    fn default() -> Self {
        Self {
            adapter_index: 0,
            filter_by_service: false,
            name_prefix: None,
            write_chunk_size: DEFAULT_WRITE_CHUNK,
            write_with_response: true,
            service_discovery_timeout_ms: 5_000,
        }
    }
}

impl BleRadioConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn service_discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.service_discovery_timeout_ms)
    }

    pub fn with_adapter_index(mut self, index: usize) -> Self {
        self.adapter_index = index;
        self
    }

    /// Restrict scans to peripherals advertising the UART service
    pub fn with_service_filter(mut self, enabled: bool) -> Self {
        self.filter_by_service = enabled;
        self
    }

    pub fn with_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_prefix = Some(prefix.into());
        self
    }

    pub fn with_write_chunk_size(mut self, size: usize) -> Self {
        self.write_chunk_size = size;
        self
    }

    pub fn with_write_with_response(mut self, enabled: bool) -> Self {
        self.write_with_response = enabled;
        self
    }

    pub fn with_service_discovery_timeout(mut self, timeout: Duration) -> Self {
        self.service_discovery_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn validate(&self) -> Result<(), BleRadioError> {
        if self.write_chunk_size == 0 || self.write_chunk_size > MAX_ATT_PAYLOAD {
            return Err(BleRadioError::InvalidConfiguration(format!(
                "write_chunk_size must be between 1 and {}",
                MAX_ATT_PAYLOAD
            )));
        }
        if self.service_discovery_timeout_ms == 0 {
            return Err(BleRadioError::InvalidConfiguration(
                "service_discovery_timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = BleRadioConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.write_chunk_size, DEFAULT_WRITE_CHUNK);
        assert!(config.name_prefix.is_none());
    }

    #[test]
    fn test_chunk_size_bounds() {
        let zero = BleRadioConfig::new().with_write_chunk_size(0);
        assert!(zero.validate().is_err());

        let oversized = BleRadioConfig::new().with_write_chunk_size(MAX_ATT_PAYLOAD + 1);
        assert!(oversized.validate().is_err());

        let largest = BleRadioConfig::new().with_write_chunk_size(MAX_ATT_PAYLOAD);
        assert!(largest.validate().is_ok());
    }

    #[test]
    fn test_setters() {
        let config = BleRadioConfig::new()
            .with_name_prefix("Sensor")
            .with_service_filter(true)
            .with_service_discovery_timeout(Duration::from_secs(2));
        assert_eq!(config.name_prefix.as_deref(), Some("Sensor"));
        assert!(config.filter_by_service);
        assert_eq!(config.service_discovery_timeout(), Duration::from_secs(2));
    }
}
