//! Error types for the BLE radio

use bluelink_core::RadioError;
use thiserror::Error;

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Errors specific to the btleplug radio
#[derive(Error, Debug)]
pub enum BleRadioError {
    #[error("Failed to create BLE manager: {0}")]
    ManagerUnavailable(String),

    #[error("No BLE adapter at index {index} ({available} available)")]
    AdapterNotAvailable { index: usize, available: usize },

    #[error("Bluetooth permission denied")]
    PermissionDenied,

    #[error("Device {id} has not been discovered")]
    UnknownDevice { id: String },

    #[error("Unknown channel {channel}")]
    UnknownChannel { channel: u64 },

    #[error("Failed to connect: {0}")]
    ConnectionFailed(String),

    #[error("Service discovery timed out")]
    ServiceDiscoveryTimeout,

    #[error("Failed to discover services: {0}")]
    ServiceDiscoveryFailed(String),

    #[error("Characteristic not found: {characteristic}")]
    CharacteristicNotFound { characteristic: String },

    #[error("Failed to subscribe to notifications: {0}")]
    SubscriptionFailed(String),

    #[error("Failed to write to characteristic: {0}")]
    WriteFailed(String),

    #[error("Failed to get BLE events: {0}")]
    EventStreamFailed(String),

    #[error("Scan failed: {0}")]
    ScanFailed(String),

    #[error("Invalid BLE configuration: {0}")]
    InvalidConfiguration(String),
}

pub type BleResult<T> = Result<T, BleRadioError>;

impl BleRadioError {
    /// Classify a btleplug error raised while connecting
    pub fn from_connect(err: btleplug::Error) -> Self {
        match err {
            btleplug::Error::PermissionDenied => BleRadioError::PermissionDenied,
            btleplug::Error::DeviceNotFound => BleRadioError::UnknownDevice {
                id: "peripheral vanished".to_string(),
            },
            other => BleRadioError::ConnectionFailed(other.to_string()),
        }
    }
}

impl From<BleRadioError> for RadioError {
    fn from(err: BleRadioError) -> Self {
        match err {
            BleRadioError::ManagerUnavailable(_) | BleRadioError::AdapterNotAvailable { .. } => {
                RadioError::Unavailable
            }
            BleRadioError::PermissionDenied => RadioError::PermissionDenied,
            BleRadioError::UnknownDevice { id } => RadioError::Unreachable {
                reason: format!("{} has not been discovered", id),
            },
            BleRadioError::UnknownChannel { channel } => RadioError::UnknownChannel { channel },
            BleRadioError::ServiceDiscoveryTimeout => RadioError::TimedOut,
            err @ (BleRadioError::ConnectionFailed(_)
            | BleRadioError::ServiceDiscoveryFailed(_)
            | BleRadioError::CharacteristicNotFound { .. }
            | BleRadioError::SubscriptionFailed(_)) => RadioError::Rejected {
                reason: err.to_string(),
            },
            BleRadioError::WriteFailed(reason) => RadioError::WriteFailed { reason },
            err => RadioError::other(err.to_string()),
        }
    }
}
