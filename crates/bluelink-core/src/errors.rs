//! Error types for the Bluelink session layer
//!
//! `SessionError` is what callers of the session surface see. `RadioError` is what a
//! capability implementation reports; connect failures are classified into a
//! `FailureReason` before they reach the connection state machine.

use core::fmt;
use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::types::{DeviceId, MessageId};

// ----------------------------------------------------------------------------
// Connection Failure Reasons
// ----------------------------------------------------------------------------

/// Why a connection attempt ended in `Failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureReason {
    Timeout,
    RadioRejected,
    PermissionDenied,
    DeviceUnreachable,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FailureReason::Timeout => "timed out",
            FailureReason::RadioRejected => "rejected by radio",
            FailureReason::PermissionDenied => "permission denied",
            FailureReason::DeviceUnreachable => "device unreachable",
        };
        f.write_str(label)
    }
}

// ----------------------------------------------------------------------------
// Capability Errors
// ----------------------------------------------------------------------------

/// Errors reported by a radio capability
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RadioError {
    #[error("Bluetooth radio is not available")]
    Unavailable,
    #[error("Bluetooth permission denied")]
    PermissionDenied,
    #[error("Connection rejected: {reason}")]
    Rejected { reason: String },
    #[error("Device unreachable: {reason}")]
    Unreachable { reason: String },
    #[error("Operation timed out")]
    TimedOut,
    #[error("Unknown channel {channel}")]
    UnknownChannel { channel: u64 },
    #[error("Write failed: {reason}")]
    WriteFailed { reason: String },
    #[error("Radio error: {reason}")]
    Other { reason: String },
}

impl RadioError {
    pub fn other(reason: impl Into<String>) -> Self {
        RadioError::Other {
            reason: reason.into(),
        }
    }

    /// Classify a failed connect into the reason recorded on the state machine
    pub fn failure_reason(&self) -> FailureReason {
        match self {
            RadioError::PermissionDenied => FailureReason::PermissionDenied,
            RadioError::TimedOut => FailureReason::Timeout,
            RadioError::Unreachable { .. } | RadioError::UnknownChannel { .. } => {
                FailureReason::DeviceUnreachable
            }
            RadioError::Unavailable
            | RadioError::Rejected { .. }
            | RadioError::WriteFailed { .. }
            | RadioError::Other { .. } => FailureReason::RadioRejected,
        }
    }
}

// ----------------------------------------------------------------------------
// Session Errors
// ----------------------------------------------------------------------------

/// Errors surfaced to users of the session store
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("Bluetooth permission has not been granted")]
    PermissionDenied,
    #[error("Bluetooth radio is unavailable")]
    RadioUnavailable,
    #[error("Connection to {device} timed out")]
    ConnectTimeout { device: DeviceId },
    #[error("Connection to {device} was rejected")]
    ConnectRejected { device: DeviceId },
    #[error("Device {device} is unreachable")]
    DeviceUnreachable { device: DeviceId },
    #[error("Connection attempt to {device} was cancelled")]
    ConnectCancelled { device: DeviceId },
    #[error("No device is connected")]
    NotConnected,
    #[error("Message too long: {len} characters (max: {max})")]
    MessageTooLong { len: usize, max: usize },
    #[error("Message {message_id} could not be transmitted: {reason}")]
    TransmitFailed { message_id: MessageId, reason: String },
    #[error("Invalid device id: {value:?}")]
    InvalidDeviceId { value: String },
    #[error("Session store is shut down")]
    SessionClosed,
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Radio error: {0}")]
    Radio(#[from] RadioError),
}

impl SessionError {
    /// Error returned to callers of a connect attempt that ended in `Failed`
    pub fn from_failure(device: DeviceId, reason: FailureReason) -> Self {
        match reason {
            FailureReason::Timeout => SessionError::ConnectTimeout { device },
            FailureReason::RadioRejected => SessionError::ConnectRejected { device },
            FailureReason::PermissionDenied => SessionError::PermissionDenied,
            FailureReason::DeviceUnreachable => SessionError::DeviceUnreachable { device },
        }
    }

    /// Whether retrying without external user action can succeed
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            SessionError::PermissionDenied
                | SessionError::RadioUnavailable
                | SessionError::MessageTooLong { .. }
                | SessionError::InvalidDeviceId { .. }
                | SessionError::SessionClosed
                | SessionError::Config(_)
        )
    }
}

// ----------------------------------------------------------------------------
// State Machine Errors
// ----------------------------------------------------------------------------

/// Input the connection state machine cannot apply in its current state
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid transition from {from} on {event}")]
pub struct TransitionError {
    pub from: &'static str,
    pub event: String,
}

pub type SessionResult<T> = Result<T, SessionError>;
pub type RadioResult<T> = Result<T, RadioError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> DeviceId {
        DeviceId::new("A").unwrap()
    }

    #[test]
    fn test_radio_error_classification() {
        assert_eq!(
            RadioError::PermissionDenied.failure_reason(),
            FailureReason::PermissionDenied
        );
        assert_eq!(RadioError::TimedOut.failure_reason(), FailureReason::Timeout);
        assert_eq!(
            RadioError::Unreachable {
                reason: "gone".into()
            }
            .failure_reason(),
            FailureReason::DeviceUnreachable
        );
        assert_eq!(
            RadioError::other("boom").failure_reason(),
            FailureReason::RadioRejected
        );
    }

    #[test]
    fn test_session_error_from_failure() {
        assert_eq!(
            SessionError::from_failure(device(), FailureReason::Timeout),
            SessionError::ConnectTimeout { device: device() }
        );
        assert_eq!(
            SessionError::from_failure(device(), FailureReason::PermissionDenied),
            SessionError::PermissionDenied
        );
    }

    #[test]
    fn test_retryable_classification() {
        assert!(!SessionError::PermissionDenied.is_retryable());
        assert!(!SessionError::RadioUnavailable.is_retryable());
        assert!(SessionError::ConnectTimeout { device: device() }.is_retryable());
        assert!(SessionError::NotConnected.is_retryable());
    }
}
