//! Session events and diagnostics published to UI code

use serde::{Deserialize, Serialize};

use crate::connection_state::ConnectionStatus;
use crate::errors::FailureReason;
use crate::types::{DeliveryStatus, Device, Message, MessageId};

/// Notifications for reactive consumers of the session store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionEvent {
    StatusChanged(ConnectionStatus),
    DeviceDiscovered(Device),
    DevicesCleared,
    MessageAppended(Message),
    DeliveryUpdated {
        id: MessageId,
        status: DeliveryStatus,
    },
    ConnectFailed {
        device: Device,
        reason: FailureReason,
    },
    /// A locally requested disconnect finished
    Disconnected { device: Device },
    /// The link dropped without being asked to
    LinkLost { device: Device },
    ScanStarted,
    ScanStopped,
}

/// Snapshot of counters across the session components
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostics {
    pub devices_known: usize,
    pub discoveries_applied: u64,
    pub malformed_discoveries: u64,
    pub state_transitions: u64,
    pub messages_sent: u64,
    pub messages_failed: u64,
    pub messages_received: u64,
    pub inbound_dropped: u64,
    pub stale_completions: u64,
    pub scanning: bool,
}
