//! Core types for the Bluelink session layer
//!
//! Newtypes keep identifiers, handles and timestamps from being mixed up at the
//! capability boundary.

use core::fmt;
use core::ops::{Add, Sub};
use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::errors::SessionError;

// ----------------------------------------------------------------------------
// Device Identifier
// ----------------------------------------------------------------------------

/// Stable identifier of a remote device (radio address or platform handle)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeviceId(String);

impl DeviceId {
    /// Create a device id, rejecting blank input
    pub fn new(id: impl Into<String>) -> Option<Self> {
        let id = id.into();
        let trimmed = id.trim();
        if trimmed.is_empty() {
            None
        } else if trimmed.len() == id.len() {
            Some(Self(id))
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for DeviceId {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DeviceId::new(s).ok_or_else(|| SessionError::InvalidDeviceId {
            value: s.to_string(),
        })
    }
}

// ----------------------------------------------------------------------------
// Timestamp
// ----------------------------------------------------------------------------

/// Milliseconds since the Unix epoch
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Timestamp(u64);

impl Add<u64> for Timestamp {
    type Output = Timestamp;

    fn add(self, other: u64) -> Timestamp {
        Timestamp(self.0.saturating_add(other))
    }
}

impl Sub for Timestamp {
    type Output = u64;

    fn sub(self, other: Timestamp) -> u64 {
        self.0.saturating_sub(other.0)
    }
}

impl Timestamp {
    pub fn new(millis: u64) -> Self {
        Self(millis)
    }

    /// Current wall-clock time
    pub fn now() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self(duration.as_millis() as u64)
    }

    pub fn as_millis(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// Source of timestamps, swappable in tests
pub trait TimeSource: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Wall-clock time source
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

// ----------------------------------------------------------------------------
// Devices
// ----------------------------------------------------------------------------

/// Discovery record as produced by a capability scan
///
/// Records without a usable `id` are malformed and never reach the device list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawDiscovery {
    pub id: Option<String>,
    pub name: Option<String>,
    pub rssi: i16,
}

impl RawDiscovery {
    pub fn new(id: impl Into<String>, name: Option<String>, rssi: i16) -> Self {
        Self {
            id: Some(id.into()),
            name,
            rssi,
        }
    }
}

/// A device known to the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub name: Option<String>,
    /// Last observed signal strength in dBm
    pub rssi: i16,
    pub discovered_at: Timestamp,
    pub last_seen_at: Timestamp,
}

impl Device {
    /// Device record for an id that was never seen in a scan
    pub fn unseen(id: DeviceId, now: Timestamp) -> Self {
        Self {
            id,
            name: None,
            rssi: i16::MIN,
            discovered_at: now,
            last_seen_at: now,
        }
    }

    /// Name for display, falling back to the id
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(self.id.as_str())
    }
}

// ----------------------------------------------------------------------------
// Channel Handle
// ----------------------------------------------------------------------------

/// Opaque handle for one established link, issued by the capability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelHandle(u64);

impl ChannelHandle {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ChannelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch#{}", self.0)
    }
}

// ----------------------------------------------------------------------------
// Messages
// ----------------------------------------------------------------------------

/// Sequence number of a message; ordering key and list key
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct MessageId(u64);

impl MessageId {
    pub fn new(seq: u64) -> Self {
        Self(seq)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Outgoing,
    Incoming,
}

/// Delivery state of an outgoing message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Failed,
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// One chat message in the session history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub direction: Direction,
    pub body: String,
    pub timestamp: Timestamp,
    /// Always `None` for incoming messages
    pub delivery_status: Option<DeliveryStatus>,
}

impl Message {
    pub fn outgoing(id: MessageId, body: String, timestamp: Timestamp) -> Self {
        Self {
            id,
            direction: Direction::Outgoing,
            body,
            timestamp,
            delivery_status: Some(DeliveryStatus::Pending),
        }
    }

    pub fn incoming(id: MessageId, body: String, timestamp: Timestamp) -> Self {
        Self {
            id,
            direction: Direction::Incoming,
            body,
            timestamp,
            delivery_status: None,
        }
    }

    pub fn is_outgoing(&self) -> bool {
        self.direction == Direction::Outgoing
    }
}
