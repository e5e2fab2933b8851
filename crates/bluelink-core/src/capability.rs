//! Radio capability interface
//!
//! The session layer never touches platform Bluetooth APIs directly. A capability
//! implementation performs the radio primitives and pushes asynchronous radio events
//! (discoveries, inbound data, unsolicited disconnects) into the sender it is attached
//! to. Which implementation is used is decided once at startup.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::errors::RadioResult;
use crate::types::{ChannelHandle, DeviceId, RawDiscovery};

// ----------------------------------------------------------------------------
// Radio Events
// ----------------------------------------------------------------------------

/// Asynchronous notifications from the radio
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioEvent {
    /// A scan observed a device
    Discovered(RawDiscovery),
    /// Inbound data on an established channel
    Received {
        channel: ChannelHandle,
        bytes: Vec<u8>,
    },
    /// The remote side or the radio dropped the channel
    LinkLost { channel: ChannelHandle },
}

pub type RadioEventSender = mpsc::UnboundedSender<RadioEvent>;
pub type RadioEventReceiver = mpsc::UnboundedReceiver<RadioEvent>;

pub fn create_radio_event_channel() -> (RadioEventSender, RadioEventReceiver) {
    mpsc::unbounded_channel()
}

// ----------------------------------------------------------------------------
// Capability Trait
// ----------------------------------------------------------------------------

/// Platform radio primitives consumed by the session layer
#[async_trait]
pub trait RadioCapability: Send + Sync + 'static {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Route radio events into `events`; called once before any other operation
    fn attach(&self, events: RadioEventSender);

    async fn query_availability(&self) -> bool;

    async fn query_permission(&self) -> bool;

    /// Start reporting `RadioEvent::Discovered`
    async fn scan_start(&self) -> RadioResult<()>;

    async fn scan_stop(&self) -> RadioResult<()>;

    /// Establish a link; inbound data and link loss for the returned channel are
    /// reported as radio events from then on
    async fn connect(&self, device: &DeviceId) -> RadioResult<ChannelHandle>;

    async fn disconnect(&self, channel: ChannelHandle) -> RadioResult<()>;

    /// Write one payload; resolves when the radio acknowledged it
    async fn write(&self, channel: ChannelHandle, bytes: Vec<u8>) -> RadioResult<()>;
}
