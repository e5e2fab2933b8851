//! Bluelink Core
//!
//! Domain types and the synchronous building blocks of the Bluetooth session layer:
//!
//! - [`registry`] - deduplicated, ranked device list
//! - [`connection_state`] - linear connection state machine with effects and audit entries
//! - [`channel`] - outgoing validation, inbound decoding, ordered message history
//! - [`capability`] - the radio capability trait and radio events
//! - [`config`], [`errors`], [`events`], [`types`]
//!
//! Nothing in this crate performs I/O. The asynchronous actor that drives these pieces
//! lives in `bluelink-runtime`.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod capability;
pub mod channel;
pub mod config;
pub mod connection_state;
pub mod errors;
pub mod events;
pub mod registry;
pub mod types;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use capability::{
    create_radio_event_channel, RadioCapability, RadioEvent, RadioEventReceiver,
    RadioEventSender,
};
pub use channel::{ChannelStats, MessageChannel, OutgoingFrame};
pub use config::{ConfigError, SessionConfig, DEFAULT_MAX_MESSAGE_CHARS};
pub use connection_state::{
    AttemptId, AuditEntry, ConnectionEffect, ConnectionEvent, ConnectionState,
    ConnectionStatus, StateTransition,
};
pub use errors::{
    FailureReason, RadioError, RadioResult, SessionError, SessionResult, TransitionError,
};
pub use events::{Diagnostics, SessionEvent};
pub use registry::{DeviceRegistry, RegistryStats};
pub use types::{
    ChannelHandle, DeliveryStatus, Device, DeviceId, Direction, Message, MessageId,
    RawDiscovery, SystemTimeSource, TimeSource, Timestamp,
};
