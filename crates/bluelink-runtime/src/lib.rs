//! Bluelink Runtime
//!
//! The asynchronous half of the session layer:
//! - `SessionStore`: cloneable handle UI code uses for every operation
//! - `SessionBuilder`: wires a radio capability to a freshly spawned session task
//! - `ConnectionManager`: orchestrates the connection state machine
//! - `SimulatedRadio`: scripted capability for tests and adapter-less machines
//!
//! `bluelink-core` holds the synchronous building blocks this crate drives.

pub mod builder;
pub mod logic;
pub mod managers;
pub mod simulated;
pub mod store;

pub use builder::SessionBuilder;
pub use logic::RadioReadiness;
pub use managers::*;
pub use simulated::{
    ConnectBehavior, RadioLog, SimulatedDevice, SimulatedRadio, SimulationConfig, WriteBehavior,
};
pub use store::SessionStore;

// Re-export core types for convenience
pub use bluelink_core::{
    AuditEntry, ChannelHandle, ConnectionStatus, DeliveryStatus, Device, DeviceId, Diagnostics,
    Direction, FailureReason, Message, MessageId, RadioCapability, RadioError, RawDiscovery,
    SessionConfig, SessionError, SessionEvent, SessionResult,
};
