//! Linear Connection State Machine
//!
//! The state is consumed by `transition` and replaced by the returned state, so an
//! invalid combination cannot be half-applied. Each transition also yields the effects
//! the runtime must execute and an audit entry.
//!
//! The machine knows a single link. Completions carry the attempt generation they belong
//! to; completions of superseded attempts leave the state untouched.

use core::fmt;
use serde::{Deserialize, Serialize};

use crate::errors::{FailureReason, TransitionError};
use crate::types::{ChannelHandle, Device, DeviceId, Timestamp};

// ----------------------------------------------------------------------------
// Connection State Types
// ----------------------------------------------------------------------------

/// Generation number of a connect attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AttemptId(u64);

impl AttemptId {
    pub fn new(generation: u64) -> Self {
        Self(generation)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "attempt#{}", self.0)
    }
}

/// The one active connection state
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting(ConnectingState),
    Connected(ConnectedState),
    Disconnecting(DisconnectingState),
    Failed(FailedState),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectingState {
    pub device: Device,
    pub attempt: AttemptId,
    pub started_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectedState {
    pub device: Device,
    pub channel: ChannelHandle,
    pub connected_since: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectingState {
    pub device: Device,
    /// `None` when an attempt was cancelled before a channel existed
    pub channel: Option<ChannelHandle>,
    pub requested_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedState {
    pub device: Device,
    pub reason: FailureReason,
    pub failed_at: Timestamp,
}

/// Projection of the state handed to UI code; carries no channel handle
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConnectionStatus {
    #[default]
    Idle,
    Connecting { device: Device },
    Connected { device: Device },
    Disconnecting { device: Device },
    Failed { device: Device, reason: FailureReason },
}

impl ConnectionStatus {
    pub fn device(&self) -> Option<&Device> {
        match self {
            ConnectionStatus::Idle => None,
            ConnectionStatus::Connecting { device }
            | ConnectionStatus::Connected { device }
            | ConnectionStatus::Disconnecting { device }
            | ConnectionStatus::Failed { device, .. } => Some(device),
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionStatus::Connected { .. })
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, ConnectionStatus::Idle)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Idle => write!(f, "idle"),
            ConnectionStatus::Connecting { device } => {
                write!(f, "connecting to {}", device.display_name())
            }
            ConnectionStatus::Connected { device } => {
                write!(f, "connected to {}", device.display_name())
            }
            ConnectionStatus::Disconnecting { device } => {
                write!(f, "disconnecting from {}", device.display_name())
            }
            ConnectionStatus::Failed { device, reason } => {
                write!(f, "connection to {} failed: {}", device.display_name(), reason)
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Events and Effects
// ----------------------------------------------------------------------------

/// Inputs that drive the state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Start (or join) a connect attempt to `device`
    Connect { device: Device, attempt: AttemptId },
    ConnectSucceeded {
        attempt: AttemptId,
        channel: ChannelHandle,
    },
    ConnectFailed {
        attempt: AttemptId,
        reason: FailureReason,
    },
    /// Locally requested disconnect
    Disconnect,
    /// The capability finished tearing the link down
    TeardownComplete,
    /// The capability reported an unsolicited disconnect
    LinkLost { channel: ChannelHandle },
    /// A failure has been surfaced to the caller
    FailureReported,
}

impl ConnectionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ConnectionEvent::Connect { .. } => "Connect",
            ConnectionEvent::ConnectSucceeded { .. } => "ConnectSucceeded",
            ConnectionEvent::ConnectFailed { .. } => "ConnectFailed",
            ConnectionEvent::Disconnect => "Disconnect",
            ConnectionEvent::TeardownComplete => "TeardownComplete",
            ConnectionEvent::LinkLost { .. } => "LinkLost",
            ConnectionEvent::FailureReported => "FailureReported",
        }
    }
}

/// Work the runtime performs as a consequence of a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEffect {
    /// Invoke the capability connect primitive under the connect timeout
    BeginConnect { device: Device, attempt: AttemptId },
    /// Abort an in-flight connect attempt
    CancelConnect { device: DeviceId, attempt: AttemptId },
    /// A queued connect was replaced or withdrawn before it started
    ConnectAbandoned { device: DeviceId },
    /// Drain pending writes, then disconnect the channel
    BeginTeardown { device: DeviceId, channel: ChannelHandle },
    /// A channel from a superseded attempt must be disconnected in the background
    ReleaseChannel { channel: ChannelHandle },
    /// The message channel opens on the new link
    OpenSession { device: Device, channel: ChannelHandle },
    /// The message channel is reset
    CloseSession,
    ConnectFailed { device: Device, reason: FailureReason },
    Disconnected { device: Device },
    LinkLost { device: Device },
    /// The observable status changed
    StatusChanged(ConnectionStatus),
}

/// Result of a state transition
#[derive(Debug, Clone)]
pub struct StateTransition {
    pub new_state: ConnectionState,
    pub effects: Vec<ConnectionEffect>,
    pub audit_entry: AuditEntry,
}

/// Audit trail entry for one transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: Timestamp,
    pub device: Option<DeviceId>,
    pub from_state: String,
    pub to_state: String,
    pub event: String,
    pub effects_count: usize,
}

// ----------------------------------------------------------------------------
// State Machine Implementation
// ----------------------------------------------------------------------------

impl ConnectionState {
    pub fn state_name(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "Idle",
            ConnectionState::Connecting(_) => "Connecting",
            ConnectionState::Connected(_) => "Connected",
            ConnectionState::Disconnecting(_) => "Disconnecting",
            ConnectionState::Failed(_) => "Failed",
        }
    }

    pub fn device(&self) -> Option<&Device> {
        match self {
            ConnectionState::Idle => None,
            ConnectionState::Connecting(s) => Some(&s.device),
            ConnectionState::Connected(s) => Some(&s.device),
            ConnectionState::Disconnecting(s) => Some(&s.device),
            ConnectionState::Failed(s) => Some(&s.device),
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, ConnectionState::Idle)
    }

    /// Channel of the live link, if any
    pub fn channel(&self) -> Option<ChannelHandle> {
        match self {
            ConnectionState::Connected(s) => Some(s.channel),
            ConnectionState::Disconnecting(s) => s.channel,
            _ => None,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        match self {
            ConnectionState::Idle => ConnectionStatus::Idle,
            ConnectionState::Connecting(s) => ConnectionStatus::Connecting {
                device: s.device.clone(),
            },
            ConnectionState::Connected(s) => ConnectionStatus::Connected {
                device: s.device.clone(),
            },
            ConnectionState::Disconnecting(s) => ConnectionStatus::Disconnecting {
                device: s.device.clone(),
            },
            ConnectionState::Failed(s) => ConnectionStatus::Failed {
                device: s.device.clone(),
                reason: s.reason,
            },
        }
    }

    /// Apply `event` observed at `now`, consuming the current state
    pub fn transition(
        self,
        event: ConnectionEvent,
        now: Timestamp,
    ) -> Result<StateTransition, TransitionError> {
        let from_state = self.state_name();
        let event_name = event.name();

        let (new_state, effects) = match (self, event) {
            // From Idle
            (ConnectionState::Idle, ConnectionEvent::Connect { device, attempt }) => {
                let effects = vec![ConnectionEffect::BeginConnect {
                    device: device.clone(),
                    attempt,
                }];
                let new_state = ConnectionState::Connecting(ConnectingState {
                    device,
                    attempt,
                    started_at: now,
                });
                (new_state, effects)
            }
            (ConnectionState::Idle, ConnectionEvent::Disconnect) => {
                (ConnectionState::Idle, Vec::new())
            }

            // Joining an attempt or link that already targets the device
            (ConnectionState::Connecting(state), ConnectionEvent::Connect { device, .. })
                if state.device.id == device.id =>
            {
                (ConnectionState::Connecting(state), Vec::new())
            }
            (ConnectionState::Connected(state), ConnectionEvent::Connect { device, .. })
                if state.device.id == device.id =>
            {
                (ConnectionState::Connected(state), Vec::new())
            }

            // From Connecting
            (
                ConnectionState::Connecting(state),
                ConnectionEvent::ConnectSucceeded { attempt, channel },
            ) if state.attempt == attempt => {
                let effects = vec![ConnectionEffect::OpenSession {
                    device: state.device.clone(),
                    channel,
                }];
                let new_state = ConnectionState::Connected(ConnectedState {
                    device: state.device,
                    channel,
                    connected_since: now,
                });
                (new_state, effects)
            }
            (
                ConnectionState::Connecting(state),
                ConnectionEvent::ConnectFailed { attempt, reason },
            ) if state.attempt == attempt => {
                let effects = vec![ConnectionEffect::ConnectFailed {
                    device: state.device.clone(),
                    reason,
                }];
                let new_state = ConnectionState::Failed(FailedState {
                    device: state.device,
                    reason,
                    failed_at: now,
                });
                (new_state, effects)
            }
            (ConnectionState::Connecting(state), ConnectionEvent::Disconnect) => {
                let effects = vec![ConnectionEffect::CancelConnect {
                    device: state.device.id.clone(),
                    attempt: state.attempt,
                }];
                let new_state = ConnectionState::Disconnecting(DisconnectingState {
                    device: state.device,
                    channel: None,
                    requested_at: now,
                });
                (new_state, effects)
            }

            // Completions of superseded attempts
            (state, ConnectionEvent::ConnectSucceeded { channel, .. }) => {
                (state, vec![ConnectionEffect::ReleaseChannel { channel }])
            }
            (state, ConnectionEvent::ConnectFailed { .. }) => (state, Vec::new()),

            // From Connected
            (ConnectionState::Connected(state), ConnectionEvent::Disconnect) => {
                let effects = vec![ConnectionEffect::BeginTeardown {
                    device: state.device.id.clone(),
                    channel: state.channel,
                }];
                let new_state = ConnectionState::Disconnecting(DisconnectingState {
                    device: state.device,
                    channel: Some(state.channel),
                    requested_at: now,
                });
                (new_state, effects)
            }
            (ConnectionState::Connected(state), ConnectionEvent::LinkLost { channel })
                if state.channel == channel =>
            {
                let effects = vec![
                    ConnectionEffect::CloseSession,
                    ConnectionEffect::LinkLost {
                        device: state.device,
                    },
                ];
                (ConnectionState::Idle, effects)
            }

            // From Disconnecting
            (ConnectionState::Disconnecting(state), ConnectionEvent::Disconnect) => {
                (ConnectionState::Disconnecting(state), Vec::new())
            }
            (ConnectionState::Disconnecting(state), ConnectionEvent::TeardownComplete) => {
                let effects = if state.channel.is_some() {
                    vec![
                        ConnectionEffect::CloseSession,
                        ConnectionEffect::Disconnected {
                            device: state.device,
                        },
                    ]
                } else {
                    Vec::new()
                };
                (ConnectionState::Idle, effects)
            }
            (ConnectionState::Disconnecting(state), ConnectionEvent::LinkLost { channel })
                if state.channel == Some(channel) =>
            {
                let effects = vec![
                    ConnectionEffect::CloseSession,
                    ConnectionEffect::Disconnected {
                        device: state.device,
                    },
                ];
                (ConnectionState::Idle, effects)
            }

            // From Failed
            (ConnectionState::Failed(_), ConnectionEvent::FailureReported)
            | (ConnectionState::Failed(_), ConnectionEvent::Disconnect) => {
                (ConnectionState::Idle, Vec::new())
            }

            // Link loss for a channel that is no longer current
            (state, ConnectionEvent::LinkLost { .. }) => (state, Vec::new()),

            (state, event) => {
                return Err(TransitionError {
                    from: state.state_name(),
                    event: format!("{:?}", event),
                });
            }
        };

        let audit_entry = AuditEntry {
            timestamp: now,
            device: new_state.device().map(|d| d.id.clone()),
            from_state: from_state.to_string(),
            to_state: new_state.state_name().to_string(),
            event: event_name.to_string(),
            effects_count: effects.len(),
        };

        Ok(StateTransition {
            new_state,
            effects,
            audit_entry,
        })
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn device(id: &str) -> Device {
        Device::unseen(DeviceId::new(id).unwrap(), Timestamp::new(0))
    }

    fn connecting(id: &str, attempt: u64) -> ConnectionState {
        ConnectionState::Idle
            .transition(
                ConnectionEvent::Connect {
                    device: device(id),
                    attempt: AttemptId::new(attempt),
                },
                Timestamp::new(1),
            )
            .unwrap()
            .new_state
    }

    fn connected(id: &str, channel: u64) -> ConnectionState {
        connecting(id, 1)
            .transition(
                ConnectionEvent::ConnectSucceeded {
                    attempt: AttemptId::new(1),
                    channel: ChannelHandle::new(channel),
                },
                Timestamp::new(2),
            )
            .unwrap()
            .new_state
    }

    #[test]
    fn test_idle_connect_begins_attempt() {
        let transition = ConnectionState::Idle
            .transition(
                ConnectionEvent::Connect {
                    device: device("A"),
                    attempt: AttemptId::new(7),
                },
                Timestamp::new(1),
            )
            .unwrap();
        assert_eq!(transition.new_state.state_name(), "Connecting");
        assert_eq!(
            transition.effects,
            vec![ConnectionEffect::BeginConnect {
                device: device("A"),
                attempt: AttemptId::new(7)
            }]
        );
        assert_eq!(transition.audit_entry.from_state, "Idle");
        assert_eq!(transition.audit_entry.to_state, "Connecting");
    }

    #[test]
    fn test_success_opens_session() {
        let state = connected("A", 9);
        assert_eq!(state.channel(), Some(ChannelHandle::new(9)));
        assert!(state.status().is_connected());
    }

    #[test]
    fn test_failure_then_reported_returns_to_idle() {
        let failed = connecting("A", 1)
            .transition(
                ConnectionEvent::ConnectFailed {
                    attempt: AttemptId::new(1),
                    reason: FailureReason::Timeout,
                },
                Timestamp::new(3),
            )
            .unwrap();
        assert_eq!(failed.new_state.state_name(), "Failed");
        assert_eq!(
            failed.effects,
            vec![ConnectionEffect::ConnectFailed {
                device: device("A"),
                reason: FailureReason::Timeout
            }]
        );

        let idle = failed
            .new_state
            .transition(ConnectionEvent::FailureReported, Timestamp::new(4))
            .unwrap();
        assert!(idle.new_state.is_idle());
    }

    #[test]
    fn test_stale_success_releases_channel() {
        let transition = connecting("A", 2)
            .transition(
                ConnectionEvent::ConnectSucceeded {
                    attempt: AttemptId::new(1),
                    channel: ChannelHandle::new(5),
                },
                Timestamp::new(3),
            )
            .unwrap();
        assert_eq!(transition.new_state.state_name(), "Connecting");
        assert_eq!(
            transition.effects,
            vec![ConnectionEffect::ReleaseChannel {
                channel: ChannelHandle::new(5)
            }]
        );
    }

    #[test]
    fn test_stale_failure_is_ignored() {
        let transition = connected("A", 1)
            .transition(
                ConnectionEvent::ConnectFailed {
                    attempt: AttemptId::new(99),
                    reason: FailureReason::RadioRejected,
                },
                Timestamp::new(3),
            )
            .unwrap();
        assert_eq!(transition.new_state.state_name(), "Connected");
        assert!(transition.effects.is_empty());
    }

    #[test]
    fn test_disconnect_from_connected_begins_teardown() {
        let transition = connected("A", 4)
            .transition(ConnectionEvent::Disconnect, Timestamp::new(5))
            .unwrap();
        assert_eq!(transition.new_state.state_name(), "Disconnecting");
        assert_eq!(
            transition.effects,
            vec![ConnectionEffect::BeginTeardown {
                device: DeviceId::new("A").unwrap(),
                channel: ChannelHandle::new(4)
            }]
        );

        let done = transition
            .new_state
            .transition(ConnectionEvent::TeardownComplete, Timestamp::new(6))
            .unwrap();
        assert!(done.new_state.is_idle());
        assert_eq!(
            done.effects,
            vec![
                ConnectionEffect::CloseSession,
                ConnectionEffect::Disconnected { device: device("A") }
            ]
        );
    }

    #[test]
    fn test_disconnect_while_connecting_cancels() {
        let transition = connecting("A", 3)
            .transition(ConnectionEvent::Disconnect, Timestamp::new(2))
            .unwrap();
        assert_eq!(
            transition.effects,
            vec![ConnectionEffect::CancelConnect {
                device: DeviceId::new("A").unwrap(),
                attempt: AttemptId::new(3)
            }]
        );
        let done = transition
            .new_state
            .transition(ConnectionEvent::TeardownComplete, Timestamp::new(3))
            .unwrap();
        assert!(done.new_state.is_idle());
        assert!(done.effects.is_empty());
    }

    #[test]
    fn test_link_lost_is_distinct_from_disconnect() {
        let transition = connected("A", 8)
            .transition(
                ConnectionEvent::LinkLost {
                    channel: ChannelHandle::new(8),
                },
                Timestamp::new(9),
            )
            .unwrap();
        assert!(transition.new_state.is_idle());
        assert_eq!(
            transition.effects,
            vec![
                ConnectionEffect::CloseSession,
                ConnectionEffect::LinkLost { device: device("A") }
            ]
        );
    }

    #[test]
    fn test_link_lost_for_other_channel_ignored() {
        let transition = connected("A", 8)
            .transition(
                ConnectionEvent::LinkLost {
                    channel: ChannelHandle::new(1),
                },
                Timestamp::new(9),
            )
            .unwrap();
        assert_eq!(transition.new_state.state_name(), "Connected");
        assert!(transition.effects.is_empty());
    }

    #[test]
    fn test_connect_to_other_device_while_connected_is_invalid() {
        let err = connected("A", 1)
            .transition(
                ConnectionEvent::Connect {
                    device: device("B"),
                    attempt: AttemptId::new(2),
                },
                Timestamp::new(3),
            )
            .unwrap_err();
        assert_eq!(err.from, "Connected");
    }

    #[test]
    fn test_connect_same_device_collapses() {
        let transition = connecting("A", 1)
            .transition(
                ConnectionEvent::Connect {
                    device: device("A"),
                    attempt: AttemptId::new(2),
                },
                Timestamp::new(3),
            )
            .unwrap();
        match transition.new_state {
            ConnectionState::Connecting(state) => assert_eq!(state.attempt, AttemptId::new(1)),
            other => panic!("unexpected state {:?}", other),
        }
        assert!(transition.effects.is_empty());
    }

    #[test]
    fn test_teardown_complete_outside_disconnecting_is_invalid() {
        assert!(ConnectionState::Idle
            .transition(ConnectionEvent::TeardownComplete, Timestamp::new(1))
            .is_err());
    }
}
