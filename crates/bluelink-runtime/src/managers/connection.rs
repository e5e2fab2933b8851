//! Connection orchestration for the Bluelink session actor
//!
//! `ConnectionManager` owns the single `ConnectionState` and turns user requests and
//! capability completions into state machine events. Multi-step requests (switching
//! devices, cancelling an attempt) are decomposed here so the state machine itself stays
//! linear.

use std::collections::VecDeque;

use bluelink_core::{
    AttemptId, AuditEntry, ChannelHandle, ConnectionEffect, ConnectionEvent, ConnectionState,
    ConnectionStatus, Device, DeviceId, FailureReason, TimeSource, TransitionError,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

// ----------------------------------------------------------------------------
// Connection Manager
// ----------------------------------------------------------------------------

/// Drives the connection state machine for one radio link
#[derive(Debug)]
pub struct ConnectionManager<T: TimeSource> {
    /// The one active connection state
    state: ConnectionState,
    /// Generation handed to the next connect attempt
    next_attempt: u64,
    /// Connect requested while a previous link is still tearing down
    queued: Option<Device>,
    /// Most recent transitions, oldest first
    audit_trail: VecDeque<AuditEntry>,
    audit_capacity: usize,
    time_source: T,
    stats: ConnectionStats,
}

enum ConnectPlan {
    AlreadyTargeted,
    Start,
    CancelThenStart,
    TeardownThenStart,
    ReplaceQueued,
}

impl<T: TimeSource> ConnectionManager<T> {
    pub fn new(time_source: T, audit_capacity: usize) -> Self {
        Self {
            state: ConnectionState::Idle,
            next_attempt: 1,
            queued: None,
            audit_trail: VecDeque::new(),
            audit_capacity: audit_capacity.max(1),
            time_source,
            stats: ConnectionStats::default(),
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn status(&self) -> ConnectionStatus {
        self.state.status()
    }

    /// Device waiting for the current teardown to finish
    pub fn queued(&self) -> Option<&Device> {
        self.queued.as_ref()
    }

    pub fn is_connected_to(&self, device: &DeviceId) -> bool {
        matches!(&self.state, ConnectionState::Connected(s) if &s.device.id == device)
    }

    /// Attempt currently in flight, if any
    pub fn current_attempt(&self) -> Option<AttemptId> {
        match &self.state {
            ConnectionState::Connecting(s) => Some(s.attempt),
            _ => None,
        }
    }

    /// Request a link to `device`
    ///
    /// A request for the device already being connected or already connected collapses
    /// into the existing attempt. A request for another device cancels an in-flight
    /// attempt or tears the current link down first; the new attempt only begins once the
    /// machine is back in `Idle`.
    pub fn request_connect(
        &mut self,
        device: Device,
    ) -> Result<Vec<ConnectionEffect>, TransitionError> {
        let plan = match &self.state {
            ConnectionState::Connecting(s) if s.device.id == device.id => {
                ConnectPlan::AlreadyTargeted
            }
            ConnectionState::Connected(s) if s.device.id == device.id => {
                ConnectPlan::AlreadyTargeted
            }
            ConnectionState::Idle | ConnectionState::Failed(_) => ConnectPlan::Start,
            ConnectionState::Connecting(_) => ConnectPlan::CancelThenStart,
            ConnectionState::Connected(_) => ConnectPlan::TeardownThenStart,
            ConnectionState::Disconnecting(_) => ConnectPlan::ReplaceQueued,
        };

        let mut effects = Vec::new();
        match plan {
            ConnectPlan::AlreadyTargeted => {
                trace!("Connect to {} joins the existing link", device.id);
            }
            ConnectPlan::Start => {
                if matches!(self.state, ConnectionState::Failed(_)) {
                    self.apply(ConnectionEvent::FailureReported, &mut effects)?;
                }
                self.begin_attempt(device, &mut effects)?;
            }
            ConnectPlan::CancelThenStart => {
                self.apply(ConnectionEvent::Disconnect, &mut effects)?;
                self.apply(ConnectionEvent::TeardownComplete, &mut effects)?;
                self.begin_attempt(device, &mut effects)?;
            }
            ConnectPlan::TeardownThenStart => {
                self.queued = Some(device);
                self.apply(ConnectionEvent::Disconnect, &mut effects)?;
            }
            ConnectPlan::ReplaceQueued => {
                if let Some(previous) = self.queued.replace(device.clone()) {
                    if previous.id != device.id {
                        effects.push(ConnectionEffect::ConnectAbandoned {
                            device: previous.id,
                        });
                    }
                }
                debug!("Connect to {} queued behind teardown", device.id);
            }
        }
        Ok(effects)
    }

    /// Request the current link (or attempt) to end
    ///
    /// Also withdraws any queued connect. An attempt without a channel has nothing to
    /// drain, so it reaches `Idle` in the same call.
    pub fn request_disconnect(&mut self) -> Result<Vec<ConnectionEffect>, TransitionError> {
        let mut effects = Vec::new();
        if let Some(previous) = self.queued.take() {
            effects.push(ConnectionEffect::ConnectAbandoned {
                device: previous.id,
            });
        }

        let was_connecting = matches!(self.state, ConnectionState::Connecting(_));
        self.apply(ConnectionEvent::Disconnect, &mut effects)?;
        if was_connecting {
            self.apply(ConnectionEvent::TeardownComplete, &mut effects)?;
        }
        Ok(effects)
    }

    /// Outcome of the capability connect primitive for `attempt`
    ///
    /// A failure leaves the machine in `Failed` until `acknowledge_failure` (or the next
    /// connect or disconnect request) reports it and returns to `Idle`.
    pub fn on_connect_result(
        &mut self,
        attempt: AttemptId,
        result: Result<ChannelHandle, FailureReason>,
    ) -> Result<Vec<ConnectionEffect>, TransitionError> {
        if self.current_attempt() != Some(attempt) {
            self.stats.stale_completions += 1;
            debug!("Ignoring completion of superseded {}", attempt);
        }

        let event = match result {
            Ok(channel) => ConnectionEvent::ConnectSucceeded { attempt, channel },
            Err(reason) => ConnectionEvent::ConnectFailed { attempt, reason },
        };

        let mut effects = Vec::new();
        self.apply(event, &mut effects)?;
        self.start_queued(&mut effects)?;
        Ok(effects)
    }

    /// Mark a pending failure as reported, returning the machine to `Idle`
    ///
    /// A no-op in any state other than `Failed`.
    pub fn acknowledge_failure(&mut self) -> Result<Vec<ConnectionEffect>, TransitionError> {
        let mut effects = Vec::new();
        if matches!(self.state, ConnectionState::Failed(_)) {
            self.apply(ConnectionEvent::FailureReported, &mut effects)?;
        }
        Ok(effects)
    }

    /// The capability finished disconnecting `channel`
    pub fn on_teardown_complete(
        &mut self,
        channel: ChannelHandle,
    ) -> Result<Vec<ConnectionEffect>, TransitionError> {
        let mut effects = Vec::new();
        match &self.state {
            ConnectionState::Disconnecting(s) if s.channel == Some(channel) => {}
            _ => {
                self.stats.stale_completions += 1;
                debug!("Ignoring teardown completion for {}", channel);
                return Ok(effects);
            }
        }

        self.apply(ConnectionEvent::TeardownComplete, &mut effects)?;
        self.start_queued(&mut effects)?;
        Ok(effects)
    }

    /// The capability reported an unsolicited disconnect of `channel`
    pub fn on_link_lost(
        &mut self,
        channel: ChannelHandle,
    ) -> Result<Vec<ConnectionEffect>, TransitionError> {
        let mut effects = Vec::new();
        self.apply(ConnectionEvent::LinkLost { channel }, &mut effects)?;
        self.start_queued(&mut effects)?;
        Ok(effects)
    }

    pub fn recent_audit_entries(&self, limit: usize) -> Vec<AuditEntry> {
        let skip = self.audit_trail.len().saturating_sub(limit);
        self.audit_trail.iter().skip(skip).cloned().collect()
    }

    pub fn statistics(&self) -> &ConnectionStats {
        &self.stats
    }

    fn begin_attempt(
        &mut self,
        device: Device,
        effects: &mut Vec<ConnectionEffect>,
    ) -> Result<(), TransitionError> {
        let attempt = AttemptId::new(self.next_attempt);
        self.next_attempt += 1;
        self.apply(ConnectionEvent::Connect { device, attempt }, effects)
    }

    fn start_queued(&mut self, effects: &mut Vec<ConnectionEffect>) -> Result<(), TransitionError> {
        if !self.state.is_idle() {
            return Ok(());
        }
        match self.queued.take() {
            Some(device) => {
                debug!("Starting queued connect to {}", device.id);
                self.begin_attempt(device, effects)
            }
            None => Ok(()),
        }
    }

    /// Run one event through the state machine, recording the audit entry and appending a
    /// `StatusChanged` effect when the observable status moved.
    ///
    /// On error the current state is left untouched.
    fn apply(
        &mut self,
        event: ConnectionEvent,
        effects: &mut Vec<ConnectionEffect>,
    ) -> Result<(), TransitionError> {
        let previous = self.state.status();
        let transition = self.state.clone().transition(event, self.time_source.now())?;

        trace!(
            "{} -> {} on {}",
            transition.audit_entry.from_state,
            transition.audit_entry.to_state,
            transition.audit_entry.event
        );

        self.state = transition.new_state;
        self.stats.state_transitions += 1;
        for effect in &transition.effects {
            self.stats.record(effect);
        }
        effects.extend(transition.effects);

        self.audit_trail.push_back(transition.audit_entry);
        while self.audit_trail.len() > self.audit_capacity {
            self.audit_trail.pop_front();
        }

        let current = self.state.status();
        if current != previous {
            effects.push(ConnectionEffect::StatusChanged(current));
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Supporting Types
// ----------------------------------------------------------------------------

/// Counters for connection management
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStats {
    pub state_transitions: u64,
    pub attempts_started: u64,
    pub attempts_cancelled: u64,
    pub connections_established: u64,
    pub connection_failures: u64,
    pub disconnects: u64,
    pub links_lost: u64,
    /// Completions that arrived after their attempt or link was superseded
    pub stale_completions: u64,
}

impl ConnectionStats {
    fn record(&mut self, effect: &ConnectionEffect) {
        match effect {
            ConnectionEffect::BeginConnect { .. } => self.attempts_started += 1,
            ConnectionEffect::CancelConnect { .. } => self.attempts_cancelled += 1,
            ConnectionEffect::OpenSession { .. } => self.connections_established += 1,
            ConnectionEffect::ConnectFailed { .. } => self.connection_failures += 1,
            ConnectionEffect::Disconnected { .. } => self.disconnects += 1,
            ConnectionEffect::LinkLost { .. } => self.links_lost += 1,
            _ => {}
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use bluelink_core::Timestamp;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[derive(Debug, Default)]
    struct StepClock(AtomicU64);

    impl TimeSource for StepClock {
        fn now(&self) -> Timestamp {
            Timestamp::new(self.0.fetch_add(1, Ordering::Relaxed))
        }
    }

    fn manager() -> ConnectionManager<StepClock> {
        ConnectionManager::new(StepClock::default(), 16)
    }

    fn device(id: &str) -> Device {
        Device::unseen(DeviceId::new(id).unwrap(), Timestamp::new(0))
    }

    fn statuses(effects: &[ConnectionEffect]) -> Vec<ConnectionStatus> {
        effects
            .iter()
            .filter_map(|e| match e {
                ConnectionEffect::StatusChanged(s) => Some(s.clone()),
                _ => None,
            })
            .collect()
    }

    fn connect(manager: &mut ConnectionManager<StepClock>, id: &str, channel: u64) {
        manager.request_connect(device(id)).unwrap();
        let attempt = manager.current_attempt().unwrap();
        manager
            .on_connect_result(attempt, Ok(ChannelHandle::new(channel)))
            .unwrap();
    }

    #[test]
    fn test_connect_publishes_connecting_then_connected() {
        let mut manager = manager();
        let effects = manager.request_connect(device("A")).unwrap();
        assert!(matches!(effects[0], ConnectionEffect::BeginConnect { .. }));
        assert_eq!(
            statuses(&effects),
            vec![ConnectionStatus::Connecting { device: device("A") }]
        );

        let attempt = manager.current_attempt().unwrap();
        let effects = manager
            .on_connect_result(attempt, Ok(ChannelHandle::new(1)))
            .unwrap();
        assert!(matches!(effects[0], ConnectionEffect::OpenSession { .. }));
        assert!(manager.is_connected_to(&device("A").id));
    }

    #[test]
    fn test_duplicate_connect_is_collapsed() {
        let mut manager = manager();
        manager.request_connect(device("A")).unwrap();
        let effects = manager.request_connect(device("A")).unwrap();
        assert!(effects.is_empty());
        assert_eq!(manager.statistics().attempts_started, 1);
    }

    #[test]
    fn test_failure_is_held_until_acknowledged() {
        let mut manager = manager();
        manager.request_connect(device("A")).unwrap();
        let attempt = manager.current_attempt().unwrap();
        let effects = manager
            .on_connect_result(attempt, Err(FailureReason::Timeout))
            .unwrap();

        let failures = effects
            .iter()
            .filter(|e| matches!(e, ConnectionEffect::ConnectFailed { .. }))
            .count();
        assert_eq!(failures, 1);
        let failed = ConnectionStatus::Failed {
            device: device("A"),
            reason: FailureReason::Timeout,
        };
        assert_eq!(statuses(&effects), vec![failed.clone()]);
        assert_eq!(manager.status(), failed);

        let effects = manager.acknowledge_failure().unwrap();
        assert_eq!(statuses(&effects), vec![ConnectionStatus::Idle]);
        assert!(manager.state().is_idle());

        // Acknowledging again changes nothing
        assert!(manager.acknowledge_failure().unwrap().is_empty());
    }

    #[test]
    fn test_connect_after_failure_reports_it_first() {
        let mut manager = manager();
        manager.request_connect(device("A")).unwrap();
        let attempt = manager.current_attempt().unwrap();
        manager
            .on_connect_result(attempt, Err(FailureReason::RadioRejected))
            .unwrap();

        let effects = manager.request_connect(device("B")).unwrap();
        assert_eq!(
            statuses(&effects),
            vec![
                ConnectionStatus::Idle,
                ConnectionStatus::Connecting { device: device("B") }
            ]
        );
    }

    #[test]
    fn test_disconnect_clears_failure() {
        let mut manager = manager();
        manager.request_connect(device("A")).unwrap();
        let attempt = manager.current_attempt().unwrap();
        manager
            .on_connect_result(attempt, Err(FailureReason::DeviceUnreachable))
            .unwrap();

        manager.request_disconnect().unwrap();
        assert!(manager.state().is_idle());
    }

    #[test]
    fn test_switch_while_connected_waits_for_teardown() {
        let mut manager = manager();
        connect(&mut manager, "A", 1);

        let effects = manager.request_connect(device("B")).unwrap();
        assert!(effects.iter().any(|e| matches!(
            e,
            ConnectionEffect::BeginTeardown { channel, .. } if *channel == ChannelHandle::new(1)
        )));
        assert!(!effects
            .iter()
            .any(|e| matches!(e, ConnectionEffect::BeginConnect { .. })));
        assert_eq!(manager.queued().map(|d| d.id.as_str()), Some("B"));

        let effects = manager.on_teardown_complete(ChannelHandle::new(1)).unwrap();
        assert_eq!(
            statuses(&effects),
            vec![
                ConnectionStatus::Idle,
                ConnectionStatus::Connecting { device: device("B") }
            ]
        );
        assert!(effects
            .iter()
            .any(|e| matches!(e, ConnectionEffect::Disconnected { .. })));
    }

    #[test]
    fn test_switch_while_connecting_cancels_first_attempt() {
        let mut manager = manager();
        manager.request_connect(device("A")).unwrap();
        let first = manager.current_attempt().unwrap();

        let effects = manager.request_connect(device("B")).unwrap();
        assert_eq!(
            effects[0],
            ConnectionEffect::CancelConnect {
                device: device("A").id,
                attempt: first
            }
        );
        let second = manager.current_attempt().unwrap();
        assert_ne!(first, second);

        // The cancelled attempt's late success must not produce a link
        let effects = manager
            .on_connect_result(first, Ok(ChannelHandle::new(7)))
            .unwrap();
        assert_eq!(
            effects,
            vec![ConnectionEffect::ReleaseChannel {
                channel: ChannelHandle::new(7)
            }]
        );
        assert_eq!(manager.statistics().stale_completions, 1);
        assert_eq!(manager.current_attempt(), Some(second));
    }

    #[test]
    fn test_newer_queued_connect_replaces_older() {
        let mut manager = manager();
        connect(&mut manager, "A", 1);
        manager.request_connect(device("B")).unwrap();

        let effects = manager.request_connect(device("C")).unwrap();
        assert_eq!(
            effects,
            vec![ConnectionEffect::ConnectAbandoned {
                device: device("B").id
            }]
        );
        assert_eq!(manager.queued().map(|d| d.id.as_str()), Some("C"));
    }

    #[test]
    fn test_disconnect_withdraws_queued_connect() {
        let mut manager = manager();
        connect(&mut manager, "A", 1);
        manager.request_connect(device("B")).unwrap();

        let effects = manager.request_disconnect().unwrap();
        assert_eq!(
            effects,
            vec![ConnectionEffect::ConnectAbandoned {
                device: device("B").id
            }]
        );
        manager.on_teardown_complete(ChannelHandle::new(1)).unwrap();
        assert!(manager.state().is_idle());
    }

    #[test]
    fn test_disconnect_while_connecting_reaches_idle() {
        let mut manager = manager();
        manager.request_connect(device("A")).unwrap();
        let effects = manager.request_disconnect().unwrap();
        assert!(matches!(effects[0], ConnectionEffect::CancelConnect { .. }));
        assert!(manager.state().is_idle());
    }

    #[test]
    fn test_stale_teardown_is_ignored() {
        let mut manager = manager();
        connect(&mut manager, "A", 1);
        let effects = manager.on_teardown_complete(ChannelHandle::new(1)).unwrap();
        assert!(effects.is_empty());
        assert!(manager.is_connected_to(&device("A").id));
    }

    #[test]
    fn test_link_lost_returns_to_idle() {
        let mut manager = manager();
        connect(&mut manager, "A", 3);
        let effects = manager.on_link_lost(ChannelHandle::new(3)).unwrap();
        assert!(effects
            .iter()
            .any(|e| matches!(e, ConnectionEffect::LinkLost { .. })));
        assert_eq!(manager.statistics().links_lost, 1);
        assert!(manager.state().is_idle());
    }

    #[test]
    fn test_audit_trail_is_bounded() {
        let mut manager = ConnectionManager::new(StepClock::default(), 2);
        connect(&mut manager, "A", 1);
        manager.request_disconnect().unwrap();
        let entries = manager.recent_audit_entries(10);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].to_state, "Disconnecting");
    }
}
