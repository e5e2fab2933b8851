//! Session state owned by the session task
//!
//! Everything observable through a `SessionStore` lives here and is only ever touched
//! from the session task, so no locking is involved.

use bluelink_core::{
    ChannelHandle, Device, DeviceId, DeviceRegistry, Diagnostics, MessageChannel, MessageId,
    SessionConfig, SessionError, SessionResult, SystemTimeSource, TimeSource, Timestamp,
};
use hashbrown::HashMap;
use tracing::trace;

use super::commands::Reply;
use crate::managers::ConnectionManager;

// ----------------------------------------------------------------------------
// Session State
// ----------------------------------------------------------------------------

/// Inbound payloads held while a connect attempt is in flight
const EARLY_INBOUND_LIMIT: usize = 32;

pub(crate) struct SessionState {
    pub registry: DeviceRegistry,
    pub connections: ConnectionManager<SystemTimeSource>,
    pub channel: MessageChannel,
    pub waiters: Waiters,
    pub scan: ScanState,
    /// Generation of the current message session, bumped on every open
    pub session: u64,
    /// Writes issued on the current session that have not completed
    pub in_flight_writes: usize,
    /// Channel whose teardown is waiting for writes to drain
    pub draining: Option<ChannelHandle>,
    /// Write completions that arrived after their session ended
    pub stale_writes: u64,
    /// Inbound data that outran the completion of the connect it belongs to
    early_inbound: Vec<(ChannelHandle, Vec<u8>)>,
    time_source: SystemTimeSource,
}

#[derive(Debug, Default)]
pub(crate) struct ScanState {
    /// The radio confirmed the scan and it has not stopped yet
    pub scanning: bool,
    /// A scan start is waiting on the radio
    pub starting: bool,
    pub generation: u64,
}

impl SessionState {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            registry: DeviceRegistry::new(),
            connections: ConnectionManager::new(SystemTimeSource, config.audit_trail_len),
            channel: MessageChannel::new(config.max_message_chars),
            waiters: Waiters::default(),
            scan: ScanState::default(),
            session: 0,
            in_flight_writes: 0,
            draining: None,
            stale_writes: 0,
            early_inbound: Vec::new(),
            time_source: SystemTimeSource,
        }
    }

    pub fn now(&self) -> Timestamp {
        self.time_source.now()
    }

    /// Registry entry for `id`, or a placeholder for a device never seen by a scan
    pub fn device_or_unseen(&self, id: DeviceId) -> Device {
        match self.registry.get(&id) {
            Some(device) => device.clone(),
            None => Device::unseen(id, self.now()),
        }
    }

    /// Hold `bytes` until the link they arrived on opens; gives them back when full
    pub fn hold_early_inbound(
        &mut self,
        channel: ChannelHandle,
        bytes: Vec<u8>,
    ) -> Result<(), Vec<u8>> {
        if self.early_inbound.len() >= EARLY_INBOUND_LIMIT {
            return Err(bytes);
        }
        trace!("Holding {} inbound bytes for {}", bytes.len(), channel);
        self.early_inbound.push((channel, bytes));
        Ok(())
    }

    /// Held payloads for `channel` in arrival order; anything else held is discarded
    pub fn take_early_inbound(&mut self, channel: ChannelHandle) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.early_inbound)
            .into_iter()
            .filter(|(held_for, _)| *held_for == channel)
            .map(|(_, bytes)| bytes)
            .collect()
    }

    pub fn discard_early_inbound(&mut self) {
        self.early_inbound.clear();
    }

    pub fn diagnostics(&self) -> Diagnostics {
        let registry = self.registry.stats();
        let connections = self.connections.statistics();
        let channel = self.channel.stats();
        Diagnostics {
            devices_known: self.registry.len(),
            discoveries_applied: registry.inserted + registry.updated,
            malformed_discoveries: registry.malformed_dropped,
            state_transitions: connections.state_transitions,
            messages_sent: channel.messages_sent,
            messages_failed: channel.messages_failed,
            messages_received: channel.messages_received,
            inbound_dropped: channel.inbound_dropped,
            stale_completions: connections.stale_completions + self.stale_writes,
            scanning: self.scan.scanning,
        }
    }
}

// ----------------------------------------------------------------------------
// Waiters
// ----------------------------------------------------------------------------

/// Callers waiting on an operation that completes after later radio activity
#[derive(Default)]
pub(crate) struct Waiters {
    connect: Vec<(DeviceId, Reply<SessionResult<Device>>)>,
    disconnect: Vec<Reply<SessionResult<()>>>,
    sends: HashMap<MessageId, Reply<SessionResult<Option<MessageId>>>>,
    scan_starts: Vec<Reply<SessionResult<()>>>,
    shutdown: Option<Reply<()>>,
}

impl Waiters {
    pub fn push_connect(&mut self, device: DeviceId, reply: Reply<SessionResult<Device>>) {
        self.connect.push((device, reply));
    }

    /// Resolve every connect waiter for `device` with `result`
    pub fn resolve_connect(&mut self, device: &DeviceId, result: SessionResult<Device>) {
        let (matching, rest): (Vec<_>, Vec<_>) = self
            .connect
            .drain(..)
            .partition(|(waiting_for, _)| waiting_for == device);
        self.connect = rest;
        for (_, reply) in matching {
            if reply.send(result.clone()).is_err() {
                trace!("Connect waiter for {} went away", device);
            }
        }
    }

    pub fn push_disconnect(&mut self, reply: Reply<SessionResult<()>>) {
        self.disconnect.push(reply);
    }

    pub fn resolve_disconnects(&mut self) {
        for reply in self.disconnect.drain(..) {
            let _ = reply.send(Ok(()));
        }
    }

    pub fn push_send(&mut self, id: MessageId, reply: Reply<SessionResult<Option<MessageId>>>) {
        self.sends.insert(id, reply);
    }

    pub fn resolve_send(&mut self, id: MessageId, result: SessionResult<Option<MessageId>>) {
        if let Some(reply) = self.sends.remove(&id) {
            let _ = reply.send(result);
        }
    }

    /// Fail every send still waiting on a write from a session that has ended
    pub fn fail_sends(&mut self) {
        for (_, reply) in self.sends.drain() {
            let _ = reply.send(Err(SessionError::NotConnected));
        }
    }

    pub fn push_scan_start(&mut self, reply: Reply<SessionResult<()>>) {
        self.scan_starts.push(reply);
    }

    /// Answer every caller waiting on the in-flight scan start
    pub fn resolve_scan_starts(&mut self, result: SessionResult<()>) {
        for reply in self.scan_starts.drain(..) {
            let _ = reply.send(result.clone());
        }
    }

    pub fn set_shutdown(&mut self, reply: Reply<()>) {
        self.shutdown = Some(reply);
    }

    /// Release everyone still waiting as the task stops
    pub fn close(&mut self) {
        for (_, reply) in self.connect.drain(..) {
            let _ = reply.send(Err(SessionError::SessionClosed));
        }
        for reply in self.disconnect.drain(..) {
            let _ = reply.send(Ok(()));
        }
        for (_, reply) in self.sends.drain() {
            let _ = reply.send(Err(SessionError::SessionClosed));
        }
        self.resolve_scan_starts(Err(SessionError::SessionClosed));
        if let Some(reply) = self.shutdown.take() {
            let _ = reply.send(());
        }
    }
}
