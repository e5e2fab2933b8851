//! Session Task Implementation
//!
//! The session task is the single consumer of everything that mutates session state:
//! commands from `SessionStore` handles, radio events from the capability, and
//! completions of the background work it spawns. Each input is applied in full before
//! the next one is taken, so readers never observe a half-applied transition.

use std::sync::Arc;

use bluelink_core::{
    AttemptId, ChannelHandle, ConnectionEffect, ConnectionStatus, DeliveryStatus, Device,
    DeviceId, FailureReason, MessageId, RadioCapability, RadioError, RadioEvent,
    RadioEventReceiver, RadioResult, SessionConfig, SessionError, SessionEvent, SessionResult,
    Timestamp, TransitionError,
};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use super::commands::{
    Command, CommandReceiver, Completion, CompletionReceiver, CompletionSender, RadioReadiness,
    Reply,
};
use super::state::SessionState;

// ----------------------------------------------------------------------------
// Session Task
// ----------------------------------------------------------------------------

pub(crate) struct SessionTask {
    config: SessionConfig,
    radio: Arc<dyn RadioCapability>,
    state: SessionState,
    command_receiver: CommandReceiver,
    radio_receiver: RadioEventReceiver,
    completion_sender: CompletionSender,
    completion_receiver: CompletionReceiver,
    events: broadcast::Sender<SessionEvent>,
    status: watch::Sender<ConnectionStatus>,
    connect_task: Option<(AttemptId, JoinHandle<()>)>,
    scan_task: Option<JoinHandle<()>>,
    commands_open: bool,
    stopping: bool,
}

impl SessionTask {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        config: SessionConfig,
        radio: Arc<dyn RadioCapability>,
        command_receiver: CommandReceiver,
        radio_receiver: RadioEventReceiver,
        completion_sender: CompletionSender,
        completion_receiver: CompletionReceiver,
        events: broadcast::Sender<SessionEvent>,
        status: watch::Sender<ConnectionStatus>,
    ) -> Self {
        let state = SessionState::new(&config);
        Self {
            config,
            radio,
            state,
            command_receiver,
            radio_receiver,
            completion_sender,
            completion_receiver,
            events,
            status,
            connect_task: None,
            scan_task: None,
            commands_open: true,
            stopping: false,
        }
    }

    /// Run until shutdown is requested (or every handle is dropped) and the link is idle
    pub(crate) async fn run(mut self) {
        info!("Session task starting with {} radio", self.radio.name());

        loop {
            tokio::select! {
                biased;

                Some(completion) = self.completion_receiver.recv() => {
                    self.handle_completion(completion);
                }

                Some(event) = self.radio_receiver.recv() => {
                    self.handle_radio_event(event);
                }

                command = self.command_receiver.recv(), if self.commands_open => {
                    match command {
                        Some(cmd) => self.handle_command(cmd),
                        None => {
                            info!("All session handles dropped, shutting down");
                            self.commands_open = false;
                            self.begin_shutdown(None);
                        }
                    }
                }

                else => break,
            }

            if self.stopping && self.state.connections.state().is_idle() {
                break;
            }
        }

        self.finish();
    }

    // ------------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------------

    fn handle_command(&mut self, command: Command) {
        trace!("Processing {} command", command.name());

        match command {
            Command::StartScan { reply } => self.start_scan(reply),
            Command::StopScan { reply } => {
                self.stop_scan();
                let _ = reply.send(());
            }
            Command::IsScanning { reply } => {
                let _ = reply.send(self.state.scan.scanning);
            }
            Command::Devices { reply } => {
                let _ = reply.send(self.state.registry.list());
            }
            Command::ClearDevices { reply } => {
                self.state.registry.clear();
                self.publish(SessionEvent::DevicesCleared);
                let _ = reply.send(());
            }
            Command::Connect { device, reply } => self.connect(device, reply),
            Command::Disconnect { reply } => self.disconnect(reply),
            Command::Send { body, reply } => self.send(body, reply),
            Command::Messages { reply } => {
                let _ = reply.send(self.state.channel.history().to_vec());
            }
            Command::Status { reply } => {
                let status = self.state.connections.status();
                self.acknowledge_failure();
                let _ = reply.send(status);
            }
            Command::QueryRadio { reply } => self.query_radio(reply),
            Command::Diagnostics { reply } => {
                let _ = reply.send(self.state.diagnostics());
            }
            Command::AuditTrail { limit, reply } => {
                let _ = reply.send(self.state.connections.recent_audit_entries(limit));
            }
            Command::Shutdown { reply } => self.begin_shutdown(Some(reply)),
        }
    }

    fn start_scan(&mut self, reply: Reply<SessionResult<()>>) {
        if self.stopping {
            let _ = reply.send(Err(SessionError::SessionClosed));
            return;
        }
        if self.state.scan.scanning {
            let _ = reply.send(Ok(()));
            return;
        }

        // Concurrent starts share the outcome of the one in flight
        self.state.waiters.push_scan_start(reply);
        if self.state.scan.starting {
            return;
        }

        if self.config.clear_devices_on_scan {
            self.state.registry.clear();
            self.publish(SessionEvent::DevicesCleared);
        }

        self.state.scan.starting = true;
        self.state.scan.generation += 1;
        let generation = self.state.scan.generation;

        let radio = Arc::clone(&self.radio);
        let completions = self.completion_sender.clone();
        tokio::spawn(async move {
            let result = radio.scan_start().await;
            let started = result.is_ok();
            let finished = Completion::ScanStartFinished { generation, result };
            if completions.send(finished).is_err() && started {
                // Nobody is left to stop it
                let _ = radio.scan_stop().await;
            }
        });
    }

    fn finish_scan_start(&mut self, generation: u64, result: RadioResult<()>) {
        if !self.state.scan.starting || generation != self.state.scan.generation {
            debug!("Scan start completed after it was withdrawn");
            if result.is_ok() {
                self.spawn_scan_stop();
            }
            return;
        }
        self.state.scan.starting = false;

        if let Err(e) = result {
            warn!("Scan failed to start: {}", e);
            self.state.waiters.resolve_scan_starts(Err(surface(e)));
            return;
        }

        self.state.scan.scanning = true;
        self.publish(SessionEvent::ScanStarted);
        info!("Scan started for {:?}", self.config.scan_duration());

        let radio = Arc::clone(&self.radio);
        let completions = self.completion_sender.clone();
        let duration = self.config.scan_duration();
        self.scan_task = Some(tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            if let Err(e) = radio.scan_stop().await {
                warn!("Scan stop reported {}", e);
            }
            let _ = completions.send(Completion::ScanFinished { generation });
        }));
        self.state.waiters.resolve_scan_starts(Ok(()));
    }

    fn stop_scan(&mut self) {
        if self.state.scan.starting {
            // The start completion is now stale and stops the radio if it succeeded
            self.state.scan.starting = false;
            self.state.scan.generation += 1;
            self.state.waiters.resolve_scan_starts(Ok(()));
            info!("Scan start withdrawn");
            return;
        }
        if !self.state.scan.scanning {
            return;
        }
        self.state.scan.scanning = false;
        if let Some(task) = self.scan_task.take() {
            task.abort();
        }

        self.spawn_scan_stop();
        self.publish(SessionEvent::ScanStopped);
        info!("Scan stopped");
    }

    fn spawn_scan_stop(&self) {
        let radio = Arc::clone(&self.radio);
        tokio::spawn(async move {
            if let Err(e) = radio.scan_stop().await {
                warn!("Scan stop reported {}", e);
            }
        });
    }

    fn connect(&mut self, device: DeviceId, reply: Reply<SessionResult<Device>>) {
        if self.stopping {
            let _ = reply.send(Err(SessionError::SessionClosed));
            return;
        }

        if self.state.connections.is_connected_to(&device) {
            let connected = self.state.connections.state().device().cloned();
            let result = connected.ok_or(SessionError::NotConnected);
            let _ = reply.send(result);
            return;
        }

        let target = self.state.device_or_unseen(device.clone());
        match self.state.connections.request_connect(target) {
            Ok(effects) => {
                self.state.waiters.push_connect(device, reply);
                self.execute(effects);
            }
            Err(e) => {
                error!("Connect request rejected by state machine: {}", e);
                let _ = reply.send(Err(internal(e)));
            }
        }
    }

    fn disconnect(&mut self, reply: Reply<SessionResult<()>>) {
        match self.state.connections.request_disconnect() {
            Ok(effects) => self.execute(effects),
            Err(e) => {
                error!("Disconnect request rejected by state machine: {}", e);
                let _ = reply.send(Err(internal(e)));
                return;
            }
        }

        if self.state.connections.state().is_idle() {
            let _ = reply.send(Ok(()));
        } else {
            self.state.waiters.push_disconnect(reply);
        }
    }

    fn send(&mut self, body: String, reply: Reply<SessionResult<Option<MessageId>>>) {
        if self.stopping {
            let _ = reply.send(Err(SessionError::SessionClosed));
            return;
        }

        let now = self.state.now();
        let frame = match self.state.channel.prepare_send(&body, now) {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                let _ = reply.send(Ok(None));
                return;
            }
            Err(e) => {
                debug!("Send rejected: {}", e);
                let _ = reply.send(Err(e));
                return;
            }
        };

        if let Some(message) = self.state.channel.get(frame.message_id).cloned() {
            self.publish(SessionEvent::MessageAppended(message));
        }
        self.state.in_flight_writes += 1;
        self.state.waiters.push_send(frame.message_id, reply);

        let radio = Arc::clone(&self.radio);
        let completions = self.completion_sender.clone();
        let session = self.state.session;
        tokio::spawn(async move {
            let result = radio.write(frame.channel, frame.bytes).await;
            let _ = completions.send(Completion::WriteFinished {
                session,
                message_id: frame.message_id,
                result,
            });
        });
    }

    fn query_radio(&self, reply: Reply<RadioReadiness>) {
        let radio = Arc::clone(&self.radio);
        tokio::spawn(async move {
            let available = radio.query_availability().await;
            let permission_granted = radio.query_permission().await;
            let _ = reply.send(RadioReadiness {
                available,
                permission_granted,
            });
        });
    }

    fn begin_shutdown(&mut self, reply: Option<Reply<()>>) {
        if !self.stopping {
            info!("Session shutting down");
        }
        self.stopping = true;
        if let Some(reply) = reply {
            self.state.waiters.set_shutdown(reply);
        }

        self.stop_scan();
        if !self.state.connections.state().is_idle() {
            match self.state.connections.request_disconnect() {
                Ok(effects) => self.execute(effects),
                Err(e) => error!("Shutdown disconnect rejected by state machine: {}", e),
            }
        }
    }

    /// A `Failed` status has been read; the link returns to idle
    fn acknowledge_failure(&mut self) {
        match self.state.connections.acknowledge_failure() {
            Ok(effects) => self.execute(effects),
            Err(e) => error!("Failure acknowledgement rejected by state machine: {}", e),
        }
    }

    fn finish(&mut self) {
        if let Some((_, task)) = self.connect_task.take() {
            task.abort();
        }
        if let Some(task) = self.scan_task.take() {
            task.abort();
        }
        self.state.waiters.close();
        info!("Session task stopped");
    }

    // ------------------------------------------------------------------------
    // Radio events and completions
    // ------------------------------------------------------------------------

    fn handle_radio_event(&mut self, event: RadioEvent) {
        let now = self.state.now();
        match event {
            RadioEvent::Discovered(raw) => {
                let discovered = self.state.registry.on_discovered_at(raw, now).cloned();
                if let Some(device) = discovered {
                    trace!("Discovered {} at {} dBm", device.id, device.rssi);
                    self.publish(SessionEvent::DeviceDiscovered(device));
                }
            }
            RadioEvent::Received { channel, bytes } => {
                let bytes = if self.state.connections.current_attempt().is_some()
                    && !self.state.channel.is_open()
                {
                    match self.state.hold_early_inbound(channel, bytes) {
                        Ok(()) => return,
                        Err(bytes) => bytes,
                    }
                } else {
                    bytes
                };
                self.append_inbound(channel, &bytes, now);
            }
            RadioEvent::LinkLost { channel } => {
                match self.state.connections.on_link_lost(channel) {
                    Ok(effects) => self.execute(effects),
                    Err(e) => error!("Link loss rejected by state machine: {}", e),
                }
            }
        }
    }

    fn append_inbound(&mut self, channel: ChannelHandle, bytes: &[u8], now: Timestamp) {
        let appended = self.state.channel.on_receive(channel, bytes, now);
        for id in appended {
            if let Some(message) = self.state.channel.get(id).cloned() {
                self.publish(SessionEvent::MessageAppended(message));
            }
        }
    }

    fn handle_completion(&mut self, completion: Completion) {
        match completion {
            Completion::ConnectFinished { attempt, result } => {
                if matches!(&self.connect_task, Some((current, _)) if *current == attempt) {
                    self.connect_task = None;
                }
                match self.state.connections.on_connect_result(attempt, result) {
                    Ok(effects) => self.execute(effects),
                    Err(e) => error!("Connect completion rejected by state machine: {}", e),
                }
            }
            Completion::WriteFinished {
                session,
                message_id,
                result,
            } => self.finish_write(session, message_id, result),
            Completion::GraceExpired { channel } => {
                if self.state.draining == Some(channel) {
                    warn!(
                        "{} writes still pending after {:?}, disconnecting {}",
                        self.state.in_flight_writes,
                        self.config.drain_grace(),
                        channel
                    );
                    self.state.draining = None;
                    self.spawn_disconnect(channel);
                }
            }
            Completion::TeardownFinished { channel } => {
                match self.state.connections.on_teardown_complete(channel) {
                    Ok(effects) => self.execute(effects),
                    Err(e) => error!("Teardown completion rejected by state machine: {}", e),
                }
            }
            Completion::ScanStartFinished { generation, result } => {
                self.finish_scan_start(generation, result);
            }
            Completion::ScanFinished { generation } => {
                if generation == self.state.scan.generation && self.state.scan.scanning {
                    self.state.scan.scanning = false;
                    self.scan_task = None;
                    self.publish(SessionEvent::ScanStopped);
                    info!("Scan finished");
                }
            }
        }
    }

    fn finish_write(
        &mut self,
        session: u64,
        message_id: MessageId,
        result: RadioResult<()>,
    ) {
        if session != self.state.session {
            self.state.stale_writes += 1;
            debug!("Ignoring write completion for {} from an ended session", message_id);
            return;
        }
        self.state.in_flight_writes = self.state.in_flight_writes.saturating_sub(1);

        match result {
            Ok(()) => {
                if self.state.channel.mark_sent(message_id) {
                    self.publish(SessionEvent::DeliveryUpdated {
                        id: message_id,
                        status: DeliveryStatus::Sent,
                    });
                }
                self.state.waiters.resolve_send(message_id, Ok(Some(message_id)));
            }
            Err(e) => {
                warn!("Write of {} failed: {}", message_id, e);
                if self.state.channel.mark_failed(message_id) {
                    self.publish(SessionEvent::DeliveryUpdated {
                        id: message_id,
                        status: DeliveryStatus::Failed,
                    });
                }
                self.state.waiters.resolve_send(
                    message_id,
                    Err(SessionError::TransmitFailed {
                        message_id,
                        reason: e.to_string(),
                    }),
                );
            }
        }

        if self.state.in_flight_writes == 0 {
            if let Some(channel) = self.state.draining.take() {
                debug!("Writes drained, disconnecting {}", channel);
                self.spawn_disconnect(channel);
            }
        }
    }

    // ------------------------------------------------------------------------
    // Effects
    // ------------------------------------------------------------------------

    fn execute(&mut self, effects: Vec<ConnectionEffect>) {
        for effect in effects {
            match effect {
                ConnectionEffect::BeginConnect { device, attempt } => {
                    self.spawn_connect(device.id, attempt);
                }
                ConnectionEffect::CancelConnect { device, attempt } => {
                    if let Some((current, task)) = self.connect_task.take() {
                        if current == attempt {
                            task.abort();
                        } else {
                            self.connect_task = Some((current, task));
                        }
                    }
                    self.state.discard_early_inbound();
                    info!("Cancelled connect to {} ({})", device, attempt);
                    let cancelled = SessionError::ConnectCancelled {
                        device: device.clone(),
                    };
                    self.state.waiters.resolve_connect(&device, Err(cancelled));
                }
                ConnectionEffect::ConnectAbandoned { device } => {
                    debug!("Queued connect to {} abandoned", device);
                    let cancelled = SessionError::ConnectCancelled {
                        device: device.clone(),
                    };
                    self.state.waiters.resolve_connect(&device, Err(cancelled));
                }
                ConnectionEffect::BeginTeardown { device, channel } => {
                    info!("Disconnecting from {}", device);
                    self.state.channel.close_inbound();
                    if self.state.in_flight_writes == 0 {
                        self.spawn_disconnect(channel);
                    } else {
                        self.state.draining = Some(channel);
                        self.spawn_grace_timer(channel);
                    }
                }
                ConnectionEffect::ReleaseChannel { channel } => {
                    debug!("Releasing {} from a superseded attempt", channel);
                    let radio = Arc::clone(&self.radio);
                    tokio::spawn(async move {
                        if let Err(e) = radio.disconnect(channel).await {
                            warn!("Release of {} reported {}", channel, e);
                        }
                    });
                }
                ConnectionEffect::OpenSession { device, channel } => {
                    self.state.session += 1;
                    self.state.in_flight_writes = 0;
                    self.state.draining = None;
                    self.state.channel.open(channel);
                    info!("Connected to {} on {}", device.id, channel);
                    let now = self.state.now();
                    for bytes in self.state.take_early_inbound(channel) {
                        self.append_inbound(channel, &bytes, now);
                    }
                    let id = device.id.clone();
                    self.state.waiters.resolve_connect(&id, Ok(device));
                }
                ConnectionEffect::CloseSession => {
                    self.state.session += 1;
                    self.state.in_flight_writes = 0;
                    self.state.draining = None;
                    self.state.channel.reset();
                    self.state.waiters.fail_sends();
                }
                ConnectionEffect::ConnectFailed { device, reason } => {
                    self.state.discard_early_inbound();
                    warn!("Connect to {} failed: {}", device.id, reason);
                    let error = SessionError::from_failure(device.id.clone(), reason);
                    self.state.waiters.resolve_connect(&device.id, Err(error));
                    self.publish(SessionEvent::ConnectFailed { device, reason });
                }
                ConnectionEffect::Disconnected { device } => {
                    info!("Disconnected from {}", device.id);
                    self.publish(SessionEvent::Disconnected { device });
                    self.state.waiters.resolve_disconnects();
                }
                ConnectionEffect::LinkLost { device } => {
                    warn!("Link to {} lost", device.id);
                    self.publish(SessionEvent::LinkLost { device });
                    self.state.waiters.resolve_disconnects();
                }
                ConnectionEffect::StatusChanged(status) => {
                    debug!("Status: {}", status);
                    self.status.send_replace(status.clone());
                    self.publish(SessionEvent::StatusChanged(status));
                }
            }
        }

        if self.state.connections.state().is_idle() {
            self.state.waiters.resolve_disconnects();
        }
    }

    fn spawn_connect(&mut self, device: DeviceId, attempt: AttemptId) {
        info!("Connecting to {} ({})", device, attempt);
        let radio = Arc::clone(&self.radio);
        let completions = self.completion_sender.clone();
        let timeout = self.config.connect_timeout();

        let task = tokio::spawn(async move {
            let result = match tokio::time::timeout(timeout, radio.connect(&device)).await {
                Ok(Ok(channel)) => Ok(channel),
                Ok(Err(e)) => {
                    debug!("Radio refused connect to {}: {}", device, e);
                    Err(e.failure_reason())
                }
                Err(_) => Err(FailureReason::Timeout),
            };
            let _ = completions.send(Completion::ConnectFinished { attempt, result });
        });
        self.connect_task = Some((attempt, task));
    }

    fn spawn_disconnect(&self, channel: ChannelHandle) {
        let radio = Arc::clone(&self.radio);
        let completions = self.completion_sender.clone();
        tokio::spawn(async move {
            if let Err(e) = radio.disconnect(channel).await {
                warn!("Disconnect of {} reported {}", channel, e);
            }
            let _ = completions.send(Completion::TeardownFinished { channel });
        });
    }

    fn spawn_grace_timer(&self, channel: ChannelHandle) {
        let completions = self.completion_sender.clone();
        let grace = self.config.drain_grace();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let _ = completions.send(Completion::GraceExpired { channel });
        });
    }

    fn publish(&self, event: SessionEvent) {
        // No subscribers is not an error
        let _ = self.events.send(event);
    }
}

/// Map a capability error to what callers of scan and connect see
fn surface(error: RadioError) -> SessionError {
    match error {
        RadioError::Unavailable => SessionError::RadioUnavailable,
        RadioError::PermissionDenied => SessionError::PermissionDenied,
        other => SessionError::Radio(other),
    }
}

fn internal(error: TransitionError) -> SessionError {
    SessionError::Radio(RadioError::other(error.to_string()))
}
