//! Session Store Handle
//!
//! The surface UI code talks to. Every call is a message to the session task; the handle
//! itself holds no session state and never touches the radio.

use std::sync::Arc;

use bluelink_core::{
    AuditEntry, ConnectionStatus, Device, DeviceId, Diagnostics, Message, MessageId,
    SessionError, SessionEvent, SessionResult,
};
use tokio::sync::{broadcast, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::logic::commands::{Command, CommandSender};
use crate::logic::RadioReadiness;

/// Cloneable handle to a running session
#[derive(Clone)]
pub struct SessionStore {
    command_sender: CommandSender,
    events: broadcast::Sender<SessionEvent>,
    status: watch::Receiver<ConnectionStatus>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl SessionStore {
    pub(crate) fn new(
        command_sender: CommandSender,
        events: broadcast::Sender<SessionEvent>,
        status: watch::Receiver<ConnectionStatus>,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            command_sender,
            events,
            status,
            task: Arc::new(Mutex::new(Some(task))),
        }
    }

    // ------------------------------------------------------------------------
    // Scanning
    // ------------------------------------------------------------------------

    /// Begin a scan that stops by itself after the configured duration
    ///
    /// Starting a scan while one is running is a no-op.
    pub async fn start_scan(&self) -> SessionResult<()> {
        self.ensure_radio_ready().await?;
        self.request(|reply| Command::StartScan { reply }).await?
    }

    pub async fn stop_scan(&self) -> SessionResult<()> {
        self.request(|reply| Command::StopScan { reply }).await
    }

    pub async fn is_scanning(&self) -> SessionResult<bool> {
        self.request(|reply| Command::IsScanning { reply }).await
    }

    /// Discovered devices, most recently seen first
    pub async fn devices(&self) -> SessionResult<Vec<Device>> {
        self.request(|reply| Command::Devices { reply }).await
    }

    pub async fn clear_devices(&self) -> SessionResult<()> {
        self.request(|reply| Command::ClearDevices { reply }).await
    }

    // ------------------------------------------------------------------------
    // Connection
    // ------------------------------------------------------------------------

    /// Connect to `device`, resolving once the link is up or the attempt ended
    ///
    /// Connecting to the device already connected resolves immediately. Connecting to a
    /// different device disconnects the current one first; an attempt superseded by a
    /// newer connect resolves with `ConnectCancelled`.
    pub async fn connect(&self, device: &DeviceId) -> SessionResult<Device> {
        self.ensure_radio_ready().await?;
        let device = device.clone();
        self.request(|reply| Command::Connect { device, reply })
            .await?
    }

    pub async fn connected_device(&self) -> SessionResult<Option<Device>> {
        let status = self.connection_status().await?;
        Ok(match status {
            ConnectionStatus::Connected { device } => Some(device),
            _ => None,
        })
    }

    /// Disconnect, resolving once the link is back to idle
    pub async fn disconnect(&self) -> SessionResult<()> {
        self.request(|reply| Command::Disconnect { reply }).await?
    }

    /// Current connection status
    ///
    /// A failed attempt shows as `Failed` until it has been read here once (or a new
    /// connect or disconnect is issued); afterwards the status is `Idle`.
    pub async fn connection_status(&self) -> SessionResult<ConnectionStatus> {
        self.request(|reply| Command::Status { reply }).await
    }

    // ------------------------------------------------------------------------
    // Messages
    // ------------------------------------------------------------------------

    /// Send `body` on the active link
    ///
    /// Resolves with the message id once the radio acknowledged the write. Blank input is
    /// a no-op and resolves with `None`.
    pub async fn send(&self, body: &str) -> SessionResult<Option<MessageId>> {
        let body = body.to_string();
        self.request(|reply| Command::Send { body, reply }).await?
    }

    /// History of the current session, in order
    pub async fn messages(&self) -> SessionResult<Vec<Message>> {
        self.request(|reply| Command::Messages { reply }).await
    }

    // ------------------------------------------------------------------------
    // Radio and diagnostics
    // ------------------------------------------------------------------------

    pub async fn is_bluetooth_available(&self) -> SessionResult<bool> {
        Ok(self.radio_readiness().await?.available)
    }

    pub async fn permission_granted(&self) -> SessionResult<bool> {
        Ok(self.radio_readiness().await?.permission_granted)
    }

    pub async fn radio_readiness(&self) -> SessionResult<RadioReadiness> {
        self.request(|reply| Command::QueryRadio { reply }).await
    }

    pub async fn diagnostics(&self) -> SessionResult<Diagnostics> {
        self.request(|reply| Command::Diagnostics { reply }).await
    }

    /// Most recent connection transitions, oldest first
    pub async fn audit_trail(&self, limit: usize) -> SessionResult<Vec<AuditEntry>> {
        self.request(|reply| Command::AuditTrail { limit, reply })
            .await
    }

    // ------------------------------------------------------------------------
    // Observation
    // ------------------------------------------------------------------------

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Status updates as they happen; a `Failed` value holds until it is reported
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Disconnect, stop scanning and stop the session task
    pub async fn shutdown(&self) -> SessionResult<()> {
        match self.request(|reply| Command::Shutdown { reply }).await {
            Ok(()) | Err(SessionError::SessionClosed) => {}
            Err(e) => return Err(e),
        }

        let task = self.task.lock().await.take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("Session task ended abnormally: {}", e);
            }
        }
        debug!("Session store shut down");
        Ok(())
    }

    async fn ensure_radio_ready(&self) -> SessionResult<()> {
        let readiness = self.radio_readiness().await?;
        if !readiness.available {
            return Err(SessionError::RadioUnavailable);
        }
        if !readiness.permission_granted {
            return Err(SessionError::PermissionDenied);
        }
        Ok(())
    }

    async fn request<R>(
        &self,
        make: impl FnOnce(oneshot::Sender<R>) -> Command,
    ) -> SessionResult<R> {
        let (reply, response) = oneshot::channel();
        self.command_sender
            .send(make(reply))
            .await
            .map_err(|_| SessionError::SessionClosed)?;
        response.await.map_err(|_| SessionError::SessionClosed)
    }
}
