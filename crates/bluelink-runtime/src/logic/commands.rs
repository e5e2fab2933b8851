//! Messages consumed by the session task
//!
//! `Command`s come from `SessionStore` handles and carry a oneshot reply. `Completion`s
//! are posted back by the background work the task spawns (connects, writes,
//! teardown, scan timers).

use bluelink_core::{
    AttemptId, AuditEntry, ChannelHandle, ConnectionStatus, Device, DeviceId, Diagnostics,
    FailureReason, Message, MessageId, RadioResult, SessionResult,
};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

pub(crate) type Reply<T> = oneshot::Sender<T>;

/// Radio readiness as reported by the capability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RadioReadiness {
    pub available: bool,
    pub permission_granted: bool,
}

#[derive(Debug)]
pub(crate) enum Command {
    StartScan {
        reply: Reply<SessionResult<()>>,
    },
    StopScan {
        reply: Reply<()>,
    },
    IsScanning {
        reply: Reply<bool>,
    },
    Devices {
        reply: Reply<Vec<Device>>,
    },
    ClearDevices {
        reply: Reply<()>,
    },
    Connect {
        device: DeviceId,
        reply: Reply<SessionResult<Device>>,
    },
    Disconnect {
        reply: Reply<SessionResult<()>>,
    },
    Send {
        body: String,
        reply: Reply<SessionResult<Option<MessageId>>>,
    },
    Messages {
        reply: Reply<Vec<Message>>,
    },
    Status {
        reply: Reply<ConnectionStatus>,
    },
    QueryRadio {
        reply: Reply<RadioReadiness>,
    },
    Diagnostics {
        reply: Reply<Diagnostics>,
    },
    AuditTrail {
        limit: usize,
        reply: Reply<Vec<AuditEntry>>,
    },
    Shutdown {
        reply: Reply<()>,
    },
}

impl Command {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Command::StartScan { .. } => "StartScan",
            Command::StopScan { .. } => "StopScan",
            Command::IsScanning { .. } => "IsScanning",
            Command::Devices { .. } => "Devices",
            Command::ClearDevices { .. } => "ClearDevices",
            Command::Connect { .. } => "Connect",
            Command::Disconnect { .. } => "Disconnect",
            Command::Send { .. } => "Send",
            Command::Messages { .. } => "Messages",
            Command::Status { .. } => "Status",
            Command::QueryRadio { .. } => "QueryRadio",
            Command::Diagnostics { .. } => "Diagnostics",
            Command::AuditTrail { .. } => "AuditTrail",
            Command::Shutdown { .. } => "Shutdown",
        }
    }
}

/// Results of background work spawned by the session task
#[derive(Debug)]
pub(crate) enum Completion {
    ConnectFinished {
        attempt: AttemptId,
        result: Result<ChannelHandle, FailureReason>,
    },
    WriteFinished {
        session: u64,
        message_id: MessageId,
        result: RadioResult<()>,
    },
    /// Pending writes did not drain within the grace period
    GraceExpired { channel: ChannelHandle },
    TeardownFinished { channel: ChannelHandle },
    ScanStartFinished {
        generation: u64,
        result: RadioResult<()>,
    },
    ScanFinished { generation: u64 },
}

pub(crate) type CommandSender = mpsc::Sender<Command>;
pub(crate) type CommandReceiver = mpsc::Receiver<Command>;
pub(crate) type CompletionSender = mpsc::UnboundedSender<Completion>;
pub(crate) type CompletionReceiver = mpsc::UnboundedReceiver<Completion>;
