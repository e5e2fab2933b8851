//! Application wiring: radio selection, session startup and reports

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info};

use bluelink_ble::BleRadio;
use bluelink_core::{
    AuditEntry, ConnectionStatus, Device, Diagnostics, Message, RadioCapability, SessionEvent,
    Timestamp,
};
use bluelink_runtime::{RadioReadiness, SessionBuilder, SessionStore, SimulatedRadio};

use crate::config::AppConfig;
use crate::error::{CliError, Result};

// ----------------------------------------------------------------------------
// Reports
// ----------------------------------------------------------------------------

/// Everything `status` prints
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub radio: &'static str,
    pub readiness: RadioReadiness,
    pub status: String,
    pub connected_device: Option<Device>,
    pub diagnostics: Diagnostics,
    pub recent_transitions: Vec<AuditEntry>,
}

/// Conversation exported at the end of a chat
#[derive(Debug, Clone, Serialize)]
pub struct Transcript {
    pub device: Device,
    pub exported_at: Timestamp,
    pub messages: Vec<Message>,
}

impl Transcript {
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        info!("Transcript written to {}", path.display());
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Application
// ----------------------------------------------------------------------------

/// A running session plus the configuration it was built from
pub struct BluelinkApp {
    store: SessionStore,
    config: AppConfig,
    radio_name: &'static str,
}

impl BluelinkApp {
    /// Pick the radio and start the session task
    pub fn start(config: AppConfig, simulated: bool) -> Result<Self> {
        let radio: Arc<dyn RadioCapability> = if simulated || config.cli.simulated {
            Arc::new(SimulatedRadio::new(config.simulation.clone()))
        } else {
            Arc::new(BleRadio::new(config.ble.clone()))
        };
        let radio_name = radio.name();
        info!("Starting session on the {} radio", radio_name);

        let store = SessionBuilder::new(radio)
            .with_config(config.session.clone())
            .start()?;

        Ok(Self {
            store,
            config,
            radio_name,
        })
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Run one scan to completion and return the device list
    pub async fn scan(&self, duration: Option<Duration>) -> Result<Vec<Device>> {
        let mut events = self.store.subscribe();
        self.store.start_scan().await?;

        match duration {
            Some(duration) => {
                tokio::time::sleep(duration).await;
                self.store.stop_scan().await?;
            }
            None => wait_for_scan_end(&mut events).await,
        }

        Ok(self.store.devices().await?)
    }

    /// Find a device by id or case-insensitive name, scanning if it is not known yet
    pub async fn resolve_device(&self, query: &str) -> Result<Device> {
        let known = self.store.devices().await?;
        if let Some(device) = match_device(&known, query) {
            return Ok(device);
        }

        debug!("{} not in the device list; scanning", query);
        let scanned = self.scan(None).await?;
        match_device(&scanned, query).ok_or_else(|| CliError::DeviceNotFound {
            query: query.to_string(),
        })
    }

    pub async fn status_report(&self) -> Result<StatusReport> {
        let readiness = self.store.radio_readiness().await?;
        let status: ConnectionStatus = self.store.connection_status().await?;
        Ok(StatusReport {
            radio: self.radio_name,
            readiness,
            status: status.to_string(),
            connected_device: status.device().cloned().filter(|_| status.is_connected()),
            diagnostics: self.store.diagnostics().await?,
            recent_transitions: self.store.audit_trail(self.config.cli.audit_entries).await?,
        })
    }

    pub async fn transcript(&self, device: Device) -> Result<Transcript> {
        Ok(Transcript {
            device,
            exported_at: Timestamp::now(),
            messages: self.store.messages().await?,
        })
    }

    pub async fn shutdown(self) -> Result<()> {
        self.store.shutdown().await?;
        info!("Session closed");
        Ok(())
    }
}

async fn wait_for_scan_end(events: &mut tokio::sync::broadcast::Receiver<SessionEvent>) {
    loop {
        match events.recv().await {
            Ok(SessionEvent::ScanStopped) | Err(RecvError::Closed) => break,
            Ok(_) | Err(RecvError::Lagged(_)) => {}
        }
    }
}

/// Exact id match first, then advertised name
pub fn match_device(devices: &[Device], query: &str) -> Option<Device> {
    let query = query.trim();
    devices
        .iter()
        .find(|d| d.id.as_str().eq_ignore_ascii_case(query))
        .or_else(|| {
            devices.iter().find(|d| {
                d.name
                    .as_deref()
                    .map(|name| name.eq_ignore_ascii_case(query))
                    .unwrap_or(false)
            })
        })
        .cloned()
}
