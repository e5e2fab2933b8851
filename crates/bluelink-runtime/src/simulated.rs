//! Simulated Radio
//!
//! A deterministic `RadioCapability` for tests, demos and machines without a Bluetooth
//! adapter. Devices, connect outcomes and write outcomes are scripted through
//! `SimulationConfig`; tests drive inbound traffic and link loss explicitly.

use hashbrown::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::OnceLock;

use async_trait::async_trait;
use bluelink_core::{
    ChannelHandle, DeviceId, RadioCapability, RadioError, RadioEvent, RadioEventSender,
    RadioResult, RawDiscovery,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tokio::time::{sleep, Duration};
use tracing::{debug, trace, warn};

// ----------------------------------------------------------------------------
// Simulation Configuration
// ----------------------------------------------------------------------------

/// How the simulated radio answers a connect to a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectBehavior {
    #[default]
    Accept,
    Reject,
    Unreachable,
    /// Never resolves; only the connect timeout ends the attempt
    Hang,
}

/// How the simulated radio answers writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteBehavior {
    #[default]
    Ack,
    Fail,
    Hang,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulatedDevice {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_rssi")]
    pub rssi: i16,
    #[serde(default)]
    pub connect: ConnectBehavior,
}

fn default_rssi() -> i16 {
    -60
}

impl SimulatedDevice {
    pub fn new(id: impl Into<String>, name: Option<&str>, rssi: i16) -> Self {
        Self {
            id: id.into(),
            name: name.map(str::to_string),
            rssi,
            connect: ConnectBehavior::Accept,
        }
    }

    pub fn with_connect(mut self, behavior: ConnectBehavior) -> Self {
        self.connect = behavior;
        self
    }
}

/// Scripted behavior of the simulated radio
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub available: bool,
    pub permission_granted: bool,
    /// Devices reported on every scan start
    pub devices: Vec<SimulatedDevice>,
    pub scan_latency_ms: u64,
    /// The radio refuses to start scanning
    pub scan_fails: bool,
    pub connect_latency_ms: u64,
    pub write_latency_ms: u64,
    pub write: WriteBehavior,
    /// Acknowledged writes come back as inbound data
    pub echo: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            available: true,
            permission_granted: true,
            devices: Vec::new(),
            scan_latency_ms: 0,
            scan_fails: false,
            connect_latency_ms: 20,
            write_latency_ms: 5,
            write: WriteBehavior::Ack,
            echo: false,
        }
    }
}

impl SimulationConfig {
    /// No latency anywhere; used by tests
    pub fn instant() -> Self {
        Self {
            connect_latency_ms: 0,
            write_latency_ms: 0,
            ..Self::default()
        }
    }

    /// A pair of devices answering with an echo, used by the CLI simulation mode
    pub fn demo() -> Self {
        Self {
            devices: vec![
                SimulatedDevice::new("SIM-00:01", Some("Sim Sensor"), -48),
                SimulatedDevice::new("SIM-00:02", Some("Sim Beacon"), -71),
            ],
            echo: true,
            ..Self::default()
        }
    }

    pub fn with_device(mut self, device: SimulatedDevice) -> Self {
        self.devices.push(device);
        self
    }

    pub fn with_write(mut self, behavior: WriteBehavior) -> Self {
        self.write = behavior;
        self
    }

    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }
}

/// Record of the primitives the session layer invoked
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RadioLog {
    pub scans_started: u32,
    pub connect_calls: Vec<DeviceId>,
    pub writes: Vec<(ChannelHandle, Vec<u8>)>,
    pub disconnects: Vec<ChannelHandle>,
}

// ----------------------------------------------------------------------------
// Simulated Radio
// ----------------------------------------------------------------------------

pub struct SimulatedRadio {
    config: RwLock<SimulationConfig>,
    events: OnceLock<RadioEventSender>,
    links: Mutex<HashMap<ChannelHandle, DeviceId>>,
    log: Mutex<RadioLog>,
    next_channel: AtomicU64,
    scanning: AtomicBool,
}

impl Default for SimulatedRadio {
    fn default() -> Self {
        Self::new(SimulationConfig::default())
    }
}

impl SimulatedRadio {
    pub fn new(config: SimulationConfig) -> Self {
        Self {
            config: RwLock::new(config),
            events: OnceLock::new(),
            links: Mutex::new(HashMap::new()),
            log: Mutex::new(RadioLog::default()),
            next_channel: AtomicU64::new(1),
            scanning: AtomicBool::new(false),
        }
    }

    pub async fn set_available(&self, available: bool) {
        self.config.write().await.available = available;
    }

    pub async fn set_permission(&self, granted: bool) {
        self.config.write().await.permission_granted = granted;
    }

    pub async fn set_write_behavior(&self, behavior: WriteBehavior) {
        self.config.write().await.write = behavior;
    }

    pub async fn set_connect_behavior(&self, device: &str, behavior: ConnectBehavior) {
        let mut config = self.config.write().await;
        if let Some(entry) = config.devices.iter_mut().find(|d| d.id == device) {
            entry.connect = behavior;
            return;
        }
        config
            .devices
            .push(SimulatedDevice::new(device, None, default_rssi()).with_connect(behavior));
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::SeqCst)
    }

    /// Channel currently linked to `device`
    pub async fn channel_for(&self, device: &DeviceId) -> Option<ChannelHandle> {
        self.links
            .lock()
            .await
            .iter()
            .find(|(_, linked)| *linked == device)
            .map(|(channel, _)| *channel)
    }

    pub async fn log(&self) -> RadioLog {
        self.log.lock().await.clone()
    }

    /// Report a discovery outside of a scan start
    pub fn inject_discovery(&self, raw: RawDiscovery) {
        self.emit(RadioEvent::Discovered(raw));
    }

    /// Deliver inbound bytes as if the remote device wrote them
    pub fn inject_incoming(&self, channel: ChannelHandle, bytes: impl Into<Vec<u8>>) {
        self.emit(RadioEvent::Received {
            channel,
            bytes: bytes.into(),
        });
    }

    /// Drop the link as if the remote device went out of range
    pub async fn drop_link(&self, channel: ChannelHandle) {
        self.links.lock().await.remove(&channel);
        self.emit(RadioEvent::LinkLost { channel });
    }

    fn emit(&self, event: RadioEvent) {
        match self.events.get() {
            Some(sender) => {
                if sender.send(event).is_err() {
                    trace!("Session gone, dropping simulated radio event");
                }
            }
            None => warn!("Simulated radio event before attach"),
        }
    }
}

#[async_trait]
impl RadioCapability for SimulatedRadio {
    fn name(&self) -> &'static str {
        "simulated"
    }

    fn attach(&self, events: RadioEventSender) {
        if self.events.set(events).is_err() {
            warn!("Simulated radio attached twice; keeping the first session");
        }
    }

    async fn query_availability(&self) -> bool {
        self.config.read().await.available
    }

    async fn query_permission(&self) -> bool {
        self.config.read().await.permission_granted
    }

    async fn scan_start(&self) -> RadioResult<()> {
        let config = self.config.read().await.clone();
        if !config.available {
            return Err(RadioError::Unavailable);
        }
        if !config.permission_granted {
            return Err(RadioError::PermissionDenied);
        }
        if config.scan_latency_ms > 0 {
            sleep(Duration::from_millis(config.scan_latency_ms)).await;
        }
        if config.scan_fails {
            return Err(RadioError::other("simulated scan failure"));
        }

        self.scanning.store(true, Ordering::SeqCst);
        self.log.lock().await.scans_started += 1;
        for device in config.devices {
            self.emit(RadioEvent::Discovered(RawDiscovery {
                id: Some(device.id),
                name: device.name,
                rssi: device.rssi,
            }));
        }
        Ok(())
    }

    async fn scan_stop(&self) -> RadioResult<()> {
        self.scanning.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn connect(&self, device: &DeviceId) -> RadioResult<ChannelHandle> {
        self.log.lock().await.connect_calls.push(device.clone());

        let (latency, behavior) = {
            let config = self.config.read().await;
            let behavior = config
                .devices
                .iter()
                .find(|d| d.id == device.as_str())
                .map(|d| d.connect);
            (config.connect_latency_ms, behavior)
        };
        if latency > 0 {
            sleep(Duration::from_millis(latency)).await;
        }

        match behavior {
            Some(ConnectBehavior::Accept) => {
                let channel = ChannelHandle::new(self.next_channel.fetch_add(1, Ordering::SeqCst));
                self.links.lock().await.insert(channel, device.clone());
                debug!("Simulated link to {} on {}", device, channel);
                Ok(channel)
            }
            Some(ConnectBehavior::Reject) => Err(RadioError::Rejected {
                reason: "simulated rejection".to_string(),
            }),
            Some(ConnectBehavior::Hang) => std::future::pending().await,
            Some(ConnectBehavior::Unreachable) | None => Err(RadioError::Unreachable {
                reason: format!("{} is not in range", device),
            }),
        }
    }

    async fn disconnect(&self, channel: ChannelHandle) -> RadioResult<()> {
        self.links.lock().await.remove(&channel);
        self.log.lock().await.disconnects.push(channel);
        Ok(())
    }

    async fn write(&self, channel: ChannelHandle, bytes: Vec<u8>) -> RadioResult<()> {
        if !self.links.lock().await.contains_key(&channel) {
            return Err(RadioError::UnknownChannel {
                channel: channel.raw(),
            });
        }
        self.log.lock().await.writes.push((channel, bytes.clone()));

        let (latency, behavior, echo) = {
            let config = self.config.read().await;
            (config.write_latency_ms, config.write, config.echo)
        };
        if latency > 0 {
            sleep(Duration::from_millis(latency)).await;
        }

        match behavior {
            WriteBehavior::Ack => {
                if echo {
                    self.emit(RadioEvent::Received { channel, bytes });
                }
                Ok(())
            }
            WriteBehavior::Fail => Err(RadioError::WriteFailed {
                reason: "simulated write failure".to_string(),
            }),
            WriteBehavior::Hang => std::future::pending().await,
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
