//! btleplug-backed radio capability

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use bluelink_core::{
    ChannelHandle, DeviceId, RadioCapability, RadioError, RadioEvent, RadioEventSender,
    RadioResult,
};
use btleplug::api::Manager as _;
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use hashbrown::HashMap;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::BleRadioConfig;
use crate::connection::{release_peripheral, write_chunked, BleLink, ReleaseGuard};
use crate::discovery::{run_event_pump, start_scanning, stop_scanning};
use crate::error::{BleRadioError, BleResult};

// ----------------------------------------------------------------------------
// Shared State
// ----------------------------------------------------------------------------

/// State shared between the capability and its adapter event pump
pub(crate) struct Shared {
    config: BleRadioConfig,
    events: OnceLock<RadioEventSender>,
    peripherals: RwLock<HashMap<String, Peripheral>>,
    links: RwLock<HashMap<ChannelHandle, BleLink>>,
    scanning: AtomicBool,
}

impl Shared {
    pub fn config(&self) -> &BleRadioConfig {
        &self.config
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::SeqCst)
    }

    pub fn emit(&self, event: RadioEvent) {
        match self.events.get() {
            Some(sender) => {
                if sender.send(event).is_err() {
                    debug!("Session task is gone; dropping radio event");
                }
            }
            None => warn!("BLE radio used before attach; dropping radio event"),
        }
    }

    pub async fn remember_peripheral(&self, device_id: String, peripheral: Peripheral) {
        self.peripherals.write().await.insert(device_id, peripheral);
    }

    /// Drop the link held on `id`, returning its channel
    pub async fn forget_link_for(&self, id: &PeripheralId) -> Option<ChannelHandle> {
        let mut links = self.links.write().await;
        let channel = links
            .iter()
            .find(|(_, link)| &link.peripheral_id() == id)
            .map(|(channel, _)| *channel)?;
        links.remove(&channel);
        Some(channel)
    }
}

// ----------------------------------------------------------------------------
// BLE Radio
// ----------------------------------------------------------------------------

/// Native radio capability over the platform BLE stack
///
/// The adapter is acquired lazily on first use, so constructing the radio never fails
/// and an adapter-less machine reports itself as unavailable instead.
pub struct BleRadio {
    shared: Arc<Shared>,
    adapter: Mutex<Option<Adapter>>,
    pump: Mutex<Option<JoinHandle<()>>>,
    next_channel: AtomicU64,
    permission_denied: AtomicBool,
}

impl BleRadio {
    pub fn new(config: BleRadioConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                events: OnceLock::new(),
                peripherals: RwLock::new(HashMap::new()),
                links: RwLock::new(HashMap::new()),
                scanning: AtomicBool::new(false),
            }),
            adapter: Mutex::new(None),
            pump: Mutex::new(None),
            next_channel: AtomicU64::new(1),
            permission_denied: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &BleRadioConfig {
        &self.shared.config
    }

    /// Number of peripherals seen since startup
    pub async fn known_peripherals(&self) -> usize {
        self.shared.peripherals.read().await.len()
    }

    async fn adapter(&self) -> BleResult<Adapter> {
        let mut slot = self.adapter.lock().await;
        if let Some(adapter) = slot.as_ref() {
            return Ok(adapter.clone());
        }

        let manager = Manager::new()
            .await
            .map_err(|e| BleRadioError::ManagerUnavailable(e.to_string()))?;
        let adapters = manager.adapters().await.map_err(|e| match e {
            btleplug::Error::PermissionDenied => BleRadioError::PermissionDenied,
            other => BleRadioError::ManagerUnavailable(other.to_string()),
        })?;
        let index = self.shared.config.adapter_index;
        let adapter = adapters
            .get(index)
            .cloned()
            .ok_or(BleRadioError::AdapterNotAvailable {
                index,
                available: adapters.len(),
            })?;

        info!("BLE adapter {} initialized", index);
        *slot = Some(adapter.clone());
        Ok(adapter)
    }

    async fn ensure_event_pump(&self, adapter: &Adapter) {
        let mut pump = self.pump.lock().await;
        if pump.is_none() {
            let shared = Arc::clone(&self.shared);
            *pump = Some(tokio::spawn(run_event_pump(adapter.clone(), shared)));
        }
    }

    fn note(&self, err: BleRadioError) -> RadioError {
        if matches!(err, BleRadioError::PermissionDenied) {
            self.permission_denied.store(true, Ordering::SeqCst);
        }
        err.into()
    }
}

impl Drop for BleRadio {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.get_mut().take() {
            pump.abort();
        }
    }
}

#[async_trait]
impl RadioCapability for BleRadio {
    fn name(&self) -> &'static str {
        "ble"
    }

    fn attach(&self, events: RadioEventSender) {
        if self.shared.events.set(events).is_err() {
            warn!("BLE radio attached twice; keeping the first session");
        }
    }

    async fn query_availability(&self) -> bool {
        match self.adapter().await {
            Ok(_) => true,
            Err(e) => {
                debug!("BLE unavailable: {}", e);
                false
            }
        }
    }

    /// A recorded denial is checked against the adapter again on every query, so
    /// access granted in the meantime takes effect without restarting
    async fn query_permission(&self) -> bool {
        if !self.permission_denied.load(Ordering::SeqCst) {
            return true;
        }
        match self.adapter().await {
            Err(BleRadioError::PermissionDenied) => false,
            _ => {
                debug!("Clearing recorded BLE permission denial");
                self.permission_denied.store(false, Ordering::SeqCst);
                true
            }
        }
    }

    async fn scan_start(&self) -> RadioResult<()> {
        let adapter = self.adapter().await.map_err(|e| self.note(e))?;
        self.ensure_event_pump(&adapter).await;
        self.shared.scanning.store(true, Ordering::SeqCst);
        if let Err(e) = start_scanning(&adapter, &self.shared.config).await {
            self.shared.scanning.store(false, Ordering::SeqCst);
            return Err(self.note(e));
        }
        self.permission_denied.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn scan_stop(&self) -> RadioResult<()> {
        self.shared.scanning.store(false, Ordering::SeqCst);
        let adapter = self.adapter.lock().await.clone();
        match adapter {
            Some(adapter) => stop_scanning(&adapter).await.map_err(|e| self.note(e)),
            None => Ok(()),
        }
    }

    async fn connect(&self, device: &DeviceId) -> RadioResult<ChannelHandle> {
        let peripheral = self
            .shared
            .peripherals
            .read()
            .await
            .get(device.as_str())
            .cloned()
            .ok_or_else(|| BleRadioError::UnknownDevice {
                id: device.to_string(),
            })?;

        let channel = ChannelHandle::new(self.next_channel.fetch_add(1, Ordering::SeqCst));
        let guard = ReleaseGuard::new(release_peripheral(device.to_string(), peripheral.clone()));
        let opened = BleLink::open(
            device.to_string(),
            peripheral,
            channel,
            &self.shared.config,
            self.shared.events.get().cloned(),
        )
        .await;
        let link = match opened {
            Ok(link) => link,
            Err(e) => {
                // `open` already disconnected after a failed setup
                guard.disarm();
                return Err(self.note(e));
            }
        };

        self.shared.links.write().await.insert(channel, link);
        guard.disarm();
        self.permission_denied.store(false, Ordering::SeqCst);
        debug!("Link to {} on {}", device, channel);
        Ok(channel)
    }

    async fn disconnect(&self, channel: ChannelHandle) -> RadioResult<()> {
        let link = self
            .shared
            .links
            .write()
            .await
            .remove(&channel)
            .ok_or(BleRadioError::UnknownChannel {
                channel: channel.raw(),
            })?;
        link.close().await.map_err(RadioError::from)
    }

    async fn write(&self, channel: ChannelHandle, bytes: Vec<u8>) -> RadioResult<()> {
        let (peripheral, characteristic) = {
            let links = self.shared.links.read().await;
            let link = links.get(&channel).ok_or(BleRadioError::UnknownChannel {
                channel: channel.raw(),
            })?;
            (link.peripheral.clone(), link.write_characteristic.clone())
        };
        write_chunked(&peripheral, &characteristic, &bytes, &self.shared.config)
            .await
            .map_err(RadioError::from)
    }
}
