//! BLE device discovery
//!
//! Translates adapter events into radio events. Discovered peripherals are cached by
//! device id so a later connect can find them again; disconnects reported by the adapter
//! for a peripheral with an open link become `LinkLost`.

use std::sync::Arc;

use bluelink_core::{RadioEvent, RawDiscovery};
use btleplug::api::{
    BDAddr, Central, CentralEvent, Peripheral as _, PeripheralProperties, ScanFilter,
};
use btleplug::platform::{Adapter, PeripheralId};
use futures::stream::StreamExt;
use tracing::{debug, error, info, trace};

use crate::config::BleRadioConfig;
use crate::error::{BleRadioError, BleResult};
use crate::protocol::{accepts_advertisement, UART_SERVICE_UUID};
use crate::radio::Shared;

/// RSSI recorded when the platform did not report one
pub const UNKNOWN_RSSI: i16 = i16::MIN;

// ----------------------------------------------------------------------------
// Scanning
// ----------------------------------------------------------------------------

pub(crate) fn scan_filter(config: &BleRadioConfig) -> ScanFilter {
    let services = if config.filter_by_service {
        vec![UART_SERVICE_UUID]
    } else {
        Vec::new()
    };
    ScanFilter { services }
}

pub(crate) async fn start_scanning(adapter: &Adapter, config: &BleRadioConfig) -> BleResult<()> {
    adapter
        .start_scan(scan_filter(config))
        .await
        .map_err(|e| match e {
            btleplug::Error::PermissionDenied => BleRadioError::PermissionDenied,
            other => BleRadioError::ScanFailed(other.to_string()),
        })?;
    info!("Started BLE scanning");
    Ok(())
}

pub(crate) async fn stop_scanning(adapter: &Adapter) -> BleResult<()> {
    adapter
        .stop_scan()
        .await
        .map_err(|e| BleRadioError::ScanFailed(e.to_string()))?;
    info!("Stopped BLE scanning");
    Ok(())
}

// ----------------------------------------------------------------------------
// Device Identity
// ----------------------------------------------------------------------------

/// Stable id for a peripheral: its address where the platform exposes one
///
/// CoreBluetooth hides addresses and reports all zeros, so the platform
/// peripheral id is used there instead.
pub(crate) fn device_id_for(address: BDAddr, peripheral_id: &PeripheralId) -> String {
    if address != BDAddr::default() {
        address.to_string()
    } else {
        format!("{:?}", peripheral_id)
    }
}

/// Build a discovery record if the advertisement passes the configured filters
pub(crate) fn discovery_from(
    device_id: String,
    properties: &PeripheralProperties,
    config: &BleRadioConfig,
) -> Option<RawDiscovery> {
    let name = properties.local_name.as_deref();
    if !accepts_advertisement(
        name,
        &properties.services,
        config.name_prefix.as_deref(),
        config.filter_by_service,
    ) {
        return None;
    }
    Some(RawDiscovery::new(
        device_id,
        properties.local_name.clone(),
        properties.rssi.unwrap_or(UNKNOWN_RSSI),
    ))
}

// ----------------------------------------------------------------------------
// Event Pump
// ----------------------------------------------------------------------------

/// Forward adapter events until the adapter stream ends
pub(crate) async fn run_event_pump(adapter: Adapter, shared: Arc<Shared>) {
    let mut events = match adapter.events().await {
        Ok(events) => events,
        Err(e) => {
            error!("{}", BleRadioError::EventStreamFailed(e.to_string()));
            return;
        }
    };

    while let Some(event) = events.next().await {
        match event {
            CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                if !shared.is_scanning() {
                    continue;
                }
                if let Some(discovery) = observe(&adapter, &id, &shared).await {
                    shared.emit(RadioEvent::Discovered(discovery));
                }
            }
            CentralEvent::DeviceDisconnected(id) => {
                if let Some(channel) = shared.forget_link_for(&id).await {
                    debug!("Peripheral {:?} dropped link {}", id, channel);
                    shared.emit(RadioEvent::LinkLost { channel });
                }
            }
            other => trace!("Ignoring adapter event {:?}", other),
        }
    }
    debug!("BLE adapter event stream ended");
}

async fn observe(adapter: &Adapter, id: &PeripheralId, shared: &Shared) -> Option<RawDiscovery> {
    let peripheral = adapter.peripheral(id).await.ok()?;
    let properties = peripheral.properties().await.ok()??;
    let device_id = device_id_for(properties.address, id);
    let discovery = discovery_from(device_id.clone(), &properties, shared.config())?;
    shared.remember_peripheral(device_id, peripheral).await;
    Some(discovery)
}
