//! BLE link setup and data transmission

use bluelink_core::{ChannelHandle, RadioEvent, RadioEventSender};
use btleplug::api::{Characteristic, Peripheral as _, WriteType};
use btleplug::platform::{Peripheral, PeripheralId};
use futures::stream::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::BleRadioConfig;
use crate::error::{BleRadioError, BleResult};
use crate::protocol::{chunk_payload, UART_NOTIFY_CHARACTERISTIC_UUID, UART_WRITE_CHARACTERISTIC_UUID};

// ----------------------------------------------------------------------------
// Link
// ----------------------------------------------------------------------------

/// An established link to one peripheral
pub(crate) struct BleLink {
    pub device: String,
    pub peripheral: Peripheral,
    pub write_characteristic: Characteristic,
    notifications: JoinHandle<()>,
}

impl BleLink {
    /// Connect, discover the UART characteristics and start forwarding notifications
    ///
    /// A link that fails after the radio connected is disconnected again before the
    /// error is returned.
    pub async fn open(
        device: String,
        peripheral: Peripheral,
        channel: ChannelHandle,
        config: &BleRadioConfig,
        events: Option<RadioEventSender>,
    ) -> BleResult<Self> {
        peripheral
            .connect()
            .await
            .map_err(BleRadioError::from_connect)?;
        info!("Connected to {}", device);

        match Self::establish(device.clone(), peripheral.clone(), channel, config, events).await {
            Ok(link) => Ok(link),
            Err(e) => {
                error!("Link setup for {} failed: {}", device, e);
                if let Err(e) = peripheral.disconnect().await {
                    warn!("Failed to release {} after setup failure: {}", device, e);
                }
                Err(e)
            }
        }
    }

    async fn establish(
        device: String,
        peripheral: Peripheral,
        channel: ChannelHandle,
        config: &BleRadioConfig,
        events: Option<RadioEventSender>,
    ) -> BleResult<Self> {
        timeout(config.service_discovery_timeout(), peripheral.discover_services())
            .await
            .map_err(|_| BleRadioError::ServiceDiscoveryTimeout)?
            .map_err(|e| BleRadioError::ServiceDiscoveryFailed(e.to_string()))?;

        let characteristics = peripheral.characteristics();
        let find = |uuid: Uuid, label: &str| {
            characteristics
                .iter()
                .find(|c| c.uuid == uuid)
                .cloned()
                .ok_or_else(|| BleRadioError::CharacteristicNotFound {
                    characteristic: label.to_string(),
                })
        };
        let write_characteristic = find(UART_WRITE_CHARACTERISTIC_UUID, "uart write")?;
        let notify_characteristic = find(UART_NOTIFY_CHARACTERISTIC_UUID, "uart notify")?;

        peripheral
            .subscribe(&notify_characteristic)
            .await
            .map_err(|e| BleRadioError::SubscriptionFailed(e.to_string()))?;
        let mut stream = peripheral
            .notifications()
            .await
            .map_err(|e| BleRadioError::SubscriptionFailed(e.to_string()))?;

        let label = device.clone();
        let notifications = tokio::spawn(async move {
            while let Some(notification) = stream.next().await {
                if notification.uuid != UART_NOTIFY_CHARACTERISTIC_UUID {
                    continue;
                }
                let Some(events) = events.as_ref() else {
                    continue;
                };
                if events
                    .send(RadioEvent::Received {
                        channel,
                        bytes: notification.value,
                    })
                    .is_err()
                {
                    break;
                }
            }
            debug!("Notification stream for {} ended", label);
        });

        Ok(Self {
            device,
            peripheral,
            write_characteristic,
            notifications,
        })
    }

    pub fn peripheral_id(&self) -> PeripheralId {
        self.peripheral.id()
    }

    /// Stop forwarding notifications and disconnect
    pub async fn close(self) -> BleResult<()> {
        self.notifications.abort();
        self.peripheral
            .disconnect()
            .await
            .map_err(|e| BleRadioError::ConnectionFailed(e.to_string()))?;
        info!("Disconnected from {}", self.device);
        Ok(())
    }
}

impl Drop for BleLink {
    fn drop(&mut self) {
        self.notifications.abort();
    }
}

// ----------------------------------------------------------------------------
// Release Guard
// ----------------------------------------------------------------------------

/// Runs its release action if dropped while still armed
///
/// A connect future can be dropped by a timeout or a cancelled attempt after the
/// peripheral already connected; the guard disconnects it in that case.
pub(crate) struct ReleaseGuard<F: FnOnce()> {
    release: Option<F>,
}

impl<F: FnOnce()> ReleaseGuard<F> {
    pub fn new(release: F) -> Self {
        Self {
            release: Some(release),
        }
    }

    /// The link was handed over (or already cleaned up); nothing to release
    pub fn disarm(mut self) {
        self.release = None;
    }
}

impl<F: FnOnce()> Drop for ReleaseGuard<F> {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

/// Release action disconnecting a peripheral in the background
pub(crate) fn release_peripheral(device: String, peripheral: Peripheral) -> impl FnOnce() + Send {
    move || match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            warn!("Connect to {} abandoned; releasing the peripheral", device);
            handle.spawn(async move {
                if let Err(e) = peripheral.disconnect().await {
                    debug!("Release of {} reported {}", device, e);
                }
            });
        }
        Err(_) => warn!("No runtime left to release {}", device),
    }
}

// ----------------------------------------------------------------------------
// Transmission
// ----------------------------------------------------------------------------

/// Write a payload in characteristic-sized chunks
pub(crate) async fn write_chunked(
    peripheral: &Peripheral,
    characteristic: &Characteristic,
    bytes: &[u8],
    config: &BleRadioConfig,
) -> BleResult<()> {
    let write_type = if config.write_with_response {
        WriteType::WithResponse
    } else {
        WriteType::WithoutResponse
    };

    for chunk in chunk_payload(bytes, config.write_chunk_size) {
        peripheral
            .write(characteristic, chunk, write_type)
            .await
            .map_err(|e| BleRadioError::WriteFailed(e.to_string()))?;
    }

    debug!("Wrote {} bytes", bytes.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn flag() -> (Arc<AtomicBool>, impl FnOnce() + Send) {
        let released = Arc::new(AtomicBool::new(false));
        let setter = Arc::clone(&released);
        (released, move || setter.store(true, Ordering::SeqCst))
    }

    #[test]
    fn test_armed_guard_releases_on_drop() {
        let (released, release) = flag();
        drop(ReleaseGuard::new(release));
        assert!(released.load(Ordering::SeqCst));
    }

    #[test]
    fn test_disarmed_guard_keeps_link() {
        let (released, release) = flag();
        ReleaseGuard::new(release).disarm();
        assert!(!released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_abandoned_connect_releases() {
        let (released, release) = flag();
        let connect = async move {
            let guard = ReleaseGuard::new(release);
            std::future::pending::<()>().await;
            guard.disarm();
        };

        assert!(timeout(Duration::from_millis(10), connect).await.is_err());
        assert!(released.load(Ordering::SeqCst));
    }
}
