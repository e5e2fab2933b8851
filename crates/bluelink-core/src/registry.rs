//! Device registry
//!
//! Deduplicates scan results by device id and produces a stable, ranked device list.

use hashbrown::HashMap;

use crate::types::{Device, DeviceId, RawDiscovery, Timestamp};

// ----------------------------------------------------------------------------
// Device Registry
// ----------------------------------------------------------------------------

/// Set of discovered devices keyed by id
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: HashMap<DeviceId, Device>,
    stats: RegistryStats,
}

/// Diagnostic counters for the registry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Discovery records dropped for lacking an id
    pub malformed_dropped: u64,
    /// Records that created a new entry
    pub inserted: u64,
    /// Records that refreshed an existing entry
    pub updated: u64,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ingest a discovery record observed now
    pub fn on_discovered(&mut self, raw: RawDiscovery) -> Option<&Device> {
        self.on_discovered_at(raw, Timestamp::now())
    }

    /// Ingest a discovery record observed at `now`
    ///
    /// Returns the resulting entry, or `None` when the record was malformed.
    pub fn on_discovered_at(&mut self, raw: RawDiscovery, now: Timestamp) -> Option<&Device> {
        let Some(id) = raw.id.and_then(DeviceId::new) else {
            self.stats.malformed_dropped += 1;
            tracing::debug!("Dropping discovery record without device id");
            return None;
        };

        let name = raw.name.filter(|n| !n.trim().is_empty());
        let stats = &mut self.stats;
        let device = self
            .devices
            .entry(id.clone())
            .and_modify(|existing| {
                existing.rssi = raw.rssi;
                existing.last_seen_at = existing.last_seen_at.max(now);
                if name.is_some() {
                    existing.name = name.clone();
                }
                stats.updated += 1;
            })
            .or_insert_with(|| {
                stats.inserted += 1;
                tracing::debug!("Discovered new device {}", id);
                Device {
                    id: id.clone(),
                    name: name.clone(),
                    rssi: raw.rssi,
                    discovered_at: now,
                    last_seen_at: now,
                }
            });
        Some(device)
    }

    /// Devices ordered by most recently seen first, ties broken by id
    pub fn list(&self) -> Vec<Device> {
        let mut devices: Vec<Device> = self.devices.values().cloned().collect();
        devices.sort_by(|a, b| {
            b.last_seen_at
                .cmp(&a.last_seen_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        devices
    }

    pub fn get(&self, id: &DeviceId) -> Option<&Device> {
        self.devices.get(id)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn clear(&mut self) {
        self.devices.clear();
    }

    pub fn stats(&self) -> RegistryStats {
        self.stats
    }
}
