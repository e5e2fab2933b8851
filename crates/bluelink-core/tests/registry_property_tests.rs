//! Property-based tests for device registry deduplication and ordering

use bluelink_core::{DeviceRegistry, RawDiscovery, Timestamp};
use proptest::prelude::*;
use std::collections::{HashMap, HashSet};

/// Small id alphabet so rediscovery happens often
fn arb_device_id() -> impl Strategy<Value = String> {
    prop::sample::select(vec!["A", "B", "C", "D", "E"]).prop_map(str::to_string)
}

fn arb_discovery() -> impl Strategy<Value = (RawDiscovery, u64)> {
    (
        arb_device_id(),
        prop::option::of("[a-z]{1,8}"),
        -100i16..=0i16,
        0u64..1_000u64,
    )
        .prop_map(|(id, name, rssi, at)| (RawDiscovery::new(id, name, rssi), at))
}

proptest! {
    /// Property: one entry per id, whatever the discovery sequence
    #[test]
    fn one_entry_per_id(discoveries in prop::collection::vec(arb_discovery(), 0..64)) {
        let mut registry = DeviceRegistry::new();
        let mut ids = HashSet::new();
        for (raw, at) in discoveries {
            ids.insert(raw.id.clone().unwrap());
            registry.on_discovered_at(raw, Timestamp::new(at));
        }

        let listed = registry.list();
        prop_assert_eq!(listed.len(), ids.len());
        let listed_ids: HashSet<String> = listed.iter().map(|d| d.id.to_string()).collect();
        prop_assert_eq!(listed_ids.len(), listed.len());
    }

    /// Property: the stored rssi is the most recently ingested value
    #[test]
    fn rssi_is_last_ingested(discoveries in prop::collection::vec(arb_discovery(), 1..64)) {
        let mut registry = DeviceRegistry::new();
        let mut last_rssi = HashMap::new();
        for (raw, at) in discoveries {
            last_rssi.insert(raw.id.clone().unwrap(), raw.rssi);
            registry.on_discovered_at(raw, Timestamp::new(at));
        }

        for device in registry.list() {
            prop_assert_eq!(Some(&device.rssi), last_rssi.get(device.id.as_str()));
        }
    }

    /// Property: list is sorted by last seen descending, then id ascending
    #[test]
    fn list_is_ranked(discoveries in prop::collection::vec(arb_discovery(), 0..64)) {
        let mut registry = DeviceRegistry::new();
        for (raw, at) in discoveries {
            registry.on_discovered_at(raw, Timestamp::new(at));
        }

        let listed = registry.list();
        for pair in listed.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            prop_assert!(
                a.last_seen_at > b.last_seen_at
                    || (a.last_seen_at == b.last_seen_at && a.id < b.id)
            );
        }
    }

    /// Property: ingesting the same record twice never changes the device count
    #[test]
    fn rediscovery_is_idempotent((raw, at) in arb_discovery()) {
        let mut registry = DeviceRegistry::new();
        registry.on_discovered_at(raw.clone(), Timestamp::new(at));
        let before = registry.len();
        registry.on_discovered_at(raw, Timestamp::new(at + 1));
        prop_assert_eq!(registry.len(), before);
        prop_assert_eq!(registry.stats().updated, 1);
    }
}

#[test]
fn scenario_a_rediscovery_updates_rssi() {
    let mut registry = DeviceRegistry::new();
    registry.on_discovered_at(RawDiscovery::new("A", None, -40), Timestamp::new(1));
    registry.on_discovered_at(RawDiscovery::new("A", None, -55), Timestamp::new(2));

    let devices = registry.list();
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].id.as_str(), "A");
    assert_eq!(devices[0].rssi, -55);
}
