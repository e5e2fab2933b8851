//! BLE protocol constants and utilities
//!
//! Links speak the Nordic UART layout: the central writes to one characteristic and
//! receives notifications on another, both under a single primary service.

use uuid::Uuid;

// ----------------------------------------------------------------------------
// BLE Service and Characteristic UUIDs
// ----------------------------------------------------------------------------

/// UART service UUID
pub const UART_SERVICE_UUID: Uuid = Uuid::from_u128(0x6E400001_B5A3_F393_E0A9_E50E24DCCA9E);

/// Characteristic the central writes outgoing data to
pub const UART_WRITE_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x6E400002_B5A3_F393_E0A9_E50E24DCCA9E);

/// Characteristic the peripheral notifies incoming data on
pub const UART_NOTIFY_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x6E400003_B5A3_F393_E0A9_E50E24DCCA9E);

/// Conservative payload size that fits the negotiated MTU on common stacks
pub const DEFAULT_WRITE_CHUNK: usize = 244;

/// Largest attribute value a single write may carry
pub const MAX_ATT_PAYLOAD: usize = 512;

// ----------------------------------------------------------------------------
// Protocol Utilities
// ----------------------------------------------------------------------------

/// Split a payload into characteristic-sized writes, preserving byte order
pub fn chunk_payload(bytes: &[u8], chunk_size: usize) -> impl Iterator<Item = &[u8]> {
    bytes.chunks(chunk_size.max(1))
}

/// Whether an advertisement passes the configured scan filters
pub fn accepts_advertisement(
    name: Option<&str>,
    services: &[Uuid],
    name_prefix: Option<&str>,
    filter_by_service: bool,
) -> bool {
    if filter_by_service && !services.contains(&UART_SERVICE_UUID) {
        return false;
    }
    match name_prefix {
        Some(prefix) => name.map(|n| n.starts_with(prefix)).unwrap_or(false),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunking_preserves_order_and_bounds() {
        let payload: Vec<u8> = (0..=255u8).cycle().take(600).collect();
        let chunks: Vec<&[u8]> = chunk_payload(&payload, DEFAULT_WRITE_CHUNK).collect();

        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.len() <= DEFAULT_WRITE_CHUNK));
        assert_eq!(chunks.concat(), payload);
    }

    #[test]
    fn test_small_payload_is_one_write() {
        let chunks: Vec<&[u8]> = chunk_payload(b"hi", DEFAULT_WRITE_CHUNK).collect();
        assert_eq!(chunks, vec![b"hi".as_slice()]);
    }

    #[test]
    fn test_zero_chunk_size_does_not_panic() {
        assert_eq!(chunk_payload(b"abc", 0).count(), 3);
    }

    #[test]
    fn test_name_prefix_filter() {
        assert!(accepts_advertisement(Some("Sensor-1"), &[], Some("Sensor"), false));
        assert!(!accepts_advertisement(Some("Beacon"), &[], Some("Sensor"), false));
        assert!(!accepts_advertisement(None, &[], Some("Sensor"), false));
        assert!(accepts_advertisement(None, &[], None, false));
    }

    #[test]
    fn test_service_filter() {
        assert!(!accepts_advertisement(Some("x"), &[], None, true));
        assert!(accepts_advertisement(Some("x"), &[UART_SERVICE_UUID], None, true));
    }
}
