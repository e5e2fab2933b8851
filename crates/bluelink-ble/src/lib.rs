//! Bluetooth Low Energy radio capability for Bluelink
//!
//! This crate provides [`BleRadio`], an implementation of the `RadioCapability` trait from
//! `bluelink-core` on top of btleplug, so the session layer can run against real
//! hardware.
//!
//! ## Architecture
//!
//! - [`config`] - radio configuration and settings
//! - [`error`] - error types specific to the BLE radio
//! - [`protocol`] - UART service UUIDs, scan filtering and write chunking
//! - `discovery` - scanning and the adapter event pump
//! - `connection` - link setup, notifications and chunked writes
//! - `radio` - the capability implementation
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use bluelink_ble::{BleRadio, BleRadioConfig};
//! use bluelink_runtime::SessionBuilder;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let radio = BleRadio::new(BleRadioConfig::new().with_name_prefix("Sensor"));
//! let store = SessionBuilder::new(Arc::new(radio)).start()?;
//! store.start_scan().await?;
//! # Ok(())
//! # }
//! ```
//!
//! Links use the Nordic UART layout: outgoing text is written to the write
//! characteristic in chunks of at most `write_chunk_size` bytes, and notifications on
//! the notify characteristic are forwarded as inbound data.

pub mod config;
mod connection;
mod discovery;
pub mod error;
pub mod protocol;
mod radio;

// Public API exports
pub use config::BleRadioConfig;
pub use discovery::UNKNOWN_RSSI;
pub use error::{BleRadioError, BleResult};
pub use protocol::{
    UART_NOTIFY_CHARACTERISTIC_UUID, UART_SERVICE_UUID, UART_WRITE_CHARACTERISTIC_UUID,
};
pub use radio::BleRadio;
