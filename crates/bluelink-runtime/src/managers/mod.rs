//! Stateful managers driven by the session task

pub mod connection;

pub use connection::{ConnectionManager, ConnectionStats};
