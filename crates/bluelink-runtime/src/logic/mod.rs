//! Session logic
//!
//! The session task and the state it owns. Nothing here is reachable from outside the
//! crate except through `SessionStore`.

pub(crate) mod commands;
pub(crate) mod state;
pub(crate) mod task;

pub use commands::RadioReadiness;
