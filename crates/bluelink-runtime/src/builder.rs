//! Session Builder API
//!
//! Picks the radio capability once, validates configuration, wires the channels and
//! spawns the session task. Must be called from inside a tokio runtime.

use std::sync::Arc;

use bluelink_core::{
    create_radio_event_channel, ConnectionStatus, RadioCapability, SessionConfig, SessionResult,
};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{info, warn};

use crate::logic::task::SessionTask;
use crate::store::SessionStore;

// ----------------------------------------------------------------------------
// Session Builder
// ----------------------------------------------------------------------------

pub struct SessionBuilder {
    radio: Arc<dyn RadioCapability>,
    config: SessionConfig,
}

impl SessionBuilder {
    pub fn new(radio: Arc<dyn RadioCapability>) -> Self {
        Self {
            radio,
            config: SessionConfig::default(),
        }
    }

    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Attach the capability and spawn the session task
    pub fn start(self) -> SessionResult<SessionStore> {
        self.config.validate()?;
        if self.config.auto_connect {
            warn!("auto_connect is set but automatic reconnection is not supported; ignoring");
        }

        let (radio_sender, radio_receiver) = create_radio_event_channel();
        self.radio.attach(radio_sender);

        let (command_sender, command_receiver) = mpsc::channel(self.config.command_buffer_size);
        let (completion_sender, completion_receiver) = mpsc::unbounded_channel();
        let (event_sender, _) = broadcast::channel(self.config.event_buffer_size);
        let (status_sender, status_receiver) = watch::channel(ConnectionStatus::Idle);

        info!("Starting session store on {} radio", self.radio.name());

        let task = SessionTask::new(
            self.config,
            self.radio,
            command_receiver,
            radio_receiver,
            completion_sender,
            completion_receiver,
            event_sender.clone(),
            status_sender,
        );
        let handle = tokio::spawn(task.run());

        Ok(SessionStore::new(
            command_sender,
            event_sender,
            status_receiver,
            handle,
        ))
    }
}
