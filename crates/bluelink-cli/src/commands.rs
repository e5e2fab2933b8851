//! Command handlers for the Bluelink CLI

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use bluelink_core::{Direction, Message, SessionError, SessionEvent};

use crate::app::BluelinkApp;
use crate::cli::Commands;
use crate::config::AppConfig;
use crate::error::{CliError, Result};

/// Command dispatcher for handling CLI commands
pub struct CommandDispatcher;

impl CommandDispatcher {
    /// Execute a session command; the session is shut down afterwards
    pub async fn execute(command: Commands, app: BluelinkApp) -> Result<()> {
        let result = match command {
            Commands::Scan { seconds, json } => Self::handle_scan(&app, seconds, json).await,
            Commands::Chat { device, transcript } => {
                Self::handle_chat(&app, &device, transcript.as_deref()).await
            }
            Commands::Status { json } => Self::handle_status(&app, json).await,
            Commands::Config { .. } => Ok(()),
        };
        app.shutdown().await?;
        result
    }

    /// Show the effective configuration, or write it out with `--init`
    pub fn handle_config(
        config: &AppConfig,
        path: Option<PathBuf>,
        init: bool,
        force: bool,
    ) -> Result<()> {
        if !init {
            print!("{}", config.to_toml()?);
            return Ok(());
        }

        let path = path
            .or_else(AppConfig::default_config_path)
            .ok_or_else(|| CliError::Config("no config directory on this platform".to_string()))?;
        config.save_to_file(&path, force)?;
        println!("Wrote configuration to {}", path.display());
        Ok(())
    }

    async fn handle_scan(app: &BluelinkApp, seconds: Option<u64>, json: bool) -> Result<()> {
        let duration = seconds.map(Duration::from_secs);
        info!("Scanning...");
        let devices = app.scan(duration).await?;

        if json {
            println!("{}", serde_json::to_string_pretty(&devices)?);
            return Ok(());
        }

        if devices.is_empty() {
            println!("No devices found");
        } else {
            println!("{:<24} {:<24} {:>6}", "ID", "NAME", "RSSI");
            for device in &devices {
                println!(
                    "{:<24} {:<24} {:>6}",
                    device.id,
                    device.name.as_deref().unwrap_or("-"),
                    device.rssi
                );
            }
        }
        Ok(())
    }

    async fn handle_status(app: &BluelinkApp, json: bool) -> Result<()> {
        let report = app.status_report().await?;
        if json {
            println!("{}", serde_json::to_string_pretty(&report)?);
            return Ok(());
        }

        println!("Radio:       {}", report.radio);
        println!("Available:   {}", report.readiness.available);
        println!("Permission:  {}", report.readiness.permission_granted);
        println!("Connection:  {}", report.status);
        println!("Devices:     {}", report.diagnostics.devices_known);
        println!(
            "Messages:    {} sent, {} failed, {} received",
            report.diagnostics.messages_sent,
            report.diagnostics.messages_failed,
            report.diagnostics.messages_received
        );
        if !report.recent_transitions.is_empty() {
            println!("Recent transitions:");
            for entry in &report.recent_transitions {
                println!(
                    "  {} {} -> {} ({})",
                    entry.timestamp, entry.from_state, entry.to_state, entry.event
                );
            }
        }
        Ok(())
    }

    async fn handle_chat(app: &BluelinkApp, query: &str, transcript: Option<&Path>) -> Result<()> {
        let store = app.store();
        let readiness = store.radio_readiness().await?;
        if !readiness.available {
            return Err(SessionError::RadioUnavailable.into());
        }

        let device = app.resolve_device(query).await?;
        println!("Connecting to {}...", device.display_name());
        let device = store.connect(&device.id).await?;
        println!("Connected to {}. Type /help for commands.", device.display_name());

        let show_timestamps = app.config().cli.show_timestamps;
        let mut events = store.subscribe();
        let printer = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(SessionEvent::MessageAppended(message))
                        if message.direction == Direction::Incoming =>
                    {
                        println!("{}", format_message(&message, show_timestamps));
                    }
                    Ok(SessionEvent::LinkLost { device }) => {
                        println!("*** Link to {} lost", device.display_name());
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Chat view skipped {} events", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        let prompt = app.config().cli.prompt.clone();
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            eprint!("{}", prompt);
            let Some(line) = lines.next_line().await? else {
                break;
            };
            match line.trim() {
                "/quit" | "/exit" => break,
                "/help" => print_help(),
                "/history" => {
                    for message in store.messages().await? {
                        println!("{}", format_message(&message, show_timestamps));
                    }
                }
                "/status" => println!("{}", store.connection_status().await?),
                _ => match store.send(&line).await {
                    Ok(_) => {}
                    Err(SessionError::NotConnected) => {
                        println!("*** Not connected");
                        break;
                    }
                    Err(e) => println!("*** {}", e),
                },
            }
        }

        if let Some(path) = transcript {
            app.transcript(device).await?.write_to(path)?;
        }
        store.disconnect().await?;
        printer.abort();
        Ok(())
    }
}

fn print_help() {
    println!("/history  show the conversation so far");
    println!("/status   show the connection status");
    println!("/quit     disconnect and exit");
}

/// One chat line, e.g. `> hi [sent]` or `< hello`
pub fn format_message(message: &Message, show_timestamps: bool) -> String {
    let arrow = match message.direction {
        Direction::Outgoing => '>',
        Direction::Incoming => '<',
    };
    let mut line = String::new();
    if show_timestamps {
        line.push_str(&format!("[{}] ", message.timestamp));
    }
    line.push(arrow);
    line.push(' ');
    line.push_str(&message.body);
    if let Some(status) = message.delivery_status {
        line.push_str(&format!(" [{}]", status));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use bluelink_core::{MessageId, Timestamp};

    #[test]
    fn test_format_outgoing_with_status() {
        let message = Message::outgoing(MessageId::new(1), "hi".to_string(), Timestamp::new(5));
        assert_eq!(format_message(&message, false), "> hi [pending]");
    }

    #[test]
    fn test_format_incoming() {
        let message = Message::incoming(MessageId::new(2), "yo".to_string(), Timestamp::new(5));
        assert_eq!(format_message(&message, false), "< yo");
        assert!(format_message(&message, true).ends_with("< yo"));
    }
}
