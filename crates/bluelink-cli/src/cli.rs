//! Command-line interface definitions and parsing

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "bluelink", author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Use the simulated radio instead of the platform Bluetooth stack
    #[arg(long)]
    pub simulated: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Scan for nearby devices and list them, most recently seen first
    Scan {
        /// Scan duration in seconds (defaults to the configured duration)
        #[arg(short, long)]
        seconds: Option<u64>,
        /// Print the device list as JSON
        #[arg(long)]
        json: bool,
    },
    /// Connect to a device and exchange messages over stdin/stdout
    Chat {
        /// Device id or advertised name
        device: String,
        /// Write the conversation to this file as JSON when the chat ends
        #[arg(short, long)]
        transcript: Option<PathBuf>,
    },
    /// Show radio readiness, connection status and session counters
    Status {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show or initialise the configuration file
    Config {
        /// Write the default configuration to the config path
        #[arg(long)]
        init: bool,
        /// Overwrite an existing file when initialising
        #[arg(long, requires = "init")]
        force: bool,
    },
}
