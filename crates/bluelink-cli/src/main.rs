//! Bluelink CLI entry point

use clap::Parser;
use tracing::{error, info};

use bluelink_cli::{
    app::BluelinkApp,
    cli::{Cli, Commands},
    commands::CommandDispatcher,
    config::AppConfig,
    error::Result,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    let config = load_configuration(&cli)?;

    if let Commands::Config { init, force } = cli.command {
        return CommandDispatcher::handle_config(&config, cli.config.clone(), init, force);
    }

    let app = BluelinkApp::start(config, cli.simulated)?;

    if let Err(e) = CommandDispatcher::execute(cli.command, app).await {
        error!("Command failed: {}", e);
        std::process::exit(1);
    }

    info!("Bluelink exited successfully");
    Ok(())
}

/// Setup logging based on verbosity level
fn setup_logging(verbose: bool) {
    let log_level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Load configuration from defaults, the config file and `BLUELINK_` variables
fn load_configuration(cli: &Cli) -> Result<AppConfig> {
    if let Some(path) = &cli.config {
        info!("Loading configuration from: {}", path.display());
    }
    AppConfig::load(cli.config.as_deref())
}
