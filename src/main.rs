//! CLI entry point for field-gateway
//!
//! # Usage
//!
//! Start the gateway:
//! ```bash
//! field-gateway run --config config/gateway.toml
//! ```
//!
//! Print the effective configuration (file + `FIELD_GATEWAY_*` overrides):
//! ```bash
//! field-gateway check-config
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use field_gateway::{gateway, logging, GatewayConfig, GatewayContext};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "field-gateway")]
#[command(about = "Serial telemetry gateway for wireless field sensors", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the gateway until Ctrl+C
    Run {
        /// Configuration file
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Load and validate the configuration, then print it as TOML
    CheckConfig {
        /// Configuration file
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn load_config(path: Option<PathBuf>) -> Result<GatewayConfig> {
    let config = match path {
        Some(path) => GatewayConfig::load_from(&path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => GatewayConfig::load().context("Failed to load configuration")?,
    };
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => run(load_config(config)?).await,
        Commands::CheckConfig { config } => {
            let config = load_config(config)?;
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

async fn run(config: GatewayConfig) -> Result<()> {
    logging::init_from_config(&config).context("Failed to initialize logging")?;
    tracing::info!(
        device = %config.serial.device.display(),
        sync_period = ?config.sync.period,
        "Starting field gateway"
    );

    let ctx = Arc::new(
        GatewayContext::from_config(config)
            .await
            .context("Failed to set up gateway collaborators")?,
    );

    tokio::select! {
        result = gateway::run(Arc::clone(&ctx)) => {
            result.context("Gateway stopped")?;
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl+C")?;
            tracing::info!("Shutting down");
        }
    }
    Ok(())
}
