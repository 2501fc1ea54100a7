// ============================================
// File: crates/overlan-switch/src/main.rs
// ============================================
//! # Overlan Switch Entry Point
//!
//! ## Creation Reason
//! Binary wrapping the switch library: CLI parsing, logging setup,
//! configuration loading and the run-until-Ctrl+C loop.
//!
//! ## Usage
//! ```bash
//! overlan-switch start --config /etc/overlan/switch.toml
//! overlan-switch validate --config /etc/overlan/switch.toml
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - `RUST_LOG` overrides `logging.level` from the config
//! - Kernel bridges and taps need root or CAP_NET_ADMIN
//!
//! ## Last Modified
//! v0.1.0 - Initial CLI implementation

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use overlan_switch::{Collaborators, Switch, SwitchConfig};

// ============================================
// CLI Definition
// ============================================

/// Overlay virtual-Ethernet switch
#[derive(Parser, Debug)]
#[command(name = "overlan-switch")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the switch
    Start {
        /// Path to configuration file
        #[arg(short, long, default_value = "/etc/overlan/switch.toml")]
        config: PathBuf,
    },

    /// Validate configuration file
    Validate {
        /// Path to configuration file
        #[arg(short, long, default_value = "/etc/overlan/switch.toml")]
        config: PathBuf,
    },
}

// ============================================
// Main
// ============================================

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Start { config } => cmd_start(config).await,
        Commands::Validate { config } => cmd_validate(config).await,
    };

    if let Err(e) = result {
        init_logging("info");
        error!("{e:#}");
        std::process::exit(1);
    }
}

// ============================================
// Commands
// ============================================

/// Runs the switch until Ctrl+C.
async fn cmd_start(config_path: PathBuf) -> anyhow::Result<()> {
    let config = SwitchConfig::load(&config_path).await?;
    init_logging(&config.logging.level);

    info!("Starting overlan switch v{}", env!("CARGO_PKG_VERSION"));
    let switch = Arc::new(Switch::new(config, Collaborators::default())?);
    switch.start()?;
    info!(id = %switch.id(), alias = %switch.alias(), tenants = ?switch.tenants(), "Switch ready");

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal");

    switch.stop().await?;
    info!(uptime_secs = switch.uptime().as_secs(), "Shutdown complete");
    Ok(())
}

/// Loads and checks a configuration file, then prints a summary.
async fn cmd_validate(config_path: PathBuf) -> anyhow::Result<()> {
    let config = SwitchConfig::load(&config_path).await?;

    println!("✅ Configuration is valid");
    println!();
    println!("Switch:");
    println!("   Alias:      {}", config.alias);
    println!("   Listen:     {} ({})", config.listen, config.protocol);
    println!();
    for net in &config.network {
        println!("Network {}:", net.name);
        println!(
            "   Bridge:     {} ({}, mtu {})",
            net.bridge.name, net.bridge.provider, net.bridge.mtu
        );
        if let Some(address) = &net.bridge.address {
            println!("   Address:    {address}");
        }
        if let Some(subnet) = &net.subnet {
            println!("   Subnet:     {}-{} / {}", subnet.start, subnet.end, subnet.netmask);
        }
        println!("   Routes:     {}", net.routes.len());
        println!("   Logins:     {}", net.credentials.len());
        println!();
    }
    if !config.firewall.is_empty() {
        println!("Firewall:");
        println!("   Extra rules: {}", config.firewall.len());
        println!();
    }
    Ok(())
}

// ============================================
// Helpers
// ============================================

/// Installs the global subscriber; `RUST_LOG` wins over `level`.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .try_init()
        .ok();
}
