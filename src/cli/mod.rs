pub mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "iot-router")]
#[command(about = "Route IoT measurements, messages and control data to downstream services")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the router and its HTTP surface
    Serve(ServeArgs),
    /// Validate a config file and print the effective settings
    CheckConfig(CheckConfigArgs),
}

#[derive(clap::Args)]
pub struct ServeArgs {
    /// Path to the TOML config (defaults apply when omitted)
    #[arg(long, env = "IOT_ROUTER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Override the listen address from the config
    #[arg(long, env = "IOT_ROUTER_LISTEN")]
    pub listen: Option<String>,

    /// JSON seed file for the in-memory routing repository
    #[arg(long, env = "IOT_ROUTER_SEED")]
    pub seed: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub json_logs: bool,
}

#[derive(clap::Args)]
pub struct CheckConfigArgs {
    /// Path to the TOML config
    #[arg(long, default_value = crate::config::DEFAULT_CONFIG_FILENAME)]
    pub config: PathBuf,
}
