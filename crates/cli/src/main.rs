//! Failover Agent CLI
//!
//! A command-line tool for inspecting the role, heartbeat freshness,
//! container health and decision history of a failover agent.

mod client;
mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{health, history, status};

/// Failover Agent CLI
#[derive(Parser)]
#[command(name = "foctl")]
#[command(author, version, about = "CLI for the container failover agent", long_about = None)]
pub struct Cli {
    /// Agent URL (can also be set via FOCTL_AGENT_URL env var)
    #[arg(long, env = "FOCTL_AGENT_URL", default_value = "http://localhost:8000")]
    pub agent_url: String,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show role, heartbeat freshness and container states
    Status,

    /// Show recorded role decisions
    History {
        /// Show only the latest N decisions
        #[arg(long, short)]
        limit: Option<usize>,
    },

    /// Show component health and readiness
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize client
    let client = client::ApiClient::new(&cli.agent_url)?;

    // Execute command
    match cli.command {
        Commands::Status => status::show_status(&client, cli.format).await?,
        Commands::History { limit } => history::show_history(&client, limit, cli.format).await?,
        Commands::Health => health::show_health(&client, cli.format).await?,
    }

    Ok(())
}
