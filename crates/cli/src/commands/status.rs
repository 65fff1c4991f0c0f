//! Role, heartbeat and container status of one agent

use anyhow::Result;
use colored::Colorize;
use tabled::Tabled;

use crate::client::{AgentStatus, ApiClient};
use crate::output::{
    color_status, describe_reason, format_age, format_timestamp, print_json, print_warning,
    OutputFormat,
};

/// Row for containers table
#[derive(Tabled)]
struct ContainerRow {
    #[tabled(rename = "Container")]
    name: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Down For")]
    down_for: String,
    #[tabled(rename = "Observed")]
    observed: String,
    #[tabled(rename = "Last Error")]
    last_error: String,
}

/// Show agent status
pub async fn show_status(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let status = client.status().await?;

    match format {
        OutputFormat::Json => print_json(&status)?,
        OutputFormat::Table => print_status(&status),
    }

    Ok(())
}

fn print_status(status: &AgentStatus) {
    println!("{}", "Failover Agent Status".bold());
    println!("{}", "=".repeat(50));
    println!("Node:          {}", status.node.cyan());
    println!(
        "Role:          {} (intended {})",
        color_status(&status.role),
        status.intended_role
    );
    println!(
        "Engaged:       {}",
        if status.engaged {
            "yes".green().to_string()
        } else {
            "no, startup grace".yellow().to_string()
        }
    );
    println!("Local Health:  {}", color_status(&status.local_health));
    println!();

    let hb = &status.heartbeat;
    println!("{}", "Heartbeat".bold());
    println!(
        "  Freshness:   {} (last {} ago, timeout {})",
        color_status(if hb.fresh { "fresh" } else { "stale" }),
        format_age(hb.age_secs),
        format_age(Some(hb.timeout_secs))
    );
    println!(
        "  Received:    {} ({} rejected)",
        hb.received, hb.rejected
    );
    if let Some(peer) = &hb.last_peer {
        println!("  Last Peer:   {}", peer);
    }
    println!();

    if let Some(decision) = &status.last_decision {
        println!(
            "Last Decision: {} because {} at {} ({} ago)",
            color_status(&decision.role),
            describe_reason(&decision.reason),
            format_timestamp(&decision.recorded_at),
            format_age(Some(decision.age_secs))
        );
        println!();
    }

    if status.split_brain_suspected {
        print_warning("Peer has kept heartbeating while this node is active: both nodes may be active");
    }

    if status.containers.is_empty() {
        print_warning("No managed containers reported");
        return;
    }

    let rows: Vec<ContainerRow> = status
        .containers
        .iter()
        .map(|c| ContainerRow {
            name: c.name.clone(),
            state: color_status(&c.state),
            down_for: format_age(c.down_for_secs),
            observed: match c.observed_secs_ago {
                Some(secs) => format!("{} ago", format_age(Some(secs))),
                None => "never".to_string(),
            },
            last_error: c.last_error.clone().unwrap_or_else(|| "-".to_string()),
        })
        .collect();

    let table = tabled::Table::new(rows)
        .with(tabled::settings::Style::rounded())
        .to_string();
    println!("{}", table);
}
