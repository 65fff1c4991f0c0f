//! Recorded role decisions of one agent

use anyhow::Result;
use colored::Colorize;
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{
    color_status, describe_reason, format_age, format_timestamp, print_json, print_warning,
    OutputFormat,
};

/// Row for decisions table
#[derive(Tabled)]
struct DecisionRow {
    #[tabled(rename = "Recorded")]
    recorded_at: String,
    #[tabled(rename = "Age")]
    age: String,
    #[tabled(rename = "Role")]
    role: String,
    #[tabled(rename = "Reason")]
    reason: String,
}

/// Show decision history, newest last; `limit` keeps only the latest entries
pub async fn show_history(
    client: &ApiClient,
    limit: Option<usize>,
    format: OutputFormat,
) -> Result<()> {
    let mut history = client.history().await?;

    if let Some(limit) = limit {
        let skip = history.decisions.len().saturating_sub(limit);
        history.decisions.drain(..skip);
    }

    match format {
        OutputFormat::Json => print_json(&history)?,
        OutputFormat::Table => {
            println!("{}", "Role Decisions".bold());
            println!("{}", "=".repeat(50));
            println!("Node: {}", history.node.cyan());
            println!();

            if history.decisions.is_empty() {
                print_warning("No decisions yet, the agent may still be in its startup grace period");
                return Ok(());
            }

            let rows: Vec<DecisionRow> = history
                .decisions
                .iter()
                .map(|d| DecisionRow {
                    recorded_at: format_timestamp(&d.recorded_at),
                    age: format_age(Some(d.age_secs)),
                    role: color_status(&d.role),
                    reason: describe_reason(&d.reason).to_string(),
                })
                .collect();

            let table = tabled::Table::new(rows)
                .with(tabled::settings::Style::rounded())
                .to_string();
            println!("{}", table);
            println!("\nTotal: {} decisions", history.decisions.len());
        }
    }

    Ok(())
}
