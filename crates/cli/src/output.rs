//! Output formatting utilities

use chrono::{DateTime, Local, Utc};
use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Print any response as pretty JSON
pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Format an age in seconds as "42s", "3m 07s" or "2h 05m"
pub fn format_age(secs: Option<f64>) -> String {
    let Some(secs) = secs else {
        return "-".to_string();
    };
    let total = secs.max(0.0).round() as u64;

    if total >= 3600 {
        format!("{}h {:02}m", total / 3600, (total % 3600) / 60)
    } else if total >= 60 {
        format!("{}m {:02}s", total / 60, total % 60)
    } else {
        format!("{}s", total)
    }
}

/// Format a timestamp in local time
pub fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.with_timezone(&Local)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

/// Color status based on value
pub fn color_status(status: &str) -> String {
    match status.to_lowercase().as_str() {
        "active" | "healthy" | "running" | "fresh" => status.green().to_string(),
        "passive" => status.blue().to_string(),
        "degraded" | "unknown" | "stale" => status.yellow().to_string(),
        "down" | "stopped" | "unhealthy" => status.red().to_string(),
        _ => status.to_string(),
    }
}

/// Human-readable label for a decision reason
pub fn describe_reason(reason: &str) -> &str {
    match reason {
        "startup" => "startup",
        "local_containers_down" => "local containers down",
        "heartbeat_lost" => "heartbeat lost",
        "heartbeat_recovered" => "peer already active",
        other => other,
    }
}
