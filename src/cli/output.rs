//! Output formatting helpers for CLI commands

use crate::classifier::EndpointTier;
use crate::cli::probe::ProbeReport;
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};
use serde_json::json;
use std::fmt::Write;

/// Format a probe report as a table followed by a summary
pub fn format_probe_table(report: &ProbeReport) -> String {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["#", "Status", "Bytes", "Settled", "Error"]);

    for r in &report.results {
        let status_str = match (r.ok, r.status) {
            (true, Some(status)) => status.to_string().green().to_string(),
            (false, Some(429)) => "429".yellow().to_string(),
            (false, Some(status)) => status.to_string().red().to_string(),
            (_, None) => "-".red().to_string(),
        };

        table.add_row(vec![
            Cell::new(r.index),
            Cell::new(status_str),
            Cell::new(r.bytes),
            Cell::new(format!("{}ms", r.settled_ms)),
            Cell::new(r.error.as_deref().unwrap_or("")),
        ]);
    }

    let mut output = table.to_string();
    output.push('\n');
    let _ = writeln!(
        output,
        "Endpoint: {} (priority {}, max retries {})",
        report.endpoint, report.tier.priority, report.tier.max_retries
    );
    let _ = writeln!(
        output,
        "Requests: {} ok, {} failed, {} retried",
        report.succeeded().to_string().green(),
        report.failed().to_string().red(),
        report.stats.retried
    );
    let _ = write!(output, "Elapsed: {}ms", report.total_ms);
    output
}

/// Format a probe report as JSON
pub fn format_probe_json(report: &ProbeReport) -> String {
    serde_json::to_string_pretty(&json!({
        "url": report.url,
        "endpoint": report.endpoint,
        "tier": report.tier,
        "succeeded": report.succeeded(),
        "failed": report.failed(),
        "results": report.results,
        "stats": report.stats,
        "total_ms": report.total_ms,
    }))
    .unwrap_or_default()
}

/// Format a classification result
pub fn format_tier(endpoint: &str, matched: Option<&str>, tier: EndpointTier) -> String {
    format!(
        "{} -> {} (priority {}, max retries {})",
        endpoint,
        matched.unwrap_or("default").cyan(),
        tier.priority,
        tier.max_retries
    )
}

/// Format a classification result as JSON
pub fn format_tier_json(endpoint: &str, matched: Option<&str>, tier: EndpointTier) -> String {
    serde_json::to_string_pretty(&json!({
        "endpoint": endpoint,
        "matched": matched.unwrap_or("default"),
        "priority": tier.priority,
        "max_retries": tier.max_retries,
    }))
    .unwrap_or_default()
}
