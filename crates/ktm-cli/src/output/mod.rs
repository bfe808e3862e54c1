//! Output formatting utilities for the CLI
//!
//! Tables for tunnels and clusters, batch summaries, and colored status
//! messages.

use std::collections::HashSet;

use tabled::{
    settings::{Style, Width},
    Table, Tabled,
};

use ktm_core::config::ClusterProfile;
use ktm_core::network::NetworkStatus;
use ktm_core::store::StoredTunnel;
use ktm_core::time::elapsed_secs;
use ktm_orchestrator::{BatchReport, ConnectionOutcome, StatusEntry};

/// Format live tunnels from a status snapshot as an ASCII table
///
/// The active context, if it has a live tunnel, is marked with `*`.
pub fn format_status_entries(entries: &[StatusEntry], active: Option<&str>) -> String {
    if entries.is_empty() {
        return "No tunnels running".to_string();
    }

    #[derive(Tabled)]
    struct StatusRow {
        #[tabled(rename = " ")]
        marker: &'static str,
        #[tabled(rename = "CONTEXT")]
        context: String,
        #[tabled(rename = "LOCAL")]
        local: String,
        #[tabled(rename = "PID")]
        pid: u32,
        #[tabled(rename = "NETWORK")]
        network: String,
        #[tabled(rename = "UPTIME")]
        uptime: String,
    }

    let rows: Vec<StatusRow> = entries
        .iter()
        .map(|e| StatusRow {
            marker: if Some(e.context_name.as_str()) == active {
                "*"
            } else {
                ""
            },
            context: e.context_name.clone(),
            local: format!("127.0.0.1:{}", e.local_port),
            pid: e.pid,
            network: network_cell(&e.network),
            uptime: format_duration(elapsed_secs(e.created_at)),
        })
        .collect();

    Table::new(rows)
        .with(Style::rounded())
        .with(Width::wrap(120))
        .to_string()
}

fn network_cell(status: &NetworkStatus) -> String {
    match status {
        NetworkStatus::Unsatisfied { reason, .. } => truncate(reason, 40),
        other => other.to_string(),
    }
}

/// Format live tunnel records as an ASCII table
pub fn format_tunnels(tunnels: &[StoredTunnel]) -> String {
    if tunnels.is_empty() {
        return "No tunnels running".to_string();
    }

    #[derive(Tabled)]
    struct TunnelRow {
        #[tabled(rename = "CONTEXT")]
        context: String,
        #[tabled(rename = "PORT")]
        port: u16,
        #[tabled(rename = "PID")]
        pid: u32,
        #[tabled(rename = "VIA")]
        via: String,
        #[tabled(rename = "REMOTE")]
        remote: String,
        #[tabled(rename = "REQUIRES")]
        requires: String,
        #[tabled(rename = "UPTIME")]
        uptime: String,
    }

    let rows: Vec<TunnelRow> = tunnels
        .iter()
        .map(|t| TunnelRow {
            context: t.tunnel.context_name.clone(),
            port: t.tunnel.local_port,
            pid: t.tunnel.handle.pid(),
            via: t.tunnel.ssh_host.clone(),
            remote: t.tunnel.remote_addr.clone(),
            requires: t
                .network
                .as_ref()
                .map(|n| n.requirement.to_string())
                .unwrap_or_else(|| "-".to_string()),
            uptime: format_duration(elapsed_secs(t.tunnel.created_at)),
        })
        .collect();

    Table::new(rows).with(Style::rounded()).to_string()
}

/// Format configured clusters, marking those with a live tunnel
pub fn format_clusters(clusters: &[ClusterProfile], live: &HashSet<String>) -> String {
    if clusters.is_empty() {
        return "No clusters configured".to_string();
    }

    #[derive(Tabled)]
    struct ClusterRow {
        #[tabled(rename = "CLUSTER")]
        cluster: String,
        #[tabled(rename = "CONTEXT")]
        context: String,
        #[tabled(rename = "API SERVER")]
        api: String,
        #[tabled(rename = "NETWORK")]
        network: String,
        #[tabled(rename = "TUNNEL")]
        tunnel: &'static str,
    }

    let rows: Vec<ClusterRow> = clusters
        .iter()
        .map(|c| {
            let context = c.context_name();
            ClusterRow {
                cluster: c.id().to_string(),
                api: match c.api_port {
                    Some(port) => format!("{}:{}", c.remote_addr, port),
                    None => c.remote_addr.clone(),
                },
                network: c.network.indicator().unwrap_or("-").to_string(),
                tunnel: if live.contains(&context) { "up" } else { "-" },
                context,
            }
        })
        .collect();

    Table::new(rows).with(Style::rounded()).to_string()
}

/// Summary printed after a batch connect
///
/// Lists each cluster's outcome followed by its unmet network requirements,
/// the `N/M connected` line, and the deduplicated hints.
pub fn format_batch_report(report: &BatchReport) -> String {
    let mut output = String::new();

    for result in &report.results {
        match &result.outcome {
            ConnectionOutcome::Success(record) => output.push_str(&format!(
                "  ok    {:<32} {}\n",
                result.context_name,
                record.local_endpoint()
            )),
            ConnectionOutcome::Failed(reason) => output.push_str(&format!(
                "  fail  {:<32} {}\n",
                result.context_name,
                truncate(reason, 80)
            )),
        }
        for warning in &result.warnings {
            output.push_str(&format!(
                "  warn  {:<32} {}\n",
                warning.context_name,
                truncate(&warning.reason, 80)
            ));
        }
    }

    output.push_str(&format!(
        "\n{}/{} clusters connected",
        report.succeeded(),
        report.requested
    ));
    if report.cancelled {
        output.push_str(&format!(
            " (cancelled, {} not attempted)",
            report.requested - report.results.len()
        ));
    }
    output.push('\n');

    let hints = report.unresolved_hints();
    if !hints.is_empty() {
        output.push_str("\nSome clusters need network access that is not active:\n");
        for hint in hints {
            output.push_str(&format!("  {}\n", hint));
        }
    }

    output
}

/// Format duration in human-readable form
pub fn format_duration(secs: u64) -> String {
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        let mins = secs / 60;
        let remaining_secs = secs % 60;
        format!("{}m {}s", mins, remaining_secs)
    } else if secs < 86400 {
        let hours = secs / 3600;
        let remaining_mins = (secs % 3600) / 60;
        format!("{}h {}m", hours, remaining_mins)
    } else {
        let days = secs / 86400;
        let remaining_hours = (secs % 86400) / 3600;
        format!("{}d {}h", days, remaining_hours)
    }
}

/// Truncate a string with ellipsis if too long
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Print a success message in green with a checkmark prefix
pub fn print_success(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Green),
        Print("✓ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an error message in red with an X prefix
///
/// Outputs to stderr.
pub fn print_error(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Red),
        Print("✗ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print a warning message in yellow with a warning symbol prefix
///
/// Outputs to stderr.
pub fn print_warning(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Yellow),
        Print("⚠ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an informational message in cyan with an info symbol prefix
pub fn print_info(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Cyan),
        Print("ℹ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}
