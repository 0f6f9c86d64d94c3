//! Output formatting utilities for the CLI
//!
//! Formats status summaries, request logs, directory listings and pushed
//! events for the terminal, plus colored status messages.

use tabled::{
    settings::{Style, Width},
    Table, Tabled,
};

use pt_core::{DirectoryEntry, EventEnvelope, RequestLogEntry, ServiceEvent, ServiceStatus};

use crate::ipc::Tracked;

/// Snapshot of the service gathered by the status command
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub address: String,
    pub version: String,
    pub service_running: bool,
    pub status: ServiceStatus,
}

/// Format the service status as a human-readable block
pub fn format_status(report: &StatusReport) -> String {
    let mut output = String::new();
    let tunnel = &report.status.tunnel;
    let server = &report.status.server;

    output.push_str(&format!(
        "Service: {} ({})\n",
        if report.service_running { "Running" } else { "Idle" },
        report.address
    ));
    output.push_str(&format!("Version: {}\n", report.version));

    output.push_str(&format!("Tunnel: {} [{}]\n", tunnel.state, tunnel.state.code()));
    if let Some(tunnel_id) = &tunnel.tunnel_id {
        output.push_str(&format!("  Tunnel ID: {}\n", tunnel_id));
    }
    if let Some(origin) = &tunnel.origin_url {
        output.push_str(&format!(
            "  Origin: {} ({} connections)\n",
            origin,
            tunnel.ha_connections.unwrap_or_default()
        ));
    }
    if let Some(connected_at) = &tunnel.connected_at {
        output.push_str(&format!("  Connected since: {}\n", connected_at));
    }
    if let Some(error) = &tunnel.last_error {
        output.push_str(&format!("  Last error: {}\n", error));
    }

    output.push_str(&format!("Server: {} [{}]\n", server.state, server.state.code()));
    if let Some(root_dir) = &server.root_dir {
        output.push_str(&format!("  Root: {}\n", root_dir.display()));
    }
    if let Some(url) = &server.url {
        output.push_str(&format!("URL: {}\n", url));
    }
    output.push_str(&format!("Requests logged: {}\n", server.request_count));

    output
}

/// Format captured requests as an ASCII table
///
/// The detailed view adds the remote address, content type and captured
/// body of every request.
pub fn format_request_logs(entries: &[RequestLogEntry], detailed: bool) -> String {
    if entries.is_empty() {
        return "No requests logged".to_string();
    }

    #[derive(Tabled)]
    struct RequestRow {
        #[tabled(rename = "TIME")]
        time: String,
        #[tabled(rename = "METHOD")]
        method: String,
        #[tabled(rename = "PATH")]
        path: String,
        #[tabled(rename = "STATUS")]
        status: u16,
        #[tabled(rename = "DURATION")]
        duration: String,
    }

    #[derive(Tabled)]
    struct RequestRowDetailed {
        #[tabled(rename = "TIME")]
        time: String,
        #[tabled(rename = "METHOD")]
        method: String,
        #[tabled(rename = "PATH")]
        path: String,
        #[tabled(rename = "STATUS")]
        status: u16,
        #[tabled(rename = "DURATION")]
        duration: String,
        #[tabled(rename = "REMOTE")]
        remote: String,
        #[tabled(rename = "CONTENT TYPE")]
        content_type: String,
        #[tabled(rename = "BODY")]
        body: String,
    }

    if detailed {
        let rows: Vec<RequestRowDetailed> = entries
            .iter()
            .map(|e| RequestRowDetailed {
                time: e.timestamp.clone(),
                method: e.method.clone(),
                path: path_with_query(e),
                status: e.status_code,
                duration: format!("{}ms", e.duration_ms),
                remote: or_dash(&e.remote_addr),
                content_type: or_dash(&e.content_type),
                body: or_dash(&truncate(&e.body, 40)),
            })
            .collect();

        Table::new(rows)
            .with(Style::rounded())
            .with(Width::wrap(120))
            .to_string()
    } else {
        let rows: Vec<RequestRow> = entries
            .iter()
            .map(|e| RequestRow {
                time: e.timestamp.clone(),
                method: e.method.clone(),
                path: truncate(&path_with_query(e), 48),
                status: e.status_code,
                duration: format!("{}ms", e.duration_ms),
            })
            .collect();

        Table::new(rows).with(Style::rounded()).to_string()
    }
}

/// Format a directory listing as an ASCII table
pub fn format_directory(entries: &[DirectoryEntry]) -> String {
    if entries.is_empty() {
        return "Directory is empty".to_string();
    }

    #[derive(Tabled)]
    struct EntryRow {
        #[tabled(rename = "NAME")]
        name: String,
        #[tabled(rename = "SIZE")]
        size: String,
        #[tabled(rename = "MODIFIED")]
        modified: String,
    }

    let rows: Vec<EntryRow> = entries
        .iter()
        .map(|e| EntryRow {
            name: if e.is_dir {
                format!("{}/", e.name)
            } else {
                e.name.clone()
            },
            size: if e.is_dir {
                "-".to_string()
            } else {
                format_size(e.size)
            },
            modified: e.mod_time.clone(),
        })
        .collect();

    Table::new(rows).with(Style::rounded()).to_string()
}

/// Format one pushed event as a single line
pub fn format_event(envelope: &EventEnvelope) -> String {
    let prefix = if envelope.resync {
        format!("[{} resync]", envelope.seq)
    } else {
        format!("[{}]", envelope.seq)
    };

    let body = match &envelope.event {
        ServiceEvent::StateChanged { state, message } => {
            format!("tunnel {}: {}", state, message)
        }
        ServiceEvent::Error { code, message } => format!("tunnel error {}: {}", code, message),
        ServiceEvent::Log { level, message } => format!("log {:?}: {}", level, message),
        ServiceEvent::ServerStateChanged { state, message } => {
            format!("server {}: {}", state, message)
        }
        ServiceEvent::ServerError { code, message } => {
            format!("server error {}: {}", code, message)
        }
        ServiceEvent::RequestLog { entry } => format!(
            "request {} {} -> {} ({}ms)",
            entry.method,
            path_with_query(entry),
            entry.status_code,
            entry.duration_ms
        ),
    };

    format!("{} {}", prefix, body)
}

/// Describe a stream discontinuity, if the event starts one
pub fn describe_tracking(tracked: &Tracked) -> Option<String> {
    match tracked {
        Tracked::NewEpoch {
            previous: Some(previous),
        } => Some(format!(
            "Service coordinator restarted (previous epoch {})",
            truncate(previous, 8)
        )),
        Tracked::Gap { expected, got } => Some(format!(
            "Missed {} event(s) (expected #{}, got #{})",
            got - expected,
            expected,
            got
        )),
        _ => None,
    }
}

fn path_with_query(entry: &RequestLogEntry) -> String {
    if entry.query.is_empty() {
        return entry.path.clone();
    }
    let query: Vec<String> = entry
        .query
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect();
    format!("{}?{}", entry.path, query.join("&"))
}

/// Format a byte count in human-readable form
fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes < KB {
        format!("{} B", bytes)
    } else if bytes < MB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else if bytes < GB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    }
}

fn or_dash(s: &str) -> String {
    if s.is_empty() {
        "-".to_string()
    } else {
        s.to_string()
    }
}

/// Truncate a string with ellipsis if too long
fn truncate(s: &str, max_len: usize) -> String {
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
