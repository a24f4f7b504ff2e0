//! Text and JSON rendering of results and server lists.

use crate::measurements::SpeedTestResult;
use crate::probe::ServerDescriptor;
use crate::Result;
use std::fmt::Write;
use std::time::Duration;

/// Multi-line report for interactive use.
pub fn render_human(result: &SpeedTestResult) -> String {
    let mut out = String::new();
    if let Some(server) = &result.server {
        let _ = writeln!(out, "Server:   {}", server);
    }
    if !result.client_ip.is_empty() {
        let _ = writeln!(out, "IP:       {}", result.client_ip);
    }
    let _ = writeln!(out, "Download: {:.2} Mbps", result.download_mbps);
    let _ = writeln!(out, "Upload:   {:.2} Mbps", result.upload_mbps);
    let _ = writeln!(out, "Ping:     {:.2} ms", result.ping_ms);
    let _ = write!(out, "Jitter:   {:.2} ms", result.jitter_ms);
    out
}

/// Single-line report: `Ping: .. ms Jitter: .. ms Download: .. Mbps Upload: .. Mbps`.
pub fn render_simple(result: &SpeedTestResult) -> String {
    format!(
        "Ping: {:.2} ms Jitter: {:.2} ms Download: {:.2} Mbps Upload: {:.2} Mbps",
        result.ping_ms, result.jitter_ms, result.download_mbps, result.upload_mbps
    )
}

pub fn render_json(result: &SpeedTestResult) -> Result<String> {
    Ok(serde_json::to_string_pretty(result)?)
}

/// One line per server: index, name, URL and probe latency if known.
pub fn render_server_list(servers: &[ServerDescriptor], latencies: &[Option<Duration>]) -> String {
    let mut out = String::new();
    for (index, server) in servers.iter().enumerate() {
        let latency = match latencies.get(index).copied().flatten() {
            Some(latency) => format!("{:.2} ms", latency.as_secs_f64() * 1000.0),
            None => "unreachable".to_string(),
        };
        let _ = writeln!(
            out,
            "{:>3}  {:<16} {:<48} {}",
            index, server.name, server.url, latency
        );
    }
    out
}
