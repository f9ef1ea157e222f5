//! Plain-text rendering of a snapshot for the console consumer.

use chrono::{Local, TimeZone};

use nettrack_agent::types::AnalysisSnapshot;

pub fn human_rate(bytes_per_sec: f64) -> String {
    const K: f64 = 1024.0;
    let b = bytes_per_sec.max(0.0);
    if b < K {
        return format!("{b:.0}B/s");
    }
    let kb = b / K;
    if kb < K {
        return format!("{kb:.1}KB/s");
    }
    let mb = kb / K;
    if mb < K {
        return format!("{mb:.1}MB/s");
    }
    format!("{:.2}GB/s", mb / K)
}

pub fn truncate_middle(s: &str, max: usize) -> String {
    let n = s.chars().count();
    if n <= max {
        return s.to_string();
    }
    if max <= 3 {
        return "...".into();
    }
    let keep = max - 3;
    let left: String = s.chars().take(keep / 2).collect();
    let right: String = s.chars().skip(n - (keep - keep / 2)).collect();
    format!("{left}...{right}")
}

/// One line: time, totals, busiest processes and remote endpoints.
pub fn summary_line(snapshot: &AnalysisSnapshot, upload: f64, download: f64, top: usize) -> String {
    let when = Local
        .timestamp_millis_opt(snapshot.timestamp)
        .single()
        .map(|t| t.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "--:--:--".into());
    let procs: Vec<String> = snapshot
        .processes
        .iter()
        .take(top)
        .map(|p| {
            format!(
                "{}[{}] {}",
                truncate_middle(&p.name, 20),
                p.pid,
                p.established_connections
            )
        })
        .collect();
    let remotes: Vec<String> = snapshot
        .remote_groups
        .iter()
        .take(top)
        .map(|g| format!("{} x{}", g.remote_ip, g.connection_count))
        .collect();
    format!(
        "[{when}] down {} up {} | {} procs {} conns | {} | {}",
        human_rate(download),
        human_rate(upload),
        snapshot.processes.len(),
        snapshot.connections.len(),
        procs.join(", "),
        remotes.join(", ")
    )
}
