//! Optional per-process I/O rates from an external query tool.
//!
//! Only Windows ships a default query (performance counters via PowerShell). Everywhere else
//! the source reports no data, which the correlator treats as zero speeds.

use anyhow::{bail, Context};
use once_cell::sync::OnceCell;
use serde::Deserialize;
use std::process::Command;

use crate::types::ProcessIo;

#[cfg(target_os = "windows")]
const PERF_QUERY: &str = "Get-CimInstance Win32_PerfFormattedData_PerfProc_Process | \
     Select-Object IDProcess,IOReadBytesPerSec,IOWriteBytesPerSec | ConvertTo-Json -Compress";

// Runtime toggle (read once)
fn telemetry_enabled() -> bool {
    static ON: OnceCell<bool> = OnceCell::new();
    *ON.get_or_init(|| {
        std::env::var("NETTRACK_AGENT_TELEMETRY")
            .map(|v| v != "0")
            .unwrap_or(true)
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryCommand {
    pub program: String,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ProcessIoTelemetry {
    command: Option<TelemetryCommand>,
}

impl ProcessIoTelemetry {
    pub fn platform_default() -> Self {
        if !telemetry_enabled() {
            return Self::disabled();
        }
        #[cfg(target_os = "windows")]
        {
            Self::with_command(
                "powershell",
                ["-NoProfile", "-NonInteractive", "-Command", PERF_QUERY],
            )
        }
        #[cfg(not(target_os = "windows"))]
        {
            Self::disabled()
        }
    }

    pub fn disabled() -> Self {
        Self { command: None }
    }

    pub fn with_command<I, S>(program: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: Some(TelemetryCommand {
                program: program.to_string(),
                args: args.into_iter().map(Into::into).collect(),
            }),
        }
    }

    pub fn is_available(&self) -> bool {
        self.command.is_some()
    }

    /// Run the query. Blocking; no timeout is applied.
    pub fn query(&self) -> anyhow::Result<Vec<ProcessIo>> {
        let Some(cmd) = self.command.as_ref() else {
            return Ok(Vec::new());
        };
        let output = Command::new(&cmd.program)
            .args(&cmd.args)
            .output()
            .with_context(|| format!("spawning {}", cmd.program))?;
        if !output.status.success() {
            bail!(
                "{} exited with {}: {}",
                cmd.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        parse_telemetry_json(&String::from_utf8_lossy(&output.stdout))
    }
}

#[derive(Debug, Deserialize)]
struct PerfRow {
    #[serde(rename = "IDProcess")]
    id_process: u32,
    #[serde(rename = "IOReadBytesPerSec", default)]
    io_read_bytes_per_sec: f64,
    #[serde(rename = "IOWriteBytesPerSec", default)]
    io_write_bytes_per_sec: f64,
}

// ConvertTo-Json emits a bare object when only one row matched.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    Many(Vec<PerfRow>),
    One(PerfRow),
}

/// Parse `[{IDProcess, IOReadBytesPerSec, IOWriteBytesPerSec}, ...]`. Rows for pid 0
/// (`_Total`, `Idle`) are dropped.
pub fn parse_telemetry_json(s: &str) -> anyhow::Result<Vec<ProcessIo>> {
    let s = s.trim();
    if s.is_empty() {
        return Ok(Vec::new());
    }
    let rows = match serde_json::from_str::<OneOrMany>(s).context("decoding telemetry json")? {
        OneOrMany::Many(v) => v,
        OneOrMany::One(r) => vec![r],
    };
    Ok(rows
        .into_iter()
        .filter(|r| r.id_process != 0)
        .map(|r| ProcessIo {
            pid: r.id_process,
            read_bytes_per_sec: r.io_read_bytes_per_sec,
            write_bytes_per_sec: r.io_write_bytes_per_sec,
        })
        .collect())
}
