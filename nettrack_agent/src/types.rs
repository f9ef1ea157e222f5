//! Data types produced by the sampler and sent to the host.
//! Keep this module minimal and stable: it defines the wire format.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessCategory {
    System,
    ThirdParty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    Established,
    SynSent,
    SynRecv,
    FinWait1,
    FinWait2,
    TimeWait,
    Close,
    CloseWait,
    LastAck,
    Listen,
    Closing,
    Unknown,
}

impl ConnectionState {
    /// Kernel TCP state codes as printed in /proc/net/tcp.
    pub fn from_proc_hex(code: &str) -> Self {
        match u8::from_str_radix(code, 16).unwrap_or(0) {
            0x01 => Self::Established,
            0x02 => Self::SynSent,
            0x03 => Self::SynRecv,
            0x04 => Self::FinWait1,
            0x05 => Self::FinWait2,
            0x06 => Self::TimeWait,
            0x07 => Self::Close,
            0x08 => Self::CloseWait,
            0x09 => Self::LastAck,
            0x0A => Self::Listen,
            0x0B => Self::Closing,
            _ => Self::Unknown,
        }
    }

    /// Textual spellings used by netstat and lsof.
    pub fn from_label(label: &str) -> Self {
        let norm: String = label
            .trim()
            .trim_matches(|c| c == '(' || c == ')')
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .collect::<String>()
            .to_ascii_uppercase();
        match norm.as_str() {
            "ESTABLISHED" => Self::Established,
            "SYNSENT" => Self::SynSent,
            "SYNRECV" | "SYNRECEIVED" => Self::SynRecv,
            "FINWAIT1" => Self::FinWait1,
            "FINWAIT2" => Self::FinWait2,
            "TIMEWAIT" => Self::TimeWait,
            "CLOSE" | "CLOSED" => Self::Close,
            "CLOSEWAIT" => Self::CloseWait,
            "LASTACK" => Self::LastAck,
            "LISTEN" | "LISTENING" => Self::Listen,
            "CLOSING" => Self::Closing,
            _ => Self::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessRecord {
    pub pid: u32,
    pub name: String,
    pub category: ProcessCategory,
    pub cpu_percent: f32,
    pub memory_mb: f64,
    pub download_bytes_per_sec: f64,
    pub upload_bytes_per_sec: f64,
    pub total_connections: u32,
    pub established_connections: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionRecord {
    pub owner_pid: u32,
    pub owner_process_name: String,
    pub local_address: String,
    pub local_port: u16,
    pub remote_address: String,
    pub remote_port: u16,
    pub state: ConnectionState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteEndpointGroup {
    pub remote_ip: String,
    pub connection_count: u32,
    // ascending, no duplicates
    pub ports: Vec<u16>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterfaceStats {
    pub name: String,
    pub rx_bytes_per_sec: f64,
    pub tx_bytes_per_sec: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalStats {
    pub upload_bytes_per_sec: f64,
    pub download_bytes_per_sec: f64,
    pub per_interface: Vec<InterfaceStats>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisSnapshot {
    /// Capture time, unix milliseconds.
    pub timestamp: i64,
    pub processes: Vec<ProcessRecord>,
    pub connections: Vec<ConnectionRecord>,
    pub remote_groups: Vec<RemoteEndpointGroup>,
    // None when no interface counters were reported this tick
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_stats: Option<GlobalStats>,
}

impl AnalysisSnapshot {
    /// Zero-valued snapshot served before the first tick arrives.
    pub fn empty() -> Self {
        Self {
            timestamp: 0,
            processes: Vec::new(),
            connections: Vec::new(),
            remote_groups: Vec::new(),
            global_stats: Some(GlobalStats::default()),
        }
    }
}

impl Default for AnalysisSnapshot {
    fn default() -> Self {
        Self::empty()
    }
}

// ---------- Raw (pre-correlation) records ----------

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawProcess {
    pub pid: u32,
    pub name: String,
    pub user: Option<String>,
    pub exe: Option<String>,
    pub cpu_percent: f32,
    pub memory_mb: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawConnection {
    pub pid: u32,
    pub local_address: String,
    pub local_port: u16,
    pub remote_address: String,
    pub remote_port: u16,
    pub state: ConnectionState,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessIo {
    pub pid: u32,
    pub read_bytes_per_sec: f64,
    pub write_bytes_per_sec: f64,
}

/// The four unmerged datasets of one tick.
#[derive(Debug, Clone, Default)]
pub struct RawSample {
    pub captured_at: i64,
    pub connections: Vec<RawConnection>,
    pub processes: Vec<RawProcess>,
    pub interfaces: Vec<InterfaceStats>,
    pub process_io: Vec<ProcessIo>,
}
