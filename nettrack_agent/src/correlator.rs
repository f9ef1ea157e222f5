//! Joins the raw process, connection, interface and per-process I/O datasets of one tick
//! into an [`AnalysisSnapshot`].

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet};

use crate::classify::classify;
use crate::types::{
    AnalysisSnapshot, ConnectionRecord, ConnectionState, GlobalStats, InterfaceStats, ProcessIo,
    ProcessRecord, RawSample, RemoteEndpointGroup,
};

/// Build the snapshot for one tick. Deterministic for a given `raw` and `filters`.
pub fn correlate(raw: &RawSample, filters: &[String]) -> AnalysisSnapshot {
    let filters = normalize_filters(filters);
    let owners: HashSet<u32> = raw.connections.iter().map(|c| c.pid).collect();

    // Target selection: owns a connection OR matches a name filter.
    let mut processes: Vec<ProcessRecord> = Vec::new();
    let mut index: HashMap<u32, usize> = HashMap::new();
    for p in &raw.processes {
        if index.contains_key(&p.pid) {
            continue;
        }
        let name_lc = p.name.to_lowercase();
        let selected = owners.contains(&p.pid) || filters.iter().any(|f| name_lc.contains(f));
        if !selected {
            continue;
        }
        index.insert(p.pid, processes.len());
        processes.push(ProcessRecord {
            pid: p.pid,
            name: p.name.clone(),
            category: classify(p),
            cpu_percent: p.cpu_percent,
            memory_mb: p.memory_mb,
            download_bytes_per_sec: 0.0,
            upload_bytes_per_sec: 0.0,
            total_connections: 0,
            established_connections: 0,
        });
    }

    // Connection join; connections without a selected owner are dropped.
    let mut connections = Vec::with_capacity(raw.connections.len());
    for c in &raw.connections {
        let Some(&i) = index.get(&c.pid) else {
            continue;
        };
        let owner = &mut processes[i];
        owner.total_connections += 1;
        if c.state == ConnectionState::Established {
            owner.established_connections += 1;
        }
        connections.push(ConnectionRecord {
            owner_pid: c.pid,
            owner_process_name: owner.name.clone(),
            local_address: c.local_address.clone(),
            local_port: c.local_port,
            remote_address: c.remote_address.clone(),
            remote_port: c.remote_port,
            state: c.state,
        });
    }

    apply_process_io(&mut processes, &raw.process_io);

    // Filter-only matches without a live connection do not make it into the output.
    processes.retain(|p| p.total_connections > 0);
    processes.sort_by(|a, b| {
        let sa = a.download_bytes_per_sec + a.upload_bytes_per_sec;
        let sb = b.download_bytes_per_sec + b.upload_bytes_per_sec;
        sb.partial_cmp(&sa)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.total_connections.cmp(&a.total_connections))
            .then_with(|| a.pid.cmp(&b.pid))
    });

    AnalysisSnapshot {
        timestamp: raw.captured_at,
        remote_groups: group_by_remote(&connections),
        global_stats: global_totals(&raw.interfaces),
        processes,
        connections,
    }
}

fn normalize_filters(filters: &[String]) -> Vec<String> {
    filters
        .iter()
        .map(|f| f.trim().to_lowercase())
        .filter(|f| !f.is_empty())
        .collect()
}

fn apply_process_io(processes: &mut [ProcessRecord], io: &[ProcessIo]) {
    if io.is_empty() {
        return;
    }
    let by_pid: HashMap<u32, &ProcessIo> = io.iter().map(|r| (r.pid, r)).collect();
    for p in processes.iter_mut() {
        if let Some(r) = by_pid.get(&p.pid) {
            p.download_bytes_per_sec = r.read_bytes_per_sec.max(0.0);
            p.upload_bytes_per_sec = r.write_bytes_per_sec.max(0.0);
        }
    }
}

/// Buckets connections by remote address. Groups come out by count descending; equal
/// counts keep first-seen order.
pub fn group_by_remote(connections: &[ConnectionRecord]) -> Vec<RemoteEndpointGroup> {
    let mut order: Vec<(&str, u32, BTreeSet<u16>)> = Vec::new();
    let mut slot: HashMap<&str, usize> = HashMap::new();
    for c in connections {
        let i = *slot.entry(c.remote_address.as_str()).or_insert_with(|| {
            order.push((c.remote_address.as_str(), 0, BTreeSet::new()));
            order.len() - 1
        });
        let entry = &mut order[i];
        entry.1 += 1;
        entry.2.insert(c.remote_port);
    }
    let mut groups: Vec<RemoteEndpointGroup> = order
        .into_iter()
        .map(|(ip, count, ports)| RemoteEndpointGroup {
            remote_ip: ip.to_string(),
            connection_count: count,
            ports: ports.into_iter().collect(),
        })
        .collect();
    // sort_by is stable
    groups.sort_by(|a, b| b.connection_count.cmp(&a.connection_count));
    groups
}

pub fn global_totals(interfaces: &[InterfaceStats]) -> Option<GlobalStats> {
    if interfaces.is_empty() {
        return None;
    }
    let download: f64 = interfaces.iter().map(|i| i.rx_bytes_per_sec.max(0.0)).sum();
    let upload: f64 = interfaces.iter().map(|i| i.tx_bytes_per_sec.max(0.0)).sum();
    Some(GlobalStats {
        upload_bytes_per_sec: upload,
        download_bytes_per_sec: download,
        per_interface: interfaces.to_vec(),
    })
}
