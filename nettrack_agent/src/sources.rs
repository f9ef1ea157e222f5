//! Raw data sources for one tick: processes and interface counters via sysinfo, the
//! connection table from the platform, and optional per-process I/O telemetry.

use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

use sysinfo::{Networks, ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind, Users};

use crate::telemetry::ProcessIoTelemetry;
use crate::types::{InterfaceStats, ProcessIo, RawConnection, RawProcess};

/// One provider of the four raw datasets. Every call is blocking; the sampler runs them on
/// the blocking pool concurrently, so implementations must tolerate parallel calls.
pub trait SystemSource: Send + Sync + 'static {
    fn connections(&self) -> anyhow::Result<Vec<RawConnection>>;
    fn processes(&self) -> anyhow::Result<Vec<RawProcess>>;
    fn interfaces(&self) -> anyhow::Result<Vec<InterfaceStats>>;
    /// Optional; errors here never fail a sample.
    fn process_io(&self) -> anyhow::Result<Vec<ProcessIo>>;
}

struct ProcessTable {
    sys: System,
    users: Users,
    n_cpus: f32,
}

struct NetCounters {
    // Keep Networks alive across ticks so received()/transmitted() are deltas
    networks: Networks,
    last_refresh: Option<Instant>,
}

/// The real host.
pub struct HostSource {
    procs: Mutex<ProcessTable>,
    nets: Mutex<NetCounters>,
    telemetry: ProcessIoTelemetry,
}

impl HostSource {
    pub fn new(telemetry: ProcessIoTelemetry) -> Self {
        let sys = System::new_all();
        let n_cpus = sys.cpus().len().max(1) as f32;
        let mut nets = NetCounters {
            networks: Networks::new_with_refreshed_list(),
            last_refresh: None,
        };
        nets.networks.refresh(true);
        nets.last_refresh = Some(Instant::now());
        Self {
            procs: Mutex::new(ProcessTable {
                sys,
                users: Users::new_with_refreshed_list(),
                n_cpus,
            }),
            nets: Mutex::new(nets),
            telemetry,
        }
    }
}

impl Default for HostSource {
    fn default() -> Self {
        Self::new(ProcessIoTelemetry::platform_default())
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

fn is_loopback(name: &str) -> bool {
    let l = name.to_ascii_lowercase();
    l == "lo" || l.starts_with("lo0") || l.contains("loopback")
}

impl SystemSource for HostSource {
    fn connections(&self) -> anyhow::Result<Vec<RawConnection>> {
        platform::connections()
    }

    fn processes(&self) -> anyhow::Result<Vec<RawProcess>> {
        let mut guard = lock(&self.procs);
        let table = &mut *guard;
        table.sys.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing()
                .with_cpu()
                .with_memory()
                .with_exe(UpdateKind::OnlyIfNotSet)
                .with_user(UpdateKind::OnlyIfNotSet),
        );

        // New accounts can show up between ticks; refresh the user list lazily.
        let unresolved = table.sys.processes().values().any(|p| {
            p.user_id()
                .is_some_and(|uid| table.users.get_user_by_id(uid).is_none())
        });
        if unresolved {
            table.users.refresh();
        }

        let procs = table
            .sys
            .processes()
            .values()
            .map(|p| RawProcess {
                pid: p.pid().as_u32(),
                name: p.name().to_string_lossy().into_owned(),
                user: p
                    .user_id()
                    .and_then(|uid| table.users.get_user_by_id(uid))
                    .map(|u| u.name().to_string()),
                exe: p.exe().map(|e| e.to_string_lossy().into_owned()),
                cpu_percent: (p.cpu_usage() / table.n_cpus).clamp(0.0, 100.0),
                memory_mb: p.memory() as f64 / (1024.0 * 1024.0),
            })
            .collect();
        Ok(procs)
    }

    fn interfaces(&self) -> anyhow::Result<Vec<InterfaceStats>> {
        let mut nets = lock(&self.nets);
        let now = Instant::now();
        nets.networks.refresh(true);
        let dt = nets
            .last_refresh
            .map(|t| now.duration_since(t).as_secs_f64())
            .filter(|dt| *dt > 1e-3);
        nets.last_refresh = Some(now);

        let stats = nets
            .networks
            .iter()
            .filter(|(name, _)| !is_loopback(name))
            .map(|(name, data)| {
                let (rx, tx) = match dt {
                    Some(dt) => (data.received() as f64 / dt, data.transmitted() as f64 / dt),
                    None => (0.0, 0.0),
                };
                InterfaceStats {
                    name: name.to_string(),
                    rx_bytes_per_sec: rx,
                    tx_bytes_per_sec: tx,
                }
            })
            .collect();
        Ok(stats)
    }

    fn process_io(&self) -> anyhow::Result<Vec<ProcessIo>> {
        self.telemetry.query()
    }
}

#[cfg(target_os = "linux")]
mod platform {
    use std::collections::HashMap;
    use std::fs;

    use crate::netparse::{is_active, parse_proc_net, parse_socket_inode, ProcNetEntry};
    use crate::types::RawConnection;

    pub fn connections() -> anyhow::Result<Vec<RawConnection>> {
        let v4 = fs::read_to_string("/proc/net/tcp")?;
        let mut entries = parse_proc_net(&v4, false);
        // tcp6 is absent when IPv6 is disabled
        if let Ok(v6) = fs::read_to_string("/proc/net/tcp6") {
            entries.extend(parse_proc_net(&v6, true));
        }
        entries.retain(|e| is_active(e.state, &e.remote_ip.to_string(), e.remote_port));
        if entries.is_empty() {
            return Ok(Vec::new());
        }
        let owners = map_inodes();
        Ok(entries
            .into_iter()
            .filter_map(|e| {
                let pid = *owners.get(&e.inode)?;
                Some(to_raw(pid, e))
            })
            .collect())
    }

    fn to_raw(pid: u32, e: ProcNetEntry) -> RawConnection {
        RawConnection {
            pid,
            local_address: e.local_ip.to_string(),
            local_port: e.local_port,
            remote_address: e.remote_ip.to_string(),
            remote_port: e.remote_port,
            state: e.state,
        }
    }

    // Sockets of processes we cannot inspect simply stay unowned.
    fn map_inodes() -> HashMap<u64, u32> {
        let mut map = HashMap::new();
        let Ok(proc_dir) = fs::read_dir("/proc") else {
            return map;
        };
        for entry in proc_dir.flatten() {
            let Some(pid) = entry.file_name().to_str().and_then(|n| n.parse::<u32>().ok()) else {
                continue;
            };
            let Ok(fds) = fs::read_dir(entry.path().join("fd")) else {
                continue;
            };
            for fd in fds.flatten() {
                if let Ok(link) = fs::read_link(fd.path()) {
                    if let Some(inode) = parse_socket_inode(&link.to_string_lossy()) {
                        map.insert(inode, pid);
                    }
                }
            }
        }
        map
    }
}

#[cfg(target_os = "windows")]
mod platform {
    use std::process::Command;

    use anyhow::Context;

    use crate::netparse::{is_active, parse_netstat};
    use crate::types::RawConnection;

    pub fn connections() -> anyhow::Result<Vec<RawConnection>> {
        let out = Command::new("netstat")
            .arg("-ano")
            .output()
            .context("running netstat")?;
        let mut conns = parse_netstat(&String::from_utf8_lossy(&out.stdout));
        conns.retain(|c| is_active(c.state, &c.remote_address, c.remote_port));
        Ok(conns)
    }
}

#[cfg(target_os = "macos")]
mod platform {
    use std::process::Command;

    use anyhow::Context;

    use crate::netparse::{is_active, parse_lsof};
    use crate::types::RawConnection;

    pub fn connections() -> anyhow::Result<Vec<RawConnection>> {
        let out = Command::new("lsof")
            .args(["-nP", "-iTCP"])
            .output()
            .context("running lsof")?;
        // lsof exits 1 when nothing matched
        let mut conns = parse_lsof(&String::from_utf8_lossy(&out.stdout));
        conns.retain(|c| is_active(c.state, &c.remote_address, c.remote_port));
        Ok(conns)
    }
}

#[cfg(not(any(target_os = "linux", target_os = "windows", target_os = "macos")))]
mod platform {
    use crate::types::RawConnection;

    pub fn connections() -> anyhow::Result<Vec<RawConnection>> {
        Err(anyhow::anyhow!("connection table not supported on this platform"))
    }
}
