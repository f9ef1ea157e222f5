//! Monitor façade driven by scripted workers.
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::timeout;

use nettrack::monitor::{traffic_scalar, MonitorOptions, TrafficMonitor};
use nettrack::store::{JsonFileStore, MemoryStore, ProcessTraffic, RecentTraffic, TrafficStore};
use nettrack::supervisor::{in_process_entrypoint, Entrypoint, WorkerContext, WorkerFuture, WorkerSupervisor};
use nettrack::types::{
    AnalysisSnapshot, ConnectionState, GlobalStats, InterfaceStats, ProcessCategory, ProcessIo,
    ProcessRecord, RawConnection, RawProcess,
};
use nettrack_agent::config::AgentConfig;
use nettrack_agent::protocol::{ControlMessage, WorkerEvent};
use nettrack_agent::sources::SystemSource;

fn record(pid: u32, name: &str, down: f64, up: f64) -> ProcessRecord {
    ProcessRecord {
        pid,
        name: name.to_string(),
        category: ProcessCategory::ThirdParty,
        cpu_percent: 0.0,
        memory_mb: 0.0,
        download_bytes_per_sec: down,
        upload_bytes_per_sec: up,
        total_connections: 1,
        established_connections: 1,
    }
}

fn snapshot(ts: i64, up: f64, down: f64) -> AnalysisSnapshot {
    AnalysisSnapshot {
        timestamp: ts,
        processes: vec![record(1, "chrome", 40.0, 4.0), record(2, "idle", 0.0, 0.0)],
        connections: Vec::new(),
        remote_groups: Vec::new(),
        global_stats: Some(GlobalStats {
            upload_bytes_per_sec: up,
            download_bytes_per_sec: down,
            per_interface: Vec::new(),
        }),
    }
}

// Records every control message; on START pushes `script` and then idles.
fn scripted(script: Vec<AnalysisSnapshot>, log: Arc<Mutex<Vec<ControlMessage>>>) -> Entrypoint {
    Box::new(move |mut ctx: WorkerContext| {
        Box::pin(async move {
            let mut script = Some(script);
            while let Some(msg) = ctx.control.recv().await {
                let start = msg == ControlMessage::Start;
                log.lock().unwrap().push(msg);
                if start {
                    for data in script.take().unwrap_or_default() {
                        if ctx.events.send(WorkerEvent::TrafficUpdate { data }).await.is_err() {
                            return;
                        }
                    }
                }
            }
        }) as WorkerFuture
    })
}

async fn wait_ticks(monitor: &TrafficMonitor, n: u64) {
    let mut rx = monitor.subscribe();
    timeout(Duration::from_secs(5), rx.wait_for(|t| *t >= n))
        .await
        .expect("ticks in time")
        .expect("monitor alive");
}

#[tokio::test]
async fn analyze_is_empty_before_first_tick() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let monitor = TrafficMonitor::start(
        WorkerSupervisor::new(),
        scripted(Vec::new(), log),
        Arc::new(MemoryStore::new()),
        MonitorOptions::default(),
    )
    .expect("start");
    let snap = monitor.analyze();
    assert_eq!(snap, AnalysisSnapshot::empty());
    assert_eq!(traffic_scalar(&snap), (0.0, 0.0));
    assert!(monitor.recent_traffic_history().is_empty());
}

#[tokio::test]
async fn start_sends_filters_then_start() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let monitor = TrafficMonitor::start(
        WorkerSupervisor::new(),
        scripted(vec![snapshot(1, 0.0, 0.0)], Arc::clone(&log)),
        Arc::new(MemoryStore::new()),
        MonitorOptions {
            filters: vec!["chrome".into()],
            ..MonitorOptions::default()
        },
    )
    .expect("start");
    wait_ticks(&monitor, 1).await;
    assert!(monitor.set_filters(vec!["zoom".into()]));
    timeout(Duration::from_secs(5), async {
        while log.lock().unwrap().len() < 3 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("control messages delivered");

    assert_eq!(
        *log.lock().unwrap(),
        vec![
            ControlMessage::SetFilters {
                filters: vec!["chrome".into()]
            },
            ControlMessage::Start,
            ControlMessage::SetFilters {
                filters: vec!["zoom".into()]
            },
        ]
    );
}

#[tokio::test]
async fn snapshots_feed_cache_history_and_store() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let store = Arc::new(MemoryStore::new());
    let monitor = TrafficMonitor::start(
        WorkerSupervisor::new(),
        scripted(
            vec![
                snapshot(1_000, 10.0, 100.0),
                snapshot(2_000, 20.0, 200.0),
                snapshot(3_000, 5.0, 300.0),
            ],
            log,
        ),
        store.clone(),
        MonitorOptions::default(),
    )
    .expect("start");
    wait_ticks(&monitor, 3).await;

    assert_eq!(monitor.analyze().timestamp, 3_000);
    let history = monitor.recent_traffic_history();
    let pairs: Vec<(i64, f64, f64)> = history
        .iter()
        .map(|p| (p.timestamp, p.upload_bytes_per_sec, p.download_bytes_per_sec))
        .collect();
    assert_eq!(
        pairs,
        vec![(1_000, 10.0, 100.0), (2_000, 20.0, 200.0), (3_000, 5.0, 300.0)]
    );
    assert_eq!(monitor.peak(), (20.0, 300.0));

    let data = store.data();
    let (_, totals) = data.global.iter().next().expect("a day bucket");
    assert_eq!(totals.download, 600.0);
    assert_eq!(totals.upload, 35.0);
    let (_, per_process) = data.processes.iter().next().expect("a day bucket");
    // processes with no traffic are not forwarded
    assert_eq!(per_process.len(), 1);
    assert_eq!(per_process["chrome"].download, 120.0);
    let recent = store.recent_traffic();
    assert_eq!(recent.len(), 3);
    assert_eq!(recent[2].rx, 300.0);
    assert_eq!(recent[2].tx, 5.0);
}

#[tokio::test]
async fn missing_interface_totals_fall_back_to_process_sum() {
    let mut snap = snapshot(1, 999.0, 999.0);
    snap.global_stats = None;
    snap.processes.push(record(3, "zoom", 10.0, 6.0));
    assert_eq!(traffic_scalar(&snap), (10.0, 50.0));

    let log = Arc::new(Mutex::new(Vec::new()));
    let monitor = TrafficMonitor::start(
        WorkerSupervisor::new(),
        scripted(vec![snap], log),
        Arc::new(MemoryStore::new()),
        MonitorOptions::default(),
    )
    .expect("start");
    wait_ticks(&monitor, 1).await;
    let last = monitor.recent_traffic_history().pop().expect("one point");
    assert_eq!(last.upload_bytes_per_sec, 10.0);
    assert_eq!(last.download_bytes_per_sec, 50.0);
}

#[tokio::test]
async fn history_is_seeded_from_store_and_capped() {
    let rows: Vec<RecentTraffic> = (1..=70)
        .map(|i| RecentTraffic {
            timestamp: i,
            rx: (i * 100) as f64,
            tx: i as f64,
        })
        .collect();
    let log = Arc::new(Mutex::new(Vec::new()));
    let monitor = TrafficMonitor::start(
        WorkerSupervisor::new(),
        scripted(vec![snapshot(71, 1.0, 2.0)], log),
        Arc::new(MemoryStore::with_recent(rows)),
        MonitorOptions::default(),
    )
    .expect("start");

    wait_ticks(&monitor, 1).await;
    let history = monitor.recent_traffic_history();
    assert_eq!(history.len(), 60);
    assert_eq!(history[0].timestamp, 12);
    assert_eq!(history[0].upload_bytes_per_sec, 12.0);
    assert_eq!(history[0].download_bytes_per_sec, 1_200.0);
    assert_eq!(history[59].timestamp, 71);
}

#[tokio::test]
async fn stop_ends_the_worker() {
    let supervisor = WorkerSupervisor::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    let monitor = TrafficMonitor::start(
        supervisor.clone(),
        scripted(Vec::new(), log),
        Arc::new(MemoryStore::new()),
        MonitorOptions::default(),
    )
    .expect("start");
    assert!(monitor.is_running());
    assert!(supervisor.is_running("traffic-monitor"));

    monitor.stop();
    assert!(!monitor.is_running());
    assert!(!monitor.set_filters(vec!["x".into()]));
    // last good snapshot stays readable
    assert_eq!(monitor.analyze(), AnalysisSnapshot::empty());
}

#[tokio::test]
async fn second_monitor_on_same_id_is_rejected() {
    let supervisor = WorkerSupervisor::new();
    let first = TrafficMonitor::start(
        supervisor.clone(),
        scripted(Vec::new(), Arc::new(Mutex::new(Vec::new()))),
        Arc::new(MemoryStore::new()),
        MonitorOptions::default(),
    )
    .expect("start");
    let second = TrafficMonitor::start(
        supervisor.clone(),
        scripted(Vec::new(), Arc::new(Mutex::new(Vec::new()))),
        Arc::new(MemoryStore::new()),
        MonitorOptions::default(),
    );
    assert!(second.is_err());
    assert!(first.is_running());
}

struct OneProcessSource;

impl SystemSource for OneProcessSource {
    fn connections(&self) -> anyhow::Result<Vec<RawConnection>> {
        Ok(vec![RawConnection {
            pid: 77,
            local_address: "10.0.0.9".into(),
            local_port: 40000,
            remote_address: "9.9.9.9".into(),
            remote_port: 853,
            state: ConnectionState::Established,
        }])
    }

    fn processes(&self) -> anyhow::Result<Vec<RawProcess>> {
        Ok(vec![RawProcess {
            pid: 77,
            name: "resolver".into(),
            ..RawProcess::default()
        }])
    }

    fn interfaces(&self) -> anyhow::Result<Vec<InterfaceStats>> {
        Ok(vec![InterfaceStats {
            name: "eth0".into(),
            rx_bytes_per_sec: 64.0,
            tx_bytes_per_sec: 32.0,
        }])
    }

    fn process_io(&self) -> anyhow::Result<Vec<ProcessIo>> {
        anyhow::bail!("not supported here")
    }
}

#[tokio::test]
async fn in_process_worker_end_to_end() {
    let store = Arc::new(MemoryStore::new());
    let monitor = TrafficMonitor::start(
        WorkerSupervisor::new(),
        in_process_entrypoint(
            Arc::new(OneProcessSource),
            AgentConfig {
                interval: Duration::from_millis(20),
                filters: Vec::new(),
            },
        ),
        store.clone(),
        MonitorOptions::default(),
    )
    .expect("start");
    wait_ticks(&monitor, 3).await;

    let snap = monitor.analyze();
    assert_eq!(snap.processes.len(), 1);
    assert_eq!(snap.processes[0].name, "resolver");
    assert_eq!(snap.processes[0].established_connections, 1);
    assert_eq!(snap.processes[0].download_bytes_per_sec, 0.0);
    assert_eq!(snap.remote_groups[0].remote_ip, "9.9.9.9");
    assert_eq!(traffic_scalar(&snap), (32.0, 64.0));
    assert!(monitor.recent_traffic_history().len() >= 3);
    assert!(store.recent_traffic().len() >= 3);
}

// Counts writes and tick boundaries on top of an in-memory store.
#[derive(Default)]
struct TickCountingStore {
    inner: MemoryStore,
    writes: AtomicUsize,
    ticks: AtomicUsize,
}

impl TrafficStore for TickCountingStore {
    fn update_global_daily_stats(&self, day: &str, download: f64, upload: f64) {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.update_global_daily_stats(day, download, upload);
    }

    fn update_process_daily_stats(&self, day: &str, processes: &[ProcessTraffic]) {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.update_process_daily_stats(day, processes);
    }

    fn add_recent_traffic(&self, upload: f64, download: f64) {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.add_recent_traffic(upload, download);
    }

    fn recent_traffic(&self) -> Vec<RecentTraffic> {
        self.inner.recent_traffic()
    }

    fn end_tick(&self) {
        self.ticks.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn store_sees_one_tick_boundary_per_snapshot() {
    let store = Arc::new(TickCountingStore::default());
    let monitor = TrafficMonitor::start(
        WorkerSupervisor::new(),
        scripted(
            vec![snapshot(1, 1.0, 2.0), snapshot(2, 3.0, 4.0)],
            Arc::new(Mutex::new(Vec::new())),
        ),
        store.clone(),
        MonitorOptions::default(),
    )
    .expect("start");
    wait_ticks(&monitor, 2).await;

    assert_eq!(store.ticks.load(Ordering::SeqCst), 2);
    assert_eq!(store.writes.load(Ordering::SeqCst), 6);
}

#[tokio::test]
async fn json_store_is_flushed_at_most_once_per_tick() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("traffic.json");
    let store = Arc::new(JsonFileStore::open(&path));
    let monitor = TrafficMonitor::start(
        WorkerSupervisor::new(),
        scripted(
            vec![snapshot(1, 1.0, 2.0), snapshot(2, 3.0, 4.0), snapshot(3, 5.0, 6.0)],
            Arc::new(Mutex::new(Vec::new())),
        ),
        store.clone(),
        MonitorOptions::default(),
    )
    .expect("start");
    wait_ticks(&monitor, 3).await;
    monitor.stop();

    store.sync();
    let flushes = store.flush_count();
    assert!((1..=3).contains(&flushes), "{flushes} flushes for 3 ticks");
    let on_disk = JsonFileStore::open(&path);
    assert_eq!(on_disk.recent_traffic().len(), 3);
}
