//! Host-side façade: caches the latest snapshot for non-blocking reads, keeps the rolling
//! traffic history and forwards per-tick aggregates to the store.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Local;
use tokio::sync::watch;
use tracing::debug;

use nettrack_agent::protocol::{ControlMessage, WorkerEvent};
use nettrack_agent::types::AnalysisSnapshot;

use crate::history::{TrafficHistory, TrafficHistoryPoint, DEFAULT_HISTORY_CAPACITY};
use crate::settings::Settings;
use crate::store::{ProcessTraffic, TrafficStore};
use crate::supervisor::{Entrypoint, SupervisorError, WorkerSupervisor};

pub const WORKER_ID: &str = "traffic-monitor";

#[derive(Debug, Clone)]
pub struct MonitorOptions {
    pub worker_id: String,
    pub filters: Vec<String>,
    pub history_capacity: usize,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            worker_id: WORKER_ID.to_string(),
            filters: Vec::new(),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
        }
    }
}

impl From<&Settings> for MonitorOptions {
    fn from(s: &Settings) -> Self {
        Self {
            filters: s.filters.clone(),
            history_capacity: s.history_capacity,
            ..Self::default()
        }
    }
}

struct MonitorState {
    latest: AnalysisSnapshot,
    history: TrafficHistory,
}

fn lock(m: &Mutex<MonitorState>) -> MutexGuard<'_, MonitorState> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

pub struct TrafficMonitor {
    supervisor: WorkerSupervisor,
    worker_id: String,
    state: Arc<Mutex<MonitorState>>,
    ticks: watch::Receiver<u64>,
}

/// (upload, download) for one tick: interface totals when present, else the sum of
/// per-process speeds.
pub fn traffic_scalar(snapshot: &AnalysisSnapshot) -> (f64, f64) {
    match &snapshot.global_stats {
        Some(g) => (g.upload_bytes_per_sec, g.download_bytes_per_sec),
        None => snapshot.processes.iter().fold((0.0, 0.0), |(up, down), p| {
            (up + p.upload_bytes_per_sec, down + p.download_bytes_per_sec)
        }),
    }
}

pub fn day_key() -> String {
    Local::now().format("%Y-%m-%d").to_string()
}

impl TrafficMonitor {
    /// Seed history from the store, spawn the worker and start sampling.
    pub fn start(
        supervisor: WorkerSupervisor,
        entrypoint: Entrypoint,
        store: Arc<dyn TrafficStore>,
        options: MonitorOptions,
    ) -> Result<Self, SupervisorError> {
        let mut history = TrafficHistory::new(options.history_capacity);
        history.seed(store.recent_traffic().into_iter().map(|r| TrafficHistoryPoint {
            timestamp: r.timestamp,
            upload_bytes_per_sec: r.tx,
            download_bytes_per_sec: r.rx,
        }));
        let state = Arc::new(Mutex::new(MonitorState {
            latest: AnalysisSnapshot::empty(),
            history,
        }));
        let (tick_tx, tick_rx) = watch::channel(0u64);

        // The worker stays silent until START, so the handler can follow the spawn. A rejected
        // spawn then leaves the running worker's handler alone.
        supervisor.spawn(&options.worker_id, entrypoint)?;
        let handler_state = Arc::clone(&state);
        supervisor.on_message(&options.worker_id, move |ev| match ev {
            WorkerEvent::TrafficUpdate { data } => {
                ingest(&handler_state, store.as_ref(), data);
                tick_tx.send_modify(|n| *n += 1);
            }
        });
        supervisor.send(
            &options.worker_id,
            ControlMessage::SetFilters {
                filters: options.filters.clone(),
            },
        );
        supervisor.send(&options.worker_id, ControlMessage::Start);

        Ok(Self {
            supervisor,
            worker_id: options.worker_id,
            state,
            ticks: tick_rx,
        })
    }

    /// Latest snapshot, or the empty snapshot before the first tick. Never waits.
    pub fn analyze(&self) -> AnalysisSnapshot {
        lock(&self.state).latest.clone()
    }

    pub fn set_filters(&self, filters: Vec<String>) -> bool {
        self.supervisor
            .send(&self.worker_id, ControlMessage::SetFilters { filters })
    }

    /// Oldest first, at most the configured capacity.
    pub fn recent_traffic_history(&self) -> Vec<TrafficHistoryPoint> {
        lock(&self.state).history.points()
    }

    pub fn peak(&self) -> (f64, f64) {
        lock(&self.state).history.peak()
    }

    /// Changes once per received snapshot; the value is the running tick count.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.ticks.clone()
    }

    pub fn is_running(&self) -> bool {
        self.supervisor.is_running(&self.worker_id)
    }

    pub fn stop(&self) {
        self.supervisor.stop(&self.worker_id);
    }
}

impl Drop for TrafficMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn ingest(state: &Mutex<MonitorState>, store: &dyn TrafficStore, data: AnalysisSnapshot) {
    let (upload, download) = traffic_scalar(&data);
    let processes: Vec<ProcessTraffic> = data
        .processes
        .iter()
        .filter(|p| p.download_bytes_per_sec > 0.0 || p.upload_bytes_per_sec > 0.0)
        .map(|p| ProcessTraffic {
            name: p.name.clone(),
            rx: p.download_bytes_per_sec,
            tx: p.upload_bytes_per_sec,
        })
        .collect();
    debug!(
        upload,
        download,
        processes = data.processes.len(),
        "snapshot received"
    );
    {
        let mut st = lock(state);
        st.history.push(TrafficHistoryPoint {
            timestamp: data.timestamp,
            upload_bytes_per_sec: upload,
            download_bytes_per_sec: download,
        });
        st.latest = data;
    }

    // Rates over a one-second tick double as the bytes moved during it.
    let day = day_key();
    store.update_global_daily_stats(&day, download, upload);
    if !processes.is_empty() {
        store.update_process_daily_stats(&day, &processes);
    }
    store.add_recent_traffic(upload, download);
    store.end_tick();
}
