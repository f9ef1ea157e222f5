//! Persistence port. The monitor only writes through it (fire-and-forget, never waiting on
//! disk) and reads recent traffic once at startup to seed the chart history.

use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc as std_mpsc, Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::warn;

use crate::history::push_capped;

/// Recent-traffic rows kept by [`JsonFileStore`] (one hour at one tick per second).
pub const RECENT_TRAFFIC_CAP: usize = 3_600;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessTraffic {
    pub name: String,
    pub rx: f64,
    pub tx: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RecentTraffic {
    pub timestamp: i64,
    pub rx: f64,
    pub tx: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DailyTotals {
    pub download: f64,
    pub upload: f64,
}

/// Writes must not block the caller on failure; implementations log their own errors.
pub trait TrafficStore: Send + Sync {
    fn update_global_daily_stats(&self, day: &str, download: f64, upload: f64);
    fn update_process_daily_stats(&self, day: &str, processes: &[ProcessTraffic]);
    fn add_recent_traffic(&self, upload: f64, download: f64);
    /// Oldest first.
    fn recent_traffic(&self) -> Vec<RecentTraffic>;
    /// Called once after the writes of a tick. Stores that persist batch their I/O here.
    fn end_tick(&self) {}
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreData {
    #[serde(default)]
    pub global: BTreeMap<String, DailyTotals>,
    // day -> process name -> totals
    #[serde(default)]
    pub processes: BTreeMap<String, BTreeMap<String, DailyTotals>>,
    #[serde(default)]
    pub recent: VecDeque<RecentTraffic>,
}

impl StoreData {
    fn add_global(&mut self, day: &str, download: f64, upload: f64) {
        let t = self.global.entry(day.to_string()).or_default();
        t.download += download.max(0.0);
        t.upload += upload.max(0.0);
    }

    fn add_processes(&mut self, day: &str, processes: &[ProcessTraffic]) {
        let per_day = self.processes.entry(day.to_string()).or_default();
        for p in processes {
            let t = per_day.entry(p.name.clone()).or_default();
            t.download += p.rx.max(0.0);
            t.upload += p.tx.max(0.0);
        }
    }

    fn add_recent(&mut self, upload: f64, download: f64) {
        let row = RecentTraffic {
            timestamp: chrono::Utc::now().timestamp_millis(),
            rx: download,
            tx: upload,
        };
        push_capped(&mut self.recent, row, RECENT_TRAFFIC_CAP);
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// In-process store; the default when no store path is configured.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: Mutex<StoreData>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_recent(recent: Vec<RecentTraffic>) -> Self {
        Self {
            data: Mutex::new(StoreData {
                recent: recent.into(),
                ..StoreData::default()
            }),
        }
    }

    pub fn data(&self) -> StoreData {
        lock(&self.data).clone()
    }
}

impl TrafficStore for MemoryStore {
    fn update_global_daily_stats(&self, day: &str, download: f64, upload: f64) {
        lock(&self.data).add_global(day, download, upload);
    }

    fn update_process_daily_stats(&self, day: &str, processes: &[ProcessTraffic]) {
        lock(&self.data).add_processes(day, processes);
    }

    fn add_recent_traffic(&self, upload: f64, download: f64) {
        lock(&self.data).add_recent(upload, download);
    }

    fn recent_traffic(&self) -> Vec<RecentTraffic> {
        lock(&self.data).recent.iter().copied().collect()
    }
}

enum WriterMsg {
    Flush,
    Sync(std_mpsc::Sender<()>),
}

/// JSON file store. Updates only touch memory; the file is rewritten by a dedicated writer
/// thread, at most once per [`end_tick`](TrafficStore::end_tick).
pub struct JsonFileStore {
    path: PathBuf,
    data: Arc<Mutex<StoreData>>,
    dirty: Arc<AtomicBool>,
    flushes: Arc<AtomicU64>,
    writer: Option<mpsc::UnboundedSender<WriterMsg>>,
    thread: Option<JoinHandle<()>>,
}

impl JsonFileStore {
    /// Missing or unreadable files start empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let data = match fs::read_to_string(&path) {
            Ok(s) => serde_json::from_str(&s).unwrap_or_else(|e| {
                warn!("store {} unreadable, starting empty: {e}", path.display());
                StoreData::default()
            }),
            Err(_) => StoreData::default(),
        };
        let data = Arc::new(Mutex::new(data));
        let dirty = Arc::new(AtomicBool::new(false));
        let flushes = Arc::new(AtomicU64::new(0));
        let (tx, rx) = mpsc::unbounded_channel();
        let thread = std::thread::spawn({
            let path = path.clone();
            let data = Arc::clone(&data);
            let dirty = Arc::clone(&dirty);
            let flushes = Arc::clone(&flushes);
            move || run_writer(&path, &data, &dirty, &flushes, rx)
        });
        Self {
            path,
            data,
            dirty,
            flushes,
            writer: Some(tx),
            thread: Some(thread),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn data(&self) -> StoreData {
        lock(&self.data).clone()
    }

    /// Number of file rewrites so far.
    pub fn flush_count(&self) -> u64 {
        self.flushes.load(Ordering::SeqCst)
    }

    /// Write any pending changes and block until the writer has done so.
    pub fn sync(&self) {
        let (tx, rx) = std_mpsc::channel();
        if self.send(WriterMsg::Sync(tx)) {
            let _ = rx.recv();
        }
    }

    fn send(&self, msg: WriterMsg) -> bool {
        self.writer.as_ref().is_some_and(|w| w.send(msg).is_ok())
    }

    fn update(&self, f: impl FnOnce(&mut StoreData)) {
        {
            let mut data = lock(&self.data);
            f(&mut *data);
        }
        self.dirty.store(true, Ordering::SeqCst);
    }
}

impl Drop for JsonFileStore {
    // Pending changes are written before the store goes away.
    fn drop(&mut self) {
        self.send(WriterMsg::Flush);
        self.writer.take();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn run_writer(
    path: &Path,
    data: &Mutex<StoreData>,
    dirty: &AtomicBool,
    flushes: &AtomicU64,
    mut rx: mpsc::UnboundedReceiver<WriterMsg>,
) {
    while let Some(msg) = rx.blocking_recv() {
        if dirty.swap(false, Ordering::SeqCst) {
            let snapshot = lock(data).clone();
            match write_json(path, &snapshot) {
                Ok(()) => {
                    flushes.fetch_add(1, Ordering::SeqCst);
                }
                Err(e) => warn!("store write to {} failed: {e:#}", path.display()),
            }
        }
        if let WriterMsg::Sync(ack) = msg {
            let _ = ack.send(());
        }
    }
}

fn write_json(path: &Path, data: &StoreData) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_vec(data)?)?;
    Ok(())
}

impl TrafficStore for JsonFileStore {
    fn update_global_daily_stats(&self, day: &str, download: f64, upload: f64) {
        self.update(|d| d.add_global(day, download, upload));
    }

    fn update_process_daily_stats(&self, day: &str, processes: &[ProcessTraffic]) {
        self.update(|d| d.add_processes(day, processes));
    }

    fn add_recent_traffic(&self, upload: f64, download: f64) {
        self.update(|d| d.add_recent(upload, download));
    }

    fn recent_traffic(&self) -> Vec<RecentTraffic> {
        lock(&self.data).recent.iter().copied().collect()
    }

    fn end_tick(&self) {
        self.send(WriterMsg::Flush);
    }
}
