//! Worker lifecycle in the host: spawn, route events, send control, terminate.
//!
//! A worker is an isolated task (optionally bridging to an out-of-process agent) that only
//! talks to the host through its [`WorkerContext`] channels. Must be used from inside a
//! tokio runtime.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use anyhow::Context;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use nettrack_agent::config::AgentConfig;
use nettrack_agent::protocol::{decode_line, encode_line, ControlMessage, WorkerEvent};
use nettrack_agent::sampler::Sampler;
use nettrack_agent::sources::SystemSource;
use nettrack_agent::worker::SamplingWorker;

const CONTROL_DEPTH: usize = 16;
const EVENT_DEPTH: usize = 64;

pub type EventHandler = Arc<dyn Fn(WorkerEvent) + Send + Sync>;
pub type WorkerFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;
pub type Entrypoint = Box<dyn FnOnce(WorkerContext) -> WorkerFuture + Send>;

/// The worker's only link to the host.
pub struct WorkerContext {
    pub control: mpsc::Receiver<ControlMessage>,
    pub events: mpsc::Sender<WorkerEvent>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SupervisorError {
    #[error("worker '{0}' is already running")]
    AlreadyRunning(String),
    #[error("worker '{0}' is not running")]
    NotRunning(String),
    #[error("channel to worker '{0}' is closed")]
    ChannelClosed(String),
    #[error("control queue for worker '{0}' is full")]
    QueueFull(String),
}

struct WorkerEntry {
    generation: u64,
    control: mpsc::Sender<ControlMessage>,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct Registry {
    workers: HashMap<String, WorkerEntry>,
    handlers: HashMap<String, EventHandler>,
    next_generation: u64,
}

fn lock(m: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Clone, Default)]
pub struct WorkerSupervisor {
    inner: Arc<Mutex<Registry>>,
}

impl WorkerSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start `entrypoint` as worker `id`. Rejected if `id` is already running; the existing
    /// worker is left untouched.
    pub fn spawn<F, Fut>(&self, id: &str, entrypoint: F) -> Result<(), SupervisorError>
    where
        F: FnOnce(WorkerContext) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut reg = lock(&self.inner);
        if reg.workers.contains_key(id) {
            warn!(worker = id, "spawn rejected: already running");
            return Err(SupervisorError::AlreadyRunning(id.to_string()));
        }
        let (control_tx, control_rx) = mpsc::channel(CONTROL_DEPTH);
        let (event_tx, event_rx) = mpsc::channel(EVENT_DEPTH);
        let generation = reg.next_generation;
        reg.next_generation += 1;

        let task = tokio::spawn(entrypoint(WorkerContext {
            control: control_rx,
            events: event_tx,
        }));
        tokio::spawn(route_events(
            Arc::downgrade(&self.inner),
            id.to_string(),
            generation,
            event_rx,
        ));
        reg.workers.insert(
            id.to_string(),
            WorkerEntry {
                generation,
                control: control_tx,
                task,
            },
        );
        info!(worker = id, "worker spawned");
        Ok(())
    }

    /// Queue a control message without waiting.
    pub fn try_send(&self, id: &str, msg: ControlMessage) -> Result<(), SupervisorError> {
        let reg = lock(&self.inner);
        let entry = reg
            .workers
            .get(id)
            .ok_or_else(|| SupervisorError::NotRunning(id.to_string()))?;
        entry.control.try_send(msg).map_err(|e| match e {
            TrySendError::Closed(_) => SupervisorError::ChannelClosed(id.to_string()),
            TrySendError::Full(_) => SupervisorError::QueueFull(id.to_string()),
        })
    }

    /// Like [`try_send`](Self::try_send) but failures are logged and dropped.
    pub fn send(&self, id: &str, msg: ControlMessage) -> bool {
        match self.try_send(id, msg) {
            Ok(()) => true,
            Err(e) => {
                warn!("control message dropped: {e}");
                false
            }
        }
    }

    /// Register the event handler for `id`, replacing any previous one. May be called
    /// before the worker is spawned.
    pub fn on_message<H>(&self, id: &str, handler: H)
    where
        H: Fn(WorkerEvent) + Send + Sync + 'static,
    {
        lock(&self.inner)
            .handlers
            .insert(id.to_string(), Arc::new(handler));
    }

    pub fn is_running(&self, id: &str) -> bool {
        lock(&self.inner).workers.contains_key(id)
    }

    pub fn worker_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = lock(&self.inner).workers.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Terminate `id` and forget its handler. Returns whether it was running.
    pub fn stop(&self, id: &str) -> bool {
        let mut reg = lock(&self.inner);
        reg.handlers.remove(id);
        match reg.workers.remove(id) {
            Some(entry) => {
                entry.task.abort();
                info!(worker = id, "worker stopped");
                true
            }
            None => false,
        }
    }

    /// Host shutdown. Workers that already exited are simply absent.
    pub fn stop_all(&self) {
        let mut reg = lock(&self.inner);
        reg.handlers.clear();
        for (id, entry) in reg.workers.drain() {
            entry.task.abort();
            debug!(worker = %id, "worker stopped");
        }
    }
}

// One router per worker keeps delivery FIFO. When the event channel closes the worker has
// exited; drop it from the registry unless the id was re-spawned meanwhile.
async fn route_events(
    registry: Weak<Mutex<Registry>>,
    id: String,
    generation: u64,
    mut events: mpsc::Receiver<WorkerEvent>,
) {
    while let Some(ev) = events.recv().await {
        let Some(reg) = registry.upgrade() else {
            return;
        };
        let handler = lock(&reg).handlers.get(&id).cloned();
        match handler {
            Some(h) => h(ev),
            None => debug!(worker = %id, "no handler registered; event dropped"),
        }
    }
    if let Some(reg) = registry.upgrade() {
        let mut reg = lock(&reg);
        if reg
            .workers
            .get(&id)
            .is_some_and(|w| w.generation == generation)
        {
            reg.workers.remove(&id);
            info!(worker = %id, "worker exited");
        }
    }
}

/// Run the sampling worker loop inside this process.
pub fn in_process_entrypoint(source: Arc<dyn SystemSource>, config: AgentConfig) -> Entrypoint {
    Box::new(move |ctx: WorkerContext| {
        Box::pin(async move {
            let worker = SamplingWorker::new(Sampler::new(source), config);
            worker.run(ctx.control, ctx.events).await;
        }) as WorkerFuture
    })
}

/// Run the worker as a `nettrack_agent` child process speaking JSON lines on stdio.
/// The child is killed when the worker is stopped.
pub fn agent_process_entrypoint(program: PathBuf) -> Entrypoint {
    Box::new(move |ctx: WorkerContext| {
        Box::pin(async move {
            if let Err(e) = bridge_agent_process(&program, ctx).await {
                warn!("agent process {} failed: {e:#}", program.display());
            }
        }) as WorkerFuture
    })
}

async fn bridge_agent_process(program: &Path, ctx: WorkerContext) -> anyhow::Result<()> {
    let mut child = Command::new(program)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("spawning {}", program.display()))?;
    let mut stdin = child.stdin.take().context("agent stdin not piped")?;
    let stdout = child.stdout.take().context("agent stdout not piped")?;
    let WorkerContext {
        mut control,
        events,
    } = ctx;

    // control -> child stdin; closing the channel closes the child's input
    let forward = tokio::spawn(async move {
        while let Some(msg) = control.recv().await {
            let line = encode_line(&msg)?;
            stdin.write_all(line.as_bytes()).await?;
            stdin.flush().await?;
        }
        anyhow::Ok(())
    });

    // child stdout -> events, until the child exits
    let mut lines = BufReader::new(stdout).lines();
    let pumped: anyhow::Result<()> = async {
        while let Some(line) = lines.next_line().await? {
            match decode_line::<WorkerEvent>(&line) {
                Ok(ev) => {
                    if events.send(ev).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!("malformed event from agent: {e:#}"),
            }
        }
        Ok(())
    }
    .await;

    forward.abort();
    let status = child.wait().await?;
    info!(%status, "agent process exited");
    pumped
}
