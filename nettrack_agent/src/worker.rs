//! Sampling worker loop: Idle until START, then sample + correlate + push on a fixed
//! interval until STOP. Runs until the control channel closes or the host stops listening.

use std::future::pending;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::AgentConfig;
use crate::correlator::correlate;
use crate::protocol::{ControlMessage, WorkerEvent};
use crate::sampler::Sampler;

enum Phase {
    Idle,
    Running(Interval),
}

pub struct SamplingWorker {
    sampler: Sampler,
    filters: Vec<String>,
    period: Duration,
    phase: Phase,
}

impl SamplingWorker {
    pub fn new(sampler: Sampler, config: AgentConfig) -> Self {
        Self {
            sampler,
            filters: config.filters,
            period: config.interval,
            phase: Phase::Idle,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self.phase, Phase::Running(_))
    }

    pub fn filters(&self) -> &[String] {
        &self.filters
    }

    pub fn handle_control(&mut self, msg: ControlMessage) {
        match msg {
            ControlMessage::Start => {
                if self.is_running() {
                    debug!("START while running; ignored");
                    return;
                }
                // First tick completes immediately, so sampling starts right away.
                let mut ticker = interval(self.period);
                // One sample at a time: a slow tick delays the next instead of bursting.
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                self.phase = Phase::Running(ticker);
                info!(period_ms = self.period.as_millis() as u64, "sampling started");
            }
            ControlMessage::Stop => {
                if self.is_running() {
                    info!("sampling stopped");
                }
                self.phase = Phase::Idle;
            }
            ControlMessage::SetFilters { filters } => {
                debug!(?filters, "filters updated");
                self.filters = filters;
            }
        }
    }

    async fn next_tick(&mut self) {
        match &mut self.phase {
            Phase::Running(ticker) => {
                ticker.tick().await;
            }
            Phase::Idle => pending::<()>().await,
        }
    }

    /// One sample + correlate + push. Returns false once nobody is listening.
    pub async fn tick(&self, events: &mpsc::Sender<WorkerEvent>) -> bool {
        let raw = match self.sampler.sample().await {
            Ok(raw) => raw,
            Err(e) => {
                warn!("sample failed, skipping tick: {e:#}");
                return true;
            }
        };
        let data = correlate(&raw, &self.filters);
        events.send(WorkerEvent::TrafficUpdate { data }).await.is_ok()
    }

    /// Hands the worker back when it exits, with its last phase and filters.
    pub async fn run(
        mut self,
        mut control: mpsc::Receiver<ControlMessage>,
        events: mpsc::Sender<WorkerEvent>,
    ) -> Self {
        loop {
            tokio::select! {
                msg = control.recv() => match msg {
                    Some(msg) => self.handle_control(msg),
                    None => {
                        info!("control channel closed; worker exiting");
                        break;
                    }
                },
                _ = self.next_tick() => {
                    if !self.tick(&events).await {
                        info!("event channel closed; worker exiting");
                        break;
                    }
                }
            }
        }
        self
    }
}
