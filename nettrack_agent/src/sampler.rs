//! Snapshot sampler: gathers the four raw datasets of a tick concurrently and returns
//! them unmerged.

use std::sync::Arc;

use anyhow::anyhow;
use chrono::Utc;
use tracing::{debug, warn};

use crate::sources::SystemSource;
use crate::types::RawSample;

#[derive(Clone)]
pub struct Sampler {
    source: Arc<dyn SystemSource>,
}

impl Sampler {
    pub fn new(source: Arc<dyn SystemSource>) -> Self {
        Self { source }
    }

    /// Resolves once all four fetches settle. Per-process I/O failures degrade to an
    /// empty list; any other failure fails the whole sample.
    pub async fn sample(&self) -> anyhow::Result<RawSample> {
        let (connections, processes, interfaces, process_io) = tokio::join!(
            self.fetch(|s| s.connections()),
            self.fetch(|s| s.processes()),
            self.fetch(|s| s.interfaces()),
            self.fetch(|s| s.process_io()),
        );

        let process_io = process_io.unwrap_or_else(|e| {
            warn!("per-process io unavailable: {e:#}");
            Vec::new()
        });
        let sample = RawSample {
            captured_at: Utc::now().timestamp_millis(),
            connections: connections?,
            processes: processes?,
            interfaces: interfaces?,
            process_io,
        };
        debug!(
            connections = sample.connections.len(),
            processes = sample.processes.len(),
            interfaces = sample.interfaces.len(),
            process_io = sample.process_io.len(),
            "sample collected"
        );
        Ok(sample)
    }

    async fn fetch<T, F>(&self, f: F) -> anyhow::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn SystemSource) -> anyhow::Result<T> + Send + 'static,
    {
        let source = Arc::clone(&self.source);
        tokio::task::spawn_blocking(move || f(source.as_ref()))
            .await
            .map_err(|e| anyhow!("sampler task failed: {e}"))?
    }
}
