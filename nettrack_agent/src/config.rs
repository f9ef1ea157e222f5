//! Agent settings from the environment. Command-line flags override these in `main`.

use std::time::Duration;

pub const DEFAULT_INTERVAL_MS: u64 = 1_000;

#[derive(Debug, Clone, PartialEq)]
pub struct AgentConfig {
    pub interval: Duration,
    pub filters: Vec<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(DEFAULT_INTERVAL_MS),
            filters: Vec::new(),
        }
    }
}

impl AgentConfig {
    /// NETTRACK_AGENT_INTERVAL_MS and NETTRACK_AGENT_FILTERS (comma-separated).
    pub fn from_env() -> Self {
        let interval_ms: u64 = std::env::var("NETTRACK_AGENT_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|ms| *ms > 0)
            .unwrap_or(DEFAULT_INTERVAL_MS);
        let filters = std::env::var("NETTRACK_AGENT_FILTERS")
            .map(|v| split_filters(&v))
            .unwrap_or_default();
        Self {
            interval: Duration::from_millis(interval_ms),
            filters,
        }
    }
}

pub fn split_filters(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(str::to_string)
        .collect()
}
