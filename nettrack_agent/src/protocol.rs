//! Messages exchanged between the host and a sampling worker.
//!
//! Over the stdio transport every message is one line of compact JSON, e.g.
//! `{"type":"SET_FILTERS","filters":["chrome"]}`.

use serde::{Deserialize, Serialize};

use crate::types::AnalysisSnapshot;

/// Host -> worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
    Start,
    Stop,
    SetFilters { filters: Vec<String> },
}

/// Worker -> host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerEvent {
    TrafficUpdate { data: AnalysisSnapshot },
}

pub fn encode_line<T: Serialize>(msg: &T) -> anyhow::Result<String> {
    let mut line = serde_json::to_string(msg)?;
    line.push('\n');
    Ok(line)
}

pub fn decode_line<T: for<'de> Deserialize<'de>>(line: &str) -> anyhow::Result<T> {
    Ok(serde_json::from_str(line.trim())?)
}
