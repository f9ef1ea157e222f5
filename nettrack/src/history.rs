//! Small utilities to manage bounded history buffers for charts.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

pub const DEFAULT_HISTORY_CAPACITY: usize = 60;

pub fn push_capped<T>(dq: &mut VecDeque<T>, v: T, cap: usize) {
    if cap == 0 {
        return;
    }
    while dq.len() >= cap {
        dq.pop_front();
    }
    dq.push_back(v);
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrafficHistoryPoint {
    /// unix milliseconds
    pub timestamp: i64,
    pub upload_bytes_per_sec: f64,
    pub download_bytes_per_sec: f64,
}

// Fixed-capacity FIFO of per-tick (upload, download) pairs, oldest first
#[derive(Debug, Clone)]
pub struct TrafficHistory {
    points: VecDeque<TrafficHistoryPoint>,
    cap: usize,
}

impl TrafficHistory {
    pub fn new(cap: usize) -> Self {
        Self {
            points: VecDeque::with_capacity(cap),
            cap,
        }
    }

    pub fn capacity(&self) -> usize {
        self.cap
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn push(&mut self, point: TrafficHistoryPoint) {
        push_capped(&mut self.points, point, self.cap);
    }

    /// Replace contents with the newest `capacity` of `points` (given oldest first).
    pub fn seed<I: IntoIterator<Item = TrafficHistoryPoint>>(&mut self, points: I) {
        self.points.clear();
        for p in points {
            self.push(p);
        }
    }

    pub fn points(&self) -> Vec<TrafficHistoryPoint> {
        self.points.iter().copied().collect()
    }

    pub fn latest(&self) -> Option<TrafficHistoryPoint> {
        self.points.back().copied()
    }

    /// Highest (upload, download) seen in the window.
    pub fn peak(&self) -> (f64, f64) {
        self.points.iter().fold((0.0, 0.0), |(up, down), p| {
            (up.max(p.upload_bytes_per_sec), down.max(p.download_bytes_per_sec))
        })
    }
}

impl Default for TrafficHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}
