//! Sampling side of nettrack: raw data sources, the correlator and the worker loop that
//! pushes one [`types::AnalysisSnapshot`] per tick.

pub mod classify;
pub mod config;
pub mod correlator;
pub mod netparse;
pub mod protocol;
pub mod sampler;
pub mod sources;
pub mod stdio;
pub mod telemetry;
pub mod types;
pub mod worker;
