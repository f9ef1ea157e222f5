//! Host side of nettrack: supervises the sampling worker, caches its snapshots, keeps the
//! rolling traffic history and hands aggregates to a store.

pub mod history;
pub mod monitor;
pub mod report;
pub mod settings;
pub mod store;
pub mod supervisor;

pub use nettrack_agent::types;
