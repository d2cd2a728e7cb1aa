//! Metrics collector — receives turn events from agents, retains a rolling
//! window in memory, and serves aggregate latency stats.

pub mod server;
pub mod store;

pub use server::start_collector;
pub use store::EventStore;
