//! Observability utilities.
//!
//! Tracing setup, step timing and queue depth monitoring.

mod queue_monitor;
mod tracing;

pub use queue_monitor::QueueMonitor;
pub use tracing::{init_tracing, NodeTiming, SpanTimer};
