//! Tracing setup and step timing.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

static INSTALLED: AtomicBool = AtomicBool::new(false);

/// Installs a global `tracing` subscriber driven by `RUST_LOG`.
///
/// Defaults to `info` when `RUST_LOG` is unset. With `json`, events are
/// written as one JSON object per line. Later calls are no-ops; installing
/// over a subscriber set up elsewhere is an error.
pub fn init_tracing(json: bool) -> anyhow::Result<()> {
    if INSTALLED.swap(true, Ordering::SeqCst) {
        return Ok(());
    }
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).try_init()?;
    } else {
        registry.with(fmt::layer()).try_init()?;
    }
    Ok(())
}

/// Span timer for measuring step durations.
#[derive(Debug)]
pub struct SpanTimer {
    start: Instant,
    name: String,
}

impl SpanTimer {
    /// Starts a new span timer.
    #[must_use]
    pub fn start(name: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            name: name.into(),
        }
    }

    /// Returns the elapsed time.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Ends the span, logging its duration at `trace`.
    pub fn finish(self) -> Duration {
        let elapsed = self.elapsed();
        ::tracing::trace!(
            span = %self.name,
            elapsed_us = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX),
            "Span finished"
        );
        elapsed
    }
}

/// Step timing of one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeTiming {
    /// Node path, with nested pipelines separated by `/`.
    pub path: String,
    /// Number of steps.
    pub steps: u64,
    /// Time spent inside step, in milliseconds.
    pub busy_ms: f64,
}

impl NodeTiming {
    /// Steps per second of busy time; zero before the first measured step.
    #[must_use]
    pub fn steps_per_second(&self) -> f64 {
        if self.busy_ms > 0.0 {
            // Precision loss only past 2^52 steps.
            #[allow(clippy::cast_precision_loss)]
            let steps = self.steps as f64;
            steps * 1000.0 / self.busy_ms
        } else {
            0.0
        }
    }

    /// Nesting depth of the node.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.path.matches('/').count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_timer() {
        let timer = SpanTimer::start("test_span");
        std::thread::sleep(Duration::from_millis(10));
        assert!(timer.elapsed() >= Duration::from_millis(10));
        let duration = timer.finish();
        assert!(duration >= Duration::from_millis(10));
    }

    #[test]
    fn test_steps_per_second() {
        let timing = NodeTiming {
            path: "outer/inner".to_string(),
            steps: 50,
            busy_ms: 250.0,
        };
        assert!((timing.steps_per_second() - 200.0).abs() < f64::EPSILON);
        assert_eq!(timing.depth(), 1);
    }

    #[test]
    fn test_steps_per_second_without_time() {
        let timing = NodeTiming {
            path: "src".to_string(),
            steps: 0,
            busy_ms: 0.0,
        };
        assert_eq!(timing.steps_per_second(), 0.0);
    }

    #[test]
    fn test_init_tracing_is_idempotent() {
        let _ = init_tracing(false);
        assert!(init_tracing(true).is_ok());
    }
}
