//! Elapsed-time tracing for hot request paths.
//!
//! Callers guard tracer creation with [`PerfTracer::is_enabled`] so the
//! label formatting is skipped entirely when the perf target is off.

use std::time::Instant;
use tracing::{debug, enabled, Level};

/// Perf target name used by all tracers
pub const PERF_TARGET: &str = "zoneguard::perf";

/// Measures one operation and reports it as a `debug!` event
#[derive(Debug)]
pub struct PerfTracer {
    label: String,
    started: Instant,
}

impl PerfTracer {
    /// Whether perf tracing is currently recorded
    #[must_use]
    pub fn is_enabled() -> bool {
        enabled!(target: "zoneguard::perf", Level::DEBUG)
    }

    /// Start measuring an operation
    #[must_use]
    pub fn begin(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            started: Instant::now(),
        }
    }

    /// Report the elapsed time
    pub fn log(self) {
        debug!(
            target: "zoneguard::perf",
            label = %self.label,
            elapsed_us = self.started.elapsed().as_micros() as u64,
        );
    }
}
