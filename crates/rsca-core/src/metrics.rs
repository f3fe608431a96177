//! Process-wide atomic counters for the engine.
//!
//! Counters are bumped silently at the call site. Call [`Metrics::flush`] to
//! emit the current values as one `tracing::info!` event.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    requests_dispatched: AtomicU64,
    requests_failed: AtomicU64,
    cycles_projected: AtomicU64,
    members_distributed: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            requests_dispatched: AtomicU64::new(0),
            requests_failed: AtomicU64::new(0),
            cycles_projected: AtomicU64::new(0),
            members_distributed: AtomicU64::new(0),
        }
    }

    pub fn inc_requests_dispatched(&self) {
        self.requests_dispatched.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "requests_dispatched", "counter incremented");
    }

    pub fn inc_requests_failed(&self) {
        self.requests_failed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "requests_failed", "counter incremented");
    }

    /// Add the number of pending cycles a projection solved.
    pub fn add_cycles_projected(&self, n: u64) {
        self.cycles_projected.fetch_add(n, Ordering::Relaxed);
        tracing::trace!(metric = "cycles_projected", n, "counter incremented");
    }

    /// Add the number of member scores a distribution produced.
    pub fn add_members_distributed(&self, n: u64) {
        self.members_distributed.fetch_add(n, Ordering::Relaxed);
        tracing::trace!(metric = "members_distributed", n, "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            requests_dispatched = self.requests_dispatched(),
            requests_failed = self.requests_failed(),
            cycles_projected = self.cycles_projected(),
            members_distributed = self.members_distributed(),
        );
    }

    pub fn requests_dispatched(&self) -> u64 {
        self.requests_dispatched.load(Ordering::Relaxed)
    }

    pub fn requests_failed(&self) -> u64 {
        self.requests_failed.load(Ordering::Relaxed)
    }

    pub fn cycles_projected(&self) -> u64 {
        self.cycles_projected.load(Ordering::Relaxed)
    }

    pub fn members_distributed(&self) -> u64 {
        self.members_distributed.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.requests_dispatched.store(0, Ordering::Relaxed);
        self.requests_failed.store(0, Ordering::Relaxed);
        self.cycles_projected.store(0, Ordering::Relaxed);
        self.members_distributed.store(0, Ordering::Relaxed);
    }
}
