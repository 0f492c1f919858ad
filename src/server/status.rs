//! Pool counters published by the control loop.
//!
//! The registry itself stays private to the control loop; this is a
//! write-only mirror other threads can read.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Shared pool status, updated by the control loop on every iteration.
#[derive(Debug, Default)]
pub struct PoolStatus {
    workers: AtomicUsize,
    available: AtomicUsize,
    spawned: AtomicU64,
    spawn_failures: AtomicU64,
    reaped: AtomicU64,
    retired: AtomicU64,
    interrupted: AtomicU64,
    killed: AtomicU64,
}

/// Point-in-time copy of [`PoolStatus`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusSnapshot {
    /// Registered worker processes (including ones awaiting reaping).
    pub workers: usize,
    /// Workers currently reporting headroom.
    pub available: usize,
    pub spawned: u64,
    pub spawn_failures: u64,
    pub reaped: u64,
    /// Idle workers closed by down-scaling.
    pub retired: u64,
    /// Busy workers sent `SIGINT` during shutdown.
    pub interrupted: u64,
    /// Workers sent `SIGKILL` after the grace period.
    pub killed: u64,
}

impl PoolStatus {
    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            workers: self.workers.load(Ordering::Acquire),
            available: self.available.load(Ordering::Acquire),
            spawned: self.spawned.load(Ordering::Relaxed),
            spawn_failures: self.spawn_failures.load(Ordering::Relaxed),
            reaped: self.reaped.load(Ordering::Relaxed),
            retired: self.retired.load(Ordering::Relaxed),
            interrupted: self.interrupted.load(Ordering::Relaxed),
            killed: self.killed.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn publish(&self, workers: usize, available: usize) {
        self.workers.store(workers, Ordering::Release);
        self.available.store(available, Ordering::Release);
    }

    pub(crate) fn record_spawn(&self) {
        self.spawned.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_spawn_failure(&self) {
        self.spawn_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_reaped(&self) {
        self.reaped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_retired(&self) {
        self.retired.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_interrupted(&self) {
        self.interrupted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_killed(&self) {
        self.killed.fetch_add(1, Ordering::Relaxed);
    }
}
