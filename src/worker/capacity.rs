//! In-flight connection accounting for one worker process.

use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

use crate::control::{Capacity, ControlEndpoint};

/// Counts in-flight jobs and reports capacity transitions to the server.
///
/// Transitions are signalled while the counter lock is held, so the server
/// always sees `0x00`/`0xFF` in the order the counter actually moved. The
/// condition variable doubles as the "under capacity" gate for the accept
/// loop and as the drain barrier on exit.
pub struct CapacityGate {
    active: Mutex<usize>,
    changed: Condvar,
    limit: usize,
    control: ControlEndpoint,
}

impl CapacityGate {
    pub fn new(limit: usize, control: ControlEndpoint) -> Self {
        Self {
            active: Mutex::new(0),
            changed: Condvar::new(),
            limit: limit.max(1),
            control,
        }
    }

    fn lock(&self) -> MutexGuard<'_, usize> {
        // The counter is a plain integer; a poisoned lock still holds a valid value
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn active(&self) -> usize {
        *self.lock()
    }

    pub fn control(&self) -> &ControlEndpoint {
        &self.control
    }

    /// Count a newly accepted connection. Sends `0x00` when this fills the
    /// last slot. Returns `true` if the worker is now full.
    pub fn acquire(&self) -> bool {
        let mut active = self.lock();
        *active += 1;
        let full = *active == self.limit;
        if full {
            self.control.notify(Capacity::Full);
        }
        full
    }

    /// Release a slot when a job finishes. Sends `0xFF` when the worker
    /// leaves the full state, unless `retiring` (the worker has stopped
    /// accepting and must not advertise headroom).
    pub fn release(&self, retiring: bool) {
        let mut active = self.lock();
        let was_full = *active == self.limit;
        *active = active.saturating_sub(1);
        if was_full && !retiring {
            self.control.notify(Capacity::Available);
        }
        self.changed.notify_all();
    }

    /// Report `0x00` if the worker is not already reporting full. Used when
    /// the worker retires with free slots.
    pub fn mark_full(&self) {
        let active = self.lock();
        if *active < self.limit {
            self.control.notify(Capacity::Full);
        }
    }

    /// Wait until a slot is free or `timeout` passes. Returns `true` when
    /// there is room.
    pub fn wait_for_room(&self, timeout: Duration) -> bool {
        let active = self.lock();
        let (active, _) = self
            .changed
            .wait_timeout_while(active, timeout, |active| *active >= self.limit)
            .unwrap_or_else(|e| e.into_inner());
        *active < self.limit
    }

    /// Block until no job is in flight.
    pub fn wait_idle(&self) {
        let active = self.lock();
        let _guard = self
            .changed
            .wait_while(active, |active| *active > 0)
            .unwrap_or_else(|e| e.into_inner());
    }
}
