//! Worker registry owned by the server's control loop.
//!
//! Nothing outside the control loop reads or writes the registry, so it needs
//! no locking. Publishing counts to other threads goes through
//! [`PoolStatus`](super::PoolStatus).

use nix::unistd::Pid;

use crate::control::{Capacity, ControlEndpoint, Message};

/// One live (or not yet reaped) worker process.
#[derive(Debug)]
pub struct WorkerRecord {
    pub pid: Pid,
    /// Server end of the control channel; `None` once closed.
    pub control: Option<ControlEndpoint>,
    pub available: bool,
    /// Spawn order, used to pick the oldest workers when scaling down.
    pub generation: u64,
}

impl WorkerRecord {
    /// Close the control endpoint. The worker reads EOF and exits.
    pub fn close(&mut self) {
        self.control = None;
        self.available = false;
    }
}

#[derive(Debug, Default)]
pub struct Registry {
    records: Vec<WorkerRecord>,
    next_generation: u64,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &WorkerRecord> {
        self.records.iter()
    }

    #[cfg(test)]
    pub fn get(&self, pid: Pid) -> Option<&WorkerRecord> {
        self.records.iter().find(|r| r.pid == pid)
    }

    fn get_mut(&mut self, pid: Pid) -> Option<&mut WorkerRecord> {
        self.records.iter_mut().find(|r| r.pid == pid)
    }

    /// Register a freshly spawned worker. New workers start out available.
    pub fn insert(&mut self, pid: Pid, control: ControlEndpoint) {
        let generation = self.next_generation;
        self.next_generation += 1;
        self.records.push(WorkerRecord {
            pid,
            control: Some(control),
            available: true,
            generation,
        });
    }

    pub fn available_count(&self) -> usize {
        self.records.iter().filter(|r| r.available).count()
    }

    /// True if some worker's channel is closed but the process is not reaped.
    pub fn has_closed_endpoint(&self) -> bool {
        self.records.iter().any(|r| r.control.is_none())
    }

    /// Apply one control message to a worker's record.
    pub fn apply(&mut self, pid: Pid, message: Message) {
        let Some(record) = self.get_mut(pid) else {
            return;
        };
        match message {
            Message::Capacity(Capacity::Available) => record.available = true,
            Message::Capacity(Capacity::Full) => record.available = false,
            Message::Closed => record.close(),
            Message::Unknown(byte) => {
                tracing::debug!(pid = pid.as_raw(), byte, "ignoring unknown control byte");
            }
        }
    }

    /// Read one control message from a worker.
    ///
    /// Returns `None` when the worker is unknown or its endpoint is already
    /// closed. Read errors count as a closed channel.
    pub fn receive(&mut self, pid: Pid) -> Option<Message> {
        let control = self.get_mut(pid)?.control.as_mut()?;
        match control.recv() {
            Ok(message) => Some(message),
            Err(e) => {
                tracing::debug!(pid = pid.as_raw(), error = %e, "control read failed");
                Some(Message::Closed)
            }
        }
    }

    /// Close a worker's endpoint without removing it.
    pub fn close(&mut self, pid: Pid) {
        if let Some(record) = self.get_mut(pid) {
            record.close();
        }
    }

    pub fn close_all(&mut self) {
        for record in &mut self.records {
            record.close();
        }
    }

    /// Pick `count` available workers to retire: oldest spawn first, lowest
    /// pid on ties.
    pub fn surplus(&self, count: usize) -> Vec<Pid> {
        let mut candidates: Vec<&WorkerRecord> = self
            .records
            .iter()
            .filter(|r| r.available && r.control.is_some())
            .collect();
        candidates.sort_by_key(|r| (r.generation, r.pid.as_raw()));
        candidates.into_iter().take(count).map(|r| r.pid).collect()
    }

    /// Remove every worker for which `exited` reports an exit.
    ///
    /// Records whose process is still running are left untouched, so calling
    /// this when nothing has exited is a no-op.
    pub fn reap<T, F>(&mut self, mut exited: F) -> Vec<(WorkerRecord, T)>
    where
        F: FnMut(Pid) -> Option<T>,
    {
        let mut reaped = Vec::new();
        let mut i = 0;
        while i < self.records.len() {
            match exited(self.records[i].pid) {
                Some(outcome) => {
                    let mut record = self.records.swap_remove(i);
                    record.close();
                    reaped.push((record, outcome));
                }
                None => i += 1,
            }
        }
        reaped
    }

    /// Remove a worker regardless of state.
    pub fn remove(&mut self, pid: Pid) -> Option<WorkerRecord> {
        let index = self.records.iter().position(|r| r.pid == pid)?;
        Some(self.records.swap_remove(index))
    }

    /// Drop every record (closing its endpoint).
    pub fn clear(&mut self) {
        self.records.clear();
    }
}
