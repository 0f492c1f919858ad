//! Preforking process pool server.
//!
//! The [`Server`] owns a TCP listener shared by a pool of forked worker
//! processes. Workers race to accept connections and report whether they
//! have headroom over a one-byte control channel; the server keeps the
//! number of available workers between `min_spare` and `max_spare` without
//! ever exceeding `max_children` processes.
//!
//! # Example
//!
//! ```rust,ignore
//! use prefork::{listener, PoolConfig, Server};
//!
//! let listener = listener::bind("127.0.0.1:8080".parse()?, 1024)?;
//! let config = PoolConfig::new(2, 4, 16, 8);
//! let mut server = Server::new(config, |stream, _peer, _args: &()| move || {
//!     drop(stream);
//! }, ())?;
//!
//! while server.run(&listener)? {
//!     // SIGHUP: re-read configuration and run again on the same listener
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────── server ────────────────────────────┐
//! │                                                                │
//! │  top up ──► poll {self-pipe, control..} ──► read 1 byte each   │
//! │    ▲                                              │            │
//! │    │                                              ▼            │
//! │    └──────── rebalance ◄──────── reap (waitpid WNOHANG)        │
//! │                                                                │
//! │  stop requested: close all channels ─► SIGINT busy workers     │
//! │                  ─► wait grace period ─► SIGKILL survivors     │
//! └──────┬──────────────────────┬──────────────────────┬───────────┘
//!        │ control              │ control              │ control
//!   ┌────▼─────┐           ┌────▼─────┐           ┌────▼─────┐
//!   │ worker 0 │           │ worker 1 │           │ worker N │
//!   │ accept() │           │ accept() │           │ accept() │
//!   └──────────┘           └──────────┘           └──────────┘
//! ```

mod exit;
mod registry;
mod spawn;
mod status;

pub use exit::TerminationReason;
pub use status::{PoolStatus, StatusSnapshot};

use std::net::TcpListener;
use std::os::fd::AsFd;
use std::sync::Arc;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag};
use nix::unistd::Pid;
use tracing::{debug, error, info, warn};

use crate::config::PoolConfig;
use crate::control::Message;
use crate::error::Result;
use crate::job::JobFactory;
use crate::readiness::wait_readable;
use crate::signals::{ShutdownHandle, SignalTranslator, StopRequest};
use registry::Registry;

/// Longest single wait while draining workers during shutdown.
const CLEANUP_POLL: Duration = Duration::from_millis(100);

/// Preforking server.
///
/// Generic over the [`JobFactory`] that turns accepted connections into
/// jobs, and the shared argument value passed to every factory call.
pub struct Server<F, A> {
    config: PoolConfig,
    factory: Arc<F>,
    args: Arc<A>,
    registry: Registry,
    signals: SignalTranslator,
    status: Arc<PoolStatus>,
    consecutive_spawn_failures: u32,
    last_spawn_failed: bool,
}

impl<F, A> Server<F, A>
where
    A: Send + Sync + 'static,
    F: JobFactory<A>,
{
    /// Create a server. No processes are started until [`run`](Self::run).
    pub fn new(config: PoolConfig, factory: F, args: A) -> Result<Self> {
        Ok(Self {
            config,
            factory: Arc::new(factory),
            args: Arc::new(args),
            registry: Registry::new(),
            signals: SignalTranslator::new()?,
            status: Arc::new(PoolStatus::default()),
            consecutive_spawn_failures: 0,
            last_spawn_failed: false,
        })
    }

    /// Replace the pool configuration and job arguments for the next
    /// [`run`](Self::run).
    pub fn reconfigure(&mut self, config: PoolConfig, args: A) {
        self.config = config;
        self.args = Arc::new(args);
    }

    /// Handle for requesting shutdown or reload from another thread.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.signals.handle()
    }

    /// Live pool counters, readable from any thread.
    pub fn status(&self) -> Arc<PoolStatus> {
        Arc::clone(&self.status)
    }

    /// Run the pool on `listener` until a stop is requested.
    ///
    /// Returns `Ok(true)` when the stop came from `SIGHUP` (or
    /// [`ShutdownHandle::reload`]) and the caller should reload and run again,
    /// `Ok(false)` otherwise. Every worker has exited by the time this returns.
    ///
    /// Signal handlers are registered on the first call and stay registered
    /// until the server is dropped, so a signal arriving between two calls
    /// stops the next one as soon as it starts.
    pub fn run(&mut self, listener: &TcpListener) -> Result<bool> {
        listener.set_nonblocking(true)?;
        self.signals.install()?;
        self.consecutive_spawn_failures = 0;
        self.last_spawn_failed = false;

        info!(
            pid = std::process::id(),
            addr = ?listener.local_addr().ok(),
            min_spare = self.config.min_spare,
            max_spare = self.config.max_spare,
            max_children = self.config.max_children,
            threads = self.config.threads_per_worker,
            "server started"
        );

        let request = loop {
            if let Some(request) = self.signals.stop_requested() {
                break request;
            }

            self.top_up(listener);
            if self.spawns_exhausted() {
                error!(
                    failures = self.consecutive_spawn_failures,
                    "no workers could be started, giving up"
                );
                break StopRequest::Terminate;
            }
            self.publish();

            self.wait_and_dispatch();
            self.settle(listener);
        };

        info!(?request, workers = self.registry.len(), "server stopping");
        self.cleanup();
        self.publish();

        self.signals.reset();

        let snapshot = self.status.snapshot();
        info!(
            spawned = snapshot.spawned,
            reaped = snapshot.reaped,
            killed = snapshot.killed,
            "server stopped"
        );

        Ok(request == StopRequest::Reload)
    }

    /// Spawn until the registry holds `max_spare` workers.
    fn top_up(&mut self, listener: &TcpListener) {
        while self.registry.len() < self.config.max_spare {
            if !self.spawn(listener) {
                break;
            }
        }
    }

    /// Readiness wait bound: unbounded unless some worker still needs
    /// reaping or the last spawn failed, then `reap_interval`.
    fn wait_timeout(&self) -> Option<Duration> {
        (self.last_spawn_failed || self.registry.has_closed_endpoint())
            .then_some(self.config.reap_interval)
    }

    /// Block until a signal or control message arrives, then handle it.
    fn wait_and_dispatch(&mut self) {
        let timeout = self.wait_timeout();

        let (woken, ready) = {
            let wake = self.signals.wake_fd();
            let mut fds = Vec::with_capacity(self.registry.len() + 1);
            let mut pids = Vec::with_capacity(self.registry.len());

            fds.extend(wake);
            for record in self.registry.iter() {
                if let Some(control) = &record.control {
                    fds.push(control.as_fd());
                    pids.push(record.pid);
                }
            }

            let readable = match wait_readable(&fds, timeout) {
                Ok(readable) => readable,
                Err(e) => {
                    warn!(error = %e, "readiness wait failed");
                    std::thread::sleep(self.config.reap_interval);
                    return;
                }
            };

            let offset = usize::from(wake.is_some());
            let woken = wake.is_some() && readable[0];
            let ready: Vec<Pid> = pids
                .into_iter()
                .zip(&readable[offset..])
                .filter(|(_, readable)| **readable)
                .map(|(pid, _)| pid)
                .collect();
            (woken, ready)
        };

        if woken {
            self.signals.drain();
        }

        for pid in ready {
            let Some(message) = self.registry.receive(pid) else {
                continue;
            };
            if message == Message::Closed {
                debug!(pid = pid.as_raw(), "control channel closed");
            }
            self.registry.apply(pid, message);
        }
    }

    /// Reap, then rebalance unless a stop arrived during the wait.
    fn settle(&mut self, listener: &TcpListener) {
        self.reap();
        if self.signals.stop_requested().is_none() {
            self.rebalance(listener);
        }
        self.publish();
    }

    /// Collect every worker that has exited. Never blocks.
    fn reap(&mut self) {
        let reaped = self.registry.reap(|pid| {
            match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
                Ok(status) => TerminationReason::from_wait_status(status),
                Err(Errno::ECHILD) => Some(TerminationReason::Unknown),
                Err(_) => None,
            }
        });

        for (record, reason) in reaped {
            self.status.record_reaped();
            let pid = record.pid.as_raw();
            if reason.is_clean() {
                debug!(pid, %reason, "worker reaped");
            } else {
                warn!(pid, %reason, "worker terminated abnormally");
            }
        }
    }

    /// Keep the available count within `[min_spare, max_spare]`.
    fn rebalance(&mut self, listener: &TcpListener) {
        let mut available = self.registry.available_count();

        if available < self.config.min_spare {
            while available < self.config.min_spare
                && self.registry.len() < self.config.max_children
            {
                if !self.spawn(listener) {
                    break;
                }
                available += 1;
            }
            if available < self.config.min_spare
                && self.registry.len() >= self.config.max_children
            {
                debug!(
                    available,
                    max_children = self.config.max_children,
                    "pool at capacity"
                );
            }
        } else if available > self.config.max_spare {
            for pid in self.registry.surplus(available - self.config.max_spare) {
                debug!(pid = pid.as_raw(), "retiring idle worker");
                self.registry.close(pid);
                self.status.record_retired();
            }
        }
    }

    /// No worker is left and `max_spawn_failures` spawns in a row failed.
    fn spawns_exhausted(&self) -> bool {
        self.registry.is_empty()
            && self.consecutive_spawn_failures >= self.config.max_spawn_failures
    }

    /// Fork one worker. Returns `false` if the spawn failed or the server is
    /// about to give up.
    fn spawn(&mut self, listener: &TcpListener) -> bool {
        if self.spawns_exhausted() {
            return false;
        }

        let registry = &mut self.registry;
        let signals = &mut self.signals;
        let result = spawn::spawn_worker(listener, &self.config, &self.factory, &self.args, || {
            signals.release_in_child();
            registry.clear();
        });

        match result {
            Ok((pid, control)) => {
                self.registry.insert(pid, control);
                self.status.record_spawn();
                self.consecutive_spawn_failures = 0;
                self.last_spawn_failed = false;
                debug!(pid = pid.as_raw(), workers = self.registry.len(), "worker spawned");
                true
            }
            Err(e) => {
                self.status.record_spawn_failure();
                self.consecutive_spawn_failures += 1;
                self.last_spawn_failed = true;
                if spawn::is_resource_exhaustion(&e) {
                    warn!(error = %e, "worker spawn failed, will retry");
                } else {
                    error!(error = %e, "worker spawn failed");
                }
                false
            }
        }
    }

    /// Stop every worker: close all channels, interrupt busy workers, wait
    /// out the grace period and kill whatever is left.
    fn cleanup(&mut self) {
        let busy: Vec<Pid> = self
            .registry
            .iter()
            .filter(|r| !r.available)
            .map(|r| r.pid)
            .collect();

        self.registry.close_all();

        for pid in busy {
            match kill(pid, Signal::SIGINT) {
                Ok(()) => {
                    debug!(pid = pid.as_raw(), "interrupted busy worker");
                    self.status.record_interrupted();
                }
                Err(e) => debug!(pid = pid.as_raw(), error = %e, "interrupt failed"),
            }
        }

        let deadline = Instant::now() + self.config.grace_period;
        loop {
            self.reap();
            self.publish();
            if self.registry.is_empty() {
                break;
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }

            // SIGCHLD writes to the self-pipe, so exits cut the wait short
            let wait = (deadline - now).min(CLEANUP_POLL);
            match self.signals.wake_fd() {
                Some(fd) => {
                    let _ = wait_readable(&[fd], Some(wait));
                }
                None => std::thread::sleep(wait),
            }
            self.signals.drain();
        }

        let survivors: Vec<Pid> = self.registry.iter().map(|r| r.pid).collect();
        for pid in survivors {
            warn!(pid = pid.as_raw(), "grace period expired, killing worker");
            if kill(pid, Signal::SIGKILL).is_ok() {
                self.status.record_killed();
            }
            if let Err(e) = waitpid(pid, None) {
                debug!(pid = pid.as_raw(), error = %e, "waitpid failed");
            }
            self.registry.remove(pid);
            self.status.record_reaped();
        }
    }

    fn publish(&self) {
        self.status
            .publish(self.registry.len(), self.registry.available_count());
    }
}
