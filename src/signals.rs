//! Signal translation for the server and its workers.
//!
//! Handlers never run server logic. They only set atomic flags and write a
//! byte into a self-pipe that the control loop includes in its readiness
//! wait, so a signal wakes the loop promptly:
//!
//! | Signal            | Server effect                         |
//! |-------------------|---------------------------------------|
//! | `SIGTERM`/`SIGINT`| stop, `run` returns `false`           |
//! | `SIGHUP`          | stop, `run` returns `true` (reload)   |
//! | `SIGCHLD`         | wake only, so reaping happens quickly |
//!
//! A [`ShutdownHandle`] drives the same flags from ordinary code.

use std::io::{self, Read, Write};
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use signal_hook::consts::{SIGCHLD, SIGHUP, SIGINT, SIGTERM};
use signal_hook::SigId;

use crate::error::{Error, Result};

/// Why the control loop was asked to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopRequest {
    Terminate,
    Reload,
}

/// Cloneable handle that requests shutdown the same way a signal does.
#[derive(Clone, Debug)]
pub struct ShutdownHandle {
    stop: Arc<AtomicBool>,
    reload: Arc<AtomicBool>,
    waker: Arc<UnixStream>,
}

impl ShutdownHandle {
    /// Request a graceful stop (same as `SIGTERM`).
    pub fn terminate(&self) {
        self.stop.store(true, Ordering::SeqCst);
        self.wake();
    }

    /// Request a graceful stop with reload (same as `SIGHUP`).
    pub fn reload(&self) {
        self.reload.store(true, Ordering::SeqCst);
        self.stop.store(true, Ordering::SeqCst);
        self.wake();
    }

    fn wake(&self) {
        // Full pipe already guarantees a wakeup
        let _ = (&*self.waker).write(&[1]);
    }
}

/// Server-side signal state: flags, self-pipe and registered handlers.
pub struct SignalTranslator {
    stop: Arc<AtomicBool>,
    reload: Arc<AtomicBool>,
    wake_rx: Option<UnixStream>,
    wake_tx: Arc<UnixStream>,
    ids: Vec<SigId>,
}

impl SignalTranslator {
    pub fn new() -> Result<Self> {
        let (wake_rx, wake_tx) = UnixStream::pair()?;
        wake_rx.set_nonblocking(true)?;
        wake_tx.set_nonblocking(true)?;

        Ok(Self {
            stop: Arc::new(AtomicBool::new(false)),
            reload: Arc::new(AtomicBool::new(false)),
            wake_rx: Some(wake_rx),
            wake_tx: Arc::new(wake_tx),
            ids: Vec::new(),
        })
    }

    pub fn handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            stop: Arc::clone(&self.stop),
            reload: Arc::clone(&self.reload),
            waker: Arc::clone(&self.wake_tx),
        }
    }

    /// Register OS handlers. Flags are left untouched so a stop requested
    /// through a [`ShutdownHandle`] before `run` is still honored.
    pub fn install(&mut self) -> Result<()> {
        if !self.ids.is_empty() {
            return Ok(());
        }

        // Reload flag first so it is visible by the time stop is observed
        self.register_flag(SIGHUP, Arc::clone(&self.reload))?;
        for signal in [SIGTERM, SIGINT, SIGHUP] {
            self.register_flag(signal, Arc::clone(&self.stop))?;
        }

        for signal in [SIGTERM, SIGINT, SIGHUP, SIGCHLD] {
            let pipe = self.wake_tx.try_clone()?;
            let id = signal_hook::low_level::pipe::register(signal, pipe)
                .map_err(|error| Error::Signal { signal, error })?;
            self.ids.push(id);
        }

        Ok(())
    }

    fn register_flag(&mut self, signal: i32, flag: Arc<AtomicBool>) -> Result<()> {
        let id = signal_hook::flag::register(signal, flag)
            .map_err(|error| Error::Signal { signal, error })?;
        self.ids.push(id);
        Ok(())
    }

    /// Remove every handler registered by [`install`](Self::install).
    ///
    /// signal-hook keeps its process-wide handler in place, so once this
    /// runs `SIGTERM`, `SIGINT` and `SIGHUP` are ignored instead of taking
    /// their default action.
    pub fn uninstall(&mut self) {
        for id in self.ids.drain(..) {
            signal_hook::low_level::unregister(id);
        }
    }

    /// Clear both flags for a fresh `run`.
    pub fn reset(&self) {
        self.reload.store(false, Ordering::SeqCst);
        self.stop.store(false, Ordering::SeqCst);
        self.drain();
    }

    pub fn stop_requested(&self) -> Option<StopRequest> {
        if !self.stop.load(Ordering::SeqCst) {
            return None;
        }
        if self.reload.load(Ordering::SeqCst) {
            Some(StopRequest::Reload)
        } else {
            Some(StopRequest::Terminate)
        }
    }

    /// Descriptor that becomes readable when any handled signal arrives.
    pub fn wake_fd(&self) -> Option<BorrowedFd<'_>> {
        self.wake_rx.as_ref().map(|rx| rx.as_fd())
    }

    /// Empty the self-pipe after a wakeup.
    pub fn drain(&self) {
        let Some(mut rx) = self.wake_rx.as_ref() else {
            return;
        };
        let mut buf = [0u8; 64];
        loop {
            match rx.read(&mut buf) {
                Ok(0) => break,
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
    }

    /// Drop everything a forked worker must not keep from the server.
    pub fn release_in_child(&mut self) {
        self.uninstall();
        self.wake_rx = None;
    }
}

impl Drop for SignalTranslator {
    fn drop(&mut self) {
        self.uninstall();
    }
}

/// Install the worker's own stop handlers (`SIGTERM`, `SIGINT`).
///
/// Inside a worker these signals mean "stop accepting and drain". `SIGHUP`
/// is left without an action, which signal-hook treats as ignored.
pub fn install_worker_handlers(stop: &Arc<AtomicBool>) -> Result<Vec<SigId>> {
    let mut ids = Vec::with_capacity(2);
    for signal in [SIGTERM, SIGINT] {
        let id = signal_hook::flag::register(signal, Arc::clone(stop))
            .map_err(|error| Error::Signal { signal, error })?;
        ids.push(id);
    }
    Ok(ids)
}

/// Held by tests that raise real signals, or that register handlers which
/// such a signal would trip.
#[cfg(test)]
pub(crate) static TEST_SIGNALS: std::sync::Mutex<()> = std::sync::Mutex::new(());
