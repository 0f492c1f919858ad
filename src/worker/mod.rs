//! Worker process loop.
//!
//! A worker races its siblings to `accept` on the shared listener, hands each
//! connection to its own [`ThreadPool`], and reports capacity transitions to
//! the server over its control channel.
//!
//! ```text
//!   ┌──────────────────────────── worker ─────────────────────────────┐
//!   │                                                                 │
//!   │  wait for room ──► poll {listener, control} ──► accept()        │
//!   │        ▲                   │ control readable       │           │
//!   │        │                   ▼                        ▼           │
//!   │        │                 exit            gate.acquire() ─► 0x00 │
//!   │        │                                            │  (if full)│
//!   │        │                                            ▼           │
//!   │        └──────── gate.release() ◄── job.run() ◄── pool          │
//!   │                    └─► 0xFF (if was full)                       │
//!   └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Leaving the loop always drains: the worker stops accepting, waits for
//! every in-flight job, joins its threads and returns.

mod capacity;
pub mod pool;

pub use capacity::CapacityGate;
pub use pool::{PoolError, ThreadPool};

use std::io;
use std::net::TcpListener;
use std::os::fd::AsFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::PoolConfig;
use crate::control::ControlEndpoint;
use crate::error::Result;
use crate::job::{Job, JobFactory};
use crate::listener;
use crate::readiness::wait_readable;

/// Upper bound on each blocking wait so a stop request is noticed even when
/// the signal lands on a pool thread.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Back-off after a hard accept error (e.g. descriptor exhaustion).
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Why a worker left its accept loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// The server closed the control channel.
    ControlClosed,
    /// A stop signal was delivered to the worker.
    Stopped,
    /// `max_requests_per_worker` connections were accepted.
    Retired,
}

/// Summary returned once a worker has drained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerReport {
    pub exit: WorkerExit,
    /// Connections accepted over the worker's lifetime.
    pub accepted: u64,
}

/// Releases a capacity slot when dropped, including during a job panic.
struct SlotGuard {
    gate: Arc<CapacityGate>,
    retiring: Arc<AtomicBool>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.gate.release(self.retiring.load(Ordering::SeqCst));
    }
}

/// Run the accept loop until told to exit, then drain.
///
/// `stop` is the worker's own stop flag (set from `SIGTERM`/`SIGINT`).
pub fn run<A, F>(
    listener: &TcpListener,
    control: ControlEndpoint,
    config: &PoolConfig,
    factory: Arc<F>,
    args: Arc<A>,
    stop: &AtomicBool,
) -> Result<WorkerReport>
where
    A: Send + Sync + 'static,
    F: JobFactory<A>,
{
    let pid = std::process::id();
    let threads = config.threads_per_worker;
    let max_requests = config.max_requests_per_worker;

    let gate = Arc::new(CapacityGate::new(threads, control));
    let retiring = Arc::new(AtomicBool::new(false));
    let pool = ThreadPool::new(threads, format!("worker-{}", pid))?;

    debug!(pid, threads, max_requests, "worker started");

    let mut accepted: u64 = 0;

    let exit = loop {
        if stop.load(Ordering::SeqCst) {
            break WorkerExit::Stopped;
        }
        if max_requests > 0 && accepted >= max_requests {
            break WorkerExit::Retired;
        }

        if !gate.wait_for_room(POLL_INTERVAL) {
            continue;
        }

        let ready = wait_readable(
            &[listener.as_fd(), gate.control().as_fd()],
            Some(POLL_INTERVAL),
        )?;

        if ready[1] {
            break WorkerExit::ControlClosed;
        }
        if !ready[0] {
            continue;
        }

        let (stream, peer) = match listener.accept() {
            Ok(conn) => conn,
            // Lost the race to a sibling
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock
                        | io::ErrorKind::Interrupted
                        | io::ErrorKind::ConnectionAborted
                ) =>
            {
                continue
            }
            Err(e) => {
                warn!(pid, error = %e, "accept failed");
                std::thread::sleep(ACCEPT_ERROR_BACKOFF);
                continue;
            }
        };

        accepted += 1;

        if let Err(e) = listener::prepare_accepted(&stream) {
            debug!(pid, peer = %peer, error = %e, "dropping connection");
            continue;
        }

        gate.acquire();
        let slot = SlotGuard {
            gate: Arc::clone(&gate),
            retiring: Arc::clone(&retiring),
        };
        let factory = Arc::clone(&factory);
        let args = Arc::clone(&args);

        let submitted = pool.execute(move || {
            let _slot = slot;
            factory.create(stream, peer, &args).run();
        });
        if let Err(e) = submitted {
            // The closure (and its slot) was dropped, so the gate is already released
            warn!(pid, error = %e, "failed to submit job");
        }
    };

    retiring.store(true, Ordering::SeqCst);
    if exit != WorkerExit::ControlClosed {
        gate.mark_full();
    }

    debug!(pid, ?exit, active = gate.active(), "worker draining");
    gate.wait_idle();
    pool.join();

    let stats = pool.stats();
    info!(
        pid,
        ?exit,
        accepted,
        completed = stats.completed,
        panicked = stats.panicked,
        "worker exiting"
    );

    Ok(WorkerReport { exit, accepted })
}
