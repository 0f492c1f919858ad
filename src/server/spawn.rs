//! Forking worker processes.

use std::net::TcpListener;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use nix::errno::Errno;
use nix::unistd::{fork, ForkResult, Pid};
use tracing::{error, warn};

use crate::config::PoolConfig;
use crate::control::{self, ControlEndpoint};
use crate::error::{Error, Result};
use crate::job::JobFactory;
use crate::signals;
use crate::worker;

/// Exit code for a worker whose accept loop failed.
const EXIT_FAILURE: i32 = 1;

/// Exit code for a worker whose accept loop panicked.
const EXIT_PANIC: i32 = 101;

#[cfg(test)]
thread_local! {
    /// While set, spawns on this thread fail with `EAGAIN` instead of forking.
    pub(super) static FAIL_SPAWNS: std::cell::Cell<bool> = const { std::cell::Cell::new(false) };
}

/// Fork one worker sharing `listener`.
///
/// In the parent this returns the child's pid and the server end of its
/// control channel. The child never returns: it runs `release` to drop the
/// server state it inherited, runs the worker loop and exits.
pub(super) fn spawn_worker<A, F, R>(
    listener: &TcpListener,
    config: &PoolConfig,
    factory: &Arc<F>,
    args: &Arc<A>,
    release: R,
) -> Result<(Pid, ControlEndpoint)>
where
    A: Send + Sync + 'static,
    F: JobFactory<A>,
    R: FnOnce(),
{
    #[cfg(test)]
    if FAIL_SPAWNS.with(|fail| fail.get()) {
        return Err(Error::Sys(Errno::EAGAIN));
    }

    let (server_end, worker_end) = control::channel()?;

    // SAFETY: the server's control loop is single-threaded, and the child only
    // runs the worker loop before calling `exit`.
    match unsafe { fork() }? {
        ForkResult::Parent { child } => {
            drop(worker_end);
            Ok((child, server_end))
        }
        ForkResult::Child => {
            drop(server_end);
            release();
            let code = worker_main(
                listener,
                worker_end,
                config,
                Arc::clone(factory),
                Arc::clone(args),
            );
            std::process::exit(code)
        }
    }
}

fn worker_main<A, F>(
    listener: &TcpListener,
    control: ControlEndpoint,
    config: &PoolConfig,
    factory: Arc<F>,
    args: Arc<A>,
) -> i32
where
    A: Send + Sync + 'static,
    F: JobFactory<A>,
{
    let stop = Arc::new(AtomicBool::new(false));
    let _handlers = match signals::install_worker_handlers(&stop) {
        Ok(ids) => ids,
        Err(e) => {
            warn!(error = %e, "worker runs without stop handlers");
            Vec::new()
        }
    };

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        worker::run(listener, control, config, factory, args, &stop)
    }));

    match outcome {
        Ok(Ok(_)) => 0,
        Ok(Err(e)) => {
            error!(error = %e, "worker failed");
            EXIT_FAILURE
        }
        Err(_) => {
            error!("worker panicked");
            EXIT_PANIC
        }
    }
}

/// Spawn failures caused by exhausted process or memory limits.
///
/// These are expected under load and retried on the next iteration.
pub(super) fn is_resource_exhaustion(err: &Error) -> bool {
    match err {
        Error::Sys(errno) => matches!(errno, Errno::EAGAIN | Errno::ENOMEM),
        Error::Io(e) => matches!(
            e.raw_os_error(),
            Some(libc::EMFILE | libc::ENFILE | libc::ENOMEM)
        ),
        _ => false,
    }
}
