//! Classification of worker process exits.

use nix::sys::signal::Signal;
use nix::sys::wait::WaitStatus;

/// Reason why a worker process terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// Normal exit with status code.
    Exited(i32),
    /// Killed by signal.
    Signaled(Signal),
    /// Already collected elsewhere; the status is lost.
    Unknown,
}

impl TerminationReason {
    /// Map a wait status to a termination reason. `None` means the process
    /// has not terminated (still running, stopped or continued).
    pub fn from_wait_status(status: WaitStatus) -> Option<Self> {
        match status {
            WaitStatus::Exited(_, code) => Some(Self::Exited(code)),
            WaitStatus::Signaled(_, signal, _) => Some(Self::Signaled(signal)),
            _ => None,
        }
    }

    /// Exit status 0: the worker drained and left on its own.
    pub fn is_clean(&self) -> bool {
        matches!(self, Self::Exited(0))
    }
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exited(code) => write!(f, "exited with code {}", code),
            Self::Signaled(sig) => write!(f, "killed by signal {:?}", sig),
            Self::Unknown => write!(f, "exit status unavailable"),
        }
    }
}
