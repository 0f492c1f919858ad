//! Readiness wait over a small set of descriptors.

use std::io;
use std::os::fd::BorrowedFd;
use std::time::Duration;

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};

/// Block until at least one descriptor is readable (or hung up), the
/// timeout expires, or a signal interrupts the wait.
///
/// Returns one flag per input descriptor. An interrupted wait reports
/// nothing ready so callers re-check their stop flags.
pub fn wait_readable(fds: &[BorrowedFd<'_>], timeout: Option<Duration>) -> io::Result<Vec<bool>> {
    let mut pollfds: Vec<PollFd<'_>> = fds
        .iter()
        .map(|fd| PollFd::new(*fd, PollFlags::POLLIN))
        .collect();

    let timeout = match timeout {
        None => PollTimeout::NONE,
        // Round up so a 500µs timeout doesn't become a busy spin
        Some(d) => {
            let millis = d.as_nanos().div_ceil(1_000_000).min(i32::MAX as u128) as i32;
            PollTimeout::try_from(millis).unwrap_or(PollTimeout::NONE)
        }
    };

    match poll(&mut pollfds, timeout) {
        Ok(_) => {}
        Err(Errno::EINTR) => return Ok(vec![false; fds.len()]),
        Err(e) => return Err(e.into()),
    }

    let ready = PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR;
    Ok(pollfds
        .iter()
        .map(|p| p.revents().is_some_and(|revents| revents.intersects(ready)))
        .collect())
}
