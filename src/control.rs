//! Manager ↔ worker control channel.
//!
//! Each worker gets one `UnixStream` pair. The wire format is one byte per
//! message with no framing and no acknowledgement:
//!
//! | Byte   | Sender | Meaning                       |
//! |--------|--------|-------------------------------|
//! | `0xFF` | worker | has headroom (available)      |
//! | `0x00` | worker | at capacity (full)            |
//! | EOF    | either | peer is gone / must exit      |
//!
//! Sends never block and never raise `SIGPIPE`; a signal that cannot be
//! delivered is dropped.

use std::io::{self, Read};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd};
use std::os::unix::net::UnixStream;

use nix::errno::Errno;
use nix::sys::socket::{send, MsgFlags};

/// Byte sent when the worker has room for more connections.
pub const AVAILABLE: u8 = 0xFF;

/// Byte sent when the worker has reached its thread capacity.
pub const FULL: u8 = 0x00;

/// Capacity state reported by a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capacity {
    Available,
    Full,
}

impl Capacity {
    #[inline]
    pub fn as_byte(self) -> u8 {
        match self {
            Capacity::Available => AVAILABLE,
            Capacity::Full => FULL,
        }
    }

    #[inline]
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            AVAILABLE => Some(Capacity::Available),
            FULL => Some(Capacity::Full),
            _ => None,
        }
    }
}

/// Result of reading one message from the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Message {
    Capacity(Capacity),
    /// A byte outside the protocol.
    Unknown(u8),
    /// Peer closed its end.
    Closed,
}

/// One end of a control channel.
#[derive(Debug)]
pub struct ControlEndpoint {
    stream: UnixStream,
}

/// Create a connected manager/worker endpoint pair.
pub fn channel() -> io::Result<(ControlEndpoint, ControlEndpoint)> {
    let (manager, worker) = UnixStream::pair()?;
    Ok((ControlEndpoint { stream: manager }, ControlEndpoint { stream: worker }))
}

impl ControlEndpoint {
    /// Read exactly one message. Blocks if nothing is pending, so callers
    /// should only read after a readiness wait reported the endpoint.
    pub fn recv(&mut self) -> io::Result<Message> {
        let mut buf = [0u8; 1];
        loop {
            match self.stream.read(&mut buf) {
                Ok(0) => return Ok(Message::Closed),
                Ok(_) => {
                    return Ok(match Capacity::from_byte(buf[0]) {
                        Some(capacity) => Message::Capacity(capacity),
                        None => Message::Unknown(buf[0]),
                    })
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                // Reset by a dying peer reads the same as a close
                Err(e) if e.kind() == io::ErrorKind::ConnectionReset => {
                    return Ok(Message::Closed)
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Send a capacity signal without blocking.
    ///
    /// Returns `false` when the byte could not be delivered (peer gone or
    /// socket buffer full). Callers are expected to ignore that.
    pub fn notify(&self, capacity: Capacity) -> bool {
        let flags = MsgFlags::MSG_DONTWAIT | MsgFlags::MSG_NOSIGNAL;
        loop {
            match send(self.stream.as_raw_fd(), &[capacity.as_byte()], flags) {
                Ok(n) => return n == 1,
                Err(Errno::EINTR) => continue,
                Err(_) => return false,
            }
        }
    }
}

impl AsFd for ControlEndpoint {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.stream.as_fd()
    }
}

impl AsRawFd for ControlEndpoint {
    fn as_raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }
}
