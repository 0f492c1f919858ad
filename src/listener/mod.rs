//! Shared listening socket setup.
//!
//! The server owns one listening socket; every worker process inherits it
//! across `fork` and calls `accept` on it directly. The kernel hands each
//! pending connection to exactly one of the racing workers.
//!
//! ```text
//!                 ┌──────────────────────┐
//!                 │  listening socket    │  (non-blocking, backlog N)
//!                 └──────────┬───────────┘
//!          ┌─────────────────┼─────────────────┐
//!          │ accept()        │ accept()        │ accept()
//!     ┌────▼─────┐      ┌────▼─────┐      ┌────▼─────┐
//!     │ worker 1 │      │ worker 2 │      │ worker N │
//!     └──────────┘      └──────────┘      └──────────┘
//! ```

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::time::Duration;

use socket2::{Domain, Protocol, SockRef, Socket, TcpKeepalive, Type};

/// Create a bound, listening, non-blocking TCP listener.
pub fn bind(addr: SocketAddr, backlog: i32) -> io::Result<TcpListener> {
    let domain = if addr.is_ipv6() {
        Domain::IPV6
    } else {
        Domain::IPV4
    };

    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;

    Ok(socket.into())
}

/// Configure a freshly accepted connection before it is handed to a job.
///
/// Accepted sockets are switched to blocking mode since jobs run on plain
/// threads; keepalive and `TCP_NODELAY` failures are only logged.
pub fn prepare_accepted(stream: &TcpStream) -> io::Result<()> {
    stream.set_nonblocking(false)?;

    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!(error = %e, "Failed to set TCP_NODELAY");
    }

    let keepalive = TcpKeepalive::new()
        .with_time(Duration::from_secs(60))
        .with_interval(Duration::from_secs(10));
    if let Err(e) = SockRef::from(stream).set_tcp_keepalive(&keepalive) {
        tracing::debug!(error = %e, "Failed to set TCP keepalive");
    }

    Ok(())
}
