//! Per-connection job abstraction.
//!
//! The server never looks inside a job. A [`JobFactory`] turns an accepted
//! connection into a [`Job`], and a worker thread calls [`Job::run`] on it.

use std::net::{SocketAddr, TcpStream};

/// Work bound to a single accepted connection.
///
/// `run` is expected to return in finite time under normal operation; a job
/// that never returns pins one worker thread until the process is killed.
pub trait Job: Send + 'static {
    fn run(self);
}

impl<F> Job for F
where
    F: FnOnce() + Send + 'static,
{
    fn run(self) {
        self()
    }
}

/// Builds a [`Job`] from an accepted connection.
///
/// `A` is an opaque argument bundle handed to every call unchanged. Closures
/// of the shape `Fn(TcpStream, SocketAddr, &A) -> J` implement this trait.
///
/// ```rust,ignore
/// let factory = |stream: TcpStream, peer: SocketAddr, greeting: &String| {
///     let greeting = greeting.clone();
///     move || echo(stream, peer, &greeting)
/// };
/// ```
pub trait JobFactory<A>: Send + Sync + 'static {
    type Job: Job;

    fn create(&self, conn: TcpStream, peer: SocketAddr, args: &A) -> Self::Job;
}

impl<A, F, J> JobFactory<A> for F
where
    F: Fn(TcpStream, SocketAddr, &A) -> J + Send + Sync + 'static,
    J: Job,
{
    type Job = J;

    fn create(&self, conn: TcpStream, peer: SocketAddr, args: &A) -> J {
        self(conn, peer, args)
    }
}
