//! prefork - Preforking TCP server with self-balancing worker processes.
//!
//! A single server process owns a listening socket and forks worker
//! processes that race to `accept` on it. Each worker runs accepted
//! connections on its own thread pool and tells the server, over a one-byte
//! control channel, whether it still has room for more work. The server
//! keeps a target number of spare workers available and replaces workers
//! that exit.
//!
//! # Features
//!
//! - **Spare-worker balancing**: spawns below `min_spare`, retires above `max_spare`
//! - **Bounded pool**: never more than `max_children` worker processes
//! - **Worker recycling**: workers exit after `max_requests_per_worker` connections
//! - **Graceful shutdown**: `SIGTERM`/`SIGINT` drain, `SIGHUP` drains and reloads
//! - **Structured logging**: text or JSON lines via `tracing`
//!
//! # Example
//!
//! ```rust,ignore
//! use std::io::Write;
//! use prefork::{listener, PoolConfig, Server};
//!
//! let listener = listener::bind("0.0.0.0:8080".parse()?, 1024)?;
//! let factory = |mut stream: std::net::TcpStream, _peer, greeting: &String| {
//!     let greeting = greeting.clone();
//!     move || {
//!         let _ = stream.write_all(greeting.as_bytes());
//!     }
//! };
//! let mut server = Server::new(PoolConfig::new(2, 4, 16, 8), factory, "hello\n".to_string())?;
//! server.run(&listener)?;
//! ```

/// Package version from Cargo.toml
pub const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Git commit hash (8 chars), empty outside a git checkout
pub const BUILD_VERSION: &str = env!("BUILD_VERSION");

/// Full version string: "0.1.0 (abc12345)"
pub const VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("BUILD_VERSION"), ")");

pub mod config;
pub mod control;
pub mod error;
pub mod job;
pub mod listener;
pub mod logging;
pub mod readiness;
pub mod server;
pub mod signals;
pub mod worker;

// Re-exports for convenience
pub use config::{Config, PoolConfig};
pub use error::{Error, Result};
pub use job::{Job, JobFactory};
pub use server::{PoolStatus, Server, StatusSnapshot};
pub use signals::ShutdownHandle;
