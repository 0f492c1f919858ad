//! Fixed-size thread pool used inside each worker process.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                      ThreadPool                            │
//! ├────────────────────────────────────────────────────────────┤
//! │  ┌─────────┐    ┌─────────┐    ┌─────────┐                 │
//! │  │ thread0 │    │ thread1 │    │ threadN │  ...            │
//! │  └────┬────┘    └────┬────┘    └────┬────┘                 │
//! │       └──────────────┴──────────────┘                      │
//! │                      │                                     │
//! │              ┌───────▼───────┐                             │
//! │              │  mpsc channel │  (unbounded queue)          │
//! │              └───────┬───────┘                             │
//! │              ┌───────▼───────┐                             │
//! │              │   execute()   │  (never blocks)             │
//! │              └───────────────┘                             │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! The queue is unbounded. The worker's capacity gate already caps in-flight
//! connections at the thread count, so the queue only holds tasks whose
//! thread is still finishing a completion callback.

mod error;
mod thread;

pub use error::{PoolError, PoolResult};
pub use thread::ThreadPool;

/// Counters describing pool activity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Tasks that ran to completion.
    pub completed: u64,
    /// Tasks that panicked.
    pub panicked: u64,
}
