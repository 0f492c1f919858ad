//! Thread pool implementation.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::{self, JoinHandle};

use super::error::{PoolError, PoolResult};
use super::PoolStats;

type Task = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct Counters {
    completed: AtomicU64,
    panicked: AtomicU64,
}

/// A fixed set of threads pulling tasks from a shared queue.
pub struct ThreadPool {
    /// Queue sender; `None` once shut down.
    task_tx: Mutex<Option<mpsc::Sender<Task>>>,
    /// Worker thread handles.
    threads: Mutex<Vec<JoinHandle<()>>>,
    counters: Arc<Counters>,
    /// Pool name for logging and thread names.
    name: String,
}

impl ThreadPool {
    /// Start `num_threads` threads (at least one).
    pub fn new(num_threads: usize, name: impl Into<String>) -> PoolResult<Self> {
        let name = name.into();
        let num_threads = num_threads.max(1);
        let (task_tx, task_rx) = mpsc::channel::<Task>();
        let task_rx = Arc::new(Mutex::new(task_rx));
        let counters = Arc::new(Counters::default());

        let mut threads = Vec::with_capacity(num_threads);

        for id in 0..num_threads {
            let rx = Arc::clone(&task_rx);
            let counters = Arc::clone(&counters);

            let handle = thread::Builder::new()
                .name(format!("{}-{}", name, id))
                .spawn(move || Self::thread_loop(id, rx, counters))
                .map_err(|e| PoolError::Spawn(e.to_string()))?;

            threads.push(handle);
        }

        tracing::debug!(pool = %name, threads = num_threads, "thread pool created");

        Ok(Self {
            task_tx: Mutex::new(Some(task_tx)),
            threads: Mutex::new(threads),
            counters,
            name,
        })
    }

    fn thread_loop(id: usize, rx: Arc<Mutex<mpsc::Receiver<Task>>>, counters: Arc<Counters>) {
        tracing::trace!(thread = id, "pool thread started");

        loop {
            let task = {
                let guard = match rx.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                guard.recv()
            };

            let Ok(task) = task else {
                // Channel closed, shutdown
                break;
            };

            match panic::catch_unwind(AssertUnwindSafe(task)) {
                Ok(()) => {
                    counters.completed.fetch_add(1, Ordering::Relaxed);
                }
                Err(payload) => {
                    counters.panicked.fetch_add(1, Ordering::Relaxed);
                    let err = PoolError::TaskPanic(panic_message(payload.as_ref()));
                    tracing::error!(thread = id, error = %err, "task panicked");
                }
            }
        }

        tracing::trace!(thread = id, "pool thread stopped");
    }

    /// Queue a task. Never blocks.
    pub fn execute<F>(&self, task: F) -> PoolResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let guard = self.task_tx.lock().map_err(|_| PoolError::Shutdown)?;
        let tx = guard.as_ref().ok_or(PoolError::Shutdown)?;

        tx.send(Box::new(task)).map_err(|_| PoolError::Shutdown)
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            completed: self.counters.completed.load(Ordering::Relaxed),
            panicked: self.counters.panicked.load(Ordering::Relaxed),
        }
    }

    /// Stop accepting tasks. Queued tasks still run.
    pub fn shutdown(&self) {
        let sender = match self.task_tx.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if sender.is_some() {
            tracing::debug!(pool = %self.name, "shutting down thread pool");
        }
        // Dropping the sender lets threads exit once the queue is empty
    }

    /// Shut down and wait for every thread to finish.
    pub fn join(&self) {
        self.shutdown();
        let handles: Vec<_> = match self.threads.lock() {
            Ok(mut threads) => threads.drain(..).collect(),
            Err(poisoned) => poisoned.into_inner().drain(..).collect(),
        };
        for handle in handles {
            let _ = handle.join();
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
