//! Fixed-size worker pool, FIFO task queue, submit/future (§4.8).

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use thiserror::Error;
use tracing::{debug, warn};

type Task = Box<dyn FnOnce() + Send + 'static>;

struct Shared {
    queue: Mutex<VecDeque<Task>>,
    condvar: Condvar,
    stop: Mutex<bool>,
}

/// A fixed-size pool of worker threads sharing one FIFO task queue guarded by a mutex
/// and signalled by a condition variable (§4.8).
pub struct ThreadPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    /// Default size is the reported hardware concurrency (minimum 1).
    pub fn new() -> Self {
        let size = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        Self::with_size(size)
    }

    pub fn with_size(size: usize) -> Self {
        let size = size.max(1);
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::new()),
            condvar: Condvar::new(),
            stop: Mutex::new(false),
        });

        let mut workers = Vec::with_capacity(size);
        for id in 0..size {
            let shared = Arc::clone(&shared);
            workers.push(thread::spawn(move || worker_loop(id, shared)));
        }
        debug!(size, "thread pool started");
        Self { shared, workers }
    }

    /// Enqueues `task`, returning a [`PoolFuture`] that resolves once a worker finishes
    /// it. Fails if the pool has already been asked to stop.
    pub fn submit<F, T>(&self, task: F) -> Result<PoolFuture<T>, SubmitError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        if *self.shared.stop.lock().unwrap() {
            return Err(SubmitError::PoolStopped);
        }

        let slot: Arc<(Mutex<Option<T>>, Condvar)> = Arc::new((Mutex::new(None), Condvar::new()));
        let slot_for_task = Arc::clone(&slot);
        let boxed: Task = Box::new(move || {
            let result = task();
            let (lock, condvar) = &*slot_for_task;
            *lock.lock().unwrap() = Some(result);
            condvar.notify_all();
        });

        self.shared.queue.lock().unwrap().push_back(boxed);
        self.shared.condvar.notify_one();
        Ok(PoolFuture { slot })
    }
}

impl Default for ThreadPool {
    fn default() -> Self {
        Self::new()
    }
}

fn worker_loop(id: usize, shared: Arc<Shared>) {
    loop {
        let task = {
            let mut queue = shared.queue.lock().unwrap();
            loop {
                if let Some(task) = queue.pop_front() {
                    break Some(task);
                }
                if *shared.stop.lock().unwrap() {
                    break None;
                }
                queue = shared.condvar.wait(queue).unwrap();
            }
        };
        match task {
            Some(task) => task(),
            None => break,
        }
    }
    debug!(id, "worker exiting");
}

/// Destruction sets `stop`, broadcasts, and joins all workers; any queued tasks are
/// drained by the workers before they exit.
impl Drop for ThreadPool {
    fn drop(&mut self) {
        *self.shared.stop.lock().unwrap() = true;
        self.shared.condvar.notify_all();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                warn!("thread pool worker panicked during shutdown");
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error("submission after thread pool stop")]
    PoolStopped,
}

/// A handle to a task's eventual result, backed by a mutex+condvar slot rather than an
/// async runtime (this crate has no async dependency).
pub struct PoolFuture<T> {
    slot: Arc<(Mutex<Option<T>>, Condvar)>,
}

impl<T> PoolFuture<T> {
    /// Blocks the calling thread until the task completes.
    pub fn join(self) -> T {
        let (lock, condvar) = &*self.slot;
        let mut guard = lock.lock().unwrap();
        loop {
            if let Some(value) = guard.take() {
                return value;
            }
            guard = condvar.wait(guard).unwrap();
        }
    }

    pub fn is_ready(&self) -> bool {
        self.slot.0.lock().unwrap().is_some()
    }
}
