//! Fixed-size worker pool with a batch barrier.
//!
//! Workers block on a condition variable until a batch is submitted, then
//! drain the shared queue. [`ThreadPool::wait`] returns once the queue is empty
//! and no worker is still running a task. Submitting a batch never waits for
//! the previous one, so consecutive batches can overlap and a single `wait`
//! covers all of them.
//!
//! A panicking task is caught and logged; the worker keeps serving the queue.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};
use tracing::{error, info};

use crate::EngineError;

/// A unit of work for the pool.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

struct QueueState {
    jobs: VecDeque<Job>,
    /// Workers currently executing a job.
    active: usize,
    shutdown: bool,
}

struct Shared {
    state: Mutex<QueueState>,
    /// Signalled when jobs arrive or on shutdown.
    work_ready: Condvar,
    /// Signalled when the queue drains and the last active job finishes.
    idle: Condvar,
}

impl Shared {
    fn worker_loop(&self, index: usize) {
        loop {
            let job = {
                let mut state = self.state.lock();
                while state.jobs.is_empty() && !state.shutdown {
                    self.work_ready.wait(&mut state);
                }
                match state.jobs.pop_front() {
                    Some(job) => {
                        state.active += 1;
                        job
                    }
                    None => return,
                }
            };

            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_owned())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "non-string panic payload".to_owned());
                error!(worker = index, panic = %message, "task panicked");
            }

            let mut state = self.state.lock();
            state.active -= 1;
            if state.jobs.is_empty() && state.active == 0 {
                self.idle.notify_all();
            }
        }
    }
}

/// OS-thread pool of fixed size.
pub struct ThreadPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPool")
            .field("size", &self.workers.len())
            .finish()
    }
}

impl ThreadPool {
    /// Start `size` workers (at least one).
    pub fn new(size: usize) -> Result<Self, EngineError> {
        let size = size.max(1);
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState {
                jobs: VecDeque::new(),
                active: 0,
                shutdown: false,
            }),
            work_ready: Condvar::new(),
            idle: Condvar::new(),
        });
        let mut pool = Self {
            shared,
            workers: Vec::with_capacity(size),
        };
        for index in 0..size {
            let shared = Arc::clone(&pool.shared);
            // On error `pool` drops here and joins the workers already started.
            let handle = thread::Builder::new()
                .name(format!("tessera-worker-{index}"))
                .spawn(move || shared.worker_loop(index))
                .map_err(|source| EngineError::ThreadSpawn { index, source })?;
            pool.workers.push(handle);
        }
        info!(workers = size, "thread pool started");
        Ok(pool)
    }

    /// Number of worker threads.
    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Queue a batch of jobs. Does not wait for earlier batches.
    pub fn submit_batch(&self, jobs: Vec<Job>) {
        if jobs.is_empty() {
            return;
        }
        let mut state = self.shared.state.lock();
        state.jobs.extend(jobs);
        self.shared.work_ready.notify_all();
    }

    /// Queue a single job.
    pub fn submit(&self, job: Job) {
        self.submit_batch(vec![job]);
    }

    /// Block until every submitted job has finished.
    pub fn wait(&self) {
        let mut state = self.shared.state.lock();
        while !state.jobs.is_empty() || state.active > 0 {
            self.shared.idle.wait(&mut state);
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock();
            state.shutdown = true;
            self.shared.work_ready.notify_all();
        }
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
        info!("thread pool stopped");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn size_is_at_least_one() {
        assert_eq!(ThreadPool::new(0).unwrap().size(), 1);
        assert_eq!(ThreadPool::new(3).unwrap().size(), 3);
    }

    #[test]
    fn wait_returns_after_whole_batch() {
        let pool = ThreadPool::new(4).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let jobs: Vec<Job> = (0..100)
            .map(|_| {
                let counter = Arc::clone(&counter);
                Box::new(move || {
                    thread::sleep(Duration::from_micros(50));
                    counter.fetch_add(1, Ordering::SeqCst);
                }) as Job
            })
            .collect();
        pool.submit_batch(jobs);
        pool.wait();
        assert_eq!(counter.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn consecutive_batches_share_one_wait() {
        let pool = ThreadPool::new(2).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let jobs: Vec<Job> = (0..10)
                .map(|_| {
                    let counter = Arc::clone(&counter);
                    Box::new(move || {
                        counter.fetch_add(1, Ordering::SeqCst);
                    }) as Job
                })
                .collect();
            pool.submit_batch(jobs);
        }
        pool.wait();
        assert_eq!(counter.load(Ordering::SeqCst), 30);
    }

    #[test]
    fn wait_on_idle_pool_returns_immediately() {
        let pool = ThreadPool::new(1).unwrap();
        pool.wait();
        pool.submit_batch(Vec::new());
        pool.wait();
    }

    #[test]
    fn panicking_task_does_not_kill_worker() {
        let pool = ThreadPool::new(1).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        pool.submit(Box::new(|| panic!("boom")));
        let c = Arc::clone(&counter);
        pool.submit(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        pool.wait();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn drop_joins_workers() {
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let pool = ThreadPool::new(2).unwrap();
            let c = Arc::clone(&counter);
            pool.submit(Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }));
            pool.wait();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
