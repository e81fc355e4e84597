//! The pool and its blocking job queue.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;

use thiserror::Error;
use tracing::{debug, trace};

use crate::job::{JobHandle, JobState};

/// Growth and backpressure bounds.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Hard cap on worker threads.
    pub max_workers: usize,
    /// Queue depth at which submissions are rejected once the pool is
    /// at its worker cap.
    pub max_pending: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_workers: 16,
            max_pending: 256,
        }
    }
}

/// Pool submission failures.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("pool saturated: {pending} jobs pending at the worker cap")]
    Saturated { pending: usize },

    #[error("failed to spawn worker thread: {0}")]
    Spawn(String),
}

enum Task {
    Run(Box<dyn FnOnce() + Send>),
    /// Sentinel pushed by `clear`; the receiving worker exits.
    Stop,
}

struct QueueState {
    tasks: VecDeque<Task>,
    /// Workers currently blocked in `pop`.
    waiting: usize,
}

struct JobQueue {
    state: Mutex<QueueState>,
    available: Condvar,
}

impl JobQueue {
    fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                tasks: VecDeque::new(),
                waiting: 0,
            }),
            available: Condvar::new(),
        }
    }

    fn push(&self, task: Task) {
        let mut state = self.lock();
        state.tasks.push_back(task);
        self.available.notify_one();
    }

    /// Block until a task is available.
    fn pop(&self) -> Task {
        let mut state = self.lock();
        state.waiting += 1;
        loop {
            if let Some(task) = state.tasks.pop_front() {
                state.waiting -= 1;
                return task;
            }
            state = self
                .available
                .wait(state)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    /// `(idle workers not already claimed by queued tasks, queue depth)`
    /// in one lock acquisition, so the grow-on-demand decision sees one
    /// consistent snapshot.
    fn status(&self) -> (usize, usize) {
        let state = self.lock();
        let spare = state.waiting.saturating_sub(state.tasks.len());
        (spare, state.tasks.len())
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Bounded-growth pool of worker threads over a blocking job queue.
pub struct WorkerPool {
    queue: Arc<JobQueue>,
    /// Live worker count; also the spawn ordinal for thread names.
    workers: Mutex<usize>,
    spawned_total: Mutex<usize>,
    config: PoolConfig,
}

impl WorkerPool {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            queue: Arc::new(JobQueue::new()),
            workers: Mutex::new(0),
            spawned_total: Mutex::new(0),
            config,
        }
    }

    /// Submit a job, growing the pool if no idle worker is waiting.
    ///
    /// Never blocks. At the worker cap with a full queue this rejects
    /// with [`PoolError::Saturated`] rather than queueing unboundedly.
    pub fn submit<T, F>(&self, f: F) -> Result<JobHandle<T>, PoolError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (spare, pending) = self.queue.status();
        if spare == 0 {
            let mut workers = self.lock_workers();
            if *workers < self.config.max_workers {
                self.spawn_worker()?;
                *workers += 1;
            } else if pending >= self.config.max_pending {
                return Err(PoolError::Saturated { pending });
            }
        }

        let state = JobState::new();
        let job_state = state.clone();
        self.queue.push(Task::Run(Box::new(move || {
            let outcome = catch_unwind(AssertUnwindSafe(f));
            job_state.complete(outcome);
        })));
        Ok(JobHandle { state })
    }

    /// Stop every live worker and reset the count to zero.
    ///
    /// Workers finish whatever is already queued ahead of their stop
    /// sentinel. A later `submit` grows a fresh worker.
    pub fn clear(&self) {
        let mut workers = self.lock_workers();
        for _ in 0..*workers {
            self.queue.push(Task::Stop);
        }
        debug!(stopped = *workers, "worker pool cleared");
        *workers = 0;
    }

    /// Number of live workers.
    pub fn worker_count(&self) -> usize {
        *self.lock_workers()
    }

    /// Idle workers not already claimed by queued tasks.
    pub fn spare(&self) -> usize {
        self.queue.status().0
    }

    fn spawn_worker(&self) -> Result<(), PoolError> {
        let ordinal = {
            let mut total = self
                .spawned_total
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            *total += 1;
            *total
        };
        let queue = self.queue.clone();
        thread::Builder::new()
            .name(format!("surge-worker-{ordinal}"))
            .spawn(move || worker_loop(queue))
            .map_err(|e| PoolError::Spawn(e.to_string()))?;
        trace!(ordinal, "worker spawned");
        Ok(())
    }

    fn lock_workers(&self) -> MutexGuard<'_, usize> {
        self.workers.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.clear();
    }
}

fn worker_loop(queue: Arc<JobQueue>) {
    loop {
        match queue.pop() {
            Task::Run(job) => job(),
            Task::Stop => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::time::Duration;

    fn wait_for<F: Fn() -> bool>(cond: F) {
        for _ in 0..1000 {
            if cond() {
                return;
            }
            thread::sleep(Duration::from_millis(1));
        }
        panic!("condition not reached in time");
    }

    #[test]
    fn submit_runs_and_join_returns_value() {
        let pool = WorkerPool::new(PoolConfig::default());
        let job = pool.submit(|| 2 + 2).unwrap();
        assert_eq!(job.join(), 4);
        assert_eq!(pool.worker_count(), 1);
    }

    #[test]
    fn pool_grows_to_meet_concurrent_demand() {
        let pool = WorkerPool::new(PoolConfig::default());
        let barrier = Arc::new(Barrier::new(5));

        let jobs: Vec<_> = (0..4)
            .map(|_| {
                let barrier = barrier.clone();
                pool.submit(move || {
                    barrier.wait();
                })
                .unwrap()
            })
            .collect();

        // All four jobs must run at once for the barrier to release.
        barrier.wait();
        for job in jobs {
            job.join();
        }
        assert_eq!(pool.worker_count(), 4);
    }

    #[test]
    fn idle_worker_is_reused() {
        let pool = WorkerPool::new(PoolConfig::default());
        pool.submit(|| ()).unwrap().join();
        wait_for(|| pool.spare() == 1);

        pool.submit(|| ()).unwrap().join();
        assert_eq!(pool.worker_count(), 1);
    }

    #[test]
    #[should_panic(expected = "job went sideways")]
    fn join_reraises_job_panic() {
        let pool = WorkerPool::new(PoolConfig::default());
        let job = pool.submit(|| panic!("job went sideways")).unwrap();
        job.join();
    }

    #[test]
    fn panicked_job_does_not_kill_the_worker() {
        let pool = WorkerPool::new(PoolConfig::default());
        let job = pool.submit(|| panic!("boom")).unwrap();
        assert!(catch_unwind(AssertUnwindSafe(|| job.join())).is_err());

        wait_for(|| pool.spare() == 1);
        assert_eq!(pool.submit(|| 1).unwrap().join(), 1);
        assert_eq!(pool.worker_count(), 1);
    }

    #[test]
    fn clear_stops_workers_and_submit_starts_fresh() {
        let pool = WorkerPool::new(PoolConfig::default());
        for _ in 0..3 {
            pool.submit(|| ()).unwrap().join();
        }
        pool.clear();
        assert_eq!(pool.worker_count(), 0);

        let job = pool.submit(|| 7).unwrap();
        assert_eq!(job.join(), 7);
        assert_eq!(pool.worker_count(), 1);
    }

    #[test]
    fn saturated_pool_rejects() {
        let pool = WorkerPool::new(PoolConfig {
            max_workers: 1,
            max_pending: 1,
        });
        let gate = Arc::new(Barrier::new(2));

        // Occupy the only worker.
        let held = {
            let gate = gate.clone();
            pool.submit(move || {
                gate.wait();
            })
            .unwrap()
        };
        wait_for(|| pool.worker_count() == 1 && pool.spare() == 0);

        // Queues (depth 0 -> 1).
        let queued = pool.submit(|| ()).unwrap();
        // Rejected: at the worker cap with the queue full.
        assert!(matches!(
            pool.submit(|| ()),
            Err(PoolError::Saturated { .. })
        ));

        gate.wait();
        held.join();
        queued.join();
    }

    #[test]
    fn results_propagate_per_job() {
        let pool = WorkerPool::new(PoolConfig::default());
        let counter = Arc::new(AtomicUsize::new(0));

        let jobs: Vec<_> = (0..8)
            .map(|i| {
                let counter = counter.clone();
                pool.submit(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    i * 10
                })
                .unwrap()
            })
            .collect();

        let values: Vec<_> = jobs.into_iter().map(|j| j.join()).collect();
        assert_eq!(values, vec![0, 10, 20, 30, 40, 50, 60, 70]);
        assert_eq!(counter.load(Ordering::SeqCst), 8);
    }
}
