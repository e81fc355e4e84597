//! Per-job completion state.

use std::panic::resume_unwind;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;

type Outcome<T> = thread::Result<T>;

pub(crate) struct JobState<T> {
    outcome: Mutex<Option<Outcome<T>>>,
    done: Condvar,
}

impl<T> JobState<T> {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            outcome: Mutex::new(None),
            done: Condvar::new(),
        })
    }

    /// Record the job's outcome and wake every waiter. Called exactly
    /// once, by the worker that ran the job.
    pub(crate) fn complete(&self, outcome: Outcome<T>) {
        let mut slot = self.lock();
        debug_assert!(slot.is_none());
        *slot = Some(outcome);
        self.done.notify_all();
    }

    fn lock(&self) -> MutexGuard<'_, Option<Outcome<T>>> {
        self.outcome.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Handle to a submitted job.
pub struct JobHandle<T> {
    pub(crate) state: Arc<JobState<T>>,
}

impl<T> JobHandle<T> {
    /// Block until the job has run.
    ///
    /// Returns the job's value, or resumes the job's panic in this
    /// thread if the closure panicked.
    pub fn join(self) -> T {
        let mut slot = self.state.lock();
        loop {
            if let Some(outcome) = slot.take() {
                match outcome {
                    Ok(value) => return value,
                    Err(payload) => resume_unwind(payload),
                }
            }
            slot = self
                .state
                .done
                .wait(slot)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Whether the job has finished running.
    pub fn is_done(&self) -> bool {
        self.state.lock().is_some()
    }
}
