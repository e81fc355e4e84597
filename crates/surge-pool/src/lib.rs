//! surge-pool — a lazily-growing pool of worker threads.
//!
//! Dispatch for everything the coordinator must not block on: store
//! writes, provisioning calls, notification hooks. Workers are never
//! pre-spawned; [`WorkerPool::submit`] starts one only when no idle
//! worker is waiting on the queue, up to a configured cap. Past the cap
//! submissions queue, and past a configured queue depth they are
//! rejected outright — `submit` itself never blocks.
//!
//! Each submission returns a [`JobHandle`]; [`JobHandle::join`] blocks
//! until the job ran, re-raising a panic captured during execution in
//! the waiter's thread.

pub mod job;
pub mod pool;

pub use job::JobHandle;
pub use pool::{PoolConfig, PoolError, WorkerPool};
