//! Shared worker pool backing every pool-bound dispatcher.
//!
//! The pool owns a fixed set of OS worker threads consuming one
//! priority-ordered ready queue, plus a guard thread that holds delayed
//! tasks until they are due.
//!
//! # Key Features
//!
//! - **Priority classes**: `High` before `Default` before `Low`, FIFO within a class
//! - **No polling**: workers park on a condvar, the guard blocks on a channel
//! - **Contained failures**: a panicking task never takes a worker down
//! - **Graceful or forced termination**: drain the queue, or revoke it
//!
//! # Example
//!
//! ```rust,ignore
//! use prometheus_task_dispatch::config::WorkerPoolConfig;
//! use prometheus_task_dispatch::core::{TaskExecutor, WorkerPool};
//!
//! let pool = WorkerPool::new(WorkerPoolConfig::new().with_worker_count(4))?;
//! pool.execute(task)?;
//! pool.terminate(false);
//! ```

mod native;

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::Serialize;

pub use native::WorkerPool;

/// Statistics about pool utilization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Number of worker threads.
    pub worker_count: usize,
    /// Tasks currently executing.
    pub active_tasks: u64,
    /// Tasks in the ready queue.
    pub queued_tasks: u64,
    /// Tasks waiting for their delay to elapse.
    pub delayed_tasks: u64,
    /// Tasks accepted by `execute` or `delay_execute`.
    pub submitted_tasks: u64,
    /// Tasks whose work ran.
    pub completed_tasks: u64,
    /// Tasks dequeued after they had been revoked.
    pub skipped_tasks: u64,
}

/// Load snapshot of a single worker thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerThreadInfo {
    /// Worker index within the pool.
    pub worker_id: usize,
    /// OS thread name.
    pub name: String,
    /// Tasks this worker has executed.
    pub executed_tasks: u64,
    /// Whether the worker is running a task right now.
    pub busy: bool,
}

/// Internal counters for pool statistics (thread-safe).
#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    pub active_tasks: AtomicU64,
    pub delayed_tasks: AtomicUsize,
    pub submitted_tasks: AtomicU64,
    pub completed_tasks: AtomicU64,
    pub skipped_tasks: AtomicU64,
}

impl PoolCounters {
    /// Get a snapshot of current statistics.
    pub fn snapshot(&self, worker_count: usize, queued_tasks: usize) -> PoolStats {
        PoolStats {
            worker_count,
            active_tasks: self.active_tasks.load(Ordering::Relaxed),
            queued_tasks: queued_tasks as u64,
            delayed_tasks: self.delayed_tasks.load(Ordering::Relaxed) as u64,
            submitted_tasks: self.submitted_tasks.load(Ordering::Relaxed),
            completed_tasks: self.completed_tasks.load(Ordering::Relaxed),
            skipped_tasks: self.skipped_tasks.load(Ordering::Relaxed),
        }
    }
}
