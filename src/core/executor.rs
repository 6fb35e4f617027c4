//! Executor contract the dispatchers schedule through.

use std::sync::Arc;
use std::time::Duration;

use super::error::DispatchResult;
use super::task::Task;
use super::worker_pool::{PoolStats, WorkerThreadInfo};

/// Abstraction over the shared worker pool.
///
/// Dispatchers only hand tasks over and read counters; how the tasks reach a
/// thread is up to the implementation. Implementations must accept
/// submissions from arbitrary threads and must guarantee that once
/// [`terminate`](Self::terminate) returns no queued task starts.
///
/// # Example
///
/// ```rust,ignore
/// use prometheus_task_dispatch::core::{Task, TaskExecutor, WorkerPool};
/// use prometheus_task_dispatch::config::WorkerPoolConfig;
///
/// let pool = WorkerPool::new(WorkerPoolConfig::new().with_worker_count(2))?;
/// pool.execute(Arc::new(Task::new(Box::new(|| println!("hi")), TaskPriority::High)))?;
/// ```
pub trait TaskExecutor: Send + Sync {
    /// Queue `task` for execution according to its priority.
    ///
    /// # Errors
    ///
    /// `Shutdown` after termination, `QueueFull` when at capacity.
    fn execute(&self, task: Arc<Task>) -> DispatchResult<()>;

    /// Queue `task` once `delay` has elapsed.
    ///
    /// # Errors
    ///
    /// `Shutdown` after termination, `InvalidArgument` when the deadline
    /// would overflow.
    fn delay_execute(&self, task: Arc<Task>, delay: Duration) -> DispatchResult<()>;

    /// Tasks waiting to start, including delayed ones.
    fn pending_count(&self) -> usize;

    /// Total tasks accepted since creation.
    fn task_counter(&self) -> u64;

    /// Per-thread load snapshot.
    fn worker_threads_info(&self) -> Vec<WorkerThreadInfo>;

    /// Counter snapshot.
    fn stats(&self) -> PoolStats;

    /// Stop the executor. `force` revokes queued work instead of draining it.
    fn terminate(&self, force: bool);

    /// True once [`terminate`](Self::terminate) was called.
    fn is_terminated(&self) -> bool;
}
