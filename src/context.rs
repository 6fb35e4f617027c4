//! Dispatcher factory and owner of the shared worker pool.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{error, info};

use crate::config::WorkerPoolConfig;
use crate::core::error::{DispatchError, DispatchResult};
use crate::core::event_loop::EventLoop;
use crate::core::executor::TaskExecutor;
use crate::core::worker_pool::{PoolStats, WorkerPool, WorkerThreadInfo};
use crate::dispatcher::{
    generated_name, GlobalTaskDispatcher, ParallelTaskDispatcher, SerialTaskDispatcher,
    SpecTaskDispatcher,
};
use crate::util::serde::TaskPriority;

/// Owns the worker pool and hands out dispatchers bound to it.
///
/// A context whose pool failed to start stays usable for event-loop
/// dispatchers; every pool-bound factory then reports
/// [`DispatchError::ExecutorUnavailable`] and the telemetry calls report an
/// idle pool.
pub struct TaskDispatcherContext {
    executor: Option<Arc<dyn TaskExecutor>>,
    global_dispatchers: Mutex<[Option<Arc<GlobalTaskDispatcher>>; 3]>,
    serial_dispatchers: Mutex<HashMap<String, Weak<SerialTaskDispatcher>>>,
}

impl TaskDispatcherContext {
    /// Start a worker pool from `config` and wrap it in a context.
    ///
    /// A pool that fails to start is logged, not returned as an error.
    pub fn new(config: WorkerPoolConfig) -> Self {
        let executor = match WorkerPool::new(config) {
            Ok(pool) => Some(Arc::new(pool) as Arc<dyn TaskExecutor>),
            Err(e) => {
                error!(error = %e, "Worker pool failed to start; pool-bound dispatchers unavailable");
                None
            }
        };
        Self::from_parts(executor)
    }

    /// Wrap an existing executor.
    pub fn with_executor(executor: Arc<dyn TaskExecutor>) -> Self {
        Self::from_parts(Some(executor))
    }

    fn from_parts(executor: Option<Arc<dyn TaskExecutor>>) -> Self {
        Self {
            executor,
            global_dispatchers: Mutex::new([None, None, None]),
            serial_dispatchers: Mutex::new(HashMap::new()),
        }
    }

    /// The shared executor, if it started.
    pub fn executor(&self) -> Option<Arc<dyn TaskExecutor>> {
        self.executor.clone()
    }

    fn live_executor(&self) -> DispatchResult<Arc<dyn TaskExecutor>> {
        let executor = self
            .executor
            .as_ref()
            .ok_or(DispatchError::ExecutorUnavailable)?;
        if executor.is_terminated() {
            return Err(DispatchError::Shutdown);
        }
        Ok(Arc::clone(executor))
    }

    /// The process-wide concurrent dispatcher for `priority`.
    ///
    /// Repeated calls return the same instance.
    ///
    /// # Errors
    ///
    /// `ExecutorUnavailable` without a pool, `Shutdown` after [`shutdown`](Self::shutdown).
    pub fn global_task_dispatcher(
        &self,
        priority: TaskPriority,
    ) -> DispatchResult<Arc<GlobalTaskDispatcher>> {
        let executor = self.live_executor()?;
        let mut slots = self.global_dispatchers.lock();
        let slot = &mut slots[priority.index()];
        let dispatcher = slot.get_or_insert_with(|| GlobalTaskDispatcher::new(priority, executor));
        Ok(Arc::clone(dispatcher))
    }

    /// Create a serial lane. A missing name is generated.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if a live serial dispatcher already uses `name`,
    /// otherwise as for [`global_task_dispatcher`](Self::global_task_dispatcher).
    pub fn create_serial_dispatcher(
        &self,
        name: Option<&str>,
        priority: TaskPriority,
    ) -> DispatchResult<Arc<SerialTaskDispatcher>> {
        let executor = self.live_executor()?;
        let name = name.map_or_else(|| generated_name("serial"), str::to_string);

        let mut registry = self.serial_dispatchers.lock();
        registry.retain(|_, lane| lane.strong_count() > 0);
        if registry.contains_key(&name) {
            return Err(DispatchError::invalid(format!(
                "serial dispatcher name already in use: {name}"
            )));
        }
        let dispatcher = SerialTaskDispatcher::new(name.clone(), priority, executor);
        registry.insert(name, Arc::downgrade(&dispatcher));
        Ok(dispatcher)
    }

    /// Create a parallel dispatcher with real barriers. A missing name is
    /// generated.
    ///
    /// # Errors
    ///
    /// As for [`global_task_dispatcher`](Self::global_task_dispatcher).
    pub fn create_parallel_dispatcher(
        &self,
        name: Option<&str>,
        priority: TaskPriority,
    ) -> DispatchResult<Arc<ParallelTaskDispatcher>> {
        let executor = self.live_executor()?;
        let name = name.map_or_else(|| generated_name("parallel"), str::to_string);
        Ok(ParallelTaskDispatcher::new(name, priority, executor))
    }

    /// Bind a dispatcher to an externally owned event loop. Works without
    /// a pool.
    ///
    /// # Errors
    ///
    /// `EventLoopUnavailable` if the loop is not running.
    pub fn create_spec_dispatcher(
        &self,
        name: Option<&str>,
        priority: TaskPriority,
        event_loop: Arc<dyn EventLoop>,
    ) -> DispatchResult<Arc<SpecTaskDispatcher>> {
        if !event_loop.is_running() {
            return Err(DispatchError::EventLoopUnavailable);
        }
        let name = name.map_or_else(|| generated_name("spec"), str::to_string);
        Ok(SpecTaskDispatcher::new(name, priority, event_loop))
    }

    /// Terminate the pool and drop the cached dispatchers.
    ///
    /// `force` revokes queued work instead of draining it. Calling this
    /// more than once is harmless.
    pub fn shutdown(&self, force: bool) {
        if let Some(executor) = &self.executor {
            if !executor.is_terminated() {
                info!(force, "Shutting down dispatcher context");
            }
            executor.terminate(force);
        }
        *self.global_dispatchers.lock() = [None, None, None];
        self.serial_dispatchers.lock().clear();
    }

    /// Tasks the pool holds but has not started: the ready queue plus
    /// delayed tasks that are not due yet.
    pub fn waiting_tasks_count(&self) -> usize {
        self.executor.as_ref().map_or(0, |e| e.pending_count())
    }

    /// Tasks ever accepted by the pool, delayed ones included.
    pub fn task_counter(&self) -> u64 {
        self.executor.as_ref().map_or(0, |e| e.task_counter())
    }

    /// Per-worker load snapshot.
    pub fn worker_threads_info(&self) -> Vec<WorkerThreadInfo> {
        self.executor
            .as_ref()
            .map_or_else(Vec::new, |e| e.worker_threads_info())
    }

    /// Queued task count for every live serial dispatcher, by name.
    pub fn serial_dispatcher_tasks(&self) -> HashMap<String, usize> {
        let mut registry = self.serial_dispatchers.lock();
        registry.retain(|_, lane| lane.strong_count() > 0);
        registry
            .iter()
            .filter_map(|(name, lane)| lane.upgrade().map(|lane| (name.clone(), lane.pending_count())))
            .collect()
    }

    /// Pool statistics.
    pub fn stats(&self) -> PoolStats {
        self.executor
            .as_ref()
            .map_or_else(PoolStats::default, |e| e.stats())
    }
}

impl Default for TaskDispatcherContext {
    fn default() -> Self {
        Self::new(WorkerPoolConfig::default())
    }
}

impl std::fmt::Debug for TaskDispatcherContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskDispatcherContext")
            .field("has_executor", &self.executor.is_some())
            .field("serial_dispatchers", &self.serial_dispatchers.lock().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::TaskDispatcher;

    fn context() -> TaskDispatcherContext {
        TaskDispatcherContext::new(WorkerPoolConfig::new().with_worker_count(2))
    }

    #[test]
    fn test_global_dispatcher_is_cached_per_priority() {
        let ctx = context();
        let a = ctx.global_task_dispatcher(TaskPriority::High).unwrap();
        let b = ctx.global_task_dispatcher(TaskPriority::High).unwrap();
        let c = ctx.global_task_dispatcher(TaskPriority::Low).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        ctx.shutdown(false);
    }

    #[test]
    fn test_serial_names_are_unique() {
        let ctx = context();
        let lane = ctx
            .create_serial_dispatcher(Some("io"), TaskPriority::Default)
            .unwrap();
        assert_eq!(lane.name(), "io");
        assert!(matches!(
            ctx.create_serial_dispatcher(Some("io"), TaskPriority::Default),
            Err(DispatchError::InvalidArgument(_))
        ));
        drop(lane);
        assert!(ctx
            .create_serial_dispatcher(Some("io"), TaskPriority::Default)
            .is_ok());

        let generated = ctx
            .create_serial_dispatcher(None, TaskPriority::Default)
            .unwrap();
        assert!(generated.name().starts_with("serial-"));
        ctx.shutdown(false);
    }

    #[test]
    fn test_missing_pool_reports_unavailable() {
        let ctx = TaskDispatcherContext::new(WorkerPoolConfig::new().with_worker_count(0));
        assert!(ctx.executor().is_none());
        assert_eq!(
            ctx.global_task_dispatcher(TaskPriority::Default).map(|_| ()),
            Err(DispatchError::ExecutorUnavailable)
        );
        assert_eq!(ctx.waiting_tasks_count(), 0);
        assert_eq!(ctx.task_counter(), 0);
        assert!(ctx.worker_threads_info().is_empty());
        assert_eq!(ctx.stats(), PoolStats::default());
    }

    #[test]
    fn test_shutdown_is_final_and_idempotent() {
        let ctx = context();
        ctx.shutdown(true);
        ctx.shutdown(true);
        assert_eq!(
            ctx.create_parallel_dispatcher(None, TaskPriority::Default)
                .map(|_| ()),
            Err(DispatchError::Shutdown)
        );
        assert!(ctx.serial_dispatcher_tasks().is_empty());
    }
}
