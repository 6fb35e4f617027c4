//! Process-wide concurrent dispatchers, one per priority class.

use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::core::error::{DispatchError, DispatchResult};
use crate::core::executor::TaskExecutor;
use crate::core::task::{Task, TaskInterceptor};
use crate::util::serde::TaskPriority;

use super::base::{dispatch_and_wait, intercepted, TaskDispatcher};

/// Concurrent dispatcher that hands tasks straight to the pool.
///
/// Barriers on a global dispatcher do not hold anything back: the async
/// barrier is a plain async dispatch.
pub struct GlobalTaskDispatcher {
    name: String,
    priority: TaskPriority,
    executor: Arc<dyn TaskExecutor>,
    interceptor: Option<Arc<dyn TaskInterceptor>>,
    me: Weak<Self>,
}

impl GlobalTaskDispatcher {
    /// Create the global dispatcher for `priority`.
    pub fn new(priority: TaskPriority, executor: Arc<dyn TaskExecutor>) -> Arc<Self> {
        Self::build(priority, executor, None)
    }

    /// Global dispatcher whose submissions pass `interceptor` first.
    pub fn with_interceptor(
        priority: TaskPriority,
        executor: Arc<dyn TaskExecutor>,
        interceptor: Arc<dyn TaskInterceptor>,
    ) -> Arc<Self> {
        Self::build(priority, executor, Some(interceptor))
    }

    fn build(
        priority: TaskPriority,
        executor: Arc<dyn TaskExecutor>,
        interceptor: Option<Arc<dyn TaskInterceptor>>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            name: format!("global-{priority}"),
            priority,
            executor,
            interceptor,
            me: me.clone(),
        })
    }
}

impl TaskDispatcher for GlobalTaskDispatcher {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> TaskPriority {
        self.priority
    }

    fn check(&self) -> DispatchResult<()> {
        if self.executor.is_terminated() {
            return Err(DispatchError::Shutdown);
        }
        Ok(())
    }

    fn weak_self(&self) -> Weak<dyn TaskDispatcher> {
        self.me.clone()
    }

    fn interceptor(&self) -> Option<Arc<dyn TaskInterceptor>> {
        self.interceptor.clone()
    }

    fn sync_dispatch_task(&self, task: Arc<Task>) -> DispatchResult<()> {
        dispatch_and_wait(&task, |t| self.async_dispatch_task(t))
    }

    fn async_dispatch_task(&self, task: Arc<Task>) -> DispatchResult<()> {
        if intercepted(self.interceptor.as_ref(), &task) {
            return Ok(());
        }
        self.executor.execute(task)
    }

    fn delay_dispatch_task(&self, task: Arc<Task>, delay: Duration) -> DispatchResult<()> {
        if intercepted(self.interceptor.as_ref(), &task) {
            return Ok(());
        }
        self.executor.delay_execute(task, delay)
    }
}

impl std::fmt::Debug for GlobalTaskDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlobalTaskDispatcher")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkerPoolConfig;
    use crate::core::worker_pool::WorkerPool;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_name_follows_priority() {
        let executor: Arc<dyn TaskExecutor> =
            Arc::new(WorkerPool::new(WorkerPoolConfig::new().with_worker_count(1)).unwrap());
        let high = GlobalTaskDispatcher::new(TaskPriority::High, Arc::clone(&executor));
        assert_eq!(high.name(), "global-high");
        assert_eq!(high.priority(), TaskPriority::High);
        executor.terminate(false);
    }

    #[test]
    fn test_apply_runs_every_index() {
        let executor: Arc<dyn TaskExecutor> =
            Arc::new(WorkerPool::new(WorkerPoolConfig::new().with_worker_count(3)).unwrap());
        let dispatcher = GlobalTaskDispatcher::new(TaskPriority::Default, Arc::clone(&executor));
        let mask = Arc::new(AtomicUsize::new(0));
        let m = Arc::clone(&mask);
        dispatcher
            .apply_dispatch(Arc::new(move |i: usize| {
                m.fetch_or(1 << i, Ordering::SeqCst);
            }), 5)
            .unwrap();
        executor.terminate(false);
        assert_eq!(mask.load(Ordering::SeqCst), 0b1_1111);
    }

    #[test]
    fn test_oversized_delay_is_rejected() {
        let executor: Arc<dyn TaskExecutor> =
            Arc::new(WorkerPool::new(WorkerPoolConfig::new().with_worker_count(1)).unwrap());
        let dispatcher = GlobalTaskDispatcher::new(TaskPriority::Default, Arc::clone(&executor));
        assert!(matches!(
            dispatcher.delay_dispatch(Box::new(|| {}), Duration::MAX),
            Err(DispatchError::InvalidArgument(_))
        ));
        assert_eq!(executor.pending_count(), 0);
        assert_eq!(executor.task_counter(), 0);
        executor.terminate(false);
    }

    struct Swallow(AtomicUsize);

    impl TaskInterceptor for Swallow {
        fn intercept(&self, task: &Arc<Task>) -> bool {
            self.0.fetch_add(1, Ordering::SeqCst);
            let _ = task.revoke();
            true
        }
    }

    #[test]
    fn test_interceptor_takes_delayed_tasks() {
        let executor: Arc<dyn TaskExecutor> =
            Arc::new(WorkerPool::new(WorkerPoolConfig::new().with_worker_count(1)).unwrap());
        let interceptor = Arc::new(Swallow(AtomicUsize::new(0)));
        let dispatcher = GlobalTaskDispatcher::with_interceptor(
            TaskPriority::Default,
            Arc::clone(&executor),
            Arc::clone(&interceptor) as Arc<dyn TaskInterceptor>,
        );
        let task = dispatcher
            .delay_dispatch(Box::new(|| {}), Duration::from_millis(5))
            .unwrap();
        dispatcher.async_dispatch_barrier(Box::new(|| {})).unwrap();

        assert!(task.is_revoked());
        assert_eq!(interceptor.0.load(Ordering::SeqCst), 2);
        assert_eq!(executor.task_counter(), 0);
        executor.terminate(false);
    }

    #[test]
    fn test_apply_rejects_zero_iterations() {
        let executor: Arc<dyn TaskExecutor> =
            Arc::new(WorkerPool::new(WorkerPoolConfig::new().with_worker_count(1)).unwrap());
        let dispatcher = GlobalTaskDispatcher::new(TaskPriority::Low, Arc::clone(&executor));
        assert!(matches!(
            dispatcher.apply_dispatch(Arc::new(|_: usize| {}), 0),
            Err(DispatchError::InvalidArgument(_))
        ));
        executor.terminate(false);
    }
}
