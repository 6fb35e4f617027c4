//! Parallel dispatcher with real barriers.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tracing::{debug, warn};

use crate::core::error::{DispatchError, DispatchResult};
use crate::core::executor::TaskExecutor;
use crate::core::task::{Runnable, Task, TaskInterceptor, TaskStage};
use crate::util::serde::TaskPriority;

use super::barrier::BarrierHandler;
use super::base::{dispatch_and_wait, intercepted, submit_or_revoke, TaskDispatcher};

/// Dispatcher whose tasks run concurrently on the shared pool.
///
/// Unlike the global dispatchers, an async barrier here really separates
/// the tasks submitted before it from those submitted after it. A delayed
/// task takes its place in that order when it becomes due, not when it is
/// submitted.
pub struct ParallelTaskDispatcher {
    name: String,
    priority: TaskPriority,
    executor: Arc<dyn TaskExecutor>,
    barrier: Arc<BarrierHandler>,
    interceptor: Option<Arc<dyn TaskInterceptor>>,
    me: Weak<Self>,
}

impl ParallelTaskDispatcher {
    /// Create a parallel dispatcher on `executor`.
    pub fn new(
        name: impl Into<String>,
        priority: TaskPriority,
        executor: Arc<dyn TaskExecutor>,
    ) -> Arc<Self> {
        Self::build(name.into(), priority, executor, None)
    }

    /// Create a parallel dispatcher whose submissions pass `interceptor` first.
    pub fn with_interceptor(
        name: impl Into<String>,
        priority: TaskPriority,
        executor: Arc<dyn TaskExecutor>,
        interceptor: Arc<dyn TaskInterceptor>,
    ) -> Arc<Self> {
        Self::build(name.into(), priority, executor, Some(interceptor))
    }

    fn build(
        name: String,
        priority: TaskPriority,
        executor: Arc<dyn TaskExecutor>,
        interceptor: Option<Arc<dyn TaskInterceptor>>,
    ) -> Arc<Self> {
        debug!(dispatcher = %name, priority = %priority, "Parallel dispatcher created");
        Arc::new_cyclic(|me| Self {
            name,
            priority,
            barrier: BarrierHandler::new(Arc::clone(&executor)),
            executor,
            interceptor,
            me: me.clone(),
        })
    }

    /// Submissions currently held back behind a barrier.
    pub fn held_back_count(&self) -> usize {
        self.barrier.held_back()
    }

    fn submit(&self, task: Arc<Task>, barrier: bool) -> DispatchResult<()> {
        if intercepted(self.interceptor.as_ref(), &task) {
            return Ok(());
        }
        self.barrier.submit(task, barrier)
    }
}

impl TaskDispatcher for ParallelTaskDispatcher {
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
        self.submit(task, false)
    }

    fn delay_dispatch_task(&self, task: Arc<Task>, delay: Duration) -> DispatchResult<()> {
        if intercepted(self.interceptor.as_ref(), &task) {
            return Ok(());
        }
        let barrier = Arc::clone(&self.barrier);
        let name = self.name.clone();
        let due = Arc::clone(&task);
        let carrier = Arc::new(Task::new(
            Box::new(move || {
                if let Err(e) = barrier.submit(Arc::clone(&due), false) {
                    warn!(dispatcher = %name, error = %e, "Delayed task could not be released");
                    let _ = due.revoke();
                }
            }),
            self.priority,
        ));
        carrier.add_task_listener(Arc::new(move |stage: TaskStage| {
            if stage == TaskStage::Revoked {
                let _ = task.revoke();
            }
        }));
        self.executor.delay_execute(carrier, delay)
    }

    fn sync_dispatch_barrier(&self, work: Runnable) -> DispatchResult<()> {
        self.check()?;
        let task = self.create_task(work);
        dispatch_and_wait(&task, |t| self.submit(t, true))
    }

    fn async_dispatch_barrier(&self, work: Runnable) -> DispatchResult<()> {
        self.check()?;
        let task = self.create_task(work);
        submit_or_revoke(&task, |t| self.submit(t, true))
    }
}

impl std::fmt::Debug for ParallelTaskDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParallelTaskDispatcher")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("intercepting", &self.interceptor.is_some())
            .finish_non_exhaustive()
    }
}
