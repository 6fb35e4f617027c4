//! The dispatch contract shared by every dispatcher variant.
//!
//! Variants implement the three primitives (sync, async and delayed hand-off
//! of an already-built [`Task`]); everything else (barriers, groups, apply)
//! is derived here from those primitives.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::warn;

use crate::core::error::{DispatchError, DispatchResult};
use crate::core::group::Group;
use crate::core::task::{Runnable, Task, TaskInterceptor, TaskListener, TaskStage};
use crate::util::serde::TaskPriority;

/// Index-parameterized unit of work used by [`TaskDispatcher::apply_dispatch`].
pub type IterableRunnable = Arc<dyn Fn(usize) + Send + Sync + 'static>;

/// Capability set every dispatcher exposes.
///
/// Concrete dispatchers differ only in *where* work is handed off: a serial
/// lane on the shared pool, the pool directly, or an external event loop.
///
/// Every operation validates with [`check`](Self::check) first and reports a
/// [`DispatchError`] instead of dispatching when it fails.
pub trait TaskDispatcher: Send + Sync {
    /// Dispatcher name, unique per context.
    fn name(&self) -> &str;

    /// Priority given to tasks created by this dispatcher.
    fn priority(&self) -> TaskPriority;

    /// Fail fast if the backing executor or loop is unavailable.
    ///
    /// # Errors
    ///
    /// `Shutdown`, `ExecutorUnavailable` or `EventLoopUnavailable`.
    fn check(&self) -> DispatchResult<()>;

    /// Weak handle to this dispatcher, stored in the tasks it creates.
    fn weak_self(&self) -> Weak<dyn TaskDispatcher>;

    /// Hand `task` off and block until it finished.
    ///
    /// # Errors
    ///
    /// Submission failures, or `Revoked` if the task was revoked first.
    fn sync_dispatch_task(&self, task: Arc<Task>) -> DispatchResult<()>;

    /// Hand `task` off and return immediately.
    ///
    /// # Errors
    ///
    /// Submission failures from the executor or loop.
    fn async_dispatch_task(&self, task: Arc<Task>) -> DispatchResult<()>;

    /// Hand `task` off to run after `delay`.
    ///
    /// # Errors
    ///
    /// Submission failures from the executor or loop.
    fn delay_dispatch_task(&self, task: Arc<Task>, delay: Duration) -> DispatchResult<()>;

    /// Optional interceptor consulted before tasks are submitted.
    fn interceptor(&self) -> Option<Arc<dyn TaskInterceptor>> {
        None
    }

    /// Wrap `work` as a task owned by this dispatcher.
    fn create_task(&self, work: Runnable) -> Arc<Task> {
        Arc::new(Task::with_dispatcher(work, self.priority(), self.weak_self()))
    }

    /// Run `work` on this dispatcher and block until it finished.
    ///
    /// # Errors
    ///
    /// See [`sync_dispatch_task`](Self::sync_dispatch_task).
    fn sync_dispatch(&self, work: Runnable) -> DispatchResult<()> {
        self.check()?;
        self.sync_dispatch_task(self.create_task(work))
    }

    /// Submit `work` and return its revocable handle.
    ///
    /// # Errors
    ///
    /// See [`async_dispatch_task`](Self::async_dispatch_task).
    fn async_dispatch(&self, work: Runnable) -> DispatchResult<Arc<Task>> {
        self.check()?;
        let task = self.create_task(work);
        submit_or_revoke(&task, |t| self.async_dispatch_task(t))?;
        Ok(task)
    }

    /// Submit `work` to run after `delay`; the handle can revoke it until then.
    ///
    /// # Errors
    ///
    /// See [`delay_dispatch_task`](Self::delay_dispatch_task).
    fn delay_dispatch(&self, work: Runnable, delay: Duration) -> DispatchResult<Arc<Task>> {
        self.check()?;
        let task = self.create_task(work);
        submit_or_revoke(&task, |t| self.delay_dispatch_task(t, delay))?;
        Ok(task)
    }

    /// Synchronous barrier. A synchronous call already blocks relative to its
    /// own dispatcher, so this is [`sync_dispatch`](Self::sync_dispatch).
    ///
    /// # Errors
    ///
    /// See [`sync_dispatch`](Self::sync_dispatch).
    fn sync_dispatch_barrier(&self, work: Runnable) -> DispatchResult<()> {
        self.sync_dispatch(work)
    }

    /// Asynchronous barrier. By default this only submits through
    /// [`async_dispatch`](Self::async_dispatch); dispatchers that need a real
    /// barrier override it.
    ///
    /// # Errors
    ///
    /// See [`async_dispatch`](Self::async_dispatch).
    fn async_dispatch_barrier(&self, work: Runnable) -> DispatchResult<()> {
        self.async_dispatch(work).map(|_| ())
    }

    /// Fresh group for use with the group operations.
    fn create_dispatch_group(&self) -> Arc<Group> {
        Arc::new(Group::new())
    }

    /// Submit `work` as part of `group`.
    ///
    /// The caller must already have called [`Group::associate`] for it. The
    /// task signals the group when it runs or is revoked; a failed submission
    /// revokes it, so the group count stays balanced.
    ///
    /// # Errors
    ///
    /// See [`async_dispatch_task`](Self::async_dispatch_task).
    fn async_group_dispatch(&self, group: &Arc<Group>, work: Runnable) -> DispatchResult<Arc<Task>> {
        self.check()?;
        let task = self.create_task(work);
        task.add_task_listener(Arc::new(GroupTaskListener {
            group: Arc::clone(group),
        }));
        submit_or_revoke(&task, |t| self.async_dispatch_task(t))?;
        Ok(task)
    }

    /// Block until every task of `group` finished or `timeout` elapsed.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for a zero timeout, `Timeout` at the deadline.
    fn group_dispatch_wait(&self, group: &Group, timeout: Duration) -> DispatchResult<()> {
        group.await_all_tasks(timeout)
    }

    /// Async-dispatch `work` on this dispatcher once `group` drains.
    ///
    /// # Errors
    ///
    /// `check` failures, or `NotificationsFull`.
    fn group_dispatch_notify(&self, group: &Group, work: Runnable) -> DispatchResult<()> {
        self.check()?;
        let dispatcher = self.weak_self();
        group.add_notification(Box::new(move || {
            let Some(dispatcher) = dispatcher.upgrade() else {
                warn!("Dispatcher released before group notification fired");
                return;
            };
            if let Err(e) = dispatcher.async_dispatch(work) {
                warn!(dispatcher = dispatcher.name(), error = %e, "Group notification dispatch failed");
            }
        }))
    }

    /// Parallel-for: submit `iterations` independent tasks running
    /// `work(0)..work(iterations - 1)`, with no ordering between them.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for zero iterations; otherwise the first submission
    /// failure (remaining indices are still attempted).
    fn apply_dispatch(&self, work: IterableRunnable, iterations: usize) -> DispatchResult<()> {
        self.check()?;
        if iterations == 0 {
            return Err(DispatchError::invalid("apply iterations must be positive"));
        }
        let mut first_error = None;
        for index in 0..iterations {
            let work = Arc::clone(&work);
            if let Err(e) = self.async_dispatch(Box::new(move || work(index))) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

/// Signals the group once the task reaches a terminal stage.
struct GroupTaskListener {
    group: Arc<Group>,
}

impl TaskListener for GroupTaskListener {
    fn on_changed(&self, stage: TaskStage) {
        if stage.is_done() {
            self.group.notify_task_done();
        }
    }
}

/// Blocks a sync dispatch until the task finished.
#[derive(Default)]
struct CompletionLatch {
    done: Mutex<bool>,
    finished: Condvar,
}

impl CompletionLatch {
    fn wait(&self) {
        let mut done = self.done.lock();
        while !*done {
            self.finished.wait(&mut done);
        }
    }
}

impl TaskListener for CompletionLatch {
    fn on_changed(&self, stage: TaskStage) {
        if stage.is_done() {
            *self.done.lock() = true;
            self.finished.notify_all();
        }
    }
}

/// Submit through `submit`; on failure revoke the task so its listeners
/// (groups, barriers, latches) still see it finish.
pub(crate) fn submit_or_revoke(
    task: &Arc<Task>,
    submit: impl FnOnce(Arc<Task>) -> DispatchResult<()>,
) -> DispatchResult<()> {
    submit(Arc::clone(task)).inspect_err(|_| {
        let _ = task.revoke();
    })
}

/// Submit `task` and block until it ran or was revoked.
pub(crate) fn dispatch_and_wait(
    task: &Arc<Task>,
    submit: impl FnOnce(Arc<Task>) -> DispatchResult<()>,
) -> DispatchResult<()> {
    let latch = Arc::new(CompletionLatch::default());
    task.add_task_listener(Arc::clone(&latch) as Arc<dyn TaskListener>);
    submit_or_revoke(task, submit)?;
    latch.wait();
    if task.is_revoked() {
        Err(DispatchError::Revoked)
    } else {
        Ok(())
    }
}

/// Hand `task` to `interceptor` if one is installed and accepts it.
pub(crate) fn intercepted(interceptor: Option<&Arc<dyn TaskInterceptor>>, task: &Arc<Task>) -> bool {
    interceptor.is_some_and(|i| i.intercept(task))
}
