//! Serial dispatcher: a FIFO lane multiplexed onto the shared worker pool.
//!
//! At most one task of a lane runs at any time. The lane owns its queue and
//! keeps exactly one *driver* task in the pool while it has work; each driver
//! runs the head of the queue and then resubmits the next driver.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::core::error::{DispatchError, DispatchResult};
use crate::core::executor::TaskExecutor;
use crate::core::task::{Task, TaskStage};
use crate::util::serde::TaskPriority;

use super::base::{dispatch_and_wait, TaskDispatcher};

#[derive(Default)]
struct Lane {
    queue: VecDeque<Arc<Task>>,
    /// A driver is in the pool (or running) for this lane.
    scheduled: bool,
}

/// Dispatcher guaranteeing FIFO, non-overlapping execution of its tasks.
pub struct SerialTaskDispatcher {
    name: String,
    priority: TaskPriority,
    executor: Arc<dyn TaskExecutor>,
    lane: Mutex<Lane>,
    running_on: Mutex<Option<ThreadId>>,
    executed: AtomicU64,
    me: Weak<Self>,
}

impl SerialTaskDispatcher {
    /// Create a serial lane on `executor`.
    pub fn new(
        name: impl Into<String>,
        priority: TaskPriority,
        executor: Arc<dyn TaskExecutor>,
    ) -> Arc<Self> {
        let name = name.into();
        debug!(dispatcher = %name, priority = %priority, "Serial dispatcher created");
        Arc::new_cyclic(|me| Self {
            name,
            priority,
            executor,
            lane: Mutex::new(Lane::default()),
            running_on: Mutex::new(None),
            executed: AtomicU64::new(0),
            me: me.clone(),
        })
    }

    /// Tasks queued on this lane and not yet started. Revoked tasks still
    /// waiting for the driver to discard them are not counted.
    pub fn pending_count(&self) -> usize {
        self.lane
            .lock()
            .queue
            .iter()
            .filter(|task| !task.is_revoked())
            .count()
    }

    /// Tasks this lane has executed.
    pub fn executed_count(&self) -> u64 {
        self.executed.load(Ordering::Relaxed)
    }

    fn enqueue(&self, task: Arc<Task>) -> DispatchResult<()> {
        let start_driver = {
            let mut lane = self.lane.lock();
            lane.queue.push_back(task);
            !std::mem::replace(&mut lane.scheduled, true)
        };
        if start_driver {
            self.submit_driver().inspect_err(|e| self.abort(e))?;
        }
        Ok(())
    }

    /// Put one driver for this lane into the pool.
    fn submit_driver(&self) -> DispatchResult<()> {
        let lane = self
            .me
            .upgrade()
            .ok_or_else(|| DispatchError::Internal("serial dispatcher released".into()))?;
        let aborted = Weak::clone(&self.me);
        let driver = Arc::new(Task::new(Box::new(move || lane.drive()), self.priority));
        driver.add_task_listener(Arc::new(move |stage: TaskStage| {
            if stage != TaskStage::Revoked {
                return;
            }
            if let Some(lane) = aborted.upgrade() {
                lane.abort(&DispatchError::Shutdown);
            }
        }));
        self.executor.execute(driver)
    }

    /// Body of a driver: run queued tasks one at a time, handing the lane
    /// back to the pool between tasks.
    fn drive(&self) {
        loop {
            let task = {
                let mut lane = self.lane.lock();
                match lane.queue.pop_front() {
                    Some(task) => task,
                    None => {
                        lane.scheduled = false;
                        return;
                    }
                }
            };

            *self.running_on.lock() = Some(thread::current().id());
            if task.run() {
                self.executed.fetch_add(1, Ordering::Relaxed);
            }
            *self.running_on.lock() = None;

            {
                let mut lane = self.lane.lock();
                if lane.queue.is_empty() {
                    lane.scheduled = false;
                    return;
                }
            }

            match self.submit_driver() {
                Ok(()) => return,
                // Pool is saturated: keep the lane moving on this worker.
                Err(DispatchError::QueueFull) => {}
                Err(e) => {
                    self.abort(&e);
                    return;
                }
            }
        }
    }

    /// Revoke everything still queued on the lane.
    fn abort(&self, error: &DispatchError) {
        let drained: Vec<Arc<Task>> = {
            let mut lane = self.lane.lock();
            lane.scheduled = false;
            lane.queue.drain(..).collect()
        };
        if !drained.is_empty() {
            warn!(
                dispatcher = %self.name,
                revoked = drained.len(),
                error = %error,
                "Serial lane stopped, revoking queued tasks"
            );
        }
        for task in drained {
            let _ = task.revoke();
        }
    }

    fn on_lane_thread(&self) -> bool {
        *self.running_on.lock() == Some(thread::current().id())
    }
}

impl TaskDispatcher for SerialTaskDispatcher {
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

    fn sync_dispatch_task(&self, task: Arc<Task>) -> DispatchResult<()> {
        // Waiting on our own lane from inside it can never finish.
        if self.on_lane_thread() {
            let _ = task.revoke();
            return Err(DispatchError::Deadlock(self.name.clone()));
        }
        dispatch_and_wait(&task, |t| self.enqueue(t))
    }

    fn async_dispatch_task(&self, task: Arc<Task>) -> DispatchResult<()> {
        self.enqueue(task)
    }

    fn delay_dispatch_task(&self, task: Arc<Task>, delay: Duration) -> DispatchResult<()> {
        let lane = self
            .me
            .upgrade()
            .ok_or_else(|| DispatchError::Internal("serial dispatcher released".into()))?;
        let queued = Arc::clone(&task);
        let carrier = Arc::new(Task::new(
            Box::new(move || {
                if let Err(e) = lane.enqueue(Arc::clone(&queued)) {
                    warn!(dispatcher = %lane.name, error = %e, "Delayed task could not join its lane");
                    let _ = queued.revoke();
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
}

impl std::fmt::Debug for SerialTaskDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialTaskDispatcher")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("pending", &self.pending_count())
            .field("executed", &self.executed_count())
            .finish()
    }
}
