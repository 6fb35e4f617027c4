//! Barrier bookkeeping for the parallel dispatcher.
//!
//! Plain tasks flow straight to the executor until a barrier is queued. A
//! barrier waits for everything submitted before it to finish, runs alone,
//! and only then releases what was submitted after it.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::warn;

use crate::core::error::DispatchResult;
use crate::core::executor::TaskExecutor;
use crate::core::task::{Task, TaskListener, TaskStage};
use crate::util::serde::TaskId;

struct Entry {
    task: Arc<Task>,
    barrier: bool,
}

#[derive(Default)]
struct BarrierState {
    /// Sequences handed to the executor and not yet finished.
    in_flight: HashSet<TaskId>,
    /// Submissions held back behind a barrier, in submission order.
    pending: VecDeque<Entry>,
    barrier_active: bool,
}

impl BarrierState {
    /// Move every releasable entry from `pending` to `in_flight`.
    fn release(&mut self) -> Vec<Arc<Task>> {
        let mut ready = Vec::new();
        while !self.barrier_active {
            let Some(front) = self.pending.front() else {
                break;
            };
            if front.barrier && !self.in_flight.is_empty() {
                break;
            }
            let Some(entry) = self.pending.pop_front() else {
                break;
            };
            self.in_flight.insert(entry.task.sequence());
            self.barrier_active = entry.barrier;
            ready.push(entry.task);
        }
        ready
    }
}

pub(crate) struct BarrierHandler {
    executor: Arc<dyn TaskExecutor>,
    state: Mutex<BarrierState>,
}

impl BarrierHandler {
    pub fn new(executor: Arc<dyn TaskExecutor>) -> Arc<Self> {
        Arc::new(Self {
            executor,
            state: Mutex::new(BarrierState::default()),
        })
    }

    /// Submit `task`, holding it back if a barrier is queued or running.
    ///
    /// On error the task was not handed to the executor; the caller revokes
    /// it, which also clears it from the bookkeeping here.
    pub fn submit(self: &Arc<Self>, task: Arc<Task>, barrier: bool) -> DispatchResult<()> {
        let run_now = {
            let mut state = self.state.lock();
            let blocked = state.barrier_active
                || !state.pending.is_empty()
                || (barrier && !state.in_flight.is_empty());
            if blocked {
                state.pending.push_back(Entry {
                    task: Arc::clone(&task),
                    barrier,
                });
                false
            } else {
                state.in_flight.insert(task.sequence());
                state.barrier_active = barrier;
                true
            }
        };

        // Registered after the bookkeeping so a task that is already revoked
        // clears its own entry through the replayed stage.
        task.add_task_listener(Arc::new(BarrierListener {
            handler: Arc::downgrade(self),
            sequence: task.sequence(),
        }));

        if run_now && !task.is_revoked() {
            self.executor.execute(task)?;
        }
        Ok(())
    }

    /// Number of submissions held back behind a barrier.
    pub fn held_back(&self) -> usize {
        self.state.lock().pending.len()
    }

    fn on_finished(&self, sequence: TaskId) {
        let ready = {
            let mut state = self.state.lock();
            if state.in_flight.remove(&sequence) {
                // A running barrier is the only thing in flight.
                if state.in_flight.is_empty() {
                    state.barrier_active = false;
                }
            } else {
                state.pending.retain(|entry| entry.task.sequence() != sequence);
            }
            state.release()
        };

        for task in ready {
            if let Err(e) = self.executor.execute(Arc::clone(&task)) {
                warn!(task = task.sequence(), error = %e, "Releasing held-back task failed");
                let _ = task.revoke();
            }
        }
    }
}

struct BarrierListener {
    handler: Weak<BarrierHandler>,
    sequence: TaskId,
}

impl TaskListener for BarrierListener {
    fn on_changed(&self, stage: TaskStage) {
        if !stage.is_done() {
            return;
        }
        if let Some(handler) = self.handler.upgrade() {
            handler.on_finished(self.sequence);
        }
    }
}
