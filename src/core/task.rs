//! The schedulable unit and its revocation state machine.
//!
//! A [`Task`] wraps one unit of work together with its priority, a trace
//! sequence number, an atomic state word and an ordered set of listeners.
//! Execution and revocation race through a single compare-and-swap on the
//! state word, so exactly one of them ever wins:
//!
//! ```text
//! NOT_STARTED ──run()──▶ EXECUTED
//!      │
//!      └──revoke()──▶ REVOKED
//! ```

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::dispatcher::TaskDispatcher;
use crate::util::serde::{TaskId, TaskPriority};

/// A zero-argument unit of work, invoked at most once.
pub type Runnable = Box<dyn FnOnce() + Send + 'static>;

const NOT_STARTED: u8 = 0;
const EXECUTED: u8 = 1;
const REVOKED: u8 = 1 << 1;

static NEXT_SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// Lifecycle points reported to [`TaskListener`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStage {
    /// The task won the run race and its work is about to be invoked.
    BeforeExecute,
    /// The work returned (or panicked and was contained).
    AfterExecute,
    /// The task was revoked before it started.
    Revoked,
}

impl TaskStage {
    /// True for the stages after which the task is finished.
    #[must_use]
    pub const fn is_done(self) -> bool {
        matches!(self, Self::AfterExecute | Self::Revoked)
    }
}

/// Outcome of [`Task::revoke`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevokeResult {
    /// Execution already claimed the task.
    Fail,
    /// The task moved to the revoked state.
    Success,
    /// An earlier revoke already won.
    AlreadyRevoked,
}

/// Observer of a task's lifecycle.
///
/// Listeners must not rely on panicking to signal anything: a panic is caught,
/// logged and swallowed, and the remaining listeners still run.
pub trait TaskListener: Send + Sync {
    /// Called at each lifecycle stage, on the thread that caused it.
    fn on_changed(&self, stage: TaskStage);
}

impl<F> TaskListener for F
where
    F: Fn(TaskStage) + Send + Sync,
{
    fn on_changed(&self, stage: TaskStage) {
        self(stage);
    }
}

/// Extension point that may take over scheduling of a task.
pub trait TaskInterceptor: Send + Sync {
    /// Return `true` if the interceptor took ownership of `task`; the
    /// dispatcher then does not submit it. An owned task must eventually be
    /// run or revoked, or sync callers and groups waiting on it never return.
    fn intercept(&self, task: &Arc<Task>) -> bool;
}

struct ListenerSet {
    listeners: Vec<Arc<dyn TaskListener>>,
    /// Set once the task finished; late listeners are replayed this stage.
    terminal: Option<TaskStage>,
}

/// A wrapped unit of work with priority, ordering metadata and revocation.
pub struct Task {
    runnable: Mutex<Option<Runnable>>,
    priority: TaskPriority,
    sequence: TaskId,
    state: AtomicU8,
    dispatcher: Option<Weak<dyn TaskDispatcher>>,
    listeners: Mutex<ListenerSet>,
}

impl Task {
    /// Wrap `work` as a task that is not bound to any dispatcher.
    pub fn new(work: Runnable, priority: TaskPriority) -> Self {
        Self::build(work, priority, None)
    }

    /// Wrap `work` as a task owned (weakly) by `dispatcher`.
    pub fn with_dispatcher(
        work: Runnable,
        priority: TaskPriority,
        dispatcher: Weak<dyn TaskDispatcher>,
    ) -> Self {
        Self::build(work, priority, Some(dispatcher))
    }

    fn build(
        work: Runnable,
        priority: TaskPriority,
        dispatcher: Option<Weak<dyn TaskDispatcher>>,
    ) -> Self {
        Self {
            runnable: Mutex::new(Some(work)),
            priority,
            sequence: NEXT_SEQUENCE.fetch_add(1, Ordering::Relaxed),
            state: AtomicU8::new(NOT_STARTED),
            dispatcher,
            listeners: Mutex::new(ListenerSet {
                listeners: Vec::new(),
                terminal: None,
            }),
        }
    }

    /// Priority the task was created with.
    #[must_use]
    pub const fn priority(&self) -> TaskPriority {
        self.priority
    }

    /// Monotonic sequence number assigned at construction.
    #[must_use]
    pub const fn sequence(&self) -> TaskId {
        self.sequence
    }

    /// True once execution claimed the task.
    pub fn is_executed(&self) -> bool {
        self.state.load(Ordering::Acquire) & EXECUTED != 0
    }

    /// True once the task was revoked.
    pub fn is_revoked(&self) -> bool {
        self.state.load(Ordering::Acquire) & REVOKED != 0
    }

    /// True once the task reached a terminal stage and its listeners ran.
    pub fn is_finished(&self) -> bool {
        self.listeners.lock().terminal.is_some()
    }

    /// The owning dispatcher, if it is still alive.
    pub fn dispatcher(&self) -> Option<Arc<dyn TaskDispatcher>> {
        self.dispatcher.as_ref().and_then(Weak::upgrade)
    }

    /// Execute the task on the calling thread.
    ///
    /// Returns `false` without running anything if the task was revoked first.
    /// A panic inside the work is contained and logged; the after-execute
    /// listeners still fire.
    pub fn run(&self) -> bool {
        if self
            .state
            .compare_exchange(NOT_STARTED, EXECUTED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(task_seq = self.sequence, "Skipping task that is no longer runnable");
            return false;
        }

        self.before_task_execute();

        let work = self.runnable.lock().take();
        if let Some(work) = work {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(work)) {
                error!(
                    task_seq = self.sequence,
                    panic = %panic_message(payload.as_ref()),
                    "Task panicked during execution"
                );
            }
        }

        self.after_task_execute();
        true
    }

    /// Try to cancel the task before it starts. Callable from any thread.
    pub fn revoke(&self) -> RevokeResult {
        match self
            .state
            .compare_exchange(NOT_STARTED, REVOKED, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                self.on_task_canceled();
                RevokeResult::Success
            }
            Err(current) if current & REVOKED != 0 => RevokeResult::AlreadyRevoked,
            Err(_) => RevokeResult::Fail,
        }
    }

    /// Register a lifecycle listener.
    ///
    /// If the task already finished, the listener is invoked immediately with
    /// the terminal stage instead of being stored.
    pub fn add_task_listener(&self, listener: Arc<dyn TaskListener>) {
        let terminal = {
            let mut set = self.listeners.lock();
            if set.terminal.is_none() {
                set.listeners.push(listener);
                return;
            }
            set.terminal
        };
        if let Some(stage) = terminal {
            notify_listener(listener.as_ref(), stage, self.sequence);
        }
    }

    fn before_task_execute(&self) {
        self.fire(TaskStage::BeforeExecute);
    }

    fn after_task_execute(&self) {
        self.fire(TaskStage::AfterExecute);
    }

    fn on_task_canceled(&self) {
        // Release whatever the work captured before telling anyone.
        let work = self.runnable.lock().take();
        drop(work);
        debug!(task_seq = self.sequence, "Task revoked");
        self.fire(TaskStage::Revoked);
    }

    fn fire(&self, stage: TaskStage) {
        let listeners = {
            let mut set = self.listeners.lock();
            if stage.is_done() {
                set.terminal = Some(stage);
                std::mem::take(&mut set.listeners)
            } else {
                set.listeners.clone()
            }
        };
        for listener in &listeners {
            notify_listener(listener.as_ref(), stage, self.sequence);
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("sequence", &self.sequence)
            .field("priority", &self.priority)
            .field("executed", &self.is_executed())
            .field("revoked", &self.is_revoked())
            .finish_non_exhaustive()
    }
}

fn notify_listener(listener: &dyn TaskListener, stage: TaskStage, sequence: TaskId) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| listener.on_changed(stage))) {
        warn!(
            task_seq = sequence,
            ?stage,
            panic = %panic_message(payload.as_ref()),
            "Task listener panicked"
        );
    }
}

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}
