//! Completion barrier over a set of associated tasks.
//!
//! A [`Group`] counts outstanding tasks. Callers [`associate`](Group::associate)
//! before submitting each task; the dispatcher signals
//! [`notify_task_done`](Group::notify_task_done) once per task, whether it ran
//! or was revoked. When the count drops to zero every queued notification runs,
//! in FIFO order, on the thread that delivered the last signal.
//!
//! A notification added while the count is already zero runs immediately, or
//! right after the notifications still being drained. Tasks associated after
//! that point are not waited for by it.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, warn};

use crate::core::error::{DispatchError, DispatchResult};
use crate::core::task::{panic_message, Runnable};

/// Default cap on queued notifications per group.
pub const DEFAULT_MAX_NOTIFICATIONS: usize = 1000;

#[derive(Default)]
struct Notifications {
    queue: VecDeque<Runnable>,
    /// Some thread is running drained callbacks; later ones queue behind it.
    draining: bool,
}

/// Join/notify primitive tracking a set of outstanding tasks.
pub struct Group {
    count: AtomicUsize,
    /// The count is re-read under this lock so an add and a drain never miss
    /// each other.
    notifications: Mutex<Notifications>,
    max_notifications: usize,
    wait_lock: Mutex<()>,
    all_done: Condvar,
}

impl Group {
    /// Create an empty group with the default notification cap.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_notifications(DEFAULT_MAX_NOTIFICATIONS)
    }

    /// Create an empty group that queues at most `max_notifications` callbacks.
    #[must_use]
    pub fn with_max_notifications(max_notifications: usize) -> Self {
        Self {
            count: AtomicUsize::new(0),
            notifications: Mutex::new(Notifications::default()),
            max_notifications,
            wait_lock: Mutex::new(()),
            all_done: Condvar::new(),
        }
    }

    /// Number of associated tasks that have not finished yet.
    pub fn outstanding(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Number of notifications waiting for the count to reach zero.
    pub fn pending_notifications(&self) -> usize {
        self.notifications.lock().queue.len()
    }

    /// Register one more outstanding task. Call before submitting it.
    pub fn associate(&self) {
        self.count.fetch_add(1, Ordering::AcqRel);
    }

    /// Signal that one associated task finished (ran or was revoked).
    pub fn notify_task_done(&self) {
        let previous = self
            .count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| c.checked_sub(1));
        match previous {
            Err(_) => {
                warn!("Group task-done signal without a matching associate; ignored");
            }
            Ok(1) => self.on_all_tasks_done(),
            Ok(_) => {}
        }
    }

    /// Queue `callback` until the count reaches zero, or run it right away if
    /// it already is zero and no earlier notification is still waiting to run.
    ///
    /// # Errors
    ///
    /// [`DispatchError::NotificationsFull`] when the queue is at its cap.
    pub fn add_notification(&self, callback: Runnable) -> DispatchResult<()> {
        let take_over_drain = {
            let mut state = self.notifications.lock();
            let drained = self.count.load(Ordering::Acquire) == 0;
            if drained && !state.draining && state.queue.is_empty() {
                drop(state);
                run_notification(callback);
                return Ok(());
            }
            if state.queue.len() >= self.max_notifications {
                return Err(DispatchError::NotificationsFull(self.max_notifications));
            }
            state.queue.push_back(callback);
            // Count hit zero but its drain has not started yet: run it here.
            let take_over = drained && !state.draining;
            state.draining |= take_over;
            take_over
        };
        if take_over_drain {
            self.drain_notifications();
        }
        Ok(())
    }

    /// Block until every associated task finished or `timeout` elapsed.
    ///
    /// # Errors
    ///
    /// - [`DispatchError::InvalidArgument`] for a zero timeout
    /// - [`DispatchError::Timeout`] if tasks are still outstanding at the deadline
    pub fn await_all_tasks(&self, timeout: Duration) -> DispatchResult<()> {
        if timeout.is_zero() {
            return Err(DispatchError::invalid("group wait timeout must be positive"));
        }
        if self.outstanding() == 0 {
            return Ok(());
        }

        let mut guard = self.wait_lock.lock();
        // A timeout past the representable range waits without a deadline.
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            while self.outstanding() != 0 {
                self.all_done.wait(&mut guard);
            }
            return Ok(());
        };
        while self.outstanding() != 0 {
            if self.all_done.wait_until(&mut guard, deadline).timed_out() {
                return if self.outstanding() == 0 {
                    Ok(())
                } else {
                    Err(DispatchError::Timeout)
                };
            }
        }
        Ok(())
    }

    /// Async variant of [`await_all_tasks`](Self::await_all_tasks); the wait
    /// runs on tokio's blocking pool.
    ///
    /// # Errors
    ///
    /// Same as [`await_all_tasks`](Self::await_all_tasks), plus
    /// [`DispatchError::Internal`] if the blocking task is cancelled.
    #[cfg(feature = "tokio-runtime")]
    pub async fn await_all_tasks_async(
        self: &std::sync::Arc<Self>,
        timeout: Duration,
    ) -> DispatchResult<()> {
        let group = std::sync::Arc::clone(self);
        tokio::task::spawn_blocking(move || group.await_all_tasks(timeout))
            .await
            .map_err(|e| DispatchError::Internal(format!("group wait task failed: {e}")))?
    }

    fn on_all_tasks_done(&self) {
        {
            let _guard = self.wait_lock.lock();
            self.all_done.notify_all();
        }

        {
            let mut state = self.notifications.lock();
            // Re-associated before we got here (the next zero crossing
            // drains), or another thread is already draining.
            if self.count.load(Ordering::Acquire) != 0 || state.draining || state.queue.is_empty() {
                return;
            }
            state.draining = true;
        }
        self.drain_notifications();
    }

    /// Run queued notifications in FIFO order until the queue is empty or the
    /// group gained outstanding tasks again. Caller has set `draining`.
    fn drain_notifications(&self) {
        loop {
            let batch: Vec<Runnable> = {
                let mut state = self.notifications.lock();
                if state.queue.is_empty() || self.count.load(Ordering::Acquire) != 0 {
                    state.draining = false;
                    return;
                }
                state.queue.drain(..).collect()
            };
            debug!(count = batch.len(), "Group drained, running notifications");
            for callback in batch {
                run_notification(callback);
            }
        }
    }
}

impl Default for Group {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Group {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Group")
            .field("outstanding", &self.outstanding())
            .field("max_notifications", &self.max_notifications)
            .finish_non_exhaustive()
    }
}

fn run_notification(callback: Runnable) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(callback)) {
        error!(panic = %panic_message(payload.as_ref()), "Group notification panicked");
    }
}
