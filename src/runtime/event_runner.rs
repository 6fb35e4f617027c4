//! Dedicated-thread event loop driven by a crossbeam channel.

use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::core::error::{DispatchError, DispatchResult};
use crate::core::event_loop::EventLoop;
use crate::core::task::Runnable;

use super::run_guarded;

enum LoopMessage {
    Run(Runnable),
    Delayed(DelayedWork),
}

struct DelayedWork {
    due: Instant,
    order: u64,
    work: Runnable,
}

impl PartialEq for DelayedWork {
    fn eq(&self, other: &Self) -> bool {
        self.order == other.order
    }
}

impl Eq for DelayedWork {}

impl PartialOrd for DelayedWork {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for DelayedWork {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.due
            .cmp(&other.due)
            .then_with(|| self.order.cmp(&other.order))
    }
}

/// Single-threaded event loop running on its own OS thread.
///
/// Callbacks run strictly in posting order; delayed callbacks run once due,
/// interleaved with the rest. Stopping the runner lets already-posted
/// callbacks finish and drops delayed ones that are not due yet.
pub struct EventRunner {
    name: String,
    tx: Mutex<Option<Sender<LoopMessage>>>,
    running: AtomicBool,
    thread_id: ThreadId,
    handle: Mutex<Option<JoinHandle<()>>>,
    next_order: AtomicU64,
}

impl EventRunner {
    /// Spawn the loop thread.
    ///
    /// # Errors
    ///
    /// `DispatchError::Internal` if the thread cannot be spawned.
    pub fn start(name: impl Into<String>) -> DispatchResult<Arc<Self>> {
        let name = name.into();
        let (tx, rx) = unbounded();
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || loop_thread(&rx))
            .map_err(|e| DispatchError::Internal(format!("failed to spawn event runner: {e}")))?;

        info!(runner = %name, "Event runner started");
        Ok(Arc::new(Self {
            thread_id: handle.thread().id(),
            name,
            tx: Mutex::new(Some(tx)),
            running: AtomicBool::new(true),
            handle: Mutex::new(Some(handle)),
            next_order: AtomicU64::new(0),
        }))
    }

    /// Runner name (also the thread name).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// True when called from the loop thread.
    pub fn is_current_thread(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    /// Stop accepting work and wait for the loop thread to finish what was
    /// already posted. Called from the loop thread it only stops accepting.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        drop(self.tx.lock().take());
        if self.is_current_thread() {
            return;
        }
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
        info!(runner = %self.name, "Event runner stopped");
    }

    fn send(&self, message: LoopMessage) -> DispatchResult<()> {
        let tx = self.tx.lock();
        let Some(tx) = tx.as_ref() else {
            return Err(DispatchError::EventLoopUnavailable);
        };
        tx.send(message)
            .map_err(|_| DispatchError::EventLoopUnavailable)
    }
}

impl EventLoop for EventRunner {
    fn post(&self, work: Runnable) -> DispatchResult<()> {
        self.send(LoopMessage::Run(work))
    }

    fn post_sync(&self, work: Runnable) -> DispatchResult<()> {
        if self.is_current_thread() {
            run_guarded(work, &self.name);
            return Ok(());
        }
        let (done_tx, done_rx) = bounded(1);
        self.send(LoopMessage::Run(Box::new(move || {
            work();
            let _ = done_tx.send(());
        })))?;
        // A dropped sender means the loop exited without running the work.
        done_rx
            .recv()
            .map_err(|_| DispatchError::EventLoopUnavailable)
    }

    fn post_delayed(&self, work: Runnable, delay: Duration) -> DispatchResult<()> {
        if delay.is_zero() {
            return self.post(work);
        }
        let Some(due) = Instant::now().checked_add(delay) else {
            return Err(DispatchError::invalid("delay exceeds the representable deadline"));
        };
        self.send(LoopMessage::Delayed(DelayedWork {
            due,
            order: self.next_order.fetch_add(1, Ordering::Relaxed),
            work,
        }))
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

impl Drop for EventRunner {
    fn drop(&mut self) {
        // Closing the channel ends the loop; no join, we may be on that thread.
        drop(self.tx.lock().take());
    }
}

fn loop_thread(rx: &Receiver<LoopMessage>) {
    let label = thread::current().name().unwrap_or("event-runner").to_string();
    let mut delayed: BinaryHeap<Reverse<DelayedWork>> = BinaryHeap::new();

    loop {
        let now = Instant::now();
        while let Some(Reverse(next)) = delayed.peek() {
            if next.due > now {
                break;
            }
            if let Some(Reverse(due)) = delayed.pop() {
                run_guarded(due.work, &label);
            }
        }

        let received = match delayed.peek() {
            Some(Reverse(next)) => rx.recv_timeout(next.due.saturating_duration_since(Instant::now())),
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        match received {
            Ok(LoopMessage::Run(work)) => run_guarded(work, &label),
            Ok(LoopMessage::Delayed(work)) => delayed.push(Reverse(work)),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    if !delayed.is_empty() {
        debug!(runner = %label, dropped = delayed.len(), "Dropping delayed callbacks on stop");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_post_runs_on_loop_thread() {
        let runner = EventRunner::start("test-runner").unwrap();
        let (tx, rx) = bounded(1);
        runner
            .post(Box::new(move || {
                let _ = tx.send(thread::current().name().map(str::to_string));
            }))
            .unwrap();
        let name = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(name.as_deref(), Some("test-runner"));
        runner.stop();
    }

    #[test]
    fn test_post_sync_blocks_until_run() {
        let runner = EventRunner::start("sync-runner").unwrap();
        let flag = Arc::new(AtomicBool::new(false));
        let inner = Arc::clone(&flag);
        runner
            .post_sync(Box::new(move || {
                thread::sleep(Duration::from_millis(20));
                inner.store(true, Ordering::SeqCst);
            }))
            .unwrap();
        assert!(flag.load(Ordering::SeqCst));
        runner.stop();
    }

    #[test]
    fn test_post_after_stop_fails() {
        let runner = EventRunner::start("stopped-runner").unwrap();
        runner.stop();
        assert!(!runner.is_running());
        assert_eq!(
            runner.post(Box::new(|| {})),
            Err(DispatchError::EventLoopUnavailable)
        );
    }
}
