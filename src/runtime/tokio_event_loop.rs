//! Event loop backed by a tokio current-thread runtime.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use crossbeam_channel::bounded;
use parking_lot::Mutex;
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tracing::info;

use crate::core::error::{DispatchError, DispatchResult};
use crate::core::event_loop::EventLoop;
use crate::core::task::Runnable;

use super::run_guarded;

/// Event loop that drives a tokio current-thread runtime on a dedicated
/// thread. Delayed callbacks are tokio timers on that same runtime, so every
/// callback runs on the one loop thread.
pub struct TokioEventLoop {
    name: String,
    tx: Mutex<Option<UnboundedSender<Runnable>>>,
    handle: tokio::runtime::Handle,
    running: AtomicBool,
    thread_id: ThreadId,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl TokioEventLoop {
    /// Build the runtime on a new thread and start driving it.
    ///
    /// # Errors
    ///
    /// `DispatchError::Internal` if the thread or runtime cannot be created.
    pub fn start(name: impl Into<String>) -> DispatchResult<Arc<Self>> {
        let name = name.into();
        let (tx, mut rx) = unbounded_channel::<Runnable>();
        let (ready_tx, ready_rx) = bounded(1);
        let label = name.clone();

        let thread = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let rt = match tokio::runtime::Builder::new_current_thread()
                    .enable_time()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e.to_string()));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(rt.handle().clone()));
                rt.block_on(async move {
                    while let Some(work) = rx.recv().await {
                        run_guarded(work, &label);
                    }
                });
            })
            .map_err(|e| DispatchError::Internal(format!("failed to spawn tokio loop: {e}")))?;

        let handle = ready_rx
            .recv()
            .map_err(|_| DispatchError::Internal("tokio loop thread exited early".into()))?
            .map_err(|e| DispatchError::Internal(format!("failed to build tokio runtime: {e}")))?;

        info!(runner = %name, "Tokio event loop started");
        Ok(Arc::new(Self {
            thread_id: thread.thread().id(),
            name,
            tx: Mutex::new(Some(tx)),
            handle,
            running: AtomicBool::new(true),
            thread: Mutex::new(Some(thread)),
        }))
    }

    /// True when called from the loop thread.
    pub fn is_current_thread(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    /// Stop accepting work and join the loop thread once posted callbacks ran.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        drop(self.tx.lock().take());
        if self.is_current_thread() {
            return;
        }
        if let Some(thread) = self.thread.lock().take() {
            let _ = thread.join();
        }
        info!(runner = %self.name, "Tokio event loop stopped");
    }
}

impl EventLoop for TokioEventLoop {
    fn post(&self, work: Runnable) -> DispatchResult<()> {
        let tx = self.tx.lock();
        let Some(tx) = tx.as_ref() else {
            return Err(DispatchError::EventLoopUnavailable);
        };
        tx.send(work)
            .map_err(|_| DispatchError::EventLoopUnavailable)
    }

    fn post_sync(&self, work: Runnable) -> DispatchResult<()> {
        if self.is_current_thread() {
            run_guarded(work, &self.name);
            return Ok(());
        }
        let (done_tx, done_rx) = bounded(1);
        self.post(Box::new(move || {
            work();
            let _ = done_tx.send(());
        }))?;
        done_rx
            .recv()
            .map_err(|_| DispatchError::EventLoopUnavailable)
    }

    fn post_delayed(&self, work: Runnable, delay: Duration) -> DispatchResult<()> {
        if !self.is_running() {
            return Err(DispatchError::EventLoopUnavailable);
        }
        let label = self.name.clone();
        self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            run_guarded(work, &label);
        });
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

impl Drop for TokioEventLoop {
    fn drop(&mut self) {
        drop(self.tx.lock().take());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_delayed_runs_on_loop_thread() {
        let event_loop = TokioEventLoop::start("tokio-loop").unwrap();
        let (tx, rx) = bounded(1);
        let start = Instant::now();
        event_loop
            .post_delayed(
                Box::new(move || {
                    let _ = tx.send(thread::current().name().map(str::to_string));
                }),
                Duration::from_millis(30),
            )
            .unwrap();
        let name = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(name.as_deref(), Some("tokio-loop"));
        assert!(start.elapsed() >= Duration::from_millis(25));
        event_loop.stop();
    }
}
