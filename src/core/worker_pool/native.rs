//! Native implementation of `WorkerPool` using OS threads.
//!
//! # Design Principles
//!
//! - **No polling**: workers block on a `parking_lot` condvar, the guard thread
//!   blocks on a crossbeam channel with a deadline
//! - **Priority heap**: O(log n) enqueue/dequeue, FIFO within a priority class
//! - **Clean shutdown**: dropping the delay sender stops the guard; the ready
//!   queue lifecycle flag stops the workers

use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use crate::config::WorkerPoolConfig;
use crate::core::error::{DispatchError, DispatchResult};
use crate::core::executor::TaskExecutor;
use crate::core::task::Task;
use crate::util::serde::TaskPriority;

use super::{PoolCounters, PoolStats, WorkerThreadInfo};

/// Ready-queue lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    /// Accepting and executing tasks.
    Running,
    /// Executing what is queued (and what queued tasks enqueue), then exiting.
    Draining,
    /// Nothing else starts.
    Stopped,
}

/// Heap entry ordered by priority (highest first), then FIFO.
struct ReadyTask {
    priority: TaskPriority,
    order: u64,
    task: Arc<Task>,
}

impl PartialEq for ReadyTask {
    fn eq(&self, other: &Self) -> bool {
        self.order == other.order
    }
}

impl Eq for ReadyTask {}

impl PartialOrd for ReadyTask {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for ReadyTask {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Earlier order wins within a priority (reversed for max-heap).
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.order.cmp(&self.order))
    }
}

/// Task parked on the guard thread until `due`.
struct DelayedTask {
    due: Instant,
    order: u64,
    task: Arc<Task>,
}

impl PartialEq for DelayedTask {
    fn eq(&self, other: &Self) -> bool {
        self.order == other.order
    }
}

impl Eq for DelayedTask {}

impl PartialOrd for DelayedTask {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for DelayedTask {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.due
            .cmp(&other.due)
            .then_with(|| self.order.cmp(&other.order))
    }
}

struct ReadyState {
    heap: BinaryHeap<ReadyTask>,
    lifecycle: Lifecycle,
}

struct WorkerSlot {
    name: String,
    executed: AtomicU64,
    busy: AtomicBool,
}

/// State shared between the pool handle, its workers and the guard.
struct Shared {
    ready: Mutex<ReadyState>,
    available: Condvar,
    counters: PoolCounters,
    slots: Vec<WorkerSlot>,
    next_order: AtomicU64,
    max_queue_depth: usize,
}

impl Shared {
    fn push(&self, task: Arc<Task>) -> DispatchResult<()> {
        {
            let mut state = self.ready.lock();
            if state.lifecycle == Lifecycle::Stopped {
                return Err(DispatchError::Shutdown);
            }
            if state.heap.len() >= self.max_queue_depth {
                return Err(DispatchError::QueueFull);
            }
            state.heap.push(ReadyTask {
                priority: task.priority(),
                order: self.next_order.fetch_add(1, Ordering::Relaxed),
                task,
            });
        }
        self.available.notify_one();
        Ok(())
    }

    /// Block until a task is available; `None` tells the worker to exit.
    fn next_task(&self) -> Option<Arc<Task>> {
        let mut state = self.ready.lock();
        loop {
            match state.lifecycle {
                Lifecycle::Stopped => return None,
                Lifecycle::Draining if state.heap.is_empty() => return None,
                _ => {}
            }
            if let Some(ready) = state.heap.pop() {
                return Some(ready.task);
            }
            self.available.wait(&mut state);
        }
    }

    /// Switch lifecycle; returns whatever was still queued when stopping.
    fn set_lifecycle(&self, lifecycle: Lifecycle) -> Vec<Arc<Task>> {
        let leftovers = {
            let mut state = self.ready.lock();
            state.lifecycle = lifecycle;
            if lifecycle == Lifecycle::Stopped {
                state.heap.drain().map(|ready| ready.task).collect()
            } else {
                Vec::new()
            }
        };
        self.available.notify_all();
        leftovers
    }

    fn queued(&self) -> usize {
        self.ready.lock().heap.len()
    }
}

/// Worker pool with dedicated OS threads.
///
/// # Design
///
/// - One ready queue shared by all workers, ordered by [`TaskPriority`]
/// - One guard thread owning delayed tasks
/// - Atomic counters for telemetry; no lock is held while a task runs
pub struct WorkerPool {
    /// Pool configuration.
    config: WorkerPoolConfig,

    /// Queue, counters and per-worker slots.
    shared: Arc<Shared>,

    /// Delayed-task sender (to the guard). Option allows clean shutdown by dropping.
    delay_tx: Mutex<Option<Sender<DelayedTask>>>,

    /// Set once termination started.
    terminated: AtomicBool,

    /// Worker thread handles.
    workers: Mutex<Vec<JoinHandle<()>>>,

    /// Guard thread handle.
    guard: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Create a pool and start its worker and guard threads.
    ///
    /// # Errors
    ///
    /// - `DispatchError::InvalidConfig` if the configuration is invalid
    /// - `DispatchError::Internal` if a thread cannot be spawned
    pub fn new(config: WorkerPoolConfig) -> DispatchResult<Self> {
        config.validate().map_err(DispatchError::InvalidConfig)?;

        let slots = (0..config.worker_count)
            .map(|worker_id| WorkerSlot {
                name: format!("{}-{worker_id}", config.thread_name_prefix),
                executed: AtomicU64::new(0),
                busy: AtomicBool::new(false),
            })
            .collect();
        let shared = Arc::new(Shared {
            ready: Mutex::new(ReadyState {
                heap: BinaryHeap::with_capacity(config.max_queue_depth.min(1024)),
                lifecycle: Lifecycle::Running,
            }),
            available: Condvar::new(),
            counters: PoolCounters::default(),
            slots,
            next_order: AtomicU64::new(0),
            max_queue_depth: config.max_queue_depth,
        });
        let (delay_tx, delay_rx) = unbounded();

        let pool = Self {
            workers: Mutex::new(Vec::with_capacity(config.worker_count)),
            config,
            shared,
            delay_tx: Mutex::new(Some(delay_tx)),
            terminated: AtomicBool::new(false),
            guard: Mutex::new(None),
        };

        for worker_id in 0..pool.config.worker_count {
            match spawn_worker(worker_id, Arc::clone(&pool.shared), pool.config.thread_stack_size) {
                Ok(handle) => pool.workers.lock().push(handle),
                Err(e) => {
                    pool.terminate(true);
                    return Err(e);
                }
            }
        }

        let guard_name = format!("{}-guard", pool.config.thread_name_prefix);
        match spawn_guard(guard_name, delay_rx, Arc::clone(&pool.shared)) {
            Ok(handle) => *pool.guard.lock() = Some(handle),
            Err(e) => {
                pool.terminate(true);
                return Err(e);
            }
        }

        info!(
            worker_count = pool.config.worker_count,
            max_queue_depth = pool.config.max_queue_depth,
            "WorkerPool initialized with dedicated OS threads"
        );
        Ok(pool)
    }

    /// Pool configuration.
    #[must_use]
    pub const fn config(&self) -> &WorkerPoolConfig {
        &self.config
    }

    fn revoke_all(tasks: Vec<Arc<Task>>, reason: &str) {
        if tasks.is_empty() {
            return;
        }
        warn!(count = tasks.len(), reason, "Revoking queued tasks");
        for task in tasks {
            let _ = task.revoke();
        }
    }
}

impl TaskExecutor for WorkerPool {
    fn execute(&self, task: Arc<Task>) -> DispatchResult<()> {
        let task_seq = task.sequence();
        match self.shared.push(task) {
            Ok(()) => {
                self.shared.counters.submitted_tasks.fetch_add(1, Ordering::Relaxed);
                debug!(task_seq, "Task submitted to worker pool");
                Ok(())
            }
            Err(DispatchError::QueueFull) => {
                warn!(task_seq, "Worker pool queue is full");
                Err(DispatchError::QueueFull)
            }
            Err(e) => Err(e),
        }
    }

    fn delay_execute(&self, task: Arc<Task>, delay: Duration) -> DispatchResult<()> {
        if delay.is_zero() {
            return self.execute(task);
        }

        let Some(due) = Instant::now().checked_add(delay) else {
            return Err(DispatchError::invalid("delay exceeds the representable deadline"));
        };

        let delay_tx = self.delay_tx.lock();
        let Some(tx) = delay_tx.as_ref() else {
            return Err(DispatchError::Shutdown);
        };

        let task_seq = task.sequence();
        let delayed = DelayedTask {
            due,
            order: self.shared.next_order.fetch_add(1, Ordering::Relaxed),
            task,
        };
        self.shared.counters.delayed_tasks.fetch_add(1, Ordering::Relaxed);
        if tx.send(delayed).is_err() {
            self.shared.counters.delayed_tasks.fetch_sub(1, Ordering::Relaxed);
            return Err(DispatchError::Shutdown);
        }
        self.shared.counters.submitted_tasks.fetch_add(1, Ordering::Relaxed);
        debug!(task_seq, delay_ms = delay.as_millis() as u64, "Delayed task submitted");
        Ok(())
    }

    fn pending_count(&self) -> usize {
        self.shared.queued() + self.shared.counters.delayed_tasks.load(Ordering::Relaxed)
    }

    fn task_counter(&self) -> u64 {
        self.shared.counters.submitted_tasks.load(Ordering::Relaxed)
    }

    fn worker_threads_info(&self) -> Vec<WorkerThreadInfo> {
        self.shared
            .slots
            .iter()
            .enumerate()
            .map(|(worker_id, slot)| WorkerThreadInfo {
                worker_id,
                name: slot.name.clone(),
                executed_tasks: slot.executed.load(Ordering::Relaxed),
                busy: slot.busy.load(Ordering::Relaxed),
            })
            .collect()
    }

    fn stats(&self) -> PoolStats {
        self.shared
            .counters
            .snapshot(self.config.worker_count, self.shared.queued())
    }

    /// Terminate the pool.
    ///
    /// Stops the guard first (revoking delayed tasks that are not due), then
    /// either drains (`force == false`) or revokes (`force == true`) the ready
    /// queue, and joins every thread with the configured timeout. Threads that
    /// do not exit in time are detached.
    fn terminate(&self, force: bool) {
        if self.terminated.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(force, "Terminating worker pool");

        let timeout = self.config.shutdown_timeout();
        drop(self.delay_tx.lock().take());
        if let Some(guard) = self.guard.lock().take() {
            join_with_timeout(guard, timeout);
        }

        if force {
            Self::revoke_all(self.shared.set_lifecycle(Lifecycle::Stopped), "forced termination");
        } else {
            self.shared.set_lifecycle(Lifecycle::Draining);
        }

        let workers = std::mem::take(&mut *self.workers.lock());
        let worker_count = workers.len();
        for worker in workers {
            join_with_timeout(worker, timeout);
        }

        Self::revoke_all(self.shared.set_lifecycle(Lifecycle::Stopped), "left after termination");
        info!(worker_count, "Worker pool shut down complete");
    }

    fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Signal shutdown but don't join: a drop may happen on a worker thread.
        if !self.terminated.swap(true, Ordering::AcqRel) {
            drop(self.delay_tx.lock().take());
            Self::revoke_all(self.shared.set_lifecycle(Lifecycle::Stopped), "pool dropped");
            debug!("WorkerPool dropped without explicit terminate - workers will be detached");
        }
    }
}

/// Join `handle`, giving up after `timeout`. Never joins the calling thread.
fn join_with_timeout(handle: JoinHandle<()>, timeout: Duration) {
    let name = handle.thread().name().unwrap_or("unnamed").to_string();
    if handle.thread().id() == thread::current().id() {
        debug!(thread = %name, "Skipping join of the calling thread");
        return;
    }

    let (tx, rx) = bounded(1);
    let joiner = thread::spawn(move || {
        let _ = tx.send(handle.join().is_ok());
    });

    match rx.recv_timeout(timeout) {
        Ok(true) => debug!(thread = %name, "Thread joined successfully"),
        Ok(false) => warn!(thread = %name, "Thread panicked"),
        Err(_) => {
            warn!(thread = %name, "Thread did not exit within timeout - detaching");
            return;
        }
    }
    let _ = joiner.join();
}

/// Spawn a worker thread.
fn spawn_worker(
    worker_id: usize,
    shared: Arc<Shared>,
    stack_size: usize,
) -> DispatchResult<JoinHandle<()>> {
    let name = shared.slots[worker_id].name.clone();
    thread::Builder::new()
        .name(name)
        .stack_size(stack_size)
        .spawn(move || worker_loop(worker_id, &shared))
        .map_err(|e| DispatchError::Internal(format!("failed to spawn worker thread: {e}")))
}

fn worker_loop(worker_id: usize, shared: &Shared) {
    debug!(worker_id, "Worker thread started");
    let slot = &shared.slots[worker_id];

    // Blocking wait on the condvar; `None` means stop.
    while let Some(task) = shared.next_task() {
        slot.busy.store(true, Ordering::Relaxed);
        shared.counters.active_tasks.fetch_add(1, Ordering::Relaxed);

        let task_seq = task.sequence();
        // `Task::run` contains panics from the work and its listeners.
        let ran = task.run();

        shared.counters.active_tasks.fetch_sub(1, Ordering::Relaxed);
        if ran {
            shared.counters.completed_tasks.fetch_add(1, Ordering::Relaxed);
            slot.executed.fetch_add(1, Ordering::Relaxed);
            debug!(worker_id, task_seq, "Worker completed task");
        } else {
            shared.counters.skipped_tasks.fetch_add(1, Ordering::Relaxed);
        }
        slot.busy.store(false, Ordering::Relaxed);
    }

    debug!(worker_id, "Worker thread exiting");
}

/// Spawn the guard thread that releases delayed tasks when they are due.
fn spawn_guard(
    name: String,
    delay_rx: Receiver<DelayedTask>,
    shared: Arc<Shared>,
) -> DispatchResult<JoinHandle<()>> {
    thread::Builder::new()
        .name(name)
        .spawn(move || guard_loop(&delay_rx, &shared))
        .map_err(|e| DispatchError::Internal(format!("failed to spawn guard thread: {e}")))
}

fn guard_loop(delay_rx: &Receiver<DelayedTask>, shared: &Shared) {
    debug!("Guard thread started");
    let mut delayed: BinaryHeap<Reverse<DelayedTask>> = BinaryHeap::new();

    loop {
        let now = Instant::now();
        while let Some(Reverse(next)) = delayed.peek() {
            if next.due > now {
                break;
            }
            let Some(Reverse(due)) = delayed.pop() else {
                break;
            };
            shared.counters.delayed_tasks.fetch_sub(1, Ordering::Relaxed);
            if let Err(e) = shared.push(Arc::clone(&due.task)) {
                warn!(task_seq = due.task.sequence(), error = %e, "Failed to release delayed task");
                let _ = due.task.revoke();
            }
        }

        let received = match delayed.peek() {
            Some(Reverse(next)) => {
                delay_rx.recv_timeout(next.due.saturating_duration_since(Instant::now()))
            }
            None => delay_rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };

        match received {
            Ok(task) => delayed.push(Reverse(task)),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    let leftovers: Vec<Arc<Task>> = delayed
        .into_iter()
        .map(|Reverse(d)| d.task)
        .chain(delay_rx.try_iter().map(|d| d.task))
        .collect();
    shared
        .counters
        .delayed_tasks
        .fetch_sub(leftovers.len(), Ordering::Relaxed);
    WorkerPool::revoke_all(leftovers, "delayed tasks not yet due");
    debug!("Guard thread exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn small_pool(workers: usize) -> WorkerPool {
        WorkerPool::new(
            WorkerPoolConfig::new()
                .with_worker_count(workers)
                .with_max_queue_depth(64),
        )
        .unwrap()
    }

    fn task(priority: TaskPriority, work: impl FnOnce() + Send + 'static) -> Arc<Task> {
        Arc::new(Task::new(Box::new(work), priority))
    }

    #[test]
    fn test_ready_task_ordering() {
        let mut heap = BinaryHeap::new();
        for (order, priority) in [
            TaskPriority::Low,
            TaskPriority::High,
            TaskPriority::Default,
            TaskPriority::High,
        ]
        .into_iter()
        .enumerate()
        {
            heap.push(ReadyTask {
                priority,
                order: order as u64,
                task: task(priority, || {}),
            });
        }
        let popped: Vec<u64> = std::iter::from_fn(|| heap.pop().map(|r| r.order)).collect();
        assert_eq!(popped, vec![1, 3, 2, 0]);
    }

    #[test]
    fn test_execute_runs_task() {
        let pool = small_pool(2);
        let (tx, rx) = bounded(1);
        pool.execute(task(TaskPriority::Default, move || {
            let _ = tx.send(thread::current().name().map(str::to_string));
        }))
        .unwrap();

        let name = rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();
        assert!(name.starts_with("dispatch-worker-"));
        pool.terminate(false);
        assert_eq!(pool.task_counter(), 1);
    }

    #[test]
    fn test_delay_execute_waits() {
        let pool = small_pool(1);
        let (tx, rx) = bounded(1);
        let start = Instant::now();
        pool.delay_execute(
            task(TaskPriority::Default, move || {
                let _ = tx.send(Instant::now());
            }),
            Duration::from_millis(40),
        )
        .unwrap();
        assert_eq!(pool.pending_count(), 1);

        let ran_at = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(ran_at.duration_since(start) >= Duration::from_millis(35));
        pool.terminate(false);
    }

    #[test]
    fn test_panicking_task_keeps_worker_alive() {
        let pool = small_pool(1);
        pool.execute(task(TaskPriority::High, || panic!("worker must survive")))
            .unwrap();
        let (tx, rx) = bounded(1);
        pool.execute(task(TaskPriority::High, move || {
            let _ = tx.send(());
        }))
        .unwrap();
        assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
        pool.terminate(false);
    }

    #[test]
    fn test_queue_full() {
        let pool = WorkerPool::new(
            WorkerPoolConfig::new()
                .with_worker_count(1)
                .with_max_queue_depth(1),
        )
        .unwrap();
        let (block_tx, block_rx) = bounded::<()>(0);
        let (started_tx, started_rx) = bounded(1);
        pool.execute(task(TaskPriority::Default, move || {
            let _ = started_tx.send(());
            let _ = block_rx.recv();
        }))
        .unwrap();
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        pool.execute(task(TaskPriority::Default, || {})).unwrap();
        assert_eq!(
            pool.execute(task(TaskPriority::Default, || {})),
            Err(DispatchError::QueueFull)
        );
        drop(block_tx);
        pool.terminate(false);
    }

    #[test]
    fn test_forced_terminate_revokes_queue() {
        let pool = small_pool(1);
        let (block_tx, block_rx) = bounded::<()>(0);
        let (started_tx, started_rx) = bounded(1);
        pool.execute(task(TaskPriority::Default, move || {
            let _ = started_tx.send(());
            let _ = block_rx.recv_timeout(Duration::from_millis(200));
        }))
        .unwrap();
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let ran = Arc::new(AtomicUsize::new(0));
        let queued = {
            let ran = Arc::clone(&ran);
            task(TaskPriority::Default, move || {
                ran.fetch_add(1, Ordering::SeqCst);
            })
        };
        pool.execute(Arc::clone(&queued)).unwrap();

        pool.terminate(true);
        drop(block_tx);
        assert!(queued.is_revoked());
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(
            pool.execute(task(TaskPriority::Default, || {})),
            Err(DispatchError::Shutdown)
        );
    }

    #[test]
    fn test_worker_threads_info() {
        let pool = small_pool(3);
        let info = pool.worker_threads_info();
        assert_eq!(info.len(), 3);
        assert_eq!(info[2].name, "dispatch-worker-2");
        pool.terminate(false);
    }
}
