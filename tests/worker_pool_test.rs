//! Integration tests for WorkerPool
//!
//! These tests validate real-world functionality including:
//! - Priority ordering of ready tasks
//! - Delayed execution and revocation before the delay elapses
//! - Queue depth limits
//! - Graceful versus forced termination
//! - Telemetry snapshots

use crossbeam_channel::{bounded, Sender};
use parking_lot::Mutex;
use prometheus_task_dispatch::config::WorkerPoolConfig;
use prometheus_task_dispatch::core::{
    DispatchError, RevokeResult, Task, TaskExecutor, WorkerPool,
};
use prometheus_task_dispatch::util::TaskPriority;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

fn pool(workers: usize) -> WorkerPool {
    WorkerPool::new(
        WorkerPoolConfig::new()
            .with_worker_count(workers)
            .with_thread_name_prefix("it-worker"),
    )
    .expect("pool should start")
}

fn counting_task(counter: &Arc<AtomicUsize>, priority: TaskPriority) -> Arc<Task> {
    let counter = Arc::clone(counter);
    Arc::new(Task::new(
        Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }),
        priority,
    ))
}

/// Occupies one worker until the returned sender is dropped.
fn block_worker(pool: &WorkerPool) -> Sender<()> {
    let (release_tx, release_rx) = bounded::<()>(0);
    let (started_tx, started_rx) = bounded::<()>(1);
    pool.execute(Arc::new(Task::new(
        Box::new(move || {
            let _ = started_tx.send(());
            let _ = release_rx.recv();
        }),
        TaskPriority::High,
    )))
    .unwrap();
    started_rx.recv().unwrap();
    release_tx
}

fn wait_for(deadline: Duration, mut done: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    done()
}

// ============================================================================
// TESTS
// ============================================================================

#[test]
fn test_basic_execution() {
    let pool = pool(4);
    let counter = Arc::new(AtomicUsize::new(0));
    for _ in 0..100 {
        pool.execute(counting_task(&counter, TaskPriority::Default))
            .unwrap();
    }
    assert!(wait_for(Duration::from_secs(5), || counter
        .load(Ordering::SeqCst)
        == 100));
    pool.terminate(false);
    assert_eq!(pool.task_counter(), 100);
    assert_eq!(pool.stats().completed_tasks, 100);
}

#[test]
fn test_priority_order_on_single_worker() {
    let pool = pool(1);
    let guard = block_worker(&pool);

    let log = Arc::new(Mutex::new(Vec::new()));
    for (label, priority) in [
        ("low", TaskPriority::Low),
        ("default", TaskPriority::Default),
        ("high-1", TaskPriority::High),
        ("high-2", TaskPriority::High),
    ] {
        let log = Arc::clone(&log);
        pool.execute(Arc::new(Task::new(
            Box::new(move || log.lock().push(label)),
            priority,
        )))
        .unwrap();
    }
    drop(guard);
    pool.terminate(false);

    assert_eq!(*log.lock(), vec!["high-1", "high-2", "default", "low"]);
}

#[test]
fn test_delayed_task_runs_after_delay() {
    let pool = pool(2);
    let counter = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();
    pool.delay_execute(
        counting_task(&counter, TaskPriority::Default),
        Duration::from_millis(50),
    )
    .unwrap();

    thread::sleep(Duration::from_millis(10));
    assert_eq!(counter.load(Ordering::SeqCst), 0);
    assert!(wait_for(Duration::from_secs(5), || counter
        .load(Ordering::SeqCst)
        == 1));
    assert!(start.elapsed() >= Duration::from_millis(45));
    pool.terminate(false);
}

#[test]
fn test_revoked_delayed_task_never_runs() {
    let pool = pool(2);
    let counter = Arc::new(AtomicUsize::new(0));
    let task = counting_task(&counter, TaskPriority::Default);
    pool.delay_execute(Arc::clone(&task), Duration::from_millis(30))
        .unwrap();
    assert_eq!(task.revoke(), RevokeResult::Success);

    thread::sleep(Duration::from_millis(80));
    assert_eq!(counter.load(Ordering::SeqCst), 0);
    pool.terminate(false);
}

#[test]
fn test_oversized_delay_is_rejected() {
    let pool = pool(1);
    let counter = Arc::new(AtomicUsize::new(0));
    let task = counting_task(&counter, TaskPriority::Default);
    assert!(matches!(
        pool.delay_execute(Arc::clone(&task), Duration::MAX),
        Err(DispatchError::InvalidArgument(_))
    ));
    assert_eq!(pool.pending_count(), 0);
    assert_eq!(pool.task_counter(), 0);
    // Not consumed: the caller still owns the task.
    assert!(!task.is_finished());
    pool.terminate(false);
}

#[test]
fn test_queue_depth_limit() {
    let pool = WorkerPool::new(
        WorkerPoolConfig::new()
            .with_worker_count(1)
            .with_max_queue_depth(2),
    )
    .unwrap();
    let guard = block_worker(&pool);
    let counter = Arc::new(AtomicUsize::new(0));

    pool.execute(counting_task(&counter, TaskPriority::Default))
        .unwrap();
    pool.execute(counting_task(&counter, TaskPriority::Default))
        .unwrap();
    assert_eq!(
        pool.execute(counting_task(&counter, TaskPriority::Default)),
        Err(DispatchError::QueueFull)
    );
    assert_eq!(pool.pending_count(), 2);

    drop(guard);
    pool.terminate(false);
    assert_eq!(counter.load(Ordering::SeqCst), 2);
}

#[test]
fn test_graceful_terminate_drains_queue() {
    let pool = pool(1);
    let guard = block_worker(&pool);
    let counter = Arc::new(AtomicUsize::new(0));
    for _ in 0..10 {
        pool.execute(counting_task(&counter, TaskPriority::Low))
            .unwrap();
    }
    drop(guard);
    pool.terminate(false);
    assert_eq!(counter.load(Ordering::SeqCst), 10);
    assert!(pool.is_terminated());
}

#[test]
fn test_forced_terminate_revokes_queue() {
    let pool = pool(1);
    let guard = block_worker(&pool);
    let counter = Arc::new(AtomicUsize::new(0));
    let queued: Vec<_> = (0..5)
        .map(|_| counting_task(&counter, TaskPriority::Default))
        .collect();
    for task in &queued {
        pool.execute(Arc::clone(task)).unwrap();
    }

    let releaser = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        drop(guard);
    });
    pool.terminate(true);
    releaser.join().unwrap();

    assert_eq!(counter.load(Ordering::SeqCst), 0);
    assert!(queued.iter().all(|t| t.is_revoked()));
}

#[test]
fn test_submission_after_terminate_fails() {
    let pool = pool(1);
    pool.terminate(false);
    let counter = Arc::new(AtomicUsize::new(0));
    assert_eq!(
        pool.execute(counting_task(&counter, TaskPriority::Default)),
        Err(DispatchError::Shutdown)
    );
    assert_eq!(
        pool.delay_execute(
            counting_task(&counter, TaskPriority::Default),
            Duration::from_millis(5)
        ),
        Err(DispatchError::Shutdown)
    );
}

#[test]
fn test_worker_telemetry() {
    let pool = pool(3);
    let info = pool.worker_threads_info();
    assert_eq!(info.len(), 3);
    assert!(info.iter().all(|w| w.name.starts_with("it-worker-")));

    let counter = Arc::new(AtomicUsize::new(0));
    for _ in 0..9 {
        pool.execute(counting_task(&counter, TaskPriority::Default))
            .unwrap();
    }
    pool.terminate(false);

    let executed: u64 = pool
        .worker_threads_info()
        .iter()
        .map(|w| w.executed_tasks)
        .sum();
    assert_eq!(executed, 9);
    let stats = pool.stats();
    assert_eq!(stats.completed_tasks, 9);
    assert_eq!(stats.worker_count, 3);
}
