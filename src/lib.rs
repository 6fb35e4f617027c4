//! # Prometheus Task Dispatch
//!
//! Priority-aware task dispatch on a shared pool of OS worker threads.
//!
//! Work is submitted through *dispatchers*, which all share one
//! [`WorkerPool`](core::WorkerPool) owned by a [`TaskDispatcherContext`]:
//!
//! - **Serial** dispatchers run their tasks one at a time, in submission order
//! - **Parallel** dispatchers run tasks concurrently and support barriers
//! - **Global** dispatchers, one per priority class, run tasks concurrently
//! - **Event-loop** dispatchers run everything on an external loop thread
//!
//! Every submission returns a revocable [`Task`](core::Task) handle. Tasks can
//! be tracked as a [`Group`](core::Group) and waited on, or followed by
//! notification callbacks once the whole group finished.
//!
//! ```rust,ignore
//! use prometheus_task_dispatch::{ContextBuilder, TaskDispatcher, TaskPriority};
//! use std::time::Duration;
//!
//! let ctx = ContextBuilder::new().with_worker_count(4).build();
//! let lane = ctx.create_serial_dispatcher(Some("io"), TaskPriority::Default)?;
//!
//! let group = lane.create_dispatch_group();
//! for i in 0..8 {
//!     group.associate();
//!     lane.async_group_dispatch(&group, Box::new(move || println!("step {i}")))?;
//! }
//! lane.group_dispatch_wait(&group, Duration::from_secs(5))?;
//! ctx.shutdown(false);
//! ```
//!
//! ## Failure model
//!
//! Submissions report [`DispatchError`](core::DispatchError) values instead of
//! dropping work silently. Panics inside tasks, listeners and group
//! notifications are contained and logged through `tracing`; they never take
//! a worker thread down.

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Builders to assemble a dispatcher context from configuration.
pub mod builders;
/// Configuration models for the worker pool.
pub mod config;
/// Dispatcher factory and pool owner.
pub mod context;
/// Tasks, groups, errors and the executor and event loop contracts.
pub mod core;
/// Dispatcher variants.
pub mod dispatcher;
/// Event loops for event-loop-bound dispatchers.
pub mod runtime;
/// Shared utilities.
pub mod util;

pub use builders::ContextBuilder;
pub use config::WorkerPoolConfig;
pub use context::TaskDispatcherContext;
pub use crate::core::{
    DispatchError, DispatchResult, EventLoop, Group, RevokeResult, Runnable, Task,
    TaskExecutor, TaskInterceptor, TaskListener, TaskStage, WorkerPool,
};
pub use dispatcher::{
    GlobalTaskDispatcher, IterableRunnable, ParallelTaskDispatcher, SerialTaskDispatcher,
    SpecTaskDispatcher, TaskDispatcher,
};
pub use util::serde::{TaskId, TaskPriority};
