//! Core dispatch primitives: tasks, groups, executor contract and worker pool.

pub mod error;
pub mod event_loop;
pub mod executor;
pub mod group;
pub mod task;
pub mod worker_pool;

pub use error::{AppResult, DispatchError, DispatchResult};
pub use event_loop::EventLoop;
pub use executor::TaskExecutor;
pub use group::{Group, DEFAULT_MAX_NOTIFICATIONS};
pub use task::{RevokeResult, Runnable, Task, TaskInterceptor, TaskListener, TaskStage};
pub use worker_pool::{PoolStats, WorkerPool, WorkerThreadInfo};
