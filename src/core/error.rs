//! Error types for dispatch operations.

use thiserror::Error;

/// Errors produced by dispatchers, groups, executors and event loops.
///
/// Every public dispatch operation reports one of these instead of panicking,
/// so callers always know whether their work was enqueued.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// A caller-supplied argument failed validation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// No executor is attached to the context or dispatcher.
    #[error("executor unavailable")]
    ExecutorUnavailable,
    /// The bound event loop is missing or stopped.
    #[error("event loop unavailable")]
    EventLoopUnavailable,
    /// The executor has been terminated.
    #[error("dispatcher has been shut down")]
    Shutdown,
    /// The executor ready queue is at capacity.
    #[error("task queue is full")]
    QueueFull,
    /// A blocking wait hit its deadline.
    #[error("operation timed out")]
    Timeout,
    /// The group refused another queued notification.
    #[error("group notification queue is full (max {0})")]
    NotificationsFull(usize),
    /// The task was revoked before it could run.
    #[error("task was revoked before execution")]
    Revoked,
    /// A synchronous dispatch would wait on the thread that must run it.
    #[error("synchronous dispatch onto `{0}` from its own execution thread")]
    Deadlock(String),
    /// Configuration validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Internal failure (thread spawn, channel closed, ...).
    #[error("internal error: {0}")]
    Internal(String),
}

impl DispatchError {
    /// Shorthand for [`DispatchError::InvalidArgument`].
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// True for errors caused by a missing or terminated execution resource.
    #[must_use]
    pub const fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Self::ExecutorUnavailable | Self::EventLoopUnavailable | Self::Shutdown | Self::QueueFull
        )
    }
}

/// Convenience result alias for dispatch operations.
pub type DispatchResult<T> = Result<T, DispatchError>;

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
