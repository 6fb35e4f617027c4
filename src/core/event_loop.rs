//! Contract for single-threaded event loops that dispatchers can bind to.

use std::time::Duration;

use super::error::DispatchResult;
use super::task::Runnable;

/// A cooperative, single-threaded execution context owned outside the
/// dispatch core. Every posted callback runs on the loop's own thread.
pub trait EventLoop: Send + Sync {
    /// Queue `work` and return immediately.
    ///
    /// # Errors
    ///
    /// `EventLoopUnavailable` if the loop stopped.
    fn post(&self, work: Runnable) -> DispatchResult<()>;

    /// Queue `work` and block until the loop has run it.
    ///
    /// # Errors
    ///
    /// `EventLoopUnavailable` if the loop stopped before running it.
    fn post_sync(&self, work: Runnable) -> DispatchResult<()>;

    /// Run `work` on the loop after `delay`.
    ///
    /// # Errors
    ///
    /// `EventLoopUnavailable` if the loop stopped. Loops that track
    /// deadlines themselves may reject an overflowing delay with
    /// `InvalidArgument`.
    fn post_delayed(&self, work: Runnable, delay: Duration) -> DispatchResult<()>;

    /// False once the loop stopped accepting work.
    fn is_running(&self) -> bool;
}
