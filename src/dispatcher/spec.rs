//! Dispatcher bound to an externally owned event loop.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tracing::debug;

use crate::core::error::{DispatchError, DispatchResult};
use crate::core::event_loop::EventLoop;
use crate::core::task::{Runnable, Task};
use crate::util::serde::TaskPriority;

use super::base::TaskDispatcher;

/// Dispatcher that runs every task on one specific event loop thread.
///
/// Ordering and delay semantics are whatever the loop provides. Work the
/// loop drops without running (for example because it stopped) is revoked,
/// so groups and sync callers never wait on it forever.
pub struct SpecTaskDispatcher {
    name: String,
    priority: TaskPriority,
    event_loop: Arc<dyn EventLoop>,
    me: Weak<Self>,
}

impl SpecTaskDispatcher {
    /// Bind a dispatcher to `event_loop`.
    pub fn new(
        name: impl Into<String>,
        priority: TaskPriority,
        event_loop: Arc<dyn EventLoop>,
    ) -> Arc<Self> {
        let name = name.into();
        debug!(dispatcher = %name, "Event loop dispatcher created");
        Arc::new_cyclic(|me| Self {
            name,
            priority,
            event_loop,
            me: me.clone(),
        })
    }
}

/// Revokes the task if the loop drops the callback unrun.
struct RevokeOnDrop(Arc<Task>);

impl RevokeOnDrop {
    fn run(&self) {
        self.0.run();
    }
}

impl Drop for RevokeOnDrop {
    fn drop(&mut self) {
        let _ = self.0.revoke();
    }
}

fn loop_callback(task: Arc<Task>) -> Runnable {
    let guard = RevokeOnDrop(task);
    Box::new(move || guard.run())
}

impl TaskDispatcher for SpecTaskDispatcher {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> TaskPriority {
        self.priority
    }

    fn check(&self) -> DispatchResult<()> {
        if !self.event_loop.is_running() {
            return Err(DispatchError::EventLoopUnavailable);
        }
        Ok(())
    }

    fn weak_self(&self) -> Weak<dyn TaskDispatcher> {
        self.me.clone()
    }

    fn sync_dispatch_task(&self, task: Arc<Task>) -> DispatchResult<()> {
        self.event_loop.post_sync(loop_callback(Arc::clone(&task)))?;
        if task.is_revoked() {
            return Err(DispatchError::Revoked);
        }
        Ok(())
    }

    fn async_dispatch_task(&self, task: Arc<Task>) -> DispatchResult<()> {
        self.event_loop.post(loop_callback(task))
    }

    fn delay_dispatch_task(&self, task: Arc<Task>, delay: Duration) -> DispatchResult<()> {
        self.event_loop.post_delayed(loop_callback(task), delay)
    }
}

impl std::fmt::Debug for SpecTaskDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpecTaskDispatcher")
            .field("name", &self.name)
            .field("loop_running", &self.event_loop.is_running())
            .finish_non_exhaustive()
    }
}
