//! Builder for [`TaskDispatcherContext`].

use std::sync::Arc;

use crate::config::WorkerPoolConfig;
use crate::context::TaskDispatcherContext;
use crate::core::error::AppResult;
use crate::core::executor::TaskExecutor;
use crate::util::telemetry::init_tracing;

/// Assembles a [`TaskDispatcherContext`] from a pool configuration or a
/// caller-supplied executor.
///
/// ```rust,ignore
/// let ctx = ContextBuilder::new().with_worker_count(4).with_tracing().build();
/// let lane = ctx.create_serial_dispatcher(Some("io"), TaskPriority::Default)?;
/// ```
#[derive(Default)]
pub struct ContextBuilder {
    config: WorkerPoolConfig,
    executor: Option<Arc<dyn TaskExecutor>>,
    tracing: bool,
}

impl ContextBuilder {
    /// Builder with the default pool configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder seeded from `DISPATCH_*` environment variables.
    ///
    /// # Errors
    ///
    /// See [`WorkerPoolConfig::from_env`].
    pub fn from_env() -> AppResult<Self> {
        Ok(Self::new().with_config(WorkerPoolConfig::from_env()?))
    }

    /// Replace the pool configuration.
    #[must_use]
    pub fn with_config(mut self, config: WorkerPoolConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the number of worker threads.
    #[must_use]
    pub fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.config = self.config.with_worker_count(worker_count);
        self
    }

    /// Use `executor` instead of starting a pool. The configuration is ignored.
    #[must_use]
    pub fn with_executor(mut self, executor: Arc<dyn TaskExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Install the default tracing subscriber when building.
    #[must_use]
    pub const fn with_tracing(mut self) -> Self {
        self.tracing = true;
        self
    }

    /// Build the context.
    pub fn build(self) -> TaskDispatcherContext {
        if self.tracing {
            init_tracing();
        }
        match self.executor {
            Some(executor) => TaskDispatcherContext::with_executor(executor),
            None => TaskDispatcherContext::new(self.config),
        }
    }
}

impl std::fmt::Debug for ContextBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextBuilder")
            .field("config", &self.config)
            .field("custom_executor", &self.executor.is_some())
            .field("tracing", &self.tracing)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::worker_pool::WorkerPool;

    #[test]
    fn test_build_with_worker_count() {
        let ctx = ContextBuilder::new().with_worker_count(3).build();
        assert_eq!(ctx.worker_threads_info().len(), 3);
        ctx.shutdown(false);
    }

    #[test]
    fn test_build_with_custom_executor() {
        let pool: Arc<dyn TaskExecutor> =
            Arc::new(WorkerPool::new(WorkerPoolConfig::new().with_worker_count(1)).unwrap());
        let ctx = ContextBuilder::new()
            .with_worker_count(8)
            .with_executor(Arc::clone(&pool))
            .build();
        assert_eq!(ctx.worker_threads_info().len(), 1);
        ctx.shutdown(false);
        assert!(pool.is_terminated());
    }
}
