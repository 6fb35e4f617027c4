//! Worker pool configuration.

use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::core::AppResult;

/// Environment variable overriding [`WorkerPoolConfig::worker_count`].
pub const ENV_WORKER_COUNT: &str = "DISPATCH_WORKER_COUNT";
/// Environment variable overriding [`WorkerPoolConfig::max_queue_depth`].
pub const ENV_MAX_QUEUE_DEPTH: &str = "DISPATCH_MAX_QUEUE_DEPTH";
/// Environment variable overriding [`WorkerPoolConfig::thread_stack_size`].
pub const ENV_THREAD_STACK_SIZE: &str = "DISPATCH_THREAD_STACK_SIZE";
/// Environment variable overriding [`WorkerPoolConfig::thread_name_prefix`].
pub const ENV_THREAD_NAME_PREFIX: &str = "DISPATCH_THREAD_NAME_PREFIX";
/// Environment variable overriding [`WorkerPoolConfig::shutdown_timeout_ms`].
pub const ENV_SHUTDOWN_TIMEOUT_MS: &str = "DISPATCH_SHUTDOWN_TIMEOUT_MS";

const DEFAULT_MAX_QUEUE_DEPTH: usize = 10_000;
const DEFAULT_STACK_SIZE: usize = 2 * 1024 * 1024;
const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 2_000;

/// Sizing and lifecycle settings for [`WorkerPool`](crate::core::WorkerPool).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerPoolConfig {
    /// Number of worker threads.
    pub worker_count: usize,
    /// Maximum ready tasks before submissions are rejected.
    pub max_queue_depth: usize,
    /// Stack size for each worker thread, in bytes.
    pub thread_stack_size: usize,
    /// Worker threads are named `<prefix>-<index>`.
    pub thread_name_prefix: String,
    /// How long termination waits for each thread to exit.
    pub shutdown_timeout_ms: u64,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            worker_count: num_cpus::get().max(1),
            max_queue_depth: DEFAULT_MAX_QUEUE_DEPTH,
            thread_stack_size: DEFAULT_STACK_SIZE,
            thread_name_prefix: "dispatch-worker".to_string(),
            shutdown_timeout_ms: DEFAULT_SHUTDOWN_TIMEOUT_MS,
        }
    }
}

impl WorkerPoolConfig {
    /// Default configuration sized to the machine.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of worker threads.
    #[must_use]
    pub const fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    /// Set the ready-queue capacity.
    #[must_use]
    pub const fn with_max_queue_depth(mut self, max_queue_depth: usize) -> Self {
        self.max_queue_depth = max_queue_depth;
        self
    }

    /// Set the worker stack size in bytes.
    #[must_use]
    pub const fn with_thread_stack_size(mut self, thread_stack_size: usize) -> Self {
        self.thread_stack_size = thread_stack_size;
        self
    }

    /// Set the worker thread name prefix.
    #[must_use]
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Set the per-thread join timeout used on termination.
    #[must_use]
    pub const fn with_shutdown_timeout_ms(mut self, shutdown_timeout_ms: u64) -> Self {
        self.shutdown_timeout_ms = shutdown_timeout_ms;
        self
    }

    /// Join timeout as a [`Duration`].
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// A description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.worker_count == 0 {
            return Err("worker_count must be greater than 0".into());
        }
        if self.max_queue_depth == 0 {
            return Err("max_queue_depth must be greater than 0".into());
        }
        if self.thread_stack_size < 64 * 1024 {
            return Err("thread_stack_size must be at least 64 KiB".into());
        }
        if self.thread_name_prefix.trim().is_empty() {
            return Err("thread_name_prefix must not be empty".into());
        }
        if self.shutdown_timeout_ms == 0 {
            return Err("shutdown_timeout_ms must be greater than 0".into());
        }
        Ok(())
    }

    /// Parse configuration from a JSON string and validate. Missing fields
    /// take their defaults.
    ///
    /// # Errors
    ///
    /// Parse or validation failure message.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Build configuration from `DISPATCH_*` environment variables, loading a
    /// `.env` file first if one exists. Unset variables keep their defaults.
    ///
    /// # Errors
    ///
    /// A variable that fails to parse, or an invalid resulting configuration.
    pub fn from_env() -> AppResult<Self> {
        let _ = dotenvy::dotenv();

        let mut cfg = Self::default();
        if let Some(v) = env_parse(ENV_WORKER_COUNT)? {
            cfg.worker_count = v;
        }
        if let Some(v) = env_parse(ENV_MAX_QUEUE_DEPTH)? {
            cfg.max_queue_depth = v;
        }
        if let Some(v) = env_parse(ENV_THREAD_STACK_SIZE)? {
            cfg.thread_stack_size = v;
        }
        if let Ok(v) = std::env::var(ENV_THREAD_NAME_PREFIX) {
            cfg.thread_name_prefix = v;
        }
        if let Some(v) = env_parse(ENV_SHUTDOWN_TIMEOUT_MS)? {
            cfg.shutdown_timeout_ms = v;
        }

        cfg.validate()
            .map_err(|e| anyhow::anyhow!("worker pool config invalid: {e}"))?;
        Ok(cfg)
    }
}

fn env_parse<T>(key: &str) -> AppResult<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("{key}={raw:?} is not valid")),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let cfg = WorkerPoolConfig::default();
        assert!(cfg.validate().is_ok());
        assert!(cfg.worker_count >= 1);
    }

    #[test]
    fn test_builder_chain() {
        let cfg = WorkerPoolConfig::new()
            .with_worker_count(3)
            .with_max_queue_depth(16)
            .with_thread_name_prefix("io")
            .with_shutdown_timeout_ms(500);
        assert_eq!(cfg.worker_count, 3);
        assert_eq!(cfg.max_queue_depth, 16);
        assert_eq!(cfg.thread_name_prefix, "io");
        assert_eq!(cfg.shutdown_timeout(), Duration::from_millis(500));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let cfg = WorkerPoolConfig::from_json_str(r#"{"worker_count": 2}"#).unwrap();
        assert_eq!(cfg.worker_count, 2);
        assert_eq!(cfg.max_queue_depth, DEFAULT_MAX_QUEUE_DEPTH);
    }
}
