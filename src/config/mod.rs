//! Configuration models for the worker pool and dispatch context.

pub mod pool;

pub use pool::WorkerPoolConfig;
