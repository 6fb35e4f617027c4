//! Dispatcher variants sharing the [`TaskDispatcher`] contract.
//!
//! - [`SerialTaskDispatcher`]: FIFO, one task at a time, on the shared pool
//! - [`ParallelTaskDispatcher`]: concurrent, with real barriers
//! - [`GlobalTaskDispatcher`]: concurrent, one per priority class
//! - [`SpecTaskDispatcher`]: everything runs on one external event loop

mod barrier;
pub mod base;
pub mod global;
pub mod parallel;
pub mod serial;
pub mod spec;

pub use base::{IterableRunnable, TaskDispatcher};
pub use global::GlobalTaskDispatcher;
pub use parallel::ParallelTaskDispatcher;
pub use serial::SerialTaskDispatcher;
pub use spec::SpecTaskDispatcher;

/// Name for a dispatcher created without one, e.g. `serial-<uuid>`.
pub(crate) fn generated_name(kind: &str) -> String {
    format!("{kind}-{}", uuid::Uuid::new_v4())
}
