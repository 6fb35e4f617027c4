//! Event-loop adapters for the loop-bound dispatcher.

pub mod event_runner;
#[cfg(feature = "tokio-runtime")]
pub mod tokio_event_loop;

use std::panic::{self, AssertUnwindSafe};

use tracing::error;

use crate::core::task::{panic_message, Runnable};

pub use event_runner::EventRunner;
#[cfg(feature = "tokio-runtime")]
pub use tokio_event_loop::TokioEventLoop;

/// Run a loop callback, containing any panic so the loop keeps serving.
fn run_guarded(work: Runnable, runner: &str) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(work)) {
        error!(runner, panic = %panic_message(payload.as_ref()), "Event loop callback panicked");
    }
}
