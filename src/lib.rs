//! A Tokio-based batch runner that executes queued futures under a concurrency
//! limit, with fail-fast and collect-all aggregation.

mod capacity_gate;
mod error;
mod options;
mod runner;
mod task;
mod task_queue;

pub use error::{BatchError, RunError};
pub use options::{AutoRunOptions, RunOptions, RunStrategy, RunnerOptions, DEFAULT_POLL_INTERVAL};
pub use runner::BatchRunner;
pub use task::{task, Outcome, Task, TaskToExecute};
