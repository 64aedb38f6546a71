use thiserror::Error;

/// Usage errors raised by a `BatchRunner` itself, independent of any task.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchError {
  #[error("Cannot add tasks while a run is in progress")]
  InvalidState,

  #[error("A run is already in progress on this runner")]
  AlreadyRunning,

  #[error("Concurrency limit must be at least 1")]
  InvalidConcurrencyLimit,
}

/// Failure of a fail-fast run (or of a run started by an auto-trigger).
///
/// `E` is whatever the task produced; it is forwarded untouched.
#[derive(Error, Debug, PartialEq)]
pub enum RunError<E> {
  #[error(transparent)]
  Batch(#[from] BatchError),

  #[error("Task failed: {0:?}")]
  Task(E),

  #[error("Task at queue position {index} panicked")]
  TaskPanicked { index: usize },

  #[error("Task at queue position {index} was aborted before it settled")]
  TaskAborted { index: usize },
}

impl<E> RunError<E> {
  /// Returns the task-supplied failure value, if this is a task rejection.
  pub fn into_task_error(self) -> Option<E> {
    match self {
      RunError::Task(e) => Some(e),
      _ => None,
    }
  }
}
