use crate::error::BatchError;
use crate::task::Task;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// Ordered list of pending tasks plus the run-in-progress flag of one runner.
///
/// Insertion order is result order. Appends are rejected while a run holds
/// the queue; the run takes every task at once and the queue is cleared again
/// when the run ends.
pub(crate) struct TaskQueue<T, E> {
  tasks: Mutex<Vec<Task<T, E>>>,
  run_in_progress: AtomicBool,
}

impl<T, E> fmt::Debug for TaskQueue<T, E> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("TaskQueue")
      .field("len", &self.len())
      .field("run_in_progress", &self.is_running())
      .finish()
  }
}

/// Exclusive claim on a queue for the duration of one run.
///
/// Dropping the guard ends the run: the queue is cleared and the in-progress
/// flag reset. This happens whether the run succeeded, failed, or its future
/// was dropped mid-flight.
pub(crate) struct RunGuard<T, E> {
  queue: Arc<TaskQueue<T, E>>,
}

impl<T, E> fmt::Debug for RunGuard<T, E> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("RunGuard").field("queue", &self.queue).finish()
  }
}

impl<T, E> TaskQueue<T, E> {
  pub(crate) fn new() -> Self {
    Self {
      tasks: Mutex::new(Vec::new()),
      run_in_progress: AtomicBool::new(false),
    }
  }

  /// Appends a task, failing with `InvalidState` if a run holds the queue.
  pub(crate) fn push(&self, task: Task<T, E>) -> Result<(), BatchError> {
    let mut tasks = self.tasks.lock();
    // Checked under the lock so a push can never slip in after `take_tasks`.
    if self.is_running() {
      return Err(BatchError::InvalidState);
    }
    tasks.push(task);
    Ok(())
  }

  pub(crate) fn len(&self) -> usize {
    self.tasks.lock().len()
  }

  pub(crate) fn is_running(&self) -> bool {
    self.run_in_progress.load(Ordering::Acquire)
  }

  /// Claims the queue for a run, failing with `AlreadyRunning` if another run
  /// holds it.
  pub(crate) fn begin_run(self: &Arc<Self>) -> Result<RunGuard<T, E>, BatchError> {
    self
      .run_in_progress
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .map_err(|_| BatchError::AlreadyRunning)?;
    Ok(RunGuard { queue: self.clone() })
  }
}

impl<T, E> RunGuard<T, E> {
  /// Takes every queued task, in insertion order.
  pub(crate) fn take_tasks(&self) -> Vec<Task<T, E>> {
    std::mem::take(&mut *self.queue.tasks.lock())
  }
}

impl<T, E> Drop for RunGuard<T, E> {
  fn drop(&mut self) {
    let mut tasks = self.queue.tasks.lock();
    tasks.clear();
    self.queue.run_in_progress.store(false, Ordering::Release);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::task::task;

  fn dummy_task(value: u32) -> Task<u32, String> {
    task(move || async move { Ok(value) })
  }

  #[tokio::test]
  async fn test_push_preserves_insertion_order() {
    let queue = Arc::new(TaskQueue::<u32, String>::new());
    for i in 0..4 {
      queue.push(dummy_task(i)).unwrap();
    }
    assert_eq!(queue.len(), 4);

    let guard = queue.begin_run().unwrap();
    let mut values = Vec::new();
    for t in guard.take_tasks() {
      values.push(t().await.unwrap());
    }
    assert_eq!(values, vec![0, 1, 2, 3]);
    assert_eq!(queue.len(), 0);
  }

  #[test]
  fn test_push_rejected_while_running() {
    let queue = Arc::new(TaskQueue::<u32, String>::new());
    let guard = queue.begin_run().unwrap();

    assert_eq!(queue.push(dummy_task(1)), Err(BatchError::InvalidState));
    assert_eq!(queue.push(dummy_task(2)), Err(BatchError::InvalidState));
    assert_eq!(queue.len(), 0);

    drop(guard);
    assert!(queue.push(dummy_task(3)).is_ok());
  }

  #[test]
  fn test_second_claim_fails_until_guard_dropped() {
    let queue = Arc::new(TaskQueue::<u32, String>::new());
    let guard = queue.begin_run().unwrap();

    assert!(matches!(queue.begin_run(), Err(BatchError::AlreadyRunning)));
    assert!(queue.is_running());

    drop(guard);
    assert!(!queue.is_running());
    assert!(queue.begin_run().is_ok());
  }

  #[test]
  fn test_guard_drop_clears_untaken_tasks() {
    let queue = Arc::new(TaskQueue::<u32, String>::new());
    queue.push(dummy_task(1)).unwrap();
    queue.push(dummy_task(2)).unwrap();

    let guard = queue.begin_run().unwrap();
    assert_eq!(queue.len(), 2);
    drop(guard);

    assert_eq!(queue.len(), 0);
    assert!(!queue.is_running());
  }
}
