use std::future::Future;
use std::pin::Pin;

/// The type of future a task produces once invoked.
/// It must be `Send` and `'static`, and produce a result of type `R`.
pub type TaskToExecute<R> = Pin<Box<dyn Future<Output = R> + Send + 'static>>;

/// A queued, not-yet-invoked task: a zero-argument function producing a
/// deferred `Result<T, E>`.
///
/// `Task` itself implements `FnOnce`, so boxed tasks of different closure
/// types can be mixed in a single `add_many` call.
pub type Task<T, E> = Box<dyn FnOnce() -> TaskToExecute<Result<T, E>> + Send + 'static>;

/// Boxes a closure into a [`Task`].
pub fn task<T, E, F, Fut>(factory: F) -> Task<T, E>
where
  F: FnOnce() -> Fut + Send + 'static,
  Fut: Future<Output = Result<T, E>> + Send + 'static,
{
  Box::new(move || Box::pin(factory()) as TaskToExecute<Result<T, E>>)
}

/// The settled state of one task in a collect-all run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T, E> {
  Fulfilled(T),
  Rejected(E),
  /// The task panicked. Its slot was released and the run carried on.
  Panicked,
  /// The task was aborted by the runtime (e.g. runtime shutdown) before settling.
  Aborted,
}

impl<T, E> Outcome<T, E> {
  pub fn is_fulfilled(&self) -> bool {
    matches!(self, Outcome::Fulfilled(_))
  }

  pub fn is_rejected(&self) -> bool {
    matches!(self, Outcome::Rejected(_))
  }

  pub fn fulfilled(self) -> Option<T> {
    match self {
      Outcome::Fulfilled(v) => Some(v),
      _ => None,
    }
  }

  pub fn rejected(self) -> Option<E> {
    match self {
      Outcome::Rejected(e) => Some(e),
      _ => None,
    }
  }

  /// Converts a fulfilled or rejected outcome into a `Result`.
  /// Returns `None` for panicked or aborted tasks.
  pub fn into_result(self) -> Option<Result<T, E>> {
    match self {
      Outcome::Fulfilled(v) => Some(Ok(v)),
      Outcome::Rejected(e) => Some(Err(e)),
      Outcome::Panicked | Outcome::Aborted => None,
    }
  }
}

impl<T, E> From<Result<T, E>> for Outcome<T, E> {
  fn from(result: Result<T, E>) -> Self {
    match result {
      Ok(v) => Outcome::Fulfilled(v),
      Err(e) => Outcome::Rejected(e),
    }
  }
}
