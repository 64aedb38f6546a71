use crate::capacity_gate::CapacityGate;
use crate::error::{BatchError, RunError};
use crate::options::{AutoRunOptions, RunOptions, RunStrategy, RunnerOptions};
use crate::task::{Outcome, Task, TaskToExecute};
use crate::task_queue::{RunGuard, TaskQueue};

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::runtime::Handle as TokioHandle;
use tokio::task::{JoinError, JoinHandle};
use tracing::{self, debug, info, info_span, trace, warn, Instrument};

lazy_static::lazy_static! {
  static ref NEXT_RUN_ID_COUNTER: AtomicU64 = AtomicU64::new(0);
}

/// Runs a queue of deferred tasks with at most `concurrency_limit` of them
/// executing at any moment.
///
/// Tasks are added with [`add`](Self::add) and friends, then executed by one
/// of two runs:
///
/// - [`run_all`](Self::run_all): fail-fast. Returns every value in queue order,
///   or the first task failure observed.
/// - [`run_all_settled`](Self::run_all_settled): collect-all. Always returns one
///   [`Outcome`] per task, in queue order.
///
/// Only one run may be in progress per runner, and the queue cannot be
/// appended to while it is. Every run leaves the runner empty and reusable.
pub struct BatchRunner<T, E> {
  runner_name: Arc<String>,
  gate: Arc<CapacityGate>,
  queue: Arc<TaskQueue<T, E>>,
  options: RunnerOptions,
  tokio_handle: TokioHandle,
}

impl<T, E> fmt::Debug for BatchRunner<T, E> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("BatchRunner")
      .field("runner_name", &self.runner_name)
      .field("gate", &self.gate)
      .field("queue", &self.queue)
      .field("options", &self.options)
      .finish_non_exhaustive()
  }
}

impl<T, E> BatchRunner<T, E>
where
  T: Send + 'static,
  E: Send + 'static,
{
  /// Creates a runner whose tasks are spawned on `tokio_handle`.
  ///
  /// A `concurrency_limit` of 0 is raised to 1.
  pub fn new(
    concurrency_limit: usize,
    options: RunnerOptions,
    tokio_handle: TokioHandle,
    runner_name: &str,
  ) -> Arc<Self> {
    if concurrency_limit == 0 {
      warn!(runner_name = %runner_name, "Concurrency limit of 0 requested, using 1.");
    }
    let concurrency_limit = concurrency_limit.max(1);
    debug!(runner_name = %runner_name, concurrency_limit, ?options, "Creating batch runner.");

    Arc::new(Self {
      runner_name: Arc::new(runner_name.to_string()),
      gate: Arc::new(CapacityGate::new(concurrency_limit)),
      queue: Arc::new(TaskQueue::new()),
      options,
      tokio_handle,
    })
  }

  /// A runner with a concurrency limit of 1 and default options.
  pub fn with_defaults(tokio_handle: TokioHandle, runner_name: &str) -> Arc<Self> {
    Self::new(1, RunnerOptions::default(), tokio_handle, runner_name)
  }

  pub fn name(&self) -> &str {
    &self.runner_name
  }

  pub fn options(&self) -> &RunnerOptions {
    &self.options
  }

  pub fn concurrency_limit(&self) -> usize {
    self.gate.limit()
  }

  /// Changes the concurrency limit.
  ///
  /// Takes effect at the next admission check of every task not yet admitted,
  /// including tasks of a run already in progress. Tasks already executing are
  /// never evicted when the limit shrinks.
  pub fn set_concurrency_limit(&self, concurrency_limit: usize) -> Result<(), BatchError> {
    if concurrency_limit == 0 {
      warn!(runner_name = %self.runner_name, "Rejected concurrency limit of 0.");
      return Err(BatchError::InvalidConcurrencyLimit);
    }
    let previous = self.gate.limit();
    self.gate.set_limit(concurrency_limit);
    info!(runner_name = %self.runner_name, previous, concurrency_limit, "Concurrency limit changed.");
    Ok(())
  }

  /// Number of tasks waiting in the queue.
  pub fn size(&self) -> usize {
    self.queue.len()
  }

  /// Number of tasks currently admitted and executing.
  ///
  /// This can be non-zero between runs: tasks left running by a fail-fast run
  /// keep their slot until they finish.
  pub fn running_count(&self) -> usize {
    self.gate.running()
  }

  pub fn is_running(&self) -> bool {
    self.queue.is_running()
  }

  /// Appends a task. The closure is not invoked until the task is admitted
  /// during a run.
  ///
  /// # Errors
  /// Returns `BatchError::InvalidState` if a run is in progress.
  pub fn add<F, Fut>(&self, task: F) -> Result<(), BatchError>
  where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
  {
    let boxed: Task<T, E> = Box::new(move || Box::pin(task()) as TaskToExecute<Result<T, E>>);
    match self.queue.push(boxed) {
      Ok(()) => {
        trace!(runner_name = %self.runner_name, queued = self.queue.len(), "Task added.");
        Ok(())
      }
      Err(e) => {
        warn!(runner_name = %self.runner_name, "Add: Attempted to add a task while a run is in progress.");
        Err(e)
      }
    }
  }

  /// Appends each task in order, as repeated [`add`](Self::add) calls.
  ///
  /// # Errors
  /// Returns `BatchError::InvalidState` if a run is in progress.
  pub fn add_many<I, F, Fut>(&self, tasks: I) -> Result<(), BatchError>
  where
    I: IntoIterator<Item = F>,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
  {
    for task in tasks {
      self.add(task)?;
    }
    Ok(())
  }

  /// Appends a task, then runs the queue if it has reached the auto-run
  /// threshold.
  ///
  /// `auto_run` overrides the runner's configured `RunnerOptions::auto_run`
  /// for this call; with neither set this behaves like [`add`](Self::add).
  /// Per-task results of a triggered run are discarded: only the run's own
  /// success or failure is returned.
  ///
  /// The returned future must be awaited before adding more tasks to this
  /// runner. A triggered run holds the queue until it completes, and any
  /// append made in the meantime fails with `BatchError::InvalidState`.
  pub async fn add_with_auto_trigger<F, Fut>(
    &self,
    task: F,
    auto_run: Option<AutoRunOptions>,
  ) -> Result<(), RunError<E>>
  where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
  {
    self.add(task)?;
    self.run_if_threshold_reached(auto_run).await
  }

  /// Sequential [`add_with_auto_trigger`](Self::add_with_auto_trigger) for each
  /// task. Stops at the first error.
  pub async fn add_many_with_auto_trigger<I, F, Fut>(
    &self,
    tasks: I,
    auto_run: Option<AutoRunOptions>,
  ) -> Result<(), RunError<E>>
  where
    I: IntoIterator<Item = F>,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
  {
    for task in tasks {
      self.add_with_auto_trigger(task, auto_run).await?;
    }
    Ok(())
  }

  /// Fail-fast run with the runner's default options.
  ///
  /// See [`run_all_with`](Self::run_all_with).
  pub fn run_all(&self) -> impl Future<Output = Result<Vec<T>, RunError<E>>> + Send + 'static {
    self.run_all_with(RunOptions::default())
  }

  /// Executes every queued task and returns their values in queue order.
  ///
  /// The run is claimed when this method is called, not when the future is
  /// first polled: a second run started before this one completes fails with
  /// `BatchError::AlreadyRunning`.
  ///
  /// If any task fails, the run fails with the first failure observed in real
  /// time. Tasks still executing at that point are not cancelled; they finish
  /// in the background and their results are dropped.
  pub fn run_all_with(
    &self,
    options: RunOptions,
  ) -> impl Future<Output = Result<Vec<T>, RunError<E>>> + Send + 'static {
    let claim = self.claim_run(RunStrategy::FailFast, options);
    async move {
      let (guard, ctx) = claim?;
      let span = ctx.span(RunStrategy::FailFast);
      ctx.fail_fast(guard).instrument(span).await
    }
  }

  /// Collect-all run with the runner's default options.
  ///
  /// See [`run_all_settled_with`](Self::run_all_settled_with).
  pub fn run_all_settled(
    &self,
  ) -> impl Future<Output = Result<Vec<Outcome<T, E>>, BatchError>> + Send + 'static {
    self.run_all_settled_with(RunOptions::default())
  }

  /// Executes every queued task, waits for all of them, and returns one
  /// [`Outcome`] per task in queue order. Task failures never fail the run.
  ///
  /// # Errors
  /// Returns `BatchError::AlreadyRunning` if another run is in progress. As with
  /// [`run_all_with`](Self::run_all_with), the run is claimed at call time.
  pub fn run_all_settled_with(
    &self,
    options: RunOptions,
  ) -> impl Future<Output = Result<Vec<Outcome<T, E>>, BatchError>> + Send + 'static {
    let claim = self.claim_run(RunStrategy::CollectAll, options);
    async move {
      let (guard, ctx) = claim?;
      let span = ctx.span(RunStrategy::CollectAll);
      Ok(ctx.collect_all(guard).instrument(span).await)
    }
  }

  async fn run_if_threshold_reached(&self, auto_run: Option<AutoRunOptions>) -> Result<(), RunError<E>> {
    let Some(auto_run) = auto_run.or(self.options.auto_run) else {
      return Ok(());
    };
    let queued = self.size();
    if !auto_run.is_reached(queued) {
      return Ok(());
    }

    debug!(
      runner_name = %self.runner_name,
      queued,
      threshold = auto_run.threshold,
      strategy = ?auto_run.strategy,
      "Auto-run threshold reached."
    );
    match auto_run.strategy {
      RunStrategy::FailFast => self.run_all().await.map(|_| ()),
      RunStrategy::CollectAll => self.run_all_settled().await.map(|_| ()).map_err(RunError::from),
    }
  }

  fn claim_run(
    &self,
    strategy: RunStrategy,
    options: RunOptions,
  ) -> Result<(RunGuard<T, E>, RunContext), BatchError> {
    let guard = match self.queue.begin_run() {
      Ok(guard) => guard,
      Err(e) => {
        warn!(runner_name = %self.runner_name, ?strategy, "Run requested while another run is in progress.");
        return Err(e);
      }
    };

    let ctx = RunContext {
      runner_name: self.runner_name.clone(),
      run_id: NEXT_RUN_ID_COUNTER.fetch_add(1, AtomicOrdering::Relaxed),
      gate: self.gate.clone(),
      tokio_handle: self.tokio_handle.clone(),
      poll_interval: options.poll_interval.unwrap_or(self.options.poll_interval),
    };
    Ok((guard, ctx))
  }
}

/// Everything a run needs once it has claimed the queue. Owned, so run futures
/// are `'static` and outlive borrows of the runner.
struct RunContext {
  runner_name: Arc<String>,
  run_id: u64,
  gate: Arc<CapacityGate>,
  tokio_handle: TokioHandle,
  poll_interval: Duration,
}

impl RunContext {
  fn span(&self, strategy: RunStrategy) -> tracing::Span {
    info_span!(
      "batch_run",
      runner_name = %*self.runner_name,
      run_id = self.run_id,
      strategy = ?strategy
    )
  }

  async fn fail_fast<T, E>(self, guard: RunGuard<T, E>) -> Result<Vec<T>, RunError<E>>
  where
    T: Send + 'static,
    E: Send + 'static,
  {
    let started = Instant::now();
    let handles = self.spawn_all(guard.take_tasks());
    let total = handles.len();

    let mut pending: FuturesUnordered<_> = handles
      .into_iter()
      .enumerate()
      .map(|(task_index, handle)| async move { (task_index, handle.await) })
      .collect();
    let mut values: Vec<Option<T>> = (0..total).map(|_| None).collect();

    while let Some((task_index, joined)) = pending.next().await {
      let failure = match joined {
        Ok(Ok(value)) => {
          values[task_index] = Some(value);
          continue;
        }
        Ok(Err(task_error)) => RunError::Task(task_error),
        Err(join_error) => Self::join_failure(task_index, join_error),
      };

      // Dropping `pending` detaches the remaining join handles; their tasks
      // keep running to completion.
      info!(
        task_index,
        still_in_flight = pending.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Task failed, failing run."
      );
      return Err(failure);
    }

    info!(total, elapsed_ms = started.elapsed().as_millis() as u64, "Run completed, all tasks fulfilled.");
    drop(guard);
    Ok(values.into_iter().flatten().collect())
  }

  async fn collect_all<T, E>(self, guard: RunGuard<T, E>) -> Vec<Outcome<T, E>>
  where
    T: Send + 'static,
    E: Send + 'static,
  {
    let started = Instant::now();
    let handles = self.spawn_all(guard.take_tasks());

    let outcomes: Vec<Outcome<T, E>> = join_all(handles)
      .await
      .into_iter()
      .enumerate()
      .map(|(task_index, joined)| match joined {
        Ok(result) => Outcome::from(result),
        Err(join_error) if join_error.is_panic() => {
          warn!(task_index, "Task panicked during execution.");
          Outcome::Panicked
        }
        Err(_) => {
          warn!(task_index, "Task was aborted before it settled.");
          Outcome::Aborted
        }
      })
      .collect();

    let fulfilled = outcomes.iter().filter(|o| o.is_fulfilled()).count();
    info!(
      total = outcomes.len(),
      fulfilled,
      elapsed_ms = started.elapsed().as_millis() as u64,
      "Run completed, all tasks settled."
    );
    drop(guard);
    outcomes
  }

  /// Spawns every task behind the admission gate. Each task invokes its
  /// factory only once admitted, and holds its slot until it settles.
  fn spawn_all<T, E>(&self, tasks: Vec<Task<T, E>>) -> Vec<JoinHandle<Result<T, E>>>
  where
    T: Send + 'static,
    E: Send + 'static,
  {
    info!(
      tasks = tasks.len(),
      concurrency_limit = self.gate.limit(),
      running = self.gate.running(),
      "Starting run."
    );

    tasks
      .into_iter()
      .enumerate()
      .map(|(task_index, task)| {
        let gate = self.gate.clone();
        let poll_interval = self.poll_interval;
        self.tokio_handle.spawn(
          async move {
            let _permit = gate.acquire(poll_interval).await;
            debug!(running = gate.running(), "Task admitted.");
            let result = task().await;
            trace!(fulfilled = result.is_ok(), "Task settled.");
            result
          }
          .instrument(info_span!(
            "batch_task",
            runner_name = %*self.runner_name,
            run_id = self.run_id,
            task_index
          )),
        )
      })
      .collect()
  }

  fn join_failure<E>(task_index: usize, join_error: JoinError) -> RunError<E> {
    if join_error.is_panic() {
      warn!(task_index, "Task panicked during execution.");
      RunError::TaskPanicked { index: task_index }
    } else {
      warn!(task_index, "Task was aborted before it settled.");
      RunError::TaskAborted { index: task_index }
    }
  }
}
