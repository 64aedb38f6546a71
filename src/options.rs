use std::time::Duration;

/// Default interval at which a task waiting for admission re-checks the gate.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How the outcomes of a run are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStrategy {
  /// Fail with the first task rejection observed. See `BatchRunner::run_all`.
  FailFast,
  /// Wait for every task and report one `Outcome` each. See `BatchRunner::run_all_settled`.
  CollectAll,
}

/// Runs the queue automatically once it holds `threshold` tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoRunOptions {
  pub strategy: RunStrategy,
  /// Queue length that triggers a run. `0` is treated as `1`.
  pub threshold: usize,
}

impl AutoRunOptions {
  pub fn new(strategy: RunStrategy, threshold: usize) -> Self {
    Self { strategy, threshold }
  }

  pub(crate) fn is_reached(&self, queued: usize) -> bool {
    queued >= self.threshold.max(1)
  }
}

/// Construction-time defaults for a `BatchRunner`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunnerOptions {
  pub poll_interval: Duration,
  pub auto_run: Option<AutoRunOptions>,
}

impl Default for RunnerOptions {
  fn default() -> Self {
    Self {
      poll_interval: DEFAULT_POLL_INTERVAL,
      auto_run: None,
    }
  }
}

impl RunnerOptions {
  pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
    self.poll_interval = poll_interval;
    self
  }

  pub fn with_auto_run(mut self, auto_run: AutoRunOptions) -> Self {
    self.auto_run = Some(auto_run);
    self
  }
}

/// Per-call overrides for `run_all_with` / `run_all_settled_with`.
/// Unset fields fall back to the runner's `RunnerOptions`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
  pub poll_interval: Option<Duration>,
}

impl RunOptions {
  pub fn with_poll_interval(poll_interval: Duration) -> Self {
    Self {
      poll_interval: Some(poll_interval),
    }
  }
}
