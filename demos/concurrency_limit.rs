use futures_throttle::{BatchRunner, RunnerOptions};
use std::convert::Infallible;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tracing::info;

async fn long_task_fn(id: usize) -> Result<String, Infallible> {
  info!("Task {} starting (concurrency test - should take 1s)", id);
  tokio::time::sleep(Duration::from_secs(1)).await;
  let result = format!("Task {} finished", id);
  info!("{}", result);
  Ok(result)
}

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();

  info!("--- Concurrency Limit Example (Limit: 2) ---");

  let concurrency_limit = 2;
  let runner = BatchRunner::<String, Infallible>::new(
    concurrency_limit,
    RunnerOptions::default(),
    Handle::current(),
    "concurrency_runner",
  );

  let num_tasks = 5;
  info!(
    "Queueing {} tasks, each takes 1 sec. With concurrency {}, this should take ~{} secs.",
    num_tasks,
    concurrency_limit,
    (num_tasks as f32 / concurrency_limit as f32).ceil()
  );

  runner
    .add_many((0..num_tasks).map(|i| move || long_task_fn(i)))
    .expect("Runner is idle, add cannot fail");

  let started = Instant::now();
  let results = runner.run_all().await.expect("Tasks are infallible");
  for result in results {
    info!("Received result: {}", result);
  }
  info!("All tasks processed in {:?}.", started.elapsed());

  info!("Raising the limit to {} and running again.", num_tasks);
  runner.set_concurrency_limit(num_tasks).expect("Limit is positive");
  runner
    .add_many((0..num_tasks).map(|i| move || long_task_fn(i)))
    .expect("Runner is idle, add cannot fail");

  let started = Instant::now();
  runner.run_all().await.expect("Tasks are infallible");
  info!("Second batch processed in {:?}.", started.elapsed());
  info!("--- Concurrency Limit Example End ---");
}
