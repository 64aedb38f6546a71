use futures_throttle::{task, BatchRunner, Outcome, RunnerOptions, Task};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::info;

fn fetch(id: u32, delay_ms: u64, fail: bool) -> Task<String, String> {
  task(move || async move {
    info!("Fetch {}: starting.", id);
    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    if fail {
      Err(format!("fetch {} returned 503", id))
    } else {
      Ok(format!("payload {}", id))
    }
  })
}

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();

  info!("--- Settled Batch Example ---");

  let runner = BatchRunner::<String, String>::new(3, RunnerOptions::default(), Handle::current(), "settled_runner");

  runner
    .add_many(vec![
      fetch(1, 300, false),
      fetch(2, 100, true),
      fetch(3, 200, false),
      fetch(4, 50, true),
      fetch(5, 150, false),
    ])
    .expect("Runner is idle, add cannot fail");

  let outcomes = runner.run_all_settled().await.expect("No other run in progress");
  for (i, outcome) in outcomes.into_iter().enumerate() {
    match outcome {
      Outcome::Fulfilled(value) => info!("Task {}: fulfilled with {:?}", i, value),
      Outcome::Rejected(reason) => info!("Task {}: rejected with {:?}", i, reason),
      other => info!("Task {}: {:?}", i, other),
    }
  }

  info!("--- Settled Batch Example End ---");
}
