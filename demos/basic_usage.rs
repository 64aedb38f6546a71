use futures_throttle::{BatchRunner, RunError, RunnerOptions};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::info;

async fn my_task_fn(id: usize, delay_ms: u64) -> Result<String, String> {
  info!("Task {} starting, will sleep for {}ms", id, delay_ms);
  tokio::time::sleep(Duration::from_millis(delay_ms)).await;
  let result = format!("Task {} finished successfully after {}ms", id, delay_ms);
  info!("{}", result);
  Ok(result)
}

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false) // Disable module paths for cleaner example output
    .init();

  info!("--- Basic Usage Example ---");

  let runner = BatchRunner::<String, String>::new(2, RunnerOptions::default(), Handle::current(), "basic_runner");

  for i in 0..5 {
    // Alternate sleep times for variety
    let sleep_duration: u64 = 500 + (i as u64 % 3 * 250);
    runner
      .add(move || my_task_fn(i, sleep_duration))
      .expect("Runner is idle, add cannot fail");
  }

  info!("{} tasks queued. Running...", runner.size());

  match runner.run_all().await {
    Ok(results) => {
      for (i, result) in results.iter().enumerate() {
        info!("Result for task {}: {}", i, result);
      }
    }
    Err(RunError::Task(reason)) => info!("A task failed: {}", reason),
    Err(e) => info!("Run failed: {}", e),
  }

  info!("Queue after run: {} tasks.", runner.size());
  info!("--- Basic Usage Example End ---");
}
