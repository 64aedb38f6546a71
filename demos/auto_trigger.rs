use futures_throttle::{AutoRunOptions, BatchRunner, RunStrategy, RunnerOptions};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::info;

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::INFO)
    .with_target(false)
    .init();

  info!("--- Auto Trigger Example (batches of 4) ---");

  let options = RunnerOptions::default().with_auto_run(AutoRunOptions::new(RunStrategy::CollectAll, 4));
  let runner = BatchRunner::<(), String>::new(2, options, Handle::current(), "auto_trigger_runner");
  let processed = Arc::new(AtomicUsize::new(0));

  for i in 0..10u64 {
    let counter = processed.clone();
    // Awaited before the next add: a triggered run holds the queue until it finishes.
    runner
      .add_with_auto_trigger(
        move || async move {
          tokio::time::sleep(Duration::from_millis(50 + i * 10)).await;
          counter.fetch_add(1, Ordering::SeqCst);
          Ok(())
        },
        None,
      )
      .await
      .expect("Collect-all runs never fail on task errors");
    info!("Added item {}: queued {}, processed {}", i, runner.size(), processed.load(Ordering::SeqCst));
  }

  info!("Flushing the remaining {} queued items.", runner.size());
  runner.run_all_settled().await.expect("No other run in progress");
  info!("Processed {} items in total.", processed.load(Ordering::SeqCst));
  info!("--- Auto Trigger Example End ---");
}
