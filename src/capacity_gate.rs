use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::trace;

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Admission gate that bounds how many tasks may execute at once.
///
/// The check "is `running` below `limit`" and the increment of `running` are a
/// single compare-and-swap, so concurrent acquirers can never overshoot the
/// limit. The limit itself may change at any time; it is re-read on every
/// admission attempt. Lowering it does not evict holders of existing permits.
///
/// Waiters are woken by `release` (one at a time) and by `set_limit` when the
/// limit grows (all of them). Independently of notifications, every waiter
/// re-checks the gate once per poll interval.
pub(crate) struct CapacityGate {
  limit: AtomicUsize,
  running: AtomicUsize,
  notify: Notify,
}

impl fmt::Debug for CapacityGate {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CapacityGate")
      .field("limit", &self.limit())
      .field("running", &self.running())
      .finish_non_exhaustive()
  }
}

/// A slot held on a `CapacityGate`. Dropping it releases the slot, which
/// covers every exit path of the holder, including unwinding.
#[derive(Debug)]
pub(crate) struct GatePermit {
  gate: Arc<CapacityGate>,
}

impl Drop for GatePermit {
  fn drop(&mut self) {
    self.gate.release();
  }
}

impl CapacityGate {
  pub(crate) fn new(limit: usize) -> Self {
    Self {
      limit: AtomicUsize::new(limit),
      running: AtomicUsize::new(0),
      notify: Notify::new(),
    }
  }

  pub(crate) fn limit(&self) -> usize {
    self.limit.load(Ordering::Acquire)
  }

  /// Replaces the limit. Callers validate that `limit >= 1`.
  pub(crate) fn set_limit(&self, limit: usize) {
    let previous = self.limit.swap(limit, Ordering::AcqRel);
    if limit > previous {
      // Several waiters may now fit at once.
      self.notify.notify_waiters();
    }
  }

  /// Number of permits currently held.
  pub(crate) fn running(&self) -> usize {
    self.running.load(Ordering::Acquire)
  }

  /// Takes a slot if one is free right now.
  pub(crate) fn try_acquire(self: &Arc<Self>) -> Option<GatePermit> {
    let mut current = self.running.load(Ordering::Acquire);
    loop {
      if current >= self.limit() {
        return None;
      }
      match self
        .running
        .compare_exchange_weak(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
      {
        Ok(_) => return Some(GatePermit { gate: self.clone() }),
        Err(actual) => current = actual,
      }
    }
  }

  /// Waits until a slot is free and takes it. Never fails, only delays.
  pub(crate) async fn acquire(self: &Arc<Self>, poll_interval: Duration) -> GatePermit {
    let poll_interval = poll_interval.max(MIN_POLL_INTERVAL);
    loop {
      // Register interest before checking so a release between the check and
      // the await is not missed.
      let notified = self.notify.notified();
      tokio::pin!(notified);
      notified.as_mut().enable();

      if let Some(permit) = self.try_acquire() {
        return permit;
      }

      trace!(
        running = self.running(),
        limit = self.limit(),
        "Gate full, waiting for a free slot."
      );
      // An elapsed timeout just means the next iteration re-checks the gate.
      let _ = tokio::time::timeout(poll_interval, notified).await;
    }
  }

  /// Frees one slot. Only `GatePermit::drop` calls this.
  fn release(&self) {
    let previous = self.running.fetch_sub(1, Ordering::AcqRel);
    debug_assert!(previous > 0, "CapacityGate released more often than acquired");
    self.notify.notify_one();
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const POLL: Duration = Duration::from_millis(100);

  #[tokio::test]
  async fn test_acquire_within_limit_is_immediate() {
    let gate = Arc::new(CapacityGate::new(2));

    let p1 = gate.acquire(POLL).await;
    let p2 = gate.acquire(POLL).await;
    assert_eq!(gate.running(), 2);
    assert!(gate.try_acquire().is_none());

    drop(p1);
    assert_eq!(gate.running(), 1);
    drop(p2);
    assert_eq!(gate.running(), 0);
  }

  #[tokio::test]
  async fn test_release_wakes_waiter_before_poll_interval() {
    let gate = Arc::new(CapacityGate::new(1));
    let held = gate.acquire(POLL).await;

    let waiter = {
      let gate = gate.clone();
      tokio::spawn(async move {
        let _permit = gate.acquire(Duration::from_secs(3600)).await;
      })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!waiter.is_finished(), "Waiter should block while the gate is full.");

    drop(held);
    tokio::time::timeout(Duration::from_millis(500), waiter)
      .await
      .expect("Waiter was not woken by release.")
      .unwrap();
    assert_eq!(gate.running(), 0);
  }

  #[tokio::test]
  async fn test_lowering_limit_does_not_evict() {
    let gate = Arc::new(CapacityGate::new(3));
    let permits: Vec<_> = (0..3).map(|_| gate.try_acquire().unwrap()).collect();

    gate.set_limit(1);
    assert_eq!(gate.running(), 3);
    assert!(gate.try_acquire().is_none());

    let mut permits = permits.into_iter();
    drop(permits.next());
    assert!(gate.try_acquire().is_none(), "2 running, limit 1: still full.");
    drop(permits.next());
    assert!(gate.try_acquire().is_none(), "1 running, limit 1: still full.");
    drop(permits.next());
    assert!(gate.try_acquire().is_some());
  }

  #[tokio::test]
  async fn test_raising_limit_wakes_all_waiters() {
    let gate = Arc::new(CapacityGate::new(1));
    let _held = gate.acquire(POLL).await;

    let mut waiters = Vec::new();
    for _ in 0..3 {
      let gate = gate.clone();
      waiters.push(tokio::spawn(async move {
        // Keep the permit so the running count reflects every admission.
        std::mem::forget(gate.acquire(Duration::from_secs(3600)).await);
      }));
    }

    tokio::time::sleep(Duration::from_millis(20)).await;
    gate.set_limit(4);

    for waiter in waiters {
      tokio::time::timeout(Duration::from_millis(500), waiter)
        .await
        .expect("Waiter was not woken by limit increase.")
        .unwrap();
    }
    assert_eq!(gate.running(), 4);
  }

  #[tokio::test(start_paused = true)]
  async fn test_poll_interval_rechecks_without_notification() {
    let gate = Arc::new(CapacityGate::new(1));
    let held = gate.try_acquire().unwrap();

    let waiter = {
      let gate = gate.clone();
      tokio::spawn(async move { gate.acquire(Duration::from_millis(50)).await })
    };
    tokio::task::yield_now().await;

    // Free the slot behind the notifier's back: the waiter must still get in
    // on its next poll.
    std::mem::forget(held);
    gate.running.fetch_sub(1, Ordering::AcqRel);

    let permit = tokio::time::timeout(Duration::from_millis(200), waiter)
      .await
      .expect("Waiter did not re-check on its poll interval.")
      .unwrap();
    assert_eq!(gate.running(), 1);
    drop(permit);
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
  async fn test_concurrent_acquirers_never_exceed_limit() {
    let gate = Arc::new(CapacityGate::new(3));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..32 {
      let gate = gate.clone();
      let peak = peak.clone();
      handles.push(tokio::spawn(async move {
        let _permit = gate.acquire(Duration::from_millis(5)).await;
        peak.fetch_max(gate.running(), Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(2)).await;
      }));
    }
    for handle in handles {
      handle.await.unwrap();
    }

    assert!(peak.load(Ordering::SeqCst) <= 3);
    assert_eq!(gate.running(), 0);
  }
}
