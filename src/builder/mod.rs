//! The block builder: a single-chain, cooperative wait/notify scheduler.
//! `wait_for_event` returns once the mempool reports pending work under
//! the gas-tip filter *and* the minimum retry delay has elapsed since the
//! last successful build.
//!
//! The wait is really a select over three sources -- a tx-arrival wakeup,
//! cancellation, and delay-elapsed -- which a plain channel can't express
//! directly. `parking_lot`'s `Condvar` gives that: any of the three paths
//! can notify the same condition, and the waiter re-checks the predicate
//! on every wakeup instead of trusting which source fired.

use std::{
  sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
  },
  time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};
use tracing::debug;

use crate::mempool::{GasFilter, Mempool};

#[derive(Debug, PartialEq, Eq)]
pub enum BuildEvent {
  PendingTxs,
  Cancelled,
}

struct Shared {
  last_build: Mutex<Instant>,
  cancelled: AtomicBool,
  condvar: Condvar,
  /// Guards the predicate re-check on every wakeup; paired with `condvar`.
  lock: Mutex<()>,
}

/// Exposes `wait_for_event`; not safe for concurrent callers -- at most
/// one consensus tick is waiting on this at a time.
pub struct BlockBuilder {
  shared: Arc<Shared>,
  mempool: Arc<dyn Mempool>,
  min_retry_delay: Duration,
  gas_filter: GasFilter,
  _subscriber: tokio::task::JoinHandle<()>,
}

impl BlockBuilder {
  pub fn new(
    mempool: Arc<dyn Mempool>,
    min_retry_delay: Duration,
    gas_filter: GasFilter,
  ) -> Self {
    let shared = Arc::new(Shared {
      last_build: Mutex::new(
        Instant::now()
          .checked_sub(min_retry_delay)
          .unwrap_or_else(Instant::now),
      ),
      cancelled: AtomicBool::new(false),
      condvar: Condvar::new(),
      lock: Mutex::new(()),
    });

    let mut rx = mempool.subscribe();
    let notify_shared = Arc::clone(&shared);
    let subscriber = tokio::spawn(async move {
      loop {
        match rx.recv().await {
          Ok(_event) => {
            let _guard = notify_shared.lock.lock();
            notify_shared.condvar.notify_all();
          }
          Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {
            let _guard = notify_shared.lock.lock();
            notify_shared.condvar.notify_all();
          }
          Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
      }
    });

    Self {
      shared,
      mempool,
      min_retry_delay,
      gas_filter,
      _subscriber: subscriber,
    }
  }

  /// A cooperative cancellation handle: calling this wakes any blocked
  /// `wait_for_event` with `BuildEvent::Cancelled`.
  pub fn cancel(&self) {
    self.shared.cancelled.store(true, Ordering::SeqCst);
    let _guard = self.shared.lock.lock();
    self.shared.condvar.notify_all();
  }

  fn needs_to_build(&self) -> bool {
    if self.shared.cancelled.load(Ordering::SeqCst) {
      return true; // wake up regardless; caller observes cancellation
    }
    let elapsed = self.shared.last_build.lock().elapsed() >= self.min_retry_delay;
    elapsed && self.mempool.pending_size(self.gas_filter) > 0
  }

  /// Blocks until the mempool has pending work and the retry delay has
  /// elapsed, or until cancelled. Re-checks the predicate on every wakeup.
  pub async fn wait_for_event(&self) -> BuildEvent {
    loop {
      if self.shared.cancelled.load(Ordering::SeqCst) {
        return BuildEvent::Cancelled;
      }
      if self.needs_to_build() {
        return BuildEvent::PendingTxs;
      }

      // Wait on the condvar with a bounded timeout so we also wake up once
      // the retry delay elapses even with no new tx event.
      let remaining = {
        let last = *self.shared.last_build.lock();
        self.min_retry_delay.saturating_sub(last.elapsed())
      };
      let wait_for = remaining.max(Duration::from_millis(10));
      let shared = Arc::clone(&self.shared);
      let woke = tokio::task::spawn_blocking(move || {
        let mut guard = shared.lock.lock();
        let result = shared.condvar.wait_for(&mut guard, wait_for);
        !result.timed_out()
      })
      .await
      .unwrap_or(false);
      let _ = woke;
    }
  }

  /// Must be called immediately after a build completes, resetting the
  /// delay clock.
  pub fn handle_generate_block(&self) {
    *self.shared.last_build.lock() = Instant::now();
    debug!("block built, resetting builder delay clock");
  }
}

#[cfg(test)]
mod test {
  use std::time::Duration;

  use super::*;
  use crate::mempool::{MemoryMempool, MempoolEntry};
  use crate::primitives::Hash;

  #[tokio::test(flavor = "multi_thread")]
  async fn waits_until_mempool_has_work() {
    let mempool: Arc<dyn Mempool> = Arc::new(MemoryMempool::new());
    let builder = Arc::new(BlockBuilder::new(
      Arc::clone(&mempool),
      Duration::from_millis(0),
      GasFilter::default(),
    ));

    let b2 = Arc::clone(&builder);
    let wait = tokio::spawn(async move { b2.wait_for_event().await });

    tokio::time::sleep(Duration::from_millis(20)).await;
    mempool.add(vec![MempoolEntry {
      id: Hash::keccak256(b"tx"),
      bytes: vec![1],
      submitted_at: 0,
    }]);

    let event = tokio::time::timeout(Duration::from_secs(2), wait)
      .await
      .expect("did not resolve in time")
      .unwrap();
    assert_eq!(event, BuildEvent::PendingTxs);
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn cancellation_wakes_the_waiter() {
    let mempool: Arc<dyn Mempool> = Arc::new(MemoryMempool::new());
    let builder = Arc::new(BlockBuilder::new(
      Arc::clone(&mempool),
      Duration::from_secs(60),
      GasFilter::default(),
    ));
    let b2 = Arc::clone(&builder);
    let wait = tokio::spawn(async move { b2.wait_for_event().await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    builder.cancel();
    let event = tokio::time::timeout(Duration::from_secs(2), wait)
      .await
      .expect("did not resolve in time")
      .unwrap();
    assert_eq!(event, BuildEvent::Cancelled);
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn respects_minimum_retry_delay() {
    let mempool: Arc<dyn Mempool> = Arc::new(MemoryMempool::new());
    mempool.add(vec![MempoolEntry {
      id: Hash::keccak256(b"tx"),
      bytes: vec![1],
      submitted_at: 0,
    }]);
    let builder = BlockBuilder::new(
      Arc::clone(&mempool),
      Duration::from_millis(200),
      GasFilter::default(),
    );
    builder.handle_generate_block();
    let start = Instant::now();
    let event = builder.wait_for_event().await;
    assert_eq!(event, BuildEvent::PendingTxs);
    assert!(start.elapsed() >= Duration::from_millis(180));
  }
}
