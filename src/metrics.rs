//! An injectable metrics registry.
//!
//! The Design Notes call out that the metrics registry must not be a
//! process-wide singleton: every component that wants to record a counter
//! or gauge receives a `Metrics` handle at construction, the same way the
//! teacher passes `Arc<DashMap<..>>` state into its components rather than
//! reaching for `lazy_static`.

use std::sync::{
  atomic::{AtomicI64, AtomicU64, Ordering},
  Arc,
};

use dashmap::DashMap;

#[derive(Debug, Default)]
struct Counter(AtomicU64);
#[derive(Debug, Default)]
struct Gauge(AtomicI64);

/// A cheap-to-clone handle to a set of named counters and gauges.
#[derive(Clone, Default)]
pub struct Metrics {
  counters: Arc<DashMap<&'static str, Counter>>,
  gauges: Arc<DashMap<&'static str, Gauge>>,
}

impl Metrics {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn incr(&self, name: &'static str) {
    self.incr_by(name, 1);
  }

  pub fn incr_by(&self, name: &'static str, delta: u64) {
    self
      .counters
      .entry(name)
      .or_default()
      .0
      .fetch_add(delta, Ordering::Relaxed);
  }

  pub fn counter(&self, name: &'static str) -> u64 {
    self
      .counters
      .get(name)
      .map(|c| c.0.load(Ordering::Relaxed))
      .unwrap_or(0)
  }

  pub fn set_gauge(&self, name: &'static str, value: i64) {
    self
      .gauges
      .entry(name)
      .or_default()
      .0
      .store(value, Ordering::Relaxed);
  }

  pub fn gauge(&self, name: &'static str) -> i64 {
    self
      .gauges
      .get(name)
      .map(|g| g.0.load(Ordering::Relaxed))
      .unwrap_or(0)
  }
}

#[cfg(test)]
mod test {
  use super::Metrics;

  #[test]
  fn counters_accumulate_independently() {
    let m = Metrics::new();
    m.incr("blocks_accepted");
    m.incr("blocks_accepted");
    m.incr("blocks_rejected");
    assert_eq!(m.counter("blocks_accepted"), 2);
    assert_eq!(m.counter("blocks_rejected"), 1);
    assert_eq!(m.counter("unknown"), 0);
  }

  #[test]
  fn gauges_overwrite() {
    let m = Metrics::new();
    m.set_gauge("mempool_size", 10);
    m.set_gauge("mempool_size", 3);
    assert_eq!(m.gauge("mempool_size"), 3);
  }

  #[test]
  fn cloned_handles_share_state() {
    let m = Metrics::new();
    let clone = m.clone();
    clone.incr("x");
    assert_eq!(m.counter("x"), 1);
  }
}
