//! Per-peer sliding-window limiter wrapping pull-request responses.
//! Requests from non-validators are dropped by the caller before reaching
//! this limiter; this type only enforces the rate budget.

use std::{
  collections::VecDeque,
  time::{Duration, Instant},
};

use dashmap::DashMap;

use crate::network::NodeId;

struct Window {
  hits: VecDeque<Instant>,
}

/// Allows at most `limit` requests per peer within a rolling `period`.
pub struct Throttle {
  period: Duration,
  limit: usize,
  windows: DashMap<NodeId, Window>,
}

impl Throttle {
  pub fn new(period: Duration, limit: usize) -> Self {
    Self { period, limit, windows: DashMap::new() }
  }

  /// Returns `true` if the request is allowed and records it; `false` if
  /// the peer is over budget and the request should be dropped.
  pub fn allow(&self, peer: NodeId) -> bool {
    let now = Instant::now();
    let mut entry = self.windows.entry(peer).or_insert_with(|| Window { hits: VecDeque::new() });
    while let Some(&front) = entry.hits.front() {
      if now.duration_since(front) > self.period {
        entry.hits.pop_front();
      } else {
        break;
      }
    }
    if entry.hits.len() >= self.limit {
      return false;
    }
    entry.hits.push_back(now);
    true
  }
}

#[cfg(test)]
mod test {
  use super::*;

  fn node(tag: u8) -> NodeId {
    let mut n = [0u8; 32];
    n[0] = tag;
    n
  }

  #[test]
  fn allows_up_to_limit_then_drops() {
    let t = Throttle::new(Duration::from_secs(10), 2);
    let p = node(1);
    assert!(t.allow(p));
    assert!(t.allow(p));
    assert!(!t.allow(p));
  }

  #[test]
  fn peers_are_isolated() {
    let t = Throttle::new(Duration::from_secs(10), 1);
    assert!(t.allow(node(1)));
    assert!(t.allow(node(2)));
    assert!(!t.allow(node(1)));
  }

  #[test]
  fn window_expires_old_hits() {
    let t = Throttle::new(Duration::from_millis(20), 1);
    let p = node(1);
    assert!(t.allow(p));
    std::thread::sleep(Duration::from_millis(30));
    assert!(t.allow(p));
  }
}
