//! Push gossiper: periodically flushes recently-added local transactions
//! to a sampled set of validators. Only locally-submitted txs are
//! eligible -- txs received via gossip are never re-pushed.

use std::{
  collections::VecDeque,
  sync::Arc,
  time::Duration,
};

use parking_lot::Mutex;
use tracing::debug;

use super::validators::ValidatorSet;
use crate::{
  mempool::{Mempool, MempoolEntry},
  network::{NodeId, Sender},
  primitives::Hash,
};

const RECENTLY_DISCARDED_CAPACITY: usize = 4096;

/// Tracks local-origin txs eligible for push and a bounded ring of
/// recently-discarded ids to avoid immediately re-pushing evicted entries.
pub struct PushGossiper<S: Sender> {
  mempool: Arc<dyn Mempool>,
  sender: Arc<S>,
  local_origin: Mutex<VecDeque<Hash>>,
  discarded: Mutex<VecDeque<Hash>>,
  num_validators: usize,
  num_peers: usize,
  stake_percentage: f64,
}

impl<S: Sender> PushGossiper<S> {
  pub fn new(
    mempool: Arc<dyn Mempool>,
    sender: Arc<S>,
    num_validators: usize,
    num_peers: usize,
    stake_percentage: f64,
  ) -> Self {
    Self {
      mempool,
      sender,
      local_origin: Mutex::new(VecDeque::new()),
      discarded: Mutex::new(VecDeque::new()),
      num_validators,
      num_peers,
      stake_percentage,
    }
  }

  /// Records a tx as eligible for push -- only called for the local API
  /// submission path, never for gossip-received txs.
  pub fn record_local(&self, id: Hash) {
    let mut q = self.local_origin.lock();
    q.push_back(id);
    if q.len() > RECENTLY_DISCARDED_CAPACITY {
      q.pop_front();
    }
  }

  /// Marks a tx id as discarded (e.g. evicted from the mempool) so it is
  /// not re-pushed immediately after.
  pub fn record_discarded(&self, id: Hash) {
    let mut q = self.discarded.lock();
    q.push_back(id);
    if q.len() > RECENTLY_DISCARDED_CAPACITY {
      q.pop_front();
    }
  }

  fn was_recently_discarded(&self, id: &Hash) -> bool {
    self.discarded.lock().contains(id)
  }

  /// One push cycle: drains locally-originated ids not recently discarded
  /// and not already known-absent, and gossips them to sampled targets.
  pub async fn tick(&self, validators: &ValidatorSet) {
    let ids: Vec<Hash> = {
      let mut q = self.local_origin.lock();
      std::mem::take(&mut *q).into_iter().collect()
    };
    if ids.is_empty() {
      return;
    }

    let mut payload_ids = Vec::new();
    let mut payload_bytes = Vec::new();
    self.mempool.iterate(&mut |entry: &MempoolEntry| {
      if ids.contains(&entry.id) && !self.was_recently_discarded(&entry.id) {
        payload_ids.push(entry.id);
        payload_bytes.push(entry.bytes.clone());
      }
    });
    if payload_ids.is_empty() {
      return;
    }

    let targets: Vec<NodeId> = {
      let primary = validators.primary_target(self.stake_percentage);
      let mut sampled = validators.sample(self.num_validators, self.num_peers);
      if let Some(p) = primary {
        if !sampled.contains(&p) {
          sampled.insert(0, p);
        }
      }
      sampled
    };

    debug!(count = payload_ids.len(), targets = targets.len(), "push gossip tick");
    let payload = bincode::serialize(&payload_bytes).unwrap_or_default();
    if !targets.is_empty() {
      self.sender.send_app_gossip_specific(targets, payload).await;
    }
  }

  /// Runs the push loop until `cancel` signals shutdown.
  pub async fn run(
    self: Arc<Self>,
    validators: Arc<parking_lot::RwLock<ValidatorSet>>,
    frequency: Duration,
    mut cancel: tokio::sync::watch::Receiver<bool>,
  ) {
    let mut ticker = tokio::time::interval(frequency);
    loop {
      tokio::select! {
        _ = ticker.tick() => {
          let snapshot = validators.read().clone();
          self.tick(&snapshot).await;
        }
        _ = cancel.changed() => {
          if *cancel.borrow() {
            break;
          }
        }
      }
    }
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::{
    gossip::validators::Validator,
    mempool::MemoryMempool,
    network::sender::RecordingSender,
  };

  fn node(tag: u8) -> NodeId {
    let mut n = [0u8; 32];
    n[0] = tag;
    n
  }

  #[tokio::test]
  async fn pushes_only_local_origin_txs() {
    let mempool = Arc::new(MemoryMempool::new());
    let sender = Arc::new(RecordingSender::default());
    let gossiper = PushGossiper::new(Arc::clone(&mempool) as _, Arc::clone(&sender), 5, 0, 0.15);

    let local_id = Hash::keccak256(b"local-tx");
    let remote_id = Hash::keccak256(b"remote-tx");
    mempool.add(vec![
      MempoolEntry { id: local_id, bytes: vec![1], submitted_at: 0 },
      MempoolEntry { id: remote_id, bytes: vec![2], submitted_at: 0 },
    ]);
    gossiper.record_local(local_id);
    // remote_id deliberately not recorded as local-origin

    let validators = ValidatorSet::new(vec![Validator { node: node(1), stake: 10 }], vec![]);
    gossiper.tick(&validators).await;

    let gossips = sender.targeted_gossips.lock();
    assert_eq!(gossips.len(), 1);
    let decoded: Vec<Vec<u8>> = bincode::deserialize(&gossips[0].1).unwrap();
    assert_eq!(decoded, vec![vec![1u8]]);
  }

  #[tokio::test]
  async fn recently_discarded_ids_are_skipped() {
    let mempool = Arc::new(MemoryMempool::new());
    let sender = Arc::new(RecordingSender::default());
    let gossiper = PushGossiper::new(Arc::clone(&mempool) as _, Arc::clone(&sender), 5, 0, 0.15);
    let id = Hash::keccak256(b"tx");
    mempool.add(vec![MempoolEntry { id, bytes: vec![9], submitted_at: 0 }]);
    gossiper.record_local(id);
    gossiper.record_discarded(id);

    let validators = ValidatorSet::new(vec![Validator { node: node(1), stake: 10 }], vec![]);
    gossiper.tick(&validators).await;
    assert!(sender.targeted_gossips.lock().is_empty());
  }
}
