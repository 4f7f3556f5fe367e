//! The mempool capability: a small, injected trait the gossip engine and
//! the block builder depend on. This crate never constructs the
//! transaction pool itself -- it is an external collaborator -- but ships
//! a `DashMap`-backed `MemoryMempool` reference implementation for its own
//! tests.

use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::primitives::Hash;

/// A transaction fingerprint, its serialized bytes, and its submission
/// time.
#[derive(Debug, Clone)]
pub struct MempoolEntry {
  pub id: Hash,
  pub bytes: Vec<u8>,
  pub submitted_at: u64,
}

/// A filter over the pending set, e.g. a minimum gas tip. Opaque to this
/// crate; the concrete execution layer interprets it.
#[derive(Debug, Clone, Copy, Default)]
pub struct GasFilter {
  pub min_tip: u64,
}

/// Event broadcast whenever new transactions are accepted into the pool,
/// the wakeup source for the block builder and the push gossiper.
#[derive(Debug, Clone)]
pub struct NewTxsEvent {
  pub ids: Vec<Hash>,
}

/// The capability set this crate depends on: add, has, iterate,
/// subscribe, pending-size. Order of iteration is not guaranteed.
pub trait Mempool: Send + Sync {
  fn add(&self, txs: Vec<MempoolEntry>) -> Vec<Hash>;
  fn has(&self, id: &Hash) -> bool;
  fn iterate(&self, f: &mut dyn FnMut(&MempoolEntry));
  fn subscribe(&self) -> broadcast::Receiver<NewTxsEvent>;
  fn pending_size(&self, filter: GasFilter) -> usize;
  fn remove(&self, ids: &[Hash]);
}

fn now() -> u64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_secs())
    .unwrap_or(0)
}

/// A `DashMap`-backed mempool: lock-free reads and writes across shards,
/// with a broadcast channel fanning out new-tx notifications.
pub struct MemoryMempool {
  entries: DashMap<Hash, MempoolEntry>,
  events: broadcast::Sender<NewTxsEvent>,
}

impl Default for MemoryMempool {
  fn default() -> Self {
    let (events, _) = broadcast::channel(1024);
    Self { entries: DashMap::new(), events }
  }
}

impl MemoryMempool {
  pub fn new() -> Self {
    Self::default()
  }
}

impl Mempool for MemoryMempool {
  fn add(&self, txs: Vec<MempoolEntry>) -> Vec<Hash> {
    let mut added = Vec::new();
    for mut tx in txs {
      if self.entries.contains_key(&tx.id) {
        continue;
      }
      tx.submitted_at = now();
      added.push(tx.id);
      self.entries.insert(tx.id, tx);
    }
    if !added.is_empty() {
      // broadcast has no subscribers during early startup; a send error
      // just means nobody is listening yet, which is fine.
      let _ = self.events.send(NewTxsEvent { ids: added.clone() });
    }
    added
  }

  fn has(&self, id: &Hash) -> bool {
    self.entries.contains_key(id)
  }

  fn iterate(&self, f: &mut dyn FnMut(&MempoolEntry)) {
    for entry in self.entries.iter() {
      f(entry.value());
    }
  }

  fn subscribe(&self) -> broadcast::Receiver<NewTxsEvent> {
    self.events.subscribe()
  }

  fn pending_size(&self, _filter: GasFilter) -> usize {
    self.entries.len()
  }

  fn remove(&self, ids: &[Hash]) {
    for id in ids {
      self.entries.remove(id);
    }
  }
}
