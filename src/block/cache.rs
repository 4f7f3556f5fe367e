//! Maps block-id -> wrapped block across three tiers (decided, unverified,
//! missing) plus a bytes->id dedup index, enforcing that no id appears in
//! more than one tier at once.

use std::{
  collections::VecDeque,
  sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
  },
};

use dashmap::DashMap;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;

use super::wrapper::{Wrapper, WrapperError};
use crate::{
  execution::{ExecutionLayer, PrecompileRegistry},
  primitives::{EthBlock, Hash},
};

#[derive(Debug, Error)]
pub enum CacheError {
  #[error("block not found")]
  NotFound,
  #[error("parse error: {0}")]
  Parse(String),
  #[error(transparent)]
  Wrapper(#[from] WrapperError),
}

type WrapperHandle<E> = Arc<Wrapper<E>>;

/// A FIFO-evicted, byte- or count-budgeted tier.
struct BoundedTier<E: ExecutionLayer> {
  entries: DashMap<Hash, WrapperHandle<E>>,
  order: Mutex<VecDeque<Hash>>,
  bytes: AtomicU64,
  byte_budget: u64,
}

impl<E: ExecutionLayer> BoundedTier<E> {
  fn new(byte_budget: u64) -> Self {
    Self {
      entries: DashMap::new(),
      order: Mutex::new(VecDeque::new()),
      bytes: AtomicU64::new(0),
      byte_budget,
    }
  }

  fn get(&self, id: &Hash) -> Option<WrapperHandle<E>> {
    self.entries.get(id).map(|e| Arc::clone(e.value()))
  }

  fn contains(&self, id: &Hash) -> bool {
    self.entries.contains_key(id)
  }

  fn insert(&self, id: Hash, wrapper: WrapperHandle<E>, size: u64) {
    if self.entries.contains_key(&id) {
      return;
    }
    self.entries.insert(id, wrapper);
    self.order.lock().push_back(id);
    self.bytes.fetch_add(size, Ordering::Relaxed);
    self.evict_over_budget();
  }

  fn remove(&self, id: &Hash) {
    if let Some((_, _)) = self.entries.remove(id) {
      self.order.lock().retain(|x| x != id);
    }
  }

  fn evict_over_budget(&self) {
    let mut order = self.order.lock();
    while self.bytes.load(Ordering::Relaxed) > self.byte_budget {
      let oldest = match order.pop_front() {
        Some(id) => id,
        None => break,
      };
      if let Some((_, w)) = self.entries.remove(&oldest) {
        let size = rlp::encode(w.inner()).len() as u64;
        self.bytes.fetch_sub(size, Ordering::Relaxed);
      }
    }
  }
}

/// A count-budgeted negative cache of block-ids known absent.
struct MissingTier {
  ids: DashMap<Hash, ()>,
  order: Mutex<VecDeque<Hash>>,
  budget: usize,
}

impl MissingTier {
  fn new(budget: usize) -> Self {
    Self { ids: DashMap::new(), order: Mutex::new(VecDeque::new()), budget }
  }

  fn contains(&self, id: &Hash) -> bool {
    self.ids.contains_key(id)
  }

  fn insert(&self, id: Hash) {
    if self.ids.contains_key(&id) {
      return;
    }
    self.ids.insert(id, ());
    let mut order = self.order.lock();
    order.push_back(id);
    if order.len() > self.budget {
      if let Some(oldest) = order.pop_front() {
        self.ids.remove(&oldest);
      }
    }
  }

  fn remove(&self, id: &Hash) {
    if self.ids.remove(id).is_some() {
      self.order.lock().retain(|x| x != id);
    }
  }
}

/// The chain-state cache: `GetBlock`, `ParseBlock`, `BuildBlock`,
/// `SetLastAccepted`, `LastAccepted`, `GetBlockIDAtHeight`.
pub struct ChainCache<E: ExecutionLayer> {
  execution: Arc<E>,
  precompiles: Arc<dyn PrecompileRegistry>,
  decided: BoundedTier<E>,
  unverified: BoundedTier<E>,
  missing: MissingTier,
  bytes_to_id: DashMap<Vec<u8>, Hash>,
  last_accepted: Mutex<Option<Hash>>,
  pruning_horizon: AtomicU64,
}

impl<E: ExecutionLayer> ChainCache<E> {
  pub fn new(
    execution: Arc<E>,
    precompiles: Arc<dyn PrecompileRegistry>,
    decided_byte_budget: u64,
    unverified_byte_budget: u64,
    missing_budget: usize,
  ) -> Self {
    Self {
      execution,
      precompiles,
      decided: BoundedTier::new(decided_byte_budget),
      unverified: BoundedTier::new(unverified_byte_budget),
      missing: MissingTier::new(missing_budget),
      bytes_to_id: DashMap::new(),
      last_accepted: Mutex::new(None),
      pruning_horizon: AtomicU64::new(0),
    }
  }

  pub fn set_pruning_horizon(&self, height: u64) {
    self.pruning_horizon.store(height, Ordering::Relaxed);
  }

  /// Consults tiers in order decided -> unverified -> missing; on a total
  /// miss, falls through to the execution layer and installs the result.
  pub fn get_block(
    &self,
    id: &Hash,
  ) -> Result<WrapperHandle<E>, CacheError> {
    if let Some(w) = self.decided.get(id) {
      return Ok(w);
    }
    if let Some(w) = self.unverified.get(id) {
      return Ok(w);
    }
    if self.missing.contains(id) {
      return Err(CacheError::NotFound);
    }
    match self.execution.header_by_hash(id) {
      Some(header) => {
        let block = EthBlock { header, transactions: Vec::new() };
        let wrapper = Arc::new(Wrapper::new(
          block,
          Arc::clone(&self.execution),
          Arc::clone(&self.precompiles),
        ));
        let size = wrapper.bytes().len() as u64;
        if self
          .execution
          .canonical_head()
          .map(|h| h.height >= wrapper.height())
          .unwrap_or(false)
        {
          self.decided.insert(*id, Arc::clone(&wrapper), size);
        } else {
          self.unverified.insert(*id, Arc::clone(&wrapper), size);
        }
        Ok(wrapper)
      }
      None => {
        self.missing.insert(*id);
        Err(CacheError::NotFound)
      }
    }
  }

  /// Deduplicates by bytes->id and by id, so repeated parses of identical
  /// bytes yield the same wrapper pointer.
  pub fn parse_block(
    &self,
    bytes: &[u8],
  ) -> Result<WrapperHandle<E>, CacheError> {
    if let Some(id) = self.bytes_to_id.get(bytes) {
      if let Some(w) = self.decided.get(&id).or_else(|| self.unverified.get(&id))
      {
        return Ok(w);
      }
    }
    let block: EthBlock =
      rlp::decode(bytes).map_err(|e| CacheError::Parse(e.to_string()))?;
    let id = block.id();
    if let Some(w) = self.decided.get(&id).or_else(|| self.unverified.get(&id)) {
      self.bytes_to_id.insert(bytes.to_vec(), id);
      return Ok(w);
    }
    let size = bytes.len() as u64;
    let wrapper = Arc::new(Wrapper::new(
      block,
      Arc::clone(&self.execution),
      Arc::clone(&self.precompiles),
    ));
    self.unverified.insert(id, Arc::clone(&wrapper), size);
    self.bytes_to_id.insert(bytes.to_vec(), id);
    self.missing.remove(&id);
    Ok(wrapper)
  }

  /// Delegates assembly to the execution layer and pre-verifies the result
  /// (without committing) so the caller fails fast before offering the
  /// block to consensus.
  pub fn build_block(
    &self,
    transactions: Vec<Vec<u8>>,
    timestamp: u64,
  ) -> Result<WrapperHandle<E>, CacheError> {
    let parent = self
      .execution
      .canonical_head()
      .ok_or(CacheError::NotFound)?;
    let block = self
      .execution
      .build_block(&parent, transactions, timestamp)
      .map_err(|e| CacheError::Parse(e.to_string()))?;
    let id = block.id();
    let size = rlp::encode(&block).len() as u64;
    let wrapper = Arc::new(Wrapper::new(
      block,
      Arc::clone(&self.execution),
      Arc::clone(&self.precompiles),
    ));
    wrapper.verify(&parent)?;
    self.unverified.insert(id, Arc::clone(&wrapper), size);
    Ok(wrapper)
  }

  /// Moves a wrapper into the decided tier after acceptance or rejection
  /// and records the last-accepted pointer on acceptance.
  pub fn finalize_decision(&self, wrapper: &WrapperHandle<E>) {
    let id = wrapper.id();
    self.unverified.remove(&id);
    let size = wrapper.bytes().len() as u64;
    self.decided.insert(id, Arc::clone(wrapper), size);
    if wrapper.decision() == super::wrapper::Decision::Accepted {
      *self.last_accepted.lock() = Some(id);
    }
  }

  pub fn set_last_accepted(&self, id: Hash) {
    *self.last_accepted.lock() = Some(id);
  }

  pub fn last_accepted(&self) -> Option<Hash> {
    *self.last_accepted.lock()
  }

  /// Returns `NotFound` for heights above last-accepted or below the
  /// pruning horizon -- a state-synced node will not have all history.
  pub fn get_block_id_at_height(&self, height: u64) -> Result<Hash, CacheError> {
    if height < self.pruning_horizon.load(Ordering::Relaxed) {
      return Err(CacheError::NotFound);
    }
    let head_height =
      self.execution.canonical_head().map(|h| h.height).unwrap_or(0);
    if height > head_height {
      return Err(CacheError::NotFound);
    }
    self
      .execution
      .header_at_height(height)
      .map(|h| h.hash())
      .ok_or(CacheError::NotFound)
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::execution::memory::{genesis_header, MemoryExecutionLayer};

  fn cache() -> ChainCache<MemoryExecutionLayer> {
    let genesis = genesis_header();
    let exec = Arc::new(MemoryExecutionLayer::new(genesis));
    ChainCache::new(exec, Arc::new(crate::execution::NoPrecompiles), 1 << 20, 1 << 20, 1000)
  }

  #[test]
  fn build_then_finalize_moves_tiers() {
    let c = cache();
    let w = c.build_block(vec![vec![9]], 1).unwrap();
    w.accept().unwrap();
    c.finalize_decision(&w);
    assert_eq!(c.last_accepted(), Some(w.id()));
    // fetch from decided tier without touching execution layer again
    let fetched = c.get_block(&w.id()).unwrap();
    assert_eq!(fetched.id(), w.id());
  }

  #[test]
  fn parse_dedups_identical_bytes() {
    let c = cache();
    let w = c.build_block(vec![vec![1]], 1).unwrap();
    let bytes = w.bytes();
    let parsed_a = c.parse_block(&bytes).unwrap();
    let parsed_b = c.parse_block(&bytes).unwrap();
    assert!(Arc::ptr_eq(&parsed_a, &parsed_b));
  }

  #[test]
  fn unknown_id_is_cached_as_missing() {
    let c = cache();
    let bogus = Hash::keccak256(b"nope");
    assert!(matches!(c.get_block(&bogus), Err(CacheError::NotFound)));
    assert!(c.missing.contains(&bogus));
  }

  #[test]
  fn height_above_head_is_not_found() {
    let c = cache();
    assert!(matches!(
      c.get_block_id_at_height(1000),
      Err(CacheError::NotFound)
    ));
  }

  #[test]
  fn height_below_pruning_horizon_is_not_found() {
    let c = cache();
    c.set_pruning_horizon(5);
    assert!(matches!(
      c.get_block_id_at_height(0),
      Err(CacheError::NotFound)
    ));
  }
}
