//! State-sync server: serves syncable summaries at a coarse interval, plus
//! leaf-range, block-batch and code requests. Each request is stateless
//! and idempotent.

use std::sync::Arc;

use thiserror::Error;

use crate::{
  execution::ExecutionLayer,
  primitives::Hash,
  sync::summary::Summary,
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ServerError {
  #[error("not found")]
  NotFound,
  #[error("height {0} is not a multiple of the syncable interval")]
  NotSyncable(u64),
}

/// A leaf-range response, possibly a partial range capped in bytes with a
/// continuation proof.
pub struct LeafRangeResponse {
  pub leaves: Vec<(Vec<u8>, Vec<u8>)>,
  pub more: bool,
}

pub struct BlockBatchResponse {
  pub blocks: Vec<crate::primitives::EthBlock>,
}

/// The key/value leaf store and code store the server reads from. This is
/// a narrow seam over the execution layer's trie database, which is
/// external to this crate; the in-memory test double implements it
/// directly over a `HashMap`.
pub trait TrieReader: Send + Sync {
  fn leaves_under(
    &self,
    root: &Hash,
    start_key: &[u8],
    limit: usize,
  ) -> Vec<(Vec<u8>, Vec<u8>)>;

  fn code_by_hash(&self, hash: &Hash) -> Option<Vec<u8>>;
}

pub struct SyncServer<E: ExecutionLayer> {
  execution: Arc<E>,
  trie: Arc<dyn TrieReader>,
  syncable_interval: u64,
  max_leaves_per_response: usize,
  parents_to_get: u64,
}

impl<E: ExecutionLayer> SyncServer<E> {
  pub fn new(
    execution: Arc<E>,
    trie: Arc<dyn TrieReader>,
    syncable_interval: u64,
    max_leaves_per_response: usize,
    parents_to_get: u64,
  ) -> Self {
    Self { execution, trie, syncable_interval, max_leaves_per_response, parents_to_get }
  }

  /// The summary at `floor(lastAccepted / syncableInterval) * syncableInterval`.
  pub fn get_last_state_summary(&self) -> Result<Summary, ServerError> {
    let head = self.execution.canonical_head().ok_or(ServerError::NotFound)?;
    let floor_height = (head.height / self.syncable_interval) * self.syncable_interval;
    self.get_state_summary(floor_height)
  }

  pub fn get_state_summary(&self, height: u64) -> Result<Summary, ServerError> {
    if height % self.syncable_interval != 0 {
      return Err(ServerError::NotSyncable(height));
    }
    let head_height = self.execution.canonical_head().map(|h| h.height).unwrap_or(0);
    if height > head_height {
      return Err(ServerError::NotFound);
    }
    let header = self.execution.header_at_height(height).ok_or(ServerError::NotFound)?;
    if !self.execution.state_root_available(&header.state_root) {
      return Err(ServerError::NotFound);
    }
    Ok(Summary { block_hash: header.hash(), height, state_root: header.state_root })
  }

  pub fn serve_leaf_range(
    &self,
    root: &Hash,
    start_key: &[u8],
  ) -> LeafRangeResponse {
    let mut leaves = self.trie.leaves_under(root, start_key, self.max_leaves_per_response + 1);
    let more = leaves.len() > self.max_leaves_per_response;
    if more {
      leaves.truncate(self.max_leaves_per_response);
    }
    LeafRangeResponse { leaves, more }
  }

  pub fn serve_code(&self, hash: &Hash) -> Option<Vec<u8>> {
    self.trie.code_by_hash(hash)
  }

  /// Walks parent links backwards from `start_hash`, returning up to
  /// `count` blocks (bounded by `self.parents_to_get` as a safety cap).
  pub fn serve_block_batch(
    &self,
    start_hash: &Hash,
    count: u64,
  ) -> Result<BlockBatchResponse, ServerError> {
    let count = count.min(self.parents_to_get);
    let mut blocks = Vec::new();
    let mut cursor = *start_hash;
    for _ in 0..count {
      let header = match self.execution.header_by_hash(&cursor) {
        Some(h) => h,
        None => break,
      };
      let parent = header.parent_hash;
      blocks.push(crate::primitives::EthBlock { header, transactions: Vec::new() });
      cursor = parent;
    }
    if blocks.is_empty() {
      return Err(ServerError::NotFound);
    }
    Ok(BlockBatchResponse { blocks })
  }
}

#[cfg(test)]
mod test {
  use std::{collections::HashMap, sync::Mutex};

  use super::*;
  use crate::execution::memory::{genesis_header, MemoryExecutionLayer};

  struct FakeTrie(Mutex<HashMap<Vec<u8>, Vec<u8>>>, Mutex<HashMap<Hash, Vec<u8>>>);

  impl TrieReader for FakeTrie {
    fn leaves_under(&self, _root: &Hash, start_key: &[u8], limit: usize) -> Vec<(Vec<u8>, Vec<u8>)> {
      let map = self.0.lock().unwrap();
      let mut entries: Vec<_> = map
        .iter()
        .filter(|(k, _)| k.as_slice() >= start_key)
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
      entries.sort();
      entries.truncate(limit);
      entries
    }

    fn code_by_hash(&self, hash: &Hash) -> Option<Vec<u8>> {
      self.1.lock().unwrap().get(hash).cloned()
    }
  }

  fn setup() -> (SyncServer<MemoryExecutionLayer>, Arc<MemoryExecutionLayer>) {
    let genesis = genesis_header();
    let exec = Arc::new(MemoryExecutionLayer::new(genesis.clone()));
    for i in 1..=512u64 {
      let parent = exec.canonical_head().unwrap();
      let block = exec.build_block(&parent, vec![], i).unwrap();
      let out = exec.verify_block(&block, &parent, None).unwrap();
      exec.accept_block(&block, &out).unwrap();
    }
    let trie = Arc::new(FakeTrie(Mutex::new(HashMap::new()), Mutex::new(HashMap::new())));
    let server = SyncServer::new(Arc::clone(&exec), trie, 256, 1024, 256);
    (server, exec)
  }

  #[test]
  fn last_summary_is_floor_to_interval() {
    let (server, exec) = setup();
    let summary = server.get_last_state_summary().unwrap();
    assert_eq!(summary.height, 512);
    assert_eq!(summary.block_hash, exec.header_at_height(512).unwrap().hash());
  }

  #[test]
  fn non_multiple_height_is_rejected() {
    let (server, _) = setup();
    assert_eq!(
      server.get_state_summary(300),
      Err(ServerError::NotSyncable(300))
    );
  }

  #[test]
  fn height_beyond_last_accepted_is_not_found() {
    let (server, _) = setup();
    assert_eq!(server.get_state_summary(1024), Err(ServerError::NotFound));
  }

  #[test]
  fn block_batch_walks_parents_until_genesis() {
    let (server, exec) = setup();
    let head = exec.canonical_head().unwrap();
    let batch = server.serve_block_batch(&head.hash(), 10).unwrap();
    assert_eq!(batch.blocks.len(), 10);
    assert_eq!(batch.blocks[0].header.height, head.height);
    assert_eq!(batch.blocks[9].header.height, head.height - 9);
  }
}
