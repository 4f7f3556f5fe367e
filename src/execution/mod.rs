//! The trait boundary to the external EVM execution layer: apply a
//! block's transactions against parent state, read the canonical head,
//! insert a chain segment. This crate never implements an interpreter or
//! a trie database -- it only defines the seam and ships a deterministic
//! in-memory stand-in for its own tests.

pub mod memory;

use thiserror::Error;

use crate::primitives::{EthBlock, Hash, Header};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExecutionError {
  #[error("invalid block: {0}")]
  InvalidBlock(String),
  #[error("invalid nonce")]
  InvalidNonce,
  #[error("uncles unsupported")]
  UnclesUnsupported,
  #[error("empty block")]
  EmptyBlock,
  #[error("nil base fee")]
  NilBaseFee,
  #[error("nil block gas cost")]
  NilBlockGasCost,
  #[error("future block")]
  FutureBlock,
  #[error("unknown parent {0}")]
  UnknownParent(Hash),
  #[error("execution failed: {0}")]
  ExecutionFailed(String),
  #[error("unknown block {0}")]
  UnknownBlock(Hash),
}

/// Auxiliary block-proposal metadata threaded into predicate evaluation
/// during verification, e.g. a reference height in the outer chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProposerContext {
  pub proposer_height: u64,
  pub proposer_timestamp: u64,
}

/// The result of executing a block against its parent state: enough for the
/// wrapper to commit on `Accept` or discard on `Reject`.
#[derive(Debug, Clone)]
pub struct ExecutionOutput {
  pub state_root: Hash,
  pub receipts_root: Hash,
  /// One entry per emitted log whose address matches a registered
  /// precompile; `Wrapper::accept` fires each of these through the
  /// registry it is constructed with.
  pub precompile_logs: Vec<PrecompileLog>,
}

/// A single log emitted by a registered precompile address during
/// execution, carried through from `verify_block` to `accept_block` so
/// that acceptance can fire the address's hook with the data that was
/// actually produced rather than synthesizing a placeholder at accept
/// time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrecompileLog {
  pub address: Hash,
  pub data: Vec<u8>,
}

/// The set of addresses whose accept hooks must fire. `Wrapper::accept`
/// consults this for every `PrecompileLog` an execution produced and
/// invokes `on_accept` for the ones registered; unregistered addresses are
/// dropped silently, the same way an unsubscribed event has no listener.
pub trait PrecompileRegistry: Send + Sync {
  fn is_registered(&self, address: &Hash) -> bool;
  fn on_accept(&self, address: &Hash, data: &[u8]);
}

/// A registry with nothing registered; every log is dropped. The default
/// for hosts and tests with no precompiles wired up.
pub struct NoPrecompiles;

impl PrecompileRegistry for NoPrecompiles {
  fn is_registered(&self, _address: &Hash) -> bool {
    false
  }

  fn on_accept(&self, _address: &Hash, _data: &[u8]) {}
}

/// The seam this VM core hosts an EVM-compatible execution layer behind.
/// Implementations own the trie database and transaction interpreter; this
/// crate only calls through this trait.
pub trait ExecutionLayer: Send + Sync {
  /// Syntactic + semantic verification of `block` against its parent's
  /// committed state. Read-only: must not mutate canonical state.
  fn verify_block(
    &self,
    block: &EthBlock,
    parent: &Header,
    proposer: Option<ProposerContext>,
  ) -> Result<ExecutionOutput, ExecutionError>;

  /// Commits `block`'s state transition, making it canonical at its height.
  /// Only called after `verify_block` succeeded for this exact block.
  fn accept_block(
    &self,
    block: &EthBlock,
    output: &ExecutionOutput,
  ) -> Result<(), ExecutionError>;

  /// Assembles a new block on top of `parent` from currently pending
  /// transactions. Does not commit any state.
  fn build_block(
    &self,
    parent: &Header,
    transactions: Vec<Vec<u8>>,
    timestamp: u64,
  ) -> Result<EthBlock, ExecutionError>;

  /// Inserts a contiguous chain segment (used by the chain-import
  /// subsystem); implementations may batch internally.
  fn insert_chain(
    &self,
    blocks: &[EthBlock],
  ) -> Result<(), ExecutionError>;

  /// Forces a state-trie commit to disk, independent of block acceptance.
  fn commit_state(&self) -> Result<(), ExecutionError>;

  fn canonical_head(&self) -> Option<Header>;

  /// Forwards the host's `SetPreference` signal to this layer's own
  /// canonical head pointer. Distinct from `accept_block`: it never
  /// commits state, only tells the layer which already-known block it
  /// should treat as preferred among forks it has verified.
  fn set_preference(&self, id: &Hash) -> Result<(), ExecutionError>;

  fn header_at_height(&self, height: u64) -> Option<Header>;

  fn header_by_hash(&self, hash: &Hash) -> Option<Header>;

  fn state_root_available(&self, state_root: &Hash) -> bool;
}
