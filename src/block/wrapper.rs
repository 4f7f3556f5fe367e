//! Adapts an execution-layer block to the consensus block contract it must
//! present to the host: `ID`, `ParentID`, `Height`, `Timestamp`, `Bytes`,
//! `Verify`, `Accept`, `Reject`.

use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
  execution::{
    ExecutionError, ExecutionLayer, ExecutionOutput, PrecompileRegistry, ProposerContext,
  },
  primitives::{EthBlock, Hash},
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WrapperError {
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
  #[error("accept called on block in state {0:?}, must be Verified with an Accepted parent")]
  NotVerified(Decision),
  #[error("reject called on block in state {0:?}, must be Unprocessed or Verified")]
  NotRejectable(Decision),
  #[error("unknown parent {0}")]
  UnknownParent(Hash),
  #[error("execution error: {0}")]
  Execution(#[from] ExecutionError),
}

/// Decision state: a block moves `Unprocessed -> Verified -> {Accepted,
/// Rejected}` and never the other way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
  Unprocessed,
  Verified,
  Accepted,
  Rejected,
}

/// Closed two-variant dispatch: callers always see one concrete `Wrapper`
/// type, but verification may or may not carry proposer context.
#[derive(Debug, Clone, Copy)]
pub enum VerifyMode {
  Standard,
  WithProposer(ProposerContext),
}

struct State {
  decision: Decision,
  output: Option<ExecutionOutput>,
}

/// A block wrapper with memoized decision state. Not a trait object: one
/// concrete struct parameterized over the execution layer, so downstream
/// code always sees a single wrapper type regardless of verify mode.
pub struct Wrapper<E: ExecutionLayer> {
  block: EthBlock,
  execution: Arc<E>,
  precompiles: Arc<dyn PrecompileRegistry>,
  state: Mutex<State>,
  verify_cache: OnceCell<Result<(), WrapperError>>,
}

impl<E: ExecutionLayer> Wrapper<E> {
  pub fn new(
    block: EthBlock,
    execution: Arc<E>,
    precompiles: Arc<dyn PrecompileRegistry>,
  ) -> Self {
    Self {
      block,
      execution,
      precompiles,
      state: Mutex::new(State { decision: Decision::Unprocessed, output: None }),
      verify_cache: OnceCell::new(),
    }
  }

  pub fn id(&self) -> Hash {
    self.block.id()
  }

  pub fn parent_id(&self) -> Hash {
    self.block.header.parent_hash
  }

  pub fn height(&self) -> u64 {
    self.block.header.height
  }

  pub fn timestamp(&self) -> u64 {
    self.block.header.timestamp
  }

  pub fn bytes(&self) -> Vec<u8> {
    rlp::encode(&self.block).to_vec()
  }

  pub fn inner(&self) -> &EthBlock {
    &self.block
  }

  pub fn decision(&self) -> Decision {
    self.state.lock().decision
  }

  /// Whether `verify_with_context` should be preferred over plain
  /// `verify` for this block.
  pub fn should_verify_with_context(&self) -> bool {
    self.block.header.block_gas_cost.is_some()
  }

  fn syntactic_check(&self) -> Result<(), WrapperError> {
    let h = &self.block.header;
    if h.nonce != 0 {
      return Err(WrapperError::InvalidNonce);
    }
    if h.uncle_hash != crate::primitives::empty_uncle_hash() {
      return Err(WrapperError::UnclesUnsupported);
    }
    if h.tx_root != crate::primitives::compute_tx_root(&self.block.transactions) {
      return Err(WrapperError::InvalidBlock("tx root does not match body".into()));
    }
    use ethereum_types::U256;
    if h.difficulty != U256::one() {
      return Err(WrapperError::InvalidBlock("difficulty must be 1".into()));
    }
    if h.base_fee.is_none() {
      return Err(WrapperError::NilBaseFee);
    }
    if h.block_gas_cost.is_none() && h.height > 0 {
      return Err(WrapperError::NilBlockGasCost);
    }
    if self.block.transactions.is_empty() && h.height > 0 {
      return Err(WrapperError::EmptyBlock);
    }
    let now = std::time::SystemTime::now()
      .duration_since(std::time::UNIX_EPOCH)
      .map(|d| d.as_secs())
      .unwrap_or(0);
    if h.timestamp > now + 10 {
      return Err(WrapperError::FutureBlock);
    }
    Ok(())
  }

  /// Plain verification: syntactic checks followed by semantic execution
  /// against `parent`'s state. Idempotent up to caching: a second call
  /// with identical arguments returns the memoized decision without
  /// re-executing.
  pub fn verify(
    &self,
    parent_header: &crate::primitives::Header,
  ) -> Result<(), WrapperError> {
    self.verify_with_mode(parent_header, VerifyMode::Standard)
  }

  pub fn verify_with_context(
    &self,
    parent_header: &crate::primitives::Header,
    proposer: ProposerContext,
  ) -> Result<(), WrapperError> {
    self.verify_with_mode(parent_header, VerifyMode::WithProposer(proposer))
  }

  fn verify_with_mode(
    &self,
    parent_header: &crate::primitives::Header,
    mode: VerifyMode,
  ) -> Result<(), WrapperError> {
    let result = self
      .verify_cache
      .get_or_init(|| {
        if let Err(e) = self.syntactic_check() {
          return Err(e);
        }
        let proposer = match mode {
          VerifyMode::Standard => None,
          VerifyMode::WithProposer(p) => Some(p),
        };
        let output = self
          .execution
          .verify_block(&self.block, parent_header, proposer)
          .map_err(map_execution_error)?;
        let mut state = self.state.lock();
        state.decision = Decision::Verified;
        state.output = Some(output);
        Ok(())
      })
      .clone();
    if result.is_ok() {
      debug!(id = %self.id(), "block verified");
    }
    result
  }

  /// Legal only on a `Verified` block; the caller (the Lifecycle
  /// Coordinator) is responsible for checking that the parent is itself
  /// accepted before calling this. Commits the state produced at verify
  /// time and fires each precompile log's accept hook for addresses
  /// registered in this wrapper's `PrecompileRegistry`.
  pub fn accept(&self) -> Result<(), WrapperError> {
    let decision = self.decision();
    if decision != Decision::Verified {
      return Err(WrapperError::NotVerified(decision));
    }
    let output = {
      let state = self.state.lock();
      state.output.clone().ok_or(WrapperError::NotVerified(decision))?
    };
    self.execution.accept_block(&self.block, &output).map_err(map_execution_error)?;
    for log in &output.precompile_logs {
      if self.precompiles.is_registered(&log.address) {
        self.precompiles.on_accept(&log.address, &log.data);
      }
    }
    self.state.lock().decision = Decision::Accepted;
    debug!(id = %self.id(), height = self.height(), "block accepted");
    Ok(())
  }

  /// Legal on `Verified` or `Unprocessed`; drops staged state but never
  /// touches the last-accepted pointer.
  pub fn reject(&self) -> Result<(), WrapperError> {
    let decision = self.decision();
    if !matches!(decision, Decision::Verified | Decision::Unprocessed) {
      return Err(WrapperError::NotRejectable(decision));
    }
    self.state.lock().decision = Decision::Rejected;
    warn!(id = %self.id(), "block rejected");
    Ok(())
  }
}

fn map_execution_error(e: ExecutionError) -> WrapperError {
  match e {
    ExecutionError::InvalidBlock(s) => WrapperError::InvalidBlock(s),
    ExecutionError::InvalidNonce => WrapperError::InvalidNonce,
    ExecutionError::UnclesUnsupported => WrapperError::UnclesUnsupported,
    ExecutionError::EmptyBlock => WrapperError::EmptyBlock,
    ExecutionError::NilBaseFee => WrapperError::NilBaseFee,
    ExecutionError::NilBlockGasCost => WrapperError::NilBlockGasCost,
    ExecutionError::FutureBlock => WrapperError::FutureBlock,
    ExecutionError::UnknownParent(h) => WrapperError::UnknownParent(h),
    other => WrapperError::Execution(other),
  }
}

#[cfg(test)]
mod test {
  use std::sync::Arc;

  use super::*;
  use crate::execution::{
    memory::{genesis_header, MemoryExecutionLayer},
    NoPrecompiles, PrecompileLog,
  };

  fn chain() -> (Arc<MemoryExecutionLayer>, crate::primitives::Header) {
    let genesis = genesis_header();
    (Arc::new(MemoryExecutionLayer::new(genesis.clone())), genesis)
  }

  fn no_precompiles() -> Arc<dyn PrecompileRegistry> {
    Arc::new(NoPrecompiles)
  }

  #[test]
  fn verify_then_accept_moves_through_states() {
    let (exec, genesis) = chain();
    let block = exec.build_block(&genesis, vec![vec![1]], 1).unwrap();
    let wrapper = Wrapper::new(block, Arc::clone(&exec), no_precompiles());
    assert_eq!(wrapper.decision(), Decision::Unprocessed);
    wrapper.verify(&genesis).unwrap();
    assert_eq!(wrapper.decision(), Decision::Verified);
    wrapper.accept().unwrap();
    assert_eq!(wrapper.decision(), Decision::Accepted);
  }

  #[test]
  fn verify_is_idempotent() {
    let (exec, genesis) = chain();
    let block = exec.build_block(&genesis, vec![vec![1]], 1).unwrap();
    let wrapper = Wrapper::new(block, exec, no_precompiles());
    wrapper.verify(&genesis).unwrap();
    // second call must not re-execute / must not error differently
    wrapper.verify(&genesis).unwrap();
    assert_eq!(wrapper.decision(), Decision::Verified);
  }

  #[test]
  fn accept_without_verify_fails() {
    let (exec, genesis) = chain();
    let block = exec.build_block(&genesis, vec![vec![1]], 1).unwrap();
    let wrapper = Wrapper::new(block, exec, no_precompiles());
    assert_eq!(
      wrapper.accept(),
      Err(WrapperError::NotVerified(Decision::Unprocessed))
    );
  }

  #[test]
  fn reject_after_verify_does_not_panic_and_blocks_accept() {
    let (exec, genesis) = chain();
    let block = exec.build_block(&genesis, vec![vec![1]], 1).unwrap();
    let wrapper = Wrapper::new(block, exec, no_precompiles());
    wrapper.verify(&genesis).unwrap();
    wrapper.reject().unwrap();
    assert_eq!(wrapper.decision(), Decision::Rejected);
    assert!(wrapper.accept().is_err());
  }

  #[test]
  fn rejects_nonzero_nonce() {
    let (exec, genesis) = chain();
    let mut block = exec.build_block(&genesis, vec![vec![1]], 1).unwrap();
    block.header.nonce = 1;
    let wrapper = Wrapper::new(block, exec, no_precompiles());
    assert_eq!(wrapper.verify(&genesis), Err(WrapperError::InvalidNonce));
  }

  #[test]
  fn rejects_tx_root_not_matching_body() {
    let (exec, genesis) = chain();
    let mut block = exec.build_block(&genesis, vec![vec![1]], 1).unwrap();
    block.header.tx_root = Hash::keccak256(b"wrong-root");
    let wrapper = Wrapper::new(block, exec, no_precompiles());
    assert_eq!(
      wrapper.verify(&genesis),
      Err(WrapperError::InvalidBlock("tx root does not match body".into()))
    );
  }

  #[test]
  fn rejects_future_timestamp() {
    let (exec, genesis) = chain();
    let mut block = exec.build_block(&genesis, vec![vec![1]], 1).unwrap();
    block.header.timestamp = u64::MAX;
    let wrapper = Wrapper::new(block, exec, no_precompiles());
    assert_eq!(wrapper.verify(&genesis), Err(WrapperError::FutureBlock));
  }

  struct RecordingRegistry {
    address: Hash,
    fired: Mutex<Vec<Vec<u8>>>,
  }

  impl PrecompileRegistry for RecordingRegistry {
    fn is_registered(&self, address: &Hash) -> bool {
      *address == self.address
    }

    fn on_accept(&self, _address: &Hash, data: &[u8]) {
      self.fired.lock().push(data.to_vec());
    }
  }

  #[test]
  fn accept_fires_registered_precompile_hooks_with_verify_time_output() {
    let (exec, genesis) = chain();
    let block = exec.build_block(&genesis, vec![vec![1]], 1).unwrap();
    let address = Hash::keccak256(b"precompile");
    let registry = Arc::new(RecordingRegistry { address, fired: Mutex::new(Vec::new()) });
    let wrapper = Wrapper::new(block, Arc::clone(&exec), registry.clone() as Arc<dyn PrecompileRegistry>);
    wrapper.verify(&genesis).unwrap();
    {
      let mut state = wrapper.state.lock();
      if let Some(output) = state.output.as_mut() {
        output.precompile_logs.push(PrecompileLog { address, data: vec![9, 9] });
      }
    }
    wrapper.accept().unwrap();
    assert_eq!(registry.fired.lock().as_slice(), &[vec![9u8, 9]]);
  }
}
