//! Sync summary: `(blockHash, blockHeight, stateRoot)`. The wire format is
//! a fixed 72 bytes: 32 B hash || 8 B big-endian height || 32 B state
//! root.

use thiserror::Error;

use crate::primitives::Hash;

pub const SUMMARY_WIRE_LEN: usize = 72;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
  pub block_hash: Hash,
  pub height: u64,
  pub state_root: Hash,
}

#[derive(Debug, Error)]
pub enum SummaryError {
  #[error("summary must be exactly {SUMMARY_WIRE_LEN} bytes, got {0}")]
  BadLength(usize),
}

/// Outcome of adopting a summary, returned from `SyncClient::accept`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
  /// Sync executed against a trie root freshly produced for this summary.
  Static,
  /// Sync was skipped -- the local node was already within `minBlocks` of
  /// the summary height.
  Skipped,
  /// Sync executed, continuing a dynamic/partial sync already in flight.
  Dynamic,
}

impl Summary {
  pub fn to_bytes(&self) -> [u8; SUMMARY_WIRE_LEN] {
    let mut out = [0u8; SUMMARY_WIRE_LEN];
    out[0..32].copy_from_slice(self.block_hash.as_bytes());
    out[32..40].copy_from_slice(&self.height.to_be_bytes());
    out[40..72].copy_from_slice(self.state_root.as_bytes());
    out
  }

  pub fn from_bytes(bytes: &[u8]) -> Result<Self, SummaryError> {
    if bytes.len() != SUMMARY_WIRE_LEN {
      return Err(SummaryError::BadLength(bytes.len()));
    }
    let block_hash = Hash::try_from(&bytes[0..32]).expect("32-byte slice");
    let mut height_buf = [0u8; 8];
    height_buf.copy_from_slice(&bytes[32..40]);
    let height = u64::from_be_bytes(height_buf);
    let state_root = Hash::try_from(&bytes[40..72]).expect("32-byte slice");
    Ok(Summary { block_hash, height, state_root })
  }
}

#[cfg(test)]
mod test {
  use super::*;

  fn sample() -> Summary {
    Summary {
      block_hash: Hash::keccak256(b"block"),
      height: 256,
      state_root: Hash::keccak256(b"root"),
    }
  }

  #[test]
  fn wire_round_trips() {
    let s = sample();
    let bytes = s.to_bytes();
    assert_eq!(bytes.len(), SUMMARY_WIRE_LEN);
    let decoded = Summary::from_bytes(&bytes).unwrap();
    assert_eq!(s, decoded);
  }

  #[test]
  fn height_is_big_endian() {
    let s = sample();
    let bytes = s.to_bytes();
    assert_eq!(&bytes[32..40], &256u64.to_be_bytes());
  }

  #[test]
  fn rejects_wrong_length() {
    assert!(matches!(
      Summary::from_bytes(&[0u8; 10]),
      Err(SummaryError::BadLength(10))
    ));
  }
}
