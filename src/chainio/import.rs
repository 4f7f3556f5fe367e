//! Chain import: ingests an RLP block stream, inserts under parent-linkage
//! checks, and commits state at bounded intervals so restarts never
//! observe an in-memory-only trie.

use std::io::Read;

use flate2::read::GzDecoder;
use thiserror::Error;
use tracing::{debug, info};

use crate::{
  db::{DbError, Overlay, WriteBatch, LAST_ACCEPTED_KEY},
  execution::{ExecutionError, ExecutionLayer},
  primitives::{EthBlock, Hash},
};

#[derive(Debug, Error)]
pub enum ImportError {
  #[error("parent of block at height {height} not locally known (parent hash {parent})")]
  ParentMissing { height: u64, parent: Hash },
  #[error("failed to parse RLP block stream: {0}")]
  ParseError(String),
  #[error("insertion failed at height {height}: {source}")]
  InsertFailed { height: u64, #[source] source: ExecutionError },
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
  #[error("database error: {0}")]
  Db(#[from] DbError),
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ImportSummary {
  pub blocks_imported: u64,
  pub height_after: u64,
}

/// Reads a concatenated RLP block stream, transparently un-gzipping if
/// `gzip` is set.
fn read_all(bytes: &[u8], gzip: bool) -> Result<Vec<u8>, ImportError> {
  if !gzip {
    return Ok(bytes.to_vec());
  }
  let mut decoder = GzDecoder::new(bytes);
  let mut out = Vec::new();
  decoder.read_to_end(&mut out)?;
  Ok(out)
}

/// Parses a concatenated-RLP byte stream into individual blocks. Each
/// block is one RLP list; `rlp::Rlp::as_list` cannot stream multiple
/// top-level items, so this walks the byte stream item by item using the
/// `rlp` crate's payload-length introspection.
fn decode_stream(bytes: &[u8]) -> Result<Vec<EthBlock>, ImportError> {
  let mut blocks = Vec::new();
  let mut offset = 0usize;
  while offset < bytes.len() {
    let rlp = rlp::Rlp::new(&bytes[offset..]);
    let block: EthBlock = rlp
      .as_val()
      .map_err(|e| ImportError::ParseError(e.to_string()))?;
    let payload_len = rlp
      .payload_info()
      .map_err(|e| ImportError::ParseError(e.to_string()))?
      .total();
    offset += payload_len;
    blocks.push(block);
  }
  Ok(blocks)
}

pub struct ChainImporter<'a, E: ExecutionLayer> {
  execution: &'a E,
  overlay: &'a Overlay,
  batch_size: usize,
  commit_interval: u64,
}

impl<'a, E: ExecutionLayer> ChainImporter<'a, E> {
  pub fn new(
    execution: &'a E,
    overlay: &'a Overlay,
    batch_size: usize,
    commit_interval: u64,
  ) -> Self {
    Self { execution, overlay, batch_size, commit_interval }
  }

  /// Imports `raw` (optionally gzip-framed). Block #0 is silently skipped.
  pub fn import(&self, raw: &[u8], gzip: bool) -> Result<ImportSummary, ImportError> {
    let bytes = read_all(raw, gzip)?;
    let mut all_blocks = decode_stream(&bytes)?;
    all_blocks.retain(|b| b.header.height != 0);

    let mut summary = ImportSummary::default();
    let mut since_commit = 0u64;

    for batch in all_blocks.chunks(self.batch_size) {
      if batch.is_empty() {
        continue;
      }
      let first = &batch[0];
      let last = batch.last().expect("non-empty batch");

      // A batch already canonical at its final height means this exact
      // segment was imported before; re-inserting it would be redundant
      // (and re-running insert_chain is not guaranteed side-effect-free
      // for an arbitrary execution layer), so skip straight past it.
      let already_canonical = self
        .execution
        .header_at_height(last.header.height)
        .map(|h| h.hash() == last.header.hash())
        .unwrap_or(false);
      if already_canonical {
        summary.height_after = last.header.height;
        continue;
      }

      let parent_known = self.execution.header_by_hash(&first.header.parent_hash).is_some();
      if !parent_known {
        return Err(ImportError::ParentMissing {
          height: first.header.height,
          parent: first.header.parent_hash,
        });
      }

      self.execution.insert_chain(batch).map_err(|e| ImportError::InsertFailed {
        height: first.header.height,
        source: e,
      })?;

      summary.blocks_imported += batch.len() as u64;
      summary.height_after = last.header.height;
      since_commit += batch.len() as u64;

      // State must be durable before the last-accepted pointer is moved
      // past it, or a crash between the two leaves the pointer ahead of
      // the state it claims is accepted.
      if since_commit >= self.commit_interval {
        self.execution.commit_state().map_err(|e| ImportError::InsertFailed {
          height: last.header.height,
          source: e,
        })?;
        since_commit = 0;
        debug!(height = last.header.height, "forced state commit during import");
      }

      self.advance_last_accepted(last)?;
    }

    // Final forced commit and overlay flush, regardless of whether the
    // last batch happened to land on a commit-interval boundary. The
    // overlay's `Commit` is applied before `Sync` so a crash between the
    // two still leaves the write-ahead state recoverable.
    self.execution.commit_state().map_err(|e| ImportError::InsertFailed {
      height: summary.height_after,
      source: e,
    })?;
    self.overlay.sync()?;

    info!(
      blocks_imported = summary.blocks_imported,
      height_after = summary.height_after,
      "chain import complete"
    );
    Ok(summary)
  }

  fn advance_last_accepted(&self, block: &EthBlock) -> Result<(), ImportError> {
    let mut write = WriteBatch::new();
    write.put_root(LAST_ACCEPTED_KEY, block.header.hash().as_bytes());
    self.overlay.commit(write)?;
    Ok(())
  }
}

#[cfg(test)]
mod test {
  use std::io::Write;

  use ethereum_types::U256;
  use flate2::{write::GzEncoder, Compression};

  use super::*;
  use crate::{
    execution::memory::{genesis_header, MemoryExecutionLayer},
    primitives::{compute_tx_root, empty_uncle_hash, Header},
  };

  fn chain_bytes(n: u64) -> (Vec<u8>, Header) {
    let genesis = genesis_header();
    let mut parent = genesis.clone();
    let mut out = Vec::new();
    // encode genesis too (height 0) to exercise the skip-block-0 rule
    out.extend(rlp::encode(&EthBlock { header: genesis.clone(), transactions: vec![] }));
    for i in 1..=n {
      let header = Header {
        parent_hash: parent.hash(),
        uncle_hash: empty_uncle_hash(),
        height: i,
        timestamp: i,
        state_root: Hash::keccak256(format!("state-{i}")),
        tx_root: compute_tx_root(&[]),
        gas_limit: parent.gas_limit,
        gas_used: 0,
        nonce: 0,
        difficulty: U256::one(),
        base_fee: Some(U256::one()),
        block_gas_cost: Some(U256::from(1000u64)),
        ext_data_hash: empty_uncle_hash(),
        ext_data_gas_used: None,
      };
      let block = EthBlock { header: header.clone(), transactions: vec![] };
      out.extend(rlp::encode(&block));
      parent = header;
    }
    (out, genesis)
  }

  #[test]
  fn imports_contiguous_blocks_and_updates_last_accepted() {
    let (bytes, genesis) = chain_bytes(10);
    let exec = MemoryExecutionLayer::new(genesis);
    let overlay = Overlay::open_in_memory().unwrap();
    let importer = ChainImporter::new(&exec, &overlay, 2500, 4);
    let summary = importer.import(&bytes, false).unwrap();
    assert_eq!(summary.blocks_imported, 10);
    assert_eq!(summary.height_after, 10);
    assert_eq!(exec.canonical_head().unwrap().height, 10);
    let last_hash = exec.header_at_height(10).unwrap().hash();
    assert_eq!(overlay.last_accepted().unwrap(), Some(last_hash));
  }

  #[test]
  fn gzip_framed_stream_is_decompressed() {
    let (bytes, genesis) = chain_bytes(3);
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&bytes).unwrap();
    let gz = encoder.finish().unwrap();

    let exec = MemoryExecutionLayer::new(genesis);
    let overlay = Overlay::open_in_memory().unwrap();
    let importer = ChainImporter::new(&exec, &overlay, 2500, 100);
    let summary = importer.import(&gz, true).unwrap();
    assert_eq!(summary.blocks_imported, 3);
  }

  #[test]
  fn importing_twice_is_idempotent_on_height() {
    let (bytes, genesis) = chain_bytes(5);
    let exec = MemoryExecutionLayer::new(genesis);
    let overlay = Overlay::open_in_memory().unwrap();
    let importer = ChainImporter::new(&exec, &overlay, 2500, 100);
    let first = importer.import(&bytes, false).unwrap();
    assert_eq!(first.height_after, 5);
    assert_eq!(first.blocks_imported, 5);
    // re-importing the exact same stream must not re-insert anything --
    // every batch is already canonical at its final height.
    let second = importer.import(&bytes, false).unwrap();
    assert_eq!(second.height_after, 5);
    assert_eq!(second.blocks_imported, 0);
    assert_eq!(exec.canonical_head().unwrap().height, 5);
  }
}
