//! A write-buffering overlay over a `sled` key/value store.
//!
//! The persisted layout is a flat keyspace carved into non-overlapping
//! prefixes (`chain_accepted`, `metadata`, `warp`, `ethdb`, `validators`)
//! sharing one underlying store, with only one writer active at a time.
//! `sled` has no column families, so namespacing is done with a
//! byte-prefix on every key instead, and atomicity comes from a staged
//! `sled::Batch`.

use std::sync::Arc;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
  #[error("storage engine error: {0}")]
  Engine(#[from] sled::Error),

  #[error("serialization error: {0}")]
  Serialization(#[from] bincode::Error),

  #[error("key not found")]
  NotFound,
}

pub type DbResult<T> = std::result::Result<T, DbError>;

/// Reserved key prefixes carving up the shared keyspace.
pub mod prefix {
  pub const CHAIN_ACCEPTED: &[u8] = b"chain_accepted/";
  pub const METADATA: &[u8] = b"metadata/";
  pub const WARP: &[u8] = b"warp/";
  pub const ETHDB: &[u8] = b"ethdb/";
  pub const VALIDATORS: &[u8] = b"validators/";
}

/// The well-known key under which the last-accepted block hash is stored,
/// unprefixed -- it lives at the root of the overlay.
pub const LAST_ACCEPTED_KEY: &[u8] = b"last_accepted_key";

fn namespaced(prefix: &[u8], key: &[u8]) -> Vec<u8> {
  let mut out = Vec::with_capacity(prefix.len() + key.len());
  out.extend_from_slice(prefix);
  out.extend_from_slice(key);
  out
}

/// A batch of writes staged against the overlay and committed as one unit.
///
/// Callers must stage the last-accepted pointer update and any
/// state-affecting writes in the *same* batch so that readers either
/// observe both or neither.
#[derive(Default)]
pub struct WriteBatch {
  batch: sled::Batch,
}

impl WriteBatch {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn put(&mut self, prefix: &[u8], key: &[u8], value: &[u8]) {
    self.batch.insert(namespaced(prefix, key), value);
  }

  pub fn put_root(&mut self, key: &[u8], value: &[u8]) {
    self.batch.insert(key, value);
  }

  pub fn remove(&mut self, prefix: &[u8], key: &[u8]) {
    self.batch.remove(namespaced(prefix, key));
  }
}

/// The versioned overlay: a thin wrapper around one `sled::Tree` (the
/// default tree) with prefix namespacing and a single serialized `Commit`
/// path. `Sync` flushes to disk; `Commit` stages in memory -- callers that
/// need durability call `Commit` then `Sync`, in that order.
#[derive(Clone)]
pub struct Overlay {
  tree: Arc<sled::Db>,
}

impl Overlay {
  pub fn open_standalone(path: impl AsRef<std::path::Path>) -> DbResult<Self> {
    Ok(Self { tree: Arc::new(sled::open(path)?) })
  }

  pub fn open_in_memory() -> DbResult<Self> {
    Ok(Self {
      tree: Arc::new(sled::Config::new().temporary(true).open()?),
    })
  }

  pub fn get(&self, prefix: &[u8], key: &[u8]) -> DbResult<Option<Vec<u8>>> {
    Ok(self.tree.get(namespaced(prefix, key))?.map(|v| v.to_vec()))
  }

  pub fn get_root(&self, key: &[u8]) -> DbResult<Option<Vec<u8>>> {
    Ok(self.tree.get(key)?.map(|v| v.to_vec()))
  }

  pub fn put(&self, prefix: &[u8], key: &[u8], value: &[u8]) -> DbResult<()> {
    self.tree.insert(namespaced(prefix, key), value)?;
    Ok(())
  }

  pub fn put_root(&self, key: &[u8], value: &[u8]) -> DbResult<()> {
    self.tree.insert(key, value)?;
    Ok(())
  }

  pub fn scan_prefix(
    &self,
    prefix: &[u8],
  ) -> DbResult<Vec<(Vec<u8>, Vec<u8>)>> {
    let mut out = Vec::new();
    for item in self.tree.scan_prefix(prefix) {
      let (k, v) = item?;
      out.push((k[prefix.len()..].to_vec(), v.to_vec()));
    }
    Ok(out)
  }

  /// Applies a staged batch atomically, then flushes to disk. Callers that
  /// need only in-memory atomicity (tests) may skip `sync`.
  pub fn commit(&self, batch: WriteBatch) -> DbResult<()> {
    self.tree.apply_batch(batch.batch)?;
    Ok(())
  }

  pub fn sync(&self) -> DbResult<()> {
    self.tree.flush()?;
    Ok(())
  }

  pub fn last_accepted(&self) -> DbResult<Option<crate::primitives::Hash>> {
    match self.get_root(LAST_ACCEPTED_KEY)? {
      Some(bytes) => Ok(Some(
        crate::primitives::Hash::try_from(bytes.as_slice())
          .map_err(|_| DbError::NotFound)?,
      )),
      None => Ok(None),
    }
  }

  pub fn set_last_accepted_direct(
    &self,
    hash: &crate::primitives::Hash,
  ) -> DbResult<()> {
    self.put_root(LAST_ACCEPTED_KEY, hash.as_bytes())
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::primitives::Hash;

  #[test]
  fn namespacing_keeps_prefixes_disjoint() {
    let db = Overlay::open_in_memory().unwrap();
    db.put(prefix::ETHDB, b"k", b"eth-value").unwrap();
    db.put(prefix::WARP, b"k", b"warp-value").unwrap();
    assert_eq!(
      db.get(prefix::ETHDB, b"k").unwrap().unwrap(),
      b"eth-value"
    );
    assert_eq!(
      db.get(prefix::WARP, b"k").unwrap().unwrap(),
      b"warp-value"
    );
  }

  #[test]
  fn batch_commit_is_all_or_nothing_in_effect() {
    let db = Overlay::open_in_memory().unwrap();
    let hash = Hash::keccak256(b"block-1");
    let mut batch = WriteBatch::new();
    batch.put_root(LAST_ACCEPTED_KEY, hash.as_bytes());
    batch.put(prefix::ETHDB, b"state-root", b"some-root");
    db.commit(batch).unwrap();

    assert_eq!(db.last_accepted().unwrap(), Some(hash));
    assert_eq!(
      db.get(prefix::ETHDB, b"state-root").unwrap().unwrap(),
      b"some-root"
    );
  }

  #[test]
  fn missing_last_accepted_is_none() {
    let db = Overlay::open_in_memory().unwrap();
    assert_eq!(db.last_accepted().unwrap(), None);
  }
}
