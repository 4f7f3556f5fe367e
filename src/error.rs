use thiserror::Error;

use crate::{
  block::{cache::CacheError, wrapper::WrapperError},
  chainio::{ExportError, ImportError},
  db::DbError,
  sync::SyncError,
};

/// Crate-wide error returned by the Lifecycle Coordinator to its host.
///
/// Every component keeps its own error enum (`WrapperError`, `DbError`,
/// `SyncError`, `ImportError`, ...); this type aggregates them at the one
/// seam the host actually observes, without hiding which one fired.
#[derive(Debug, Error)]
pub enum Error {
  #[error("block error: {0}")]
  Block(#[from] WrapperError),

  #[error("cache error: {0}")]
  Cache(#[from] CacheError),

  #[error("database error: {0}")]
  Db(#[from] DbError),

  #[error("sync error: {0}")]
  Sync(#[from] SyncError),

  #[error("import error: {0}")]
  Import(#[from] ImportError),

  #[error("export error: {0}")]
  Export(#[from] ExportError),

  #[error("unknown VM state requested: {0}")]
  UnknownState(String),

  #[error("operation cancelled")]
  Cancelled,

  #[error("not found")]
  NotFound,

  #[error("invariant violated: {0}")]
  Invariant(String),
}

impl Error {
  /// Logs and aborts the process. Used only for invariant violations -- a
  /// last-accepted height decrease, an Accept on a block whose parent
  /// isn't accepted, or a parent/child state mismatch. These are bugs,
  /// not recoverable conditions.
  pub fn fatal(msg: impl Into<String>) -> ! {
    let msg = msg.into();
    tracing::error!(%msg, "fatal invariant violation, aborting");
    panic!("rensa-vm invariant violation: {msg}");
  }
}

pub type Result<T> = std::result::Result<T, Error>;
