pub mod client;
pub mod server;
pub mod summary;

pub use client::{ClientError, NoopProofVerifier, ProofVerifier, SyncClient, SyncPeerClient};
pub use server::{ServerError, SyncServer, TrieReader};
pub use summary::{Summary, SyncMode, SUMMARY_WIRE_LEN};

use thiserror::Error;

/// Crate-level aggregation of state-sync errors, for the `Error` aggregate
/// the Lifecycle Coordinator returns to its host.
#[derive(Debug, Error)]
pub enum SyncError {
  #[error(transparent)]
  Client(#[from] ClientError),
  #[error(transparent)]
  Server(#[from] ServerError),
}
