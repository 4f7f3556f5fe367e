//! Inbound gossip handler: deserializes each gossip message into a tx and
//! adds it to the mempool. Never re-gossips what it receives -- only
//! locally-submitted txs are eligible for push.
//!
//! A deserialization or add error aborts processing for that message only;
//! the peer is not penalised here -- the consensus layer handles peer
//! misbehaviour out of band.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::{
  mempool::{Mempool, MempoolEntry},
  primitives::Hash,
};

pub struct InboundGossipHandler {
  mempool: Arc<dyn Mempool>,
}

impl InboundGossipHandler {
  pub fn new(mempool: Arc<dyn Mempool>) -> Self {
    Self { mempool }
  }

  /// Handles one push-gossip payload: a bincode-encoded `Vec<Vec<u8>>` of
  /// raw tx bytes, as emitted by `PushGossiper::tick`.
  pub fn handle_gossip(&self, payload: &[u8]) {
    let txs: Vec<Vec<u8>> = match bincode::deserialize(payload) {
      Ok(t) => t,
      Err(e) => {
        warn!(error = %e, "failed to deserialize gossip payload, dropping message");
        return;
      }
    };
    let entries: Vec<MempoolEntry> = txs
      .into_iter()
      .map(|bytes| MempoolEntry { id: Hash::keccak256(&bytes), bytes, submitted_at: 0 })
      .collect();
    let added = self.mempool.add(entries);
    debug!(count = added.len(), "accepted gossiped transactions");
  }

  /// Handles one pull-response payload: the same raw-tx-bytes encoding.
  pub fn handle_pull_response(&self, payload: &[u8]) {
    self.handle_gossip(payload);
  }
}
