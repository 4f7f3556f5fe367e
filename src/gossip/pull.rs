//! Pull gossiper: on a timer, sends a bloom filter summarising
//! locally-known tx ids to a sampled validator; the peer returns any tx it
//! has that the filter misses.

use std::{sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
  bloom::{Bloom, BloomParams},
  throttle::Throttle,
  validators::ValidatorSet,
};
use crate::{
  mempool::{Mempool, MempoolEntry},
  network::{
    router::{RequestHandler, RouterError},
    NodeId, RequestId, Sender,
  },
};

#[derive(Serialize, Deserialize)]
pub struct PullRequest {
  pub bloom_bits: Vec<u8>,
  pub num_hashes: u32,
}

pub struct PullGossiper<S: Sender> {
  mempool: Arc<dyn Mempool>,
  sender: Arc<S>,
  bloom_params: BloomParams,
  next_request_id: std::sync::atomic::AtomicU32,
}

impl<S: Sender> PullGossiper<S> {
  pub fn new(mempool: Arc<dyn Mempool>, sender: Arc<S>, bloom_params: BloomParams) -> Self {
    Self {
      mempool,
      sender,
      bloom_params,
      next_request_id: std::sync::atomic::AtomicU32::new(1),
    }
  }

  fn build_local_bloom(&self) -> Bloom {
    let mut bloom = Bloom::new(self.bloom_params);
    self.mempool.iterate(&mut |entry: &MempoolEntry| {
      bloom.insert(&entry.id);
    });
    bloom
  }

  /// One pull cycle: samples a single validator and sends it our bloom
  /// filter. The peer's response is delivered asynchronously through the
  /// network router and fed back into the mempool by the inbound handler.
  pub async fn tick(&self, validators: &ValidatorSet) {
    let target = match validators.sample(1, 0).into_iter().next() {
      Some(t) => t,
      None => return,
    };
    let bloom = self.build_local_bloom();
    let request =
      PullRequest { bloom_bits: bloom.to_bytes(), num_hashes: bloom.num_hashes() };
    let payload = bincode::serialize(&request).unwrap_or_default();
    let request_id =
      RequestId(self.next_request_id.fetch_add(1, std::sync::atomic::Ordering::Relaxed));
    debug!(?target, "pull gossip tick");
    self.sender.send_app_request(target, request_id, payload).await;
  }

  pub async fn run(
    self: Arc<Self>,
    validators: Arc<parking_lot::RwLock<ValidatorSet>>,
    frequency: Duration,
    mut cancel: tokio::sync::watch::Receiver<bool>,
  ) {
    let mut ticker = tokio::time::interval(frequency);
    loop {
      tokio::select! {
        _ = ticker.tick() => {
          let snapshot = validators.read().clone();
          self.tick(&snapshot).await;
        }
        _ = cancel.changed() => {
          if *cancel.borrow() {
            break;
          }
        }
      }
    }
  }

  /// Server-side half: given a peer's serialized `PullRequest`, returns
  /// the locally-known tx bytes its filter does not contain.
  pub fn respond(&self, request_bytes: &[u8]) -> Vec<Vec<u8>> {
    let request: PullRequest = match bincode::deserialize(request_bytes) {
      Ok(r) => r,
      Err(_) => return Vec::new(),
    };
    let mut missing = Vec::new();
    self.mempool.iterate(&mut |entry: &MempoolEntry| {
      if !Bloom::raw_contains(&request.bloom_bits, request.num_hashes, &entry.id) {
        missing.push(entry.bytes.clone());
      }
    });
    missing
  }
}

/// Wires `PullGossiper::respond` up as a router-dispatched `TxGossip`
/// handler: non-validators are dropped outright, validators are rate
/// limited per the configured throttling window.
pub struct TxGossipHandler<S: Sender> {
  pull: Arc<PullGossiper<S>>,
  throttle: Arc<Throttle>,
  validators: Arc<parking_lot::RwLock<ValidatorSet>>,
}

impl<S: Sender> TxGossipHandler<S> {
  pub fn new(
    pull: Arc<PullGossiper<S>>,
    throttle: Arc<Throttle>,
    validators: Arc<parking_lot::RwLock<ValidatorSet>>,
  ) -> Self {
    Self { pull, throttle, validators }
  }
}

impl<S: Sender> RequestHandler for TxGossipHandler<S> {
  fn handle(&self, from: NodeId, body: &[u8]) -> Result<Vec<u8>, RouterError> {
    if !self.validators.read().is_validator(&from) {
      return Err(RouterError::Handler("tx gossip from non-validator".into()));
    }
    if !self.throttle.allow(from) {
      return Err(RouterError::Handler("tx gossip rate limit exceeded".into()));
    }
    let missing = self.pull.respond(body);
    bincode::serialize(&missing).map_err(|e| RouterError::Handler(e.to_string()))
  }
}
