//! The Lifecycle Coordinator: the VM core. Owns the single VM-wide
//! reader/writer lock and wires every other component together behind the
//! host-facing contract -- `Initialize`, `SetState`, `BuildBlock`,
//! `ParseBlock`/`GetBlock`/`SetPreference`, the
//! `AppRequest`/`AppResponse`/`AppGossip` family, and `Shutdown`.
//!
//! Every dependency is injected at construction -- the execution layer,
//! the mempool, the sender, the trie reader, the sync peer client -- and
//! none of them is constructed here, so the coordinator never has to know
//! how to build its own collaborators, only how to hold and sequence them.

use std::{sync::Arc, time::Instant};

use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::{
  block::{cache::ChainCache, wrapper::Wrapper},
  builder::{BlockBuilder, BuildEvent},
  chainio::{export::ChainExporter, import::ChainImporter, ImportSummary},
  config::Config,
  db::{Overlay, WriteBatch, LAST_ACCEPTED_KEY},
  error::{Error, Result},
  execution::{ExecutionLayer, PrecompileRegistry},
  gossip::{
    bloom::BloomParams,
    inbound::InboundGossipHandler,
    pull::{PullGossiper, TxGossipHandler},
    push::PushGossiper,
    throttle::Throttle,
    validators::ValidatorSet,
  },
  mempool::{GasFilter, Mempool},
  metrics::Metrics,
  network::{
    router::{HandlerId, InboundRequest, RequestHandler, Router},
    sender::{NodeId, RequestId, Sender},
  },
  primitives::{Hash, Header},
  sync::{
    client::{ProofVerifier, SyncClient, SyncPeerClient},
    server::{SyncServer, TrieReader},
    summary::{Summary, SyncMode},
  },
};

/// The three VM lifecycle states. `SetState` drives this machine; unknown
/// states are rejected by the host binding layer before they ever reach
/// this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmState {
  StateSyncing,
  Bootstrapping,
  NormalOp,
}

/// The handles a `NormalOp` transition spins up: the builder and the two
/// gossip loops, plus the signal that tears them down again. Held behind
/// an `Option` so `StateSyncing`/`Bootstrapping` genuinely have none of
/// this running.
struct Running<S: Sender> {
  builder: Arc<BlockBuilder>,
  push: Arc<PushGossiper<S>>,
  #[allow(dead_code)]
  pull: Arc<PullGossiper<S>>,
  cancel: watch::Sender<bool>,
  push_task: tokio::task::JoinHandle<()>,
  pull_task: tokio::task::JoinHandle<()>,
}

pub struct Coordinator<E: ExecutionLayer, S: Sender, P: SyncPeerClient> {
  execution: Arc<E>,
  overlay: Overlay,
  sender: Arc<S>,
  mempool: Arc<dyn Mempool>,
  config: Config,
  metrics: Metrics,
  cache: ChainCache<E>,
  inbound_gossip: InboundGossipHandler,
  validators: Arc<parking_lot::RwLock<ValidatorSet>>,
  throttle: Arc<Throttle>,
  router: RwLock<Router>,
  sync_server: SyncServer<E>,
  sync_client: Arc<SyncClient<P>>,
  state: RwLock<VmState>,
  running: RwLock<Option<Running<S>>>,
}

impl<E: ExecutionLayer, S: Sender, P: SyncPeerClient> Coordinator<E, S, P> {
  #[allow(clippy::too_many_arguments)]
  pub fn new(
    execution: Arc<E>,
    overlay: Overlay,
    sender: Arc<S>,
    mempool: Arc<dyn Mempool>,
    trie: Arc<dyn TrieReader>,
    sync_peer: Arc<P>,
    verifier: Arc<dyn ProofVerifier>,
    precompiles: Arc<dyn PrecompileRegistry>,
    config: Config,
    metrics: Metrics,
  ) -> Self {
    let cache = ChainCache::new(
      Arc::clone(&execution),
      precompiles,
      config.accepted_cache_size,
      config.unverified_cache_size,
      config.missing_cache_size,
    );
    let sync_server = SyncServer::new(
      Arc::clone(&execution),
      trie,
      config.state_sync_commit_interval,
      1024,
      config.parents_to_get,
    );
    let sync_client = Arc::new(SyncClient::new(
      overlay.clone(),
      sync_peer,
      verifier,
      config.state_sync_min_blocks,
      config.parents_to_get,
      config.state_sync_skip_resume,
    ));
    let throttle = Arc::new(Throttle::new(
      config.tx_gossip_throttling_period,
      config.tx_gossip_throttling_limit,
    ));
    Self {
      execution,
      overlay,
      sender,
      inbound_gossip: InboundGossipHandler::new(Arc::clone(&mempool)),
      mempool,
      config,
      metrics,
      cache,
      validators: Arc::new(parking_lot::RwLock::new(ValidatorSet::new(vec![], vec![]))),
      throttle,
      router: RwLock::new(Router::new()),
      sync_server,
      sync_client,
      state: RwLock::new(VmState::StateSyncing),
      running: RwLock::new(None),
    }
  }

  /// Reads the persisted last-accepted pointer, falling back to the
  /// genesis hash on a first run and persisting it.
  pub fn initialize(&self, genesis: &Header) -> Result<()> {
    let genesis_hash = genesis.hash();
    match self.overlay.last_accepted()? {
      Some(hash) => self.cache.set_last_accepted(hash),
      None => {
        self.overlay.set_last_accepted_direct(&genesis_hash)?;
        self.cache.set_last_accepted(genesis_hash);
      }
    }
    info!(last_accepted = %self.cache.last_accepted().expect("set above"), "vm initialized");
    Ok(())
  }

  pub fn last_accepted(&self) -> Option<Hash> {
    self.cache.last_accepted()
  }

  pub fn state(&self) -> VmState {
    *self.state.read()
  }

  /// `NormalOp` is idempotent; the other two transitions always run their
  /// side effects, since the host may re-signal `StateSyncing` after a
  /// failed sync attempt.
  pub fn set_state(&self, new_state: VmState) -> Result<()> {
    match new_state {
      VmState::StateSyncing => {
        self.stop_normal_op();
      }
      VmState::Bootstrapping => {
        // a previous partial sync must not be re-entered once direct
        // history processing begins.
        self.sync_client.clear_resumed_summary()?;
      }
      VmState::NormalOp => {
        if *self.state.read() == VmState::NormalOp {
          debug!("set_state(NormalOp) is a no-op, already running");
          return Ok(());
        }
        self.start_normal_op();
      }
    }
    *self.state.write() = new_state;
    info!(?new_state, "vm state transition");
    Ok(())
  }

  fn start_normal_op(&self) {
    if self.running.read().is_some() {
      return;
    }
    let builder = Arc::new(BlockBuilder::new(
      Arc::clone(&self.mempool),
      self.config.min_block_building_retry_delay,
      GasFilter::default(),
    ));
    let push = Arc::new(PushGossiper::new(
      Arc::clone(&self.mempool),
      Arc::clone(&self.sender),
      self.config.push_gossip_num_validators,
      self.config.push_gossip_num_peers,
      self.config.push_gossip_percent_stake,
    ));
    let pull = Arc::new(PullGossiper::new(
      Arc::clone(&self.mempool),
      Arc::clone(&self.sender),
      BloomParams::default(),
    ));
    self.router.write().register(
      HandlerId::TxGossip,
      Box::new(TxGossipHandler::new(
        Arc::clone(&pull),
        Arc::clone(&self.throttle),
        Arc::clone(&self.validators),
      )),
    );
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let push_task = tokio::spawn(Arc::clone(&push).run(
      Arc::clone(&self.validators),
      self.config.push_gossip_frequency,
      cancel_rx.clone(),
    ));
    let pull_task = tokio::spawn(Arc::clone(&pull).run(
      Arc::clone(&self.validators),
      self.config.pull_gossip_frequency,
      cancel_rx,
    ));
    *self.running.write() = Some(Running {
      builder,
      push,
      pull,
      cancel: cancel_tx,
      push_task,
      pull_task,
    });
  }

  fn stop_normal_op(&self) {
    if let Some(running) = self.running.write().take() {
      running.builder.cancel();
      let _ = running.cancel.send(true);
      running.push_task.abort();
      running.pull_task.abort();
    }
  }

  /// Builds a new block on top of the current head. Only callable in
  /// `NormalOp`.
  pub fn build_block(&self, transactions: Vec<Vec<u8>>, timestamp: u64) -> Result<Arc<Wrapper<E>>> {
    if *self.state.read() != VmState::NormalOp {
      return Err(Error::Invariant("build_block called outside NormalOp".into()));
    }
    let wrapper = self.cache.build_block(transactions, timestamp)?;
    if let Some(running) = self.running.read().as_ref() {
      running.builder.handle_generate_block();
    }
    self.metrics.incr("blocks_built");
    Ok(wrapper)
  }

  /// Blocks until the mempool has pending work under backpressure, or
  /// until the builder is cancelled.
  pub async fn wait_for_event(&self) -> Result<BuildEvent> {
    let builder = {
      let guard = self.running.read();
      match guard.as_ref() {
        Some(r) => Arc::clone(&r.builder),
        None => {
          return Err(Error::Invariant(
            "wait_for_event called outside NormalOp".into(),
          ))
        }
      }
    };
    Ok(builder.wait_for_event().await)
  }

  /// The local-submission path the push gossiper's loopback-suppression
  /// assumes exists: adds `txs` to the mempool and, for each one newly
  /// admitted, marks it eligible for the next push cycle. Transactions
  /// that arrive via gossip instead go through `app_gossip` and are never
  /// recorded here, so they are never pushed back out to their sender.
  pub fn submit_local_tx(&self, txs: Vec<crate::mempool::MempoolEntry>) -> Vec<Hash> {
    let added = self.mempool.add(txs);
    if let Some(running) = self.running.read().as_ref() {
      for id in &added {
        running.push.record_local(*id);
      }
    }
    added
  }

  pub fn parse_block(&self, bytes: &[u8]) -> Result<Arc<Wrapper<E>>> {
    Ok(self.cache.parse_block(bytes)?)
  }

  pub fn get_block(&self, id: &Hash) -> Result<Arc<Wrapper<E>>> {
    Ok(self.cache.get_block(id)?)
  }

  pub fn get_block_id_at_height(&self, height: u64) -> Result<Hash> {
    Ok(self.cache.get_block_id_at_height(height)?)
  }

  /// Forwards the host's `SetPreference` signal to the execution layer's
  /// own canonical head pointer. A failure here means the host named a
  /// block this VM core has never verified -- logged rather than
  /// propagated, since `SetPreference` has no error return in the host
  /// contract.
  pub fn set_preference(&self, id: Hash) {
    if let Err(e) = self.execution.set_preference(&id) {
      warn!(%id, error = %e, "set_preference failed");
    }
  }

  /// Verifies and accepts `wrapper`, moving it into the decided tier and
  /// advancing the last-accepted pointer atomically. Accept is legal only
  /// when the parent is itself accepted; a parent that is missing or sits
  /// in any other state is a fatal invariant violation, since the host is
  /// expected to deliver accepts in topological order.
  pub fn accept_block(&self, wrapper: &Arc<Wrapper<E>>) -> Result<()> {
    if wrapper.height() > 0 {
      // hosts deliver accepts in topological order on a single canonical
      // chain, so the parent being accepted means it is exactly the
      // current last-accepted block -- anything else is a host ordering
      // bug or a fork this VM core does not support.
      let parent_accepted = match self.cache.last_accepted() {
        Some(last) => last == wrapper.parent_id(),
        None => false,
      };
      if !parent_accepted {
        match self.cache.get_block(&wrapper.parent_id()) {
          Ok(parent) => Error::fatal(format!(
            "accept_block({}): parent {} is in state {:?}, not the current last-accepted block",
            wrapper.id(),
            parent.id(),
            parent.decision()
          )),
          Err(_) => Error::fatal(format!(
            "accept_block({}): parent {} is unknown",
            wrapper.id(),
            wrapper.parent_id()
          )),
        }
      }
    }
    wrapper.accept()?;
    self.cache.finalize_decision(wrapper);
    let mut batch = WriteBatch::new();
    batch.put_root(LAST_ACCEPTED_KEY, wrapper.id().as_bytes());
    self.overlay.commit(batch)?;
    self.metrics.incr("blocks_accepted");
    Ok(())
  }

  pub fn reject_block(&self, wrapper: &Arc<Wrapper<E>>) -> Result<()> {
    wrapper.reject()?;
    self.cache.finalize_decision(wrapper);
    self.metrics.incr("blocks_rejected");
    Ok(())
  }

  /// Drives a full state sync against `summary`. Only meaningful while
  /// `StateSyncing`; the caller transitions to `Bootstrapping` afterward.
  pub async fn accept_state_sync(&self, summary: Summary) -> Result<SyncMode> {
    if *self.state.read() != VmState::StateSyncing {
      return Err(Error::Invariant(
        "accept_state_sync called outside StateSyncing".into(),
      ));
    }
    let local_height = self.execution.canonical_head().map(|h| h.height).unwrap_or(0);
    let mode = self
      .sync_client
      .accept(summary, local_height)
      .await
      .map_err(crate::sync::SyncError::Client)?;
    if mode != SyncMode::Skipped {
      self.cache.set_last_accepted(summary.block_hash);
      self.metrics.incr("state_syncs_completed");
    }
    Ok(mode)
  }

  pub fn sync_server(&self) -> &SyncServer<E> {
    &self.sync_server
  }

  /// Ingests an RLP block stream and advances the last-accepted pointer
  /// to the final imported height.
  pub fn import_chain(&self, raw: &[u8], gzip: bool) -> Result<ImportSummary> {
    let importer = ChainImporter::new(
      &*self.execution,
      &self.overlay,
      self.config.import_batch_size,
      self.config.commit_interval,
    );
    let summary = importer.import(raw, gzip)?;
    if let Some(head) = self.execution.canonical_head() {
      self.cache.set_last_accepted(head.hash());
    }
    self.metrics.incr_by("blocks_imported", summary.blocks_imported);
    Ok(summary)
  }

  pub fn export_chain(&self, first: u64, last: u64, gzip: bool) -> Result<Vec<u8>> {
    let exporter = ChainExporter::new(&*self.execution);
    Ok(exporter.export(first, last, gzip)?)
  }

  pub fn register_handler(&self, id: HandlerId, handler: Box<dyn RequestHandler>) {
    self.router.write().register(id, handler);
  }

  /// Decodes the leading handler-id tag and dispatches through the
  /// router, guaranteeing exactly one response.
  pub async fn app_request(
    &self,
    from: NodeId,
    request_id: RequestId,
    payload: Vec<u8>,
    deadline: Option<Instant>,
  ) {
    let (handler_id, body) = match Router::decode_handler_id(&payload) {
      Ok(v) => v,
      Err(e) => {
        self.sender.send_app_error(from, request_id, 1, e.to_string()).await;
        return;
      }
    };
    let request = InboundRequest { from, request_id, handler: handler_id, body: body.to_vec(), deadline };
    let result = self.router.read().dispatch(&request);
    match result {
      Ok(response) => self.sender.send_app_response(from, request_id, response).await,
      Err(e) => self.sender.send_app_error(from, request_id, 2, e.to_string()).await,
    }
  }

  /// The only generic response path this crate defines is the tx-gossip
  /// pull reply; state-sync fetches are driven through the dedicated
  /// `SyncPeerClient`/`TrieReader` seams instead of this router.
  pub fn app_response(&self, _from: NodeId, _request_id: RequestId, payload: Vec<u8>) {
    self.inbound_gossip.handle_pull_response(&payload);
  }

  pub fn app_gossip(&self, payload: &[u8]) {
    self.inbound_gossip.handle_gossip(payload);
  }

  pub fn app_request_failed(&self, from: NodeId, request_id: RequestId) {
    warn!(?from, ?request_id, "app request failed");
  }

  /// Replaces the externally-provided validator set. This crate treats
  /// the set as read-only and never derives it from
  /// `Connected`/`Disconnected` itself.
  pub fn set_validators(&self, validators: ValidatorSet) {
    *self.validators.write() = validators;
  }

  pub fn connected(&self, node: NodeId) {
    debug!(?node, "peer connected");
  }

  pub fn disconnected(&self, node: NodeId) {
    debug!(?node, "peer disconnected");
  }

  /// Cancels the gossip loops, stops the sync client, and flushes the
  /// overlay. Idempotent, including when called while a state sync is
  /// still in flight.
  pub fn shutdown(&self) -> Result<()> {
    self.sync_client.shutdown();
    self.stop_normal_op();
    self.overlay.sync()?;
    info!("vm shutdown complete");
    Ok(())
  }
}
