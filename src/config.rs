use std::time::Duration;

use serde::{Deserialize, Serialize};

/// The VM configuration, deserialized from the `configBytes` the host passes
/// into `Initialize`. This crate never reads configuration from disk, env,
/// or flags itself -- that belongs to the embedding host.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Permit state sync on startup.
  pub state_sync_enabled: bool,

  /// Skip sync if the local node is within this many blocks of the
  /// advertised summary height.
  pub state_sync_min_blocks: u64,

  /// Height interval at which syncable summaries are produced.
  pub state_sync_commit_interval: u64,

  /// Force a state-trie commit every N accepted blocks during import.
  pub commit_interval: u64,

  #[serde(with = "humantime_serde")]
  pub push_gossip_frequency: Duration,
  pub push_gossip_num_validators: usize,
  pub push_gossip_num_peers: usize,
  pub push_gossip_percent_stake: f64,

  #[serde(with = "humantime_serde")]
  pub pull_gossip_frequency: Duration,

  #[serde(with = "humantime_serde")]
  pub tx_gossip_throttling_period: Duration,
  pub tx_gossip_throttling_limit: usize,

  /// Decided-tier byte budget in the chain-state cache.
  pub accepted_cache_size: u64,
  /// Unverified-tier byte budget.
  pub unverified_cache_size: u64,
  /// Missing-tier entry-count budget.
  pub missing_cache_size: usize,

  /// Execution-layer snapshot cache, opaque to this crate.
  pub snapshot_cache: usize,

  /// Wipe warp signatures at start.
  pub prune_warp_db: bool,

  /// Use a standalone database rather than a prefix of the host's store.
  pub use_standalone_database: bool,

  #[serde(with = "humantime_serde")]
  pub min_block_building_retry_delay: Duration,

  /// Number of ancestor blocks the state-sync client pulls after adopting
  /// a remote summary.
  pub parents_to_get: u64,

  /// Discard a previously resumed partial sync rather than continuing it.
  pub state_sync_skip_resume: bool,

  /// Import/export batch size for the chain-import subsystem.
  pub import_batch_size: usize,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      state_sync_enabled: false,
      state_sync_min_blocks: 50,
      state_sync_commit_interval: 256,
      commit_interval: 4096,
      push_gossip_frequency: Duration::from_millis(100),
      push_gossip_num_validators: 100,
      push_gossip_num_peers: 0,
      push_gossip_percent_stake: 0.15,
      pull_gossip_frequency: Duration::from_secs(1),
      tx_gossip_throttling_period: Duration::from_secs(10),
      tx_gossip_throttling_limit: 2,
      accepted_cache_size: 64 * 1024 * 1024,
      unverified_cache_size: 32 * 1024 * 1024,
      missing_cache_size: 50_000,
      snapshot_cache: 256,
      prune_warp_db: false,
      use_standalone_database: false,
      min_block_building_retry_delay: Duration::from_millis(500),
      parents_to_get: 256,
      state_sync_skip_resume: false,
      import_batch_size: 2500,
    }
  }
}

impl Config {
  pub fn from_bytes(bytes: &[u8]) -> serde_json::Result<Self> {
    if bytes.is_empty() {
      return Ok(Self::default());
    }
    serde_json::from_slice(bytes)
  }
}

#[cfg(test)]
mod test {
  use super::Config;

  #[test]
  fn empty_bytes_yield_defaults() {
    let cfg = Config::from_bytes(&[]).unwrap();
    assert_eq!(cfg.state_sync_commit_interval, 256);
  }

  #[test]
  fn parses_partial_overrides() {
    let cfg =
      Config::from_bytes(br#"{"state_sync_enabled":true}"#.as_ref())
        .unwrap();
    assert!(cfg.state_sync_enabled);
    // untouched fields keep their defaults
    assert_eq!(cfg.commit_interval, 4096);
  }
}
