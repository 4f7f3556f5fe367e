//! The validator set as seen by the gossip sampler: read-only from this
//! crate's perspective. The host owns membership changes and pushes a
//! full replacement set through `set_validators`; this crate never derives
//! or mutates it from connect/disconnect notifications itself.

use rand::{distributions::WeightedIndex, prelude::Distribution, rngs::ThreadRng};

use crate::network::NodeId;

#[derive(Debug, Clone)]
pub struct Validator {
  pub node: NodeId,
  pub stake: u64,
}

/// A read-only, stake-weighted view over the current validator set, plus
/// any additionally connected non-validator peers the pull gossiper may
/// also sample.
#[derive(Clone)]
pub struct ValidatorSet {
  validators: Vec<Validator>,
  peers: Vec<NodeId>,
}

impl ValidatorSet {
  pub fn new(validators: Vec<Validator>, peers: Vec<NodeId>) -> Self {
    Self { validators, peers }
  }

  pub fn is_validator(&self, node: &NodeId) -> bool {
    self.validators.iter().any(|v| &v.node == node)
  }

  pub fn total_stake(&self) -> u64 {
    self.validators.iter().map(|v| v.stake).sum()
  }

  /// Samples up to `num_validators` stake-weighted validators plus up to
  /// `num_peers` additional non-validator peers.
  pub fn sample(&self, num_validators: usize, num_peers: usize) -> Vec<NodeId> {
    let mut out = Vec::with_capacity(num_validators + num_peers);
    if !self.validators.is_empty() {
      let weights: Vec<u64> = self.validators.iter().map(|v| v.stake.max(1)).collect();
      if let Ok(dist) = WeightedIndex::new(&weights) {
        let mut rng: ThreadRng = rand::thread_rng();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..num_validators.min(self.validators.len()) {
          for _ in 0..self.validators.len() {
            let idx = dist.sample(&mut rng);
            let node = self.validators[idx].node;
            if seen.insert(node) {
              out.push(node);
              break;
            }
          }
        }
      }
    }
    for peer in self.peers.iter().take(num_peers) {
      if !out.contains(peer) {
        out.push(*peer);
      }
    }
    out
  }

  /// Picks the highest-stake validators, in descending order, until their
  /// combined stake share meets `stake_percentage` of total stake, and
  /// returns the one that crossed the threshold.
  pub fn primary_target(&self, stake_percentage: f64) -> Option<NodeId> {
    if self.validators.is_empty() {
      return None;
    }
    let target = self.total_stake() as f64 * stake_percentage;
    let mut sorted = self.validators.clone();
    sorted.sort_by(|a, b| b.stake.cmp(&a.stake));
    let mut acc = 0u64;
    for v in &sorted {
      acc += v.stake;
      if acc as f64 >= target {
        return Some(v.node);
      }
    }
    sorted.last().map(|v| v.node)
  }
}

#[cfg(test)]
mod test {
  use super::*;

  fn node(tag: u8) -> NodeId {
    let mut n = [0u8; 32];
    n[0] = tag;
    n
  }

  #[test]
  fn sample_never_exceeds_validator_count() {
    let vs = ValidatorSet::new(
      vec![Validator { node: node(1), stake: 10 }, Validator { node: node(2), stake: 20 }],
      vec![],
    );
    let sampled = vs.sample(10, 0);
    assert!(sampled.len() <= 2);
  }

  #[test]
  fn is_validator_checks_membership() {
    let vs = ValidatorSet::new(vec![Validator { node: node(1), stake: 10 }], vec![node(9)]);
    assert!(vs.is_validator(&node(1)));
    assert!(!vs.is_validator(&node(9)));
  }

  #[test]
  fn primary_target_picks_highest_stake_for_full_percentage() {
    let vs = ValidatorSet::new(
      vec![
        Validator { node: node(1), stake: 1 },
        Validator { node: node(2), stake: 99 },
      ],
      vec![],
    );
    assert_eq!(vs.primary_target(1.0), Some(node(2)));
  }
}
