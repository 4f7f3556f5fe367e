//! A small, dependency-free bloom filter keyed by two independent
//! `keccak256`-derived offsets, used by the pull gossiper to summarise
//! locally-known tx ids.

use crate::primitives::Hash;

/// Parameters controlling size vs. false-positive rate:
/// `(targetElements, targetFP, resetFP)`.
#[derive(Debug, Clone, Copy)]
pub struct BloomParams {
  pub target_elements: usize,
  pub target_fp: f64,
  pub reset_fp: f64,
}

impl Default for BloomParams {
  fn default() -> Self {
    Self { target_elements: 10_000, target_fp: 0.01, reset_fp: 0.05 }
  }
}

pub struct Bloom {
  bits: Vec<u8>,
  num_bits: usize,
  num_hashes: u32,
  inserted: usize,
  params: BloomParams,
}

fn optimal_num_bits(n: usize, fp: f64) -> usize {
  if n == 0 {
    return 8;
  }
  let m = -((n as f64) * fp.ln()) / (std::f64::consts::LN_2.powi(2));
  (m.ceil() as usize).max(8)
}

fn optimal_num_hashes(num_bits: usize, n: usize) -> u32 {
  if n == 0 {
    return 1;
  }
  let k = (num_bits as f64 / n as f64) * std::f64::consts::LN_2;
  (k.round() as u32).clamp(1, 24)
}

impl Bloom {
  pub fn new(params: BloomParams) -> Self {
    let num_bits = optimal_num_bits(params.target_elements, params.target_fp);
    let num_hashes = optimal_num_hashes(num_bits, params.target_elements);
    Self {
      bits: vec![0u8; (num_bits + 7) / 8],
      num_bits,
      num_hashes,
      inserted: 0,
      params,
    }
  }

  /// Two independent offsets derived from distinct keccak preimages, then
  /// combined per the standard double-hashing bloom construction
  /// (`h_i = h1 + i*h2 mod m`), avoiding the need for a full hash per slot.
  fn offsets(&self, id: &Hash) -> (u64, u64) {
    let h1 = Hash::keccak256([b"bloom1".as_ref(), id.as_ref()].concat());
    let h2 = Hash::keccak256([b"bloom2".as_ref(), id.as_ref()].concat());
    let to_u64 = |h: &Hash| u64::from_le_bytes(h.as_bytes()[0..8].try_into().unwrap());
    (to_u64(&h1), to_u64(&h2))
  }

  fn set_bit(&mut self, idx: usize) {
    self.bits[idx / 8] |= 1 << (idx % 8);
  }

  pub fn insert(&mut self, id: &Hash) {
    let (h1, h2) = self.offsets(id);
    for i in 0..self.num_hashes as u64 {
      let idx = (h1.wrapping_add(i.wrapping_mul(h2))) as usize % self.num_bits;
      self.set_bit(idx);
    }
    self.inserted += 1;
  }

  pub fn contains(&self, id: &Hash) -> bool {
    Self::raw_contains(&self.bits, self.num_hashes, id)
  }

  /// Current estimated false-positive rate given how many elements have
  /// been inserted so far: `(1 - e^(-kn/m))^k`.
  pub fn estimated_fp_rate(&self) -> f64 {
    let k = self.num_hashes as f64;
    let n = self.inserted as f64;
    let m = self.num_bits as f64;
    (1.0 - (-k * n / m).exp()).powf(k)
  }

  /// Whether the filter has drifted past `resetFP` and should be rebuilt.
  pub fn needs_reset(&self) -> bool {
    self.estimated_fp_rate() > self.params.reset_fp
  }

  pub fn to_bytes(&self) -> Vec<u8> {
    self.bits.clone()
  }

  pub fn num_hashes(&self) -> u32 {
    self.num_hashes
  }

  /// Tests membership against raw transmitted bloom bits and hash count,
  /// without reconstructing a full `Bloom` -- used on the pull-gossip
  /// server side, which only ever needs read access to a peer's filter.
  pub fn raw_contains(bits: &[u8], num_hashes: u32, id: &Hash) -> bool {
    let num_bits = bits.len() * 8;
    if num_bits == 0 {
      return false;
    }
    let h1 = Hash::keccak256([b"bloom1".as_ref(), id.as_ref()].concat());
    let h2 = Hash::keccak256([b"bloom2".as_ref(), id.as_ref()].concat());
    let to_u64 =
      |h: &Hash| u64::from_le_bytes(h.as_bytes()[0..8].try_into().unwrap());
    let (h1, h2) = (to_u64(&h1), to_u64(&h2));
    for i in 0..num_hashes as u64 {
      let idx = (h1.wrapping_add(i.wrapping_mul(h2))) as usize % num_bits;
      if bits[idx / 8] & (1 << (idx % 8)) == 0 {
        return false;
      }
    }
    true
  }
}
