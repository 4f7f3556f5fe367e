use {
  serde::{Deserialize, Serialize},
  sha3::{Digest, Keccak256},
  std::fmt,
};

/// A fixed-width 32-byte block/state identity.
///
/// Every live block, every state root and every transaction fingerprint in
/// this crate is keyed by one of these. It is deliberately a plain newtype
/// over `[u8; 32]` rather than a CID-like structure: the execution layer
/// this VM hosts derives its hashes with `keccak256`, not a multihash
/// scheme.
#[derive(
  Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Hash(pub [u8; 32]);

impl Hash {
  pub const ZERO: Hash = Hash([0u8; 32]);

  pub fn keccak256(data: impl AsRef<[u8]>) -> Self {
    let mut hasher = Keccak256::new();
    hasher.update(data.as_ref());
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    Hash(out)
  }

  pub fn as_bytes(&self) -> &[u8; 32] {
    &self.0
  }

  pub fn to_hex(&self) -> String {
    hex::encode(self.0)
  }
}

impl AsRef<[u8]> for Hash {
  fn as_ref(&self) -> &[u8] {
    &self.0
  }
}

impl From<[u8; 32]> for Hash {
  fn from(b: [u8; 32]) -> Self {
    Hash(b)
  }
}

impl TryFrom<&[u8]> for Hash {
  type Error = std::array::TryFromSliceError;

  fn try_from(b: &[u8]) -> Result<Self, Self::Error> {
    Ok(Hash(b.try_into()?))
  }
}

impl fmt::Display for Hash {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "0x{}", self.to_hex())
  }
}

impl fmt::Debug for Hash {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "Hash(0x{})", self.to_hex())
  }
}

#[cfg(test)]
mod test {
  use super::Hash;

  #[test]
  fn keccak_is_deterministic() {
    let a = Hash::keccak256(b"rensa");
    let b = Hash::keccak256(b"rensa");
    assert_eq!(a, b);
    assert_ne!(a, Hash::keccak256(b"rensa-vm"));
  }

  #[test]
  fn round_trips_through_bytes() {
    let h = Hash::keccak256(b"some block header bytes");
    let bytes = *h.as_bytes();
    assert_eq!(Hash::from(bytes), h);
  }
}
