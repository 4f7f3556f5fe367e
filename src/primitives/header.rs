use {
  super::Hash,
  ethereum_types::U256,
  rlp::{Decodable, DecoderError, Encodable, Rlp, RlpStream},
};

/// The RLP-empty-list hash. Uncles are never supported by this VM, so a
/// well-formed header's `uncle_hash` must equal this constant.
pub fn empty_uncle_hash() -> Hash {
  // keccak256(rlp([])) == keccak256(0xc0)
  Hash::keccak256([0xc0u8])
}

/// Ethereum-compatible block header with the post-fork extras this VM
/// requires (`ext_data_hash`, `ext_data_gas_used`, `block_gas_cost`), per
/// the wire format named in the External Interfaces section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
  pub parent_hash: Hash,
  pub uncle_hash: Hash,
  pub height: u64,
  pub timestamp: u64,
  /// Root of the state trie after this block's transactions are applied.
  pub state_root: Hash,
  /// Root of the merkle tree over `EthBlock::transactions`, checked against
  /// the block body by the Block Wrapper's syntactic verification.
  pub tx_root: Hash,
  pub gas_limit: u64,
  pub gas_used: u64,
  pub nonce: u64,
  pub difficulty: U256,
  pub base_fee: Option<U256>,
  pub block_gas_cost: Option<U256>,
  pub ext_data_hash: Hash,
  pub ext_data_gas_used: Option<U256>,
}

impl Header {
  pub fn hash(&self) -> Hash {
    Hash::keccak256(rlp::encode(self))
  }
}

impl Encodable for Header {
  fn rlp_append(&self, s: &mut RlpStream) {
    s.begin_list(14);
    s.append(&self.parent_hash.as_ref());
    s.append(&self.uncle_hash.as_ref());
    s.append(&self.height);
    s.append(&self.timestamp);
    s.append(&self.state_root.as_ref());
    s.append(&self.tx_root.as_ref());
    s.append(&self.gas_limit);
    s.append(&self.gas_used);
    s.append(&self.nonce);
    append_u256(s, &self.difficulty);
    append_opt_u256(s, &self.base_fee);
    append_opt_u256(s, &self.block_gas_cost);
    s.append(&self.ext_data_hash.as_ref());
    append_opt_u256(s, &self.ext_data_gas_used);
  }
}

impl Decodable for Header {
  fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
    if rlp.item_count()? != 14 {
      return Err(DecoderError::RlpIncorrectListLen);
    }
    Ok(Header {
      parent_hash: decode_hash(rlp, 0)?,
      uncle_hash: decode_hash(rlp, 1)?,
      height: rlp.val_at(2)?,
      timestamp: rlp.val_at(3)?,
      state_root: decode_hash(rlp, 4)?,
      tx_root: decode_hash(rlp, 5)?,
      gas_limit: rlp.val_at(6)?,
      gas_used: rlp.val_at(7)?,
      nonce: rlp.val_at(8)?,
      difficulty: decode_u256(rlp, 9)?,
      base_fee: decode_opt_u256(rlp, 10)?,
      block_gas_cost: decode_opt_u256(rlp, 11)?,
      ext_data_hash: decode_hash(rlp, 12)?,
      ext_data_gas_used: decode_opt_u256(rlp, 13)?,
    })
  }
}

fn append_u256(s: &mut RlpStream, v: &U256) {
  let mut buf = [0u8; 32];
  v.to_big_endian(&mut buf);
  s.append(&buf.as_ref());
}

fn append_opt_u256(s: &mut RlpStream, v: &Option<U256>) {
  match v {
    Some(v) => append_u256(s, v),
    None => {
      s.append_empty_data();
    }
  }
}

fn decode_hash(rlp: &Rlp, idx: usize) -> Result<Hash, DecoderError> {
  let bytes: Vec<u8> = rlp.val_at(idx)?;
  Hash::try_from(bytes.as_slice())
    .map_err(|_| DecoderError::Custom("expected 32-byte hash"))
}

fn decode_u256(rlp: &Rlp, idx: usize) -> Result<U256, DecoderError> {
  let bytes: Vec<u8> = rlp.val_at(idx)?;
  Ok(U256::from_big_endian(&bytes))
}

fn decode_opt_u256(
  rlp: &Rlp,
  idx: usize,
) -> Result<Option<U256>, DecoderError> {
  let bytes: Vec<u8> = rlp.val_at(idx)?;
  if bytes.is_empty() {
    Ok(None)
  } else {
    Ok(Some(U256::from_big_endian(&bytes)))
  }
}
