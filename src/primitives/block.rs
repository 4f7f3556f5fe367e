use rlp::{Decodable, DecoderError, Encodable, Rlp, RlpStream};

use super::{Hash, Header};

/// The merkle root of a block's transaction list, as checked against
/// `Header::tx_root` by the Block Wrapper's syntactic verification.
/// `rlp` has no sparse Merkle-Patricia implementation handy, so this uses
/// the same ordered-hash-list construction the rest of this crate's toy
/// state transition relies on rather than pulling in a full trie crate.
pub fn compute_tx_root(transactions: &[Vec<u8>]) -> Hash {
  let mut stream = RlpStream::new();
  stream.begin_list(transactions.len());
  for tx in transactions {
    stream.append(tx);
  }
  Hash::keccak256(stream.out())
}

/// The opaque execution-layer block payload this crate parses the envelope
/// of but never interprets the transaction bytes of -- the EVM interpreter
/// is an external collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EthBlock {
  pub header: Header,
  pub transactions: Vec<Vec<u8>>,
}

impl EthBlock {
  pub fn id(&self) -> super::Hash {
    self.header.hash()
  }

  pub fn size(&self) -> u64 {
    rlp::encode(self).len() as u64
  }
}

impl Encodable for EthBlock {
  fn rlp_append(&self, s: &mut RlpStream) {
    s.begin_list(2);
    s.append(&self.header);
    s.begin_list(self.transactions.len());
    for tx in &self.transactions {
      s.append(tx);
    }
  }
}

impl Decodable for EthBlock {
  fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
    if rlp.item_count()? != 2 {
      return Err(DecoderError::RlpIncorrectListLen);
    }
    let header: Header = rlp.val_at(0)?;
    let txs_rlp = rlp.at(1)?;
    let mut transactions = Vec::with_capacity(txs_rlp.item_count()?);
    for item in txs_rlp.iter() {
      transactions.push(item.data()?.to_vec());
    }
    Ok(EthBlock { header, transactions })
  }
}
