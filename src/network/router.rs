//! A single inbound request entry point, demultiplexing on the decoded
//! handler-id tag to one of: tx-gossip, leaf, block, code, or signature
//! handlers. Guarantees exactly one response per request (success, typed
//! error, or deadline-miss), keyed by request-id.

use std::time::{Duration, Instant};

use thiserror::Error;

use super::sender::{NodeId, RequestId};

/// Reserved handler-id values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerId {
  TxGossip,
  StateSyncLeaf,
  StateSyncBlock,
  StateSyncCode,
  Signature,
}

impl HandlerId {
  pub fn tag(self) -> u8 {
    match self {
      HandlerId::TxGossip => 0x01,
      HandlerId::StateSyncLeaf => 0x02,
      HandlerId::StateSyncBlock => 0x03,
      HandlerId::StateSyncCode => 0x04,
      HandlerId::Signature => 0x05,
    }
  }

  pub fn from_tag(tag: u8) -> Option<Self> {
    match tag {
      0x01 => Some(HandlerId::TxGossip),
      0x02 => Some(HandlerId::StateSyncLeaf),
      0x03 => Some(HandlerId::StateSyncBlock),
      0x04 => Some(HandlerId::StateSyncCode),
      0x05 => Some(HandlerId::Signature),
      _ => None,
    }
  }
}

#[derive(Debug, Error)]
pub enum RouterError {
  #[error("unknown handler id {0}")]
  UnknownHandler(u8),
  #[error("empty request payload")]
  EmptyPayload,
  #[error("handler error: {0}")]
  Handler(String),
  #[error("request deadline exceeded")]
  DeadlineExceeded,
}

/// A decoded inbound request: handler-id tag stripped, body left opaque
/// for the handler to deserialize in its own wire format.
pub struct InboundRequest {
  pub from: NodeId,
  pub request_id: RequestId,
  pub handler: HandlerId,
  pub body: Vec<u8>,
  pub deadline: Option<Instant>,
}

pub trait RequestHandler: Send + Sync {
  fn handle(&self, from: NodeId, body: &[u8]) -> Result<Vec<u8>, RouterError>;
}

/// Dispatches decoded requests to registered handlers by `HandlerId`.
#[derive(Default)]
pub struct Router {
  tx_gossip: Option<Box<dyn RequestHandler>>,
  leaf: Option<Box<dyn RequestHandler>>,
  block: Option<Box<dyn RequestHandler>>,
  code: Option<Box<dyn RequestHandler>>,
  signature: Option<Box<dyn RequestHandler>>,
}

impl Router {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn register(&mut self, handler_id: HandlerId, handler: Box<dyn RequestHandler>) {
    let slot = match handler_id {
      HandlerId::TxGossip => &mut self.tx_gossip,
      HandlerId::StateSyncLeaf => &mut self.leaf,
      HandlerId::StateSyncBlock => &mut self.block,
      HandlerId::StateSyncCode => &mut self.code,
      HandlerId::Signature => &mut self.signature,
    };
    *slot = Some(handler);
  }

  /// Decodes the leading varint handler-id tag and strips it from `raw`.
  pub fn decode_handler_id(raw: &[u8]) -> Result<(HandlerId, &[u8]), RouterError> {
    let (tag, rest) = raw.split_first().ok_or(RouterError::EmptyPayload)?;
    let handler = HandlerId::from_tag(*tag).ok_or(RouterError::UnknownHandler(*tag))?;
    Ok((handler, rest))
  }

  /// Routes one request to exactly one response. If the deadline has
  /// already elapsed by dispatch time, responds with `DeadlineExceeded`
  /// rather than invoking the handler.
  pub fn dispatch(&self, request: &InboundRequest) -> Result<Vec<u8>, RouterError> {
    if let Some(deadline) = request.deadline {
      if Instant::now() > deadline {
        return Err(RouterError::DeadlineExceeded);
      }
    }
    let handler = match request.handler {
      HandlerId::TxGossip => &self.tx_gossip,
      HandlerId::StateSyncLeaf => &self.leaf,
      HandlerId::StateSyncBlock => &self.block,
      HandlerId::StateSyncCode => &self.code,
      HandlerId::Signature => &self.signature,
    };
    match handler {
      Some(h) => h.handle(request.from, &request.body),
      None => Err(RouterError::Handler(format!(
        "no handler registered for {:?}",
        request.handler
      ))),
    }
  }
}

pub fn deadline_from_now(timeout: Duration) -> Instant {
  Instant::now() + timeout
}

#[cfg(test)]
mod test {
  use super::*;

  struct Echo;
  impl RequestHandler for Echo {
    fn handle(&self, _from: NodeId, body: &[u8]) -> Result<Vec<u8>, RouterError> {
      Ok(body.to_vec())
    }
  }

  struct AlwaysFails;
  impl RequestHandler for AlwaysFails {
    fn handle(&self, _from: NodeId, _body: &[u8]) -> Result<Vec<u8>, RouterError> {
      Err(RouterError::Handler("boom".into()))
    }
  }

  fn req(handler: HandlerId, deadline: Option<Instant>) -> InboundRequest {
    InboundRequest {
      from: [0u8; 32],
      request_id: RequestId(1),
      handler,
      body: b"ping".to_vec(),
      deadline,
    }
  }

  #[test]
  fn dispatch_routes_to_registered_handler() {
    let mut r = Router::new();
    r.register(HandlerId::StateSyncLeaf, Box::new(Echo));
    let resp = r.dispatch(&req(HandlerId::StateSyncLeaf, None)).unwrap();
    assert_eq!(resp, b"ping");
  }

  #[test]
  fn unregistered_handler_errors() {
    let r = Router::new();
    assert!(r.dispatch(&req(HandlerId::StateSyncCode, None)).is_err());
  }

  #[test]
  fn past_deadline_short_circuits_before_invoking_handler() {
    let mut r = Router::new();
    r.register(HandlerId::StateSyncBlock, Box::new(AlwaysFails));
    let past = Instant::now() - Duration::from_secs(1);
    let result = r.dispatch(&req(HandlerId::StateSyncBlock, Some(past)));
    assert!(matches!(result, Err(RouterError::DeadlineExceeded)));
  }

  #[test]
  fn handler_id_tags_round_trip() {
    for id in [
      HandlerId::TxGossip,
      HandlerId::StateSyncLeaf,
      HandlerId::StateSyncBlock,
      HandlerId::StateSyncCode,
      HandlerId::Signature,
    ] {
      assert_eq!(HandlerId::from_tag(id.tag()), Some(id));
    }
  }

  #[test]
  fn decode_strips_leading_tag() {
    let raw = vec![0x02u8, b'h', b'i'];
    let (id, rest) = Router::decode_handler_id(&raw).unwrap();
    assert_eq!(id, HandlerId::StateSyncLeaf);
    assert_eq!(rest, b"hi");
  }
}
