//! The `Sender` capability the host injects:
//! `SendAppRequest/SendAppGossip/SendAppResponse/SendAppError`. This crate
//! never constructs a transport; it only calls through this trait, so
//! callers never need to know what sits underneath it.

use async_trait::async_trait;

use crate::primitives::Hash;

/// Opaque peer identity from the host's validator/peer set.
pub type NodeId = [u8; 32];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestId(pub u32);

#[async_trait]
pub trait Sender: Send + Sync {
  async fn send_app_request(
    &self,
    node: NodeId,
    request_id: RequestId,
    payload: Vec<u8>,
  );

  async fn send_app_response(
    &self,
    node: NodeId,
    request_id: RequestId,
    payload: Vec<u8>,
  );

  async fn send_app_error(
    &self,
    node: NodeId,
    request_id: RequestId,
    code: i32,
    message: String,
  );

  async fn send_app_gossip(&self, payload: Vec<u8>);

  async fn send_app_gossip_specific(&self, nodes: Vec<NodeId>, payload: Vec<u8>);
}

/// A `Sender` that records every call, for integration tests.
#[derive(Default)]
pub struct RecordingSender {
  pub requests: parking_lot::Mutex<Vec<(NodeId, RequestId, Vec<u8>)>>,
  pub responses: parking_lot::Mutex<Vec<(NodeId, RequestId, Vec<u8>)>>,
  pub gossips: parking_lot::Mutex<Vec<Vec<u8>>>,
  pub targeted_gossips: parking_lot::Mutex<Vec<(Vec<NodeId>, Vec<u8>)>>,
  pub errors: parking_lot::Mutex<Vec<(NodeId, RequestId, i32, String)>>,
}

#[async_trait]
impl Sender for RecordingSender {
  async fn send_app_request(
    &self,
    node: NodeId,
    request_id: RequestId,
    payload: Vec<u8>,
  ) {
    self.requests.lock().push((node, request_id, payload));
  }

  async fn send_app_response(
    &self,
    node: NodeId,
    request_id: RequestId,
    payload: Vec<u8>,
  ) {
    self.responses.lock().push((node, request_id, payload));
  }

  async fn send_app_error(
    &self,
    node: NodeId,
    request_id: RequestId,
    code: i32,
    message: String,
  ) {
    self.errors.lock().push((node, request_id, code, message));
  }

  async fn send_app_gossip(&self, payload: Vec<u8>) {
    self.gossips.lock().push(payload);
  }

  async fn send_app_gossip_specific(&self, nodes: Vec<NodeId>, payload: Vec<u8>) {
    self.targeted_gossips.lock().push((nodes, payload));
  }
}

pub fn dummy_node(tag: &[u8]) -> NodeId {
  *Hash::keccak256(tag).as_bytes()
}
