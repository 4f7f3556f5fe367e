//! `rensa-vm`: the core of an EVM-compatible VM plugin hosted inside an
//! external linear-consensus engine.
//!
//! This crate owns the block lifecycle state machine, the builder
//! scheduler, the state-sync client/server protocol, the mempool gossip
//! engine, and the chain import/export subsystem. The EVM interpreter, the
//! trie database, the outer consensus algorithm, and the wire transport are
//! external collaborators, represented here only by the trait boundaries
//! they cross (`execution`, `network::Sender`, `db`).

pub mod block;
pub mod builder;
pub mod chainio;
pub mod config;
pub mod coordinator;
pub mod db;
pub mod error;
pub mod execution;
pub mod gossip;
pub mod mempool;
pub mod metrics;
pub mod network;
pub mod primitives;
pub mod sync;

pub use config::Config;
pub use coordinator::{Coordinator, VmState};
pub use error::Error;
