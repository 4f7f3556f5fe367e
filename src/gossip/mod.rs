pub mod bloom;
pub mod inbound;
pub mod pull;
pub mod push;
pub mod throttle;
pub mod validators;

pub use bloom::{Bloom, BloomParams};
pub use inbound::InboundGossipHandler;
pub use pull::{PullGossiper, PullRequest, TxGossipHandler};
pub use push::PushGossiper;
pub use throttle::Throttle;
pub use validators::{Validator, ValidatorSet};
