pub mod router;
pub mod sender;

pub use router::{HandlerId, InboundRequest, RequestHandler, Router, RouterError};
pub use sender::{NodeId, RequestId, Sender};
