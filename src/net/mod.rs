//! The simulated network: typed wire messages, per-node links with
//! request/response correlation and timeout-retry, and the propagation
//! latency model.

pub mod latency;
pub mod message;
pub mod transport;

pub use latency::Propagation;
pub use message::{
    BestGuessPlaceinfo, BestGuessSyncinfo, ControlOp, Envelope, Message, MsgHeader,
};
pub use transport::{CLOUD_IDX, CONTROL_IDX, NodeId, NodeLink, Router};
