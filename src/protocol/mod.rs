//! Master/worker wire protocol.
//!
//! Every connection carries a stream of [`Frame`]s. A worker opens with
//! [`WorkerInfo`], then sends periodic [`Heartbeat`]s and one [`Response`] per
//! [`Request`] it receives. Requests and responses are correlated by
//! `request_id` only; responses may arrive in any order.

pub mod codec;
pub mod message;

pub use codec::{framed, FrameCodec, FramedConnection};
pub use message::{
    frame, DebugMessage, ExecuteMessage, Frame, Heartbeat, Operation, Request, Response, Status,
    WorkerInfo,
};
