//! Protobuf message definitions exchanged between master and workers.
//!
//! The messages are declared with `prost` derives rather than generated from
//! a `.proto` file; field tags are part of the wire contract and must not be
//! renumbered.

use prost::Message;

use crate::error::{HeraError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum Operation {
    Schedule = 0,
    Manual = 1,
    Debug = 2,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum Status {
    Ok = 0,
    Error = 1,
}

impl Operation {
    pub fn from_wire(value: i32) -> Result<Self> {
        Operation::try_from(value).map_err(|_| HeraError::UnknownOperation(value))
    }
}

/// Body of a Schedule or Manual request.
///
/// Schedule requests are keyed by `job_id`; `history_id` may be empty, in which
/// case the worker asks the job resolver for the run that is due. Manual
/// requests are keyed by `history_id`.
#[derive(Clone, PartialEq, Message)]
pub struct ExecuteMessage {
    #[prost(string, tag = "1")]
    pub job_id: String,
    #[prost(string, tag = "2")]
    pub history_id: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct DebugMessage {
    #[prost(string, tag = "1")]
    pub debug_id: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct Request {
    #[prost(uint64, tag = "1")]
    pub request_id: u64,
    #[prost(enumeration = "Operation", tag = "2")]
    pub operation: i32,
    #[prost(bytes = "vec", tag = "3")]
    pub body: Vec<u8>,
}

impl Request {
    pub fn execute(request_id: u64, operation: Operation, message: &ExecuteMessage) -> Self {
        Self {
            request_id,
            operation: operation as i32,
            body: message.encode_to_vec(),
        }
    }

    pub fn debug(request_id: u64, message: &DebugMessage) -> Self {
        Self {
            request_id,
            operation: Operation::Debug as i32,
            body: message.encode_to_vec(),
        }
    }

    pub fn execute_message(&self) -> Result<ExecuteMessage> {
        Ok(ExecuteMessage::decode(self.body.as_slice())?)
    }

    pub fn debug_message(&self) -> Result<DebugMessage> {
        Ok(DebugMessage::decode(self.body.as_slice())?)
    }
}

#[derive(Clone, PartialEq, Message)]
pub struct Response {
    #[prost(uint64, tag = "1")]
    pub request_id: u64,
    #[prost(enumeration = "Operation", tag = "2")]
    pub operation: i32,
    #[prost(enumeration = "Status", tag = "3")]
    pub status: i32,
    #[prost(string, tag = "4")]
    pub error_text: String,
}

impl Response {
    pub fn ok(request_id: u64, operation: i32) -> Self {
        Self {
            request_id,
            operation,
            status: Status::Ok as i32,
            error_text: String::new(),
        }
    }

    pub fn error(request_id: u64, operation: i32, error_text: impl Into<String>) -> Self {
        Self {
            request_id,
            operation,
            status: Status::Error as i32,
            error_text: error_text.into(),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == Status::Ok as i32
    }
}

/// First frame sent by a worker after connecting.
#[derive(Clone, PartialEq, Message)]
pub struct WorkerInfo {
    #[prost(string, tag = "1")]
    pub host: String,
    #[prost(int32, repeated, tag = "2")]
    pub host_groups: Vec<i32>,
    #[prost(uint32, tag = "3")]
    pub max_parallel: u32,
}

#[derive(Clone, PartialEq, Message)]
pub struct Heartbeat {
    #[prost(uint32, tag = "1")]
    pub running: u32,
}

/// Envelope for everything that travels over a master/worker connection.
#[derive(Clone, PartialEq, Message)]
pub struct Frame {
    #[prost(oneof = "frame::Payload", tags = "1, 2, 3, 4")]
    pub payload: Option<frame::Payload>,
}

pub mod frame {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Payload {
        #[prost(message, tag = "1")]
        Register(super::WorkerInfo),
        #[prost(message, tag = "2")]
        Heartbeat(super::Heartbeat),
        #[prost(message, tag = "3")]
        Request(super::Request),
        #[prost(message, tag = "4")]
        Response(super::Response),
    }
}

impl From<WorkerInfo> for Frame {
    fn from(info: WorkerInfo) -> Self {
        Self {
            payload: Some(frame::Payload::Register(info)),
        }
    }
}

impl From<Heartbeat> for Frame {
    fn from(heartbeat: Heartbeat) -> Self {
        Self {
            payload: Some(frame::Payload::Heartbeat(heartbeat)),
        }
    }
}

impl From<Request> for Frame {
    fn from(request: Request) -> Self {
        Self {
            payload: Some(frame::Payload::Request(request)),
        }
    }
}

impl From<Response> for Frame {
    fn from(response: Response) -> Self {
        Self {
            payload: Some(frame::Payload::Response(response)),
        }
    }
}
