use thiserror::Error;

use crate::service::RunStatus;

#[derive(Error, Debug)]
pub enum HeraError {
    #[error("{queue} queue is full (capacity {capacity})")]
    QueueFull { queue: &'static str, capacity: usize },

    #[error("no eligible worker for host group {0}")]
    NoEligibleWorker(i32),

    #[error("History not found: {0}")]
    HistoryNotFound(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unknown operation: {0}")]
    UnknownOperation(i32),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Timed out after {0}ms")]
    Timeout(u64),

    #[error("History {id} already finished as {status}")]
    HistoryFinished { id: String, status: RunStatus },
}

pub type Result<T> = std::result::Result<T, HeraError>;
