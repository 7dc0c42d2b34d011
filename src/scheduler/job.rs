use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::protocol::{DebugMessage, ExecuteMessage, Operation, Request};
use crate::service::TriggerType;

/// Routing class of a run: decides queue, wire operation, worker registry
/// and which history store is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecuteKind {
    Schedule,
    Manual,
    Debug,
}

impl std::fmt::Display for ExecuteKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecuteKind::Schedule => write!(f, "schedule"),
            ExecuteKind::Manual => write!(f, "manual"),
            ExecuteKind::Debug => write!(f, "debug"),
        }
    }
}

impl From<ExecuteKind> for Operation {
    fn from(kind: ExecuteKind) -> Self {
        match kind {
            ExecuteKind::Schedule => Operation::Schedule,
            ExecuteKind::Manual => Operation::Manual,
            ExecuteKind::Debug => Operation::Debug,
        }
    }
}

impl From<Operation> for ExecuteKind {
    fn from(op: Operation) -> Self {
        match op {
            Operation::Schedule => ExecuteKind::Schedule,
            Operation::Manual => ExecuteKind::Manual,
            Operation::Debug => ExecuteKind::Debug,
        }
    }
}

impl From<TriggerType> for ExecuteKind {
    fn from(trigger: TriggerType) -> Self {
        match trigger {
            TriggerType::Schedule | TriggerType::ManualRecover => ExecuteKind::Schedule,
            TriggerType::Manual => ExecuteKind::Manual,
            TriggerType::Debug => ExecuteKind::Debug,
        }
    }
}

/// A pending dispatch. Consumed once by the dispatcher; a failed attempt
/// produces a new element through [`JobElement::retry`].
#[derive(Debug, Clone, PartialEq)]
pub struct JobElement {
    pub job_id: String,
    /// History (or debug history) this dispatch will produce.
    pub history_id: String,
    /// Lower is more urgent.
    pub priority: i32,
    pub kind: ExecuteKind,
    pub host_group_id: i32,
    /// Dispatch attempts already made.
    pub attempts: u32,
    /// Earliest instant a retry may be dispatched.
    pub not_before: Option<Instant>,
}

impl JobElement {
    pub fn new(
        kind: ExecuteKind,
        job_id: impl Into<String>,
        history_id: impl Into<String>,
        host_group_id: i32,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            history_id: history_id.into(),
            priority: 0,
            kind,
            host_group_id,
            attempts: 0,
            not_before: None,
        }
    }

    pub fn schedule(
        job_id: impl Into<String>,
        history_id: impl Into<String>,
        priority: i32,
        host_group_id: i32,
    ) -> Self {
        Self {
            priority,
            ..Self::new(ExecuteKind::Schedule, job_id, history_id, host_group_id)
        }
    }

    /// The element for the next attempt, eligible after `delay`.
    pub fn retry(&self, delay: Duration) -> Self {
        Self {
            attempts: self.attempts + 1,
            not_before: Some(Instant::now() + delay),
            ..self.clone()
        }
    }

    /// Build the wire request for this dispatch.
    pub fn to_request(&self, request_id: u64) -> Request {
        match self.kind {
            ExecuteKind::Debug => Request::debug(
                request_id,
                &DebugMessage {
                    debug_id: self.history_id.clone(),
                },
            ),
            kind => Request::execute(
                request_id,
                kind.into(),
                &ExecuteMessage {
                    job_id: self.job_id.clone(),
                    history_id: self.history_id.clone(),
                },
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_keeps_identity_and_counts_attempts() {
        let element = JobElement::schedule("J1", "H1", 3, 7);
        let retried = element.retry(Duration::from_millis(10));
        assert_eq!(retried.job_id, "J1");
        assert_eq!(retried.history_id, "H1");
        assert_eq!(retried.priority, 3);
        assert_eq!(retried.host_group_id, 7);
        assert_eq!(retried.attempts, 1);
        assert!(retried.not_before.is_some());
        assert_eq!(element.attempts, 0);
    }

    #[test]
    fn debug_request_carries_debug_id() {
        let element = JobElement::new(ExecuteKind::Debug, "file-3", "D42", 1);
        let request = element.to_request(5);
        assert_eq!(request.operation, Operation::Debug as i32);
        assert_eq!(request.debug_message().unwrap().debug_id, "D42");
    }

    #[test]
    fn manual_request_carries_history_id() {
        let element = JobElement::new(ExecuteKind::Manual, "J1", "H77", 1);
        let request = element.to_request(6);
        assert_eq!(request.operation, Operation::Manual as i32);
        let msg = request.execute_message().unwrap();
        assert_eq!(msg.history_id, "H77");
        assert_eq!(msg.job_id, "J1");
    }

    #[test]
    fn recover_trigger_is_dispatched_as_schedule() {
        assert_eq!(
            ExecuteKind::from(TriggerType::ManualRecover),
            ExecuteKind::Schedule
        );
    }
}
