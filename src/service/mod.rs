//! Collaborator interfaces consumed by the dispatch and execution engines.
//!
//! Persistence, job resolution and host group lookup live outside this crate;
//! they are injected as trait objects so the engines can be run against a
//! database-backed service layer in production and against the in-memory
//! implementations in [`memory`] in tests.

pub mod fixtures;
pub mod memory;
pub mod model;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::Result;
use crate::scheduler::ExecuteKind;

pub use fixtures::{Fixtures, MemoryServices};
pub use memory::{MemoryHistoryStore, MemoryHostGroups, MemoryJobResolver};
pub use model::{HistoryRecord, HostGroup, JobBundle, RunStatus, TriggerType};

/// Durable store for run history. Schedule/manual runs and debug runs each
/// get their own instance.
///
/// Implementations must tolerate concurrent calls for different ids and must
/// persist before returning.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<HistoryRecord>;

    /// Overwrite the whole record.
    ///
    /// Both writers of status must refuse to change the status of a record
    /// that is already SUCCESS or FAILED, returning
    /// [`HeraError::HistoryFinished`](crate::error::HeraError::HistoryFinished).
    async fn update(&self, record: &HistoryRecord) -> Result<()>;

    /// Persist status, end time and error text only.
    async fn update_status(&self, record: &HistoryRecord) -> Result<()>;

    /// Persist the accumulated log only.
    async fn update_log(&self, record: &HistoryRecord) -> Result<()>;
}

#[async_trait]
pub trait JobResolver: Send + Sync {
    /// Build the runnable bundle for the job a history record belongs to.
    async fn resolve_executable(&self, record: &HistoryRecord) -> Result<JobBundle>;

    /// History id of the run currently due for a scheduled job.
    async fn due_history_id(&self, job_id: &str) -> Result<String>;
}

#[async_trait]
pub trait HostGroupResolver: Send + Sync {
    async fn all_host_groups(&self) -> Result<HashMap<i32, HostGroup>>;
}

/// Runs a job payload to completion and returns its exit code.
///
/// Called on the worker pool; may take as long as the job does. An `Err`
/// (or a panic) is treated as a failed run.
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(&self, job: &JobBundle, ctx: &RunContext) -> Result<i32>;
}

/// Everything a runner needs to know about the run it is executing.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub kind: ExecuteKind,
    pub history_id: String,
    pub work_dir: PathBuf,
    pub log: RunLog,
}

/// Log text accumulated while a run is in flight, flushed to the history
/// store when the run ends.
#[derive(Debug, Clone, Default)]
pub struct RunLog {
    inner: Arc<Mutex<String>>,
}

impl RunLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn append(&self, line: impl AsRef<str>) {
        let line = line.as_ref();
        let mut buf = self.inner.lock().await;
        buf.push_str(line);
        if !line.ends_with('\n') {
            buf.push('\n');
        }
    }

    pub async fn contents(&self) -> String {
        self.inner.lock().await.clone()
    }
}
