use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;

use crate::scheduler::ExecuteKind;
use crate::service::RunLog;

/// An in-flight run on this worker.
#[derive(Debug, Clone)]
pub struct RunningJob {
    pub kind: ExecuteKind,
    pub job_id: String,
    pub history_id: String,
    pub started_at: DateTime<Utc>,
    pub log: RunLog,
}

impl RunningJob {
    pub fn new(kind: ExecuteKind, job_id: impl Into<String>, history_id: impl Into<String>) -> Self {
        Self {
            kind,
            job_id: job_id.into(),
            history_id: history_id.into(),
            started_at: Utc::now(),
            log: RunLog::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub kind: ExecuteKind,
    pub key: String,
    pub job_id: String,
    pub history_id: String,
    pub started_at: DateTime<Utc>,
}

/// Map from run key (job id, history id or debug id) to the run in flight.
#[derive(Debug, Clone, Default)]
pub struct RunRegistry {
    runs: Arc<DashMap<String, RunningJob>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `job` under `key` unless the key is already taken.
    ///
    /// Check and insert happen under the same shard lock. The returned guard
    /// removes the entry when dropped.
    pub fn try_claim(&self, key: &str, job: RunningJob) -> Option<RunGuard> {
        match self.runs.entry(key.to_string()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(job);
                Some(RunGuard {
                    runs: self.runs.clone(),
                    key: key.to_string(),
                })
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<RunningJob> {
        self.runs.get(key).map(|r| r.value().clone())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.runs.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    pub fn summaries(&self) -> Vec<RunSummary> {
        self.runs
            .iter()
            .map(|r| RunSummary {
                kind: r.kind,
                key: r.key().clone(),
                job_id: r.job_id.clone(),
                history_id: r.history_id.clone(),
                started_at: r.started_at,
            })
            .collect()
    }
}

/// Releases a registry slot on drop, whichever way the run ends.
#[derive(Debug)]
pub struct RunGuard {
    runs: Arc<DashMap<String, RunningJob>>,
    key: String,
}

impl RunGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.runs.remove(&self.key);
    }
}
