use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{HeraError, Result};
use crate::service::model::{HistoryRecord, HostGroup, JobBundle};
use crate::service::{HistoryStore, HostGroupResolver, JobResolver};

/// History store backed by a map. Used by tests and the standalone binary.
#[derive(Debug, Default)]
pub struct MemoryHistoryStore {
    records: RwLock<HashMap<String, HistoryRecord>>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, record: HistoryRecord) {
        self.records.write().await.insert(record.id.clone(), record);
    }

    pub async fn get(&self, id: &str) -> Option<HistoryRecord> {
        self.records.read().await.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn find_by_id(&self, id: &str) -> Result<HistoryRecord> {
        self.get(id)
            .await
            .ok_or_else(|| HeraError::HistoryNotFound(id.to_string()))
    }

    async fn update(&self, record: &HistoryRecord) -> Result<()> {
        let mut records = self.records.write().await;
        let existing = records
            .get_mut(&record.id)
            .ok_or_else(|| HeraError::HistoryNotFound(record.id.clone()))?;
        ensure_status_change_allowed(existing, record)?;
        *existing = record.clone();
        Ok(())
    }

    async fn update_status(&self, record: &HistoryRecord) -> Result<()> {
        let mut records = self.records.write().await;
        let existing = records
            .get_mut(&record.id)
            .ok_or_else(|| HeraError::HistoryNotFound(record.id.clone()))?;
        ensure_status_change_allowed(existing, record)?;
        existing.status = record.status;
        existing.end_time = record.end_time;
        existing.error = record.error.clone();
        Ok(())
    }

    async fn update_log(&self, record: &HistoryRecord) -> Result<()> {
        let mut records = self.records.write().await;
        let existing = records
            .get_mut(&record.id)
            .ok_or_else(|| HeraError::HistoryNotFound(record.id.clone()))?;
        existing.log = record.log.clone();
        Ok(())
    }
}

/// Finished records keep their status.
fn ensure_status_change_allowed(existing: &HistoryRecord, update: &HistoryRecord) -> Result<()> {
    if existing.status.is_terminal() && update.status != existing.status {
        return Err(HeraError::HistoryFinished {
            id: existing.id.clone(),
            status: existing.status,
        });
    }
    Ok(())
}

#[derive(Debug, Default)]
pub struct MemoryJobResolver {
    jobs: RwLock<HashMap<String, JobBundle>>,
    due: RwLock<HashMap<String, String>>,
}

impl MemoryJobResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_job(&self, bundle: JobBundle) {
        self.jobs.write().await.insert(bundle.job_id.clone(), bundle);
    }

    /// Record which history is the due run for a scheduled job.
    pub async fn set_due(&self, job_id: impl Into<String>, history_id: impl Into<String>) {
        self.due.write().await.insert(job_id.into(), history_id.into());
    }
}

#[async_trait]
impl JobResolver for MemoryJobResolver {
    async fn resolve_executable(&self, record: &HistoryRecord) -> Result<JobBundle> {
        self.jobs
            .read()
            .await
            .get(&record.job_id)
            .cloned()
            .ok_or_else(|| HeraError::JobNotFound(record.job_id.clone()))
    }

    async fn due_history_id(&self, job_id: &str) -> Result<String> {
        self.due
            .read()
            .await
            .get(job_id)
            .cloned()
            .ok_or_else(|| HeraError::JobNotFound(job_id.to_string()))
    }
}

#[derive(Debug, Default)]
pub struct MemoryHostGroups {
    groups: RwLock<HashMap<i32, HostGroup>>,
}

impl MemoryHostGroups {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put(&self, group: HostGroup) {
        self.groups.write().await.insert(group.id, group);
    }
}

#[async_trait]
impl HostGroupResolver for MemoryHostGroups {
    async fn all_host_groups(&self) -> Result<HashMap<i32, HostGroup>> {
        Ok(self.groups.read().await.clone())
    }
}
