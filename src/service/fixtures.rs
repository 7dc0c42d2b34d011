use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::service::memory::{MemoryHistoryStore, MemoryHostGroups, MemoryJobResolver};
use crate::service::model::{HistoryRecord, HostGroup, JobBundle};

/// The in-memory collaborators wired together, shared by a master and its
/// local workers in standalone mode.
#[derive(Debug, Clone, Default)]
pub struct MemoryServices {
    pub history: Arc<MemoryHistoryStore>,
    pub debug_history: Arc<MemoryHistoryStore>,
    pub jobs: Arc<MemoryJobResolver>,
    pub host_groups: Arc<MemoryHostGroups>,
}

impl MemoryServices {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Seed data for [`MemoryServices`], read from a JSON file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Fixtures {
    pub host_groups: Vec<HostGroup>,
    pub jobs: Vec<JobBundle>,
    pub history: Vec<HistoryRecord>,
    pub debug_history: Vec<HistoryRecord>,
}

impl Fixtures {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = tokio::fs::read_to_string(path).await?;
        Self::from_json(&json)
    }

    pub async fn install(self, services: &MemoryServices) {
        tracing::info!(
            host_groups = self.host_groups.len(),
            jobs = self.jobs.len(),
            history = self.history.len(),
            debug_history = self.debug_history.len(),
            "Loading fixtures"
        );
        for group in self.host_groups {
            services.host_groups.put(group).await;
        }
        for job in self.jobs {
            services.jobs.add_job(job).await;
        }
        for record in self.history {
            services.history.insert(record).await;
        }
        for record in self.debug_history {
            services.debug_history.insert(record).await;
        }
    }
}
