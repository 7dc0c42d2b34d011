use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Pending,
    Running,
    Success,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Success | RunStatus::Failed)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Pending => write!(f, "pending"),
            RunStatus::Running => write!(f, "running"),
            RunStatus::Success => write!(f, "success"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}

/// What caused a history record to be created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerType {
    Schedule,
    Manual,
    /// Operator re-ran a scheduled instance; dispatched as a schedule run.
    ManualRecover,
    Debug,
}

/// One concrete run of a job, manual action or debug script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: String,
    pub job_id: String,
    pub trigger: TriggerType,
    pub host_group_id: i32,
    pub execute_host: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub log: String,
    pub error: Option<String>,
}

impl HistoryRecord {
    pub fn new(id: impl Into<String>, job_id: impl Into<String>, trigger: TriggerType) -> Self {
        Self {
            id: id.into(),
            job_id: job_id.into(),
            trigger,
            host_group_id: 0,
            execute_host: None,
            start_time: None,
            end_time: None,
            status: RunStatus::Pending,
            log: String::new(),
            error: None,
        }
    }

    pub fn with_host_group(mut self, host_group_id: i32) -> Self {
        self.host_group_id = host_group_id;
        self
    }

    pub fn append_log(&mut self, line: &str) {
        self.log.push_str(line);
        if !line.ends_with('\n') {
            self.log.push('\n');
        }
    }

    pub fn mark_running(&mut self, host: &str, now: DateTime<Utc>) {
        self.status = RunStatus::Running;
        self.execute_host = Some(host.to_string());
        self.start_time = Some(now);
        self.end_time = None;
    }

    /// Move a running record to its terminal state. Exit code 0 is success;
    /// anything else, including a run that never produced a code, is failure.
    pub fn finish(&mut self, exit_code: i32, error: Option<String>, now: DateTime<Utc>) {
        self.end_time = Some(now);
        self.status = if exit_code == 0 {
            RunStatus::Success
        } else {
            RunStatus::Failed
        };
        self.error = error;
    }

    pub fn fail(&mut self, reason: &str, now: DateTime<Utc>) {
        self.append_log(reason);
        self.finish(-1, Some(reason.to_string()), now);
    }
}

/// Resolved, runnable definition of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobBundle {
    pub job_id: String,
    pub name: String,
    pub script: String,
    pub host_group_id: i32,
    pub properties: HashMap<String, String>,
}

impl JobBundle {
    pub fn new(job_id: impl Into<String>, script: impl Into<String>) -> Self {
        let job_id = job_id.into();
        Self {
            name: job_id.clone(),
            job_id,
            script: script.into(),
            host_group_id: 0,
            properties: HashMap::new(),
        }
    }

    pub fn with_host_group(mut self, host_group_id: i32) -> Self {
        self.host_group_id = host_group_id;
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostGroup {
    pub id: i32,
    pub name: String,
    pub hosts: Vec<String>,
}
