use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_SCHEDULE_CAPACITY: usize = 10_000;
pub const DEFAULT_MANUAL_CAPACITY: usize = 1000;
pub const DEFAULT_DEBUG_CAPACITY: usize = 1000;

/// Capacities of the bounded dispatch queues.
///
/// The exception queue has no entry here: retries are never rejected.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub schedule_capacity: usize,
    pub manual_capacity: usize,
    pub debug_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            schedule_capacity: DEFAULT_SCHEDULE_CAPACITY,
            manual_capacity: DEFAULT_MANUAL_CAPACITY,
            debug_capacity: DEFAULT_DEBUG_CAPACITY,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MasterConfig {
    /// Address workers connect to.
    pub listen_addr: SocketAddr,
    /// Optional HTTP trigger/status address.
    pub api_addr: Option<SocketAddr>,
    pub queues: QueueConfig,
    /// Dispatch attempts per run before its history is marked failed.
    pub max_dispatch_attempts: u32,
    pub retry_delay_ms: u64,
    /// Bounded wait applied to web-triggered runs before acknowledging.
    pub ack_timeout_ms: u64,
    /// Housekeeping period: host group refresh and stale worker eviction.
    pub housekeeping_interval_ms: u64,
    /// Workers silent for longer than this are treated as disconnected.
    pub worker_timeout_ms: u64,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 9887)),
            api_addr: None,
            queues: QueueConfig::default(),
            max_dispatch_attempts: 3,
            retry_delay_ms: 1000,
            ack_timeout_ms: 3000,
            housekeeping_interval_ms: 5000,
            worker_timeout_ms: 30_000,
        }
    }
}

impl MasterConfig {
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            ..Default::default()
        }
    }

    pub fn with_api_addr(mut self, addr: SocketAddr) -> Self {
        self.api_addr = Some(addr);
        self
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Master address in host:port form.
    pub master_addr: String,
    /// Host name advertised to the master and stamped on history records.
    pub host: String,
    pub host_groups: Vec<i32>,
    /// Upper bound on concurrently running jobs.
    pub max_parallel: usize,
    /// Root of the per-run working directories.
    pub work_dir: PathBuf,
    pub heartbeat_interval_ms: u64,
    pub reconnect_delay_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            master_addr: "127.0.0.1:9887".to_string(),
            host: "localhost".to_string(),
            host_groups: Vec::new(),
            max_parallel: 8,
            work_dir: std::env::temp_dir().join("hera-lite"),
            heartbeat_interval_ms: 5000,
            reconnect_delay_ms: 1000,
        }
    }
}

impl WorkerConfig {
    pub fn new(master_addr: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            master_addr: master_addr.into(),
            host: host.into(),
            ..Default::default()
        }
    }

    pub fn with_host_group(mut self, group_id: i32) -> Self {
        self.host_groups.push(group_id);
        self
    }

    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = dir.into();
        self
    }

    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel;
        self
    }
}
