use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{HeraError, Result};
use crate::protocol::{Frame, WorkerInfo};
use crate::scheduler::job::JobElement;
use crate::service::HostGroup;

pub type ConnectionId = Uuid;

/// Master-side view of one live worker connection.
#[derive(Debug)]
pub struct WorkerHandle {
    pub id: ConnectionId,
    pub addr: SocketAddr,
    pub host: String,
    pub host_groups: HashSet<i32>,
    pub max_parallel: usize,
    pub last_heartbeat: Instant,
    /// In-flight dispatches keyed by request id.
    pub running: HashMap<u64, JobElement>,
    sender: mpsc::Sender<Frame>,
    closed: CancellationToken,
}

impl WorkerHandle {
    pub fn load(&self) -> usize {
        self.running.len()
    }

    pub fn has_capacity(&self) -> bool {
        self.running.len() < self.max_parallel
    }

    /// A worker serves a group if it declared membership or the cached group
    /// lists its host.
    pub fn serves(&self, host_group_id: i32, cache: &HashMap<i32, HostGroup>) -> bool {
        self.host_groups.contains(&host_group_id)
            || cache
                .get(&host_group_id)
                .is_some_and(|group| group.hosts.iter().any(|h| h == &self.host))
    }

    pub fn is_alive(&self, timeout: Duration) -> bool {
        self.last_heartbeat.elapsed() < timeout
    }
}

/// A dispatch recorded against a worker, ready to be sent.
#[derive(Debug, Clone)]
pub struct Assignment {
    pub connection: ConnectionId,
    pub request_id: u64,
    pub host: String,
    pub sender: mpsc::Sender<Frame>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkerSummary {
    pub id: String,
    pub addr: String,
    pub host: String,
    pub host_groups: Vec<i32>,
    pub max_parallel: usize,
    pub running: usize,
}

/// Tracks connected workers and the dispatches in flight on each.
#[derive(Debug)]
pub struct ConnectionRegistry {
    workers: RwLock<HashMap<ConnectionId, WorkerHandle>>,
    host_groups: RwLock<HashMap<i32, HostGroup>>,
    next_request_id: AtomicU64,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            workers: RwLock::new(HashMap::new()),
            host_groups: RwLock::new(HashMap::new()),
            next_request_id: AtomicU64::new(1),
        }
    }

    /// Register a worker connection. Returns a token cancelled when the
    /// registry drops the worker, which the connection task watches.
    pub async fn on_connect(
        &self,
        id: ConnectionId,
        addr: SocketAddr,
        info: WorkerInfo,
        sender: mpsc::Sender<Frame>,
    ) -> CancellationToken {
        let closed = CancellationToken::new();
        let max_parallel = match info.max_parallel {
            0 => usize::MAX,
            n => n as usize,
        };
        let handle = WorkerHandle {
            id,
            addr,
            host: info.host,
            host_groups: info.host_groups.into_iter().collect(),
            max_parallel,
            last_heartbeat: Instant::now(),
            running: HashMap::new(),
            sender,
            closed: closed.clone(),
        };
        tracing::info!(
            connection = %id,
            addr = %addr,
            host = %handle.host,
            groups = ?handle.host_groups,
            "Worker registered"
        );
        self.workers.write().await.insert(id, handle);
        closed
    }

    /// Drop a worker and hand back the dispatches it had in flight.
    pub async fn on_disconnect(&self, id: ConnectionId) -> Vec<JobElement> {
        let removed = self.workers.write().await.remove(&id);
        match removed {
            Some(handle) => {
                handle.closed.cancel();
                tracing::info!(
                    connection = %id,
                    host = %handle.host,
                    in_flight = handle.running.len(),
                    "Worker removed"
                );
                handle.running.into_values().collect()
            }
            None => Vec::new(),
        }
    }

    /// Eligible worker for a host group: group affinity, then spare capacity,
    /// then least loaded. A saturated group still yields its least-loaded
    /// worker, whose pool queues the run.
    pub async fn select_worker(&self, host_group_id: i32) -> Option<ConnectionId> {
        let cache = self.host_groups.read().await;
        let workers = self.workers.read().await;
        Self::pick(&workers, &cache, host_group_id)
    }

    fn pick(
        workers: &HashMap<ConnectionId, WorkerHandle>,
        cache: &HashMap<i32, HostGroup>,
        host_group_id: i32,
    ) -> Option<ConnectionId> {
        workers
            .values()
            .filter(|w| w.serves(host_group_id, cache))
            .min_by_key(|w| (!w.has_capacity(), w.load()))
            .map(|w| w.id)
    }

    /// Select a worker and record the dispatch against it in one step.
    pub async fn assign(&self, element: &JobElement) -> Result<Assignment> {
        let cache = self.host_groups.read().await;
        let mut workers = self.workers.write().await;
        let group = element.host_group_id;
        let id = Self::pick(&workers, &cache, group).ok_or(HeraError::NoEligibleWorker(group))?;
        let worker = workers
            .get_mut(&id)
            .ok_or(HeraError::NoEligibleWorker(group))?;

        if !worker.has_capacity() {
            tracing::debug!(
                host = %worker.host,
                running = worker.load(),
                max_parallel = worker.max_parallel,
                "All workers in group busy, queueing on least loaded"
            );
        }
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        worker.running.insert(request_id, element.clone());
        Ok(Assignment {
            connection: worker.id,
            request_id,
            host: worker.host.clone(),
            sender: worker.sender.clone(),
        })
    }

    /// Remove a dispatch once its response arrives (or its send failed).
    /// `None` means the dispatch was already reconciled elsewhere.
    pub async fn release(&self, id: ConnectionId, request_id: u64) -> Option<JobElement> {
        self.workers
            .write()
            .await
            .get_mut(&id)
            .and_then(|w| w.running.remove(&request_id))
    }

    pub async fn heartbeat(&self, id: ConnectionId) {
        if let Some(worker) = self.workers.write().await.get_mut(&id) {
            worker.last_heartbeat = Instant::now();
        }
    }

    /// Workers that have not been heard from within `timeout`.
    pub async fn stale_workers(&self, timeout: Duration) -> Vec<ConnectionId> {
        self.workers
            .read()
            .await
            .values()
            .filter(|w| !w.is_alive(timeout))
            .map(|w| w.id)
            .collect()
    }

    pub async fn set_host_groups(&self, groups: HashMap<i32, HostGroup>) {
        *self.host_groups.write().await = groups;
    }

    pub async fn host_group(&self, id: i32) -> Option<HostGroup> {
        self.host_groups.read().await.get(&id).cloned()
    }

    pub async fn worker_count(&self) -> usize {
        self.workers.read().await.len()
    }

    pub async fn in_flight(&self) -> usize {
        self.workers
            .read()
            .await
            .values()
            .map(|w| w.running.len())
            .sum()
    }

    pub async fn summaries(&self) -> Vec<WorkerSummary> {
        let workers = self.workers.read().await;
        let mut summaries: Vec<WorkerSummary> = workers
            .values()
            .map(|w| {
                let mut groups: Vec<i32> = w.host_groups.iter().copied().collect();
                groups.sort_unstable();
                WorkerSummary {
                    id: w.id.to_string(),
                    addr: w.addr.to_string(),
                    host: w.host.clone(),
                    host_groups: groups,
                    max_parallel: w.max_parallel,
                    running: w.running.len(),
                }
            })
            .collect();
        summaries.sort_by(|a, b| a.host.cmp(&b.host));
        summaries
    }
}
