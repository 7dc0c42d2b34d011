//! Test harness for master/worker integration tests.
//!
//! Provides a scriptable job runner, in-process masters and workers on
//! ephemeral ports, and polling helpers.

#![allow(dead_code)]

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use hera_lite::config::{MasterConfig, WorkerConfig};
use hera_lite::error::{HeraError, Result};
use hera_lite::master::Master;
use hera_lite::service::{
    HistoryRecord, HistoryStore, JobBundle, JobRunner, MemoryServices, RunContext, RunStatus,
    TriggerType,
};
use hera_lite::worker::{ExecutionEngine, WorkContext, WorkerNode};

/// What a [`StubRunner`] does for a given job id.
#[derive(Debug, Clone, Default)]
pub struct Behavior {
    pub exit_code: i32,
    /// Return this as an error instead of an exit code.
    pub fail: Option<String>,
    pub panic: Option<String>,
    pub delay: Duration,
}

impl Behavior {
    pub fn exit(code: i32) -> Self {
        Self {
            exit_code: code,
            ..Default::default()
        }
    }

    pub fn fail(message: &str) -> Self {
        Self {
            fail: Some(message.to_string()),
            ..Default::default()
        }
    }

    pub fn panic(message: &str) -> Self {
        Self {
            panic: Some(message.to_string()),
            ..Default::default()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }
}

/// Job runner with per-job scripted outcomes that records how many runs of
/// each job overlapped.
#[derive(Default)]
pub struct StubRunner {
    behaviors: Mutex<HashMap<String, Behavior>>,
    active: Mutex<HashMap<String, usize>>,
    max_active: Mutex<HashMap<String, usize>>,
    calls: AtomicUsize,
}

impl StubRunner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set(&self, job_id: &str, behavior: Behavior) {
        self.behaviors
            .lock()
            .unwrap()
            .insert(job_id.to_string(), behavior);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous runs observed for a job.
    pub fn max_concurrent(&self, job_id: &str) -> usize {
        self.max_active
            .lock()
            .unwrap()
            .get(job_id)
            .copied()
            .unwrap_or(0)
    }

    fn enter(&self, job_id: &str) {
        let mut active = self.active.lock().unwrap();
        let now = active.entry(job_id.to_string()).or_insert(0);
        *now += 1;
        let now = *now;
        let mut max = self.max_active.lock().unwrap();
        let peak = max.entry(job_id.to_string()).or_insert(0);
        *peak = (*peak).max(now);
    }

    fn exit(&self, job_id: &str) {
        if let Some(n) = self.active.lock().unwrap().get_mut(job_id) {
            *n -= 1;
        }
    }
}

#[async_trait]
impl JobRunner for StubRunner {
    async fn run(&self, job: &JobBundle, ctx: &RunContext) -> Result<i32> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let behavior = self
            .behaviors
            .lock()
            .unwrap()
            .get(&job.job_id)
            .cloned()
            .unwrap_or_default();

        self.enter(&job.job_id);
        ctx.log.append(format!("stub run of {}", job.job_id)).await;
        if !behavior.delay.is_zero() {
            tokio::time::sleep(behavior.delay).await;
        }
        self.exit(&job.job_id);

        if let Some(message) = behavior.panic {
            panic!("{}", message);
        }
        if let Some(message) = behavior.fail {
            return Err(HeraError::Io(std::io::Error::other(message)));
        }
        Ok(behavior.exit_code)
    }
}

/// Master config tuned for fast tests: ephemeral port, short delays.
pub fn test_master_config() -> MasterConfig {
    let mut config = MasterConfig::new(SocketAddr::from(([127, 0, 0, 1], 0)));
    config.max_dispatch_attempts = 2;
    config.retry_delay_ms = 50;
    config.ack_timeout_ms = 1000;
    config.housekeeping_interval_ms = 100;
    config.worker_timeout_ms = 5000;
    config
}

pub fn test_worker_config(master: SocketAddr, host: &str, work_dir: &std::path::Path) -> WorkerConfig {
    let mut config = WorkerConfig::new(master.to_string(), host)
        .with_host_group(1)
        .with_work_dir(work_dir)
        .with_max_parallel(4);
    config.heartbeat_interval_ms = 100;
    config.reconnect_delay_ms = 50;
    config
}

/// Engine over the given services, without any network.
pub fn test_engine(
    services: &MemoryServices,
    runner: Arc<StubRunner>,
    work_dir: &std::path::Path,
) -> ExecutionEngine {
    let config = WorkerConfig::new("127.0.0.1:0", "test-host")
        .with_work_dir(work_dir)
        .with_max_parallel(4);
    ExecutionEngine::new(WorkContext::new(
        config,
        services.history.clone(),
        services.debug_history.clone(),
        services.jobs.clone(),
        runner,
    ))
}

/// Add a job and a pending history record for it, both in host group 1.
pub async fn seed_job(services: &MemoryServices, job_id: &str, history_id: &str, trigger: TriggerType) {
    services
        .jobs
        .add_job(JobBundle::new(job_id, "true").with_host_group(1))
        .await;
    services
        .history
        .insert(HistoryRecord::new(history_id, job_id, trigger).with_host_group(1))
        .await;
}

pub async fn history_status(services: &MemoryServices, history_id: &str) -> Option<RunStatus> {
    services
        .history
        .find_by_id(history_id)
        .await
        .ok()
        .map(|r| r.status)
}

/// Handle to an in-process worker.
pub struct TestWorker {
    pub host: String,
    pub engine: ExecutionEngine,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl TestWorker {
    /// Stop the worker, closing its connection to the master.
    pub async fn kill(self) {
        self.cancel.cancel();
        let _ = self.handle.await;
    }
}

/// A master on an ephemeral port plus the services it shares with workers.
pub struct TestCluster {
    pub services: MemoryServices,
    pub master: Master,
    pub addr: SocketAddr,
    pub work_dir: tempfile::TempDir,
    cancel: CancellationToken,
}

impl TestCluster {
    pub async fn start() -> Self {
        Self::start_with(test_master_config()).await
    }

    pub async fn start_with(config: MasterConfig) -> Self {
        let services = MemoryServices::new();
        let master = Master::new(
            config,
            services.history.clone(),
            services.debug_history.clone(),
            services.host_groups.clone(),
        );
        let cancel = CancellationToken::new();
        let addr = master.start(cancel.clone()).await.unwrap();
        Self {
            services,
            master,
            addr,
            work_dir: tempfile::tempdir().unwrap(),
            cancel,
        }
    }

    pub async fn spawn_worker(&self, host: &str, runner: Arc<StubRunner>) -> TestWorker {
        let config = test_worker_config(self.addr, host, self.work_dir.path());
        self.spawn_worker_with(config, runner).await
    }

    /// Worker with a single run slot.
    pub async fn spawn_single_slot_worker(&self, host: &str, runner: Arc<StubRunner>) -> TestWorker {
        let config = test_worker_config(self.addr, host, self.work_dir.path()).with_max_parallel(1);
        self.spawn_worker_with(config, runner).await
    }

    pub async fn spawn_worker_with(&self, config: WorkerConfig, runner: Arc<StubRunner>) -> TestWorker {
        let host = config.host.clone();
        let engine = ExecutionEngine::new(WorkContext::new(
            config.clone(),
            self.services.history.clone(),
            self.services.debug_history.clone(),
            self.services.jobs.clone(),
            runner,
        ));
        let node = WorkerNode::new(config, engine.clone());
        let cancel = self.cancel.child_token();
        let run_cancel = cancel.clone();
        let handle = tokio::spawn(async move { node.run(run_cancel).await });
        TestWorker {
            host,
            engine,
            cancel,
            handle,
        }
    }

    pub async fn worker_count(&self) -> usize {
        self.master.context().registry.worker_count().await
    }

    pub async fn wait_for_workers(&self, count: usize) {
        assert_eventually(
            || async { self.worker_count().await == count },
            Duration::from_secs(5),
            &format!("expected {} connected workers", count),
        )
        .await;
    }
}

impl Drop for TestCluster {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Wait for a condition to become true with timeout
pub async fn wait_for<F, Fut>(
    condition: F,
    timeout_duration: Duration,
    poll_interval: Duration,
) -> bool
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = tokio::time::Instant::now();
    while start.elapsed() < timeout_duration {
        if condition().await {
            return true;
        }
        tokio::time::sleep(poll_interval).await;
    }
    false
}

/// Assert a condition eventually becomes true
pub async fn assert_eventually<F, Fut>(condition: F, timeout_duration: Duration, message: &str)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let result = wait_for(condition, timeout_duration, Duration::from_millis(50)).await;
    assert!(result, "{}", message);
}
