//! Master side: accepts worker connections, queues triggered runs and
//! dispatches them to eligible workers.

pub mod context;
pub mod housekeeping;
pub mod server;

use std::net::SocketAddr;
use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::api::{self, ApiState};
use crate::config::MasterConfig;
use crate::error::{HeraError, Result};
use crate::scheduler::{ExecuteKind, JobElement, QueueKind};
use crate::service::{HistoryStore, HostGroupResolver, TriggerType};

pub use context::MasterContext;
pub use server::MasterServer;

/// Provisional acknowledgment returned to whoever triggered a run. Only says
/// the element was queued; the outcome lands in the history record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TriggerAck {
    pub kind: ExecuteKind,
    pub trigger: TriggerType,
    pub job_id: String,
    pub history_id: String,
    pub queue: &'static str,
}

#[derive(Clone)]
pub struct Master {
    ctx: Arc<MasterContext>,
}

impl Master {
    pub fn new(
        config: MasterConfig,
        history: Arc<dyn HistoryStore>,
        debug_history: Arc<dyn HistoryStore>,
        host_groups: Arc<dyn HostGroupResolver>,
    ) -> Self {
        Self {
            ctx: Arc::new(MasterContext::new(config, history, debug_history, host_groups)),
        }
    }

    pub fn context(&self) -> &Arc<MasterContext> {
        &self.ctx
    }

    /// Bind the worker listener and spawn every master task. Returns the
    /// bound worker address (useful when listening on port 0).
    pub async fn start(&self, cancel: CancellationToken) -> Result<SocketAddr> {
        self.ctx.refresh_host_groups().await;

        let server = MasterServer::bind(self.ctx.config.listen_addr, self.ctx.clone()).await?;
        let addr = server.local_addr()?;
        tokio::spawn(server.run(cancel.clone()));

        for kind in QueueKind::ALL {
            tokio::spawn(self.ctx.dispatcher.clone().run(kind, cancel.clone()));
        }

        tokio::spawn(housekeeping::run_housekeeping(self.ctx.clone(), cancel.clone()));

        if let Some(api_addr) = self.ctx.config.api_addr {
            let state = ApiState {
                master: self.clone(),
            };
            tokio::spawn(api::run_api(api_addr, state, cancel.clone()));
        }

        tracing::info!(addr = %addr, "Master started");
        Ok(addr)
    }

    /// Start and wait for shutdown.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        self.start(cancel.clone()).await?;
        cancel.cancelled().await;
        tracing::info!("Master shutting down");
        Ok(())
    }

    /// Admin trigger: queue an existing history record for execution.
    ///
    /// Manual runs go to the manual queue, recovery runs are treated as
    /// scheduled runs and debug runs look the id up in the debug history.
    /// Fails with [`HeraError::Timeout`] if the record cannot be queued
    /// within the configured acknowledgment timeout.
    pub async fn execute_job_from_web(
        &self,
        trigger: TriggerType,
        history_id: &str,
    ) -> Result<TriggerAck> {
        let timeout = self.ctx.config.ack_timeout();
        match tokio::time::timeout(timeout, self.enqueue_history(trigger, history_id)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(history_id, "Manual trigger was not queued in time");
                Err(HeraError::Timeout(timeout.as_millis() as u64))
            }
        }
    }

    /// Queue a run produced by the cron engine. Lower priority values
    /// dispatch first.
    pub async fn trigger_schedule(
        &self,
        job_id: &str,
        history_id: &str,
        priority: i32,
    ) -> Result<TriggerAck> {
        let record = self.ctx.history.find_by_id(history_id).await?;
        if record.job_id != job_id {
            return Err(HeraError::InvalidRequest(format!(
                "history {} belongs to job {}, not {}",
                history_id, record.job_id, job_id
            )));
        }
        let element = JobElement::schedule(job_id, history_id, priority, record.host_group_id);
        self.push(element, TriggerType::Schedule).await
    }

    pub async fn trigger_debug(&self, debug_id: &str) -> Result<TriggerAck> {
        self.enqueue_history(TriggerType::Debug, debug_id).await
    }

    async fn enqueue_history(
        &self,
        trigger: TriggerType,
        history_id: &str,
    ) -> Result<TriggerAck> {
        let kind = ExecuteKind::from(trigger);
        let store = match kind {
            ExecuteKind::Debug => &self.ctx.debug_history,
            _ => &self.ctx.history,
        };
        let record = store.find_by_id(history_id).await?;
        let element = JobElement::new(kind, record.job_id, history_id, record.host_group_id);
        self.push(element, trigger).await
    }

    async fn push(&self, element: JobElement, trigger: TriggerType) -> Result<TriggerAck> {
        let ack = TriggerAck {
            kind: element.kind,
            trigger,
            job_id: element.job_id.clone(),
            history_id: element.history_id.clone(),
            queue: QueueKind::from(element.kind).name(),
        };
        self.ctx.queues.push(element).await?;
        tracing::info!(
            job_id = %ack.job_id,
            history_id = %ack.history_id,
            queue = ack.queue,
            "Run queued"
        );
        Ok(ack)
    }
}
