use std::any::Any;
use std::sync::Arc;

use chrono::Utc;

use crate::config::WorkerConfig;
use crate::error::{HeraError, Result};
use crate::protocol::{Operation, Request, Response};
use crate::scheduler::ExecuteKind;
use crate::service::{HistoryRecord, HistoryStore, JobResolver, JobRunner, RunContext, RunLog};
use crate::worker::pool::{RunHandle, WorkerPool};
use crate::worker::registry::{RunGuard, RunRegistry, RunSummary, RunningJob};
use crate::worker::workspace;

/// Everything the execution engine needs, passed in explicitly.
pub struct WorkContext {
    pub config: WorkerConfig,
    pub history: Arc<dyn HistoryStore>,
    pub debug_history: Arc<dyn HistoryStore>,
    pub resolver: Arc<dyn JobResolver>,
    pub runner: Arc<dyn JobRunner>,
    /// Schedule runs keyed by job id. The only guard against running a job
    /// twice at once.
    pub schedule_running: RunRegistry,
    /// Manual runs keyed by history id.
    pub manual_running: RunRegistry,
    /// Debug runs keyed by debug id.
    pub debug_running: RunRegistry,
    pub pool: WorkerPool,
}

impl WorkContext {
    pub fn new(
        config: WorkerConfig,
        history: Arc<dyn HistoryStore>,
        debug_history: Arc<dyn HistoryStore>,
        resolver: Arc<dyn JobResolver>,
        runner: Arc<dyn JobRunner>,
    ) -> Self {
        let pool = WorkerPool::new(config.max_parallel);
        Self {
            config,
            history,
            debug_history,
            resolver,
            runner,
            schedule_running: RunRegistry::new(),
            manual_running: RunRegistry::new(),
            debug_running: RunRegistry::new(),
            pool,
        }
    }

    fn store_for(&self, kind: ExecuteKind) -> &Arc<dyn HistoryStore> {
        match kind {
            ExecuteKind::Debug => &self.debug_history,
            _ => &self.history,
        }
    }

    fn registry_for(&self, kind: ExecuteKind) -> &RunRegistry {
        match kind {
            ExecuteKind::Schedule => &self.schedule_running,
            ExecuteKind::Manual => &self.manual_running,
            ExecuteKind::Debug => &self.debug_running,
        }
    }
}

/// What a decoded request asks the worker to run.
#[derive(Debug, Clone)]
struct RunPlan {
    kind: ExecuteKind,
    /// Registry key: job id for schedule runs, history/debug id otherwise.
    key: String,
    job_id: String,
    history_id: String,
}

/// Worker-side execution of master requests.
///
/// Every request yields exactly one [`Response`]: malformed requests,
/// duplicate schedule runs, job failures and panics all come back as ERROR
/// responses rather than escaping the engine.
#[derive(Clone)]
pub struct ExecutionEngine {
    ctx: Arc<WorkContext>,
}

impl ExecutionEngine {
    pub fn new(ctx: WorkContext) -> Self {
        Self { ctx: Arc::new(ctx) }
    }

    pub fn context(&self) -> &WorkContext {
        &self.ctx
    }

    /// Accept a request and return a handle to its eventual response.
    ///
    /// Waits only for a pool slot; the run itself continues in the
    /// background.
    pub async fn execute(&self, request: Request) -> RunHandle {
        let request_id = request.request_id;
        let operation = request.operation;

        let plan = match self.plan(&request).await {
            Ok(plan) => plan,
            Err(e) => {
                tracing::warn!(request_id, operation, error = %e, "Rejecting undecodable request");
                return RunHandle::ready(Response::error(request_id, operation, e.to_string()));
            }
        };

        tracing::info!(
            request_id,
            kind = %plan.kind,
            job_id = %plan.job_id,
            history_id = %plan.history_id,
            "Received run request"
        );

        let running = RunningJob::new(plan.kind, &plan.job_id, &plan.history_id);
        let log = running.log.clone();
        let guard = match self.ctx.registry_for(plan.kind).try_claim(&plan.key, running) {
            Some(guard) => Some(guard),
            None if plan.kind == ExecuteKind::Schedule => {
                tracing::info!(job_id = %plan.job_id, "Job is already running, rejecting schedule run");
                return RunHandle::ready(Response::error(
                    request_id,
                    operation,
                    format!("job {} is already running", plan.job_id),
                ));
            }
            None => {
                tracing::warn!(kind = %plan.kind, key = %plan.key, "Run id already registered");
                None
            }
        };

        let ctx = self.ctx.clone();
        self.ctx
            .pool
            .submit(request_id, operation, async move {
                Self::run(ctx, plan, log, guard, request_id, operation).await
            })
            .await
    }

    async fn plan(&self, request: &Request) -> Result<RunPlan> {
        match Operation::from_wire(request.operation)? {
            Operation::Schedule => {
                let msg = request.execute_message()?;
                if msg.job_id.is_empty() {
                    return Err(HeraError::InvalidRequest("schedule request without job id".into()));
                }
                let history_id = if msg.history_id.is_empty() {
                    self.ctx.resolver.due_history_id(&msg.job_id).await?
                } else {
                    msg.history_id
                };
                Ok(RunPlan {
                    kind: ExecuteKind::Schedule,
                    key: msg.job_id.clone(),
                    job_id: msg.job_id,
                    history_id,
                })
            }
            Operation::Manual => {
                let msg = request.execute_message()?;
                if msg.history_id.is_empty() {
                    return Err(HeraError::InvalidRequest("manual request without history id".into()));
                }
                Ok(RunPlan {
                    kind: ExecuteKind::Manual,
                    key: msg.history_id.clone(),
                    job_id: msg.job_id,
                    history_id: msg.history_id,
                })
            }
            Operation::Debug => {
                let msg = request.debug_message()?;
                if msg.debug_id.is_empty() {
                    return Err(HeraError::InvalidRequest("debug request without debug id".into()));
                }
                Ok(RunPlan {
                    kind: ExecuteKind::Debug,
                    key: msg.debug_id.clone(),
                    job_id: String::new(),
                    history_id: msg.debug_id,
                })
            }
        }
    }

    async fn run(
        ctx: Arc<WorkContext>,
        plan: RunPlan,
        log: RunLog,
        guard: Option<RunGuard>,
        request_id: u64,
        operation: i32,
    ) -> Response {
        let store = ctx.store_for(plan.kind).clone();

        let mut record = match store.find_by_id(&plan.history_id).await {
            Ok(record) => record,
            Err(e) => {
                tracing::error!(history_id = %plan.history_id, error = %e, "Cannot load history for run");
                return Response::error(request_id, operation, e.to_string());
            }
        };
        if record.status.is_terminal() {
            tracing::warn!(history_id = %record.id, status = %record.status, "History already finished, not running again");
            return Response::error(
                request_id,
                operation,
                format!("history {} is already {}", record.id, record.status),
            );
        }

        record.mark_running(&ctx.config.host, Utc::now());
        let outcome = Self::guarded(&ctx, &store, &plan, &record, &log).await;

        let (exit_code, error) = match outcome {
            Ok(code) => (code, None),
            Err(message) => {
                log.append(format!("run failed: {}", message)).await;
                (-1, Some(message))
            }
        };
        Self::finish(&store, record, &log, exit_code, error.clone()).await;
        drop(guard);

        tracing::info!(
            request_id,
            kind = %plan.kind,
            history_id = %plan.history_id,
            exit_code,
            "Run finished"
        );
        if exit_code == 0 {
            Response::ok(request_id, operation)
        } else {
            Response::error(
                request_id,
                operation,
                error.unwrap_or_else(|| format!("exitCode={}", exit_code)),
            )
        }
    }

    /// Mark running, prepare, resolve and run. Any failure, including a
    /// panic inside the runner, comes back as error text.
    async fn guarded(
        ctx: &Arc<WorkContext>,
        store: &Arc<dyn HistoryStore>,
        plan: &RunPlan,
        record: &HistoryRecord,
        log: &RunLog,
    ) -> std::result::Result<i32, String> {
        let prepared = async {
            store.update(record).await?;
            let dir = workspace::prepare_run_dir(
                &ctx.config.work_dir,
                Utc::now().date_naive(),
                plan.kind,
                &plan.history_id,
            )
            .await?;
            let bundle = ctx.resolver.resolve_executable(record).await?;
            Ok::<_, HeraError>((dir, bundle))
        }
        .await;
        let (work_dir, bundle) = prepared.map_err(|e| e.to_string())?;

        log.append(format!("running {} in {}", bundle.name, work_dir.display()))
            .await;
        let run_ctx = RunContext {
            kind: plan.kind,
            history_id: plan.history_id.clone(),
            work_dir,
            log: log.clone(),
        };
        let runner = ctx.runner.clone();
        match tokio::spawn(async move { runner.run(&bundle, &run_ctx).await }).await {
            Ok(Ok(code)) => Ok(code),
            Ok(Err(e)) => Err(e.to_string()),
            Err(join_error) if join_error.is_panic() => {
                Err(panic_message(join_error.into_panic()))
            }
            Err(join_error) => Err(join_error.to_string()),
        }
    }

    /// Re-read the record (it may have been updated elsewhere), stamp the
    /// terminal state and flush the run log.
    async fn finish(
        store: &Arc<dyn HistoryStore>,
        local: HistoryRecord,
        log: &RunLog,
        exit_code: i32,
        error: Option<String>,
    ) {
        let mut record = match store.find_by_id(&local.id).await {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(history_id = %local.id, error = %e, "Re-reading history failed, using local copy");
                local
            }
        };

        record.log.push_str(&log.contents().await);
        record.append_log(&format!("exitCode={}", exit_code));

        if record.status.is_terminal() {
            tracing::warn!(history_id = %record.id, status = %record.status, "History finished elsewhere, keeping its status");
        } else {
            record.finish(exit_code, error, Utc::now());
            if let Err(e) = store.update_status(&record).await {
                tracing::error!(history_id = %record.id, error = %e, "Failed to persist run status");
            }
        }
        if let Err(e) = store.update_log(&record).await {
            tracing::error!(history_id = %record.id, error = %e, "Failed to persist run log");
        }
    }

    /// Runs currently in flight, across all three registries.
    pub fn running_jobs(&self) -> Vec<RunSummary> {
        let mut runs = self.ctx.schedule_running.summaries();
        runs.extend(self.ctx.manual_running.summaries());
        runs.extend(self.ctx.debug_running.summaries());
        runs.sort_by_key(|r| r.started_at);
        runs
    }

    pub fn running_count(&self) -> usize {
        self.ctx.schedule_running.len() + self.ctx.manual_running.len() + self.ctx.debug_running.len()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("job panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("job panicked: {}", s)
    } else {
        "job panicked".to_string()
    }
}
