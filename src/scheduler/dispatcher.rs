use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::protocol::{Frame, Response};
use crate::scheduler::job::{ExecuteKind, JobElement};
use crate::scheduler::queue::{DispatchQueues, QueueKind};
use crate::scheduler::registry::{ConnectionId, ConnectionRegistry};
use crate::service::HistoryStore;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Notifications published by the dispatcher for downstream consumers.
#[derive(Debug, Clone)]
pub enum DispatchEvent {
    /// A Request went out on a worker connection.
    Sent {
        connection: ConnectionId,
        request_id: u64,
        element: JobElement,
    },
    /// A worker answered a Request.
    Completed {
        request_id: u64,
        element: JobElement,
        succeeded: bool,
        error_text: String,
    },
    /// A dispatch failed and was queued for another attempt.
    Requeued { element: JobElement, reason: String },
    /// Dispatch attempts ran out; the history was marked failed.
    Abandoned { element: JobElement, reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Sent {
        connection: ConnectionId,
        request_id: u64,
    },
    Requeued,
    Failed,
}

/// Moves elements from the queues onto worker connections and reconciles
/// the answers.
pub struct Dispatcher {
    queues: Arc<DispatchQueues>,
    registry: Arc<ConnectionRegistry>,
    history: Arc<dyn HistoryStore>,
    debug_history: Arc<dyn HistoryStore>,
    max_attempts: u32,
    retry_delay: Duration,
    events: broadcast::Sender<DispatchEvent>,
}

impl Dispatcher {
    pub fn new(
        queues: Arc<DispatchQueues>,
        registry: Arc<ConnectionRegistry>,
        history: Arc<dyn HistoryStore>,
        debug_history: Arc<dyn HistoryStore>,
        max_attempts: u32,
        retry_delay: Duration,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            queues,
            registry,
            history,
            debug_history,
            max_attempts: max_attempts.max(1),
            retry_delay,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DispatchEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: DispatchEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn store_for(&self, kind: ExecuteKind) -> &Arc<dyn HistoryStore> {
        match kind {
            ExecuteKind::Debug => &self.debug_history,
            _ => &self.history,
        }
    }

    /// Drain one queue until cancelled.
    ///
    /// Retry elements wait out their `not_before` delay before being
    /// dispatched, so a host group with no workers does not spin.
    pub async fn run(self: Arc<Self>, kind: QueueKind, cancel: CancellationToken) {
        tracing::info!(queue = kind.name(), "Dispatch loop started");
        loop {
            let element = tokio::select! {
                _ = cancel.cancelled() => break,
                element = self.queues.pop(kind) => element,
            };

            if let Some(not_before) = element.not_before {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep_until(not_before) => {}
                }
            }

            self.dispatch(element).await;
        }
        tracing::info!(queue = kind.name(), "Dispatch loop stopped");
    }

    /// Send one element to an eligible worker, or schedule its retry when
    /// no connected worker serves its host group.
    pub async fn dispatch(&self, element: JobElement) -> DispatchOutcome {
        let assignment = match self.registry.assign(&element).await {
            Ok(assignment) => assignment,
            Err(e) => return self.requeue_or_fail(element, &e.to_string()).await,
        };

        let request = element.to_request(assignment.request_id);
        tracing::info!(
            job_id = %element.job_id,
            history_id = %element.history_id,
            kind = %element.kind,
            request_id = assignment.request_id,
            host = %assignment.host,
            attempt = element.attempts + 1,
            "Dispatching job"
        );

        if assignment.sender.send(Frame::from(request)).await.is_err() {
            // Connection task is gone. If the disconnect path already took the
            // element, it owns the retry.
            return match self
                .registry
                .release(assignment.connection, assignment.request_id)
                .await
            {
                Some(element) => {
                    let reason = format!("connection to {} closed", assignment.host);
                    self.requeue_or_fail(element, &reason).await
                }
                None => DispatchOutcome::Requeued,
            };
        }

        self.publish(DispatchEvent::Sent {
            connection: assignment.connection,
            request_id: assignment.request_id,
            element,
        });
        DispatchOutcome::Sent {
            connection: assignment.connection,
            request_id: assignment.request_id,
        }
    }

    /// Queue another attempt while attempts remain, otherwise mark the run's
    /// history failed.
    async fn requeue_or_fail(&self, element: JobElement, reason: &str) -> DispatchOutcome {
        let attempts_made = element.attempts + 1;
        if attempts_made < self.max_attempts {
            tracing::warn!(
                job_id = %element.job_id,
                history_id = %element.history_id,
                attempt = attempts_made,
                max_attempts = self.max_attempts,
                reason,
                "Dispatch failed, will retry"
            );
            let retry = element.retry(self.retry_delay);
            self.queues.push_retry(retry.clone()).await;
            self.publish(DispatchEvent::Requeued {
                element: retry,
                reason: reason.to_string(),
            });
            return DispatchOutcome::Requeued;
        }

        tracing::error!(
            job_id = %element.job_id,
            history_id = %element.history_id,
            attempts = attempts_made,
            reason,
            "Dispatch attempts exhausted"
        );
        let reason = format!("dispatch failed after {} attempts: {}", attempts_made, reason);
        self.mark_failed(&element, &reason).await;
        self.publish(DispatchEvent::Abandoned { element, reason });
        DispatchOutcome::Failed
    }

    async fn mark_failed(&self, element: &JobElement, reason: &str) {
        let store = self.store_for(element.kind);
        let mut record = match store.find_by_id(&element.history_id).await {
            Ok(record) => record,
            Err(e) => {
                tracing::error!(history_id = %element.history_id, error = %e, "Cannot load history to mark failed");
                return;
            }
        };
        if record.status.is_terminal() {
            return;
        }
        record.fail(reason, Utc::now());
        if let Err(e) = store.update_status(&record).await {
            tracing::error!(history_id = %record.id, error = %e, "Failed to persist failed status");
        }
        if let Err(e) = store.update_log(&record).await {
            tracing::error!(history_id = %record.id, error = %e, "Failed to persist history log");
        }
    }

    /// Match a worker's response to its dispatch.
    pub async fn on_response(&self, connection: ConnectionId, response: Response) {
        let Some(element) = self.registry.release(connection, response.request_id).await else {
            tracing::warn!(
                connection = %connection,
                request_id = response.request_id,
                "Response for unknown request"
            );
            return;
        };

        let succeeded = response.succeeded();
        if succeeded {
            tracing::info!(
                job_id = %element.job_id,
                history_id = %element.history_id,
                request_id = response.request_id,
                "Job finished"
            );
        } else {
            tracing::warn!(
                job_id = %element.job_id,
                history_id = %element.history_id,
                request_id = response.request_id,
                error = %response.error_text,
                "Job failed"
            );
        }

        self.publish(DispatchEvent::Completed {
            request_id: response.request_id,
            element,
            succeeded,
            error_text: response.error_text,
        });
    }

    /// Reconcile everything a lost worker had in flight: runs that already
    /// reached a terminal state are left alone, the rest are re-dispatched
    /// while attempts remain and failed otherwise.
    pub async fn on_disconnect(&self, connection: ConnectionId) {
        let orphaned = self.registry.on_disconnect(connection).await;
        for element in orphaned {
            let store = self.store_for(element.kind);
            match store.find_by_id(&element.history_id).await {
                Ok(record) if record.status.is_terminal() => continue,
                Ok(mut record) => {
                    record.append_log(&format!(
                        "worker connection lost during attempt {}",
                        element.attempts + 1
                    ));
                    if let Err(e) = store.update_log(&record).await {
                        tracing::warn!(history_id = %record.id, error = %e, "Failed to persist history log");
                    }
                }
                Err(e) => {
                    tracing::warn!(history_id = %element.history_id, error = %e, "Cannot load orphaned history");
                }
            }
            self.requeue_or_fail(element, "worker connection lost").await;
        }
    }
}
