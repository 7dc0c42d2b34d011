use std::net::SocketAddr;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::error::HeraError;
use crate::master::{Master, TriggerAck};
use crate::scheduler::{QueueKind, WorkerSummary};
use crate::service::TriggerType;

#[derive(Clone)]
pub struct ApiState {
    pub master: Master,
}

#[derive(Deserialize)]
struct ManualTriggerParams {
    /// `manual` (default) or `recover`.
    trigger: Option<String>,
}

#[derive(Serialize)]
struct ManualTriggerResponse {
    success: bool,
    ack: Option<TriggerAck>,
    error: Option<String>,
}

#[derive(Serialize)]
struct QueueDepth {
    queue: &'static str,
    len: usize,
}

#[derive(Serialize)]
struct StatusResponse {
    queues: Vec<QueueDepth>,
    in_flight: usize,
    workers: Vec<WorkerSummary>,
}

pub fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/manual/{history_id}", post(manual_trigger_handler))
        .route("/api/status", get(status_handler))
        .layer(cors)
        .with_state(state)
}

pub async fn run_api(addr: SocketAddr, state: ApiState, cancel: CancellationToken) {
    let app = router(state);

    tracing::info!(addr = %addr, "Starting API server");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %addr, error = %e, "Failed to bind API server");
            return;
        }
    };

    let shutdown = async move { cancel.cancelled().await };
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
    {
        tracing::error!(error = %e, "API server failed");
    }
}

async fn manual_trigger_handler(
    State(state): State<ApiState>,
    Path(history_id): Path<String>,
    Query(params): Query<ManualTriggerParams>,
) -> impl IntoResponse {
    let trigger = match params.trigger.as_deref() {
        None | Some("manual") => TriggerType::Manual,
        Some("recover") => TriggerType::ManualRecover,
        Some(other) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ManualTriggerResponse {
                    success: false,
                    ack: None,
                    error: Some(format!("unknown trigger type: {}", other)),
                }),
            );
        }
    };

    match state.master.execute_job_from_web(trigger, &history_id).await {
        Ok(ack) => (
            StatusCode::OK,
            Json(ManualTriggerResponse {
                success: true,
                ack: Some(ack),
                error: None,
            }),
        ),
        Err(e) => {
            let status = match &e {
                HeraError::HistoryNotFound(_) => StatusCode::NOT_FOUND,
                HeraError::QueueFull { .. } | HeraError::Timeout(_) => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            tracing::warn!(history_id = %history_id, error = %e, "Manual trigger rejected");
            (
                status,
                Json(ManualTriggerResponse {
                    success: false,
                    ack: None,
                    error: Some(e.to_string()),
                }),
            )
        }
    }
}

async fn status_handler(State(state): State<ApiState>) -> impl IntoResponse {
    let ctx = state.master.context();

    let mut queues = Vec::with_capacity(QueueKind::ALL.len());
    for kind in QueueKind::ALL {
        queues.push(QueueDepth {
            queue: kind.name(),
            len: ctx.queues.len(kind).await,
        });
    }

    Json(StatusResponse {
        queues,
        in_flight: ctx.registry.in_flight().await,
        workers: ctx.registry.summaries().await,
    })
}
