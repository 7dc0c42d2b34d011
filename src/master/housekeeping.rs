use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::master::context::MasterContext;

/// Periodic maintenance, independent of the dispatch loops: refreshes the
/// host group cache and evicts workers whose heartbeats stopped.
pub async fn run_housekeeping(ctx: Arc<MasterContext>, cancel: CancellationToken) {
    let mut interval =
        tokio::time::interval(Duration::from_millis(ctx.config.housekeeping_interval_ms.max(1)));
    let worker_timeout = Duration::from_millis(ctx.config.worker_timeout_ms);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }

        ctx.refresh_host_groups().await;

        for id in ctx.registry.stale_workers(worker_timeout).await {
            tracing::warn!(connection = %id, "Worker heartbeat timed out, dropping connection");
            ctx.dispatcher.on_disconnect(id).await;
        }
    }
}
