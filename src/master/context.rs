use std::sync::Arc;

use crate::config::MasterConfig;
use crate::scheduler::{ConnectionRegistry, DispatchQueues, Dispatcher};
use crate::service::{HistoryStore, HostGroupResolver};

/// Shared state of one master instance: queues, worker registry,
/// dispatcher and collaborators. Built explicitly so several independent
/// masters can coexist in one process.
pub struct MasterContext {
    pub config: MasterConfig,
    pub queues: Arc<DispatchQueues>,
    pub registry: Arc<ConnectionRegistry>,
    pub dispatcher: Arc<Dispatcher>,
    pub history: Arc<dyn HistoryStore>,
    pub debug_history: Arc<dyn HistoryStore>,
    pub host_groups: Arc<dyn HostGroupResolver>,
}

impl MasterContext {
    pub fn new(
        config: MasterConfig,
        history: Arc<dyn HistoryStore>,
        debug_history: Arc<dyn HistoryStore>,
        host_groups: Arc<dyn HostGroupResolver>,
    ) -> Self {
        let queues = Arc::new(DispatchQueues::new(config.queues.clone()));
        let registry = Arc::new(ConnectionRegistry::new());
        let dispatcher = Arc::new(Dispatcher::new(
            queues.clone(),
            registry.clone(),
            history.clone(),
            debug_history.clone(),
            config.max_dispatch_attempts,
            config.retry_delay(),
        ));
        Self {
            config,
            queues,
            registry,
            dispatcher,
            history,
            debug_history,
            host_groups,
        }
    }

    /// Reload the host group cache used for worker selection.
    pub async fn refresh_host_groups(&self) {
        match self.host_groups.all_host_groups().await {
            Ok(groups) => {
                tracing::debug!(groups = groups.len(), "Host group cache refreshed");
                self.registry.set_host_groups(groups).await;
            }
            Err(e) => tracing::warn!(error = %e, "Failed to refresh host groups"),
        }
    }
}
