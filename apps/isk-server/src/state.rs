use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

use crate::auth::TokenAuthority;
use crate::catalog::Catalog;
use crate::channel::EventChannel;
use crate::override_queue::OverrideQueues;
use crate::registry::DisplayRegistry;
use crate::sync::SyncService;

/// Shared handle for the router and the websocket handler.
#[derive(Clone)]
pub struct AppState {
    pub sync: SyncService,
    pub tokens: Arc<TokenAuthority>,
    metrics: Option<PrometheusHandle>,
}

impl AppState {
    /// Wire the sync core together and start forwarding override
    /// transitions. Must be called inside a tokio runtime.
    pub fn new(
        registry: DisplayRegistry,
        catalog: Catalog,
        channel_depth: usize,
        tokens: TokenAuthority,
    ) -> Self {
        let (overrides, transitions) = OverrideQueues::new();
        let sync = SyncService::new(
            registry,
            EventChannel::new(channel_depth),
            overrides,
            catalog,
        );
        sync.spawn_override_pump(transitions);
        Self {
            sync,
            tokens: Arc::new(tokens),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    pub fn render_metrics(&self) -> String {
        self.metrics
            .as_ref()
            .map(PrometheusHandle::render)
            .unwrap_or_default()
    }
}
