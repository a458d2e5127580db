use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;

use crate::dispatch::Dispatcher;
use crate::ledger::RewardLedger;
use crate::registry::ProviderRegistry;
use crate::settlement::Settlement;
use crate::store::Store;

const DEFAULT_OUTBOUND_BUFFER: usize = 32;

/// Shared handles passed to every route and connection task.
#[derive(Clone)]
pub struct AppState {
    pub registry: ProviderRegistry,
    pub dispatcher: Dispatcher,
    pub ledger: RewardLedger,
    pub store: Arc<dyn Store>,
    metrics: Option<PrometheusHandle>,
    outbound_buffer: usize,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, settlement: Option<Arc<dyn Settlement>>) -> Self {
        let registry = ProviderRegistry::new();
        Self {
            dispatcher: Dispatcher::new(registry.clone()),
            ledger: RewardLedger::new(registry.clone(), store.clone(), settlement),
            registry,
            store,
            metrics: None,
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
        }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    pub fn with_outbound_buffer(mut self, buffer: usize) -> Self {
        self.outbound_buffer = buffer.max(1);
        self
    }

    pub fn outbound_buffer(&self) -> usize {
        self.outbound_buffer
    }

    pub fn render_metrics(&self) -> String {
        self.metrics
            .as_ref()
            .map(PrometheusHandle::render)
            .unwrap_or_default()
    }
}
