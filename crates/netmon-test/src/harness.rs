//! Engine harness wired to the scripted transport and recording store.

use netmon_common::{Device, DeviceId};
use netmond::registry::StaticRegistry;
use netmond::{MetricsCollector, NetmonConfig, Netmond, SyncReport};
use std::sync::Arc;
use std::time::Duration;

use crate::fixtures::lab_credentials;
use crate::store::RecordingStore;
use crate::transport::ScriptedTransport;

/// A fully assembled engine with handles on every test double.
pub struct TestEngine {
    pub engine: Netmond,
    pub registry: Arc<StaticRegistry>,
    pub transport: ScriptedTransport,
    pub store: Arc<RecordingStore>,
    pub metrics: MetricsCollector,
}

impl TestEngine {
    /// Builds an engine from `config`; the lab credentials are always
    /// resolvable.
    pub fn new(config: NetmonConfig) -> Self {
        let registry = Arc::new(StaticRegistry::default());
        let transport = ScriptedTransport::new();
        let store = Arc::new(RecordingStore::new());
        let metrics = MetricsCollector::new().expect("metrics registry");

        let mut credentials = config.credential_resolver();
        credentials.insert(lab_credentials());

        let engine = Netmond::assemble(
            &config,
            Arc::new(transport.clone()),
            registry.clone(),
            Arc::new(credentials),
            store.clone(),
            Some(metrics.clone()),
        )
        .expect("engine assembly");

        Self {
            engine,
            registry,
            transport,
            store,
            metrics,
        }
    }

    /// Default configuration with a fixed polling interval.
    pub fn with_interval(interval: Duration) -> Self {
        let mut config = NetmonConfig::default();
        config.scheduler.default_interval_secs = interval.as_secs();
        Self::new(config)
    }

    pub fn add_device(&self, device: Device) {
        self.registry.upsert(device);
    }

    pub fn remove_device(&self, id: DeviceId) {
        self.registry.remove(id);
    }

    /// Runs one registry reconciliation.
    pub async fn sync(&self) -> SyncReport {
        self.engine
            .scheduler()
            .sync_once()
            .await
            .expect("registry sync")
    }

    pub async fn shutdown(&self) {
        self.engine.shutdown().await;
    }
}
