//! Assembles the engine from configuration.

use netmon_common::{DeviceId, MonitorResult, SessionAdapter, SessionFactory};
use std::sync::Arc;
use tracing::info;

use crate::config_file::{NetmonConfig, StoreBackend};
use crate::health_monitor::HealthMonitor;
use crate::hub::{Hub, Subscription, SubscriptionScope};
use crate::metrics::MetricsCollector;
use crate::registry::{CredentialResolver, DeviceRegistry, FileRegistry, StaticRegistry};
use crate::scheduler::{PollContext, Scheduler, StatusTable};
use crate::store::{JsonlStore, MemoryStore, MetricStore, StoreWriter};
use crate::types::{AlertEvent, DeviceStatus};

/// The running engine: scheduler plus the surfaces observers read from.
pub struct Netmond {
    scheduler: Arc<Scheduler>,
    hub: Arc<Hub>,
    status: Arc<StatusTable>,
    writer: StoreWriter,
    health: Arc<HealthMonitor>,
    metrics: Option<MetricsCollector>,
}

impl Netmond {
    /// Builds every component described by `config`, using `factory` to
    /// reach devices.
    pub async fn from_config(
        config: &NetmonConfig,
        factory: Arc<dyn SessionFactory>,
        metrics: Option<MetricsCollector>,
    ) -> MonitorResult<Self> {
        config.validate()?;

        let registry: Arc<dyn DeviceRegistry> = match &config.devices_file {
            Some(path) => {
                info!(path = %path.display(), "Using device file registry");
                Arc::new(FileRegistry::new(path))
            }
            None => {
                info!(devices = config.devices.len(), "Using inline device registry");
                Arc::new(StaticRegistry::new(config.devices.iter().cloned()))
            }
        };

        let store: Arc<dyn MetricStore> = match (config.store.backend, &config.store.path) {
            (StoreBackend::Jsonl, Some(path)) => {
                info!(path = %path.display(), "Using jsonl store");
                Arc::new(JsonlStore::open(path).await?)
            }
            _ => Arc::new(MemoryStore::new(
                config.store.alert_history,
                config.store.metric_history,
            )),
        };

        let credentials: Arc<dyn CredentialResolver> = Arc::new(config.credential_resolver());
        Self::assemble(config, factory, registry, credentials, store, metrics)
    }

    /// Builds the engine around explicitly supplied collaborators.
    pub fn assemble(
        config: &NetmonConfig,
        factory: Arc<dyn SessionFactory>,
        registry: Arc<dyn DeviceRegistry>,
        credentials: Arc<dyn CredentialResolver>,
        store: Arc<dyn MetricStore>,
        metrics: Option<MetricsCollector>,
    ) -> MonitorResult<Self> {
        let health = Arc::new(config.health_monitor(metrics.clone()));
        let hub = Arc::new(Hub::new(config.hub.subscriber_queue_size, metrics.clone()));
        let status = Arc::new(StatusTable::new());
        let writer = StoreWriter::new(store, health.clone(), metrics.clone());

        let ctx = Arc::new(PollContext {
            adapter: SessionAdapter::new(factory, config.command_table(), config.command_timeout()),
            extractor: config.extractor()?,
            credentials,
            writer: writer.clone(),
            hub: hub.clone(),
            policy: Arc::new(config.alert_policy()),
            status: status.clone(),
            health: health.clone(),
            metrics: metrics.clone(),
        });
        let scheduler = Arc::new(Scheduler::new(config.scheduler_settings(), registry, ctx));

        Ok(Self {
            scheduler,
            hub,
            status,
            writer,
            health,
            metrics,
        })
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    pub fn health(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    pub fn metrics(&self) -> Option<&MetricsCollector> {
        self.metrics.as_ref()
    }

    /// Subscribes to live events.
    pub fn subscribe(&self, scope: SubscriptionScope) -> Subscription {
        self.hub.subscribe(scope)
    }

    /// Current status of one device.
    pub fn status(&self, id: DeviceId) -> Option<DeviceStatus> {
        self.status.get(&id).map(|s| s.clone())
    }

    /// Current status of every scheduled device, ordered by id.
    pub fn statuses(&self) -> Vec<DeviceStatus> {
        let mut all: Vec<DeviceStatus> = self.status.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|s| s.device_id);
        all
    }

    /// Most recent alert transitions of a device, newest first.
    pub async fn recent_alerts(&self, id: DeviceId, limit: usize) -> MonitorResult<Vec<AlertEvent>> {
        self.writer.store().recent_alerts(id, limit).await
    }

    /// Runs the registry supervisor until shutdown.
    pub async fn run(&self) {
        self.scheduler.run().await;
    }

    /// Stops all polling and waits for in-flight cycles.
    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
    }
}
