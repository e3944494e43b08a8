//! Recording store: a [`MemoryStore`] that counts writes and can fail or
//! stall on demand.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use netmon_common::{DeviceId, MonitorError, MonitorResult};
use netmond::store::{MemoryStore, MetricStore};
use netmond::{AlertEvent, MetricPoint};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

#[derive(Debug, Default)]
struct Calls {
    metric_batches: usize,
    metric_points: usize,
    alerts: Vec<AlertEvent>,
    purged: Vec<DeviceId>,
}

#[derive(Debug, Default)]
pub struct RecordingStore {
    inner: MemoryStore,
    failing: AtomicBool,
    write_delay: Mutex<Duration>,
    calls: Mutex<Calls>,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent write fail with a storage error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Makes every subsequent append take `delay` before it lands.
    pub fn set_write_delay(&self, delay: Duration) {
        *self.write_delay.lock() = delay;
    }

    /// Successful `append_metrics` calls.
    pub fn metric_batches(&self) -> usize {
        self.calls.lock().metric_batches
    }

    /// Points accepted across all batches.
    pub fn metric_points(&self) -> usize {
        self.calls.lock().metric_points
    }

    /// Alert events accepted, in write order.
    pub fn alerts(&self) -> Vec<AlertEvent> {
        self.calls.lock().alerts.clone()
    }

    pub fn purged(&self) -> Vec<DeviceId> {
        self.calls.lock().purged.clone()
    }

    fn check(&self, operation: &str) -> MonitorResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(MonitorError::storage(operation, "store unavailable"));
        }
        Ok(())
    }

    async fn stall(&self) {
        let delay = *self.write_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl MetricStore for RecordingStore {
    async fn append_metrics(&self, device: DeviceId, points: &[MetricPoint]) -> MonitorResult<()> {
        self.stall().await;
        self.check("append_metrics")?;
        self.inner.append_metrics(device, points).await?;
        let mut calls = self.calls.lock();
        calls.metric_batches += 1;
        calls.metric_points += points.len();
        Ok(())
    }

    async fn append_alert(&self, event: &AlertEvent) -> MonitorResult<()> {
        self.stall().await;
        self.check("append_alert")?;
        self.inner.append_alert(event).await?;
        self.calls.lock().alerts.push(event.clone());
        Ok(())
    }

    async fn recent_alerts(&self, device: DeviceId, limit: usize) -> MonitorResult<Vec<AlertEvent>> {
        self.inner.recent_alerts(device, limit).await
    }

    async fn metrics_in_range(
        &self,
        device: DeviceId,
        metric: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> MonitorResult<Vec<MetricPoint>> {
        self.inner.metrics_in_range(device, metric, from, to).await
    }

    async fn purge_device(&self, device: DeviceId) -> MonitorResult<()> {
        self.check("purge_device")?;
        self.inner.purge_device(device).await?;
        self.calls.lock().purged.push(device);
        Ok(())
    }
}
