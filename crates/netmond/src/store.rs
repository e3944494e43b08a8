//! Metrics store writer.
//!
//! [`MetricStore`] is the opaque append/query capability. [`StoreWriter`]
//! sits between the poll cycle and the store and absorbs every failure:
//! a broken store costs history, never a poll cycle.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use netmon_common::{DeviceId, MonitorError, MonitorResult};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::health_monitor::HealthMonitor;
use crate::metrics::MetricsCollector;
use crate::types::{AlertEvent, MetricPoint};

/// Default number of alert events kept per device by [`MemoryStore`].
pub const DEFAULT_ALERT_HISTORY: usize = 1000;

/// Default number of metric points kept per device by [`MemoryStore`].
pub const DEFAULT_METRIC_HISTORY: usize = 50_000;

/// Append/query storage for metric points and alert records.
#[async_trait]
pub trait MetricStore: Send + Sync {
    /// Appends the points of one cycle.
    async fn append_metrics(&self, device: DeviceId, points: &[MetricPoint]) -> MonitorResult<()>;

    /// Appends one alert transition.
    async fn append_alert(&self, event: &AlertEvent) -> MonitorResult<()>;

    /// Returns up to `limit` alert transitions of a device, newest first.
    async fn recent_alerts(&self, device: DeviceId, limit: usize) -> MonitorResult<Vec<AlertEvent>>;

    /// Returns the points of one metric with `from <= timestamp < to`.
    async fn metrics_in_range(
        &self,
        device: DeviceId,
        metric: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> MonitorResult<Vec<MetricPoint>>;

    /// Drops everything recorded for a device.
    async fn purge_device(&self, device: DeviceId) -> MonitorResult<()>;
}

#[derive(Debug, Default)]
struct DeviceRecords {
    points: VecDeque<MetricPoint>,
    alerts: VecDeque<AlertEvent>,
}

/// In-process store. Alert and metric history are bounded rings per
/// device; the oldest records go first.
#[derive(Debug)]
pub struct MemoryStore {
    alert_history: usize,
    metric_history: usize,
    devices: Mutex<HashMap<DeviceId, DeviceRecords>>,
}

impl MemoryStore {
    pub fn new(alert_history: usize, metric_history: usize) -> Self {
        Self {
            alert_history: alert_history.max(1),
            metric_history: metric_history.max(1),
            devices: Mutex::new(HashMap::new()),
        }
    }

    /// Number of points stored for a device.
    pub fn point_count(&self, device: DeviceId) -> usize {
        self.devices
            .lock()
            .get(&device)
            .map(|r| r.points.len())
            .unwrap_or(0)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_ALERT_HISTORY, DEFAULT_METRIC_HISTORY)
    }
}

#[async_trait]
impl MetricStore for MemoryStore {
    async fn append_metrics(&self, device: DeviceId, points: &[MetricPoint]) -> MonitorResult<()> {
        let mut devices = self.devices.lock();
        let stored = &mut devices.entry(device).or_default().points;
        stored.extend(points.iter().cloned());
        let excess = stored.len().saturating_sub(self.metric_history);
        stored.drain(..excess);
        Ok(())
    }

    async fn append_alert(&self, event: &AlertEvent) -> MonitorResult<()> {
        let mut devices = self.devices.lock();
        let records = devices.entry(event.alert.device_id).or_default();
        if records.alerts.len() == self.alert_history {
            records.alerts.pop_front();
        }
        records.alerts.push_back(event.clone());
        Ok(())
    }

    async fn recent_alerts(&self, device: DeviceId, limit: usize) -> MonitorResult<Vec<AlertEvent>> {
        let devices = self.devices.lock();
        Ok(devices
            .get(&device)
            .map(|r| r.alerts.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn metrics_in_range(
        &self,
        device: DeviceId,
        metric: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> MonitorResult<Vec<MetricPoint>> {
        let devices = self.devices.lock();
        Ok(devices
            .get(&device)
            .map(|r| {
                r.points
                    .iter()
                    .filter(|p| p.metric == metric && p.timestamp >= from && p.timestamp < to)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn purge_device(&self, device: DeviceId) -> MonitorResult<()> {
        self.devices.lock().remove(&device);
        Ok(())
    }
}

/// Append-only JSON-lines files under a directory, one file per device and
/// record kind: `device-<id>.metrics.jsonl` and `device-<id>.alerts.jsonl`.
#[derive(Debug, Clone)]
pub struct JsonlStore {
    dir: PathBuf,
}

impl JsonlStore {
    /// Opens (and creates if needed) the store directory.
    pub async fn open(dir: impl Into<PathBuf>) -> MonitorResult<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| MonitorError::storage("open", format!("{}: {}", dir.display(), e)))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn metrics_path(&self, device: DeviceId) -> PathBuf {
        self.dir.join(format!("device-{}.metrics.jsonl", device))
    }

    fn alerts_path(&self, device: DeviceId) -> PathBuf {
        self.dir.join(format!("device-{}.alerts.jsonl", device))
    }

    async fn append_lines<T: Serialize>(
        &self,
        operation: &str,
        path: &Path,
        records: &[T],
    ) -> MonitorResult<()> {
        let mut buf = String::new();
        for record in records {
            let line = serde_json::to_string(record)
                .map_err(|e| MonitorError::storage(operation, e.to_string()))?;
            buf.push_str(&line);
            buf.push('\n');
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|e| MonitorError::storage(operation, format!("{}: {}", path.display(), e)))?;
        file.write_all(buf.as_bytes())
            .await
            .map_err(|e| MonitorError::storage(operation, format!("{}: {}", path.display(), e)))?;
        file.flush()
            .await
            .map_err(|e| MonitorError::storage(operation, e.to_string()))
    }

    async fn read_lines<T: DeserializeOwned>(&self, operation: &str, path: &Path) -> MonitorResult<Vec<T>> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(MonitorError::storage(
                    operation,
                    format!("{}: {}", path.display(), e),
                ))
            }
        };
        let mut out = Vec::new();
        for (lineno, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(record) => out.push(record),
                // A torn last line after a crash is skipped, not fatal.
                Err(e) => warn!(
                    path = %path.display(),
                    line = lineno + 1,
                    error = %e,
                    "Skipping unreadable store record"
                ),
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl MetricStore for JsonlStore {
    async fn append_metrics(&self, device: DeviceId, points: &[MetricPoint]) -> MonitorResult<()> {
        if points.is_empty() {
            return Ok(());
        }
        self.append_lines("append_metrics", &self.metrics_path(device), points)
            .await
    }

    async fn append_alert(&self, event: &AlertEvent) -> MonitorResult<()> {
        let path = self.alerts_path(event.alert.device_id);
        self.append_lines("append_alert", &path, std::slice::from_ref(event))
            .await
    }

    async fn recent_alerts(&self, device: DeviceId, limit: usize) -> MonitorResult<Vec<AlertEvent>> {
        let mut events: Vec<AlertEvent> = self
            .read_lines("recent_alerts", &self.alerts_path(device))
            .await?;
        events.reverse();
        events.truncate(limit);
        Ok(events)
    }

    async fn metrics_in_range(
        &self,
        device: DeviceId,
        metric: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> MonitorResult<Vec<MetricPoint>> {
        let points: Vec<MetricPoint> = self
            .read_lines("metrics_in_range", &self.metrics_path(device))
            .await?;
        Ok(points
            .into_iter()
            .filter(|p| p.metric == metric && p.timestamp >= from && p.timestamp < to)
            .collect())
    }

    async fn purge_device(&self, device: DeviceId) -> MonitorResult<()> {
        for path in [self.metrics_path(device), self.alerts_path(device)] {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(MonitorError::storage(
                        "purge_device",
                        format!("{}: {}", path.display(), e),
                    ))
                }
            }
        }
        Ok(())
    }
}

/// Non-fatal front end of a [`MetricStore`].
#[derive(Clone)]
pub struct StoreWriter {
    store: Arc<dyn MetricStore>,
    health: Arc<HealthMonitor>,
    metrics: Option<MetricsCollector>,
}

impl StoreWriter {
    pub fn new(
        store: Arc<dyn MetricStore>,
        health: Arc<HealthMonitor>,
        metrics: Option<MetricsCollector>,
    ) -> Self {
        Self {
            store,
            health,
            metrics,
        }
    }

    /// The wrapped store, for queries.
    pub fn store(&self) -> &Arc<dyn MetricStore> {
        &self.store
    }

    /// Persists the outputs of one successful cycle. Returns the number of
    /// failed writes; failures are logged and counted, never propagated.
    pub async fn write_cycle(
        &self,
        device: DeviceId,
        points: &[MetricPoint],
        events: &[AlertEvent],
    ) -> usize {
        let mut failures = 0;
        if !points.is_empty() {
            let result = self.store.append_metrics(device, points).await;
            failures += self.account(device, "append_metrics", result);
        }
        for event in events {
            failures += self.write_alert(event).await;
        }
        failures
    }

    /// Persists one alert transition. Returns 1 on failure, 0 otherwise.
    pub async fn write_alert(&self, event: &AlertEvent) -> usize {
        let result = self.store.append_alert(event).await;
        self.account(event.alert.device_id, "append_alert", result)
    }

    /// Drops stored history of a removed device.
    pub async fn purge(&self, device: DeviceId) {
        let result = self.store.purge_device(device).await;
        self.account(device, "purge_device", result);
    }

    fn account(&self, device: DeviceId, operation: &str, result: MonitorResult<()>) -> usize {
        match result {
            Ok(()) => {
                debug!(device_id = %device, operation, "Store write succeeded");
                self.health.record_write_success();
                0
            }
            Err(e) => {
                warn!(device_id = %device, operation, error = %e, "Store write failed");
                self.health.record_write_failure();
                if let Some(m) = &self.metrics {
                    m.record_store_error();
                }
                1
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::HealthStatus;
    use crate::types::{Alert, AlertCategory, AlertEventKind, AlertSeverity};
    use chrono::Duration as ChronoDuration;
    use netmon_common::AccountId;
    use uuid::Uuid;

    fn event(device: u64, kind: AlertEventKind, subject: &str) -> AlertEvent {
        AlertEvent {
            kind,
            alert: Alert {
                id: Uuid::new_v4(),
                device_id: DeviceId(device),
                account_id: AccountId(1),
                category: AlertCategory::Interface,
                severity: AlertSeverity::Warning,
                subject_key: subject.to_string(),
                opened_at: Utc::now(),
                resolved_at: None,
                message: format!("interface_down: {}", subject),
            },
        }
    }

    fn point(device: u64, at: DateTime<Utc>, metric: &str, value: f64) -> MetricPoint {
        MetricPoint::new(DeviceId(device), at, metric, value)
    }

    struct FailingStore;

    #[async_trait]
    impl MetricStore for FailingStore {
        async fn append_metrics(&self, _: DeviceId, _: &[MetricPoint]) -> MonitorResult<()> {
            Err(MonitorError::storage("append_metrics", "disk full"))
        }
        async fn append_alert(&self, _: &AlertEvent) -> MonitorResult<()> {
            Err(MonitorError::storage("append_alert", "disk full"))
        }
        async fn recent_alerts(&self, _: DeviceId, _: usize) -> MonitorResult<Vec<AlertEvent>> {
            Ok(Vec::new())
        }
        async fn metrics_in_range(
            &self,
            _: DeviceId,
            _: &str,
            _: DateTime<Utc>,
            _: DateTime<Utc>,
        ) -> MonitorResult<Vec<MetricPoint>> {
            Ok(Vec::new())
        }
        async fn purge_device(&self, _: DeviceId) -> MonitorResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_memory_store_alert_ring() {
        let store = MemoryStore::new(2, DEFAULT_METRIC_HISTORY);
        for subject in ["Gi0/1", "Gi0/2", "Gi0/3"] {
            store
                .append_alert(&event(1, AlertEventKind::Opened, subject))
                .await
                .unwrap();
        }
        let recent = store.recent_alerts(DeviceId(1), 10).await.unwrap();
        let subjects: Vec<&str> = recent.iter().map(|e| e.alert.subject_key.as_str()).collect();
        assert_eq!(subjects, vec!["Gi0/3", "Gi0/2"]);
    }

    #[tokio::test]
    async fn test_memory_store_metric_ring() {
        let store = MemoryStore::new(DEFAULT_ALERT_HISTORY, 3);
        let t0 = Utc::now();
        for cycle in 0..4 {
            let at = t0 + ChronoDuration::seconds(60 * cycle);
            store
                .append_metrics(
                    DeviceId(1),
                    &[point(1, at, "cpu_percent", cycle as f64), point(1, at, "memory_percent", 1.0)],
                )
                .await
                .unwrap();
        }
        store
            .append_metrics(DeviceId(2), &[point(2, t0, "cpu_percent", 9.0)])
            .await
            .unwrap();

        assert_eq!(store.point_count(DeviceId(1)), 3);
        assert_eq!(store.point_count(DeviceId(2)), 1);
        let cpu = store
            .metrics_in_range(DeviceId(1), "cpu_percent", t0, t0 + ChronoDuration::hours(1))
            .await
            .unwrap();
        let values: Vec<f64> = cpu.iter().map(|p| p.value).collect();
        assert_eq!(values, vec![2.0, 3.0]);
    }

    #[tokio::test]
    async fn test_memory_store_range_query_and_purge() {
        let store = MemoryStore::default();
        let t0 = Utc::now();
        let points = vec![
            point(1, t0, "cpu_percent", 10.0),
            point(1, t0 + ChronoDuration::seconds(60), "cpu_percent", 20.0),
            point(1, t0 + ChronoDuration::seconds(60), "memory_percent", 50.0),
        ];
        store.append_metrics(DeviceId(1), &points).await.unwrap();

        let got = store
            .metrics_in_range(DeviceId(1), "cpu_percent", t0, t0 + ChronoDuration::seconds(60))
            .await
            .unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].value, 10.0);

        store.purge_device(DeviceId(1)).await.unwrap();
        assert_eq!(store.point_count(DeviceId(1)), 0);
    }

    #[tokio::test]
    async fn test_jsonl_store_roundtrip_and_purge() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlStore::open(dir.path().join("data")).await.unwrap();
        let t0 = Utc::now();

        store
            .append_metrics(
                DeviceId(7),
                &[
                    point(7, t0, "cpu_percent", 33.0),
                    point(7, t0, "interfaces_up", 4.0),
                ],
            )
            .await
            .unwrap();
        store
            .append_alert(&event(7, AlertEventKind::Opened, "Gi0/1"))
            .await
            .unwrap();
        store
            .append_alert(&event(7, AlertEventKind::Resolved, "Gi0/1"))
            .await
            .unwrap();

        let cpu = store
            .metrics_in_range(
                DeviceId(7),
                "cpu_percent",
                t0 - ChronoDuration::seconds(1),
                t0 + ChronoDuration::seconds(1),
            )
            .await
            .unwrap();
        assert_eq!(cpu.len(), 1);
        assert_eq!(cpu[0].value, 33.0);

        let recent = store.recent_alerts(DeviceId(7), 1).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].kind, AlertEventKind::Resolved);

        store.purge_device(DeviceId(7)).await.unwrap();
        assert!(store.recent_alerts(DeviceId(7), 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_jsonl_store_skips_torn_line() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlStore::open(dir.path()).await.unwrap();
        store
            .append_alert(&event(3, AlertEventKind::Opened, "Gi0/1"))
            .await
            .unwrap();
        let path = dir.path().join("device-3.alerts.jsonl");
        let mut content = std::fs::read_to_string(&path).unwrap();
        content.push_str("{\"kind\":\"opened\",\"al");
        std::fs::write(&path, content).unwrap();

        assert_eq!(store.recent_alerts(DeviceId(3), 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_store_writer_absorbs_failures() {
        let metrics = MetricsCollector::new().unwrap();
        let health = Arc::new(HealthMonitor::new(Some(metrics.clone())));
        let writer = StoreWriter::new(Arc::new(FailingStore), health.clone(), Some(metrics.clone()));

        let failures = writer
            .write_cycle(
                DeviceId(1),
                &[point(1, Utc::now(), "cpu_percent", 1.0)],
                &[event(1, AlertEventKind::Opened, "Gi0/1")],
            )
            .await;
        assert_eq!(failures, 2);
        assert_eq!(metrics.store_errors_total.get(), 2.0);
        assert_eq!(health.status(), HealthStatus::Degraded);
    }

    #[tokio::test]
    async fn test_store_writer_success_path() {
        let store = Arc::new(MemoryStore::default());
        let health = Arc::new(HealthMonitor::new(None));
        let writer = StoreWriter::new(store.clone(), health.clone(), None);
        let failures = writer
            .write_cycle(DeviceId(2), &[point(2, Utc::now(), "cpu_percent", 1.0)], &[])
            .await;
        assert_eq!(failures, 0);
        assert_eq!(store.point_count(DeviceId(2)), 1);
        assert_eq!(health.status(), HealthStatus::Healthy);
    }
}
