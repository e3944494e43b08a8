//! Poll scheduler.
//!
//! Every enabled device gets one long-lived task that loops
//! `wait for permit → poll → commit → sleep(interval)`. Because the interval
//! is re-armed only after a cycle completes, cycles of one device can never
//! overlap. A shared semaphore bounds how many cycles run at once.
//!
//! A supervisor loop reconciles the task set with the device registry:
//! new devices get a task, removed devices have their task cancelled, and
//! changed definitions are pushed to the running task, which polls again
//! right away with the new settings. Cancellation never interrupts a cycle
//! that is already talking to a device; its result is discarded instead.
//! The supervisor waits for a removed device's task to exit before it drops
//! the device's status and stored history, so nothing lands after the purge.
//!
//! A finished cycle is published to the hub first and persisted second; a
//! slow store delays the next cycle of that device, never its fan-out.

use chrono::Utc;
use dashmap::DashMap;
use netmon_common::{Device, DeviceId, MonitorError, MonitorResult, SessionAdapter};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::alerting::{AlertEngine, AlertPolicy};
use crate::extractor::Extractor;
use crate::health_monitor::HealthMonitor;
use crate::hub::{Hub, HubEvent, StatusSummary};
use crate::metrics::MetricsCollector;
use crate::registry::{CredentialResolver, DeviceRegistry};
use crate::store::StoreWriter;
use crate::types::{AlertEvent, DeviceStatus, MetricPoint, Reachability, Snapshot};

/// Read-only view of every device's current status, written only by the
/// owning device task.
pub type StatusTable = DashMap<DeviceId, DeviceStatus>;

/// Timing and limits of the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerSettings {
    /// Interval for devices without their own.
    pub default_interval: Duration,
    /// Upper bound on simultaneously running cycles.
    pub max_concurrent_polls: usize,
    /// Consecutive failed cycles before a device is declared unreachable.
    pub failure_threshold: u32,
    /// How often the registry is re-read.
    pub registry_refresh: Duration,
    /// Drop stored history when a device leaves the registry.
    pub purge_on_removal: bool,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            default_interval: Duration::from_secs(60),
            max_concurrent_polls: 16,
            failure_threshold: 3,
            registry_refresh: Duration::from_secs(5),
            purge_on_removal: true,
        }
    }
}

/// Collaborators shared by all device tasks.
pub struct PollContext {
    pub adapter: SessionAdapter,
    pub extractor: Extractor,
    pub credentials: Arc<dyn CredentialResolver>,
    pub writer: StoreWriter,
    pub hub: Arc<Hub>,
    pub policy: Arc<AlertPolicy>,
    pub status: Arc<StatusTable>,
    pub health: Arc<HealthMonitor>,
    pub metrics: Option<MetricsCollector>,
}

struct DeviceHandle {
    cancel: CancellationToken,
    device_tx: watch::Sender<Device>,
    task: JoinHandle<()>,
}

/// Summary of one supervisor reconciliation pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub added: Vec<DeviceId>,
    pub updated: Vec<DeviceId>,
    pub removed: Vec<DeviceId>,
}

/// Supervisor and owner of all device tasks.
pub struct Scheduler {
    settings: Arc<SchedulerSettings>,
    registry: Arc<dyn DeviceRegistry>,
    ctx: Arc<PollContext>,
    permits: Arc<Semaphore>,
    in_flight: Arc<AtomicUsize>,
    tasks: Mutex<HashMap<DeviceId, DeviceHandle>>,
    root: CancellationToken,
    tracker: TaskTracker,
}

impl Scheduler {
    pub fn new(
        settings: SchedulerSettings,
        registry: Arc<dyn DeviceRegistry>,
        ctx: Arc<PollContext>,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(settings.max_concurrent_polls.max(1)));
        Self {
            settings: Arc::new(settings),
            registry,
            ctx,
            permits,
            in_flight: Arc::new(AtomicUsize::new(0)),
            tasks: Mutex::new(HashMap::new()),
            root: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// Shared status table.
    pub fn status_table(&self) -> Arc<StatusTable> {
        self.ctx.status.clone()
    }

    /// Current status of one device.
    pub fn status(&self, id: DeviceId) -> Option<DeviceStatus> {
        self.ctx.status.get(&id).map(|s| s.clone())
    }

    /// Number of scheduled devices.
    pub fn device_count(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Cycles currently holding a concurrency permit.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Runs the supervisor loop until [`Scheduler::shutdown`] is called.
    pub async fn run(&self) {
        info!(
            refresh_secs = self.settings.registry_refresh.as_secs(),
            max_concurrent = self.settings.max_concurrent_polls,
            "Scheduler started"
        );
        let mut ticker = tokio::time::interval(self.settings.registry_refresh);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.root.cancelled() => {
                    info!("Scheduler supervisor stopping");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.sync_once().await {
                        warn!(error = %e, "Registry refresh failed, keeping current schedule");
                    }
                }
            }
        }
    }

    /// Reconciles running tasks with the registry once.
    pub async fn sync_once(&self) -> MonitorResult<SyncReport> {
        if self.root.is_cancelled() {
            return Ok(SyncReport::default());
        }
        let wanted: HashMap<DeviceId, Device> = self
            .registry
            .list_devices()
            .await?
            .into_iter()
            .filter(|d| d.enabled)
            .map(|d| (d.id, d))
            .collect();

        let mut report = SyncReport::default();
        let mut stopping = Vec::new();
        let count = {
            let mut tasks = self.tasks.lock();
            let gone: Vec<DeviceId> = tasks
                .keys()
                .filter(|id| !wanted.contains_key(id))
                .copied()
                .collect();
            for id in gone {
                if let Some(handle) = tasks.remove(&id) {
                    handle.cancel.cancel();
                    stopping.push((id, handle.task));
                    report.removed.push(id);
                }
            }

            for (id, device) in wanted {
                match tasks.get(&id) {
                    Some(handle) if !handle.task.is_finished() => {
                        if *handle.device_tx.borrow() != device {
                            handle.device_tx.send_replace(device);
                            report.updated.push(id);
                        }
                        continue;
                    }
                    Some(_) => {
                        warn!(device_id = %id, "Device task exited unexpectedly, restarting");
                    }
                    None => {}
                }
                tasks.insert(id, self.spawn_device(device));
                report.added.push(id);
            }
            tasks.len()
        };

        for (id, task) in stopping {
            // An in-flight cycle finishes before the device's data goes.
            if let Err(e) = task.await {
                warn!(device_id = %id, error = %e, "Device task ended abnormally");
            }
            self.ctx.status.remove(&id);
            if self.settings.purge_on_removal {
                self.ctx.writer.purge(id).await;
            }
            info!(device_id = %id, "Device removed from schedule");
        }
        for id in &report.updated {
            info!(device_id = %id, "Device definition changed");
        }
        if count == 0 {
            // An empty schedule is not a stall.
            self.ctx.health.record_cycle();
        }
        if let Some(m) = &self.ctx.metrics {
            m.set_devices(count);
        }
        Ok(report)
    }

    /// Cancels every device task and waits for in-flight cycles to finish.
    pub async fn shutdown(&self) {
        info!("Scheduler shutting down");
        self.root.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        self.tasks.lock().clear();
        if let Some(m) = &self.ctx.metrics {
            m.set_devices(0);
        }
        info!("Scheduler stopped");
    }

    fn spawn_device(&self, device: Device) -> DeviceHandle {
        let cancel = self.root.child_token();
        let (device_tx, device_rx) = watch::channel(device.clone());

        self.ctx.status.insert(
            device.id,
            DeviceStatus::new(device.id, device.account_id, device.name.clone()),
        );

        let poller = DevicePoller {
            engine: AlertEngine::new(&device, self.ctx.policy.clone()),
            ctx: self.ctx.clone(),
            settings: self.settings.clone(),
            permits: self.permits.clone(),
            in_flight: self.in_flight.clone(),
            device_rx,
            cancel: cancel.clone(),
            consecutive_failures: 0,
        };
        let span = info_span!("device", device_id = %device.id, name = %device.name);
        let task = self.tracker.spawn(poller.run().instrument(span));
        info!(device_id = %device.id, name = %device.name, address = %device.address, "Device scheduled");

        DeviceHandle {
            cancel,
            device_tx,
            task,
        }
    }
}

/// State owned by one device task.
struct DevicePoller {
    ctx: Arc<PollContext>,
    settings: Arc<SchedulerSettings>,
    permits: Arc<Semaphore>,
    in_flight: Arc<AtomicUsize>,
    device_rx: watch::Receiver<Device>,
    cancel: CancellationToken,
    engine: AlertEngine,
    consecutive_failures: u32,
}

impl DevicePoller {
    async fn run(mut self) {
        loop {
            let device = self.device_rx.borrow_and_update().clone();
            self.engine.update_device(&device);

            let permit = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                permit = self.permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let outcome = self.poll_once(&device).await;
            drop(permit);

            if self.cancel.is_cancelled() {
                info!("Device cancelled during poll, discarding result");
                break;
            }
            self.commit(&device, outcome).await;

            let interval = device.poll_interval(self.settings.default_interval);
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
                changed = self.device_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        debug!("Device task finished");
    }

    /// One cycle against the device: resolve credentials, run the command
    /// set, extract a snapshot.
    async fn poll_once(&self, device: &Device) -> MonitorResult<Snapshot> {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(m) = &self.ctx.metrics {
            m.set_polls_in_flight(running);
        }
        let started = Instant::now();

        let result = async {
            let credentials = self.ctx.credentials.resolve(device).await?;
            let outputs = self.ctx.adapter.collect(device, &credentials).await?;
            self.ctx
                .extractor
                .extract(&device.platform, &outputs, Utc::now())
        }
        .await;

        let running = self.in_flight.fetch_sub(1, Ordering::SeqCst) - 1;
        if let Some(m) = &self.ctx.metrics {
            m.set_polls_in_flight(running);
            m.record_poll(started.elapsed().as_secs_f64());
        }
        result
    }

    async fn commit(&mut self, device: &Device, outcome: MonitorResult<Snapshot>) {
        let now = Utc::now();
        let mut events: Vec<AlertEvent> = Vec::new();
        let mut points: Vec<MetricPoint> = Vec::new();
        let mut status = self
            .ctx
            .status
            .get(&device.id)
            .map(|s| s.clone())
            .unwrap_or_else(|| DeviceStatus::new(device.id, device.account_id, &device.name));
        status.account_id = device.account_id;
        status.name = device.name.clone();
        status.last_attempt = Some(now);

        match outcome {
            Ok(snapshot) => {
                if self.consecutive_failures > 0 {
                    info!(
                        failures = self.consecutive_failures,
                        "Device reachable again"
                    );
                }
                self.consecutive_failures = 0;
                events.extend(self.engine.mark_reachable(now));

                points = MetricPoint::from_snapshot(device.id, &snapshot);
                events.extend(self.engine.apply(snapshot, now));

                status.reachability = Reachability::Online;
                status.last_success = Some(now);
                status.stale = false;
                status.last_error = None;
                status.snapshot = self.engine.snapshot().cloned();
            }
            Err(e) => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                self.record_failure(&e);

                if self.consecutive_failures >= self.settings.failure_threshold {
                    status.reachability = Reachability::Offline;
                    events.extend(
                        self.engine
                            .mark_unreachable(now, self.consecutive_failures),
                    );
                }
                status.stale = true;
                status.last_error = Some(e.to_string());
            }
        }

        status.consecutive_failures = self.consecutive_failures;
        status.open_alerts = self.engine.open_alerts();

        if self.cancel.is_cancelled() {
            debug!("Device removed while committing, cycle discarded");
            return;
        }

        if let Some(m) = &self.ctx.metrics {
            for event in &events {
                m.record_alert(event.kind);
            }
        }

        let summary = StatusSummary::from(&status);
        self.ctx.status.insert(device.id, status);
        for event in &events {
            self.ctx.hub.publish(
                device.id,
                device.account_id,
                HubEvent::Alert(event.clone()),
            );
        }
        self.ctx.hub.publish(
            device.id,
            device.account_id,
            HubEvent::StatusUpdate(summary),
        );
        self.ctx.health.record_cycle();

        let failed = self
            .ctx
            .writer
            .write_cycle(device.id, &points, &events)
            .await;
        debug!(
            points = points.len(),
            events = events.len(),
            failed_writes = failed,
            "Poll cycle committed"
        );
    }

    fn record_failure(&self, e: &MonitorError) {
        if let Some(m) = &self.ctx.metrics {
            m.record_poll_failure(e.kind());
        }
        let message = if e.is_transport() {
            "Poll cycle failed, device not reachable"
        } else {
            "Poll cycle failed, device output rejected"
        };
        warn!(
            error = %e,
            kind = e.kind(),
            failures = self.consecutive_failures,
            threshold = self.settings.failure_threshold,
            "{}",
            message
        );
    }
}
