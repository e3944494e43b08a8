//! Prometheus self-metrics for netmond.

use prometheus::{Counter, CounterVec, Gauge, Histogram, HistogramOpts, Opts, Registry};
use std::sync::Arc;

use crate::types::AlertEventKind;

/// Metrics collector shared by the scheduler, store writer and hub.
#[derive(Clone)]
pub struct MetricsCollector {
    // Counters
    pub polls_total: Counter,
    pub poll_failures_total: CounterVec,
    pub alerts_opened_total: Counter,
    pub alerts_escalated_total: Counter,
    pub alerts_resolved_total: Counter,
    pub store_errors_total: Counter,
    pub hub_dropped_subscribers_total: Counter,

    // Gauges
    pub polls_in_flight: Gauge,
    pub devices: Gauge,
    pub hub_subscribers: Gauge,
    pub health_status: Gauge,

    // Histograms
    pub poll_duration_seconds: Histogram,

    // Registry for export
    pub registry: Arc<Registry>,
}

impl MetricsCollector {
    /// Create a new metrics collector with its own registry.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let polls_total = Counter::with_opts(Opts::new(
            "netmond_polls_total",
            "Total number of completed poll cycles",
        ))?;
        registry.register(Box::new(polls_total.clone()))?;

        let poll_failures_total = CounterVec::new(
            Opts::new(
                "netmond_poll_failures_total",
                "Total number of failed poll cycles by error kind",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(poll_failures_total.clone()))?;

        let alerts_opened_total = Counter::with_opts(Opts::new(
            "netmond_alerts_opened_total",
            "Total number of alerts opened",
        ))?;
        registry.register(Box::new(alerts_opened_total.clone()))?;

        let alerts_escalated_total = Counter::with_opts(Opts::new(
            "netmond_alerts_escalated_total",
            "Total number of alerts escalated to critical",
        ))?;
        registry.register(Box::new(alerts_escalated_total.clone()))?;

        let alerts_resolved_total = Counter::with_opts(Opts::new(
            "netmond_alerts_resolved_total",
            "Total number of alerts resolved",
        ))?;
        registry.register(Box::new(alerts_resolved_total.clone()))?;

        let store_errors_total = Counter::with_opts(Opts::new(
            "netmond_store_errors_total",
            "Total number of failed metric or alert writes",
        ))?;
        registry.register(Box::new(store_errors_total.clone()))?;

        let hub_dropped_subscribers_total = Counter::with_opts(Opts::new(
            "netmond_hub_dropped_subscribers_total",
            "Total number of subscribers dropped for overflow or disconnect",
        ))?;
        registry.register(Box::new(hub_dropped_subscribers_total.clone()))?;

        let polls_in_flight = Gauge::with_opts(Opts::new(
            "netmond_polls_in_flight",
            "Current number of poll cycles holding a concurrency permit",
        ))?;
        registry.register(Box::new(polls_in_flight.clone()))?;

        let devices = Gauge::with_opts(Opts::new(
            "netmond_devices",
            "Current number of scheduled devices",
        ))?;
        registry.register(Box::new(devices.clone()))?;

        let hub_subscribers = Gauge::with_opts(Opts::new(
            "netmond_hub_subscribers",
            "Current number of live subscribers",
        ))?;
        registry.register(Box::new(hub_subscribers.clone()))?;

        let health_status = Gauge::with_opts(Opts::new(
            "netmond_health_status",
            "Service health status (1.0=healthy, 0.5=degraded, 0.0=unhealthy)",
        ))?;
        registry.register(Box::new(health_status.clone()))?;

        let poll_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "netmond_poll_duration_seconds",
                "Wall time of one poll cycle in seconds",
            )
            .buckets(vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]),
        )?;
        registry.register(Box::new(poll_duration_seconds.clone()))?;

        Ok(Self {
            polls_total,
            poll_failures_total,
            alerts_opened_total,
            alerts_escalated_total,
            alerts_resolved_total,
            store_errors_total,
            hub_dropped_subscribers_total,
            polls_in_flight,
            devices,
            hub_subscribers,
            health_status,
            poll_duration_seconds,
            registry: Arc::new(registry),
        })
    }

    /// Record a finished poll cycle.
    pub fn record_poll(&self, duration_secs: f64) {
        self.polls_total.inc();
        self.poll_duration_seconds.observe(duration_secs);
    }

    /// Record a failed poll cycle by error kind.
    pub fn record_poll_failure(&self, kind: &str) {
        self.poll_failures_total.with_label_values(&[kind]).inc();
    }

    /// Record an alert transition.
    pub fn record_alert(&self, kind: AlertEventKind) {
        match kind {
            AlertEventKind::Opened => self.alerts_opened_total.inc(),
            AlertEventKind::Escalated => self.alerts_escalated_total.inc(),
            AlertEventKind::Resolved => self.alerts_resolved_total.inc(),
        }
    }

    /// Record a store write failure.
    pub fn record_store_error(&self) {
        self.store_errors_total.inc();
    }

    /// Record subscribers removed by the hub.
    pub fn record_dropped_subscribers(&self, count: usize) {
        self.hub_dropped_subscribers_total.inc_by(count as f64);
    }

    pub fn set_polls_in_flight(&self, count: usize) {
        self.polls_in_flight.set(count as f64);
    }

    pub fn set_devices(&self, count: usize) {
        self.devices.set(count as f64);
    }

    pub fn set_hub_subscribers(&self, count: usize) {
        self.hub_subscribers.set(count as f64);
    }

    /// Update health status
    pub fn set_health_status(&self, status: HealthStatus) {
        let value = match status {
            HealthStatus::Healthy => 1.0,
            HealthStatus::Degraded => 0.5,
            HealthStatus::Unhealthy => 0.0,
        };
        self.health_status.set(value);
    }
}

/// Health status for the service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    /// Service is fully operational
    Healthy,
    /// Polling works but persistence is failing
    Degraded,
    /// Service is not operational
    Unhealthy,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }
}
