//! Health monitoring for netmond.
//!
//! Storage outcomes drive the Healthy/Degraded split; a scheduler that has
//! not finished any poll cycle for too long is Unhealthy.

use parking_lot::Mutex;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::metrics::{HealthStatus, MetricsCollector};

/// Default maximum time without a finished poll cycle
const DEFAULT_MAX_STALL_DURATION: Duration = Duration::from_secs(600);

/// Default maximum storage failure rate before marking as degraded (5%)
const DEFAULT_MAX_FAILURE_RATE: f64 = 0.05;

#[derive(Debug)]
struct HealthState {
    last_cycle_time: Instant,
    total_writes: u64,
    failed_writes: u64,
    current_status: HealthStatus,
}

/// Health monitor shared by the store writer and the poll scheduler.
pub struct HealthMonitor {
    metrics: Option<MetricsCollector>,
    max_stall_duration: Duration,
    max_failure_rate: f64,
    state: Mutex<HealthState>,
}

impl HealthMonitor {
    /// Create a new health monitor
    pub fn new(metrics: Option<MetricsCollector>) -> Self {
        Self::with_config(metrics, DEFAULT_MAX_STALL_DURATION, DEFAULT_MAX_FAILURE_RATE)
    }

    /// Create a new health monitor with custom thresholds
    pub fn with_config(
        metrics: Option<MetricsCollector>,
        max_stall_duration: Duration,
        max_failure_rate: f64,
    ) -> Self {
        let status = HealthStatus::Healthy;
        if let Some(m) = &metrics {
            m.set_health_status(status);
        }
        Self {
            metrics,
            max_stall_duration,
            max_failure_rate,
            state: Mutex::new(HealthState {
                last_cycle_time: Instant::now(),
                total_writes: 0,
                failed_writes: 0,
                current_status: status,
            }),
        }
    }

    /// Record a finished poll cycle, successful or not.
    pub fn record_cycle(&self) {
        let mut state = self.state.lock();
        state.last_cycle_time = Instant::now();
        self.update_health(&mut state);
    }

    /// Record a successful store write
    pub fn record_write_success(&self) {
        let mut state = self.state.lock();
        state.total_writes += 1;
        self.update_health(&mut state);
    }

    /// Record a failed store write
    pub fn record_write_failure(&self) {
        let mut state = self.state.lock();
        state.total_writes += 1;
        state.failed_writes += 1;
        self.update_health(&mut state);
    }

    /// Current health status, re-evaluated for stalls.
    pub fn status(&self) -> HealthStatus {
        let mut state = self.state.lock();
        self.update_health(&mut state);
        state.current_status
    }

    /// Storage failure rate
    pub fn failure_rate(&self) -> f64 {
        let state = self.state.lock();
        rate(&state)
    }

    /// Time since the last finished poll cycle
    pub fn time_since_last_cycle(&self) -> Duration {
        self.state.lock().last_cycle_time.elapsed()
    }

    fn update_health(&self, state: &mut HealthState) {
        let new_status = self.calculate_health(state);
        if new_status != state.current_status {
            info!(
                old_status = ?state.current_status,
                new_status = ?new_status,
                "Health status changed"
            );
            state.current_status = new_status;
            if let Some(m) = &self.metrics {
                m.set_health_status(new_status);
            }
        }
    }

    fn calculate_health(&self, state: &HealthState) -> HealthStatus {
        let elapsed = state.last_cycle_time.elapsed();
        if elapsed > self.max_stall_duration {
            warn!(
                elapsed_secs = elapsed.as_secs(),
                max_stall_secs = self.max_stall_duration.as_secs(),
                "No poll cycle finished recently"
            );
            return HealthStatus::Unhealthy;
        }

        let failure_rate = rate(state);
        if failure_rate > self.max_failure_rate {
            return HealthStatus::Degraded;
        }

        HealthStatus::Healthy
    }
}

fn rate(state: &HealthState) -> f64 {
    if state.total_writes > 0 {
        state.failed_writes as f64 / state.total_writes as f64
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_monitor_creation() {
        let metrics = MetricsCollector::new().unwrap();
        let monitor = HealthMonitor::new(Some(metrics.clone()));
        assert_eq!(monitor.status(), HealthStatus::Healthy);
        assert_eq!(monitor.failure_rate(), 0.0);
        assert_eq!(metrics.health_status.get(), 1.0);
    }

    #[test]
    fn test_failure_rate_threshold() {
        let metrics = MetricsCollector::new().unwrap();
        let monitor = HealthMonitor::new(Some(metrics.clone()));

        for _ in 0..95 {
            monitor.record_write_success();
        }
        for _ in 0..5 {
            monitor.record_write_failure();
        }
        // At exactly 5%, should still be healthy (> threshold triggers)
        assert_eq!(monitor.status(), HealthStatus::Healthy);

        monitor.record_write_failure();
        assert_eq!(monitor.status(), HealthStatus::Degraded);
        assert_eq!(metrics.health_status.get(), 0.5);
    }

    #[test]
    fn test_stall_is_unhealthy() {
        let monitor = HealthMonitor::with_config(None, Duration::from_millis(0), 0.05);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(monitor.status(), HealthStatus::Unhealthy);
    }

    #[test]
    fn test_record_cycle_keeps_healthy() {
        let monitor = HealthMonitor::with_config(None, Duration::from_secs(60), 0.05);
        monitor.record_cycle();
        assert_eq!(monitor.status(), HealthStatus::Healthy);
        assert!(monitor.time_since_last_cycle() < Duration::from_secs(60));
    }
}
