//! Configuration file support for netmond
//!
//! Loads and validates the daemon configuration from a TOML file.
//! Default location: /etc/netmond/netmond.toml

use netmon_common::{
    CommandSet, CommandSetTable, Device, MonitorError, MonitorResult, SshOptions,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::alerting::{AlertPolicy, DEFAULT_WAN_PATTERNS};
use crate::extractor::{Dialect, Extractor};
use crate::health_monitor::HealthMonitor;
use crate::metrics::MetricsCollector;
use crate::registry::{CredentialEntry, StaticCredentialResolver};
use crate::scheduler::SchedulerSettings;

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "/etc/netmond/netmond.toml";

/// Polling configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Interval for devices without their own, in seconds
    #[serde(default = "default_interval")]
    pub default_interval_secs: u64,

    /// Upper bound on simultaneous poll cycles
    #[serde(default = "default_max_concurrent_polls")]
    pub max_concurrent_polls: usize,

    /// Hard timeout per command exchange, in seconds
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,

    /// Consecutive failed cycles before a device is unreachable
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Device registry re-read interval, in seconds
    #[serde(default = "default_registry_refresh")]
    pub registry_refresh_secs: u64,

    /// Drop stored history of devices that leave the registry
    #[serde(default = "default_true")]
    pub purge_on_removal: bool,
}

/// Alert evaluation configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertsConfig {
    #[serde(default = "default_cpu_threshold")]
    pub cpu_threshold_percent: f64,

    #[serde(default = "default_memory_threshold")]
    pub memory_threshold_percent: f64,

    /// Breaching cycles before a resource warning becomes critical (0 = never)
    #[serde(default = "default_escalation_cycles")]
    pub escalation_cycles: u32,

    #[serde(default)]
    pub resolve_on_disappearance: bool,

    /// Interface name substrings marking WAN links
    #[serde(default = "default_wan_patterns")]
    pub wan_patterns: Vec<String>,
}

/// Fan-out hub configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubConfig {
    #[serde(default = "default_subscriber_queue_size")]
    pub subscriber_queue_size: usize,
}

/// Store backend selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Jsonl,
}

/// Persistent store configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_backend")]
    pub backend: StoreBackend,

    /// Directory for the jsonl backend
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Alerts kept per device by the memory backend
    #[serde(default = "default_alert_history")]
    pub alert_history: usize,

    /// Metric points kept per device by the memory backend
    #[serde(default = "default_metric_history")]
    pub metric_history: usize,
}

/// Remote-shell transport configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(default = "default_ssh_binary")]
    pub ssh_binary: String,

    #[serde(default = "default_sshpass_binary")]
    pub sshpass_binary: String,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Value for the client's StrictHostKeyChecking option
    #[serde(default = "default_host_key_checking")]
    pub host_key_checking: String,
}

/// Self-metrics endpoint configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_metrics_listen")]
    pub listen: String,
}

/// Health check configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Seconds without a finished poll cycle before unhealthy
    #[serde(default = "default_max_stall_secs")]
    pub max_stall_secs: u64,

    /// Storage failure rate (percentage) before degraded
    #[serde(default = "default_max_failure_rate")]
    pub max_failure_rate_percent: f64,
}

/// Command set override for one platform tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformConfig {
    /// Parser family; defaults to the platform tag itself
    #[serde(default)]
    pub dialect: Option<String>,

    pub commands: CommandSet,
}

/// Complete netmond configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetmonConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub alerts: AlertsConfig,

    #[serde(default)]
    pub hub: HubConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub transport: TransportConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,

    #[serde(default)]
    pub health: HealthConfig,

    #[serde(default)]
    pub platforms: BTreeMap<String, PlatformConfig>,

    #[serde(default)]
    pub credentials: Vec<CredentialEntry>,

    /// TOML device file re-read on every registry refresh
    #[serde(default)]
    pub devices_file: Option<PathBuf>,

    /// Devices declared inline, used when no devices_file is set
    #[serde(default)]
    pub devices: Vec<Device>,
}

// Default functions
fn default_interval() -> u64 {
    60
}

fn default_max_concurrent_polls() -> usize {
    16
}

fn default_command_timeout() -> u64 {
    30
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_registry_refresh() -> u64 {
    5
}

fn default_true() -> bool {
    true
}

fn default_cpu_threshold() -> f64 {
    85.0
}

fn default_memory_threshold() -> f64 {
    90.0
}

fn default_escalation_cycles() -> u32 {
    3
}

fn default_wan_patterns() -> Vec<String> {
    DEFAULT_WAN_PATTERNS.iter().map(|s| s.to_string()).collect()
}

fn default_subscriber_queue_size() -> usize {
    crate::hub::DEFAULT_SUBSCRIBER_QUEUE_SIZE
}

fn default_store_backend() -> StoreBackend {
    StoreBackend::Memory
}

fn default_alert_history() -> usize {
    crate::store::DEFAULT_ALERT_HISTORY
}

fn default_metric_history() -> usize {
    crate::store::DEFAULT_METRIC_HISTORY
}

fn default_ssh_binary() -> String {
    "ssh".to_string()
}

fn default_sshpass_binary() -> String {
    "sshpass".to_string()
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_host_key_checking() -> String {
    "accept-new".to_string()
}

fn default_metrics_listen() -> String {
    "[::1]:9464".to_string()
}

fn default_max_stall_secs() -> u64 {
    600
}

fn default_max_failure_rate() -> f64 {
    5.0
}

// Default implementations
impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_interval_secs: default_interval(),
            max_concurrent_polls: default_max_concurrent_polls(),
            command_timeout_secs: default_command_timeout(),
            failure_threshold: default_failure_threshold(),
            registry_refresh_secs: default_registry_refresh(),
            purge_on_removal: default_true(),
        }
    }
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            cpu_threshold_percent: default_cpu_threshold(),
            memory_threshold_percent: default_memory_threshold(),
            escalation_cycles: default_escalation_cycles(),
            resolve_on_disappearance: false,
            wan_patterns: default_wan_patterns(),
        }
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            subscriber_queue_size: default_subscriber_queue_size(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            path: None,
            alert_history: default_alert_history(),
            metric_history: default_metric_history(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            ssh_binary: default_ssh_binary(),
            sshpass_binary: default_sshpass_binary(),
            connect_timeout_secs: default_connect_timeout(),
            host_key_checking: default_host_key_checking(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            listen: default_metrics_listen(),
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            max_stall_secs: default_max_stall_secs(),
            max_failure_rate_percent: default_max_failure_rate(),
        }
    }
}

impl NetmonConfig {
    /// Parses a configuration body.
    pub fn from_toml_str(content: &str) -> MonitorResult<Self> {
        toml::from_str(content).map_err(|e| MonitorError::config("config", e.to_string()))
    }

    /// Loads and validates a configuration file.
    pub fn load(path: impl AsRef<Path>) -> MonitorResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            MonitorError::config("config", format!("{}: {}", path.display(), e))
        })?;
        let config = Self::from_toml_str(&content).map_err(|e| match e {
            MonitorError::Config { field, message } => {
                MonitorError::config(field, format!("{}: {}", path.display(), message))
            }
            other => other,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a configuration file, falling back to defaults if it is missing.
    pub fn load_or_default(path: impl AsRef<Path>) -> MonitorResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            warn!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }
        Self::load(path)
    }

    /// Validate configuration
    pub fn validate(&self) -> MonitorResult<()> {
        let s = &self.scheduler;
        if s.default_interval_secs == 0 {
            return Err(MonitorError::config(
                "scheduler.default_interval_secs",
                "must be > 0",
            ));
        }
        if s.max_concurrent_polls == 0 {
            return Err(MonitorError::config(
                "scheduler.max_concurrent_polls",
                "must be > 0",
            ));
        }
        if s.command_timeout_secs == 0 {
            return Err(MonitorError::config(
                "scheduler.command_timeout_secs",
                "must be > 0",
            ));
        }
        if s.failure_threshold == 0 {
            return Err(MonitorError::config(
                "scheduler.failure_threshold",
                "must be > 0",
            ));
        }
        if s.registry_refresh_secs == 0 {
            return Err(MonitorError::config(
                "scheduler.registry_refresh_secs",
                "must be > 0",
            ));
        }

        for (field, value) in [
            ("alerts.cpu_threshold_percent", self.alerts.cpu_threshold_percent),
            ("alerts.memory_threshold_percent", self.alerts.memory_threshold_percent),
            ("health.max_failure_rate_percent", self.health.max_failure_rate_percent),
        ] {
            if !(0.0..=100.0).contains(&value) {
                return Err(MonitorError::config(field, "must be 0-100"));
            }
        }

        if self.hub.subscriber_queue_size == 0 {
            return Err(MonitorError::config(
                "hub.subscriber_queue_size",
                "must be > 0",
            ));
        }

        if self.store.alert_history == 0 || self.store.metric_history == 0 {
            return Err(MonitorError::config(
                "store",
                "alert_history and metric_history must be > 0",
            ));
        }

        if self.store.backend == StoreBackend::Jsonl && self.store.path.is_none() {
            return Err(MonitorError::config(
                "store.path",
                "required for the jsonl backend",
            ));
        }

        if self.metrics.enabled {
            self.metrics_addr()?;
        }

        for (tag, platform) in &self.platforms {
            let dialect = platform.dialect.as_deref().unwrap_or(tag);
            if Dialect::from_name(dialect).is_none() {
                return Err(MonitorError::config(
                    format!("platforms.{}.dialect", tag),
                    format!("unknown dialect '{}'", dialect),
                ));
            }
            if platform.commands.is_empty() {
                return Err(MonitorError::config(
                    format!("platforms.{}.commands", tag),
                    "must not be empty",
                ));
            }
        }

        let mut refs = HashSet::new();
        for entry in &self.credentials {
            if !refs.insert(entry.reference.as_str()) {
                return Err(MonitorError::config(
                    "credentials",
                    format!("duplicate reference '{}'", entry.reference),
                ));
            }
        }

        let mut ids = HashSet::new();
        for device in &self.devices {
            if !ids.insert(device.id) {
                return Err(MonitorError::config(
                    "devices",
                    format!("duplicate device id {}", device.id),
                ));
            }
            device.validate()?;
        }

        Ok(())
    }

    /// Scheduler timing and limits
    pub fn scheduler_settings(&self) -> SchedulerSettings {
        SchedulerSettings {
            default_interval: Duration::from_secs(self.scheduler.default_interval_secs),
            max_concurrent_polls: self.scheduler.max_concurrent_polls,
            failure_threshold: self.scheduler.failure_threshold,
            registry_refresh: Duration::from_secs(self.scheduler.registry_refresh_secs),
            purge_on_removal: self.scheduler.purge_on_removal,
        }
    }

    /// Per-command timeout as Duration
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.scheduler.command_timeout_secs)
    }

    pub fn alert_policy(&self) -> AlertPolicy {
        AlertPolicy {
            cpu_threshold_percent: self.alerts.cpu_threshold_percent,
            memory_threshold_percent: self.alerts.memory_threshold_percent,
            escalation_cycles: self.alerts.escalation_cycles,
            resolve_on_disappearance: self.alerts.resolve_on_disappearance,
            wan_patterns: self.alerts.wan_patterns.clone(),
        }
    }

    pub fn ssh_options(&self) -> SshOptions {
        SshOptions {
            ssh_binary: self.transport.ssh_binary.clone(),
            sshpass_binary: self.transport.sshpass_binary.clone(),
            connect_timeout: Duration::from_secs(self.transport.connect_timeout_secs),
            host_key_checking: self.transport.host_key_checking.clone(),
        }
    }

    /// Built-in command sets with the configured platforms layered on top.
    pub fn command_table(&self) -> CommandSetTable {
        let mut table = CommandSetTable::default();
        for (tag, platform) in &self.platforms {
            table.insert(tag.clone(), platform.commands.clone());
        }
        table
    }

    /// Extractor that knows every configured platform tag.
    pub fn extractor(&self) -> MonitorResult<Extractor> {
        let mut extractor = Extractor::default();
        for (tag, platform) in &self.platforms {
            let name = platform.dialect.as_deref().unwrap_or(tag);
            let dialect = Dialect::from_name(name).ok_or_else(|| {
                MonitorError::config(
                    format!("platforms.{}.dialect", tag),
                    format!("unknown dialect '{}'", name),
                )
            })?;
            extractor.register_platform(tag.clone(), dialect);
        }
        Ok(extractor)
    }

    pub fn credential_resolver(&self) -> StaticCredentialResolver {
        StaticCredentialResolver::new(self.credentials.iter().cloned())
    }

    pub fn health_monitor(&self, metrics: Option<MetricsCollector>) -> HealthMonitor {
        HealthMonitor::with_config(
            metrics,
            Duration::from_secs(self.health.max_stall_secs),
            self.health.max_failure_rate_percent / 100.0,
        )
    }

    /// Parsed metrics listen address
    pub fn metrics_addr(&self) -> MonitorResult<SocketAddr> {
        self.metrics.listen.parse().map_err(|e| {
            MonitorError::config(
                "metrics.listen",
                format!("invalid address '{}': {}", self.metrics.listen, e),
            )
        })
    }
}
