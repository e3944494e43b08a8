//! Core types for device monitoring: snapshots, alerts, metric points and
//! the per-device status summary.

use chrono::{DateTime, Utc};
use netmon_common::{AccountId, DeviceId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Administrative or operational status of a link-like entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkStatus {
    Up,
    Down,
}

impl LinkStatus {
    #[inline]
    pub fn is_up(&self) -> bool {
        matches!(self, LinkStatus::Up)
    }
}

impl fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkStatus::Up => write!(f, "up"),
            LinkStatus::Down => write!(f, "down"),
        }
    }
}

/// Interface state as reported by the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceState {
    pub name: String,
    pub admin_status: LinkStatus,
    pub oper_status: LinkStatus,
    pub in_octets: u64,
    pub out_octets: u64,
}

impl InterfaceState {
    /// An interface is failed when it is administratively enabled but the
    /// line protocol is down. Admin-down interfaces are never failed.
    pub fn is_failed(&self) -> bool {
        self.admin_status.is_up() && !self.oper_status.is_up()
    }
}

/// BGP session state name for a healthy session.
pub const BGP_ESTABLISHED: &str = "Established";

/// One BGP neighbor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BgpNeighbor {
    pub peer_address: String,
    pub as_number: u32,
    /// `Established` or the FSM state name (`Idle`, `Active`, `Idle (Admin)`, ...).
    pub session_state: String,
    /// Time in the current state, in seconds. `None` for "never".
    pub uptime_secs: Option<u64>,
    /// Prefixes received; only known for established sessions.
    pub prefixes_received: Option<u64>,
}

impl BgpNeighbor {
    pub fn is_established(&self) -> bool {
        self.session_state == BGP_ESTABLISHED
    }
}

/// One OSPF neighbor adjacency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OspfNeighbor {
    pub peer_address: String,
    pub neighbor_id: String,
    /// Adjacency state without the DR/BDR role (`FULL`, `2WAY`, `INIT`, ...).
    pub state: String,
    /// DR election role, if the device reports one.
    pub role: Option<String>,
    /// Area, when a detail listing was available.
    pub area: Option<String>,
    pub interface: String,
}

impl OspfNeighbor {
    /// `FULL` and `2WAY` are both stable adjacency states.
    pub fn is_healthy(&self) -> bool {
        let state = self.state.to_ascii_uppercase();
        state == "FULL" || state == "2WAY"
    }
}

/// Kind of layer-2 service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum L2Kind {
    Vlan,
    Trunk,
}

/// A VLAN or trunk port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct L2Service {
    pub kind: L2Kind,
    /// VLAN number as text, or trunk port name.
    pub name: String,
    pub state: LinkStatus,
}

impl L2Service {
    /// Stable subject key: `vlan<N>` or `trunk:<port>`.
    pub fn key(&self) -> String {
        match self.kind {
            L2Kind::Vlan => format!("vlan{}", self.name),
            L2Kind::Trunk => format!("trunk:{}", self.name),
        }
    }
}

/// CPU and memory utilization, percentages in 0..=100.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub cpu_percent: Option<f64>,
    pub memory_percent: Option<f64>,
}

/// Point-in-time operational state of one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub taken_at: DateTime<Utc>,
    pub interfaces: BTreeMap<String, InterfaceState>,
    pub bgp_neighbors: BTreeMap<String, BgpNeighbor>,
    pub ospf_neighbors: BTreeMap<String, OspfNeighbor>,
    pub l2_services: BTreeMap<String, L2Service>,
    pub resources: ResourceUsage,
}

impl Snapshot {
    /// Creates an empty snapshot.
    pub fn new(taken_at: DateTime<Utc>) -> Self {
        Self {
            taken_at,
            interfaces: BTreeMap::new(),
            bgp_neighbors: BTreeMap::new(),
            ospf_neighbors: BTreeMap::new(),
            l2_services: BTreeMap::new(),
            resources: ResourceUsage::default(),
        }
    }

    pub fn with_interface(mut self, iface: InterfaceState) -> Self {
        self.interfaces.insert(iface.name.clone(), iface);
        self
    }

    pub fn with_bgp_neighbor(mut self, neighbor: BgpNeighbor) -> Self {
        self.bgp_neighbors
            .insert(neighbor.peer_address.clone(), neighbor);
        self
    }

    pub fn with_ospf_neighbor(mut self, neighbor: OspfNeighbor) -> Self {
        self.ospf_neighbors
            .insert(neighbor.peer_address.clone(), neighbor);
        self
    }

    pub fn with_l2_service(mut self, service: L2Service) -> Self {
        self.l2_services.insert(service.key(), service);
        self
    }

    pub fn with_resources(mut self, cpu: Option<f64>, memory: Option<f64>) -> Self {
        self.resources = ResourceUsage {
            cpu_percent: cpu,
            memory_percent: memory,
        };
        self
    }

    /// Counts interfaces that are administratively enabled, split by
    /// operational status.
    pub fn interface_counts(&self) -> (usize, usize) {
        let enabled = self.interfaces.values().filter(|i| i.admin_status.is_up());
        let up = enabled.clone().filter(|i| i.oper_status.is_up()).count();
        (up, enabled.count() - up)
    }

    pub fn bgp_counts(&self) -> (usize, usize) {
        let up = self
            .bgp_neighbors
            .values()
            .filter(|n| n.is_established())
            .count();
        (up, self.bgp_neighbors.len() - up)
    }

    pub fn ospf_counts(&self) -> (usize, usize) {
        let up = self
            .ospf_neighbors
            .values()
            .filter(|n| n.is_healthy())
            .count();
        (up, self.ospf_neighbors.len() - up)
    }
}

/// Alert severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    /// Informational
    Info,
    /// Degraded but not service-affecting
    Warning,
    /// Immediate action required
    Critical,
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertSeverity::Info => write!(f, "info"),
            AlertSeverity::Warning => write!(f, "warning"),
            AlertSeverity::Critical => write!(f, "critical"),
        }
    }
}

/// Which kind of entity an alert is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertCategory {
    Interface,
    Bgp,
    Ospf,
    L2,
    Resource,
}

impl fmt::Display for AlertCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AlertCategory::Interface => "interface",
            AlertCategory::Bgp => "bgp",
            AlertCategory::Ospf => "ospf",
            AlertCategory::L2 => "l2",
            AlertCategory::Resource => "resource",
        };
        f.write_str(s)
    }
}

/// Deduplication key of an alert within one device.
pub type AlertKey = (AlertCategory, String);

/// A raised alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub device_id: DeviceId,
    pub account_id: AccountId,
    pub category: AlertCategory,
    pub severity: AlertSeverity,
    /// Interface name, peer address, L2 service key, or resource name.
    pub subject_key: String,
    pub opened_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub message: String,
}

impl Alert {
    pub fn is_open(&self) -> bool {
        self.resolved_at.is_none()
    }

    pub fn key(&self) -> AlertKey {
        (self.category, self.subject_key.clone())
    }
}

/// What happened to an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertEventKind {
    Opened,
    /// Severity raised on an already open alert.
    Escalated,
    Resolved,
}

impl fmt::Display for AlertEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertEventKind::Opened => write!(f, "opened"),
            AlertEventKind::Escalated => write!(f, "escalated"),
            AlertEventKind::Resolved => write!(f, "resolved"),
        }
    }
}

/// Alert transition emitted by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub kind: AlertEventKind,
    pub alert: Alert,
}

/// Metric names emitted every successful cycle.
pub mod metric_names {
    pub const CPU_PERCENT: &str = "cpu_percent";
    pub const MEMORY_PERCENT: &str = "memory_percent";
    pub const INTERFACES_UP: &str = "interfaces_up";
    pub const INTERFACES_DOWN: &str = "interfaces_down";
    pub const BGP_NEIGHBORS_UP: &str = "bgp_neighbors_up";
    pub const BGP_NEIGHBORS_DOWN: &str = "bgp_neighbors_down";
    pub const OSPF_NEIGHBORS_UP: &str = "ospf_neighbors_up";
    pub const OSPF_NEIGHBORS_DOWN: &str = "ospf_neighbors_down";

    /// `if_in_octets{<name>}`
    pub fn if_in_octets(name: &str) -> String {
        format!("if_in_octets{{{}}}", name)
    }

    /// `if_out_octets{<name>}`
    pub fn if_out_octets(name: &str) -> String {
        format!("if_out_octets{{{}}}", name)
    }
}

/// Immutable time-series sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    pub device_id: DeviceId,
    pub timestamp: DateTime<Utc>,
    pub metric: String,
    pub value: f64,
}

impl MetricPoint {
    pub fn new(device_id: DeviceId, timestamp: DateTime<Utc>, metric: impl Into<String>, value: f64) -> Self {
        Self {
            device_id,
            timestamp,
            metric: metric.into(),
            value,
        }
    }

    /// Derives the per-cycle metric points from a snapshot.
    pub fn from_snapshot(device_id: DeviceId, snapshot: &Snapshot) -> Vec<MetricPoint> {
        let ts = snapshot.taken_at;
        let mut points = Vec::with_capacity(8 + 2 * snapshot.interfaces.len());

        if let Some(cpu) = snapshot.resources.cpu_percent {
            points.push(Self::new(device_id, ts, metric_names::CPU_PERCENT, cpu));
        }
        if let Some(mem) = snapshot.resources.memory_percent {
            points.push(Self::new(device_id, ts, metric_names::MEMORY_PERCENT, mem));
        }

        let counts = [
            (metric_names::INTERFACES_UP, metric_names::INTERFACES_DOWN, snapshot.interface_counts()),
            (metric_names::BGP_NEIGHBORS_UP, metric_names::BGP_NEIGHBORS_DOWN, snapshot.bgp_counts()),
            (metric_names::OSPF_NEIGHBORS_UP, metric_names::OSPF_NEIGHBORS_DOWN, snapshot.ospf_counts()),
        ];
        for (up_name, down_name, (up, down)) in counts {
            points.push(Self::new(device_id, ts, up_name, up as f64));
            points.push(Self::new(device_id, ts, down_name, down as f64));
        }

        for iface in snapshot.interfaces.values() {
            points.push(Self::new(
                device_id,
                ts,
                metric_names::if_in_octets(&iface.name),
                iface.in_octets as f64,
            ));
            points.push(Self::new(
                device_id,
                ts,
                metric_names::if_out_octets(&iface.name),
                iface.out_octets as f64,
            ));
        }

        points
    }
}

/// Reachability of a device as seen by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reachability {
    /// Not polled yet.
    Unknown,
    Online,
    /// Failure threshold reached.
    Offline,
}

/// Pull-side summary of one device, kept current by its polling task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub device_id: DeviceId,
    pub account_id: AccountId,
    pub name: String,
    pub reachability: Reachability,
    pub last_attempt: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    /// The last attempt failed; any snapshot is from an earlier cycle.
    pub stale: bool,
    pub last_error: Option<String>,
    pub snapshot: Option<Snapshot>,
    pub open_alerts: Vec<Alert>,
}

impl DeviceStatus {
    pub fn new(device_id: DeviceId, account_id: AccountId, name: impl Into<String>) -> Self {
        Self {
            device_id,
            account_id,
            name: name.into(),
            reachability: Reachability::Unknown,
            last_attempt: None,
            last_success: None,
            consecutive_failures: 0,
            stale: false,
            last_error: None,
            snapshot: None,
            open_alerts: Vec::new(),
        }
    }
}
