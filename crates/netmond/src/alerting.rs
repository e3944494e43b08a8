//! State diff and alert engine.
//!
//! One [`AlertEngine`] exists per device and is owned by that device's
//! polling task, so engines never contend with each other. Evaluation is
//! level-triggered per sub-entity: a failed entity without an open alert
//! opens one, a healthy entity with an open alert resolves it, and anything
//! else is silent. Alerts are keyed by `(category, subject)`, which is what
//! makes re-applying the same snapshot a no-op.

use chrono::{DateTime, Utc};
use netmon_common::{AccountId, Device, DeviceId};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::types::{
    Alert, AlertCategory, AlertEvent, AlertEventKind, AlertKey, AlertSeverity, Snapshot,
};

/// Subject key of the synthetic reachability alert.
pub const REACHABILITY_SUBJECT: &str = "reachability";

/// Subject keys of the resource threshold alerts.
pub const CPU_SUBJECT: &str = "cpu";
pub const MEMORY_SUBJECT: &str = "memory";

/// Interface name fragments that mark a WAN link when the device does not
/// list its WAN interfaces explicitly.
pub const DEFAULT_WAN_PATTERNS: &[&str] =
    &["Serial", "GigabitEthernet0/0", "Tunnel", "Dialer", "WAN"];

/// Thresholds and switches that shape alert evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertPolicy {
    /// CPU percentage above which a warning opens.
    pub cpu_threshold_percent: f64,
    /// Memory percentage above which a warning opens.
    pub memory_threshold_percent: f64,
    /// Consecutive breaching cycles after which a resource warning becomes
    /// critical. Zero disables escalation.
    pub escalation_cycles: u32,
    /// Resolve open alerts whose entity vanished from the snapshot.
    pub resolve_on_disappearance: bool,
    /// Substrings identifying WAN interfaces.
    pub wan_patterns: Vec<String>,
}

impl Default for AlertPolicy {
    fn default() -> Self {
        Self {
            cpu_threshold_percent: 85.0,
            memory_threshold_percent: 90.0,
            escalation_cycles: 3,
            resolve_on_disappearance: false,
            wan_patterns: DEFAULT_WAN_PATTERNS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone)]
struct OpenAlert {
    alert: Alert,
    /// Consecutive cycles the condition has been observed, including the
    /// cycle that opened the alert.
    breach_cycles: u32,
}

/// What one evaluated sub-entity looks like this cycle.
struct Observation {
    key: AlertKey,
    failed: bool,
    severity: AlertSeverity,
    message: String,
    escalates: bool,
}

/// Per-device alert state machine.
#[derive(Debug)]
pub struct AlertEngine {
    device_id: DeviceId,
    account_id: AccountId,
    device_name: String,
    wan_interfaces: Vec<String>,
    policy: Arc<AlertPolicy>,
    last: Option<Snapshot>,
    open: BTreeMap<AlertKey, OpenAlert>,
}

impl AlertEngine {
    /// Creates an engine with no snapshot and no open alerts.
    pub fn new(device: &Device, policy: Arc<AlertPolicy>) -> Self {
        Self {
            device_id: device.id,
            account_id: device.account_id,
            device_name: device.name.clone(),
            wan_interfaces: device.wan_interfaces.clone(),
            policy,
            last: None,
            open: BTreeMap::new(),
        }
    }

    /// Picks up a changed device definition while keeping snapshot and
    /// alert state.
    pub fn update_device(&mut self, device: &Device) {
        self.account_id = device.account_id;
        self.device_name = device.name.clone();
        self.wan_interfaces = device.wan_interfaces.clone();
    }

    /// The last applied snapshot.
    pub fn snapshot(&self) -> Option<&Snapshot> {
        self.last.as_ref()
    }

    /// Currently open alerts, ordered by key.
    pub fn open_alerts(&self) -> Vec<Alert> {
        self.open.values().map(|o| o.alert.clone()).collect()
    }

    /// Number of open alerts.
    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    /// Returns the open alert for a key, if any.
    pub fn open_alert(&self, category: AlertCategory, subject: &str) -> Option<&Alert> {
        self.open
            .get(&(category, subject.to_string()))
            .map(|o| &o.alert)
    }

    /// Returns true if `name` is a WAN interface of this device.
    pub fn is_wan(&self, name: &str) -> bool {
        if !self.wan_interfaces.is_empty() {
            return self.wan_interfaces.iter().any(|w| w == name);
        }
        self.policy
            .wan_patterns
            .iter()
            .any(|p| name.contains(p.as_str()))
    }

    /// Diffs `snapshot` against the open-alert state, installs it as the
    /// device's live snapshot and returns the resulting transitions.
    pub fn apply(&mut self, snapshot: Snapshot, now: DateTime<Utc>) -> Vec<AlertEvent> {
        let observations = self.observe(&snapshot);
        let present: BTreeSet<AlertKey> = observations.iter().map(|o| o.key.clone()).collect();

        let mut events = Vec::new();
        for obs in observations {
            if let Some(event) = self.evaluate(obs, now) {
                events.push(event);
            }
        }

        if self.policy.resolve_on_disappearance {
            let vanished: Vec<AlertKey> = self
                .open
                .keys()
                .filter(|k| is_entity_category(k.0) && !present.contains(*k))
                .cloned()
                .collect();
            for key in vanished {
                if let Some(event) = self.resolve(&key, now) {
                    events.push(event);
                }
            }
        }

        self.last = Some(snapshot);
        events
    }

    /// Opens the critical reachability alert after `failures` consecutive
    /// failed cycles. Idempotent while the alert stays open.
    pub fn mark_unreachable(&mut self, now: DateTime<Utc>, failures: u32) -> Option<AlertEvent> {
        let key = (AlertCategory::Resource, REACHABILITY_SUBJECT.to_string());
        if let Some(open) = self.open.get_mut(&key) {
            open.breach_cycles = failures;
            return None;
        }
        let message = format!(
            "router_offline: {} unreachable after {} consecutive failed polls",
            self.device_name, failures
        );
        Some(self.open_new(key, AlertSeverity::Critical, message, now, failures))
    }

    /// Resolves the reachability alert if it is open.
    pub fn mark_reachable(&mut self, now: DateTime<Utc>) -> Option<AlertEvent> {
        self.resolve(
            &(AlertCategory::Resource, REACHABILITY_SUBJECT.to_string()),
            now,
        )
    }

    fn observe(&self, snapshot: &Snapshot) -> Vec<Observation> {
        let mut out = Vec::new();

        for iface in snapshot.interfaces.values() {
            let wan = self.is_wan(&iface.name);
            out.push(Observation {
                key: (AlertCategory::Interface, iface.name.clone()),
                failed: iface.is_failed(),
                severity: if wan {
                    AlertSeverity::Critical
                } else {
                    AlertSeverity::Warning
                },
                message: format!(
                    "interface_down: {}{} is {}/{} on {}",
                    if wan { "WAN link " } else { "" },
                    iface.name,
                    iface.admin_status,
                    iface.oper_status,
                    self.device_name
                ),
                escalates: false,
            });
        }

        for n in snapshot.bgp_neighbors.values() {
            out.push(Observation {
                key: (AlertCategory::Bgp, n.peer_address.clone()),
                failed: !n.is_established(),
                severity: AlertSeverity::Critical,
                message: format!(
                    "bgp_down: neighbor {} (AS {}) is {} on {}",
                    n.peer_address, n.as_number, n.session_state, self.device_name
                ),
                escalates: false,
            });
        }

        for n in snapshot.ospf_neighbors.values() {
            out.push(Observation {
                key: (AlertCategory::Ospf, n.peer_address.clone()),
                failed: !n.is_healthy(),
                severity: AlertSeverity::Critical,
                message: format!(
                    "ospf_down: neighbor {} ({}) via {} is {} on {}",
                    n.peer_address, n.neighbor_id, n.interface, n.state, self.device_name
                ),
                escalates: false,
            });
        }

        for (key, svc) in &snapshot.l2_services {
            out.push(Observation {
                key: (AlertCategory::L2, key.clone()),
                failed: !svc.state.is_up(),
                severity: AlertSeverity::Warning,
                message: format!("l2_down: {} is {} on {}", key, svc.state, self.device_name),
                escalates: false,
            });
        }

        let resources = [
            (
                CPU_SUBJECT,
                "cpu_high",
                snapshot.resources.cpu_percent,
                self.policy.cpu_threshold_percent,
            ),
            (
                MEMORY_SUBJECT,
                "memory_high",
                snapshot.resources.memory_percent,
                self.policy.memory_threshold_percent,
            ),
        ];
        for (subject, vocabulary, value, threshold) in resources {
            let Some(value) = value else {
                continue;
            };
            out.push(Observation {
                key: (AlertCategory::Resource, subject.to_string()),
                failed: value > threshold,
                severity: AlertSeverity::Warning,
                message: format!(
                    "{}: {} at {:.1}% (threshold {:.1}%) on {}",
                    vocabulary, subject, value, threshold, self.device_name
                ),
                escalates: true,
            });
        }

        out
    }

    fn evaluate(&mut self, obs: Observation, now: DateTime<Utc>) -> Option<AlertEvent> {
        if !obs.failed {
            return self.resolve(&obs.key, now);
        }

        let escalation_cycles = self.policy.escalation_cycles;
        match self.open.get_mut(&obs.key) {
            None => Some(self.open_new(obs.key, obs.severity, obs.message, now, 1)),
            Some(open) => {
                open.breach_cycles = open.breach_cycles.saturating_add(1);
                let due = obs.escalates
                    && escalation_cycles > 0
                    && open.breach_cycles >= escalation_cycles
                    && open.alert.severity < AlertSeverity::Critical;
                if !due {
                    return None;
                }
                open.alert.severity = AlertSeverity::Critical;
                open.alert.message = obs.message;
                let event = AlertEvent {
                    kind: AlertEventKind::Escalated,
                    alert: open.alert.clone(),
                };
                log_event(&event);
                Some(event)
            }
        }
    }

    fn open_new(
        &mut self,
        key: AlertKey,
        severity: AlertSeverity,
        message: String,
        now: DateTime<Utc>,
        breach_cycles: u32,
    ) -> AlertEvent {
        let alert = Alert {
            id: Uuid::new_v4(),
            device_id: self.device_id,
            account_id: self.account_id,
            category: key.0,
            severity,
            subject_key: key.1.clone(),
            opened_at: now,
            resolved_at: None,
            message,
        };
        self.open.insert(
            key,
            OpenAlert {
                alert: alert.clone(),
                breach_cycles,
            },
        );
        let event = AlertEvent {
            kind: AlertEventKind::Opened,
            alert,
        };
        log_event(&event);
        event
    }

    fn resolve(&mut self, key: &AlertKey, now: DateTime<Utc>) -> Option<AlertEvent> {
        let mut open = self.open.remove(key)?;
        open.alert.resolved_at = Some(now);
        let event = AlertEvent {
            kind: AlertEventKind::Resolved,
            alert: open.alert,
        };
        log_event(&event);
        Some(event)
    }
}

/// Categories whose subjects come and go with the snapshot contents.
fn is_entity_category(category: AlertCategory) -> bool {
    !matches!(category, AlertCategory::Resource)
}

fn log_event(event: &AlertEvent) {
    let a = &event.alert;
    match (event.kind, a.severity) {
        (AlertEventKind::Resolved, _) | (_, AlertSeverity::Info) => info!(
            device_id = %a.device_id,
            alert_id = %a.id,
            category = %a.category,
            subject = %a.subject_key,
            "Alert {}: {}",
            event.kind,
            a.message
        ),
        (_, AlertSeverity::Warning) => warn!(
            device_id = %a.device_id,
            alert_id = %a.id,
            category = %a.category,
            subject = %a.subject_key,
            "Alert {}: {}",
            event.kind,
            a.message
        ),
        (_, AlertSeverity::Critical) => error!(
            device_id = %a.device_id,
            alert_id = %a.id,
            category = %a.category,
            subject = %a.subject_key,
            "Alert {}: {}",
            event.kind,
            a.message
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BgpNeighbor, InterfaceState, L2Kind, L2Service, LinkStatus};

    fn engine() -> AlertEngine {
        AlertEngine::new(
            &Device::new(1, 42, "edge-rtr-1", "192.0.2.1", "lab"),
            Arc::new(AlertPolicy::default()),
        )
    }

    fn iface(name: &str, oper: LinkStatus) -> InterfaceState {
        InterfaceState {
            name: name.to_string(),
            admin_status: LinkStatus::Up,
            oper_status: oper,
            in_octets: 0,
            out_octets: 0,
        }
    }

    fn bgp(peer: &str, state: &str) -> BgpNeighbor {
        BgpNeighbor {
            peer_address: peer.to_string(),
            as_number: 65001,
            session_state: state.to_string(),
            uptime_secs: None,
            prefixes_received: None,
        }
    }

    fn snap() -> Snapshot {
        Snapshot::new(Utc::now())
    }

    #[test]
    fn test_interface_down_then_up() {
        let mut engine = engine();
        let events = engine.apply(snap().with_interface(iface("Gi0/1", LinkStatus::Down)), Utc::now());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, AlertEventKind::Opened);
        assert_eq!(events[0].alert.severity, AlertSeverity::Warning);
        assert_eq!(events[0].alert.subject_key, "Gi0/1");
        assert_eq!(events[0].alert.account_id, AccountId(42));
        let id = events[0].alert.id;

        let events = engine.apply(snap().with_interface(iface("Gi0/1", LinkStatus::Up)), Utc::now());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, AlertEventKind::Resolved);
        assert_eq!(events[0].alert.id, id);
        assert!(events[0].alert.resolved_at.is_some());
        assert_eq!(engine.open_count(), 0);
    }

    #[test]
    fn test_identical_snapshots_are_silent() {
        let mut engine = engine();
        let s = snap()
            .with_interface(iface("Gi0/1", LinkStatus::Down))
            .with_bgp_neighbor(bgp("10.0.0.1", "Active"));
        assert_eq!(engine.apply(s.clone(), Utc::now()).len(), 2);
        assert!(engine.apply(s.clone(), Utc::now()).is_empty());
        assert!(engine.apply(s, Utc::now()).is_empty());
        assert_eq!(engine.open_count(), 2);
    }

    #[test]
    fn test_admin_down_never_alerts() {
        let mut engine = engine();
        let mut shut = iface("Gi0/3", LinkStatus::Down);
        shut.admin_status = LinkStatus::Down;
        assert!(engine.apply(snap().with_interface(shut), Utc::now()).is_empty());
    }

    #[test]
    fn test_wan_interface_is_critical() {
        let mut engine = engine();
        let events = engine.apply(
            snap().with_interface(iface("Serial0/0/0", LinkStatus::Down)),
            Utc::now(),
        );
        assert_eq!(events[0].alert.severity, AlertSeverity::Critical);
        assert!(events[0].alert.message.contains("WAN link"));
    }

    #[test]
    fn test_explicit_wan_list_overrides_patterns() {
        let device = Device::new(1, 1, "r1", "192.0.2.1", "lab").with_wan_interfaces(["Gi0/5"]);
        let engine = AlertEngine::new(&device, Arc::new(AlertPolicy::default()));
        assert!(engine.is_wan("Gi0/5"));
        assert!(!engine.is_wan("Serial0/0/0"));
    }

    #[test]
    fn test_bgp_disappearance_keeps_alert_open() {
        let mut engine = engine();
        engine.apply(snap().with_bgp_neighbor(bgp("10.0.0.1", "Established")), Utc::now());
        let events = engine.apply(snap().with_bgp_neighbor(bgp("10.0.0.1", "Idle")), Utc::now());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].alert.severity, AlertSeverity::Critical);
        let id = events[0].alert.id;

        assert!(engine.apply(snap(), Utc::now()).is_empty());
        assert!(engine.open_alert(AlertCategory::Bgp, "10.0.0.1").is_some());

        let events = engine.apply(snap().with_bgp_neighbor(bgp("10.0.0.1", "Established")), Utc::now());
        assert_eq!(events[0].kind, AlertEventKind::Resolved);
        assert_eq!(events[0].alert.id, id);
    }

    #[test]
    fn test_resolve_on_disappearance_when_enabled() {
        let policy = AlertPolicy {
            resolve_on_disappearance: true,
            ..AlertPolicy::default()
        };
        let mut engine = AlertEngine::new(
            &Device::new(1, 1, "r1", "192.0.2.1", "lab"),
            Arc::new(policy),
        );
        engine.apply(snap().with_bgp_neighbor(bgp("10.0.0.1", "Idle")), Utc::now());
        let events = engine.apply(snap(), Utc::now());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, AlertEventKind::Resolved);
    }

    #[test]
    fn test_cpu_escalation_keeps_id() {
        let mut engine = engine();
        let hot = || snap().with_resources(Some(97.0), Some(10.0));

        let opened = engine.apply(hot(), Utc::now());
        assert_eq!(opened.len(), 1);
        assert_eq!(opened[0].alert.severity, AlertSeverity::Warning);
        assert!(opened[0].alert.message.starts_with("cpu_high"));

        assert!(engine.apply(hot(), Utc::now()).is_empty());

        let escalated = engine.apply(hot(), Utc::now());
        assert_eq!(escalated.len(), 1);
        assert_eq!(escalated[0].kind, AlertEventKind::Escalated);
        assert_eq!(escalated[0].alert.severity, AlertSeverity::Critical);
        assert_eq!(escalated[0].alert.id, opened[0].alert.id);

        assert!(engine.apply(hot(), Utc::now()).is_empty());

        let resolved = engine.apply(snap().with_resources(Some(85.0), Some(10.0)), Utc::now());
        assert_eq!(resolved[0].kind, AlertEventKind::Resolved);
    }

    #[test]
    fn test_l2_down_is_warning() {
        let mut engine = engine();
        let events = engine.apply(
            snap().with_l2_service(L2Service {
                kind: L2Kind::Trunk,
                name: "Gi0/2".to_string(),
                state: LinkStatus::Down,
            }),
            Utc::now(),
        );
        assert_eq!(events[0].alert.subject_key, "trunk:Gi0/2");
        assert_eq!(events[0].alert.severity, AlertSeverity::Warning);
    }

    #[test]
    fn test_reachability_alert_lifecycle() {
        let mut engine = engine();
        let opened = engine.mark_unreachable(Utc::now(), 3).unwrap();
        assert_eq!(opened.alert.severity, AlertSeverity::Critical);
        assert_eq!(opened.alert.subject_key, REACHABILITY_SUBJECT);
        assert!(engine.mark_unreachable(Utc::now(), 4).is_none());

        assert!(engine.apply(snap(), Utc::now()).is_empty());
        assert_eq!(engine.open_count(), 1);

        let resolved = engine.mark_reachable(Utc::now()).unwrap();
        assert_eq!(resolved.alert.id, opened.alert.id);
        assert!(engine.mark_reachable(Utc::now()).is_none());
    }
}
