//! Live fan-out hub.
//!
//! Observers subscribe to a set of devices or to a whole account and get a
//! bounded receiver. Publication never waits on a subscriber: a full queue
//! or a dropped receiver removes that subscription on the spot. There is no
//! replay; late subscribers read current state from the status table.

use chrono::{DateTime, Utc};
use netmon_common::{AccountId, DeviceId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::metrics::MetricsCollector;
use crate::types::{AlertEvent, DeviceStatus, Reachability};

/// Default per-subscriber queue depth.
pub const DEFAULT_SUBSCRIBER_QUEUE_SIZE: usize = 100;

/// Condensed device status pushed after every cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSummary {
    pub device_id: DeviceId,
    pub account_id: AccountId,
    pub name: String,
    pub reachability: Reachability,
    pub last_attempt: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub stale: bool,
    pub open_alerts: usize,
    pub interfaces_up: usize,
    pub interfaces_down: usize,
    pub bgp_neighbors_up: usize,
    pub bgp_neighbors_down: usize,
    pub ospf_neighbors_up: usize,
    pub ospf_neighbors_down: usize,
    pub cpu_percent: Option<f64>,
    pub memory_percent: Option<f64>,
}

impl From<&DeviceStatus> for StatusSummary {
    fn from(status: &DeviceStatus) -> Self {
        let (mut iu, mut id, mut bu, mut bd, mut ou, mut od) = (0, 0, 0, 0, 0, 0);
        let (mut cpu, mut mem) = (None, None);
        if let Some(s) = &status.snapshot {
            (iu, id) = s.interface_counts();
            (bu, bd) = s.bgp_counts();
            (ou, od) = s.ospf_counts();
            cpu = s.resources.cpu_percent;
            mem = s.resources.memory_percent;
        }
        Self {
            device_id: status.device_id,
            account_id: status.account_id,
            name: status.name.clone(),
            reachability: status.reachability,
            last_attempt: status.last_attempt,
            last_success: status.last_success,
            consecutive_failures: status.consecutive_failures,
            stale: status.stale,
            open_alerts: status.open_alerts.len(),
            interfaces_up: iu,
            interfaces_down: id,
            bgp_neighbors_up: bu,
            bgp_neighbors_down: bd,
            ospf_neighbors_up: ou,
            ospf_neighbors_down: od,
            cpu_percent: cpu,
            memory_percent: mem,
        }
    }
}

/// Event delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum HubEvent {
    StatusUpdate(StatusSummary),
    Alert(AlertEvent),
}

/// What a subscription listens to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionScope {
    /// A fixed set of devices.
    Devices(BTreeSet<DeviceId>),
    /// Every device of an account, including ones added later.
    Account(AccountId),
}

impl SubscriptionScope {
    fn matches(&self, device: DeviceId, account: AccountId) -> bool {
        match self {
            SubscriptionScope::Devices(set) => set.contains(&device),
            SubscriptionScope::Account(a) => *a == account,
        }
    }
}

/// Opaque subscription identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

impl fmt::Display for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// A live subscription: the handle plus the receiving end of its queue.
#[derive(Debug)]
pub struct Subscription {
    pub handle: SubscriptionHandle,
    pub receiver: mpsc::Receiver<HubEvent>,
}

struct Subscriber {
    scope: SubscriptionScope,
    sender: mpsc::Sender<HubEvent>,
}

/// Subscriber registry and publisher.
pub struct Hub {
    queue_size: usize,
    next_id: AtomicU64,
    subscribers: Mutex<HashMap<u64, Subscriber>>,
    metrics: Option<MetricsCollector>,
}

impl Hub {
    pub fn new(queue_size: usize, metrics: Option<MetricsCollector>) -> Self {
        Self {
            queue_size: queue_size.max(1),
            next_id: AtomicU64::new(1),
            subscribers: Mutex::new(HashMap::new()),
            metrics,
        }
    }

    /// Registers a subscriber.
    pub fn subscribe(&self, scope: SubscriptionScope) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel(self.queue_size);
        let count = {
            let mut subs = self.subscribers.lock();
            subs.insert(id, Subscriber { scope, sender });
            subs.len()
        };
        self.update_gauge(count);
        info!(subscription = id, subscribers = count, "Subscriber registered");
        Subscription {
            handle: SubscriptionHandle(id),
            receiver,
        }
    }

    /// Removes a subscriber. Returns false if it was already gone.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        let (removed, count) = {
            let mut subs = self.subscribers.lock();
            let removed = subs.remove(&handle.0).is_some();
            (removed, subs.len())
        };
        if removed {
            self.update_gauge(count);
            info!(subscription = %handle, subscribers = count, "Subscriber removed");
        }
        removed
    }

    /// Delivers `event` to every subscriber whose scope covers the device.
    /// Returns the number of subscribers that accepted it.
    pub fn publish(&self, device: DeviceId, account: AccountId, event: HubEvent) -> usize {
        let mut delivered = 0;
        let mut dropped = Vec::new();
        let count = {
            let mut subs = self.subscribers.lock();
            for (id, sub) in subs.iter() {
                if !sub.scope.matches(device, account) {
                    continue;
                }
                match sub.sender.try_send(event.clone()) {
                    Ok(()) => delivered += 1,
                    Err(e) => {
                        let reason = match e {
                            mpsc::error::TrySendError::Full(_) => "queue full",
                            mpsc::error::TrySendError::Closed(_) => "receiver closed",
                        };
                        dropped.push((*id, reason));
                    }
                }
            }
            for (id, _) in &dropped {
                subs.remove(id);
            }
            subs.len()
        };

        if !dropped.is_empty() {
            for (id, reason) in &dropped {
                info!(subscription = id, reason, "Dropping subscriber");
            }
            if let Some(m) = &self.metrics {
                m.record_dropped_subscribers(dropped.len());
            }
            self.update_gauge(count);
        }
        debug!(device_id = %device, delivered, "Published hub event");
        delivered
    }

    /// Number of live subscriptions.
    pub fn connection_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Number of distinct accounts with at least one account-scoped
    /// subscription.
    pub fn account_count(&self) -> usize {
        let subs = self.subscribers.lock();
        subs.values()
            .filter_map(|s| match s.scope {
                SubscriptionScope::Account(a) => Some(a),
                SubscriptionScope::Devices(_) => None,
            })
            .collect::<HashSet<_>>()
            .len()
    }

    fn update_gauge(&self, count: usize) {
        if let Some(m) = &self.metrics {
            m.set_hub_subscribers(count);
        }
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_QUEUE_SIZE, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_event(device: u64) -> HubEvent {
        HubEvent::StatusUpdate(StatusSummary::from(&DeviceStatus::new(
            DeviceId(device),
            AccountId(1),
            format!("r{}", device),
        )))
    }

    fn devices(ids: &[u64]) -> SubscriptionScope {
        SubscriptionScope::Devices(ids.iter().map(|i| DeviceId(*i)).collect())
    }

    #[tokio::test]
    async fn test_scoped_delivery() {
        let hub = Hub::default();
        let mut dev_sub = hub.subscribe(devices(&[1]));
        let mut acct_sub = hub.subscribe(SubscriptionScope::Account(AccountId(1)));
        let mut other = hub.subscribe(SubscriptionScope::Account(AccountId(2)));

        assert_eq!(hub.publish(DeviceId(1), AccountId(1), status_event(1)), 2);
        assert_eq!(hub.publish(DeviceId(2), AccountId(1), status_event(2)), 1);

        assert!(dev_sub.receiver.try_recv().is_ok());
        assert!(dev_sub.receiver.try_recv().is_err());
        assert!(acct_sub.receiver.try_recv().is_ok());
        assert!(acct_sub.receiver.try_recv().is_ok());
        assert!(other.receiver.try_recv().is_err());
        assert_eq!(hub.account_count(), 2);
    }

    #[tokio::test]
    async fn test_overflow_drops_only_slow_subscriber() {
        let metrics = MetricsCollector::new().unwrap();
        let hub = Hub::new(2, Some(metrics.clone()));
        let slow = hub.subscribe(devices(&[1]));
        let mut fast = hub.subscribe(devices(&[1]));

        for _ in 0..2 {
            hub.publish(DeviceId(1), AccountId(1), status_event(1));
            assert!(fast.receiver.try_recv().is_ok());
        }
        // Third event overflows the slow subscriber's queue of two.
        assert_eq!(hub.publish(DeviceId(1), AccountId(1), status_event(1)), 1);
        assert_eq!(hub.connection_count(), 1);
        assert_eq!(metrics.hub_dropped_subscribers_total.get(), 1.0);
        assert!(fast.receiver.try_recv().is_ok());
        assert!(!hub.unsubscribe(slow.handle));
    }

    #[tokio::test]
    async fn test_closed_receiver_is_removed() {
        let hub = Hub::default();
        let sub = hub.subscribe(devices(&[1]));
        drop(sub.receiver);
        assert_eq!(hub.publish(DeviceId(1), AccountId(1), status_event(1)), 0);
        assert_eq!(hub.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let hub = Hub::default();
        let sub = hub.subscribe(SubscriptionScope::Account(AccountId(1)));
        assert_eq!(hub.connection_count(), 1);
        assert!(hub.unsubscribe(sub.handle));
        assert_eq!(hub.connection_count(), 0);
        assert_eq!(hub.account_count(), 0);
    }

    #[test]
    fn test_event_serialization_shape() {
        let json = serde_json::to_value(status_event(5)).unwrap();
        assert_eq!(json["type"], "status_update");
        assert_eq!(json["data"]["device_id"], 5);
        assert_eq!(json["data"]["reachability"], "unknown");
    }
}
