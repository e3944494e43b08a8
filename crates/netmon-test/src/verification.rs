//! Helpers for inspecting hub traffic.

use netmond::{AlertEvent, AlertEventKind, HubEvent, StatusSummary, Subscription};

/// Takes every event currently queued on a subscription.
pub fn drain(subscription: &mut Subscription) -> Vec<HubEvent> {
    let mut events = Vec::new();
    while let Ok(event) = subscription.receiver.try_recv() {
        events.push(event);
    }
    events
}

/// Alert events, in delivery order.
pub fn alert_events(events: &[HubEvent]) -> Vec<AlertEvent> {
    events
        .iter()
        .filter_map(|e| match e {
            HubEvent::Alert(a) => Some(a.clone()),
            HubEvent::StatusUpdate(_) => None,
        })
        .collect()
}

/// Status updates, in delivery order.
pub fn status_updates(events: &[HubEvent]) -> Vec<StatusSummary> {
    events
        .iter()
        .filter_map(|e| match e {
            HubEvent::StatusUpdate(s) => Some(s.clone()),
            HubEvent::Alert(_) => None,
        })
        .collect()
}

/// Kinds of the given alert events.
pub fn kinds(events: &[AlertEvent]) -> Vec<AlertEventKind> {
    events.iter().map(|e| e.kind).collect()
}
