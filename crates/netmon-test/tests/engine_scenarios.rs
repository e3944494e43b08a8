//! End-to-end alerting scenarios: scripted device output in, alert
//! transitions, status and stored history out.

use netmon_common::{AccountId, DeviceId};
use netmon_test::*;
use netmond::{
    AlertCategory, AlertEventKind, AlertSeverity, MetricStore, NetmonConfig, Reachability,
    SubscriptionScope,
};
use pretty_assertions::assert_eq;
use std::time::Duration;

const INTERVAL: Duration = Duration::from_secs(60);

/// Sleeps past the next poll of a device on [`INTERVAL`].
async fn next_cycle() {
    tokio::time::sleep(INTERVAL).await;
}

async fn first_cycle() {
    tokio::time::sleep(Duration::from_secs(1)).await;
}

#[tokio::test(start_paused = true)]
async fn interface_down_then_up_resolves_same_alert() {
    let t = TestEngine::with_interval(INTERVAL);
    let device = lab_device(1);
    t.transport.script(
        &device.name,
        [
            RouterOutputs::healthy().interface("Gi0/1", true, false),
            RouterOutputs::healthy(),
        ],
    );
    t.add_device(device);
    let mut sub = t.engine.subscribe(SubscriptionScope::Account(AccountId(1)));

    t.sync().await;
    first_cycle().await;

    let status = t.engine.status(DeviceId(1)).unwrap();
    assert_eq!(status.reachability, Reachability::Online);
    assert_eq!(status.open_alerts.len(), 1);
    let alert = &status.open_alerts[0];
    assert_eq!(alert.category, AlertCategory::Interface);
    assert_eq!(alert.subject_key, "Gi0/1");
    assert_eq!(alert.severity, AlertSeverity::Warning);

    next_cycle().await;

    let alerts = alert_events(&drain(&mut sub));
    assert_eq!(kinds(&alerts), vec![AlertEventKind::Opened, AlertEventKind::Resolved]);
    assert_eq!(alerts[0].alert.id, alerts[1].alert.id);
    assert!(alerts[1].alert.resolved_at.is_some());
    assert!(t.engine.status(DeviceId(1)).unwrap().open_alerts.is_empty());

    // Stored history, newest first.
    let history = t.engine.recent_alerts(DeviceId(1), 10).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].kind, AlertEventKind::Resolved);

    t.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn identical_snapshots_produce_no_new_events() {
    let t = TestEngine::with_interval(INTERVAL);
    let device = lab_device(1);
    t.transport
        .push(&device.name, RouterOutputs::healthy().interface("Gi0/1", true, false));
    t.add_device(device);
    let mut sub = t.engine.subscribe(SubscriptionScope::Account(AccountId(1)));

    t.sync().await;
    first_cycle().await;
    next_cycle().await;
    next_cycle().await;

    let events = drain(&mut sub);
    assert_eq!(kinds(&alert_events(&events)), vec![AlertEventKind::Opened]);
    assert_eq!(status_updates(&events).len(), 3);
    assert_eq!(t.store.alerts().len(), 1);
    assert_eq!(t.store.metric_batches(), 3);

    t.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn three_failures_open_unreachable_and_success_resolves() {
    let t = TestEngine::with_interval(INTERVAL);
    let device = lab_device(1);
    t.transport.script(
        &device.name,
        [Step::Refuse, Step::Refuse, Step::Refuse, Step::from(RouterOutputs::healthy())],
    );
    t.add_device(device);
    let mut sub = t.engine.subscribe(SubscriptionScope::Account(AccountId(1)));

    t.sync().await;
    first_cycle().await;
    let status = t.engine.status(DeviceId(1)).unwrap();
    assert_eq!(status.consecutive_failures, 1);
    assert!(status.stale);
    assert!(status.open_alerts.is_empty());

    next_cycle().await;
    next_cycle().await;
    let status = t.engine.status(DeviceId(1)).unwrap();
    assert_eq!(status.consecutive_failures, 3);
    assert_eq!(status.reachability, Reachability::Offline);
    assert_eq!(status.open_alerts.len(), 1);
    assert_eq!(status.open_alerts[0].severity, AlertSeverity::Critical);
    assert_eq!(status.open_alerts[0].subject_key, "reachability");

    next_cycle().await;
    let status = t.engine.status(DeviceId(1)).unwrap();
    assert_eq!(status.reachability, Reachability::Online);
    assert_eq!(status.consecutive_failures, 0);
    assert!(!status.stale);
    assert!(status.snapshot.is_some());
    assert!(status.open_alerts.is_empty());

    let alerts = alert_events(&drain(&mut sub));
    assert_eq!(kinds(&alerts), vec![AlertEventKind::Opened, AlertEventKind::Resolved]);
    assert_eq!(alerts[0].alert.id, alerts[1].alert.id);
    assert_eq!(
        t.metrics.poll_failures_total.with_label_values(&["connection"]).get(),
        3.0
    );

    t.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn bgp_alert_survives_disappearance_until_established() {
    let t = TestEngine::with_interval(INTERVAL);
    let device = lab_device(1);
    let base = RouterOutputs::healthy();
    t.transport.script(
        &device.name,
        [
            base.clone().bgp_neighbor("10.0.0.1", 65001, "Established"),
            base.clone().bgp_neighbor("10.0.0.1", 65001, "Idle"),
            base.clone(),
            base.clone().bgp_neighbor("10.0.0.1", 65001, "Established"),
        ],
    );
    t.add_device(device);
    let mut sub = t.engine.subscribe(SubscriptionScope::Devices([DeviceId(1)].into()));

    t.sync().await;
    first_cycle().await;
    assert!(alert_events(&drain(&mut sub)).is_empty());

    next_cycle().await;
    let opened = alert_events(&drain(&mut sub));
    assert_eq!(kinds(&opened), vec![AlertEventKind::Opened]);
    assert_eq!(opened[0].alert.category, AlertCategory::Bgp);
    assert_eq!(opened[0].alert.subject_key, "10.0.0.1");
    assert_eq!(opened[0].alert.severity, AlertSeverity::Critical);

    // Neighbor gone from the output: alert stays open, no event.
    next_cycle().await;
    assert!(alert_events(&drain(&mut sub)).is_empty());
    assert_eq!(t.engine.status(DeviceId(1)).unwrap().open_alerts.len(), 1);

    next_cycle().await;
    let resolved = alert_events(&drain(&mut sub));
    assert_eq!(kinds(&resolved), vec![AlertEventKind::Resolved]);
    assert_eq!(resolved[0].alert.id, opened[0].alert.id);

    t.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn disappearance_resolves_when_configured() {
    let mut config = NetmonConfig::default();
    config.alerts.resolve_on_disappearance = true;
    let t = TestEngine::new(config);
    let device = lab_device(1);
    t.transport.script(
        &device.name,
        [
            RouterOutputs::healthy().bgp_neighbor("10.0.0.1", 65001, "Idle"),
            RouterOutputs::healthy(),
        ],
    );
    t.add_device(device);

    t.sync().await;
    first_cycle().await;
    next_cycle().await;

    let kinds: Vec<_> = t.store.alerts().iter().map(|e| e.kind).collect();
    assert_eq!(kinds, vec![AlertEventKind::Opened, AlertEventKind::Resolved]);

    t.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn sustained_cpu_breach_escalates_in_place() {
    let t = TestEngine::with_interval(INTERVAL);
    let device = lab_device(1);
    t.transport.script(
        &device.name,
        [
            RouterOutputs::healthy().cpu(97.0),
            RouterOutputs::healthy().cpu(97.0),
            RouterOutputs::healthy().cpu(97.0),
            RouterOutputs::healthy().cpu(20.0),
        ],
    );
    t.add_device(device);

    t.sync().await;
    first_cycle().await;
    next_cycle().await;
    next_cycle().await;
    next_cycle().await;

    let events = t.store.alerts();
    assert_eq!(
        events.iter().map(|e| e.kind).collect::<Vec<_>>(),
        vec![AlertEventKind::Opened, AlertEventKind::Escalated, AlertEventKind::Resolved]
    );
    assert_eq!(events[0].alert.severity, AlertSeverity::Warning);
    assert_eq!(events[1].alert.severity, AlertSeverity::Critical);
    assert!(events.iter().all(|e| e.alert.id == events[0].alert.id));

    t.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn metrics_points_are_persisted_per_cycle() {
    let t = TestEngine::with_interval(INTERVAL);
    let device = lab_device(1);
    t.transport.push(&device.name, RouterOutputs::healthy().cpu(12.0));
    t.add_device(device);

    t.sync().await;
    first_cycle().await;

    let from = chrono::Utc::now() - chrono::Duration::hours(1);
    let to = chrono::Utc::now() + chrono::Duration::hours(1);
    let cpu = t
        .store
        .metrics_in_range(DeviceId(1), "cpu_percent", from, to)
        .await
        .unwrap();
    assert_eq!(cpu.len(), 1);
    assert_eq!(cpu[0].value, 12.0);

    let in_octets = t
        .store
        .metrics_in_range(DeviceId(1), "if_in_octets{Gi0/0}", from, to)
        .await
        .unwrap();
    assert_eq!(in_octets.len(), 1);

    t.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn auth_and_parse_failures_count_toward_threshold() {
    let t = TestEngine::with_interval(INTERVAL);
    let device = lab_device(1);
    let mut garbage = RouterOutputs::healthy().command_outputs();
    garbage.insert("show interfaces".to_string(), "garbled\n".to_string());
    t.transport.script(
        &device.name,
        [Step::RejectAuth, Step::Respond(garbage.clone()), Step::Respond(garbage)],
    );
    t.add_device(device);

    t.sync().await;
    first_cycle().await;
    next_cycle().await;
    next_cycle().await;

    let status = t.engine.status(DeviceId(1)).unwrap();
    assert_eq!(status.reachability, Reachability::Offline);
    assert!(status.last_error.is_some());
    assert_eq!(t.metrics.poll_failures_total.with_label_values(&["auth"]).get(), 1.0);
    assert_eq!(t.metrics.poll_failures_total.with_label_values(&["parse"]).get(), 2.0);
    // Sessions are closed on every exit path.
    assert_eq!(t.transport.opens("rtr-1"), 3);
    assert_eq!(t.transport.closes("rtr-1"), 2);

    t.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn hung_device_times_out() {
    let mut config = NetmonConfig::default();
    config.scheduler.command_timeout_secs = 5;
    let t = TestEngine::new(config);
    let device = lab_device(1);
    t.transport.push(&device.name, Step::Hang);
    t.add_device(device);

    t.sync().await;
    tokio::time::sleep(Duration::from_secs(6)).await;

    let status = t.engine.status(DeviceId(1)).unwrap();
    assert_eq!(status.consecutive_failures, 1);
    assert_eq!(t.metrics.poll_failures_total.with_label_values(&["timeout"]).get(), 1.0);
    assert_eq!(t.transport.closes("rtr-1"), 1);

    t.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn storage_failure_does_not_block_fan_out() {
    let t = TestEngine::with_interval(INTERVAL);
    t.store.set_failing(true);
    let device = lab_device(1);
    t.transport
        .push(&device.name, RouterOutputs::healthy().interface("Gi0/1", true, false));
    t.add_device(device);
    let mut sub = t.engine.subscribe(SubscriptionScope::Account(AccountId(1)));

    t.sync().await;
    first_cycle().await;

    let events = drain(&mut sub);
    assert_eq!(kinds(&alert_events(&events)), vec![AlertEventKind::Opened]);
    assert_eq!(t.engine.status(DeviceId(1)).unwrap().open_alerts.len(), 1);
    assert_eq!(t.metrics.store_errors_total.get(), 2.0);
    assert_eq!(t.engine.health().status(), netmond::HealthStatus::Degraded);

    t.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn slow_store_does_not_delay_fan_out() {
    let t = TestEngine::with_interval(INTERVAL);
    t.store.set_write_delay(Duration::from_secs(30));
    let device = lab_device(1);
    t.transport
        .push(&device.name, RouterOutputs::healthy().interface("Gi0/1", true, false));
    t.add_device(device);
    let mut sub = t.engine.subscribe(SubscriptionScope::Account(AccountId(1)));

    t.sync().await;
    first_cycle().await;

    // Delivered while the store is still busy with the cycle.
    let events = drain(&mut sub);
    assert_eq!(kinds(&alert_events(&events)), vec![AlertEventKind::Opened]);
    assert_eq!(status_updates(&events).len(), 1);
    assert!(t.store.alerts().is_empty());

    // Metrics then alert, 30s each.
    tokio::time::sleep(Duration::from_secs(70)).await;
    assert_eq!(t.store.metric_batches(), 1);
    assert_eq!(t.store.alerts().len(), 1);

    t.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn router_without_switching_commands_stays_online() {
    let t = TestEngine::with_interval(INTERVAL);
    let device = lab_device(1);
    t.transport.push(&device.name, RouterOutputs::healthy().routed_only());
    t.add_device(device);

    t.sync().await;
    first_cycle().await;
    next_cycle().await;
    next_cycle().await;

    let status = t.engine.status(DeviceId(1)).unwrap();
    assert_eq!(status.reachability, Reachability::Online);
    assert_eq!(status.consecutive_failures, 0);
    assert!(status.open_alerts.is_empty());
    assert!(status.snapshot.unwrap().l2_services.is_empty());
    assert_eq!(t.metrics.poll_failures_total.with_label_values(&["parse"]).get(), 0.0);

    t.shutdown().await;
}
