//! Network device monitoring and alerting engine.
//!
//! netmond polls routers and switches over a remote shell, turns vendor CLI
//! output into typed snapshots, diffs consecutive snapshots into alerts,
//! persists time-series metrics and alert history, and pushes live updates
//! to subscribers.
//!
//! # Architecture
//!
//! ```text
//!  DeviceRegistry ──▶ Scheduler ──▶ SessionAdapter ──▶ raw text
//!                        │                                │
//!                        │                                ▼
//!                        │                            Extractor
//!                        │                                │ Snapshot
//!                        ▼                                ▼
//!                   StatusTable ◀──────────────────── AlertEngine
//!                                                         │ MetricPoint / AlertEvent
//!                                              ┌──────────┴──────────┐
//!                                              ▼                     ▼
//!                                         StoreWriter               Hub
//! ```

pub mod alerting;
pub mod config_file;
pub mod daemon;
pub mod extractor;
pub mod health_monitor;
pub mod hub;
pub mod metrics;
pub mod metrics_server;
pub mod registry;
pub mod scheduler;
pub mod store;
pub mod types;

pub use alerting::{AlertEngine, AlertPolicy};
pub use config_file::NetmonConfig;
pub use daemon::Netmond;
pub use extractor::{Dialect, Extractor, Records, SnapshotBuilder};
pub use health_monitor::HealthMonitor;
pub use hub::{Hub, HubEvent, StatusSummary, Subscription, SubscriptionHandle, SubscriptionScope};
pub use metrics::{HealthStatus, MetricsCollector};
pub use registry::{
    CredentialEntry, CredentialResolver, DeviceRegistry, FileRegistry, StaticCredentialResolver,
    StaticRegistry,
};
pub use scheduler::{PollContext, Scheduler, SchedulerSettings, StatusTable, SyncReport};
pub use store::{JsonlStore, MemoryStore, MetricStore, StoreWriter};
pub use types::{
    Alert, AlertCategory, AlertEvent, AlertEventKind, AlertSeverity, DeviceStatus, MetricPoint,
    Reachability, Snapshot,
};
