//! Shared building blocks for the netmon monitoring engine.
//!
//! - [`device`]: device identity and credentials
//! - [`error`]: error taxonomy shared by transport, extractor and storage
//! - [`platform`]: vendor command sets keyed by platform tag
//! - [`session`]: the scoped session adapter and its transport traits
//! - [`ssh`]: a transport built on the system `ssh` client
//!
//! # Example
//!
//! ```ignore
//! use netmon_common::{Credentials, Device, SessionAdapter, SshTransport};
//!
//! let adapter = SessionAdapter::new(
//!     Arc::new(SshTransport::default()),
//!     CommandSetTable::default(),
//!     Duration::from_secs(30),
//! );
//! let outputs = adapter.collect(&device, &credentials).await?;
//! ```

pub mod device;
pub mod error;
pub mod platform;
pub mod session;
pub mod ssh;

pub use device::{AccountId, Credentials, Device, DeviceId};
pub use error::{MonitorError, MonitorResult};
pub use platform::{CommandKind, CommandSet, CommandSetTable, CommandSpec};
pub use session::{CommandOutput, DeviceSession, SessionAdapter, SessionFactory};
pub use ssh::{SshOptions, SshTransport};
