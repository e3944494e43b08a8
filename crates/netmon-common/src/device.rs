//! Device identity and connection credentials.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{MonitorError, MonitorResult};
use std::time::Duration;

/// Default platform tag for devices that do not declare one.
pub const DEFAULT_PLATFORM: &str = "cisco_ios";

/// Default SSH port.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Identifier of a monitored device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub u64);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of the account owning a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub u64);

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn default_platform() -> String {
    DEFAULT_PLATFORM.to_string()
}

fn default_port() -> u16 {
    DEFAULT_SSH_PORT
}

fn default_enabled() -> bool {
    true
}

/// A registered network device.
///
/// Devices are owned by an account and are only changed through explicit
/// configuration updates; the engine never writes them back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Device identifier.
    pub id: DeviceId,
    /// Owning account.
    pub account_id: AccountId,
    /// Human readable name.
    pub name: String,
    /// Hostname or IP address used to open sessions.
    pub address: String,
    /// SSH port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Key handed to the credential resolver.
    pub credentials_ref: String,
    /// Vendor/platform tag selecting command set and parsers.
    #[serde(default = "default_platform")]
    pub platform: String,
    /// Per-device polling interval in seconds, overriding the global default.
    #[serde(default)]
    pub poll_interval_secs: Option<u64>,
    /// Interfaces to treat as WAN links. Empty means "use name patterns".
    #[serde(default)]
    pub wan_interfaces: Vec<String>,
    /// Disabled devices stay registered but are not polled.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl Device {
    /// Creates a device with default port, platform and interval.
    pub fn new(
        id: u64,
        account_id: u64,
        name: impl Into<String>,
        address: impl Into<String>,
        credentials_ref: impl Into<String>,
    ) -> Self {
        Self {
            id: DeviceId(id),
            account_id: AccountId(account_id),
            name: name.into(),
            address: address.into(),
            port: DEFAULT_SSH_PORT,
            credentials_ref: credentials_ref.into(),
            platform: default_platform(),
            poll_interval_secs: None,
            wan_interfaces: Vec::new(),
            enabled: true,
        }
    }

    /// Sets the platform tag.
    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = platform.into();
        self
    }

    /// Sets a per-device polling interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_secs = Some(interval.as_secs().max(1));
        self
    }

    /// Declares the WAN interfaces of this device.
    pub fn with_wan_interfaces<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.wan_interfaces = names.into_iter().map(Into::into).collect();
        self
    }

    /// Returns the effective polling interval given the global default.
    /// Never shorter than one second.
    pub fn poll_interval(&self, default: Duration) -> Duration {
        self.poll_interval_secs
            .map(Duration::from_secs)
            .unwrap_or(default)
            .max(Duration::from_secs(1))
    }

    /// Checks the fields the engine relies on.
    pub fn validate(&self) -> MonitorResult<()> {
        let field = |name: &str| format!("devices.{}.{}", self.id, name);
        if self.poll_interval_secs == Some(0) {
            return Err(MonitorError::config(field("poll_interval_secs"), "must be > 0"));
        }
        if self.address.trim().is_empty() {
            return Err(MonitorError::config(field("address"), "must not be empty"));
        }
        // A leading dash would be read as a client option.
        if self.address.starts_with('-') {
            return Err(MonitorError::config(
                field("address"),
                format!("'{}' is not a host name or address", self.address),
            ));
        }
        if self.port == 0 {
            return Err(MonitorError::config(field("port"), "must be > 0"));
        }
        Ok(())
    }
}

/// Connection credentials returned by a credential resolver.
///
/// The secret is never printed by `Debug` and never persisted by the engine.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Login user.
    pub username: String,
    /// Password, if password authentication is used. `None` means key-based
    /// authentication through the local SSH agent.
    pub password: Option<String>,
}

impl Credentials {
    /// Credentials for key-based authentication.
    pub fn key_based(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: None,
        }
    }

    /// Credentials for password authentication.
    pub fn with_password(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: Some(password.into()),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}
