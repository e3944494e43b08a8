//! Device registry and credential resolution.
//!
//! The scheduler reads the registry on every supervisor tick; whatever the
//! registry returns is the authoritative device list. Credentials are looked
//! up right before each cycle and never cached by the engine.

use async_trait::async_trait;
use netmon_common::{Credentials, Device, DeviceId, MonitorError, MonitorResult};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use tracing::debug;

/// Source of the registered device list.
#[async_trait]
pub trait DeviceRegistry: Send + Sync {
    /// Returns every registered device.
    async fn list_devices(&self) -> MonitorResult<Vec<Device>>;
}

/// Resolves a device's credential reference to usable credentials.
#[async_trait]
pub trait CredentialResolver: Send + Sync {
    async fn resolve(&self, device: &Device) -> MonitorResult<Credentials>;
}

/// In-memory registry, mutable at runtime.
#[derive(Debug, Default)]
pub struct StaticRegistry {
    devices: RwLock<BTreeMap<DeviceId, Device>>,
}

impl StaticRegistry {
    pub fn new(devices: impl IntoIterator<Item = Device>) -> Self {
        Self {
            devices: RwLock::new(devices.into_iter().map(|d| (d.id, d)).collect()),
        }
    }

    /// Adds or replaces a device.
    pub fn upsert(&self, device: Device) {
        self.devices.write().insert(device.id, device);
    }

    /// Removes a device. Returns the removed definition.
    pub fn remove(&self, id: DeviceId) -> Option<Device> {
        self.devices.write().remove(&id)
    }

    pub fn len(&self) -> usize {
        self.devices.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.read().is_empty()
    }
}

#[async_trait]
impl DeviceRegistry for StaticRegistry {
    async fn list_devices(&self) -> MonitorResult<Vec<Device>> {
        Ok(self.devices.read().values().cloned().collect())
    }
}

#[derive(Debug, Deserialize)]
struct DeviceFile {
    #[serde(default)]
    devices: Vec<Device>,
}

/// Registry backed by a TOML file holding `[[devices]]` tables. The file is
/// re-read on every call so edits apply without a restart.
#[derive(Debug, Clone)]
pub struct FileRegistry {
    path: PathBuf,
}

impl FileRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Parses a device file body.
    pub fn parse(content: &str) -> MonitorResult<Vec<Device>> {
        let file: DeviceFile = toml::from_str(content)
            .map_err(|e| MonitorError::config("devices", e.to_string()))?;
        let mut seen = HashSet::new();
        for device in &file.devices {
            if !seen.insert(device.id) {
                return Err(MonitorError::config(
                    "devices",
                    format!("duplicate device id {}", device.id),
                ));
            }
            device.validate()?;
        }
        Ok(file.devices)
    }
}

#[async_trait]
impl DeviceRegistry for FileRegistry {
    async fn list_devices(&self) -> MonitorResult<Vec<Device>> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            MonitorError::config("devices_file", format!("{}: {}", self.path.display(), e))
        })?;
        let devices = Self::parse(&content)?;
        debug!(path = %self.path.display(), count = devices.len(), "Loaded device file");
        Ok(devices)
    }
}

/// One credential entry as written in the configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialEntry {
    /// Key referenced by `Device::credentials_ref`.
    pub reference: String,
    pub username: String,
    /// Inline password. Prefer `password_env`.
    #[serde(default)]
    pub password: Option<String>,
    /// Environment variable holding the password, read at resolve time.
    #[serde(default)]
    pub password_env: Option<String>,
}

/// Resolver over a fixed table of credential entries.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentialResolver {
    entries: HashMap<String, CredentialEntry>,
}

impl StaticCredentialResolver {
    pub fn new(entries: impl IntoIterator<Item = CredentialEntry>) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|e| (e.reference.clone(), e))
                .collect(),
        }
    }

    pub fn insert(&mut self, entry: CredentialEntry) {
        self.entries.insert(entry.reference.clone(), entry);
    }
}

#[async_trait]
impl CredentialResolver for StaticCredentialResolver {
    async fn resolve(&self, device: &Device) -> MonitorResult<Credentials> {
        let entry = self.entries.get(&device.credentials_ref).ok_or_else(|| {
            MonitorError::auth(
                &device.name,
                format!("no credentials for reference '{}'", device.credentials_ref),
            )
        })?;

        if let Some(var) = &entry.password_env {
            let password = std::env::var(var).map_err(|_| {
                MonitorError::auth(
                    &device.name,
                    format!("password variable '{}' is not set", var),
                )
            })?;
            return Ok(Credentials::with_password(&entry.username, password));
        }

        Ok(match &entry.password {
            Some(password) => Credentials::with_password(&entry.username, password),
            None => Credentials::key_based(&entry.username),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const DEVICES: &str = r#"
[[devices]]
id = 1
account_id = 10
name = "edge-rtr-1"
address = "192.0.2.1"
credentials_ref = "lab"
wan_interfaces = ["Serial0/0/0"]

[[devices]]
id = 2
account_id = 10
name = "core-sw-1"
address = "192.0.2.2"
port = 2222
credentials_ref = "lab"
platform = "cisco_xe"
poll_interval_secs = 30
"#;

    #[test]
    fn test_parse_device_file() {
        let devices = FileRegistry::parse(DEVICES).unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].platform, "cisco_ios");
        assert_eq!(devices[0].wan_interfaces, vec!["Serial0/0/0"]);
        assert_eq!(devices[1].port, 2222);
        assert_eq!(devices[1].poll_interval_secs, Some(30));
        assert!(devices[1].enabled);
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let content = format!("{}\n{}", DEVICES, DEVICES);
        assert!(matches!(
            FileRegistry::parse(&content),
            Err(MonitorError::Config { .. })
        ));
    }

    #[test]
    fn test_invalid_device_rejected() {
        let zero = DEVICES.replace("poll_interval_secs = 30", "poll_interval_secs = 0");
        assert!(matches!(
            FileRegistry::parse(&zero),
            Err(MonitorError::Config { ref field, .. }) if field == "devices.2.poll_interval_secs"
        ));

        let dashed = DEVICES.replace("\"192.0.2.1\"", "\"-oProxyCommand=id\"");
        assert!(FileRegistry::parse(&dashed).is_err());
    }

    #[tokio::test]
    async fn test_file_registry_rereads() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(DEVICES.as_bytes()).unwrap();
        let registry = FileRegistry::new(file.path());
        assert_eq!(registry.list_devices().await.unwrap().len(), 2);

        std::fs::write(file.path(), "devices = []\n").unwrap();
        assert!(registry.list_devices().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_static_registry_mutation() {
        let registry = StaticRegistry::new([Device::new(1, 1, "r1", "192.0.2.1", "lab")]);
        registry.upsert(Device::new(2, 1, "r2", "192.0.2.2", "lab"));
        assert_eq!(registry.list_devices().await.unwrap().len(), 2);
        assert!(registry.remove(DeviceId(1)).is_some());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_credential_resolution() {
        let resolver = StaticCredentialResolver::new([
            CredentialEntry {
                reference: "lab".to_string(),
                username: "netops".to_string(),
                password: Some("inline".to_string()),
                password_env: None,
            },
            CredentialEntry {
                reference: "keys".to_string(),
                username: "automation".to_string(),
                password: None,
                password_env: None,
            },
        ]);

        let creds = resolver
            .resolve(&Device::new(1, 1, "r1", "192.0.2.1", "lab"))
            .await
            .unwrap();
        assert_eq!(creds.password.as_deref(), Some("inline"));

        let creds = resolver
            .resolve(&Device::new(2, 1, "r2", "192.0.2.2", "keys"))
            .await
            .unwrap();
        assert_eq!(creds, Credentials::key_based("automation"));

        let err = resolver
            .resolve(&Device::new(3, 1, "r3", "192.0.2.3", "missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, MonitorError::Auth { .. }));
    }

    #[tokio::test]
    async fn test_missing_password_env_is_auth_error() {
        let resolver = StaticCredentialResolver::new([CredentialEntry {
            reference: "env".to_string(),
            username: "netops".to_string(),
            password: None,
            password_env: Some("NETMOND_TEST_UNSET_PASSWORD_VAR".to_string()),
        }]);
        let err = resolver
            .resolve(&Device::new(1, 1, "r1", "192.0.2.1", "env"))
            .await
            .unwrap_err();
        assert!(matches!(err, MonitorError::Auth { .. }));
    }
}
