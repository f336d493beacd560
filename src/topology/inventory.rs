//! Optional inventory mapping.
//!
//! A JSON document listing known devices with their aliases and the
//! attributes discovery cannot see (role, site, model). A missing file is an
//! empty inventory.

use crate::error::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::IpAddr;
use std::path::Path;
use tracing::debug;

/// Peer declared on an inventory interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryPeer {
    pub hostname: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryInterface {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer: Option<InventoryPeer>,
}

/// One known device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InventoryDevice {
    /// Canonical identity; the hostname when unset.
    pub identity: Option<String>,
    pub hostname: Option<String>,
    /// Other names and addresses this device is known by.
    pub aliases: Vec<String>,
    pub role: Option<String>,
    pub site: Option<String>,
    pub vendor: Option<String>,
    pub model: Option<String>,
    pub mgmt_ip: Option<IpAddr>,
    pub interfaces: Vec<InventoryInterface>,
}

impl InventoryDevice {
    /// The identity this device renders under, if it has any name at all.
    pub fn canonical_id(&self) -> Option<String> {
        self.identity
            .as_deref()
            .or(self.hostname.as_deref())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .or_else(|| self.mgmt_ip.map(|ip| ip.to_string()))
    }
}

/// The inventory document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Inventory {
    pub devices: Vec<InventoryDevice>,
}

impl Inventory {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load from a file; a missing file yields an empty inventory.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "No inventory file");
            return Ok(Self::empty());
        }
        let content = fs::read_to_string(path).map_err(|e| ConfigError::ReadFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let inventory = Self::from_json(&content)?;
        debug!(devices = inventory.devices.len(), "Loaded inventory");
        Ok(inventory)
    }

    pub fn from_json(content: &str) -> ConfigResult<Self> {
        let inventory: Self = serde_json::from_str(content)
            .map_err(|e| ConfigError::InvalidFormat(format!("inventory: {}", e)))?;
        for (i, device) in inventory.devices.iter().enumerate() {
            if device.canonical_id().is_none() {
                return Err(ConfigError::InvalidValue {
                    field: format!("inventory.devices[{}]", i),
                    reason: "needs an identity, hostname or mgmt_ip".to_string(),
                });
            }
        }
        Ok(inventory)
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let inventory = Inventory::load(&dir.path().join("inventory.json")).unwrap();
        assert!(inventory.is_empty());
    }

    #[test]
    fn test_parse_devices() {
        let json = r#"{
            "devices": [
                {
                    "hostname": "DEN-CORE-1",
                    "aliases": ["core1.den.example.net"],
                    "role": "core",
                    "mgmt_ip": "10.10.0.1",
                    "interfaces": [
                        { "name": "Gi1/0/1", "peer": { "hostname": "DEN-ACC-1", "interface": "Gi0/25" } }
                    ]
                },
                { "mgmt_ip": "10.10.0.9" }
            ]
        }"#;
        let inventory = Inventory::from_json(json).unwrap();
        assert_eq!(inventory.devices.len(), 2);
        assert_eq!(inventory.devices[0].canonical_id().as_deref(), Some("DEN-CORE-1"));
        assert_eq!(inventory.devices[1].canonical_id().as_deref(), Some("10.10.0.9"));
        assert_eq!(
            inventory.devices[0].interfaces[0].peer.as_ref().unwrap().hostname,
            "DEN-ACC-1"
        );
    }

    #[test]
    fn test_nameless_device_rejected() {
        let json = r#"{ "devices": [ { "role": "core" } ] }"#;
        assert!(matches!(
            Inventory::from_json(json),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_malformed_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inventory.json");
        fs::write(&path, "{ devices: ").unwrap();
        assert!(matches!(
            Inventory::load(&path),
            Err(ConfigError::InvalidFormat(_))
        ));
    }
}
