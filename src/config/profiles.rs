//! Vendor command profile management.
//!
//! A profile is the fixed command battery run on a device of one vendor.
//! Profiles may `extends` another profile, inheriting whatever they leave
//! unset. User profiles in `<config>/profiles/*.json` override built-ins with
//! the same name.

use crate::error::{ConfigError, ProfileError, ProfileResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

use super::settings::Paths;

/// Name of the profile used when the vendor is unknown.
pub const GENERIC_PROFILE: &str = "generic";

/// A command profile as written on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandProfile {
    /// Profile name, usually the vendor id (`cisco_ios`, `dlink`, ...).
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Parent profile supplying unset fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extends: Option<String>,
    /// Enter privileged mode before running commands.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_enable: Option<bool>,
    /// Commands in execution order. Empty means inherit.
    #[serde(default)]
    pub commands: Vec<String>,
}

/// A profile with its `extends` chain flattened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedProfile {
    pub name: String,
    pub pre_enable: bool,
    pub commands: Vec<String>,
}

impl CommandProfile {
    fn new(name: &str, description: &str, pre_enable: bool, commands: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            extends: None,
            pre_enable: Some(pre_enable),
            commands: commands.iter().map(|c| c.to_string()).collect(),
        }
    }

    fn alias(name: &str, parent: &str) -> Self {
        Self {
            name: name.to_string(),
            description: format!("Same battery as {}", parent),
            extends: Some(parent.to_string()),
            pre_enable: None,
            commands: Vec::new(),
        }
    }

    /// Validate the profile shape.
    pub fn validate(&self) -> ProfileResult<()> {
        if self.name.is_empty()
            || !self
                .name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ProfileError::Invalid {
                name: self.name.clone(),
                reason: "name can only contain alphanumeric characters, hyphens, and underscores"
                    .to_string(),
            });
        }

        if self.extends.is_none() && self.commands.is_empty() {
            return Err(ProfileError::Invalid {
                name: self.name.clone(),
                reason: "a profile without `extends` needs at least one command".to_string(),
            });
        }

        if self.commands.iter().any(|c| c.trim().is_empty()) {
            return Err(ProfileError::Invalid {
                name: self.name.clone(),
                reason: "blank command".to_string(),
            });
        }

        Ok(())
    }

    /// Built-in vendor profiles.
    pub fn builtins() -> Vec<CommandProfile> {
        vec![
            Self::new(
                "cisco_ios",
                "Cisco IOS and IOS-XE",
                true,
                &["terminal length 0", "show version", "show lldp neighbors detail"],
            ),
            Self::alias("cisco_ios_telnet", "cisco_ios"),
            Self::new(
                "hp_procurve",
                "HP/Aruba ProCurve",
                false,
                &["show version", "show lldp info remote-device detail"],
            ),
            Self::alias("hp_procurve_telnet", "hp_procurve"),
            Self::new(
                "juniper_junos",
                "Juniper Junos",
                false,
                &["show version", "show lldp neighbors detail"],
            ),
            Self::alias("juniper_junos_telnet", "juniper_junos"),
            Self::new(
                "dlink",
                "D-Link DES/DGS",
                false,
                &[
                    "show version",
                    "show lldp remote_ports",
                    "show vlan",
                    "show interfaces status",
                ],
            ),
            Self::alias("dlink_telnet", "dlink"),
            Self::new(
                "nis",
                "NIS access switches",
                false,
                &[
                    "show running-config",
                    "show interface * status",
                    "show lldp neighbors",
                ],
            ),
            Self::alias("nis_telnet", "nis"),
            Self::new(
                "snr",
                "SNR switches",
                false,
                &[
                    "show version",
                    "show lldp neighbors brief",
                    "show running-config",
                ],
            ),
            Self::new(
                GENERIC_PROFILE,
                "Fallback for unknown vendors",
                false,
                &["show version"],
            ),
            Self::alias("generic_telnet", GENERIC_PROFILE),
        ]
    }
}

/// Holds built-in and user profiles and resolves `extends` chains.
#[derive(Debug, Clone)]
pub struct ProfileManager {
    profiles: BTreeMap<String, CommandProfile>,
}

impl ProfileManager {
    /// Built-in profiles only.
    pub fn builtin() -> Self {
        let profiles = CommandProfile::builtins()
            .into_iter()
            .map(|p| (p.name.clone(), p))
            .collect();
        Self { profiles }
    }

    /// Built-ins plus user profiles from the profiles directory.
    pub fn load(paths: &Paths) -> ProfileResult<Self> {
        let mut manager = Self::builtin();
        manager.load_dir(&paths.profiles_dir())?;
        Ok(manager)
    }

    /// Merge every `*.json` profile in `dir`; later files win over built-ins.
    pub fn load_dir(&mut self, dir: &Path) -> ProfileResult<()> {
        if !dir.exists() {
            return Ok(());
        }

        let read_err = |e: std::io::Error| {
            ProfileError::Config(ConfigError::ReadFailed {
                path: dir.to_path_buf(),
                reason: e.to_string(),
            })
        };

        let mut files: Vec<_> = fs::read_dir(dir)
            .map_err(read_err)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .collect();
        files.sort();

        for path in files {
            let parsed = fs::read_to_string(&path)
                .map_err(|e| e.to_string())
                .and_then(|s| serde_json::from_str::<CommandProfile>(&s).map_err(|e| e.to_string()));
            match parsed {
                Ok(profile) => {
                    if let Err(e) = profile.validate() {
                        warn!(path = %path.display(), error = %e, "Skipping invalid profile");
                        continue;
                    }
                    debug!(name = %profile.name, path = %path.display(), "Loaded user profile");
                    self.profiles.insert(profile.name.clone(), profile);
                }
                Err(reason) => {
                    warn!(path = %path.display(), %reason, "Skipping unreadable profile");
                }
            }
        }

        Ok(())
    }

    /// Get a raw profile by name.
    pub fn get(&self, name: &str) -> Option<&CommandProfile> {
        self.profiles.get(name)
    }

    /// List all profiles, sorted by name.
    pub fn list(&self) -> Vec<&CommandProfile> {
        self.profiles.values().collect()
    }

    /// Flatten a profile's `extends` chain.
    pub fn resolve(&self, name: &str) -> ProfileResult<ResolvedProfile> {
        let mut chain = Vec::new();
        let mut seen = BTreeSet::new();
        let mut current = name;

        loop {
            if !seen.insert(current.to_string()) {
                return Err(ProfileError::ExtendsCycle(name.to_string()));
            }
            let profile = self
                .profiles
                .get(current)
                .ok_or_else(|| ProfileError::NotFound(current.to_string()))?;
            chain.push(profile);
            match &profile.extends {
                Some(parent) => current = parent,
                None => break,
            }
        }

        // Walk from the root ancestor down so children override parents.
        let mut pre_enable = false;
        let mut commands: Vec<String> = Vec::new();
        for profile in chain.iter().rev() {
            if let Some(flag) = profile.pre_enable {
                pre_enable = flag;
            }
            if !profile.commands.is_empty() {
                commands = profile.commands.clone();
            }
        }

        Ok(ResolvedProfile {
            name: name.to_string(),
            pre_enable,
            commands,
        })
    }

    /// Resolve the profile for a vendor id, trying the id itself, then the id
    /// without a `_telnet` suffix, then the generic profile.
    pub fn for_vendor(&self, vendor: Option<&str>) -> ProfileResult<ResolvedProfile> {
        if let Some(vendor) = vendor {
            for candidate in [vendor, vendor.trim_end_matches("_telnet")] {
                if self.profiles.contains_key(candidate) {
                    return self.resolve(candidate);
                }
            }
            debug!(%vendor, "No profile for vendor, using generic");
        }
        self.resolve(GENERIC_PROFILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_profiles_validate() {
        for profile in CommandProfile::builtins() {
            assert!(profile.validate().is_ok(), "{}", profile.name);
        }
    }

    #[test]
    fn test_extends_inherits_commands_and_enable() {
        let manager = ProfileManager::builtin();
        let resolved = manager.resolve("cisco_ios_telnet").unwrap();
        assert!(resolved.pre_enable);
        assert_eq!(resolved.commands[0], "terminal length 0");
        assert_eq!(resolved.name, "cisco_ios_telnet");
    }

    #[test]
    fn test_unknown_vendor_falls_back_to_generic() {
        let manager = ProfileManager::builtin();
        let resolved = manager.for_vendor(Some("mikrotik")).unwrap();
        assert_eq!(resolved.name, GENERIC_PROFILE);
        assert_eq!(resolved.commands, vec!["show version".to_string()]);
        assert_eq!(manager.for_vendor(None).unwrap().name, GENERIC_PROFILE);
    }

    #[test]
    fn test_extends_cycle_detected() {
        let mut manager = ProfileManager::builtin();
        manager
            .profiles
            .insert("a".into(), CommandProfile::alias("a", "b"));
        manager
            .profiles
            .insert("b".into(), CommandProfile::alias("b", "a"));
        assert!(matches!(
            manager.resolve("a"),
            Err(ProfileError::ExtendsCycle(_))
        ));
    }

    #[test]
    fn test_user_profile_overrides_builtin() {
        let dir = tempfile::tempdir().unwrap();
        let user = r#"{ "name": "dlink", "commands": ["show switch", "show lldp remote_ports"] }"#;
        fs::write(dir.path().join("dlink.json"), user).unwrap();
        fs::write(dir.path().join("broken.json"), "{ not json").unwrap();

        let mut manager = ProfileManager::builtin();
        manager.load_dir(dir.path()).unwrap();

        let resolved = manager.resolve("dlink").unwrap();
        assert_eq!(resolved.commands[0], "show switch");
        assert!(!resolved.pre_enable);
    }

    #[test]
    fn test_profile_validation() {
        let mut profile = CommandProfile::new("test", "", false, &["show version"]);
        assert!(profile.validate().is_ok());

        profile.name = "test!@#".to_string();
        assert!(profile.validate().is_err());

        let empty = CommandProfile::new("empty", "", false, &[]);
        assert!(empty.validate().is_err());
    }
}
