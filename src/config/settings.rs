//! Application settings and paths.
//!
//! Manages XDG-compliant paths for configuration and data, and the tunables
//! for every pipeline stage. Every field has a documented default and can be
//! overridden independently from the settings file or the command line.

use crate::error::{ConfigError, ConfigResult};
use crate::render::RenderOptions;
use crate::session::Protocol;
use crate::types::PortList;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application directory paths following the XDG Base Directory Specification.
#[derive(Debug, Clone)]
pub struct Paths {
    /// Configuration directory (~/.config/netdocs)
    pub config_dir: PathBuf,
    /// Data directory (~/.local/share/netdocs)
    pub data_dir: PathBuf,
}

impl Paths {
    /// Resolve paths using XDG directories, creating them if needed.
    pub fn discover() -> ConfigResult<Self> {
        let project =
            ProjectDirs::from("com", "netdocs", "netdocs").ok_or(ConfigError::DirectoryNotFound)?;

        Self::at(project.config_dir(), project.data_dir())
    }

    /// Use explicit directories (tests, `--data-dir`).
    pub fn at(config_dir: &Path, data_dir: &Path) -> ConfigResult<Self> {
        fs::create_dir_all(config_dir)?;
        fs::create_dir_all(data_dir)?;
        Ok(Self {
            config_dir: config_dir.to_path_buf(),
            data_dir: data_dir.to_path_buf(),
        })
    }

    /// Replace the data directory, keeping the config directory.
    pub fn with_data_dir(self, data_dir: &Path) -> ConfigResult<Self> {
        Self::at(&self.config_dir, data_dir)
    }

    /// Get the path to the settings file.
    pub fn settings_file(&self) -> PathBuf {
        self.config_dir.join("settings.json")
    }

    /// Get the path to the command profiles directory.
    pub fn profiles_dir(&self) -> PathBuf {
        self.config_dir.join("profiles")
    }

    /// Default location of the optional inventory mapping.
    pub fn inventory_file(&self) -> PathBuf {
        self.config_dir.join("inventory.json")
    }
}

/// Reachability probe tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeSettings {
    /// Management ports checked on every candidate.
    pub ports: PortList,
    /// Per-connection timeout in milliseconds.
    pub timeout_ms: u64,
    /// Concurrent connection attempts.
    pub workers: usize,
    /// Connection attempts per second, 0 for unlimited.
    pub rate_limit: u32,
    /// Read the SSH banner on open port 22 as a vendor hint.
    pub grab_banner: bool,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            ports: PortList::default(),
            timeout_ms: 1000,
            workers: 64,
            rate_limit: 0,
            grab_banner: true,
        }
    }
}

/// CLI session tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectSettings {
    pub connect_timeout_ms: u64,
    pub auth_timeout_ms: u64,
    /// Read timeout for a single command's output.
    pub command_timeout_ms: u64,
    /// Wall-clock ceiling for one host, across all of its steps.
    pub host_deadline_ms: u64,
    /// Concurrent live sessions.
    pub workers: usize,
    /// Interval between progress heartbeats, 0 disables them.
    pub heartbeat_secs: u64,
    /// Transport tried first.
    pub primary: Protocol,
    /// Transport tried once when the primary cannot connect.
    pub fallback: Option<Protocol>,
}

impl Default for CollectSettings {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 3000,
            auth_timeout_ms: 12_000,
            command_timeout_ms: 45_000,
            host_deadline_ms: 90_000,
            workers: 20,
            heartbeat_secs: 30,
            primary: Protocol::Ssh,
            fallback: Some(Protocol::Telnet),
        }
    }
}

impl CollectSettings {
    /// Minimum per-host deadline; shorter values are raised to this.
    pub const MIN_HOST_DEADLINE: Duration = Duration::from_secs(10);

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn auth_timeout(&self) -> Duration {
        Duration::from_millis(self.auth_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn host_deadline(&self) -> Duration {
        Duration::from_millis(self.host_deadline_ms).max(Self::MIN_HOST_DEADLINE)
    }

    pub fn heartbeat(&self) -> Option<Duration> {
        (self.heartbeat_secs > 0).then(|| Duration::from_secs(self.heartbeat_secs))
    }
}

/// Parse stage tunables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ParseSettings {
    /// Parse worker threads, 0 picks the available parallelism (max 32).
    pub workers: usize,
}

impl ParseSettings {
    pub fn effective_workers(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
            .min(32)
    }
}

/// A vendor hint for every address inside a CIDR block.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VendorHint {
    pub cidr: String,
    pub vendor: String,
}

/// Application-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    pub probe: ProbeSettings,
    pub collect: CollectSettings,
    pub parse: ParseSettings,
    pub render: RenderOptions,
    /// Addresses and CIDR blocks never contacted or reported.
    pub exclude: Vec<String>,
    /// Per-range vendor hints used to pick a command profile.
    pub vendor_hints: Vec<VendorHint>,
    /// Force one command profile for every host.
    pub prefer_vendor: Option<String>,
    /// Inventory mapping file; `<config>/inventory.json` when unset.
    pub inventory: Option<PathBuf>,
    /// Directory of extra parse templates.
    pub templates_dir: Option<PathBuf>,
}

impl Settings {
    /// Load settings from the default location, falling back to defaults.
    pub fn load(paths: &Paths) -> ConfigResult<Self> {
        let file = paths.settings_file();

        if !file.exists() {
            return Ok(Self::default());
        }

        Self::load_from(&file)
    }

    /// Load settings from a specific file.
    pub fn load_from(path: &Path) -> ConfigResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::ReadFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let settings: Self =
            serde_json::from_str(&content).map_err(|e| ConfigError::InvalidFormat(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Save settings to the default location.
    pub fn save(&self, paths: &Paths) -> ConfigResult<()> {
        let file = paths.settings_file();
        let content = serde_json::to_string_pretty(self)?;
        fs::write(&file, content).map_err(|e| ConfigError::WriteFailed {
            path: file,
            reason: e.to_string(),
        })
    }

    /// Reject values that would stall or disable a stage.
    pub fn validate(&self) -> ConfigResult<()> {
        let checks: [(&str, u64); 7] = [
            ("probe.timeout_ms", self.probe.timeout_ms),
            ("probe.workers", self.probe.workers as u64),
            ("collect.connect_timeout_ms", self.collect.connect_timeout_ms),
            ("collect.auth_timeout_ms", self.collect.auth_timeout_ms),
            ("collect.command_timeout_ms", self.collect.command_timeout_ms),
            ("collect.host_deadline_ms", self.collect.host_deadline_ms),
            ("collect.workers", self.collect.workers as u64),
        ];
        for (field, value) in checks {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        if self.probe.ports.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "probe.ports".to_string(),
                reason: "at least one management port is required".to_string(),
            });
        }
        if self.collect.fallback == Some(self.collect.primary) {
            return Err(ConfigError::InvalidValue {
                field: "collect.fallback".to_string(),
                reason: "fallback must differ from the primary protocol".to_string(),
            });
        }
        Ok(())
    }

    /// The inventory file to read, if any.
    pub fn inventory_path(&self, paths: &Paths) -> PathBuf {
        self.inventory
            .clone()
            .unwrap_or_else(|| paths.inventory_file())
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe.timeout_ms)
    }
}
