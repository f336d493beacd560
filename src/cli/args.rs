//! Argument groups shared by several subcommands.

use crate::config::Settings;
use crate::error::{CliError, CliResult};
use crate::render::{Direction, LabelVerbosity};
use crate::session::{Credentials, Protocol};
use crate::types::PortList;
use clap::Args;
use std::fmt;
use std::path::PathBuf;

/// Session credentials. Values from the environment are never echoed in
/// help output.
#[derive(Args, Clone, Default)]
pub struct CredentialArgs {
    /// Login username
    #[arg(short = 'u', long, env = "NETDOCS_USER", hide_env_values = true)]
    pub username: Option<String>,

    /// Login password
    #[arg(long, env = "NETDOCS_PASS", hide_env_values = true)]
    pub password: Option<String>,

    /// Secret for privileged (enable) mode
    #[arg(long, env = "NETDOCS_ENABLE", hide_env_values = true)]
    pub enable_secret: Option<String>,
}

impl fmt::Debug for CredentialArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialArgs")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("enable_secret", &self.enable_secret.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl CredentialArgs {
    pub fn credentials(&self) -> CliResult<Credentials> {
        let username = self
            .username
            .clone()
            .ok_or_else(|| CliError::Other("username required (--username or NETDOCS_USER)".into()))?;
        let password = self
            .password
            .clone()
            .ok_or_else(|| CliError::Other("password required (--password or NETDOCS_PASS)".into()))?;
        Ok(Credentials::new(username, password).with_enable_secret(self.enable_secret.clone()))
    }
}

/// Overrides for probe and collect settings.
#[derive(Args, Debug, Clone, Default)]
pub struct TuningArgs {
    /// Management ports to probe (e.g. "22,23")
    #[arg(short, long)]
    pub ports: Option<String>,

    /// Probe timeout in milliseconds
    #[arg(long, value_name = "MS")]
    pub probe_timeout: Option<u64>,

    /// Concurrent probe connections
    #[arg(long, value_name = "N")]
    pub probe_workers: Option<usize>,

    /// Probe connection attempts per second (0 = unlimited)
    #[arg(short = 'r', long = "rate", value_name = "PPS")]
    pub rate_limit: Option<u32>,

    /// Treat every target as reachable and skip probing
    #[arg(long)]
    pub no_probe: bool,

    /// Concurrent CLI sessions
    #[arg(short = 'w', long, value_name = "N")]
    pub workers: Option<usize>,

    /// Connect timeout in milliseconds
    #[arg(long, value_name = "MS")]
    pub connect_timeout: Option<u64>,

    /// Authentication timeout in milliseconds
    #[arg(long, value_name = "MS")]
    pub auth_timeout: Option<u64>,

    /// Per-command timeout in milliseconds
    #[arg(long, value_name = "MS")]
    pub command_timeout: Option<u64>,

    /// Per-host deadline in milliseconds (minimum 10000)
    #[arg(long, value_name = "MS")]
    pub deadline: Option<u64>,

    /// Transport tried first
    #[arg(long, value_enum)]
    pub protocol: Option<Protocol>,

    /// Never fall back to the other transport
    #[arg(long)]
    pub no_fallback: bool,

    /// Command profile for every host (e.g. cisco_ios)
    #[arg(long, value_name = "VENDOR")]
    pub prefer_vendor: Option<String>,

    /// Extra addresses or CIDR blocks never to contact
    #[arg(short = 'x', long, value_name = "ADDR|CIDR")]
    pub exclude: Vec<String>,

    /// Parse worker threads (0 = auto)
    #[arg(long, value_name = "N")]
    pub parse_workers: Option<usize>,

    /// Inventory mapping file
    #[arg(long, value_name = "PATH")]
    pub inventory: Option<PathBuf>,

    /// Directory of extra parse templates
    #[arg(long, value_name = "DIR")]
    pub templates_dir: Option<PathBuf>,
}

impl TuningArgs {
    /// Settings with these flags applied on top.
    pub fn apply(&self, mut settings: Settings) -> CliResult<Settings> {
        if let Some(ports) = &self.ports {
            settings.probe.ports = ports.parse::<PortList>().map_err(|e| CliError::Other(e.to_string()))?;
        }
        if let Some(ms) = self.probe_timeout {
            settings.probe.timeout_ms = ms;
        }
        if let Some(n) = self.probe_workers {
            settings.probe.workers = n;
        }
        if let Some(rate) = self.rate_limit {
            settings.probe.rate_limit = rate;
        }
        if let Some(n) = self.workers {
            settings.collect.workers = n;
        }
        if let Some(ms) = self.connect_timeout {
            settings.collect.connect_timeout_ms = ms;
        }
        if let Some(ms) = self.auth_timeout {
            settings.collect.auth_timeout_ms = ms;
        }
        if let Some(ms) = self.command_timeout {
            settings.collect.command_timeout_ms = ms;
        }
        if let Some(ms) = self.deadline {
            settings.collect.host_deadline_ms = ms;
        }
        if let Some(primary) = self.protocol {
            settings.collect.primary = primary;
            settings.collect.fallback = match primary {
                Protocol::Ssh => Some(Protocol::Telnet),
                Protocol::Telnet => Some(Protocol::Ssh),
            };
        }
        if self.no_fallback {
            settings.collect.fallback = None;
        }
        if let Some(vendor) = &self.prefer_vendor {
            settings.prefer_vendor = Some(vendor.clone());
        }
        settings.exclude.extend(self.exclude.iter().cloned());
        if let Some(n) = self.parse_workers {
            settings.parse.workers = n;
        }
        if let Some(path) = &self.inventory {
            settings.inventory = Some(path.clone());
        }
        if let Some(dir) = &self.templates_dir {
            settings.templates_dir = Some(dir.clone());
        }
        settings.validate()?;
        Ok(settings)
    }
}

/// Overrides for diagram options.
#[derive(Args, Debug, Clone, Default)]
pub struct RenderArgs {
    /// Flowchart direction
    #[arg(long, value_enum)]
    pub direction: Option<Direction>,

    /// Do not group nodes by site and role
    #[arg(long)]
    pub no_subgraphs: bool,

    /// Leave interface names off edges
    #[arg(long)]
    pub no_ports: bool,

    /// How much each node label says
    #[arg(long, value_enum)]
    pub labels: Option<LabelVerbosity>,
}

impl RenderArgs {
    pub fn apply(&self, mut settings: Settings) -> Settings {
        if let Some(direction) = self.direction {
            settings.render.direction = direction;
        }
        if self.no_subgraphs {
            settings.render.subgraphs = false;
        }
        if self.no_ports {
            settings.render.show_ports = false;
        }
        if let Some(labels) = self.labels {
            settings.render.verbosity = labels;
        }
        settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tuning_overrides() {
        let args = TuningArgs {
            workers: Some(4),
            deadline: Some(30_000),
            protocol: Some(Protocol::Telnet),
            exclude: vec!["10.9.0.0/16".to_string()],
            ..Default::default()
        };
        let settings = args.apply(Settings::default()).unwrap();
        assert_eq!(settings.collect.workers, 4);
        assert_eq!(settings.collect.host_deadline_ms, 30_000);
        assert_eq!(settings.collect.primary, Protocol::Telnet);
        assert_eq!(settings.collect.fallback, Some(Protocol::Ssh));
        assert_eq!(settings.exclude, vec!["10.9.0.0/16".to_string()]);
    }

    #[test]
    fn test_invalid_override_rejected() {
        let args = TuningArgs {
            workers: Some(0),
            ..Default::default()
        };
        assert!(args.apply(Settings::default()).is_err());
    }

    #[test]
    fn test_credentials_required_and_redacted() {
        let args = CredentialArgs {
            username: Some("netops".into()),
            password: Some("hunter2".into()),
            enable_secret: None,
        };
        assert!(args.credentials().is_ok());
        assert!(!format!("{:?}", args).contains("hunter2"));

        let missing = CredentialArgs::default();
        assert!(missing.credentials().is_err());
    }
}
