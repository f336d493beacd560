//! Management port types with validation and parsing.
//!
//! The `Port` newtype ensures values are always valid port numbers (1-65535).
//! `PortList` handles the comma-separated lists accepted on the command line.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A validated network port number (1-65535).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct Port(u16);

impl Port {
    /// SSH management port.
    pub const SSH: Port = Port(22);
    /// Telnet management port.
    pub const TELNET: Port = Port(23);

    /// Create a new Port from a u16, returning None if invalid.
    #[inline]
    pub const fn new(port: u16) -> Option<Self> {
        if port >= 1 {
            Some(Self(port))
        } else {
            None
        }
    }

    /// Get the raw port number.
    #[inline]
    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// Well-known name of a management service on this port.
    pub fn service_name(self) -> &'static str {
        match self.0 {
            22 => "ssh",
            23 => "telnet",
            830 => "netconf",
            161 => "snmp",
            443 => "https",
            80 => "http",
            _ => "unknown",
        }
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<u16> for Port {
    type Error = PortError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Self::new(value).ok_or(PortError::OutOfRange(value))
    }
}

impl From<Port> for u16 {
    fn from(port: Port) -> Self {
        port.0
    }
}

/// Error type for port parsing and validation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PortError {
    #[error("port {0} is out of valid range (1-65535)")]
    OutOfRange(u16),
    #[error("invalid port number: {0}")]
    InvalidFormat(String),
    #[error("empty port list")]
    Empty,
}

/// A sorted, de-duplicated list of management ports, e.g. `"22,23"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PortList(Vec<Port>);

impl PortList {
    /// Build a list from ports, sorting and removing duplicates.
    pub fn new(mut ports: Vec<Port>) -> Self {
        ports.sort_unstable();
        ports.dedup();
        Self(ports)
    }

    /// The ports in ascending order.
    pub fn ports(&self) -> &[Port] {
        &self.0
    }

    pub fn contains(&self, port: Port) -> bool {
        self.0.binary_search(&port).is_ok()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for PortList {
    fn default() -> Self {
        Self(vec![Port::SSH, Port::TELNET])
    }
}

impl FromStr for PortList {
    type Err = PortError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut ports = Vec::new();
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let raw: u16 = part
                .parse()
                .map_err(|_| PortError::InvalidFormat(part.to_string()))?;
            ports.push(Port::try_from(raw)?);
        }
        if ports.is_empty() {
            return Err(PortError::Empty);
        }
        Ok(Self::new(ports))
    }
}

impl fmt::Display for PortList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|p| p.to_string()).collect();
        write!(f, "{}", parts.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_validation() {
        assert!(Port::new(0).is_none());
        assert_eq!(Port::new(22), Some(Port::SSH));
        assert!(Port::try_from(0).is_err());
    }

    #[test]
    fn test_port_list_parse_sorts_and_dedups() {
        let list: PortList = "23, 22,23".parse().unwrap();
        assert_eq!(list.ports(), &[Port::SSH, Port::TELNET]);
        assert_eq!(list.to_string(), "22,23");
    }

    #[test]
    fn test_port_list_rejects_garbage() {
        assert!("ssh".parse::<PortList>().is_err());
        assert!("".parse::<PortList>().is_err());
        assert!("0".parse::<PortList>().is_err());
    }

    #[test]
    fn test_default_is_ssh_and_telnet() {
        let list = PortList::default();
        assert!(list.contains(Port::SSH));
        assert!(list.contains(Port::TELNET));
        assert_eq!(Port::SSH.service_name(), "ssh");
    }
}
