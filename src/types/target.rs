//! Target specification types with CIDR support.
//!
//! Targets are single IP addresses or CIDR blocks; no hostname, wildcard or
//! regex syntax is accepted. Each block expands to its candidate host list.

use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

/// Error type for target parsing.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TargetError {
    #[error("invalid target format: {0}")]
    InvalidFormat(String),
    #[error("invalid CIDR notation: {0}")]
    InvalidCidr(String),
    #[error("CIDR range too large: {0} addresses (max: {1})")]
    CidrTooLarge(u128, u128),
}

/// A target specification: one address or one CIDR block.
///
/// Supports:
/// - Single IP: "192.168.1.1"
/// - CIDR: "192.168.1.0/24"
/// - IPv6: "::1", "2001:db8::/120"
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TargetSpec {
    /// A single IP address.
    Single(IpAddr),
    /// A CIDR network range.
    Cidr(IpNetwork),
}

impl TargetSpec {
    /// Maximum number of hosts allowed in a CIDR range.
    pub const MAX_CIDR_HOSTS: u128 = 65536; // /16 for IPv4

    /// Parse a target specification from a string.
    pub fn parse(s: &str) -> Result<Self, TargetError> {
        let s = s.trim();

        if let Ok(ip) = s.parse::<IpAddr>() {
            return Ok(Self::Single(ip));
        }

        if s.contains('/') {
            let network: IpNetwork = s
                .parse()
                .map_err(|_| TargetError::InvalidCidr(s.to_string()))?;

            let host_count = block_size(&network);
            if host_count > Self::MAX_CIDR_HOSTS {
                return Err(TargetError::CidrTooLarge(host_count, Self::MAX_CIDR_HOSTS));
            }

            return Ok(Self::Cidr(network));
        }

        Err(TargetError::InvalidFormat(s.to_string()))
    }

    /// Expand this specification to its candidate host addresses.
    ///
    /// Network and broadcast addresses are skipped for IPv4 prefixes shorter
    /// than /31.
    pub fn hosts(&self) -> Vec<IpAddr> {
        match self {
            Self::Single(ip) => vec![*ip],
            Self::Cidr(network) => network
                .iter()
                .filter(|ip| {
                    if let (IpNetwork::V4(net), IpAddr::V4(addr)) = (network, ip) {
                        if net.prefix() < 31 {
                            return *addr != net.network() && *addr != net.broadcast();
                        }
                    }
                    true
                })
                .collect(),
        }
    }
}

fn block_size(network: &IpNetwork) -> u128 {
    match network {
        IpNetwork::V4(net) => net.size() as u128,
        IpNetwork::V6(net) => {
            let prefix = net.prefix() as u32;
            if prefix >= 128 {
                1
            } else if prefix == 0 {
                u128::MAX
            } else {
                1u128 << (128 - prefix)
            }
        }
    }
}

/// Expand several specifications into one de-duplicated host list,
/// preserving first-seen order.
pub fn expand_targets(specs: &[TargetSpec]) -> Vec<IpAddr> {
    let mut seen = HashSet::new();
    specs
        .iter()
        .flat_map(TargetSpec::hosts)
        .filter(|ip| seen.insert(*ip))
        .collect()
}

impl FromStr for TargetSpec {
    type Err = TargetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for TargetSpec {
    type Error = TargetError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TargetSpec> for String {
    fn from(spec: TargetSpec) -> Self {
        spec.to_string()
    }
}

impl fmt::Display for TargetSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single(ip) => write!(f, "{}", ip),
            Self::Cidr(network) => write!(f, "{}", network),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ipv4() {
        let spec = TargetSpec::parse("192.168.1.1").unwrap();
        assert!(matches!(spec, TargetSpec::Single(IpAddr::V4(_))));
    }

    #[test]
    fn test_parse_cidr_v4() {
        let spec = TargetSpec::parse("192.168.1.0/24").unwrap();
        if let TargetSpec::Cidr(network) = spec {
            assert_eq!(network.prefix(), 24);
        } else {
            panic!("Expected CIDR");
        }
    }

    #[test]
    fn test_hostnames_are_rejected() {
        assert!(matches!(
            TargetSpec::parse("core-sw.example.com"),
            Err(TargetError::InvalidFormat(_))
        ));
        assert!(TargetSpec::parse("10.0.0.*").is_err());
    }

    #[test]
    fn test_cidr_too_large() {
        let result = TargetSpec::parse("10.0.0.0/8");
        assert!(matches!(result, Err(TargetError::CidrTooLarge(_, _))));
    }

    #[test]
    fn test_hosts_skip_network_and_broadcast() {
        let spec = TargetSpec::parse("10.20.98.0/30").unwrap();
        let hosts = spec.hosts();
        assert_eq!(
            hosts,
            vec!["10.20.98.1".parse::<IpAddr>().unwrap(), "10.20.98.2".parse().unwrap()]
        );
    }

    #[test]
    fn test_point_to_point_keeps_both() {
        let spec = TargetSpec::parse("10.0.0.0/31").unwrap();
        assert_eq!(spec.hosts().len(), 2);
    }

    #[test]
    fn test_expand_dedups_overlap() {
        let specs = vec![
            TargetSpec::parse("10.0.0.0/30").unwrap(),
            TargetSpec::parse("10.0.0.1").unwrap(),
        ];
        let hosts = expand_targets(&specs);
        assert_eq!(hosts.len(), 2);
    }

    #[test]
    fn test_serde_as_string() {
        let spec = TargetSpec::parse("10.1.0.0/24").unwrap();
        let json = serde_json::to_string(&spec).unwrap();
        assert_eq!(json, "\"10.1.0.0/24\"");
        let back: TargetSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(back, spec);
    }
}
