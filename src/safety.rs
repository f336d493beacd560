//! Exclusion list for protected address ranges.
//!
//! Addresses inside an excluded range are never probed, never collected and
//! never written to any artifact. The pipeline applies the list at every stage
//! boundary so an address that slips in later (say, as a neighbor reference)
//! is still dropped before rendering.

use crate::error::{ConfigError, ConfigResult};
use ipnetwork::IpNetwork;
use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr};

/// A set of excluded addresses and networks.
#[derive(Debug, Clone, Default)]
pub struct ExclusionList {
    networks: Vec<IpNetwork>,
    addresses: BTreeSet<IpAddr>,
}

impl ExclusionList {
    /// An empty list that excludes nothing.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse exclusion entries.
    ///
    /// Entries are single addresses or CIDR blocks. An IPv4 address ending in
    /// `.0.0` is shorthand for its /16 and one ending in `.0` for its /24.
    pub fn parse<S: AsRef<str>>(entries: &[S]) -> ConfigResult<Self> {
        let mut list = Self::default();
        for entry in entries {
            let entry = entry.as_ref().trim();
            if entry.is_empty() {
                continue;
            }
            list.add(entry)?;
        }
        Ok(list)
    }

    fn add(&mut self, entry: &str) -> ConfigResult<()> {
        if entry.contains('/') {
            let network: IpNetwork = entry
                .parse()
                .map_err(|_| ConfigError::InvalidExclusion(entry.to_string()))?;
            self.networks.push(network);
            return Ok(());
        }

        let ip: IpAddr = entry
            .parse()
            .map_err(|_| ConfigError::InvalidExclusion(entry.to_string()))?;
        match ip {
            IpAddr::V4(v4) => match shorthand_network(v4) {
                Some(network) => self.networks.push(network),
                None => {
                    self.addresses.insert(ip);
                }
            },
            IpAddr::V6(_) => {
                self.addresses.insert(ip);
            }
        }
        Ok(())
    }

    /// Whether an address must be left alone.
    pub fn is_excluded(&self, ip: IpAddr) -> bool {
        self.addresses.contains(&ip) || self.networks.iter().any(|n| n.contains(ip))
    }

    /// Whether a textual identity is an excluded address. Non-address
    /// identities (hostnames) are never excluded by this check.
    pub fn excludes_identity(&self, identity: &str) -> bool {
        identity
            .parse::<IpAddr>()
            .map(|ip| self.is_excluded(ip))
            .unwrap_or(false)
    }

    /// Keep only the items whose address is not excluded, returning how many
    /// were dropped.
    pub fn retain<T, F>(&self, items: &mut Vec<T>, address: F) -> usize
    where
        F: Fn(&T) -> IpAddr,
    {
        let before = items.len();
        items.retain(|item| !self.is_excluded(address(item)));
        before - items.len()
    }

    /// Whether free text names an excluded address anywhere.
    pub fn mentions(&self, text: &str) -> bool {
        !self.is_empty() && address_tokens(text).any(|ip| self.is_excluded(ip))
    }

    /// Remove excluded addresses from captured command output.
    ///
    /// Output split into records by separator rules (`-----`) loses every
    /// record that mentions an excluded address, together with the names
    /// and ports that record gives for it. Output without separators loses
    /// single lines. Returns `None` when nothing had to go.
    pub fn redact_output(&self, text: &str) -> Option<String> {
        if !self.mentions(text) {
            return None;
        }
        let lines: Vec<&str> = text.lines().collect();
        let kept: Vec<&str> = if lines.iter().any(|l| is_separator(l)) {
            let mut blocks: Vec<Vec<&str>> = vec![Vec::new()];
            for line in lines {
                if is_separator(line) && blocks.last().is_some_and(|b| !b.is_empty()) {
                    blocks.push(Vec::new());
                }
                if let Some(block) = blocks.last_mut() {
                    block.push(line);
                }
            }
            blocks
                .into_iter()
                .filter(|block| !block.iter().any(|l| self.mentions(l)))
                .flatten()
                .collect()
        } else {
            lines.into_iter().filter(|l| !self.mentions(l)).collect()
        };
        Some(kept.join("\n"))
    }

    pub fn is_empty(&self) -> bool {
        self.networks.is_empty() && self.addresses.is_empty()
    }

    /// Number of entries, for logging.
    pub fn len(&self) -> usize {
        self.networks.len() + self.addresses.len()
    }
}

/// Every token of `text` that reads as an address.
fn address_tokens(text: &str) -> impl Iterator<Item = IpAddr> + '_ {
    text.split(|c: char| !(c.is_ascii_hexdigit() || c == '.' || c == ':'))
        .map(|token| token.trim_matches(|c: char| c == '.' || c == ':'))
        .filter(|token| token.len() >= 2)
        .filter_map(|token| token.parse::<IpAddr>().ok())
}

fn is_separator(line: &str) -> bool {
    let line = line.trim();
    line.len() >= 3 && line.chars().all(|c| c == '-' || c == '=')
}

fn shorthand_network(ip: Ipv4Addr) -> Option<IpNetwork> {
    let [a, b, c, d] = ip.octets();
    if ip.is_unspecified() {
        return None;
    }
    let (base, prefix) = if c == 0 && d == 0 {
        (Ipv4Addr::new(a, b, 0, 0), 16)
    } else if d == 0 {
        (Ipv4Addr::new(a, b, c, 0), 24)
    } else {
        return None;
    };
    IpNetwork::new(IpAddr::V4(base), prefix).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_single_address() {
        let list = ExclusionList::parse(&["10.0.0.5"]).unwrap();
        assert!(list.is_excluded(ip("10.0.0.5")));
        assert!(!list.is_excluded(ip("10.0.0.6")));
    }

    #[test]
    fn test_cidr_block() {
        let list = ExclusionList::parse(&["192.168.10.0/25"]).unwrap();
        assert!(list.is_excluded(ip("192.168.10.100")));
        assert!(!list.is_excluded(ip("192.168.10.200")));
    }

    #[test]
    fn test_zero_octet_shorthand() {
        let list = ExclusionList::parse(&["10.50.0.0", "172.16.4.0"]).unwrap();
        assert!(list.is_excluded(ip("10.50.200.1")));
        assert!(list.is_excluded(ip("172.16.4.77")));
        assert!(!list.is_excluded(ip("172.16.5.1")));
    }

    #[test]
    fn test_invalid_entry() {
        assert!(ExclusionList::parse(&["not-an-ip"]).is_err());
        assert!(ExclusionList::parse(&["10.0.0.0/40"]).is_err());
    }

    #[test]
    fn test_retain_counts_dropped() {
        let list = ExclusionList::parse(&["10.0.0.2"]).unwrap();
        let mut hosts = vec![ip("10.0.0.1"), ip("10.0.0.2"), ip("10.0.0.3")];
        assert_eq!(list.retain(&mut hosts, |h| *h), 1);
        assert_eq!(hosts.len(), 2);
    }

    #[test]
    fn test_mentions_whole_addresses_only() {
        let list = ExclusionList::parse(&["10.0.0.2"]).unwrap();
        assert!(list.mentions("    IP: 10.0.0.2"));
        assert!(list.mentions("peer 10.0.0.2/32 is up"));
        assert!(!list.mentions("    IP: 10.0.0.20"));
        assert!(!list.mentions("Chassis id: 0011.2233.4455, uptime 12:30:45"));
    }

    #[test]
    fn test_redact_drops_separated_records() {
        let list = ExclusionList::parse(&["10.0.0.0/30"]).unwrap();
        let output = "------\nSystem Name: sw-b\n    IP: 10.0.0.2\n------\nSystem Name: sw-c\n    IP: 10.0.0.9";
        let redacted = list.redact_output(output).unwrap();
        assert_eq!(redacted, "------\nSystem Name: sw-c\n    IP: 10.0.0.9");
    }

    #[test]
    fn test_redact_drops_table_lines() {
        let list = ExclusionList::parse(&["10.0.0.2"]).unwrap();
        let output = "Internet  10.0.0.1  0  aabb.cc00.0100  ARPA  Vlan10\nInternet  10.0.0.2  4  aabb.cc00.0200  ARPA  Vlan10";
        assert_eq!(
            list.redact_output(output).as_deref(),
            Some("Internet  10.0.0.1  0  aabb.cc00.0100  ARPA  Vlan10")
        );
        assert_eq!(list.redact_output("nothing to see"), None);
    }

    #[test]
    fn test_identity_check_ignores_hostnames() {
        let list = ExclusionList::parse(&["10.0.0.0/24"]).unwrap();
        assert!(list.excludes_identity("10.0.0.9"));
        assert!(!list.excludes_identity("core-sw1"));
    }
}
