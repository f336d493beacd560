//! Vendor and hostname heuristics over raw CLI text.
//!
//! Used by the collector to pick a command profile when no hint is
//! configured, and by the parser to pick templates for captures whose vendor
//! is unknown.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// Where a capture's vendor id came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VendorSource {
    /// `prefer_vendor` setting or flag.
    Preferred,
    /// A `vendor_hints` CIDR entry.
    RangeHint,
    /// The SSH identification banner.
    Banner,
    /// Signatures in command output.
    Detected,
}

impl fmt::Display for VendorSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Preferred => write!(f, "preferred"),
            Self::RangeHint => write!(f, "range hint"),
            Self::Banner => write!(f, "banner"),
            Self::Detected => write!(f, "detected"),
        }
    }
}

/// Signature table, checked in order. Earlier entries are more specific.
const SIGNATURES: &[(&str, &[&str])] = &[
    ("mikrotik", &["routeros", "mikrotik", "rosssh"]),
    ("eltex_mes", &["eltex", " mes1", " mes2", " mes3", " mes5"]),
    ("huawei_vrp", &["huawei", " vrp"]),
    ("dlink", &["d-link", " dgs", " des-", "dgs-"]),
    ("qtech", &["qtech", " qsw"]),
    ("juniper_junos", &["junos", "juniper"]),
    ("hp_procurve", &["procurve", "aruba"]),
    ("snr", &["snr-s"]),
    ("cisco_ios", &["cisco ios", "ios-xe", "cisco"]),
];

/// Guess a vendor id from a text sample. Only the first few kilobytes are
/// inspected.
pub fn guess_vendor(text: &str) -> Option<&'static str> {
    let head: String = text.chars().take(4000).collect::<String>().to_lowercase();
    SIGNATURES
        .iter()
        .find(|(_, needles)| needles.iter().any(|n| head.contains(n)))
        .map(|(vendor, _)| *vendor)
}

fn hostname_config_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^\s*(?:hostname|sysname)\s+([\w\-.]+)").expect("valid hostname pattern")
    })
}

fn uptime_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^\s*([\w\-.]+)\s+uptime is\s+").expect("valid uptime pattern")
    })
}

/// Hostname reported in command output (`hostname X` in a config dump,
/// or `X uptime is ...` in `show version`).
pub fn hostname_from_output(text: &str) -> Option<String> {
    hostname_config_re()
        .captures(text)
        .or_else(|| uptime_re().captures(text))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Hostname embedded in a CLI prompt.
///
/// Handles `sw1#`, `sw1(config)#`, `<HUAWEI>`, `[admin@MikroTik] >`,
/// `user@router>` and `DGS-3120:admin#`.
pub fn hostname_from_prompt(prompt: &str) -> Option<String> {
    let trimmed = prompt
        .trim()
        .trim_end_matches(['#', '>', '$', '%'])
        .trim()
        .trim_start_matches(['<', '['])
        .trim_end_matches([']', '>']);
    let base = trimmed.split('(').next().unwrap_or(trimmed);
    let base = base.rsplit('@').next().unwrap_or(base);
    let base = match base.split_once(':') {
        Some((host, _user)) => host,
        None => base,
    };
    let base = base.trim();
    (!base.is_empty()).then(|| base.to_string())
}

/// Site code from a `SITE-...` hostname: an alphabetic first token of at
/// least three letters.
pub fn site_from_hostname(hostname: &str) -> Option<String> {
    let (first, _) = hostname.split_once('-')?;
    (first.len() >= 3 && first.chars().all(|c| c.is_ascii_alphabetic()))
        .then(|| first.to_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guess_vendor_signatures() {
        assert_eq!(
            guess_vendor("Cisco IOS Software, C2960X Software"),
            Some("cisco_ios")
        );
        assert_eq!(guess_vendor("MikroTik RouterOS 6.49"), Some("mikrotik"));
        assert_eq!(guess_vendor("Huawei Versatile Routing Platform"), Some("huawei_vrp"));
        assert_eq!(guess_vendor("Device Type : DGS-3120-24TC"), Some("dlink"));
        assert_eq!(guess_vendor("Eltex MES2324"), Some("eltex_mes"));
        assert_eq!(guess_vendor("nothing to see"), None);
    }

    #[test]
    fn test_hostname_from_output() {
        assert_eq!(
            hostname_from_output("!\nhostname DEN-CORE-01\n!").as_deref(),
            Some("DEN-CORE-01")
        );
        assert_eq!(
            hostname_from_output("sw-acc-3 uptime is 4 weeks, 2 days").as_deref(),
            Some("sw-acc-3")
        );
        assert_eq!(hostname_from_output("no hints here"), None);
    }

    #[test]
    fn test_hostname_from_prompt() {
        assert_eq!(hostname_from_prompt("sw1#").as_deref(), Some("sw1"));
        assert_eq!(hostname_from_prompt("sw1(config)#").as_deref(), Some("sw1"));
        assert_eq!(hostname_from_prompt("<HUAWEI-AGG>").as_deref(), Some("HUAWEI-AGG"));
        assert_eq!(hostname_from_prompt("[admin@MikroTik] >").as_deref(), Some("MikroTik"));
        assert_eq!(hostname_from_prompt("netops@edge-1>").as_deref(), Some("edge-1"));
        assert_eq!(hostname_from_prompt("DGS-3120:admin#").as_deref(), Some("DGS-3120"));
        assert_eq!(hostname_from_prompt("#"), None);
    }

    #[test]
    fn test_site_from_hostname() {
        assert_eq!(site_from_hostname("den-core-10").as_deref(), Some("DEN"));
        assert_eq!(site_from_hostname("ab-core"), None);
        assert_eq!(site_from_hostname("sw1"), None);
        assert_eq!(site_from_hostname("x12-core"), None);
    }
}
