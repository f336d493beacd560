//! Per-device datasets merged across runs.
//!
//! A [`DeviceDataset`] holds every row ever parsed for one device identity,
//! grouped by command and keyed by row key. A row is only replaced by a
//! strictly newer observation; an equal timestamp keeps the existing row and,
//! when the content differs, leaves a `merge-tie` note for review.

use crate::error::SessionError;
use crate::parser::{ParsedCapture, ParsedRow, RecordKind};
use crate::safety::ExclusionList;
use crate::types::RunId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;
use tracing::{debug, info};

/// A row plus where it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRow {
    pub fields: BTreeMap<String, String>,
    pub observed_at: DateTime<Utc>,
    pub run_id: RunId,
}

impl StoredRow {
    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields
            .get(field)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }
}

/// All rows of one command type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub kind: RecordKind,
    pub rows: BTreeMap<String, StoredRow>,
}

/// Everything known about one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDataset {
    /// Canonical address the device was collected from.
    pub identity: String,
    pub addresses: BTreeSet<IpAddr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,
    /// Timestamp of the newest capture merged in.
    pub updated_at: DateTime<Utc>,
    /// Session failure of the newest capture, if it failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_failure: Option<SessionError>,
    /// Sections by command.
    pub sections: BTreeMap<String, Section>,
    /// Parse diagnostics of the newest capture.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub diagnostics: BTreeSet<String>,
    /// Conflicts that need a human look.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub review: BTreeSet<String>,
}

impl DeviceDataset {
    /// The dataset a single parsed capture contributes.
    pub fn from_capture(capture: &ParsedCapture) -> Self {
        let mut sections: BTreeMap<String, Section> = BTreeMap::new();
        for record in capture.records.iter().filter(|r| !r.rows.is_empty()) {
            let section = sections
                .entry(record.command.clone())
                .or_insert_with(|| Section {
                    kind: record.kind,
                    rows: BTreeMap::new(),
                });
            for ParsedRow { key, fields } in &record.rows {
                section.rows.insert(
                    key.clone(),
                    StoredRow {
                        fields: fields.clone(),
                        observed_at: capture.captured_at,
                        run_id: capture.run_id,
                    },
                );
            }
        }

        let mut diagnostics: BTreeSet<String> =
            capture.diagnostics().map(str::to_string).collect();
        if let Some(failure) = &capture.session_failure {
            diagnostics.insert(format!("session failed: {}", failure));
        }

        Self {
            identity: capture.address.to_string(),
            addresses: BTreeSet::from([capture.address]),
            hostname: capture.hostname.clone(),
            vendor: capture.vendor.clone(),
            updated_at: capture.captured_at,
            last_failure: capture.session_failure.clone(),
            sections,
            diagnostics,
            review: BTreeSet::new(),
        }
    }

    /// Merge another dataset for the same device into this one.
    pub fn merge(&mut self, other: &DeviceDataset) {
        let other_newer = other.updated_at > self.updated_at;

        for (command, incoming) in &other.sections {
            let section = self
                .sections
                .entry(command.clone())
                .or_insert_with(|| Section {
                    kind: incoming.kind,
                    rows: BTreeMap::new(),
                });
            for (key, row) in &incoming.rows {
                match section.rows.get(key) {
                    None => {
                        section.rows.insert(key.clone(), row.clone());
                    }
                    Some(existing) if row.observed_at > existing.observed_at => {
                        section.rows.insert(key.clone(), row.clone());
                    }
                    Some(existing)
                        if row.observed_at == existing.observed_at
                            && row.fields != existing.fields =>
                    {
                        self.review
                            .insert(format!("merge-tie: {} [{}]", command, key));
                    }
                    Some(_) => {}
                }
            }
        }

        self.addresses.extend(other.addresses.iter().copied());
        self.review.extend(other.review.iter().cloned());

        if other_newer {
            self.updated_at = other.updated_at;
            self.last_failure = other.last_failure.clone();
            self.diagnostics = other.diagnostics.clone();
        }
        // Identity metadata: a newer value wins, a missing one never erases.
        if other.hostname.is_some() && (other_newer || self.hostname.is_none()) {
            self.hostname = other.hostname.clone();
        }
        if other.vendor.is_some() && (other_newer || self.vendor.is_none()) {
            self.vendor = other.vendor.clone();
        }
    }

    /// Drop neighbor rows that point at an excluded management address.
    /// Returns how many were removed.
    pub fn drop_excluded_neighbors(&mut self, exclusions: &ExclusionList) -> usize {
        let mut removed = 0;
        for section in self.sections.values_mut() {
            if section.kind != RecordKind::Neighbors {
                continue;
            }
            let before = section.rows.len();
            section.rows.retain(|_, row| {
                !row
                    .get("mgmt_address")
                    .and_then(|s| s.parse::<IpAddr>().ok())
                    .is_some_and(|ip| exclusions.is_excluded(ip))
            });
            removed += before - section.rows.len();
        }
        self.sections.retain(|_, s| !s.rows.is_empty());
        removed
    }

    /// Every row of a kind, across commands, in key order.
    pub fn rows_of(&self, kind: RecordKind) -> impl Iterator<Item = &StoredRow> {
        self.sections
            .values()
            .filter(move |s| s.kind == kind)
            .flat_map(|s| s.rows.values())
    }

    pub fn row_count(&self) -> usize {
        self.sections.values().map(|s| s.rows.len()).sum()
    }

    /// First non-empty value of a facts field.
    pub fn fact(&self, field: &str) -> Option<&str> {
        self.rows_of(RecordKind::Facts).find_map(|row| row.get(field))
    }
}

/// Result of merging one run into the stored datasets.
#[derive(Debug, Clone, Default)]
pub struct MergeOutcome {
    /// Merged datasets, sorted by identity.
    pub datasets: Vec<DeviceDataset>,
    /// Datasets and captures dropped by the exclusion list.
    pub excluded: usize,
    /// Rows kept on a timestamp tie with differing content.
    pub ties: usize,
}

/// Folds parsed captures into stored datasets, applying exclusions.
#[derive(Debug, Clone)]
pub struct Merger {
    exclusions: ExclusionList,
}

impl Merger {
    pub fn new(exclusions: ExclusionList) -> Self {
        Self { exclusions }
    }

    pub fn merge(&self, stored: Vec<DeviceDataset>, parsed: &[ParsedCapture]) -> MergeOutcome {
        let mut excluded = 0;
        let mut datasets: BTreeMap<String, DeviceDataset> = BTreeMap::new();

        for dataset in stored {
            if self.exclusions.excludes_identity(&dataset.identity) {
                excluded += 1;
                continue;
            }
            match datasets.get_mut(&dataset.identity) {
                Some(existing) => existing.merge(&dataset),
                None => {
                    datasets.insert(dataset.identity.clone(), dataset);
                }
            }
        }

        let ties_before: usize = datasets.values().map(|d| d.review.len()).sum();

        for capture in parsed {
            if self.exclusions.is_excluded(capture.address) {
                excluded += 1;
                continue;
            }
            let incoming = DeviceDataset::from_capture(capture);
            match datasets.get_mut(&incoming.identity) {
                Some(existing) => existing.merge(&incoming),
                None => {
                    debug!(identity = %incoming.identity, "New device dataset");
                    datasets.insert(incoming.identity.clone(), incoming);
                }
            }
        }

        let mut scrubbed = 0;
        for dataset in datasets.values_mut() {
            scrubbed += dataset.drop_excluded_neighbors(&self.exclusions);
        }

        let ties_after: usize = datasets.values().map(|d| d.review.len()).sum();
        let outcome = MergeOutcome {
            datasets: datasets.into_values().collect(),
            excluded,
            ties: ties_after.saturating_sub(ties_before),
        };
        info!(
            datasets = outcome.datasets.len(),
            excluded = outcome.excluded,
            scrubbed,
            ties = outcome.ties,
            "Merge complete"
        );
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ParsedRecord;
    use chrono::TimeZone;
    use std::net::Ipv4Addr;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn neighbors(rows: &[(&str, &str)]) -> ParsedRecord {
        ParsedRecord {
            command: "show lldp neighbors detail".to_string(),
            template: Some("cisco_ios_show_lldp_neighbors_detail".to_string()),
            kind: RecordKind::Neighbors,
            rows: rows
                .iter()
                .map(|(intf, peer)| ParsedRow {
                    key: intf.to_string(),
                    fields: BTreeMap::from([
                        ("local_interface".to_string(), intf.to_string()),
                        ("remote_system_name".to_string(), peer.to_string()),
                    ]),
                })
                .collect(),
            diagnostics: vec![],
        }
    }

    fn parsed(time: i64, rows: &[(&str, &str)]) -> ParsedCapture {
        ParsedCapture {
            address: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            run_id: RunId::new(),
            captured_at: at(time),
            hostname: Some(format!("sw-{}", time)),
            vendor: Some("cisco_ios".to_string()),
            session_failure: None,
            records: vec![neighbors(rows)],
        }
    }

    fn peer_on(dataset: &DeviceDataset, intf: &str) -> String {
        dataset.sections["show lldp neighbors detail"].rows[intf]
            .get("remote_system_name")
            .unwrap()
            .to_string()
    }

    #[test]
    fn test_merge_with_self_is_unchanged() {
        let dataset = DeviceDataset::from_capture(&parsed(0, &[("Gi0/1", "a"), ("Gi0/2", "b")]));
        let mut merged = dataset.clone();
        merged.merge(&dataset);
        assert_eq!(merged, dataset);
    }

    #[test]
    fn test_newer_wins_regardless_of_order() {
        let old = DeviceDataset::from_capture(&parsed(0, &[("Gi0/1", "old-peer"), ("Gi0/2", "kept")]));
        let new = DeviceDataset::from_capture(&parsed(60, &[("Gi0/1", "new-peer")]));

        let mut forward = old.clone();
        forward.merge(&new);
        let mut backward = new.clone();
        backward.merge(&old);

        for merged in [&forward, &backward] {
            assert_eq!(peer_on(merged, "Gi0/1"), "new-peer");
            assert_eq!(peer_on(merged, "Gi0/2"), "kept");
            assert_eq!(merged.hostname.as_deref(), Some("sw-60"));
            assert_eq!(merged.updated_at, at(60));
        }
        assert_eq!(forward.sections, backward.sections);
    }

    #[test]
    fn test_equal_timestamp_keeps_existing_and_flags() {
        let mut existing = DeviceDataset::from_capture(&parsed(0, &[("Gi0/1", "first")]));
        let rival = DeviceDataset::from_capture(&parsed(0, &[("Gi0/1", "second")]));
        existing.merge(&rival);
        assert_eq!(peer_on(&existing, "Gi0/1"), "first");
        assert_eq!(existing.review.len(), 1);
        assert!(existing.review.iter().next().unwrap().starts_with("merge-tie"));
    }

    #[test]
    fn test_merger_applies_exclusions() {
        let exclusions = ExclusionList::parse(&["10.0.0.1"]).unwrap();
        let outcome = Merger::new(exclusions).merge(vec![], &[parsed(0, &[("Gi0/1", "a")])]);
        assert!(outcome.datasets.is_empty());
        assert_eq!(outcome.excluded, 1);
    }

    #[test]
    fn test_merger_drops_neighbors_at_excluded_addresses() {
        let mut capture = parsed(0, &[("Gi0/1", "a"), ("Gi0/2", "hidden")]);
        for row in &mut capture.records[0].rows {
            if row.key == "Gi0/2" {
                row.fields.insert("mgmt_address".to_string(), "10.9.0.5".to_string());
            }
        }
        let exclusions = ExclusionList::parse(&["10.9.0.0/16"]).unwrap();
        let outcome = Merger::new(exclusions).merge(vec![], &[capture]);

        let rows = &outcome.datasets[0].sections["show lldp neighbors detail"].rows;
        assert_eq!(rows.keys().collect::<Vec<_>>(), vec!["Gi0/1"]);
    }

    #[test]
    fn test_merger_counts_new_ties_only() {
        let stored = vec![DeviceDataset::from_capture(&parsed(0, &[("Gi0/1", "first")]))];
        let outcome = Merger::new(ExclusionList::empty()).merge(stored, &[parsed(0, &[("Gi0/1", "second")])]);
        assert_eq!(outcome.datasets.len(), 1);
        assert_eq!(outcome.ties, 1);
    }

    #[test]
    fn test_failed_capture_keeps_old_rows() {
        let mut dataset = DeviceDataset::from_capture(&parsed(0, &[("Gi0/1", "a")]));
        let mut failed = parsed(60, &[]);
        failed.records.clear();
        failed.hostname = None;
        failed.session_failure = Some(SessionError::AuthRejected);
        dataset.merge(&DeviceDataset::from_capture(&failed));

        assert_eq!(peer_on(&dataset, "Gi0/1"), "a");
        assert_eq!(dataset.hostname.as_deref(), Some("sw-0"));
        assert_eq!(dataset.last_failure, Some(SessionError::AuthRejected));
    }
}
