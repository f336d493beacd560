//! Builds the canonical topology graph from merged datasets.

use super::alias::{Alias, AliasTable};
use super::graph::{Role, TopologyEdge, TopologyGraph, TopologyNode};
use super::inventory::{Inventory, InventoryDevice};
use crate::error::TopologyError;
use crate::merge::DeviceDataset;
use crate::parser::RecordKind;
use crate::safety::ExclusionList;
use crate::vendor::site_from_hostname;
use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;
use tracing::{debug, info};

/// Long interface prefixes and their short forms, matched case-insensitively.
const INTERFACE_PREFIXES: &[(&str, &str)] = &[
    ("hundredgigabitethernet", "Hu"),
    ("hundredgige", "Hu"),
    ("fortygigabitethernet", "Fo"),
    ("twentyfivegigabitethernet", "Twe"),
    ("twentyfivegige", "Twe"),
    ("tengigabitethernet", "Te"),
    ("gigabitethernet", "Gi"),
    ("fastethernet", "Fa"),
    ("ethernet", "Eth"),
    ("port-channel", "Po"),
    ("portchannel", "Po"),
    ("bundle-ether", "BE"),
    ("loopback", "Lo"),
    ("vlan", "Vl"),
];

/// Short form of an interface name: `GigabitEthernet0/1` becomes `Gi0/1`.
pub fn canonical_interface(name: &str) -> Option<String> {
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    let lower = name.to_ascii_lowercase();
    for (long, short) in INTERFACE_PREFIXES {
        if let Some(rest) = lower.strip_prefix(long) {
            let rest = name[name.len() - rest.len()..].trim_start();
            if rest.starts_with(|c: char| c.is_ascii_digit()) {
                return Some(format!("{}{}", short, rest));
            }
        }
    }
    Some(name.to_string())
}

/// Turns datasets plus the inventory into a validated [`TopologyGraph`].
#[derive(Debug, Clone)]
pub struct TopologyNormalizer {
    inventory: Inventory,
    exclusions: ExclusionList,
}

/// Working state for one normalization.
struct Build {
    table: AliasTable,
    nodes: BTreeMap<String, TopologyNode>,
    /// Identities known but excluded; references to them vanish silently.
    hidden: BTreeSet<String>,
    /// Identities declared by the inventory.
    inventory: BTreeSet<String>,
    /// Identities already backed by a collected dataset.
    collected: BTreeSet<String>,
    warnings: BTreeSet<String>,
    candidates: Vec<TopologyEdge>,
}

impl TopologyNormalizer {
    pub fn new(inventory: Inventory, exclusions: ExclusionList) -> Self {
        Self {
            inventory,
            exclusions,
        }
    }

    pub fn normalize(&self, datasets: &[DeviceDataset]) -> Result<TopologyGraph, TopologyError> {
        let mut build = Build {
            table: AliasTable::new(),
            nodes: BTreeMap::new(),
            hidden: BTreeSet::new(),
            inventory: BTreeSet::new(),
            collected: BTreeSet::new(),
            warnings: BTreeSet::new(),
            candidates: Vec::new(),
        };

        for device in &self.inventory.devices {
            self.add_inventory_device(&mut build, device);
        }

        // Identity order, so shared hostnames settle the same way every run.
        let mut ordered: Vec<&DeviceDataset> = datasets.iter().collect();
        ordered.sort_by(|a, b| a.identity.cmp(&b.identity));

        let mut collected = Vec::new();
        for dataset in ordered {
            if let Some(id) = self.add_dataset(&mut build, dataset) {
                collected.push((id, dataset));
            }
        }

        for (id, dataset) in &collected {
            self.add_neighbors(&mut build, id, dataset);
        }
        for device in &self.inventory.devices {
            self.add_inventory_links(&mut build, device);
        }

        for node in build.nodes.values_mut() {
            if node.site.is_none() {
                node.site = node.hostname.as_deref().and_then(site_from_hostname);
            }
        }

        let graph = TopologyGraph {
            nodes: build.nodes.into_values().collect(),
            edges: dedup_edges(build.candidates),
            warnings: build.warnings.into_iter().collect(),
        };
        graph.validate()?;

        info!(
            nodes = graph.nodes.len(),
            edges = graph.edges.len(),
            stubs = graph.nodes.iter().filter(|n| !n.confirmed).count(),
            warnings = graph.warnings.len(),
            "Topology normalized"
        );
        Ok(graph)
    }

    fn is_excluded_device(&self, id: &str, address: Option<IpAddr>) -> bool {
        self.exclusions.excludes_identity(id)
            || address.is_some_and(|ip| self.exclusions.is_excluded(ip))
    }

    fn add_inventory_device(&self, build: &mut Build, device: &InventoryDevice) {
        let Some(id) = device.canonical_id() else {
            return;
        };
        let mut aliases = vec![Alias::Name(id.clone())];
        aliases.extend(device.hostname.iter().map(|h| Alias::Name(h.clone())));
        aliases.extend(device.aliases.iter().map(|a| Alias::parse(a)));
        aliases.extend(device.mgmt_ip.map(Alias::Address));

        for conflict in build.table.insert(&id, &aliases) {
            build.warnings.insert(format!(
                "alias {} claimed by both {} and {}",
                conflict.alias, conflict.kept, conflict.other
            ));
        }

        let any_excluded = self.is_excluded_device(&id, device.mgmt_ip)
            || aliases.iter().any(|a| match a {
                Alias::Address(ip) => self.exclusions.is_excluded(*ip),
                _ => false,
            });
        if any_excluded {
            build.hidden.insert(id);
            return;
        }
        build.inventory.insert(id.clone());

        let node = build
            .nodes
            .entry(id.clone())
            .or_insert_with(|| TopologyNode::new(id.clone()));
        if device.hostname.is_some() {
            node.hostname = device.hostname.clone();
        }
        if device.mgmt_ip.is_some() {
            node.mgmt_address = device.mgmt_ip;
        }
        node.addresses.extend(device.mgmt_ip);
        if let Some(role) = &device.role {
            node.role = Role::from_label(role);
        }
        if device.site.is_some() {
            node.site = device.site.clone();
        }
        if device.vendor.is_some() {
            node.vendor = device.vendor.clone();
        }
        if device.model.is_some() {
            node.model = device.model.clone();
        }
    }

    /// Register a collected device, returning its canonical identity.
    fn add_dataset(&self, build: &mut Build, dataset: &DeviceDataset) -> Option<String> {
        if self.exclusions.excludes_identity(&dataset.identity)
            || dataset.addresses.iter().any(|ip| self.exclusions.is_excluded(*ip))
        {
            return None;
        }

        let mut aliases: Vec<Alias> = dataset.addresses.iter().copied().map(Alias::Address).collect();
        if let Ok(ip) = dataset.identity.parse::<IpAddr>() {
            aliases.push(Alias::Address(ip));
        }
        let lowest = dataset.addresses.iter().next().map(IpAddr::to_string);

        // A hostname alone only identifies an inventory device that no other
        // collected device has claimed yet. Factory names repeat.
        let by_name = dataset
            .hostname
            .as_ref()
            .and_then(|h| build.table.resolve(&Alias::Name(h.clone())));
        let id = match build.table.resolve_any(&aliases) {
            Some(id) => id,
            None => match by_name.clone() {
                Some(owner)
                    if build.inventory.contains(&owner) && !build.collected.contains(&owner) =>
                {
                    owner
                }
                Some(_) => lowest.clone().unwrap_or_else(|| dataset.identity.clone()),
                None => dataset
                    .hostname
                    .clone()
                    .filter(|h| !build.nodes.contains_key(h) && !build.table.contains(h))
                    .or_else(|| lowest.clone())
                    .unwrap_or_else(|| dataset.identity.clone()),
            },
        };

        if build.hidden.contains(&id) {
            return None;
        }
        match (&dataset.hostname, &by_name) {
            (Some(hostname), Some(owner)) if *owner != id => {
                let other = build
                    .nodes
                    .get(owner)
                    .and_then(|n| n.mgmt_address)
                    .map(|ip| ip.to_string())
                    .unwrap_or_else(|| owner.clone());
                let this = lowest.clone().unwrap_or_else(|| dataset.identity.clone());
                build.warnings.insert(format!(
                    "hostname {} shared by {} and {}",
                    hostname, other, this
                ));
            }
            (Some(hostname), _) => aliases.push(Alias::Name(hostname.clone())),
            _ => {}
        }
        for conflict in build.table.insert(&id, &aliases) {
            build.warnings.insert(format!(
                "alias {} claimed by both {} and {}",
                conflict.alias, conflict.kept, conflict.other
            ));
        }
        build.collected.insert(id.clone());

        let node = build
            .nodes
            .entry(id.clone())
            .or_insert_with(|| TopologyNode::new(id.clone()));
        node.confirmed = true;
        node.addresses.extend(dataset.addresses.iter().copied());
        if node.mgmt_address.is_none() {
            node.mgmt_address = dataset.addresses.iter().next().copied();
        }
        if node.hostname.is_none() {
            node.hostname = dataset.hostname.clone();
        }
        if node.vendor.is_none() {
            node.vendor = dataset.vendor.clone();
        }
        if node.model.is_none() {
            node.model = dataset.fact("model").map(str::to_string);
        }
        if node.os_version.is_none() {
            node.os_version = dataset.fact("version").map(str::to_string);
        }
        if dataset.last_failure.is_some() {
            node.session_failure = dataset.last_failure.clone();
        }
        debug!(identity = %id, address = %dataset.identity, "Device node");
        Some(id)
    }

    fn add_neighbors(&self, build: &mut Build, local: &str, dataset: &DeviceDataset) {
        for row in dataset.rows_of(RecordKind::Neighbors) {
            let mgmt = row.get("mgmt_address").and_then(|s| s.parse::<IpAddr>().ok());
            if mgmt.is_some_and(|ip| self.exclusions.is_excluded(ip)) {
                continue;
            }
            let name = row.get("remote_system_name");
            let chassis = row.get("chassis_id");

            let mut aliases = Vec::new();
            aliases.extend(mgmt.map(Alias::Address));
            aliases.extend(name.map(|n| Alias::Name(n.to_string())));
            aliases.extend(chassis.map(|c| Alias::Chassis(c.to_string())));

            let local_interface = row.get("local_interface").and_then(canonical_interface);
            let remote = match build.table.resolve_any(&aliases) {
                Some(id) => id,
                None => {
                    let Some(stub) = name
                        .map(str::to_string)
                        .or_else(|| mgmt.map(|ip| ip.to_string()))
                        .or_else(|| chassis.map(str::to_string))
                    else {
                        build.warnings.insert(format!(
                            "neighbor without identity on {} {}",
                            local,
                            local_interface.as_deref().unwrap_or("?")
                        ));
                        continue;
                    };
                    if self.exclusions.excludes_identity(&stub) {
                        continue;
                    }
                    add_stub(build, stub, name, mgmt, &aliases)
                }
            };

            if build.hidden.contains(&remote) {
                continue;
            }
            if remote == local {
                build.warnings.insert(format!(
                    "self-loop on {} {}",
                    local,
                    local_interface.as_deref().unwrap_or("?")
                ));
                continue;
            }
            let remote_interface = row.get("remote_interface").and_then(canonical_interface);
            build.candidates.push(TopologyEdge::between(
                local,
                local_interface,
                &remote,
                remote_interface,
            ));
        }
    }

    fn add_inventory_links(&self, build: &mut Build, device: &InventoryDevice) {
        let Some(local) = device.canonical_id() else {
            return;
        };
        if build.hidden.contains(&local) {
            return;
        }
        for interface in &device.interfaces {
            let Some(peer) = &interface.peer else {
                continue;
            };
            let Some(remote) = build.table.resolve(&Alias::parse(&peer.hostname)) else {
                build.warnings.insert(format!(
                    "peer {} of {} {} not in inventory",
                    peer.hostname, local, interface.name
                ));
                continue;
            };
            if build.hidden.contains(&remote) || remote == local {
                continue;
            }
            build.candidates.push(TopologyEdge::between(
                &local,
                canonical_interface(&interface.name),
                &remote,
                peer.interface.as_deref().and_then(canonical_interface),
            ));
        }
    }
}

/// Create an unconfirmed node for a neighbor nothing else knows.
fn add_stub(
    build: &mut Build,
    mut id: String,
    name: Option<&str>,
    mgmt: Option<IpAddr>,
    aliases: &[Alias],
) -> String {
    if build.nodes.contains_key(&id) || build.table.contains(&id) {
        id = format!("{} (stub)", id);
    }
    build.table.insert(&id, aliases);
    let mut node = TopologyNode::new(id.clone());
    node.confirmed = false;
    node.hostname = name.map(str::to_string);
    node.mgmt_address = mgmt;
    node.addresses.extend(mgmt);
    debug!(identity = %id, "Unconfirmed neighbor");
    build.nodes.insert(id.clone(), node);
    id
}

/// Collapse candidates describing the same link. Edges knowing more
/// interfaces go first so partial reports merge into them.
fn dedup_edges(mut candidates: Vec<TopologyEdge>) -> Vec<TopologyEdge> {
    fn known(e: &TopologyEdge) -> usize {
        e.a_interface.is_some() as usize + e.b_interface.is_some() as usize
    }
    candidates.sort_by(|x, y| known(y).cmp(&known(x)).then_with(|| x.cmp(y)));

    let mut edges: Vec<TopologyEdge> = Vec::new();
    for candidate in candidates {
        match edges.iter_mut().find(|e| e.is_compatible(&candidate)) {
            Some(existing) => existing.absorb(candidate),
            None => edges.push(candidate),
        }
    }
    edges.sort();
    edges
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::{Section, StoredRow};
    use crate::types::RunId;
    use chrono::{TimeZone, Utc};

    fn dataset(address: &str, hostname: Option<&str>, neighbors: &[[&str; 4]]) -> DeviceDataset {
        let observed_at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let run_id = RunId::new();
        let rows = neighbors
            .iter()
            .enumerate()
            .map(|(i, [local, name, mgmt, remote])| {
                let fields = [
                    ("local_interface", *local),
                    ("remote_system_name", *name),
                    ("mgmt_address", *mgmt),
                    ("remote_interface", *remote),
                    ("chassis_id", ""),
                ]
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();
                (
                    format!("row{}", i),
                    StoredRow {
                        fields,
                        observed_at,
                        run_id,
                    },
                )
            })
            .collect();
        let mut sections = BTreeMap::new();
        if !neighbors.is_empty() {
            sections.insert(
                "show lldp neighbors detail".to_string(),
                Section {
                    kind: RecordKind::Neighbors,
                    rows,
                },
            );
        }
        let ip: IpAddr = address.parse().unwrap();
        DeviceDataset {
            identity: address.to_string(),
            addresses: BTreeSet::from([ip]),
            hostname: hostname.map(str::to_string),
            vendor: Some("cisco_ios".to_string()),
            updated_at: observed_at,
            last_failure: None,
            sections,
            diagnostics: BTreeSet::new(),
            review: BTreeSet::new(),
        }
    }

    fn normalizer() -> TopologyNormalizer {
        TopologyNormalizer::new(Inventory::empty(), ExclusionList::empty())
    }

    #[test]
    fn test_canonical_interface() {
        assert_eq!(canonical_interface("GigabitEthernet0/1").as_deref(), Some("Gi0/1"));
        assert_eq!(canonical_interface("gigabitethernet 1/0/2").as_deref(), Some("Gi1/0/2"));
        assert_eq!(canonical_interface("TenGigabitEthernet1/1/1").as_deref(), Some("Te1/1/1"));
        assert_eq!(canonical_interface("Port-channel10").as_deref(), Some("Po10"));
        assert_eq!(canonical_interface("ge-0/0/1").as_deref(), Some("ge-0/0/1"));
        assert_eq!(canonical_interface("Ethernet-Uplink").as_deref(), Some("Ethernet-Uplink"));
        assert_eq!(canonical_interface("  "), None);
    }

    #[test]
    fn test_mutual_neighbors_single_edge() {
        let datasets = vec![
            dataset("10.0.0.1", Some("DEN-CORE-1"), &[["GigabitEthernet1/0/1", "DEN-ACC-1", "10.0.0.2", "Gi0/25"]]),
            dataset("10.0.0.2", Some("DEN-ACC-1"), &[["Gi0/25", "DEN-CORE-1", "10.0.0.1", "Gi1/0/1"]]),
        ];
        let graph = normalizer().normalize(&datasets).unwrap();
        assert_eq!(graph.nodes.len(), 2);
        assert_eq!(graph.edges.len(), 1);
        let edge = &graph.edges[0];
        assert_eq!(edge.a, "DEN-ACC-1");
        assert_eq!(edge.a_interface.as_deref(), Some("Gi0/25"));
        assert_eq!(edge.b, "DEN-CORE-1");
        assert_eq!(edge.b_interface.as_deref(), Some("Gi1/0/1"));
        assert_eq!(graph.node("DEN-CORE-1").unwrap().site.as_deref(), Some("DEN"));
    }

    #[test]
    fn test_unknown_side_merges_into_known() {
        let datasets = vec![
            dataset("10.0.0.1", Some("sw1"), &[["Gi0/1", "sw2", "", "Gi0/2"]]),
            dataset("10.0.0.2", Some("sw2"), &[["Gi0/2", "sw1", "", ""]]),
        ];
        let graph = normalizer().normalize(&datasets).unwrap();
        assert_eq!(graph.edges.len(), 1);
        assert_eq!(graph.edges[0].a_interface.as_deref(), Some("Gi0/1"));
    }

    #[test]
    fn test_parallel_links_kept() {
        let datasets = vec![dataset(
            "10.0.0.1",
            Some("sw1"),
            &[["Gi0/1", "sw2", "", "Gi0/1"], ["Gi0/2", "sw2", "", "Gi0/2"]],
        )];
        let graph = normalizer().normalize(&datasets).unwrap();
        assert_eq!(graph.edges.len(), 2);
    }

    #[test]
    fn test_unresolved_neighbor_becomes_stub() {
        let datasets = vec![dataset("10.0.0.1", Some("sw1"), &[["Gi0/1", "phone-7", "", ""]])];
        let graph = normalizer().normalize(&datasets).unwrap();
        let stub = graph.node("phone-7").unwrap();
        assert!(!stub.confirmed);
        assert!(graph.node("sw1").unwrap().confirmed);
        assert_eq!(graph.edges.len(), 1);
    }

    #[test]
    fn test_neighbor_by_address_resolves() {
        let datasets = vec![
            dataset("10.0.0.1", Some("sw1"), &[["Gi0/1", "", "10.0.0.2", ""]]),
            dataset("10.0.0.2", None, &[]),
        ];
        let graph = normalizer().normalize(&datasets).unwrap();
        assert_eq!(graph.nodes.len(), 2);
        assert!(graph.node("10.0.0.2").unwrap().confirmed);
        assert_eq!(graph.edges[0].a, "10.0.0.2");
    }

    #[test]
    fn test_excluded_neighbor_dropped_silently() {
        let normalizer = TopologyNormalizer::new(
            Inventory::empty(),
            ExclusionList::parse(&["10.9.9.0/24"]).unwrap(),
        );
        let datasets = vec![dataset("10.0.0.1", Some("sw1"), &[["Gi0/1", "secret", "10.9.9.9", ""]])];
        let graph = normalizer.normalize(&datasets).unwrap();
        assert_eq!(graph.nodes.len(), 1);
        assert!(graph.edges.is_empty());
        assert!(graph.warnings.iter().all(|w| !w.contains("10.9.9.9")));
    }

    #[test]
    fn test_shared_hostname_keeps_devices_apart() {
        let datasets = vec![
            dataset("10.0.0.2", Some("Switch"), &[]),
            dataset("10.0.0.1", Some("Switch"), &[]),
        ];
        let graph = normalizer().normalize(&datasets).unwrap();
        assert_eq!(graph.nodes.len(), 2);
        let first = graph.node("Switch").unwrap();
        assert_eq!(first.addresses, BTreeSet::from(["10.0.0.1".parse::<IpAddr>().unwrap()]));
        let second = graph.node("10.0.0.2").unwrap();
        assert_eq!(second.addresses, BTreeSet::from(["10.0.0.2".parse::<IpAddr>().unwrap()]));
        assert_eq!(second.hostname.as_deref(), Some("Switch"));
        assert_eq!(
            graph.warnings,
            vec!["hostname Switch shared by 10.0.0.1 and 10.0.0.2".to_string()]
        );
    }

    #[test]
    fn test_hostname_matches_uncollected_inventory_device() {
        let inventory = Inventory::from_json(
            r#"{ "devices": [ { "identity": "edge", "hostname": "DEN-EDGE-1" } ] }"#,
        )
        .unwrap();
        let normalizer = TopologyNormalizer::new(inventory, ExclusionList::empty());
        let graph = normalizer
            .normalize(&[dataset("10.0.0.9", Some("DEN-EDGE-1"), &[])])
            .unwrap();
        assert_eq!(graph.nodes.len(), 1);
        assert_eq!(graph.nodes[0].id, "edge");
        assert!(graph.warnings.is_empty());
    }

    #[test]
    fn test_self_loop_is_warning() {
        let datasets = vec![dataset("10.0.0.1", Some("sw1"), &[["Gi0/1", "sw1", "", "Gi0/2"]])];
        let graph = normalizer().normalize(&datasets).unwrap();
        assert!(graph.edges.is_empty());
        assert_eq!(graph.warnings, vec!["self-loop on sw1 Gi0/1".to_string()]);
    }

    #[test]
    fn test_inventory_identity_and_attributes_win() {
        let inventory = Inventory::from_json(
            r#"{ "devices": [ { "identity": "core", "hostname": "DEN-CORE-1", "aliases": ["10.0.0.1"], "role": "core", "site": "HQ", "model": "C9500" } ] }"#,
        )
        .unwrap();
        let normalizer = TopologyNormalizer::new(inventory, ExclusionList::empty());
        let graph = normalizer
            .normalize(&[dataset("10.0.0.1", Some("den-core-1"), &[])])
            .unwrap();
        assert_eq!(graph.nodes.len(), 1);
        let node = &graph.nodes[0];
        assert_eq!(node.id, "core");
        assert_eq!(node.role, Role::Core);
        assert_eq!(node.site.as_deref(), Some("HQ"));
        assert_eq!(node.model.as_deref(), Some("C9500"));
        assert!(node.addresses.contains(&"10.0.0.1".parse::<IpAddr>().unwrap()));
    }

    #[test]
    fn test_failed_device_is_isolated_node() {
        let mut failed = dataset("10.0.0.5", None, &[]);
        failed.last_failure = Some(crate::error::SessionError::AuthRejected);
        let graph = normalizer().normalize(&[failed]).unwrap();
        assert_eq!(graph.nodes.len(), 1);
        assert!(graph.edges.is_empty());
        assert_eq!(graph.nodes[0].id, "10.0.0.5");
        assert!(graph.nodes[0].session_failure.is_some());
    }

    #[test]
    fn test_order_independent() {
        let a = dataset("10.0.0.1", Some("sw1"), &[["Gi0/1", "sw2", "", "Gi0/2"]]);
        let b = dataset("10.0.0.2", Some("sw2"), &[["Gi0/2", "sw1", "", "Gi0/1"]]);
        let first = normalizer().normalize(&[a.clone(), b.clone()]).unwrap();
        let second = normalizer().normalize(&[b, a]).unwrap();
        assert_eq!(first, second);
    }
}
