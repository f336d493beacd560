//! Mermaid flowchart rendering.
//!
//! Output depends only on the graph content and the options: nodes and edges
//! are re-sorted here, so two graphs built in different orders render to the
//! same text.

use crate::error::TopologyError;
use crate::topology::{Role, TopologyEdge, TopologyGraph, TopologyNode};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Write};

const INIT: &str =
    r#"%%{init: {"theme": "base", "flowchart": {"htmlLabels": true, "curve": "basis"}}}%%"#;

const CLASS_DEFS: &[(&str, &str)] = &[
    ("core", "stroke-width:2px,stroke:#1f77b4,fill:#e6f1fb,color:#111"),
    ("dist", "stroke-width:2px,stroke:#2ca02c,fill:#eaf7ea,color:#111"),
    ("access", "stroke-width:1.5px,stroke:#7f7f7f,fill:#f6f6f6,color:#111"),
    ("wan", "stroke-width:2px,stroke:#9467bd,fill:#f2e9fb,color:#111"),
    ("dmz", "stroke-width:2px,stroke:#d62728,fill:#fdeaea,color:#111"),
    ("mgmt", "stroke-width:1.5px,stroke:#bcbd22,fill:#fbfbe6,color:#111"),
    ("wifi", "stroke-width:1.5px,stroke:#1f77b4,fill:#eef7ff,color:#111"),
    (
        "unconfirmed",
        "stroke-width:1px,stroke:#999,stroke-dasharray:4 3,fill:#ffffff,color:#555",
    ),
];

/// Flowchart direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
pub enum Direction {
    #[default]
    LR,
    TD,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LR => write!(f, "LR"),
            Self::TD => write!(f, "TD"),
        }
    }
}

/// How much each node label says.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LabelVerbosity {
    /// Name only.
    None,
    /// Name and management address.
    Brief,
    /// Everything known: role, vendor, model, OS version.
    #[default]
    Full,
}

/// Diagram options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderOptions {
    pub direction: Direction,
    /// Group nodes by site, then by role.
    pub subgraphs: bool,
    /// Interface names on edges.
    pub show_ports: bool,
    pub verbosity: LabelVerbosity,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            direction: Direction::LR,
            subgraphs: true,
            show_ports: true,
            verbosity: LabelVerbosity::Full,
        }
    }
}

/// Writes a [`TopologyGraph`] as a Mermaid flowchart.
#[derive(Debug, Clone, Default)]
pub struct DiagramRenderer {
    options: RenderOptions,
}

impl DiagramRenderer {
    pub fn new(options: RenderOptions) -> Self {
        Self { options }
    }

    /// Render a graph. Fails only when the graph is structurally invalid.
    pub fn render(&self, graph: &TopologyGraph) -> Result<String, TopologyError> {
        graph.validate()?;

        let mut nodes: Vec<&TopologyNode> = graph.nodes.iter().collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        let ids = mermaid_ids(&nodes);

        let mut edges: Vec<&TopologyEdge> = graph.edges.iter().collect();
        edges.sort();

        let mut out = String::new();
        // Writing to a String cannot fail.
        let _ = self.write(&mut out, &nodes, &edges, &ids);
        Ok(out)
    }

    fn write(
        &self,
        out: &mut String,
        nodes: &[&TopologyNode],
        edges: &[&TopologyEdge],
        ids: &BTreeMap<&str, String>,
    ) -> fmt::Result {
        writeln!(out, "{}", INIT)?;
        writeln!(out, "flowchart {}", self.options.direction)?;

        if self.options.subgraphs {
            let mut sites: BTreeMap<&str, BTreeMap<Role, Vec<&TopologyNode>>> = BTreeMap::new();
            for node in nodes {
                sites
                    .entry(node.site.as_deref().unwrap_or("UNSPEC"))
                    .or_default()
                    .entry(node.role)
                    .or_default()
                    .push(node);
            }
            let mut used = BTreeSet::new();
            for (site, roles) in &sites {
                let site_id = claim(&mut used, format!("site_{}", sanitize(site)));
                writeln!(out, "  subgraph {}[\"{}\"]", site_id, escape(site))?;
                for (role, members) in roles {
                    let role_id = claim(&mut used, format!("{}_{}", site_id, role));
                    writeln!(out, "    subgraph {}[\"{}\"]", role_id, role)?;
                    for node in members {
                        writeln!(out, "      {}", self.node_line(node, ids))?;
                    }
                    writeln!(out, "    end")?;
                }
                writeln!(out, "  end")?;
            }
        } else {
            for node in nodes {
                writeln!(out, "  {}", self.node_line(node, ids))?;
            }
        }

        if !edges.is_empty() {
            writeln!(out)?;
        }
        for edge in edges {
            let (Some(a), Some(b)) = (ids.get(edge.a.as_str()), ids.get(edge.b.as_str())) else {
                continue;
            };
            match self.edge_label(edge) {
                Some(label) => writeln!(out, "  {} -- \"{}\" --- {}", a, escape(&label), b)?,
                None => writeln!(out, "  {} --- {}", a, b)?,
            }
        }

        writeln!(out)?;
        for (class, style) in CLASS_DEFS {
            writeln!(out, "classDef {} {};", class, style)?;
        }
        Ok(())
    }

    fn node_line(&self, node: &TopologyNode, ids: &BTreeMap<&str, String>) -> String {
        let id = ids.get(node.id.as_str()).map(String::as_str).unwrap_or("_");
        let label: Vec<String> = self.label_lines(node).iter().map(|l| escape(l)).collect();
        format!("{}[\"{}\"]:::{}", id, label.join("<br/>"), class_of(node))
    }

    fn label_lines(&self, node: &TopologyNode) -> Vec<String> {
        let mut lines = vec![node.hostname.clone().unwrap_or_else(|| node.id.clone())];
        if node.hostname.as_deref().is_some_and(|h| h != node.id) {
            lines.push(format!("({})", node.id));
        }
        if self.options.verbosity == LabelVerbosity::None {
            return lines;
        }
        if let Some(mgmt) = node.mgmt_address {
            if mgmt.to_string() != node.id {
                lines.push(mgmt.to_string());
            }
        }
        if self.options.verbosity == LabelVerbosity::Brief {
            return lines;
        }

        let details: Vec<&str> = [
            node.confirmed.then(|| node.role.as_str()),
            node.vendor.as_deref(),
            node.model.as_deref(),
        ]
        .into_iter()
        .flatten()
        .collect();
        if !details.is_empty() {
            lines.push(details.join(" · "));
        }
        if let Some(version) = &node.os_version {
            lines.push(version.clone());
        }
        if let Some(failure) = &node.session_failure {
            lines.push(format!("not collected: {}", failure));
        }
        lines
    }

    fn edge_label(&self, edge: &TopologyEdge) -> Option<String> {
        if !self.options.show_ports {
            return None;
        }
        match (&edge.a_interface, &edge.b_interface) {
            (None, None) => None,
            (a, b) => Some(format!(
                "{} | {}",
                a.as_deref().unwrap_or("?"),
                b.as_deref().unwrap_or("?")
            )),
        }
    }
}

fn class_of(node: &TopologyNode) -> &'static str {
    if !node.confirmed {
        "unconfirmed"
    } else if node.is_wireless() {
        "wifi"
    } else {
        node.role.as_str()
    }
}

/// Mermaid-safe ids, unique even when sanitizing folds two identities
/// together.
fn mermaid_ids<'a>(nodes: &[&'a TopologyNode]) -> BTreeMap<&'a str, String> {
    let mut used = BTreeSet::new();
    nodes
        .iter()
        .map(|node| {
            let id = claim(&mut used, format!("n_{}", sanitize(&node.id)));
            (node.id.as_str(), id)
        })
        .collect()
}

/// `base`, or `base_2`, `base_3`... whichever is still free.
fn claim(used: &mut BTreeSet<String>, base: String) -> String {
    let mut id = base.clone();
    let mut n = 1;
    while used.contains(&id) {
        n += 1;
        id = format!("{}_{}", base, n);
    }
    used.insert(id.clone());
    id
}

fn sanitize(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn escape(text: &str) -> String {
    text.replace('"', "#quot;")
        .replace('<', "#lt;")
        .replace('>', "#gt;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SessionError;

    fn node(id: &str, role: Role, site: &str) -> TopologyNode {
        let mut node = TopologyNode::new(id);
        node.hostname = Some(id.to_string());
        node.role = role;
        node.site = Some(site.to_string());
        node.mgmt_address = Some("10.0.0.1".parse().unwrap());
        node.vendor = Some("cisco_ios".to_string());
        node
    }

    fn sample() -> TopologyGraph {
        let mut stub = TopologyNode::new("phone-7");
        stub.confirmed = false;
        TopologyGraph {
            nodes: vec![
                node("DEN-CORE-1", Role::Core, "DEN"),
                node("DEN-ACC-1", Role::Access, "DEN"),
                stub,
            ],
            edges: vec![
                TopologyEdge::between("DEN-ACC-1", Some("Gi0/25".into()), "DEN-CORE-1", Some("Gi1/0/1".into())),
                TopologyEdge::between("DEN-ACC-1", Some("Gi0/3".into()), "phone-7", None),
            ],
            warnings: Vec::new(),
        }
    }

    #[test]
    fn test_render_structure() {
        let text = DiagramRenderer::default().render(&sample()).unwrap();
        assert!(text.starts_with("%%{init:"));
        assert!(text.contains("flowchart LR"));
        assert!(text.contains("subgraph site_DEN[\"DEN\"]"));
        assert!(text.contains("subgraph site_DEN_core[\"core\"]"));
        assert!(text.contains("n_DEN_CORE_1[\"DEN-CORE-1<br/>10.0.0.1<br/>core · cisco_ios\"]:::core"));
        assert!(text.contains("n_DEN_ACC_1 -- \"Gi0/25 | Gi1/0/1\" --- n_DEN_CORE_1"));
        assert!(text.contains(":::unconfirmed"));
        assert!(text.contains("classDef unconfirmed"));
        assert!(text.contains("classDef wifi"));
    }

    #[test]
    fn test_render_deterministic_across_construction_order() {
        let graph = sample();
        let mut shuffled = graph.clone();
        shuffled.nodes.reverse();
        shuffled.edges.reverse();
        let renderer = DiagramRenderer::default();
        assert_eq!(renderer.render(&graph).unwrap(), renderer.render(&shuffled).unwrap());
    }

    #[test]
    fn test_options() {
        let renderer = DiagramRenderer::new(RenderOptions {
            direction: Direction::TD,
            subgraphs: false,
            show_ports: false,
            verbosity: LabelVerbosity::None,
        });
        let text = renderer.render(&sample()).unwrap();
        assert!(text.contains("flowchart TD"));
        assert!(!text.contains("subgraph"));
        assert!(text.contains("n_DEN_ACC_1 --- n_DEN_CORE_1"));
        assert!(text.contains("n_DEN_CORE_1[\"DEN-CORE-1\"]:::core"));
    }

    #[test]
    fn test_empty_graph() {
        let text = DiagramRenderer::default().render(&TopologyGraph::default()).unwrap();
        assert!(text.contains("flowchart LR"));
        assert!(!text.contains("subgraph"));
        assert!(!text.contains("---"));
    }

    #[test]
    fn test_minimal_node_renders() {
        let mut bare = TopologyNode::new("10.0.0.5");
        bare.session_failure = Some(SessionError::AuthRejected);
        let graph = TopologyGraph {
            nodes: vec![bare],
            ..Default::default()
        };
        let text = DiagramRenderer::default().render(&graph).unwrap();
        assert!(text.contains("n_10_0_0_5[\"10.0.0.5<br/>access<br/>not collected: authentication rejected\"]:::access"));
        assert!(text.contains("subgraph site_UNSPEC"));
    }

    #[test]
    fn test_quotes_escaped_and_ids_unique() {
        let graph = TopologyGraph {
            nodes: vec![TopologyNode::new("a\"b"), TopologyNode::new("a-b"), TopologyNode::new("a_b")],
            ..Default::default()
        };
        let text = DiagramRenderer::new(RenderOptions {
            subgraphs: false,
            ..Default::default()
        })
        .render(&graph)
        .unwrap();
        assert!(text.contains("a#quot;b"));
        assert!(text.contains("n_a_b_2["));
        assert!(text.contains("n_a_b_3["));
    }

    #[test]
    fn test_suffixed_ids_never_shadow_real_ones() {
        let nodes = [TopologyNode::new("a-b"), TopologyNode::new("a_b"), TopologyNode::new("a_b_2")];
        let refs: Vec<&TopologyNode> = nodes.iter().collect();
        let ids = mermaid_ids(&refs);
        let distinct: BTreeSet<&String> = ids.values().collect();
        assert_eq!(distinct.len(), 3);
        assert_eq!(ids["a-b"], "n_a_b");
        assert_eq!(ids["a_b"], "n_a_b_2");
        assert_eq!(ids["a_b_2"], "n_a_b_2_2");

        let graph = TopologyGraph {
            nodes: vec![node("x", Role::Core, "DEN"), node("y", Role::Access, "DEN_core")],
            ..Default::default()
        };
        let text = DiagramRenderer::default().render(&graph).unwrap();
        assert!(text.contains("subgraph site_DEN_core[\"core\"]"));
        assert!(text.contains("subgraph site_DEN_core_2[\"DEN_core\"]"));
    }

    #[test]
    fn test_invalid_graph_rejected() {
        let graph = TopologyGraph {
            nodes: vec![TopologyNode::new("a")],
            edges: vec![TopologyEdge::between("a", None, "ghost", None)],
            warnings: Vec::new(),
        };
        assert!(matches!(
            DiagramRenderer::default().render(&graph),
            Err(TopologyError::DanglingEdge { .. })
        ));
    }
}
