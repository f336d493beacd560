//! The canonical topology graph and its structural checks.

use crate::error::{SessionError, TopologyError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::net::IpAddr;

/// Network role of a device, in diagram order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Core,
    Dist,
    #[default]
    Access,
    Wan,
    Dmz,
    Mgmt,
    Wifi,
}

impl Role {
    pub const ALL: [Role; 7] = [
        Role::Core,
        Role::Dist,
        Role::Access,
        Role::Wan,
        Role::Dmz,
        Role::Mgmt,
        Role::Wifi,
    ];

    /// Parse an inventory role; unknown values fall back to access.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "core" => Self::Core,
            "dist" | "distribution" => Self::Dist,
            "wan" | "edge" => Self::Wan,
            "dmz" => Self::Dmz,
            "mgmt" | "management" => Self::Mgmt,
            "wifi" | "wireless" | "ap" => Self::Wifi,
            _ => Self::Access,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Core => "core",
            Self::Dist => "dist",
            Self::Access => "access",
            Self::Wan => "wan",
            Self::Dmz => "dmz",
            Self::Mgmt => "mgmt",
            Self::Wifi => "wifi",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One device in the topology.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyNode {
    /// Canonical identity, unique within the graph.
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mgmt_address: Option<IpAddr>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub addresses: BTreeSet<IpAddr>,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os_version: Option<String>,
    /// False for stubs known only from a neighbor's report.
    pub confirmed: bool,
    /// Why the last session against this device failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_failure: Option<SessionError>,
}

impl TopologyNode {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            hostname: None,
            mgmt_address: None,
            addresses: BTreeSet::new(),
            role: Role::default(),
            site: None,
            vendor: None,
            model: None,
            os_version: None,
            confirmed: true,
            session_failure: None,
        }
    }

    /// Wireless devices render with their own class regardless of role.
    pub fn is_wireless(&self) -> bool {
        if self.role == Role::Wifi {
            return true;
        }
        let model = self.model.as_deref().unwrap_or("").to_lowercase();
        model.contains("wifi") || model.contains(" ap") || model.contains("air")
    }
}

/// An adjacency between two nodes. Endpoints are stored with `a < b`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TopologyEdge {
    pub a: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub a_interface: Option<String>,
    pub b: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub b_interface: Option<String>,
}

impl TopologyEdge {
    /// Build an edge in canonical endpoint order.
    pub fn between(
        x: &str,
        x_interface: Option<String>,
        y: &str,
        y_interface: Option<String>,
    ) -> Self {
        if x <= y {
            Self {
                a: x.to_string(),
                a_interface: x_interface,
                b: y.to_string(),
                b_interface: y_interface,
            }
        } else {
            Self {
                a: y.to_string(),
                a_interface: y_interface,
                b: x.to_string(),
                b_interface: x_interface,
            }
        }
    }

    /// Whether two edges describe the same link: same endpoints and no
    /// conflicting interface on either side.
    pub fn is_compatible(&self, other: &TopologyEdge) -> bool {
        fn agree(x: &Option<String>, y: &Option<String>) -> bool {
            match (x, y) {
                (Some(x), Some(y)) => x == y,
                _ => true,
            }
        }
        self.a == other.a
            && self.b == other.b
            && agree(&self.a_interface, &other.a_interface)
            && agree(&self.b_interface, &other.b_interface)
    }

    /// Fill interfaces this edge does not know from a compatible one.
    pub fn absorb(&mut self, other: TopologyEdge) {
        if self.a_interface.is_none() {
            self.a_interface = other.a_interface;
        }
        if self.b_interface.is_none() {
            self.b_interface = other.b_interface;
        }
    }
}

impl fmt::Display for TopologyEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}[{}] -- {}[{}]",
            self.a,
            self.a_interface.as_deref().unwrap_or("?"),
            self.b,
            self.b_interface.as_deref().unwrap_or("?")
        )
    }
}

/// Full node and edge set of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyGraph {
    pub nodes: Vec<TopologyNode>,
    pub edges: Vec<TopologyEdge>,
    /// Non-fatal oddities found while normalizing.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl TopologyGraph {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: &str) -> Option<&TopologyNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Check every structural invariant, naming the first offender.
    pub fn validate(&self) -> Result<(), TopologyError> {
        let mut ids = BTreeSet::new();
        for node in &self.nodes {
            if node.id.trim().is_empty() {
                return Err(TopologyError::EmptyIdentity);
            }
            if !ids.insert(node.id.as_str()) {
                return Err(TopologyError::DuplicateNode(node.id.clone()));
            }
        }

        let mut seen = BTreeSet::new();
        for edge in &self.edges {
            if edge.a == edge.b {
                return Err(TopologyError::SelfLoop(edge.to_string()));
            }
            if edge.a > edge.b {
                return Err(TopologyError::UnorderedEdge(edge.to_string()));
            }
            for endpoint in [&edge.a, &edge.b] {
                if !ids.contains(endpoint.as_str()) {
                    return Err(TopologyError::DanglingEdge {
                        edge: edge.to_string(),
                        endpoint: endpoint.clone(),
                    });
                }
            }
            if !seen.insert(edge) {
                return Err(TopologyError::DuplicateEdge(edge.to_string()));
            }
        }
        Ok(())
    }
}
