//! Topology normalization: canonical identities, de-duplicated edges and the
//! structural checks a graph must pass before it is rendered.

mod alias;
mod graph;
mod inventory;
mod normalize;

pub use alias::{Alias, AliasConflict, AliasTable};
pub use graph::{Role, TopologyEdge, TopologyGraph, TopologyNode};
pub use inventory::{Inventory, InventoryDevice, InventoryInterface, InventoryPeer};
pub use normalize::{canonical_interface, TopologyNormalizer};
