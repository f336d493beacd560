//! # netdocs - Network Discovery and Topology Documentation
//!
//! netdocs finds the network devices in a set of address ranges, logs into
//! each one over SSH or Telnet, reads its state with a vendor-specific
//! command battery, and turns the result into a Mermaid topology diagram.
//!
//! ## Features
//!
//! - **Reachability Probing**: Bounded, rate-limited TCP probes of management ports
//! - **Interactive Sessions**: SSH with Telnet fallback, prompt and pager handling
//! - **Data-Driven Parsing**: Line-pattern templates, one engine for every vendor
//! - **Persistent Datasets**: Per-device history merged across runs by timestamp
//! - **Topology Normalization**: Alias resolution, canonical interface names, edge dedup
//! - **Deterministic Diagrams**: Identical input always renders identical Mermaid text
//! - **Safety Exclusions**: Listed addresses are never contacted or reported
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use netdocs::config::{Paths, ProfileManager, Settings};
//! use netdocs::parser::TemplateSet;
//! use netdocs::pipeline::{Pipeline, RunOptions};
//! use netdocs::safety::ExclusionList;
//! use netdocs::session::Credentials;
//! use netdocs::storage::ArtifactStore;
//! use netdocs::topology::Inventory;
//! use netdocs::types::TargetSpec;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let paths = Paths::discover()?;
//!     let settings = Settings::load(&paths)?;
//!     let store = ArtifactStore::open(&paths.data_dir, ExclusionList::parse(&settings.exclude)?)?;
//!     let pipeline = Pipeline::new(
//!         settings,
//!         store,
//!         ProfileManager::load(&paths)?,
//!         TemplateSet::builtin()?,
//!         Inventory::empty(),
//!     )?;
//!
//!     let targets = vec![TargetSpec::parse("10.0.0.0/24")?];
//!     let (_tx, cancel) = tokio::sync::watch::channel(false);
//!     let report = pipeline
//!         .run(&targets, Credentials::new("netops", "secret"), RunOptions::default(), cancel)
//!         .await?;
//!     println!("{}", report.diagram);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`probe`] - Reachability probing of management ports
//! - [`session`] - SSH/Telnet transports and the session collector
//! - [`parser`] - Template engine and the built-in templates
//! - [`merge`] - Per-device datasets and timestamp-based merging
//! - [`topology`] - Alias table, inventory and the normalizer
//! - [`render`] - Mermaid flowchart output
//! - [`pipeline`] - Stage orchestration over the artifact store
//! - [`storage`] - Run manifests and persisted artifacts
//! - [`config`] - Settings and vendor command profiles
//! - [`error`] - Error types per concern

pub mod cli;
pub mod config;
pub mod error;
pub mod merge;
pub mod output;
pub mod parser;
pub mod pipeline;
pub mod probe;
pub mod render;
pub mod safety;
pub mod session;
pub mod storage;
pub mod topology;
pub mod types;
pub mod vendor;

// Re-export commonly used types
pub use error::{CliError, PipelineError, SessionError, TopologyError};
pub use pipeline::{Pipeline, RunOptions, RunReport};
pub use render::{DiagramRenderer, RenderOptions};
pub use topology::{TopologyEdge, TopologyGraph, TopologyNode};
pub use types::{RunId, TargetSpec};
