//! Artifact persistence.
//!
//! Provides JSON-based storage for every stage's output so any stage can be
//! re-run from a prior run's saved artifacts.

mod artifacts;
mod manifest;

pub use artifacts::ArtifactStore;
pub use manifest::{RunCounts, RunManifest, Stage};
