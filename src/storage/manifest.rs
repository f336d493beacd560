//! Per-run manifest (`run.json`).

use crate::types::RunId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Last stage a run completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Created,
    Probed,
    Collected,
    Parsed,
    Merged,
    Normalized,
    Rendered,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Probed => "probed",
            Self::Collected => "collected",
            Self::Parsed => "parsed",
            Self::Merged => "merged",
            Self::Normalized => "normalized",
            Self::Rendered => "rendered",
        };
        f.write_str(name)
    }
}

/// Counters filled in as stages complete.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunCounts {
    pub candidates: usize,
    pub reachable: usize,
    pub collected: usize,
    pub sessions_failed: usize,
    pub parsed_rows: usize,
    pub parse_diagnostics: usize,
    pub datasets: usize,
    pub merge_ties: usize,
    pub nodes: usize,
    pub edges: usize,
    pub warnings: usize,
}

/// A pipeline run as recorded on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunManifest {
    pub id: RunId,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Targets as given, minus excluded single addresses.
    pub targets: Vec<String>,
    pub stage: Stage,
    #[serde(default)]
    pub counts: RunCounts,
    /// Collection stopped early on request.
    #[serde(default)]
    pub cancelled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunManifest {
    pub fn new(targets: Vec<String>) -> Self {
        Self {
            id: RunId::new(),
            started_at: Utc::now(),
            finished_at: None,
            targets,
            stage: Stage::Created,
            counts: RunCounts::default(),
            cancelled: false,
            error: None,
        }
    }

    /// Record a completed stage; stages never move backwards.
    pub fn advance(&mut self, stage: Stage) {
        self.stage = self.stage.max(stage);
        self.finished_at = Some(Utc::now());
    }

    /// One-line summary for history listings.
    pub fn summary(&self) -> String {
        format!(
            "{} reachable, {} collected ({} failed), {} nodes, {} edges",
            self.counts.reachable,
            self.counts.collected,
            self.counts.sessions_failed,
            self.counts.nodes,
            self.counts.edges
        )
    }
}
