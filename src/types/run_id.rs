//! Unique identifiers for pipeline runs.
//!
//! `RunId` names the directory a run's artifacts live in, so every stage can
//! be re-run later against a prior run's saved output.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// A unique identifier for one pipeline run.
///
/// Uses UUID v4 internally for globally unique identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(Uuid);

impl RunId {
    /// Generate a new random run ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get a short representation (first 8 characters).
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RunId {
    type Err = RunIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() < 36 {
            return Err(RunIdError::ShortForm(s.to_string()));
        }

        let uuid = Uuid::parse_str(s).map_err(|_| RunIdError::InvalidFormat(s.to_string()))?;
        Ok(Self(uuid))
    }
}

/// Error type for RunId parsing.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RunIdError {
    #[error("invalid run ID format: {0}")]
    InvalidFormat(String),
    #[error("'{0}' is a prefix; resolve it through the artifact store")]
    ShortForm(String),
}
