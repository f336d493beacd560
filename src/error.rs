//! Error types for netdocs.
//!
//! Uses `thiserror` for ergonomic error definitions. Per-host and per-capture
//! failures (`SessionError`, parse misses) are values recorded on artifacts;
//! only structural and configuration errors abort a run.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Why a single host's CLI session stopped short of `Done`.
///
/// These are recorded on the host's capture and never abort the batch.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "detail", rename_all = "kebab-case")]
pub enum SessionError {
    #[error("connection timed out")]
    ConnectTimeout,

    #[error("connection refused")]
    ConnectRefused,

    #[error("connection failed: {0}")]
    ConnectFailed(String),

    #[error("protocol negotiation failed: {0}")]
    Negotiation(String),

    #[error("authentication timed out")]
    AuthTimeout,

    #[error("authentication rejected")]
    AuthRejected,

    #[error("command timed out: {0}")]
    CommandTimeout(String),

    #[error("session reset: {0}")]
    SessionReset(String),

    #[error("host deadline exceeded")]
    DeadlineExceeded,

    #[error("cancelled")]
    Cancelled,
}

impl SessionError {
    /// True when the transport itself could not be brought up, which is the
    /// only case where the collector retries over the secondary protocol.
    pub fn is_transport_failure(&self) -> bool {
        matches!(
            self,
            Self::ConnectTimeout | Self::ConnectRefused | Self::ConnectFailed(_) | Self::Negotiation(_)
        )
    }

    /// True for failures that happened after credentials were offered.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::AuthTimeout | Self::AuthRejected)
    }
}

/// Errors raised while loading or compiling parse templates.
#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("template '{template}': invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        template: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("template '{0}': {1}")]
    Invalid(String, String),

    #[error("failed to read template {path}: {reason}")]
    ReadFailed { path: PathBuf, reason: String },

    #[error("template JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not determine configuration directory")]
    DirectoryNotFound,

    #[error("failed to read config file {path}: {reason}")]
    ReadFailed { path: PathBuf, reason: String },

    #[error("failed to write config file {path}: {reason}")]
    WriteFailed { path: PathBuf, reason: String },

    #[error("invalid config format: {0}")]
    InvalidFormat(String),

    #[error("invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("invalid address or CIDR in exclusion list: {0}")]
    InvalidExclusion(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Command profile errors.
#[derive(Error, Debug)]
pub enum ProfileError {
    #[error("profile not found: {0}")]
    NotFound(String),

    #[error("invalid profile '{name}': {reason}")]
    Invalid { name: String, reason: String },

    #[error("profile '{0}' extends itself through a cycle")]
    ExtendsCycle(String),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

/// Artifact storage errors.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("run not found: {0}")]
    RunNotFound(String),

    #[error("artifact not found: {0}")]
    ArtifactNotFound(PathBuf),

    #[error("failed to save {path}: {reason}")]
    SaveFailed { path: PathBuf, reason: String },

    #[error("failed to load {path}: {reason}")]
    LoadFailed { path: PathBuf, reason: String },

    #[error("directory error: {0}")]
    DirectoryError(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A topology graph that breaks a structural invariant.
///
/// This is the one stage error that aborts a run: an invalid graph cannot be
/// rendered safely.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TopologyError {
    #[error("duplicate node identity: {0}")]
    DuplicateNode(String),

    #[error("node with empty identity")]
    EmptyIdentity,

    #[error("edge {edge} references missing node '{endpoint}'")]
    DanglingEdge { edge: String, endpoint: String },

    #[error("edge {0} is not stored in canonical endpoint order")]
    UnorderedEdge(String),

    #[error("duplicate edge {0}")]
    DuplicateEdge(String),

    #[error("edge {0} connects a node to itself")]
    SelfLoop(String),
}

/// Run-level pipeline failures.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("no targets left to scan after applying exclusions")]
    NoTargets,

    #[error("target error: {0}")]
    Target(#[from] crate::types::TargetError),

    #[error("structurally invalid topology: {0}")]
    Topology(#[from] TopologyError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("template error: {0}")]
    Template(#[from] TemplateError),

    #[error("profile error: {0}")]
    Profile(#[from] ProfileError),

    #[error("parse worker pool: {0}")]
    WorkerPool(String),
}

/// CLI-level errors.
#[derive(Error, Debug)]
pub enum CliError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Profile(#[from] ProfileError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Target(#[from] crate::types::TargetError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// Result type alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Result type alias for profile operations.
pub type ProfileResult<T> = Result<T, ProfileError>;

/// Result type alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type alias for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Result type alias for CLI operations.
pub type CliResult<T> = Result<T, CliError>;
