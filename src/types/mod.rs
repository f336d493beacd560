//! Core type definitions using newtype patterns for type safety.
//!
//! These types prevent common logic errors by making invalid states unrepresentable
//! at compile time.

mod port;
mod run_id;
mod target;

pub use port::{Port, PortError, PortList};
pub use run_id::{RunId, RunIdError};
pub use target::{expand_targets, TargetError, TargetSpec};
