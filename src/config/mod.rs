//! Configuration management for netdocs.
//!
//! Provides XDG-compliant configuration storage and management,
//! including vendor command profiles and pipeline settings.

mod profiles;
mod settings;

pub use profiles::{CommandProfile, ProfileManager, ResolvedProfile, GENERIC_PROFILE};
pub use settings::{
    CollectSettings, ParseSettings, Paths, ProbeSettings, Settings, VendorHint,
};
