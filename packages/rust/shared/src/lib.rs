//! Shared types, error model, and configuration for bidforge.
//!
//! This crate is the foundation depended on by all other bidforge crates.
//! It provides:
//! - [`BidforgeError`] — the unified error type
//! - Domain types ([`RequirementItem`], [`EvidenceCandidate`], [`MergedSection`], [`BuildMeta`])
//! - Chat message types ([`Message`], [`Role`])
//! - Configuration ([`AppConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DashscopeConfig, DefaultsConfig, config_dir, config_file_path, init_config,
    load_config, load_config_from, resolve_api_key,
};
pub use error::{BidforgeError, Result};
pub use types::{
    BuildMeta, CandidateMeta, EvidenceCandidate, MergedSection, Message, RequirementItem, Role,
    SectionMeta,
};
