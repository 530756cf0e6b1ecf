//! Shared types, error model, and configuration for docharvest.
//!
//! This crate is the foundation depended on by all other docharvest crates.
//! It provides:
//! - [`HarvestError`]: the unified error type
//! - Domain types ([`ChangeRecord`], [`FetchResult`], [`Block`], [`Section`], [`Bundle`])
//! - Configuration ([`AppConfig`], [`RunConfig`], config loading)
//! - [`sanitize_for_filename`]: the single title → path segment mapping

pub mod config;
pub mod error;
pub mod sanitize;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, BundleConfig, ConfluenceConfig, DefaultsConfig, GdocsConfig, RunConfig,
    config_dir, config_file_path, init_config, load_config, load_config_from, read_secret,
};
pub use error::{HarvestError, Result};
pub use sanitize::sanitize_for_filename;
pub use types::{
    Block, Bundle, BundleMember, BundleMetadata, CURRENT_SCHEMA_VERSION, ChangeRecord,
    DocumentRecord, DocumentTree, FetchResult, FetchStatus, INTRO_HEADING, RunId, RunReport,
    Section, SourceKind,
};
