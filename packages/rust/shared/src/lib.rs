//! Shared types, error model, and configuration for imageset.
//!
//! This crate is the foundation depended on by all other imageset crates.
//! It provides:
//! - [`DatasetError`]: the unified error type
//! - Domain types ([`DomainSpec`], [`SearchHit`], [`ImageRecord`], [`Dataset`])
//! - Configuration ([`AppConfig`], [`BuildConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    ApiKey, AppConfig, BuildConfig, BuildOverrides, DefaultsConfig, HttpConfig, HttpSettings,
    LlmConfig, LlmSettings, SearchConfig, SearchSettings, config_dir, config_file_path,
    init_config, load_config, load_config_from, metadata_path,
};
pub use error::{DatasetError, Result};
pub use types::{
    Dataset, DatasetMetadata, DomainSpec, ImageRecord, MAX_CONTEXT_CHARS, SearchHit,
};
