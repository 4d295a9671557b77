//! Typed configuration tree, hashed snapshots, and the reload plan.
//!
//! The config file is the single source of truth for gateway behavior. Every
//! mutating operation that depends on a prior snapshot presents a `baseHash`;
//! writes are all-or-nothing (temp file + rename).

pub mod diff;
pub mod env_subst;
pub mod model_catalog;
pub mod paths;
pub mod reload;
pub mod schema;
pub mod snapshot;
pub mod validate;

pub use {
    diff::diff_paths,
    paths::{admin_pipe_path, state_dir},
    reload::{ReloadClass, ReloadMode, ReloadPlan, classify_paths},
    schema::{
        AuthType, CachedTool, GatewayConfig, McpPreset, McpProviderEntry, ProviderConnection,
        ProviderSource, normalize_provider_id,
    },
    snapshot::{ConfigIssue, ConfigSnapshot, ConfigStore, Error, Result, canonical_json},
};
