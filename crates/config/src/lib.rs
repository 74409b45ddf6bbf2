//! Configuration loading, env substitution, and environment overrides.
//!
//! Config file: `jamra.toml` (or `jamra.json`).
//! Searched in `./` then the user config directory (`~/.config/jamra/`).
//!
//! Supports `${ENV_VAR}` substitution in all string values, and `JAMRA_*`
//! environment variables override individual keys after parsing.

pub mod env_subst;
pub mod loader;
pub mod schema;

pub use {
    loader::{
        apply_env_overrides, clear_config_dir, clear_data_dir, config_dir, data_dir,
        discover_and_load, load_config, set_config_dir, set_data_dir,
    },
    schema::{
        DatabaseConfig, Environment, ExtensionsConfig, InstallerConfig, JamraConfig,
        RuntimeConfig, SandboxConfig,
    },
};
