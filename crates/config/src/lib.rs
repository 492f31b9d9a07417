//! Configuration loading, env substitution, and validation.
//!
//! Config files: `courier.toml`, `courier.yaml`, or `courier.json`
//! Searched in `./` then the user config directory.
//!
//! Supports `${ENV_VAR}` and `${ENV_VAR:-fallback}` substitution.

pub mod env_subst;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    loader::{
        config_dir, discover_and_load, find_config_file, load_config, load_or_discover,
        to_toml_string,
    },
    schema::{
        CatalogConfig, ChannelConfig, CourierConfig, GeneratorConfig, PipelineConfig,
        UnregisteredPolicy,
    },
    validate::{Diagnostic, Severity, ValidationResult, validate},
};
