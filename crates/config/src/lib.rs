//! Configuration loading, env substitution, and validation.
//!
//! Config files: `patchbay.toml`, `patchbay.yaml`, or `patchbay.json`
//! Searched in `./` then `~/.config/patchbay/`.
//!
//! Supports `${ENV_VAR}` and `${ENV_VAR:-fallback}` substitution in all values.

pub mod env_subst;
pub mod error;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    error::{Error, Result},
    loader::{
        clear_data_dir, config_dir, data_dir, discover_and_load, find_config_file, load_config,
        set_data_dir,
    },
    schema::{HandlersConfig, HttpConfig, PatchbayConfig, StateConfig},
    validate::{Diagnostic, Severity, ValidationResult},
};
