//! Deploy configuration layer for venvpack.
//!
//! This crate defines the settings model: INI-style `deploy.conf` parsing
//! (`ini`), typed values and coercion schemas (`value`), `{{VAR}}` environment
//! substitution (`envsubst`), and the layered resolver (`resolve`) that merges
//! defaults with user configuration into a single [`Config`] mapping.

pub mod envsubst;
pub mod ini;
pub mod resolve;
pub mod value;

pub use envsubst::{expand_env, expand_with};
pub use ini::{parse_ini_str, write_ini_string};
pub use resolve::{
    base_defaults, base_schema, default_virtualenv_directory, package_scripts_directory,
    read_config_text, render_config_text, resolve, resolve_with_env,
};
pub use value::{merge_schema, Config, Schema, Value, ValueKind};

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("configuration has no '{0}' section")]
    MissingSection(String),
    #[error("configuration has no '{section}.{key}' setting")]
    MissingSetting { section: String, key: String },
}
