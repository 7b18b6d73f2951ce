//! Packaging pipeline orchestration for venvpack.
//!
//! This crate ties the configuration layer and the format backends together
//! into the `Engine` — the central API for turning a `deploy.conf` into a
//! finished package artifact, previewing build-control files, and querying
//! resolved settings.

pub mod engine;

pub use engine::{Engine, FormatStatus};

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("configuration error: {0}")]
    Config(#[from] venvpack_config::ConfigError),
    #[error("plugin error: {0}")]
    Plugin(#[from] venvpack_plugins::PluginError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no supported package creation plugins found")]
    NoPackagersAvailable,
    #[error("package format '{0}' is not supported on this host")]
    FormatNotSupported(String),
    #[error("the '{0}' plugin did not produce a package")]
    NoPackageProduced(String),
    #[error("the '{format}' plugin reported artifact {artifact} but it was not created")]
    PackageGenerationFailed { format: String, artifact: PathBuf },
    #[error("destination directory {0} is not writable")]
    DestinationNotWritable(PathBuf),
}
