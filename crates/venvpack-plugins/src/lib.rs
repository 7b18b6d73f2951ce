//! Packaging backends for venvpack.
//!
//! This crate implements the format layer: the pluggable [`Packager`] trait
//! with rpm, docker, and parsed-config backends, the registry that selects a
//! backend by format name and aggregates configuration defaults, the wheel
//! materializer that turns a dependency list into pinned hashed artifacts,
//! and the manifest template renderer.

pub mod docker;
pub mod mock;
pub mod packager;
pub mod parsedconfig;
pub mod registry;
pub mod rpm;
pub mod template;
pub mod wheel;

pub use packager::{
    build_package, require_tool, run_tool, BuildOutcome, PackageContext, Packager, WHEEL_ARCHIVE,
};
pub use registry::PluginRegistry;
pub use template::render_template;
pub use wheel::{materialize, HashAlgorithm, PipCommand, WheelSet};

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("plugin I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Config(#[from] venvpack_config::ConfigError),
    #[error("template error: {0}")]
    Template(#[from] template::TemplateError),
    #[error("declared file {0} was not found")]
    DeclaredFileMissing(PathBuf),
    #[error("required executable '{0}' was not found on PATH")]
    ExecutableNotFound(String),
    #[error("{tool} exited with {status}:\n{output}")]
    ToolFailed {
        tool: String,
        status: String,
        output: String,
    },
    #[error(
        "building wheels failed and the download fallback also failed\n\
         wheel build output:\n{build_output}\ndownload output:\n{download_output}"
    )]
    MaterializeFailed {
        build_output: String,
        download_output: String,
    },
}
