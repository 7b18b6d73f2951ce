//! A configurable in-process backend for tests. It produces a placeholder
//! artifact file without invoking any external tooling.

use crate::packager::{PackageContext, Packager};
use crate::PluginError;
use std::path::PathBuf;
use venvpack_config::{Config, Schema, ValueKind};

#[derive(Debug, Clone)]
pub struct MockPackager {
    pub available: bool,
    /// Artifact filename to create; `None` reports success with no file.
    pub artifact_name: Option<String>,
    /// Fail the build command with this message instead of producing output.
    pub fail_with: Option<String>,
}

impl Default for MockPackager {
    fn default() -> Self {
        Self {
            available: true,
            artifact_name: Some("mock-package.mock".to_owned()),
            fail_with: None,
        }
    }
}

impl Packager for MockPackager {
    fn format(&self) -> &'static str {
        "mock"
    }

    fn extension(&self) -> &'static str {
        "mock"
    }

    fn available(&self) -> bool {
        self.available
    }

    fn default_config_text(&self) -> &'static str {
        "[mock]\nflag = False\n"
    }

    fn config_schema(&self) -> Schema {
        let mut schema = Schema::new();
        schema
            .entry("mock".to_owned())
            .or_default()
            .insert("flag".to_owned(), ValueKind::Bool);
        schema
    }

    // No external tooling, so nothing shells out to tar either.
    fn archive_wheels(&self, _ctx: &PackageContext) -> Result<(), PluginError> {
        Ok(())
    }

    fn run_package_command(
        &self,
        _config: &Config,
        ctx: &PackageContext,
    ) -> Result<Option<PathBuf>, PluginError> {
        if let Some(message) = &self.fail_with {
            return Err(PluginError::ToolFailed {
                tool: "mock".to_owned(),
                status: "exit status: 1".to_owned(),
                output: message.clone(),
            });
        }
        match &self.artifact_name {
            Some(name) => {
                let path = ctx.scratch.join(name);
                std::fs::write(&path, b"mock artifact\n")?;
                Ok(Some(path))
            }
            None => Ok(None),
        }
    }
}
