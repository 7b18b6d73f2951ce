//! parsed-config backend: the "package" is the deploy configuration itself
//! with every environment placeholder substituted. Needs no external tools.

use crate::packager::{PackageContext, Packager};
use crate::PluginError;
use std::path::PathBuf;
use tracing::debug;
use venvpack_config::{render_config_text, Config};

#[derive(Debug, Default)]
pub struct ParsedConfigPackager;

impl Packager for ParsedConfigPackager {
    fn format(&self) -> &'static str {
        "parsed-config"
    }

    fn extension(&self) -> &'static str {
        "parsed"
    }

    fn available(&self) -> bool {
        true
    }

    fn config_filename(&self) -> &'static str {
        "deploy.conf.parsed"
    }

    fn run_package_command(
        &self,
        _config: &Config,
        ctx: &PackageContext,
    ) -> Result<Option<PathBuf>, PluginError> {
        let source = ctx.deploy_conf();
        let text = std::fs::read_to_string(&source)?;
        let parsed = ctx.scratch.join(self.config_filename());
        std::fs::write(&parsed, render_config_text(&text))?;
        debug!("wrote parsed configuration {}", parsed.display());
        Ok(Some(parsed))
    }
}
