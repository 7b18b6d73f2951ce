//! Backend registry: format lookup plus aggregation of the configuration
//! defaults and coercion schemas the registered backends contribute.

use crate::docker::DockerPackager;
use crate::packager::Packager;
use crate::parsedconfig::ParsedConfigPackager;
use crate::rpm::RpmPackager;
use tracing::debug;
use venvpack_config::{base_defaults, base_schema, merge_schema, Schema};

pub struct PluginRegistry {
    plugins: Vec<Box<dyn Packager>>,
}

impl PluginRegistry {
    /// The stock registry: rpm, docker, and parsed-config backends.
    pub fn builtin() -> Self {
        Self::with_plugins(vec![
            Box::new(RpmPackager::default()),
            Box::new(DockerPackager::default()),
            Box::new(ParsedConfigPackager::default()),
        ])
    }

    /// A registry over an explicit backend set, for embedding and tests.
    pub fn with_plugins(plugins: Vec<Box<dyn Packager>>) -> Self {
        Self { plugins }
    }

    pub fn plugins(&self) -> impl Iterator<Item = &dyn Packager> + '_ {
        self.plugins.iter().map(AsRef::as_ref)
    }

    /// Every registered format name, in registration order.
    pub fn formats(&self) -> Vec<&'static str> {
        self.plugins.iter().flat_map(|p| p.formats()).collect()
    }

    /// Formats whose external tooling is usable on this host.
    pub fn available_formats(&self) -> Vec<&'static str> {
        self.plugins
            .iter()
            .filter(|p| p.available())
            .flat_map(|p| p.formats())
            .collect()
    }

    /// The first backend whose format set contains `format`.
    pub fn select(&self, format: &str) -> Option<&dyn Packager> {
        let found = self
            .plugins
            .iter()
            .find(|p| p.formats().contains(&format))
            .map(AsRef::as_ref);
        if found.is_none() {
            debug!("no backend registered for format '{format}'");
        }
        found
    }

    /// Base defaults followed by each backend's default configuration, in
    /// registration order so later registrations override earlier ones.
    pub fn merged_defaults(&self) -> String {
        let mut text = String::from(base_defaults());
        for plugin in &self.plugins {
            let chunk = plugin.default_config_text();
            if chunk.is_empty() {
                continue;
            }
            if !text.ends_with('\n') {
                text.push('\n');
            }
            text.push('\n');
            text.push_str(chunk);
        }
        text
    }

    /// The base coercion schema deep-merged with every backend's schema.
    pub fn merged_schema(&self) -> Schema {
        let mut schema = base_schema();
        for plugin in &self.plugins {
            merge_schema(&mut schema, &plugin.config_schema());
        }
        schema
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
