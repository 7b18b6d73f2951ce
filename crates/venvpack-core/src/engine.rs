use crate::CoreError;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use venvpack_config::{read_config_text, render_config_text, resolve, Config};
use venvpack_plugins::{
    build_package, render_template, PackageContext, Packager, PipCommand, PluginRegistry,
};

/// Central orchestrator for the packaging pipeline.
///
/// Holds the backend registry and the path of the deploy configuration;
/// every operation resolves the configuration fresh so runs never observe
/// state from a previous invocation.
pub struct Engine {
    registry: PluginRegistry,
    deploy_conf: PathBuf,
}

/// One registered format and whether its tooling is usable on this host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatStatus {
    pub format: &'static str,
    pub available: bool,
}

impl Engine {
    /// An engine over the builtin backends.
    pub fn new(deploy_conf: impl Into<PathBuf>) -> Self {
        Self::with_registry(deploy_conf, PluginRegistry::builtin())
    }

    /// An engine over an explicit backend set, for embedding and tests.
    pub fn with_registry(deploy_conf: impl Into<PathBuf>, registry: PluginRegistry) -> Self {
        Self {
            registry,
            deploy_conf: deploy_conf.into(),
        }
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    /// Resolve the layered configuration: registry defaults below the deploy
    /// configuration, coerced by the merged schema. A missing deploy file
    /// resolves to the defaults alone.
    pub fn resolved_config(&self) -> Config {
        resolve(
            &self.registry.merged_defaults(),
            &[self.deploy_conf.clone()],
            &self.registry.merged_schema(),
        )
    }

    /// Build one package of `format` and place it in `dest`.
    ///
    /// The whole build runs in a scratch directory that is removed on every
    /// exit path; the deploy configuration is copied in verbatim so the
    /// original file is never touched. The returned path is the artifact
    /// moved into `dest`, or the artifact's own name for formats whose
    /// output is not a file (a container image tag).
    pub fn create_package(&self, format: &str, dest: &Path) -> Result<PathBuf, CoreError> {
        if self.registry.available_formats().is_empty() {
            return Err(CoreError::NoPackagersAvailable);
        }
        let plugin = self
            .registry
            .select(format)
            .filter(|p| p.available())
            .ok_or_else(|| CoreError::FormatNotSupported(format.to_owned()))?;

        let text = read_config_text(&self.deploy_conf)?;

        // Fail on an unwritable destination before any tool runs.
        if tempfile::tempfile_in(dest).is_err() {
            return Err(CoreError::DestinationNotWritable(dest.to_path_buf()));
        }

        let scratch = tempfile::tempdir()?;
        std::fs::write(scratch.path().join("deploy.conf"), &text)?;

        let mut config = resolve(
            &self.registry.merged_defaults(),
            &[scratch.path().join("deploy.conf")],
            &self.registry.merged_schema(),
        );
        let ctx = PackageContext::new(scratch.path(), self.pip_for(plugin, &config)?);

        info!(format, "building package");
        let outcome = build_package(plugin, &mut config, &ctx)?;
        let artifact = outcome
            .artifact
            .ok_or_else(|| CoreError::NoPackageProduced(format.to_owned()))?;

        if artifact.is_file() {
            let name = artifact
                .file_name()
                .ok_or_else(|| CoreError::PackageGenerationFailed {
                    format: format.to_owned(),
                    artifact: artifact.clone(),
                })?;
            let dest_path = dest.join(name);
            move_file(&artifact, &dest_path)?;
            info!("generated package file {}", dest_path.display());
            Ok(dest_path)
        } else if artifact.is_absolute() {
            Err(CoreError::PackageGenerationFailed {
                format: format.to_owned(),
                artifact,
            })
        } else {
            // Named artifact such as an image tag; nothing to move.
            info!("generated package {}", artifact.display());
            Ok(artifact)
        }
    }

    /// Render the build-control file for `format` (rpm spec, Dockerfile,
    /// parsed deploy configuration) to `outfile` or the backend's default
    /// filename, without running the build. Returns the written path.
    pub fn create_package_config(
        &self,
        format: &str,
        outfile: Option<&Path>,
    ) -> Result<PathBuf, CoreError> {
        if self.registry.available_formats().is_empty() {
            return Err(CoreError::NoPackagersAvailable);
        }
        let plugin = self
            .registry
            .select(format)
            .ok_or_else(|| CoreError::FormatNotSupported(format.to_owned()))?;

        let text = read_config_text(&self.deploy_conf)?;

        let rendered = if plugin.template().is_empty() {
            render_config_text(&text)
        } else {
            let scratch = tempfile::tempdir()?;
            std::fs::write(scratch.path().join("deploy.conf"), &text)?;
            let mut config = resolve(
                &self.registry.merged_defaults(),
                &[scratch.path().join("deploy.conf")],
                &self.registry.merged_schema(),
            );
            let ctx = PackageContext::new(scratch.path(), self.pip_for(plugin, &config)?);
            plugin.add_build_configuration(&mut config, &ctx)?;
            render_template(plugin.template(), &config).map_err(venvpack_plugins::PluginError::from)?
        };

        let out = outfile
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(plugin.config_filename()));
        std::fs::write(&out, rendered)?;
        debug!("wrote build configuration {}", out.display());
        Ok(out)
    }

    /// Value of one resolved setting, rendered as configuration text.
    /// Missing sections and settings are errors naming what was absent.
    pub fn get_setting(&self, section: &str, item: &str) -> Result<String, CoreError> {
        let config = self.resolved_config();
        Ok(config.require(section, item)?.as_str())
    }

    /// Every registered format with its availability, in registration order.
    /// A backend serving several format names contributes one entry each.
    pub fn list_formats(&self) -> Vec<FormatStatus> {
        self.registry
            .plugins()
            .flat_map(|plugin| {
                plugin.formats().into_iter().map(move |format| FormatStatus {
                    format,
                    available: plugin.available(),
                })
            })
            .collect()
    }

    fn pip_for(&self, plugin: &dyn Packager, config: &Config) -> Result<PipCommand, CoreError> {
        // Resolving the interpreter on PATH only matters when wheels will
        // actually be materialized; an empty dependency list never spawns pip.
        if plugin.uses_local_wheels() && !config.get_list("pip", "deps").is_empty() {
            Ok(PipCommand::from_config(config)?)
        } else {
            Ok(PipCommand::new("python3", vec!["-m".to_owned(), "pip".to_owned()]))
        }
    }
}

/// Rename with a copy-and-remove fallback for cross-device moves.
fn move_file(source: &Path, dest: &Path) -> Result<(), CoreError> {
    if std::fs::rename(source, dest).is_err() {
        std::fs::copy(source, dest)?;
        std::fs::remove_file(source)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use venvpack_plugins::mock::MockPackager;

    fn write_deploy_conf(dir: &Path) -> PathBuf {
        let path = dir.join("deploy.conf");
        std::fs::write(
            &path,
            "[global]\nname = demoapp\nversion = 1.2.3\n\n[pip]\ndeps:\n",
        )
        .unwrap();
        path
    }

    fn mock_engine(deploy_conf: &Path, plugin: MockPackager) -> Engine {
        Engine::with_registry(
            deploy_conf,
            PluginRegistry::with_plugins(vec![Box::new(plugin)]),
        )
    }

    #[test]
    fn create_package_moves_the_artifact_to_the_destination() {
        let dir = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        let deploy_conf = write_deploy_conf(dir.path());
        let engine = mock_engine(&deploy_conf, MockPackager::default());

        let artifact = engine.create_package("mock", dest.path()).unwrap();
        assert_eq!(artifact, dest.path().join("mock-package.mock"));
        assert!(artifact.is_file());
    }

    #[test]
    fn source_configuration_survives_a_build_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        let deploy_conf = write_deploy_conf(dir.path());
        let before = std::fs::read_to_string(&deploy_conf).unwrap();

        let engine = mock_engine(&deploy_conf, MockPackager::default());
        engine.create_package("mock", dest.path()).unwrap();

        assert_eq!(std::fs::read_to_string(&deploy_conf).unwrap(), before);
    }

    #[test]
    fn unknown_format_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let deploy_conf = write_deploy_conf(dir.path());
        let engine = mock_engine(&deploy_conf, MockPackager::default());

        let err = engine.create_package("bogus", dir.path()).unwrap_err();
        assert!(matches!(err, CoreError::FormatNotSupported(f) if f == "bogus"));
    }

    #[test]
    fn no_available_backends_fails_before_reading_config() {
        let dir = tempfile::tempdir().unwrap();
        let engine = mock_engine(
            &dir.path().join("missing-deploy.conf"),
            MockPackager {
                available: false,
                ..MockPackager::default()
            },
        );
        let err = engine.create_package("mock", dir.path()).unwrap_err();
        assert!(matches!(err, CoreError::NoPackagersAvailable));
    }

    #[test]
    fn missing_deploy_conf_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let engine = mock_engine(
            &dir.path().join("missing-deploy.conf"),
            MockPackager::default(),
        );
        let err = engine.create_package("mock", dir.path()).unwrap_err();
        assert!(matches!(err, CoreError::Config(_)));
    }

    #[test]
    fn backend_reporting_no_artifact_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let deploy_conf = write_deploy_conf(dir.path());
        let engine = mock_engine(
            &deploy_conf,
            MockPackager {
                artifact_name: None,
                ..MockPackager::default()
            },
        );
        let err = engine.create_package("mock", dir.path()).unwrap_err();
        assert!(matches!(err, CoreError::NoPackageProduced(f) if f == "mock"));
    }

    #[test]
    fn backend_failure_surfaces_the_tool_output() {
        let dir = tempfile::tempdir().unwrap();
        let deploy_conf = write_deploy_conf(dir.path());
        let engine = mock_engine(
            &deploy_conf,
            MockPackager {
                fail_with: Some("build exploded".to_owned()),
                ..MockPackager::default()
            },
        );
        let err = engine.create_package("mock", dir.path()).unwrap_err();
        assert!(err.to_string().contains("build exploded"));
    }

    #[test]
    fn get_setting_reads_resolved_values() {
        let dir = tempfile::tempdir().unwrap();
        let deploy_conf = write_deploy_conf(dir.path());
        let engine = mock_engine(&deploy_conf, MockPackager::default());

        assert_eq!(engine.get_setting("global", "name").unwrap(), "demoapp");
        // Registry defaults resolve even when the deploy file is silent.
        assert_eq!(
            engine.get_setting("pip", "hash_dependencies").unwrap(),
            "true"
        );
        assert!(matches!(
            engine.get_setting("global", "bogus").unwrap_err(),
            CoreError::Config(_)
        ));
    }

    #[test]
    fn list_formats_reports_availability() {
        let dir = tempfile::tempdir().unwrap();
        let deploy_conf = write_deploy_conf(dir.path());
        let engine = mock_engine(
            &deploy_conf,
            MockPackager {
                available: false,
                ..MockPackager::default()
            },
        );
        assert_eq!(
            engine.list_formats(),
            vec![FormatStatus {
                format: "mock",
                available: false
            }]
        );
    }

    #[test]
    fn create_package_config_writes_the_rendered_template() {
        let dir = tempfile::tempdir().unwrap();
        let deploy_conf = write_deploy_conf(dir.path());
        let engine = Engine::new(&deploy_conf);

        let outfile = dir.path().join("Dockerfile.preview");
        let written = engine
            .create_package_config("docker", Some(&outfile))
            .unwrap();
        assert_eq!(written, outfile);
        let text = std::fs::read_to_string(&outfile).unwrap();
        assert!(text.starts_with("FROM "));
        assert!(text.contains("COPY deploy.conf /var/lib/venvpack/deploy.conf"));
    }
}
