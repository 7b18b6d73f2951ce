//! The [`Packager`] trait and the shared build orchestration every backend
//! runs through.

use crate::wheel::{self, HashAlgorithm, PipCommand};
use crate::PluginError;
use std::path::PathBuf;
use std::process::Command;
use tracing::{debug, info};
use venvpack_config::{write_ini_string, Config, Schema, Value};

/// Per-build working state handed to a backend: the scratch directory the
/// build runs in, the wheel cache inside it, and the pip invocation.
#[derive(Debug, Clone)]
pub struct PackageContext {
    pub scratch: PathBuf,
    pub wheel_dir: PathBuf,
    pub pip: PipCommand,
}

impl PackageContext {
    pub fn new(scratch: impl Into<PathBuf>, pip: PipCommand) -> Self {
        let scratch = scratch.into();
        let wheel_dir = scratch.join("wheels");
        Self {
            scratch,
            wheel_dir,
            pip,
        }
    }

    /// Path of the resolved configuration file inside the scratch directory.
    pub fn deploy_conf(&self) -> PathBuf {
        self.scratch.join("deploy.conf")
    }
}

/// Filename of the compressed wheel cache inside the scratch directory.
pub const WHEEL_ARCHIVE: &str = "wheels.tar.gz";

/// What a backend produced. `artifact` is the path of the package file
/// inside the scratch directory; `None` means the tool reported success
/// without yielding a file.
#[derive(Debug, Clone)]
pub struct BuildOutcome {
    pub artifact: Option<PathBuf>,
}

/// A package format backend.
///
/// Backends contribute configuration defaults and a coercion schema, report
/// whether their external tooling is present, and build one artifact from a
/// prepared scratch directory.
pub trait Packager {
    /// The canonical format name, e.g. `rpm`.
    fn format(&self) -> &'static str;

    /// Every format name this backend serves. Selection matches any of
    /// them; defaults to just the canonical name.
    fn formats(&self) -> Vec<&'static str> {
        vec![self.format()]
    }

    /// Filename extension of produced artifacts, without the dot.
    fn extension(&self) -> &'static str {
        ""
    }

    /// Whether the backend's external tooling is usable on this host.
    fn available(&self) -> bool;

    /// INI text merged below user configuration during resolution.
    fn default_config_text(&self) -> &'static str {
        ""
    }

    /// Value kinds for the settings this backend owns.
    fn config_schema(&self) -> Schema {
        Schema::new()
    }

    /// The build-control template this backend renders, e.g. an rpm spec
    /// file or a Dockerfile.
    fn template(&self) -> &'static str {
        ""
    }

    /// Default filename for the rendered build-control file.
    fn config_filename(&self) -> &'static str {
        ""
    }

    /// Whether this format embeds locally materialized wheels. Backends
    /// that resolve dependencies at image build time return false, which
    /// skips materialization and hash pinning entirely.
    fn uses_local_wheels(&self) -> bool {
        true
    }

    /// Digest scheme for pinned requirement lines when hashing is on.
    fn hash_algorithm(&self) -> HashAlgorithm {
        HashAlgorithm::Sha256
    }

    /// Bundle the wheel cache as `wheels.tar.gz` next to it in the scratch
    /// directory, so the wheels travel with the package sources as one file.
    /// Runs only for formats that embed local wheels; in-process backends
    /// with no external tooling override this to a no-op.
    fn archive_wheels(&self, ctx: &PackageContext) -> Result<(), PluginError> {
        let tar = require_tool("tar")?;
        run_tool(
            "tar",
            Command::new(tar)
                .args(["-czf", WHEEL_ARCHIVE, "wheels"])
                .current_dir(&ctx.scratch),
        )?;
        Ok(())
    }

    /// Copy files the configuration declares into the scratch directory.
    /// A missing declared source file must be a loud error.
    fn stage_files(&self, _config: &Config, _ctx: &PackageContext) -> Result<(), PluginError> {
        Ok(())
    }

    /// Inject computed settings needed by templates or the build tool.
    /// Runs after wheels are materialized, before the build command.
    fn add_build_configuration(
        &self,
        _config: &mut Config,
        _ctx: &PackageContext,
    ) -> Result<(), PluginError> {
        Ok(())
    }

    /// Run the external build and return the artifact it wrote, if any.
    fn run_package_command(
        &self,
        config: &Config,
        ctx: &PackageContext,
    ) -> Result<Option<PathBuf>, PluginError>;
}

/// Build one package in an already-populated scratch directory.
///
/// Shared steps, in order: materialize the `pip.deps` wheels into the wheel
/// cache, archive the cache, replace `pip.deps` with the pinned requirement
/// lines and record `pip.noarch`, rewrite `deploy.conf` so the pins travel
/// with the artifact, let the backend inject its computed settings, then run
/// the build command.
pub fn build_package(
    plugin: &dyn Packager,
    config: &mut Config,
    ctx: &PackageContext,
) -> Result<BuildOutcome, PluginError> {
    std::fs::create_dir_all(&ctx.wheel_dir)?;

    plugin.stage_files(config, ctx)?;

    let wheels = if plugin.uses_local_wheels() {
        let deps = config.get_list("pip", "deps");
        let hash = if config.get_bool("pip", "hash_dependencies") {
            Some(plugin.hash_algorithm())
        } else {
            None
        };
        info!(
            format = plugin.format(),
            dependencies = deps.len(),
            "materializing wheels"
        );
        let wheels = wheel::materialize(&ctx.pip, &deps, &ctx.wheel_dir, hash)?;
        plugin.archive_wheels(ctx)?;
        wheels
    } else {
        debug!(
            format = plugin.format(),
            "format resolves dependencies at build time, skipping wheels"
        );
        wheel::WheelSet {
            hashes: std::collections::BTreeMap::new(),
            noarch: true,
        }
    };

    if !wheels.hashes.is_empty() {
        let pinned: Vec<String> = wheels.hashes.values().cloned().collect();
        config.set("pip", "deps", Value::List(pinned));
    }
    config.set("pip", "noarch", Value::Bool(wheels.noarch));

    // The scratch copy of deploy.conf is what ships inside the package, so
    // it has to carry the pinned dependency lines.
    std::fs::write(ctx.deploy_conf(), write_ini_string(config))?;

    plugin.add_build_configuration(config, ctx)?;

    info!(format = plugin.format(), "running package build");
    let artifact = plugin.run_package_command(config, ctx)?;
    if let Some(path) = &artifact {
        debug!("backend produced {}", path.display());
    }
    Ok(BuildOutcome { artifact })
}

/// Run an external build tool, capturing interleaved stdout/stderr. A
/// non-zero exit or spawn failure becomes [`PluginError::ToolFailed`] with
/// the captured text attached.
pub fn run_tool(tool: &str, cmd: &mut Command) -> Result<String, PluginError> {
    debug!("running {cmd:?}");
    let output = cmd.output().map_err(|err| PluginError::ToolFailed {
        tool: tool.to_owned(),
        status: "spawn failure".to_owned(),
        output: err.to_string(),
    })?;
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    if output.status.success() {
        Ok(text)
    } else {
        Err(PluginError::ToolFailed {
            tool: tool.to_owned(),
            status: output.status.to_string(),
            output: text,
        })
    }
}

/// Require `program` on PATH, mapping absence to a diagnostic that names it.
pub fn require_tool(program: &str) -> Result<PathBuf, PluginError> {
    which::which(program).map_err(|_| PluginError::ExecutableNotFound(program.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct RecordingPackager {
        configured: AtomicBool,
    }

    impl Packager for RecordingPackager {
        fn format(&self) -> &'static str {
            "recording"
        }

        fn available(&self) -> bool {
            true
        }

        fn add_build_configuration(
            &self,
            config: &mut Config,
            _ctx: &PackageContext,
        ) -> Result<(), PluginError> {
            self.configured.store(true, Ordering::SeqCst);
            config.set_str("recording", "touched", "yes");
            Ok(())
        }

        fn run_package_command(
            &self,
            config: &Config,
            ctx: &PackageContext,
        ) -> Result<Option<PathBuf>, PluginError> {
            assert_eq!(config.get_str("recording", "touched"), "yes");
            let artifact = ctx.scratch.join("out.pkg");
            std::fs::write(&artifact, b"artifact")?;
            Ok(Some(artifact))
        }
    }

    #[test]
    fn build_runs_shared_steps_in_order() {
        let scratch = tempfile::tempdir().unwrap();
        let ctx = PackageContext::new(
            scratch.path(),
            PipCommand::new("/nonexistent/interpreter", Vec::new()),
        );
        let plugin = RecordingPackager {
            configured: AtomicBool::new(false),
        };
        let mut config = Config::new();
        config.set("pip", "deps", Value::List(Vec::new()));

        let outcome = build_package(&plugin, &mut config, &ctx).unwrap();

        assert!(plugin.configured.load(Ordering::SeqCst));
        assert_eq!(outcome.artifact, Some(scratch.path().join("out.pkg")));
        assert!(ctx.wheel_dir.is_dir());
        // No wheels, so the environment is architecture independent.
        assert!(config.get_bool("pip", "noarch"));

        let written = std::fs::read_to_string(ctx.deploy_conf()).unwrap();
        assert!(written.contains("[pip]"));
        assert!(written.contains("noarch"));
    }

    struct NoWheelPackager {
        archived: AtomicBool,
    }

    impl Packager for NoWheelPackager {
        fn format(&self) -> &'static str {
            "nowheel"
        }

        fn available(&self) -> bool {
            true
        }

        fn uses_local_wheels(&self) -> bool {
            false
        }

        fn archive_wheels(&self, _ctx: &PackageContext) -> Result<(), PluginError> {
            self.archived.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn run_package_command(
            &self,
            _config: &Config,
            _ctx: &PackageContext,
        ) -> Result<Option<PathBuf>, PluginError> {
            Ok(None)
        }
    }

    #[test]
    fn wheel_cache_is_archived_into_the_scratch_dir() {
        let scratch = tempfile::tempdir().unwrap();
        let ctx = PackageContext::new(
            scratch.path(),
            PipCommand::new("/nonexistent/interpreter", Vec::new()),
        );
        let plugin = RecordingPackager {
            configured: AtomicBool::new(false),
        };
        let mut config = Config::new();
        config.set("pip", "deps", Value::List(Vec::new()));

        build_package(&plugin, &mut config, &ctx).unwrap();

        assert!(scratch.path().join(WHEEL_ARCHIVE).is_file());
    }

    #[test]
    fn formats_without_local_wheels_skip_the_archive() {
        let scratch = tempfile::tempdir().unwrap();
        let ctx = PackageContext::new(
            scratch.path(),
            PipCommand::new("/nonexistent/interpreter", Vec::new()),
        );
        let plugin = NoWheelPackager {
            archived: AtomicBool::new(false),
        };
        let mut config = Config::new();

        build_package(&plugin, &mut config, &ctx).unwrap();

        assert!(!plugin.archived.load(Ordering::SeqCst));
        assert!(!scratch.path().join(WHEEL_ARCHIVE).exists());
    }

    #[test]
    fn format_set_defaults_to_the_canonical_name() {
        let plugin = NoWheelPackager {
            archived: AtomicBool::new(false),
        };
        assert_eq!(plugin.formats(), vec!["nowheel"]);
    }

    #[test]
    fn tool_failure_carries_output() {
        let err = run_tool("false", Command::new("false").arg("--flag")).unwrap_err();
        match err {
            PluginError::ToolFailed { tool, status, .. } => {
                assert_eq!(tool, "false");
                assert!(status.contains('1'));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
