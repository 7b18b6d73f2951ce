//! Wheel materialization: turn the configured dependency list into pinned,
//! content-hashed installable artifacts inside the scratch directory.

use crate::PluginError;
use sha2::{Digest, Sha256, Sha384, Sha512};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, warn};
use venvpack_config::Config;

/// The packaging tool's own runtime dependency. It is always added to the
/// wheel batch so the rendered manifest's install-time commands can deploy
/// the target environment without reaching an index.
pub const DEPLOY_RUNTIME_PACKAGE: &str = "venvpack";

/// Content-hash scheme for pinned requirement lines, pip `--hash` style.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgorithm {
    pub fn name(self) -> &'static str {
        match self {
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Sha384 => "sha384",
            HashAlgorithm::Sha512 => "sha512",
        }
    }

    /// Hex digest of a file's contents.
    pub fn digest_file(self, path: &Path) -> std::io::Result<String> {
        let mut handle = std::fs::File::open(path)?;
        let mut buffer = [0u8; 64 * 1024];

        fn fold<D: Digest>(
            handle: &mut std::fs::File,
            buffer: &mut [u8],
        ) -> std::io::Result<String> {
            let mut hasher = D::new();
            loop {
                let read = handle.read(buffer)?;
                if read == 0 {
                    break;
                }
                hasher.update(&buffer[..read]);
            }
            Ok(hasher
                .finalize()
                .iter()
                .map(|byte| format!("{byte:02x}"))
                .collect())
        }

        match self {
            HashAlgorithm::Sha256 => fold::<Sha256>(&mut handle, &mut buffer),
            HashAlgorithm::Sha384 => fold::<Sha384>(&mut handle, &mut buffer),
            HashAlgorithm::Sha512 => fold::<Sha512>(&mut handle, &mut buffer),
        }
    }

}

/// The command used to drive pip, kept as data so tests can substitute a
/// stub executable for the interpreter.
#[derive(Debug, Clone)]
pub struct PipCommand {
    program: PathBuf,
    leading_args: Vec<String>,
}

impl PipCommand {
    pub fn new(program: impl Into<PathBuf>, leading_args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            leading_args,
        }
    }

    /// Build the pip command from `global.basepython`, falling back to
    /// `python3`. The interpreter itself runs pip (`python -m pip`) so the
    /// wheels are built by the same interpreter that will deploy them.
    pub fn from_config(config: &Config) -> Result<Self, PluginError> {
        let basepython = {
            let configured = config.get_str("global", "basepython");
            if configured.is_empty() {
                "python3".to_owned()
            } else {
                configured
            }
        };
        let interpreter = if Path::new(&basepython).is_absolute() {
            PathBuf::from(&basepython)
        } else {
            which::which(&basepython)
                .map_err(|_| PluginError::ExecutableNotFound(basepython.clone()))?
        };
        Ok(Self::new(
            interpreter,
            vec!["-m".to_owned(), "pip".to_owned()],
        ))
    }

    fn command(&self, args: &[String], workdir: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.leading_args)
            .args(args)
            .current_dir(workdir);
        cmd
    }
}

/// Result of materialization: requirement lines keyed by pinned identifier,
/// plus whether every artifact is architecture-independent.
#[derive(Debug, Clone, Default)]
pub struct WheelSet {
    /// `name==version` (or raw filename) -> pinned requirement line.
    pub hashes: BTreeMap<String, String>,
    /// False when any artifact is platform-specific.
    pub noarch: bool,
}

/// Materialize the dependency list as hashed wheel artifacts in `wheel_dir`.
///
/// An empty dependency list returns an empty set without invoking anything.
/// The batched `pip wheel` build covers every dependency plus
/// [`DEPLOY_RUNTIME_PACKAGE`]; when it fails the whole batch is retried with
/// `pip download`, and only a failure of both paths is fatal — reported with
/// the captured output of each command.
pub fn materialize(
    pip: &PipCommand,
    deps: &[String],
    wheel_dir: &Path,
    hash: Option<HashAlgorithm>,
) -> Result<WheelSet, PluginError> {
    if deps.is_empty() {
        return Ok(WheelSet {
            hashes: BTreeMap::new(),
            noarch: true,
        });
    }

    // Best-effort refresh of the wheel-building toolchain; a failure here
    // just means building with whatever is already installed.
    let upgrade_args: Vec<String> = ["install", "-q", "--upgrade", "pip", "setuptools", "wheel"]
        .iter()
        .map(|s| (*s).to_owned())
        .collect();
    if let Err(output) = run_captured(pip.command(&upgrade_args, wheel_dir)) {
        warn!("pip toolchain upgrade failed, continuing: {output}");
    }

    let mut batch: Vec<String> = deps.to_vec();
    batch.push(DEPLOY_RUNTIME_PACKAGE.to_owned());

    let mut build_args: Vec<String> = ["wheel", "-q", "-w", "."]
        .iter()
        .map(|s| (*s).to_owned())
        .collect();
    build_args.extend(batch.iter().cloned());

    debug!("building wheels for {} dependencies", batch.len());
    if let Err(build_output) = run_captured(pip.command(&build_args, wheel_dir)) {
        warn!("wheel build failed, falling back to downloading artifacts");
        let mut download_args: Vec<String> = ["download", "-q", "-d", "."]
            .iter()
            .map(|s| (*s).to_owned())
            .collect();
        download_args.extend(batch.iter().cloned());
        if let Err(download_output) = run_captured(pip.command(&download_args, wheel_dir)) {
            return Err(PluginError::MaterializeFailed {
                build_output,
                download_output,
            });
        }
    }

    collect_artifacts(wheel_dir, hash)
}

/// Hash every installable artifact present in `wheel_dir` and build the
/// pinned requirement lines.
pub fn collect_artifacts(
    wheel_dir: &Path,
    hash: Option<HashAlgorithm>,
) -> Result<WheelSet, PluginError> {
    let mut set = WheelSet {
        hashes: BTreeMap::new(),
        noarch: true,
    };

    let mut names: Vec<String> = Vec::new();
    for entry in std::fs::read_dir(wheel_dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();

    for filename in names {
        let Some(parsed) = parse_artifact_name(&filename) else {
            continue;
        };
        if !parsed.pure {
            set.noarch = false;
        }
        let mut line = parsed.requirement.clone();
        if let Some(algo) = hash {
            let digest = algo.digest_file(&wheel_dir.join(&filename))?;
            line = format!("{line} --hash={}:{digest}", algo.name());
        }
        debug!("pinned {filename} as {line}");
        set.hashes.insert(parsed.requirement, line);
    }

    Ok(set)
}

struct ParsedArtifact {
    requirement: String,
    pure: bool,
}

/// Parse an artifact filename into a pinned identifier.
///
/// Wheel names follow `name-version-python-abi-platform.whl`; source
/// artifacts follow `name-version.tar.gz`/`.zip`. Files whose names don't
/// expose a version keep the raw filename as their identifier, and files
/// that are not installable artifacts are skipped.
fn parse_artifact_name(filename: &str) -> Option<ParsedArtifact> {
    if let Some(stem) = filename.strip_suffix(".whl") {
        let parts: Vec<&str> = stem.split('-').collect();
        if parts.len() >= 5 {
            return Some(ParsedArtifact {
                requirement: format!("{}=={}", parts[0], parts[1]),
                pure: stem.ends_with("none-any"),
            });
        }
        return Some(ParsedArtifact {
            requirement: filename.to_owned(),
            pure: false,
        });
    }

    let stem = filename
        .strip_suffix(".tar.gz")
        .or_else(|| filename.strip_suffix(".zip"))
        .or_else(|| filename.strip_suffix(".tar.bz2"))?;
    match stem.rsplit_once('-') {
        Some((name, version))
            if version.starts_with(|c: char| c.is_ascii_digit()) && !name.is_empty() =>
        {
            Some(ParsedArtifact {
                requirement: format!("{name}=={version}"),
                pure: true,
            })
        }
        _ => Some(ParsedArtifact {
            requirement: filename.to_owned(),
            pure: true,
        }),
    }
}

/// Run a blocking child process, capturing interleaved stdout/stderr text.
/// Returns the captured text on success, or the text (plus spawn errors) on
/// failure so callers can attach it to their diagnostics.
fn run_captured(mut cmd: Command) -> Result<String, String> {
    debug!("running {cmd:?}");
    match cmd.output() {
        Ok(output) => {
            let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
            text.push_str(&String::from_utf8_lossy(&output.stderr));
            if output.status.success() {
                Ok(text)
            } else {
                Err(format!("{}: {text}", output.status))
            }
        }
        Err(err) => Err(format!("failed to spawn {cmd:?}: {err}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    fn write_stub_pip(dir: &Path, script_body: &str) -> PipCommand {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("stub-pip");
        std::fs::write(&path, format!("#!/bin/sh\n{script_body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        PipCommand::new(path, Vec::new())
    }

    #[test]
    fn empty_dependency_list_runs_nothing() {
        let dir = tempfile::tempdir().unwrap();
        // A program that cannot exist; reaching it would fail the test.
        let pip = PipCommand::new("/nonexistent/interpreter", Vec::new());
        let set = materialize(&pip, &[], dir.path(), Some(HashAlgorithm::Sha256)).unwrap();
        assert!(set.hashes.is_empty());
        assert!(set.noarch);
    }

    #[test]
    fn parses_wheel_and_source_names() {
        let wheel = parse_artifact_name("requests-2.31.0-py3-none-any.whl").unwrap();
        assert_eq!(wheel.requirement, "requests==2.31.0");
        assert!(wheel.pure);

        let platform = parse_artifact_name("cffi-1.16.0-cp311-cp311-linux_x86_64.whl").unwrap();
        assert_eq!(platform.requirement, "cffi==1.16.0");
        assert!(!platform.pure);

        let sdist = parse_artifact_name("six-1.16.0.tar.gz").unwrap();
        assert_eq!(sdist.requirement, "six==1.16.0");

        let odd = parse_artifact_name("no_version.zip").unwrap();
        assert_eq!(odd.requirement, "no_version.zip");

        assert!(parse_artifact_name("README.txt").is_none());
    }

    #[cfg(unix)]
    #[test]
    fn successful_build_produces_hashed_requirement_lines() {
        let dir = tempfile::tempdir().unwrap();
        let pip = write_stub_pip(
            dir.path(),
            r#"case "$1" in
install) exit 0 ;;
wheel) printf demo > demo-1.0-py3-none-any.whl
       printf tool > venvpack-0.1.0-py3-none-any.whl ;;
esac"#,
        );
        let deps = vec!["demo".to_owned()];
        let set = materialize(&pip, &deps, dir.path(), Some(HashAlgorithm::Sha256)).unwrap();

        assert!(set.noarch);
        assert_eq!(set.hashes.len(), 2);
        let line = &set.hashes["demo==1.0"];
        assert!(line.starts_with("demo==1.0 --hash=sha256:"));
        let digest = HashAlgorithm::Sha256
            .digest_file(&dir.path().join("demo-1.0-py3-none-any.whl"))
            .unwrap();
        assert!(line.ends_with(&digest));
        assert!(set.hashes.contains_key("venvpack==0.1.0"));
    }

    #[cfg(unix)]
    #[test]
    fn build_failure_falls_back_to_download() {
        let dir = tempfile::tempdir().unwrap();
        let pip = write_stub_pip(
            dir.path(),
            r#"case "$1" in
install) exit 0 ;;
wheel) echo "error: compilation failed" ; exit 1 ;;
download) printf demo > demo-1.0.tar.gz ;;
esac"#,
        );
        let deps = vec!["demo".to_owned()];
        let set = materialize(&pip, &deps, dir.path(), None).unwrap();
        assert!(set.hashes.contains_key("demo==1.0"));
        assert_eq!(set.hashes["demo==1.0"], "demo==1.0");
    }

    #[cfg(unix)]
    #[test]
    fn failure_of_both_paths_reports_captured_output() {
        let dir = tempfile::tempdir().unwrap();
        let pip = write_stub_pip(
            dir.path(),
            r#"case "$1" in
install) exit 0 ;;
wheel) echo "wheel build exploded" ; exit 1 ;;
download) echo "download also exploded" ; exit 1 ;;
esac"#,
        );
        let deps = vec!["demo".to_owned()];
        let err = materialize(&pip, &deps, dir.path(), None).unwrap_err();
        match err {
            PluginError::MaterializeFailed {
                build_output,
                download_output,
            } => {
                assert!(build_output.contains("wheel build exploded"));
                assert!(download_output.contains("download also exploded"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn digest_algorithms_are_distinct() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("artifact");
        std::fs::write(&path, b"payload").unwrap();
        let sha256 = HashAlgorithm::Sha256.digest_file(&path).unwrap();
        let sha512 = HashAlgorithm::Sha512.digest_file(&path).unwrap();
        assert_eq!(sha256.len(), 64);
        assert_eq!(sha512.len(), 128);
    }
}
