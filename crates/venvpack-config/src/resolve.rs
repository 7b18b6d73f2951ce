use crate::envsubst::{expand_with, expand_env};
use crate::ini::{merge_raw, parse_ini_str, RawSections};
use crate::value::{Config, Schema, ValueKind};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Base defaults every run starts from; plugins append their own fragments.
pub const BASE_DEFAULTS: &str = "\
[global]
name =
basepython =
description = No description is available
install_manifest =
install_os_packages = False
version =
virtualenv_dir =
virtualenv_deploy_dir =
virtualenv_version_package =
virtualenv_user =
virtualenv_group =

[pip]
pip_version =
hash_dependencies = True
use_local_wheels = False
deps:

[rpm]
fail_missing_yum = True
deps:
";

pub fn base_defaults() -> &'static str {
    BASE_DEFAULTS
}

/// Semantic types for the base sections. Plugin schemas are merged on top.
pub fn base_schema() -> Schema {
    let mut schema = Schema::new();

    let global = schema.entry("global".to_owned()).or_default();
    global.insert("install_manifest".to_owned(), ValueKind::CsvList);
    global.insert("install_os_packages".to_owned(), ValueKind::Bool);

    let pip = schema.entry("pip".to_owned()).or_default();
    pip.insert("deps".to_owned(), ValueKind::List);
    pip.insert("hash_dependencies".to_owned(), ValueKind::Bool);
    pip.insert("use_local_wheels".to_owned(), ValueKind::Bool);

    let rpm = schema.entry("rpm".to_owned()).or_default();
    rpm.insert("deps".to_owned(), ValueKind::List);
    rpm.insert("fail_missing_yum".to_owned(), ValueKind::Bool);

    schema
}

/// Directory holding the first-party install/uninstall scripts shipped with
/// the packaging tool, injected into the `locations` section.
pub fn package_scripts_directory() -> PathBuf {
    if let Ok(dir) = std::env::var("VENVPACK_SCRIPTS_DIR") {
        return PathBuf::from(dir);
    }
    PathBuf::from("/usr/share/venvpack/package_scripts")
}

/// Fallback target directory for deployed virtualenvs when the
/// configuration leaves `global.virtualenv_dir` unset.
pub fn default_virtualenv_directory() -> PathBuf {
    PathBuf::from("/var/lib/venvpack/virtualenvs")
}

/// Resolve configuration from layered sources against the process
/// environment. See [`resolve_with_env`] for the merge semantics.
pub fn resolve(defaults: &str, sources: &[PathBuf], schema: &Schema) -> Config {
    let env: BTreeMap<String, String> = std::env::vars().collect();
    resolve_with_env(defaults, sources, schema, &env)
}

/// Resolve configuration from layered sources.
///
/// - `defaults` is parsed first, then each source file in order; later
///   sources override earlier ones at (section, key) granularity.
/// - Missing source files are skipped; the caller that needs the file to
///   exist surfaces that error itself.
/// - Every value goes through `{{VAR}}` substitution before being stored.
/// - The `locations.package_scripts` path and a `global.virtualenv_dir`
///   default are injected after the merge.
/// - Finally every value is cast to its schema kind; keys without a schema
///   entry stay strings and coercion never raises.
pub fn resolve_with_env(
    defaults: &str,
    sources: &[PathBuf],
    schema: &Schema,
    env: &BTreeMap<String, String>,
) -> Config {
    let mut raw: RawSections = parse_ini_str(defaults);
    for source in sources {
        match std::fs::read_to_string(source) {
            Ok(text) => merge_raw(&mut raw, parse_ini_str(&text)),
            Err(err) => {
                debug!("skipping config source {}: {err}", source.display());
            }
        }
    }

    let mut config = Config::new();
    for (section, entries) in &raw {
        for (key, value) in entries {
            config.set_str(section, key, expand_with(value, env));
        }
    }

    config.set_str(
        "locations",
        "package_scripts",
        package_scripts_directory().to_string_lossy().into_owned(),
    );
    if config.get_str("global", "virtualenv_dir").is_empty() {
        config.set_str(
            "global",
            "virtualenv_dir",
            default_virtualenv_directory().to_string_lossy().into_owned(),
        );
    }

    config.cast_kinds(schema);
    config
}

/// Render a raw deploy.conf text with its environment placeholders expanded.
/// This is the "parsed config" pass used both for the scratch-dir copy of
/// deploy.conf and by the parsed-config packaging backend.
pub fn render_config_text(source_text: &str) -> String {
    expand_env(source_text)
}

/// Convenience for callers that read the config file themselves first.
pub fn read_config_text(path: &Path) -> Result<String, crate::ConfigError> {
    std::fs::read_to_string(path).map_err(|source| crate::ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}
