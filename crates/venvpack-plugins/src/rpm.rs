//! rpm backend: renders a spec file from the resolved configuration and
//! builds with `rpmbuild -ba`.

use crate::packager::{require_tool, run_tool, PackageContext, Packager};
use crate::template::render_template;
use crate::PluginError;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;
use venvpack_config::{Config, Schema, Value, ValueKind};

const SPEC_TEMPLATE: &str = r#"Summary: {{ global.description | default("No summary available") }}
Name: {{ global.name }}
Version: {{ global.version | default("0.0.0") }}
Release: {{ rpm_package.release | default("1") }}
License: {{ rpm_package.license | default("Closed Source") }}
Group: {{ rpm_package.group | default("Development") }}
Packager: {{ rpm_package.packager | default("venvpack") }}
URL: {{ global.url | default("https://localhost") }}
AutoReqProv: no
{% if pip.noarch %}BuildArch: noarch{% endif %}
{% if rpm_package.bootstrap_deps %}Requires(post): {{ rpm_package.bootstrap_deps | join(", ") }}{% endif %}
{% if rpm_package.deps %}Requires: {{ rpm_package.deps | join(", ") }}{% endif %}

%description
{{ rpm_package.description | default("No description") }}

%install
mkdir -p %{buildroot}/usr/share/%{name}_%{version}/
mkdir -p %{buildroot}/usr/share/%{name}_%{version}/package_scripts/
cp -r {{ rpm_package.cwd }}/wheels %{buildroot}/usr/share/%{name}_%{version}
cp {{ rpm_package.cwd }}/deploy.conf %{buildroot}/usr/share/%{name}_%{version}/deploy.conf
cp {{ rpm_package.cwd }}/post_install.sh %{buildroot}/usr/share/%{name}_%{version}/package_scripts/post_install.sh
cp {{ rpm_package.cwd }}/pre_uninstall.sh %{buildroot}/usr/share/%{name}_%{version}/package_scripts/pre_uninstall.sh
chmod 755 %{buildroot}/usr/share/%{name}_%{version}/package_scripts/post_install.sh
chmod 755 %{buildroot}/usr/share/%{name}_%{version}/package_scripts/pre_uninstall.sh
{% for line in rpm_package.install_lines %}{{ line }}
{% endfor %}
%post
export RPM_ARG="$1"
export PATH=$PATH:/opt/python/bin:/usr/local/bin
/usr/share/%{name}_%{version}/package_scripts/post_install.sh

%preun
export RPM_ARG="$1"
/usr/share/%{name}_%{version}/package_scripts/pre_uninstall.sh

%postun
rm -rf /usr/share/%{name}_%{version}

%files
%defattr(0755, root, root, 0755)
/usr/share/%{name}_%{version}/*
{% for line in rpm_package.files_lines %}{{ line }}
{% endfor %}
"#;

const RPM_CONFIG_DEFAULT: &str = "\
[rpm_package]
bin_dir =
deps:
files:
";

// Installed as package_scripts/; they bootstrap a virtualenv from the
// packaged wheels and tear it down on removal.
const POST_INSTALL_SCRIPT: &str = r#"#!/bin/sh
set -e
DATA_DIR="$(cd "$(dirname "$0")/.." && pwd)"
BASEPYTHON="$(sed -n 's/^basepython *[=:] *//p' "$DATA_DIR/deploy.conf" | head -1)"
[ -n "$BASEPYTHON" ] || BASEPYTHON=python3
"$BASEPYTHON" -m venv "$DATA_DIR/deployer"
"$DATA_DIR/deployer/bin/pip" install --no-index --find-links="$DATA_DIR/wheels" venvpack \
    || "$DATA_DIR/deployer/bin/pip" install --find-links="$DATA_DIR/wheels" venvpack
cd "$DATA_DIR"
"$DATA_DIR/deployer/bin/venvpack" deploy --deploy-conf "$DATA_DIR/deploy.conf"
"#;

const PRE_UNINSTALL_SCRIPT: &str = r#"#!/bin/sh
DATA_DIR="$(cd "$(dirname "$0")/.." && pwd)"
[ -f "$DATA_DIR/deploy.conf" ] || exit 0
VENV_DIR="$(sed -n 's/^virtualenv_deploy_dir *[=:] *//p' "$DATA_DIR/deploy.conf" | head -1)"
if [ -n "$VENV_DIR" ] && [ -d "$VENV_DIR" ]; then
    rm -rf "$VENV_DIR"
fi
"#;

#[derive(Debug, Default)]
pub struct RpmPackager;

impl RpmPackager {
    /// Parse the `[rpm_package] files` lines into (source, directive, dest).
    ///
    /// A single field is a destination with no source; the first field is
    /// otherwise the source and the rest the destination. A destination
    /// starting with `%` carries an rpm directive such as `%attr(...)`.
    fn file_entries(config: &Config) -> Vec<FileEntry> {
        let mut entries = Vec::new();
        for line in config.get_list("rpm_package", "files") {
            let fields: Vec<&str> = line.split_whitespace().collect();
            let (source, dest) = match fields.as_slice() {
                [] => continue,
                [dest] => (String::new(), (*dest).to_owned()),
                [source, rest @ ..] => ((*source).to_owned(), rest.join(" ")),
            };
            let (directive, dest) = match dest.strip_prefix('%').and_then(|_| dest.find(')')) {
                Some(close) => {
                    let (directive, rest) = dest.split_at(close + 1);
                    (Some(directive.to_owned()), rest.trim_start().to_owned())
                }
                None => (None, dest),
            };
            entries.push(FileEntry {
                source,
                directive,
                dest,
            });
        }
        entries
    }
}

struct FileEntry {
    source: String,
    directive: Option<String>,
    dest: String,
}

impl FileEntry {
    fn staged_name(&self) -> Option<&str> {
        if self.source.is_empty() {
            return None;
        }
        Path::new(&self.source)
            .file_name()
            .and_then(|name| name.to_str())
    }
}

impl Packager for RpmPackager {
    fn format(&self) -> &'static str {
        "rpm"
    }

    fn extension(&self) -> &'static str {
        "rpm"
    }

    fn available(&self) -> bool {
        let found = which::which("rpmbuild").is_ok();
        if !found {
            debug!("rpmbuild not present, disabling the rpm backend");
        }
        found
    }

    fn default_config_text(&self) -> &'static str {
        RPM_CONFIG_DEFAULT
    }

    fn config_schema(&self) -> Schema {
        let mut schema = Schema::new();
        let section = schema.entry("rpm_package".to_owned()).or_default();
        section.insert("bin_dir".to_owned(), ValueKind::Str);
        section.insert("deps".to_owned(), ValueKind::List);
        section.insert("files".to_owned(), ValueKind::List);
        schema
    }

    fn template(&self) -> &'static str {
        SPEC_TEMPLATE
    }

    fn config_filename(&self) -> &'static str {
        "package.spec"
    }

    fn stage_files(&self, config: &Config, ctx: &PackageContext) -> Result<(), PluginError> {
        for entry in Self::file_entries(config) {
            let Some(name) = entry.staged_name() else {
                continue;
            };
            let source = PathBuf::from(&entry.source);
            if !source.is_file() {
                return Err(PluginError::DeclaredFileMissing(source));
            }
            debug!("staging {} into the build directory", source.display());
            std::fs::copy(&source, ctx.scratch.join(name))?;
        }
        Ok(())
    }

    fn add_build_configuration(
        &self,
        config: &mut Config,
        ctx: &PackageContext,
    ) -> Result<(), PluginError> {
        config.set_str(
            "rpm_package",
            "cwd",
            ctx.scratch.to_string_lossy().into_owned(),
        );

        if config.get_str("global", "description").trim().is_empty() {
            config.set_str("global", "description", "No description available");
        }
        if config.get_str("rpm_package", "basepython").trim().is_empty() {
            let global = config.get_str("global", "basepython");
            if !global.trim().is_empty() {
                config.set_str("rpm_package", "basepython", global);
            }
        }

        let (major, minor) = host_release();
        config.set_str("global", "distro_major", major.to_string());
        config.set_str("global", "distro_minor", minor.to_string());
        let bootstrap: Vec<String> = if major > 7 || (major == 7 && minor > 6) {
            vec!["python3".to_owned(), "python3-pip".to_owned()]
        } else {
            vec![
                "python".to_owned(),
                "python-pip".to_owned(),
                "python-virtualenv".to_owned(),
            ]
        };
        config.set("rpm_package", "bootstrap_deps", Value::List(bootstrap));

        let mut install_lines = Vec::new();
        let mut files_lines = Vec::new();
        for entry in Self::file_entries(config) {
            install_lines.push(format!(
                "mkdir -p $(dirname %{{buildroot}}{})",
                entry.dest
            ));
            if let Some(name) = entry.staged_name() {
                install_lines.push(format!(
                    "cp -a {}/{name} %{{buildroot}}{}",
                    ctx.scratch.to_string_lossy(),
                    entry.dest
                ));
            }
            match &entry.directive {
                Some(directive) => files_lines.push(format!("{directive} {}", entry.dest)),
                None => files_lines.push(entry.dest.clone()),
            }
        }
        config.set("rpm_package", "install_lines", Value::List(install_lines));
        config.set("rpm_package", "files_lines", Value::List(files_lines));
        Ok(())
    }

    fn run_package_command(
        &self,
        config: &Config,
        ctx: &PackageContext,
    ) -> Result<Option<PathBuf>, PluginError> {
        std::fs::write(
            ctx.scratch.join(self.config_filename()),
            render_template(self.template(), config)?,
        )?;
        std::fs::write(ctx.scratch.join("post_install.sh"), POST_INSTALL_SCRIPT)?;
        std::fs::write(ctx.scratch.join("pre_uninstall.sh"), PRE_UNINSTALL_SCRIPT)?;

        let rpmbuild = require_tool("rpmbuild")?;
        // LANG=C keeps the "Wrote:" lines parseable on localized hosts.
        let output = run_tool(
            "rpmbuild",
            Command::new(rpmbuild)
                .args(["-ba", self.config_filename()])
                .env("LANG", "C")
                .current_dir(&ctx.scratch),
        )?;

        let written: Vec<&str> = output
            .lines()
            .filter_map(|line| line.trim().strip_prefix("Wrote: "))
            .collect();
        debug!("rpmbuild wrote {written:?}");
        Ok(written.last().map(|path| PathBuf::from(path.trim())))
    }
}

/// Major/minor OS release from /etc/os-release, with a
/// /etc/system-release fallback. Unparseable hosts read as 0.0.
fn host_release() -> (u32, u32) {
    if let Ok(text) = std::fs::read_to_string("/etc/os-release") {
        for line in text.lines() {
            if let Some(value) = line.strip_prefix("VERSION_ID=") {
                return parse_release(value.trim_matches('"'));
            }
        }
    }
    if let Ok(text) = std::fs::read_to_string("/etc/system-release") {
        if let Some(word) = text.split_whitespace().find(|w| {
            w.starts_with(|c: char| c.is_ascii_digit())
        }) {
            return parse_release(word);
        }
    }
    (0, 0)
}

fn parse_release(version: &str) -> (u32, u32) {
    let mut parts = version.split('.');
    let major = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    let minor = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    (major, minor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wheel::PipCommand;

    fn context(scratch: &Path) -> PackageContext {
        PackageContext::new(scratch, PipCommand::new("/nonexistent/interpreter", Vec::new()))
    }

    fn base_config() -> Config {
        let mut config = Config::new();
        config.set_str("global", "name", "demoapp");
        config.set_str("global", "version", "1.2.3");
        config
    }

    #[test]
    fn release_parsing_handles_partial_versions() {
        assert_eq!(parse_release("7.6"), (7, 6));
        assert_eq!(parse_release("38"), (38, 0));
        assert_eq!(parse_release("garbage"), (0, 0));
    }

    #[test]
    fn file_lines_split_into_source_and_destination() {
        let mut config = base_config();
        config.set(
            "rpm_package",
            "files",
            Value::List(vec![
                "conf/app.cfg /etc/app.cfg".to_owned(),
                "/var/log/app".to_owned(),
                "run.sh %attr(0755, root, root) /usr/bin/run.sh".to_owned(),
            ]),
        );
        let entries = RpmPackager::file_entries(&config);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].source, "conf/app.cfg");
        assert_eq!(entries[0].dest, "/etc/app.cfg");
        assert_eq!(entries[1].source, "");
        assert_eq!(entries[1].dest, "/var/log/app");
        assert_eq!(entries[2].directive.as_deref(), Some("%attr(0755, root, root)"));
        assert_eq!(entries[2].dest, "/usr/bin/run.sh");
    }

    #[test]
    fn missing_declared_file_fails_staging() {
        let scratch = tempfile::tempdir().unwrap();
        let mut config = base_config();
        config.set(
            "rpm_package",
            "files",
            Value::List(vec!["/nonexistent/app.cfg /etc/app.cfg".to_owned()]),
        );
        let err = RpmPackager
            .stage_files(&config, &context(scratch.path()))
            .unwrap_err();
        assert!(matches!(err, PluginError::DeclaredFileMissing(_)));
    }

    #[test]
    fn spec_renders_name_version_and_defaults() {
        let scratch = tempfile::tempdir().unwrap();
        let ctx = context(scratch.path());
        let mut config = base_config();
        config.set("pip", "noarch", Value::Bool(true));
        RpmPackager.add_build_configuration(&mut config, &ctx).unwrap();

        let spec = render_template(RpmPackager.template(), &config).unwrap();
        assert!(spec.contains("Name: demoapp"));
        assert!(spec.contains("Version: 1.2.3"));
        assert!(spec.contains("Summary: No description available"));
        assert!(spec.contains("BuildArch: noarch"));
        assert!(spec.contains("Requires(post): python3, python3-pip")
            || spec.contains("Requires(post): python, python-pip, python-virtualenv"));
    }

    #[test]
    fn computed_file_lines_reach_the_spec() {
        let scratch = tempfile::tempdir().unwrap();
        let ctx = context(scratch.path());
        let mut config = base_config();
        config.set(
            "rpm_package",
            "files",
            Value::List(vec!["run.sh %attr(0755, root, root) /usr/bin/run.sh".to_owned()]),
        );
        RpmPackager.add_build_configuration(&mut config, &ctx).unwrap();

        let spec = render_template(RpmPackager.template(), &config).unwrap();
        assert!(spec.contains("%attr(0755, root, root) /usr/bin/run.sh"));
        assert!(spec.contains("mkdir -p $(dirname %{buildroot}/usr/bin/run.sh)"));
    }
}
