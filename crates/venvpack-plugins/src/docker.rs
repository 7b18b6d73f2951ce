//! docker backend: renders a Dockerfile from the resolved configuration and
//! builds an image tagged `<container_name>:<version>`.

use crate::packager::{require_tool, run_tool, PackageContext, Packager};
use crate::template::render_template;
use crate::PluginError;
use std::path::PathBuf;
use std::process::Command;
use tracing::debug;
use venvpack_config::{Config, Schema, Value, ValueKind};

const DOCKERFILE_TEMPLATE: &str = r#"FROM {{ docker_container.base_image | default("ubuntu:22.04") }}
{% if docker_container.workdir_start %}WORKDIR {{ docker_container.workdir_start }}
{% endif %}{% for file_line in docker_container.add %}ADD {{ file_line }}
{% endfor %}{% for file_line in docker_container.files %}COPY {{ file_line }}
{% endfor %}{% for file_line in docker_container.copy %}COPY {{ file_line }}
{% endfor %}{% for setting, value in docker_container.setenv %}ENV {{ setting }}="{{ value }}"
{% endfor %}{% for setting, value in docker_container.env %}ENV {{ setting }}="{{ value }}"
{% endfor %}{% for expose_port in docker_container.expose %}EXPOSE {{ expose_port }}
{% endfor %}{% for label in docker_container.label %}LABEL {{ label }}
{% endfor %}{% for volume in docker_container.volume %}VOLUME {{ volume }}
{% endfor %}{% for runline in docker_container.run_before %}RUN {{ runline }}
{% endfor %}ENV PATH="/var/lib/venvpack/installvenv/bin:${PATH}"
COPY docker_build.sh /tmp/docker_build.sh
RUN chmod 755 /tmp/docker_build.sh && /tmp/docker_build.sh && rm /tmp/docker_build.sh
{% for runline in docker_container.run_after %}RUN {{ runline }}
{% endfor %}{% if docker_container.entrypoint %}ENTRYPOINT {{ docker_container.entrypoint }}
{% endif %}{% if docker_container.cmd %}CMD {{ docker_container.cmd }}
{% endif %}{% if docker_container.healthcheck %}HEALTHCHECK {{ docker_container.healthcheck }}
{% endif %}{% if docker_container.stopsignal %}STOPSIGNAL {{ docker_container.stopsignal }}
{% endif %}{% if docker_container.user %}USER {{ docker_container.user }}
{% endif %}"#;

const DOCKER_CONFIG_DEFAULT: &str = "\
[docker_container]
add=
base_image=ubuntu:22.04
cmd=
container_name=
copy:
entrypoint=
env:
expose:
deb_deps:
files:
healthcheck=
label:
rpm_deps:
run_before:
run_after:
setenv:
stopsignal=
user=
volume:
workdir_start=
";

// Runs inside the image build; bootstraps a virtualenv that deploys the
// baked-in deploy.conf.
const DOCKER_BUILD_SCRIPT: &str = r#"#!/bin/sh
set -e
if command -v apt-get >/dev/null 2>&1; then
    apt-get update && apt-get install -y python3 python3-venv python3-pip
elif command -v yum >/dev/null 2>&1; then
    yum install -y python3 python3-pip
fi
python3 -m venv /var/lib/venvpack/installvenv
/var/lib/venvpack/installvenv/bin/pip install venvpack
cd /var/lib/venvpack
/var/lib/venvpack/installvenv/bin/venvpack deploy --deploy-conf /var/lib/venvpack/deploy.conf
"#;

#[derive(Debug, Default)]
pub struct DockerPackager;

impl Packager for DockerPackager {
    fn format(&self) -> &'static str {
        "docker"
    }

    fn available(&self) -> bool {
        let found = which::which("docker").is_ok();
        if !found {
            debug!("docker not present, disabling the docker backend");
        }
        found
    }

    fn default_config_text(&self) -> &'static str {
        DOCKER_CONFIG_DEFAULT
    }

    fn config_schema(&self) -> Schema {
        let mut schema = Schema::new();
        let section = schema.entry("docker_container".to_owned()).or_default();
        for key in ["add", "copy", "deb_deps", "expose", "files", "label",
            "rpm_deps", "run_before", "run_after", "volume"]
        {
            section.insert(key.to_owned(), ValueKind::List);
        }
        for key in ["base_image", "cmd", "container_name", "entrypoint",
            "healthcheck", "stopsignal", "user", "workdir_start"]
        {
            section.insert(key.to_owned(), ValueKind::Str);
        }
        section.insert("env".to_owned(), ValueKind::Dict);
        section.insert("setenv".to_owned(), ValueKind::Dict);
        schema
    }

    fn template(&self) -> &'static str {
        DOCKERFILE_TEMPLATE
    }

    fn config_filename(&self) -> &'static str {
        "Dockerfile"
    }

    // Images resolve dependencies at build time, so no local wheels.
    fn uses_local_wheels(&self) -> bool {
        false
    }

    fn add_build_configuration(
        &self,
        config: &mut Config,
        _ctx: &PackageContext,
    ) -> Result<(), PluginError> {
        if config.get_str("docker_container", "container_name").is_empty() {
            let name = config.get_str("global", "name");
            config.set_str("docker_container", "container_name", format!("venvpackapp/{name}"));
        }
        let mut files = config.get_list("docker_container", "files");
        files.push("deploy.conf /var/lib/venvpack/deploy.conf".to_owned());
        config.set("docker_container", "files", Value::List(files));
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
        std::fs::write(ctx.scratch.join("docker_build.sh"), DOCKER_BUILD_SCRIPT)?;

        let tag = format!(
            "{}:{}",
            config.get_str("docker_container", "container_name"),
            config.get_str("global", "version")
        );
        let docker = require_tool("docker")?;
        run_tool(
            "docker",
            Command::new(docker)
                .args(["build", "-t", &tag, "."])
                .current_dir(&ctx.scratch),
        )?;
        debug!("created container {tag}");
        // The artifact is an image tag, not a file in the scratch directory.
        Ok(Some(PathBuf::from(tag)))
    }
}
