//! Compiled-in script catalogue.

use crate::constants::ambient;
use crate::context::VariableType;
use crate::detection::{DetectGeoStep, DetectOsStep, GeoOsDetectionService, SelectMirrorStep};
use crate::error::Result;
use crate::interaction::InteractionPrompt;
use crate::registry::{ParameterSpec, ScriptClassification, ScriptDefinition, ScriptRegistry};
use crate::step::{PromptStep, RemoteCommandStep, StepCondition};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

pub const DETECT_SYSTEM: &str = "detect-system";
pub const INSTALL_DOCKER: &str = "install-docker";
pub const DEPLOY_APP: &str = "deploy-app";

const INSTALL_TIMEOUT: Duration = Duration::from_secs(900);

const APT_MIRROR_SCRIPT: &str = r#"set -e
cp /etc/apt/sources.list /etc/apt/sources.list.bak 2>/dev/null || true
sed -i -E 's#https?://[^ ]+/(ubuntu|debian)/?#${package_mirror}/#g' /etc/apt/sources.list
apt-get update -y"#;

const DOCKER_APT_SCRIPT: &str = r#"set -e
export DEBIAN_FRONTEND=noninteractive
apt-get update -y
apt-get install -y ca-certificates curl gnupg
install -m 0755 -d /etc/apt/keyrings
curl -fsSL ${docker_mirror}/linux/${os_id}/gpg -o /etc/apt/keyrings/docker.asc
chmod a+r /etc/apt/keyrings/docker.asc
echo "deb [arch=$(dpkg --print-architecture) signed-by=/etc/apt/keyrings/docker.asc] ${docker_mirror}/linux/${os_id} ${os_codename} stable" > /etc/apt/sources.list.d/docker.list
apt-get update -y
if [ "${docker_version}" = "latest" ]; then
  apt-get install -y docker-ce docker-ce-cli containerd.io
else
  apt-get install -y "docker-ce=*${docker_version}*" "docker-ce-cli=*${docker_version}*" containerd.io
fi"#;

const DOCKER_YUM_SCRIPT: &str = r#"set -e
${package_manager} install -y yum-utils || ${package_manager} install -y dnf-plugins-core
curl -fsSL ${docker_mirror}/linux/centos/docker-ce.repo -o /etc/yum.repos.d/docker-ce.repo
sed -i 's#https://download.docker.com#${docker_mirror}#g' /etc/yum.repos.d/docker-ce.repo
if [ "${docker_version}" = "latest" ]; then
  ${package_manager} install -y docker-ce docker-ce-cli containerd.io
else
  ${package_manager} install -y "docker-ce-${docker_version}" "docker-ce-cli-${docker_version}" containerd.io
fi"#;

const REGISTRY_MIRROR_SCRIPT: &str = r#"set -e
mkdir -p /etc/docker
cat > /etc/docker/daemon.json <<'EOF'
{
  "registry-mirrors": ["${registry_mirror}"]
}
EOF"#;

/// Every compiled-in script
pub fn builtin_scripts(detection: Arc<GeoOsDetectionService>) -> Vec<ScriptDefinition> {
    vec![
        detect_system(Arc::clone(&detection)),
        install_docker(Arc::clone(&detection)),
        deploy_app(),
    ]
}

/// Register the compiled-in scripts once at start-up
pub fn register_builtin_scripts(
    registry: &ScriptRegistry,
    detection: Arc<GeoOsDetectionService>,
) -> Result<()> {
    for definition in builtin_scripts(detection) {
        registry.register(definition)?;
    }
    Ok(())
}

pub fn detect_system(detection: Arc<GeoOsDetectionService>) -> ScriptDefinition {
    ScriptDefinition::new(DETECT_SYSTEM, ScriptClassification::Static)
        .with_description("Detect operating system, location and mirror region")
        .with_step(DetectOsStep::new(Arc::clone(&detection)))
        .with_step(DetectGeoStep::new(detection))
        .with_step(SelectMirrorStep::new())
}

pub fn install_docker(detection: Arc<GeoOsDetectionService>) -> ScriptDefinition {
    let debian = StepCondition::ambient_equals(ambient::OS_FAMILY, "debian");
    let rhel = StepCondition::ambient_equals(ambient::OS_FAMILY, "rhel");
    let in_china = StepCondition::ambient_equals(ambient::MIRROR_REGION, "china");

    ScriptDefinition::new(INSTALL_DOCKER, ScriptClassification::Configurable)
        .with_description("Install Docker CE from the closest mirror")
        .with_parameter(
            ParameterSpec::optional("docker_version", VariableType::String)
                .with_default("latest")
                .with_description("Docker CE version, or latest"),
        )
        .with_parameter(
            ParameterSpec::optional("use_registry_mirror", VariableType::Bool)
                .with_default(true)
                .with_description("Configure a registry mirror when in China"),
        )
        .with_parameter(
            ParameterSpec::optional("users", VariableType::Array)
                .with_description("Accounts to add to the docker group"),
        )
        .with_step(DetectOsStep::new(Arc::clone(&detection)))
        .with_step(DetectGeoStep::new(detection))
        .with_step(SelectMirrorStep::new())
        .with_step(
            RemoteCommandStep::new("configure-package-mirror", APT_MIRROR_SCRIPT)
                .when(StepCondition::All {
                    conditions: vec![
                        in_china.clone(),
                        debian.clone(),
                        StepCondition::Exists {
                            name: ambient::PACKAGE_MIRROR.to_string(),
                        },
                    ],
                })
                .tolerate_failure(),
        )
        .with_step(
            RemoteCommandStep::new("install-docker-apt", DOCKER_APT_SCRIPT)
                .when(debian)
                .timeout(INSTALL_TIMEOUT),
        )
        .with_step(
            RemoteCommandStep::new("install-docker-yum", DOCKER_YUM_SCRIPT)
                .when(rhel)
                .timeout(INSTALL_TIMEOUT),
        )
        .with_step(
            RemoteCommandStep::new("configure-registry-mirror", REGISTRY_MIRROR_SCRIPT).when(
                StepCondition::All {
                    conditions: vec![
                        in_china,
                        StepCondition::variable_true("use_registry_mirror"),
                    ],
                },
            ),
        )
        .with_step(RemoteCommandStep::new(
            "enable-docker",
            "systemctl daemon-reload && systemctl enable --now docker && systemctl restart docker",
        ))
        .with_step(
            RemoteCommandStep::new(
                "add-docker-users",
                "for u in ${users}; do usermod -aG docker \"$u\"; done",
            )
            .when(StepCondition::Exists {
                name: "users".to_string(),
            })
            .tolerate_failure(),
        )
        .with_step(
            RemoteCommandStep::new(
                "verify-docker",
                "docker version --format '{{.Server.Version}}'",
            )
            .capture_into("docker_server_version"),
        )
}

pub fn deploy_app() -> ScriptDefinition {
    let existing = StepCondition::VariableEquals {
        name: "existing_container".to_string(),
        value: Value::String(String::new()),
    }
    .negate();
    let replace = StepCondition::variable_true("replace_existing");
    // a declined replacement ends the script cleanly without deploying
    let deploy = StepCondition::Any {
        conditions: vec![existing.clone().negate(), replace.clone()],
    };

    ScriptDefinition::new(DEPLOY_APP, ScriptClassification::Interactive)
        .with_description("Run a container image, asking before replacing an existing one")
        .with_parameter(ParameterSpec::required("image", VariableType::String))
        .with_parameter(ParameterSpec::required("container_name", VariableType::String))
        .with_parameter(ParameterSpec::required("host_port", VariableType::Int))
        .with_parameter(
            ParameterSpec::optional("container_port", VariableType::Int).with_default(80),
        )
        .with_step(
            RemoteCommandStep::new(
                "inspect-existing",
                "docker ps -a --filter 'name=^/${container_name}$' --format '{{.Names}}'",
            )
            .capture_into("existing_container"),
        )
        .with_step(
            PromptStep::new(
                "confirm-replace",
                InteractionPrompt::confirmation(
                    "Container ${container_name} already exists. Replace it?",
                    Some(false),
                ),
                "replace_existing",
            )
            .when(existing.clone()),
        )
        .with_step(
            RemoteCommandStep::new("remove-existing", "docker rm -f ${container_name}")
                .when(replace.clone()),
        )
        .with_step(
            RemoteCommandStep::new(
                "keep-existing",
                "echo 'Container ${container_name} kept, nothing deployed'",
            )
            .when(StepCondition::All {
                conditions: vec![existing.clone(), replace.clone().negate()],
            }),
        )
        .with_step(
            RemoteCommandStep::new("pull-image", "docker pull ${image}")
                .timeout(INSTALL_TIMEOUT)
                .when(deploy.clone()),
        )
        .with_step(
            RemoteCommandStep::new(
                "run-container",
                "docker run -d --name ${container_name} --restart unless-stopped -p ${host_port}:${container_port} ${image}",
            )
            .when(deploy.clone()),
        )
        .with_step(
            RemoteCommandStep::new(
                "verify-container",
                "test \"$(docker inspect -f '{{.State.Running}}' ${container_name})\" = \"true\"",
            )
            .when(deploy),
        )
}
