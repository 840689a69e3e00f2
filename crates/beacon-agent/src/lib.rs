//! Pod templating for Beacon agents
//!
//! Turns an [`Agent`] into the pod template the operator runs: the config
//! volume, per-type host volumes, container args, selector labels and the
//! config-hash annotation that marks which spec the pod was built from.

#![deny(missing_docs)]

pub mod metricbeat;
pub mod pod_template;
pub mod volume;

use beacon_common::crd::{Agent, DaemonSetSpec};
use beacon_common::hash::fingerprint;
use beacon_common::{Error, CONFIG_HASH_ANNOTATION};
use k8s_openapi::api::core::v1::PodTemplateSpec;
use kube::ResourceExt;
use tracing::debug;

pub use pod_template::PodTemplateBuilder;
pub use volume::{ConfigVolume, HostVolume, PersistentVolumeClaimVolume, VolumeLike};

/// Agent type for metricbeat
pub const METRICBEAT_TYPE: &str = "metricbeat";
/// Agent type for filebeat
pub const FILEBEAT_TYPE: &str = "filebeat";
/// Agent type for heartbeat
pub const HEARTBEAT_TYPE: &str = "heartbeat";

/// Name of the container running the agent
pub const AGENT_CONTAINER_NAME: &str = "agent";

/// Registry the default agent images are pulled from
pub const DEFAULT_IMAGE_REGISTRY: &str = "docker.elastic.co/beats";

/// Directory the agent config secret is mounted into
pub const CONFIG_MOUNT_DIR: &str = "/etc/beat";

/// Name of the volume holding the agent config
pub const CONFIG_VOLUME_NAME: &str = "config";

/// Path of the config file inside the agent container
pub fn config_mount_path(agent_type: &str) -> String {
    format!("{}/{}.yml", CONFIG_MOUNT_DIR, agent_type)
}

/// Name of the secret carrying the rendered config of an agent
pub fn config_secret_name(agent_name: &str, agent_type: &str) -> String {
    format!("{}-{}-config", agent_name, agent_type)
}

/// Image used when the spec does not override it
pub fn default_image(agent_type: &str, version: &str) -> String {
    format!("{}/{}:{}", DEFAULT_IMAGE_REGISTRY, agent_type, version)
}

/// Build the pod template for an agent
///
/// The template carries the agent's selector labels and the fingerprint of
/// its spec under [`CONFIG_HASH_ANNOTATION`].
pub fn build_pod_template(agent: &Agent) -> Result<PodTemplateSpec, Error> {
    let (name, namespace) = name_and_namespace(agent)?;
    let spec = &agent.spec;
    if spec.agent_type.is_empty() {
        return Err(Error::validation_for_field(
            "spec.type",
            format!("agent {}/{} has no type", namespace, name),
        ));
    }

    let hash = fingerprint(spec)?;
    let image = spec
        .image
        .clone()
        .unwrap_or_else(|| default_image(&spec.agent_type, &spec.version));

    let mut builder = PodTemplateBuilder::new(AGENT_CONTAINER_NAME, image)
        .with_labels(beacon_common::crd::agent_pod_labels(&name, &spec.agent_type))
        .with_annotation(CONFIG_HASH_ANNOTATION, hash.clone())
        .with_volume(&ConfigVolume::new(
            CONFIG_VOLUME_NAME,
            config_secret_name(&name, &spec.agent_type),
            CONFIG_MOUNT_DIR,
        ));

    if let Some(sa) = &spec.service_account_name {
        builder = builder.with_service_account(sa.clone());
    }

    builder = match spec.agent_type.as_str() {
        METRICBEAT_TYPE => metricbeat::customize(builder, &name, &namespace, spec),
        _ => builder.with_args([
            "-e".to_string(),
            "-c".to_string(),
            config_mount_path(&spec.agent_type),
        ]),
    };

    debug!(
        agent = %name,
        namespace = %namespace,
        agent_type = %spec.agent_type,
        config_hash = %hash,
        "built agent pod template"
    );
    Ok(builder.build())
}

/// Fill in the deployment model when the spec names neither.
///
/// Agents default to running on every node.
pub fn with_defaults(agent: &Agent) -> Agent {
    let mut agent = agent.clone();
    if agent.spec.daemon_set.is_none() && agent.spec.deployment.is_none() {
        agent.spec.daemon_set = Some(DaemonSetSpec::default());
    }
    agent
}

fn name_and_namespace(agent: &Agent) -> Result<(String, String), Error> {
    let namespace = agent.namespace().ok_or_else(|| {
        Error::validation_for_field(
            "metadata.namespace",
            format!("agent {} has no namespace", agent.name_any()),
        )
    })?;
    Ok((agent.name_any(), namespace))
}
