//! Metricbeat pod customization
//!
//! Metricbeat reads host metrics, so besides its config it mounts the docker
//! socket and the node's `/proc` and cgroup trees (read-only, under
//! `/hostfs`), and keeps its registry in a data volume: a PVC when running
//! as a Deployment, a per-agent host directory when running on every node.

use beacon_common::crd::AgentSpec;

use crate::pod_template::PodTemplateBuilder;
use crate::volume::{
    HostVolume, PersistentVolumeClaimVolume, VolumeLike, HOST_PATH_DIRECTORY_OR_CREATE,
    HOST_PATH_UNSET,
};
use crate::{config_mount_path, METRICBEAT_TYPE};

/// Docker socket volume name
pub const DOCKER_SOCK_VOLUME_NAME: &str = "dockersock";
/// Docker socket path on the node
pub const DOCKER_SOCK_PATH: &str = "/var/run/docker.sock";
/// Docker socket path in the container
pub const DOCKER_SOCK_MOUNT_PATH: &str = "/var/run/docker.sock";

/// Proc volume name
pub const PROC_VOLUME_NAME: &str = "proc";
/// Proc path on the node
pub const PROC_PATH: &str = "/proc";
/// Proc path in the container
pub const PROC_MOUNT_PATH: &str = "/hostfs/proc";

/// Cgroup volume name
pub const CGROUP_VOLUME_NAME: &str = "cgroup";
/// Cgroup path on the node
pub const CGROUP_PATH: &str = "/sys/fs/cgroup";
/// Cgroup path in the container
pub const CGROUP_MOUNT_PATH: &str = "/hostfs/sys/fs/cgroup";

/// Data volume name
pub const DATA_VOLUME_NAME: &str = "data";
/// Data path in the container
pub const DATA_MOUNT_PATH: &str = "/usr/share/metricbeat/data";

/// Root of the host filesystem as seen by metricbeat
pub const HOSTFS_ROOT: &str = "/hostfs";

/// Host directory holding the data of one agent when running on every node
pub fn host_data_path(namespace: &str, name: &str) -> String {
    format!("/var/lib/{}/{}/metricbeat-data", namespace, name)
}

/// Add metricbeat's volumes and args to the template
pub fn customize(
    builder: PodTemplateBuilder,
    name: &str,
    namespace: &str,
    spec: &AgentSpec,
) -> PodTemplateBuilder {
    let docker_sock = HostVolume::new(
        DOCKER_SOCK_VOLUME_NAME,
        DOCKER_SOCK_PATH,
        DOCKER_SOCK_MOUNT_PATH,
        false,
        HOST_PATH_UNSET,
    );
    let proc = HostVolume::read_only(PROC_VOLUME_NAME, PROC_PATH, PROC_MOUNT_PATH);
    let cgroup = HostVolume::read_only(CGROUP_VOLUME_NAME, CGROUP_PATH, CGROUP_MOUNT_PATH);
    let data: Box<dyn VolumeLike> = if spec.is_deployment() {
        Box::new(PersistentVolumeClaimVolume::new(
            DATA_VOLUME_NAME,
            DATA_MOUNT_PATH,
        ))
    } else {
        Box::new(HostVolume::new(
            DATA_VOLUME_NAME,
            host_data_path(namespace, name),
            DATA_MOUNT_PATH,
            false,
            HOST_PATH_DIRECTORY_OR_CREATE,
        ))
    };

    let volumes: [&dyn VolumeLike; 4] = [&docker_sock, &proc, &cgroup, data.as_ref()];
    volumes
        .into_iter()
        .fold(builder, |b, v| b.with_volume(v))
        .with_args([
            "-e".to_string(),
            "-c".to_string(),
            config_mount_path(METRICBEAT_TYPE),
            format!("-system.hostfs={}", HOSTFS_ROOT),
        ])
}
