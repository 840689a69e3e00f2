//! Volumes and their mounts
//!
//! Every volume an agent pod needs comes with exactly one mount in the
//! agent container, so both are produced by the same [`VolumeLike`] value.

use k8s_openapi::api::core::v1::{
    HostPathVolumeSource, PersistentVolumeClaimVolumeSource, SecretVolumeSource, Volume,
    VolumeMount,
};

/// `hostPath.type` value: no check before mounting
pub const HOST_PATH_UNSET: &str = "";
/// `hostPath.type` value: create the directory if missing
pub const HOST_PATH_DIRECTORY_OR_CREATE: &str = "DirectoryOrCreate";

/// A pod volume together with the mount that exposes it to the agent
pub trait VolumeLike {
    /// The pod-level volume
    fn volume(&self) -> Volume;
    /// The container-level mount
    fn volume_mount(&self) -> VolumeMount;
}

/// A path on the node mounted into the agent container
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostVolume {
    name: String,
    host_path: String,
    mount_path: String,
    read_only: bool,
    host_path_type: String,
}

impl HostVolume {
    /// Create a host volume
    pub fn new(
        name: impl Into<String>,
        host_path: impl Into<String>,
        mount_path: impl Into<String>,
        read_only: bool,
        host_path_type: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            host_path: host_path.into(),
            mount_path: mount_path.into(),
            read_only,
            host_path_type: host_path_type.into(),
        }
    }

    /// Create a read-only host volume with no type check
    pub fn read_only(
        name: impl Into<String>,
        host_path: impl Into<String>,
        mount_path: impl Into<String>,
    ) -> Self {
        Self::new(name, host_path, mount_path, true, HOST_PATH_UNSET)
    }
}

impl VolumeLike for HostVolume {
    fn volume(&self) -> Volume {
        Volume {
            name: self.name.clone(),
            host_path: Some(HostPathVolumeSource {
                path: self.host_path.clone(),
                type_: Some(self.host_path_type.clone()),
            }),
            ..Default::default()
        }
    }

    fn volume_mount(&self) -> VolumeMount {
        VolumeMount {
            name: self.name.clone(),
            mount_path: self.mount_path.clone(),
            read_only: Some(self.read_only),
            ..Default::default()
        }
    }
}

/// A persistent volume claim mounted into the agent container
///
/// The claim is named after the volume.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PersistentVolumeClaimVolume {
    name: String,
    mount_path: String,
}

impl PersistentVolumeClaimVolume {
    /// Create a PVC-backed volume
    pub fn new(name: impl Into<String>, mount_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mount_path: mount_path.into(),
        }
    }
}

impl VolumeLike for PersistentVolumeClaimVolume {
    fn volume(&self) -> Volume {
        Volume {
            name: self.name.clone(),
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                claim_name: self.name.clone(),
                read_only: Some(false),
            }),
            ..Default::default()
        }
    }

    fn volume_mount(&self) -> VolumeMount {
        VolumeMount {
            name: self.name.clone(),
            mount_path: self.mount_path.clone(),
            read_only: Some(false),
            ..Default::default()
        }
    }
}

/// The secret holding the rendered agent config, mounted read-only
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfigVolume {
    name: String,
    secret_name: String,
    mount_path: String,
}

impl ConfigVolume {
    /// Create a config volume backed by the named secret
    pub fn new(
        name: impl Into<String>,
        secret_name: impl Into<String>,
        mount_path: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            secret_name: secret_name.into(),
            mount_path: mount_path.into(),
        }
    }
}

impl VolumeLike for ConfigVolume {
    fn volume(&self) -> Volume {
        Volume {
            name: self.name.clone(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(self.secret_name.clone()),
                optional: Some(false),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn volume_mount(&self) -> VolumeMount {
        VolumeMount {
            name: self.name.clone(),
            mount_path: self.mount_path.clone(),
            read_only: Some(true),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_volume_mount_shares_the_name() {
        let v = HostVolume::read_only("proc", "/proc", "/hostfs/proc");
        assert_eq!(v.volume().name, v.volume_mount().name);
        let hp = v.volume().host_path.unwrap();
        assert_eq!(hp.path, "/proc");
        assert_eq!(hp.type_.as_deref(), Some(HOST_PATH_UNSET));
        assert_eq!(v.volume_mount().read_only, Some(true));
        assert_eq!(v.volume_mount().mount_path, "/hostfs/proc");
    }

    #[test]
    fn pvc_volume_claims_its_own_name() {
        let v = PersistentVolumeClaimVolume::new("data", "/usr/share/metricbeat/data");
        let claim = v.volume().persistent_volume_claim.unwrap();
        assert_eq!(claim.claim_name, "data");
        assert_eq!(v.volume_mount().read_only, Some(false));
    }

    #[test]
    fn config_volume_is_read_only_secret() {
        let v = ConfigVolume::new("config", "mb-metricbeat-config", "/etc/beat");
        assert_eq!(
            v.volume().secret.unwrap().secret_name.as_deref(),
            Some("mb-metricbeat-config")
        );
        assert_eq!(v.volume_mount().read_only, Some(true));
    }
}
