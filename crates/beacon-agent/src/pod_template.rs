//! Fluent construction of the agent pod template

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec, Volume, VolumeMount};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::volume::VolumeLike;

/// Builds a single-container pod template
#[derive(Clone, Debug, Default)]
pub struct PodTemplateBuilder {
    container_name: String,
    image: String,
    args: Vec<String>,
    volumes: Vec<Volume>,
    volume_mounts: Vec<VolumeMount>,
    labels: BTreeMap<String, String>,
    annotations: BTreeMap<String, String>,
    service_account_name: Option<String>,
}

impl PodTemplateBuilder {
    /// Start a template for the given container
    pub fn new(container_name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            container_name: container_name.into(),
            image: image.into(),
            ..Default::default()
        }
    }

    /// Append volumes
    pub fn with_volumes(mut self, volumes: impl IntoIterator<Item = Volume>) -> Self {
        self.volumes.extend(volumes);
        self
    }

    /// Append container volume mounts
    pub fn with_volume_mounts(mut self, mounts: impl IntoIterator<Item = VolumeMount>) -> Self {
        self.volume_mounts.extend(mounts);
        self
    }

    /// Append a volume and its mount
    pub fn with_volume(self, volume: &dyn VolumeLike) -> Self {
        self.with_volumes([volume.volume()])
            .with_volume_mounts([volume.volume_mount()])
    }

    /// Append container args
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Merge labels
    pub fn with_labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.labels.extend(labels);
        self
    }

    /// Set an annotation
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    /// Run the pod as the given ServiceAccount
    pub fn with_service_account(mut self, name: impl Into<String>) -> Self {
        self.service_account_name = Some(name.into());
        self
    }

    /// Produce the pod template
    pub fn build(self) -> PodTemplateSpec {
        PodTemplateSpec {
            metadata: Some(ObjectMeta {
                labels: Some(self.labels),
                annotations: Some(self.annotations),
                ..Default::default()
            }),
            spec: Some(PodSpec {
                containers: vec![Container {
                    name: self.container_name,
                    image: Some(self.image),
                    args: non_empty(self.args),
                    volume_mounts: non_empty(self.volume_mounts),
                    ..Default::default()
                }],
                volumes: non_empty(self.volumes),
                service_account_name: self.service_account_name,
                ..Default::default()
            }),
        }
    }
}

fn non_empty<T>(items: Vec<T>) -> Option<Vec<T>> {
    if items.is_empty() {
        None
    } else {
        Some(items)
    }
}
