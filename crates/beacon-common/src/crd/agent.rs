//! Agent CRD types
//!
//! An `Agent` is the managed resource: the desired state of a data shipping
//! agent (metricbeat, filebeat, heartbeat, ...) running as a DaemonSet or a
//! Deployment. The operator owns the pods; everything else only reads them
//! or annotates them.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::gen::SchemaGenerator;
use schemars::schema::{InstanceType, Schema, SchemaObject};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{LABEL_AGENT_NAME, LABEL_AGENT_TYPE, LABEL_MANAGED_BY, LABEL_MANAGED_BY_BEACON};

/// Specification for an Agent
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "beacon.dev",
    version = "v1alpha1",
    kind = "Agent",
    plural = "agents",
    shortname = "ag",
    namespaced,
    status = "AgentStatus",
    printcolumn = r#"{"name":"Type","type":"string","jsonPath":".spec.type"}"#,
    printcolumn = r#"{"name":"Health","type":"string","jsonPath":".status.health"}"#,
    printcolumn = r#"{"name":"Available","type":"integer","jsonPath":".status.availableNodes"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AgentSpec {
    /// Agent type (e.g. "metricbeat", "filebeat", "heartbeat")
    #[serde(rename = "type")]
    pub agent_type: String,

    /// Stack version of the agent
    pub version: String,

    /// Container image override; derived from type and version when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Free-form agent configuration, rendered to the agent's config file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub config: Option<serde_json::Value>,

    /// Elasticsearch cluster the agent ships data to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elasticsearch_ref: Option<ObjectRef>,

    /// Run the agent on every node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daemon_set: Option<DaemonSetSpec>,

    /// Run the agent as a fixed number of replicas
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment: Option<DeploymentSpec>,

    /// ServiceAccount the agent pods run as
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,
}

/// DaemonSet deployment model
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DaemonSetSpec {}

/// Deployment model
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentSpec {
    /// Number of replicas (defaults to 1)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
}

/// Reference to another object, optionally in another namespace
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectRef {
    /// Object name
    pub name: String,
    /// Object namespace; same namespace as the referrer when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// Observed state of an Agent
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgentStatus {
    /// Pods the operator expects to be running
    #[serde(default)]
    pub expected_nodes: i32,
    /// Pods currently available
    #[serde(default)]
    pub available_nodes: i32,
    /// Overall health
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<AgentHealth>,
}

/// Health of an Agent
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AgentHealth {
    /// No pod is available
    Red,
    /// Some pods are available
    Yellow,
    /// All expected pods are available
    Green,
}

impl AgentHealth {
    /// Derive health from expected and available pod counts
    pub fn from_counts(expected: i32, available: i32) -> Self {
        if available <= 0 {
            AgentHealth::Red
        } else if available < expected {
            AgentHealth::Yellow
        } else {
            AgentHealth::Green
        }
    }
}

impl AgentSpec {
    /// Whether the agent runs as a Deployment rather than a DaemonSet
    pub fn is_deployment(&self) -> bool {
        self.deployment.is_some()
    }
}

/// Labels the operator puts on every pod of an agent
pub fn agent_pod_labels(name: &str, agent_type: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_AGENT_NAME.to_string(), name.to_string()),
        (LABEL_AGENT_TYPE.to_string(), agent_type.to_string()),
        (
            LABEL_MANAGED_BY.to_string(),
            LABEL_MANAGED_BY_BEACON.to_string(),
        ),
    ])
}

/// Label selector matching the pods of the named agent
pub fn agent_pod_selector(name: &str) -> String {
    format!("{}={}", LABEL_AGENT_NAME, name)
}

fn preserve_unknown_fields(_: &mut SchemaGenerator) -> Schema {
    let mut schema = SchemaObject {
        instance_type: Some(InstanceType::Object.into()),
        ..Default::default()
    };
    schema.extensions.insert(
        "x-kubernetes-preserve-unknown-fields".to_string(),
        serde_json::Value::Bool(true),
    );
    Schema::Object(schema)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_uses_camel_case_and_type_key() {
        let spec = AgentSpec {
            agent_type: "metricbeat".to_string(),
            version: "8.15.0".to_string(),
            deployment: Some(DeploymentSpec { replicas: Some(2) }),
            service_account_name: Some("mb".to_string()),
            ..Default::default()
        };
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["type"], "metricbeat");
        assert_eq!(json["deployment"]["replicas"], 2);
        assert_eq!(json["serviceAccountName"], "mb");
        assert!(json.get("image").is_none());
    }

    #[test]
    fn health_follows_available_pods() {
        assert_eq!(AgentHealth::from_counts(3, 0), AgentHealth::Red);
        assert_eq!(AgentHealth::from_counts(3, 1), AgentHealth::Yellow);
        assert_eq!(AgentHealth::from_counts(3, 3), AgentHealth::Green);
    }

    #[test]
    fn selector_matches_the_name_label() {
        let labels = agent_pod_labels("mb", "metricbeat");
        assert_eq!(labels[LABEL_AGENT_NAME], "mb");
        assert_eq!(labels[LABEL_AGENT_TYPE], "metricbeat");
        assert_eq!(agent_pod_selector("mb"), "beacon.dev/agent-name=mb");
    }

    #[test]
    fn config_is_schemaless() {
        use kube::CustomResourceExt;
        let crd = Agent::crd();
        let schema = serde_json::to_value(&crd.spec.versions[0].schema).unwrap();
        let config = &schema["openAPIV3Schema"]["properties"]["spec"]["properties"]["config"];
        assert_eq!(config["x-kubernetes-preserve-unknown-fields"], true);
    }
}
