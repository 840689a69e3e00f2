//! Common types for Beacon: the Agent CRD, errors, fingerprints and the
//! object store used by both the operator tooling and the e2e harness.

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod hash;
pub mod kube_utils;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Label carrying the name of the Agent that owns a pod
pub const LABEL_AGENT_NAME: &str = "beacon.dev/agent-name";

/// Label carrying the agent type (metricbeat, filebeat, ...) of a pod
pub const LABEL_AGENT_TYPE: &str = "beacon.dev/agent-type";

/// Label for resources managed by Beacon
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Value of [`LABEL_MANAGED_BY`] for resources Beacon manages
pub const LABEL_MANAGED_BY_BEACON: &str = "beacon";

/// Annotation written by the operator on every generated pod.
///
/// Holds the fingerprint of the Agent spec the pod template was built from.
pub const CONFIG_HASH_ANNOTATION: &str = "beacon.dev/config-hash";

/// Default annotation the e2e harness uses to mark pods with the
/// fingerprint of the spec they were observed running before a mutation.
pub const BUILDER_HASH_ANNOTATION: &str = "beacon.dev/builder-hash";
