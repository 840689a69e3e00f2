//! Object store access using kube-rs
//!
//! [`ObjectStore`] is the seam between verification code and the cluster:
//! list/get/create/update/delete for agent pods and `Agent` resources, with
//! optimistic-concurrency conflicts and missing objects surfaced as typed
//! errors. [`KubeStore`] is the real implementation.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config, ResourceExt};
use tracing::debug;

use crate::crd::Agent;
use crate::Error;

/// The "Ready" condition type for pods
pub const CONDITION_READY: &str = "Ready";
/// The "True" status value for conditions
pub const STATUS_TRUE: &str = "True";

/// Default connection timeout for kube clients (5s is plenty for local API server)
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for kube clients
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Read and write access to the objects the harness works with.
///
/// Reads may be served from a cache that lags the authoritative store.
/// Updates use optimistic concurrency: writing an object whose resource
/// version is stale fails with [`Error::Conflict`].
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// List pods in a namespace matching a label selector
    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>, Error>;

    /// Get a pod by name
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, Error>;

    /// Create a pod
    async fn create_pod(&self, pod: &Pod) -> Result<Pod, Error>;

    /// Replace a pod, failing with a conflict if it changed since it was read
    async fn update_pod(&self, pod: &Pod) -> Result<Pod, Error>;

    /// Delete a pod
    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), Error>;

    /// Get an agent by name
    async fn get_agent(&self, namespace: &str, name: &str) -> Result<Agent, Error>;

    /// Create an agent
    async fn create_agent(&self, agent: &Agent) -> Result<Agent, Error>;

    /// Replace an agent, failing with a conflict if it changed since it was read
    async fn update_agent(&self, agent: &Agent) -> Result<Agent, Error>;

    /// Delete an agent
    async fn delete_agent(&self, namespace: &str, name: &str) -> Result<(), Error>;
}

/// `namespace/name` of an object, for error messages and logs
pub fn namespaced_name<K: ResourceExt>(obj: &K) -> String {
    format!(
        "{}/{}",
        obj.namespace().unwrap_or_default(),
        obj.name_any()
    )
}

/// Map a kube error to the typed conflict/not-found variants where possible
fn map_kube_error(kind: &str, name: String, err: kube::Error) -> Error {
    match &err {
        kube::Error::Api(ae) if ae.code == 409 => Error::conflict(kind, name),
        kube::Error::Api(ae) if ae.code == 404 => Error::not_found(kind, name),
        _ => Error::from(err),
    }
}

fn namespace_of<K: ResourceExt>(kind: &str, obj: &K) -> Result<String, Error> {
    obj.namespace().ok_or_else(|| {
        Error::validation_for_field(
            "metadata.namespace",
            format!("{} {} has no namespace", kind, obj.name_any()),
        )
    })
}

/// [`ObjectStore`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    /// Wrap an existing client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect using an optional kubeconfig path (inferred config otherwise)
    pub async fn connect(kubeconfig: Option<&Path>) -> Result<Self, Error> {
        Ok(Self::new(create_client(kubeconfig).await?))
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn agents(&self, namespace: &str) -> Api<Agent> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>, Error> {
        let list = self
            .pods(namespace)
            .list(&ListParams::default().labels(label_selector))
            .await?;
        debug!(
            namespace = %namespace,
            selector = %label_selector,
            count = list.items.len(),
            "listed pods"
        );
        Ok(list.items)
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, Error> {
        self.pods(namespace)
            .get(name)
            .await
            .map_err(|e| map_kube_error("Pod", format!("{}/{}", namespace, name), e))
    }

    async fn create_pod(&self, pod: &Pod) -> Result<Pod, Error> {
        let namespace = namespace_of("Pod", pod)?;
        self.pods(&namespace)
            .create(&PostParams::default(), pod)
            .await
            .map_err(|e| map_kube_error("Pod", namespaced_name(pod), e))
    }

    async fn update_pod(&self, pod: &Pod) -> Result<Pod, Error> {
        let namespace = namespace_of("Pod", pod)?;
        self.pods(&namespace)
            .replace(&pod.name_any(), &PostParams::default(), pod)
            .await
            .map_err(|e| map_kube_error("Pod", namespaced_name(pod), e))
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), Error> {
        self.pods(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map_err(|e| map_kube_error("Pod", format!("{}/{}", namespace, name), e))?;
        Ok(())
    }

    async fn get_agent(&self, namespace: &str, name: &str) -> Result<Agent, Error> {
        self.agents(namespace)
            .get(name)
            .await
            .map_err(|e| map_kube_error("Agent", format!("{}/{}", namespace, name), e))
    }

    async fn create_agent(&self, agent: &Agent) -> Result<Agent, Error> {
        let namespace = namespace_of("Agent", agent)?;
        self.agents(&namespace)
            .create(&PostParams::default(), agent)
            .await
            .map_err(|e| map_kube_error("Agent", namespaced_name(agent), e))
    }

    async fn update_agent(&self, agent: &Agent) -> Result<Agent, Error> {
        let namespace = namespace_of("Agent", agent)?;
        self.agents(&namespace)
            .replace(&agent.name_any(), &PostParams::default(), agent)
            .await
            .map_err(|e| map_kube_error("Agent", namespaced_name(agent), e))
    }

    async fn delete_agent(&self, namespace: &str, name: &str) -> Result<(), Error> {
        self.agents(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map_err(|e| map_kube_error("Agent", format!("{}/{}", namespace, name), e))?;
        Ok(())
    }
}

/// Create a kube client from optional kubeconfig path with default timeouts
pub async fn create_client(kubeconfig: Option<&Path>) -> Result<Client, Error> {
    create_client_with_timeout(kubeconfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT).await
}

/// Create a kube client from optional kubeconfig path with custom timeouts
pub async fn create_client_with_timeout(
    kubeconfig: Option<&Path>,
    connect_timeout: Duration,
    read_timeout: Duration,
) -> Result<Client, Error> {
    let mut config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                Error::internal_with_context(
                    "create_client",
                    format!("failed to read kubeconfig: {}", e),
                )
            })?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| {
                    Error::internal_with_context(
                        "create_client",
                        format!("failed to load kubeconfig: {}", e),
                    )
                })?
        }
        None => Config::infer().await.map_err(|e| {
            Error::internal_with_context("create_client", format!("failed to infer config: {}", e))
        })?,
    };
    config.connect_timeout = Some(connect_timeout);
    config.read_timeout = Some(read_timeout);
    Client::try_from(config).map_err(|e| {
        Error::internal_with_context("create_client", format!("failed to create client: {}", e))
    })
}

/// Check whether a pod reports the `Ready` condition as `True`
pub fn is_pod_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == CONDITION_READY && c.status == STATUS_TRUE)
        })
        .unwrap_or(false)
}

/// Read an annotation from any object
pub fn annotation<'a, K: ResourceExt>(obj: &'a K, key: &str) -> Option<&'a str> {
    obj.annotations().get(key).map(String::as_str)
}
