//! Mutation verification protocol
//!
//! Proves that pods owned by a resource were regenerated after its spec
//! changed, without any signal from the reconciler:
//!
//! 1. the mutation must know the spec it mutates from, or the harness is
//!    misconfigured;
//! 2. every current pod is annotated with the fingerprint of that previous
//!    spec (write conflicts with the reconciler are retried);
//! 3. a barrier waits until a fresh read shows the annotation on every pod;
//! 4. the new spec is applied with a read-modify-write;
//! 5. convergence checks then look for pods that no longer carry the old
//!    fingerprint (see the builders' platform checks).
//!
//! Each phase completes before the next one's steps start.

use std::sync::Arc;

use beacon_common::crd::Agent;
use beacon_common::hash::fingerprint;
use beacon_common::kube_utils::{annotation, namespaced_name, ObjectStore};
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use serde::Serialize;
use tracing::{info, warn};

use crate::builder::TestContext;
use crate::error::StepError;
use crate::step::{Step, StepList};

/// Pods owned by the resource being mutated
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PodSelector {
    /// Namespace of the pods
    pub namespace: String,
    /// Label selector matching them
    pub label_selector: String,
}

impl PodSelector {
    /// Select pods in `namespace` matching `label_selector`
    pub fn new(namespace: impl Into<String>, label_selector: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            label_selector: label_selector.into(),
        }
    }

    async fn list(&self, store: &dyn ObjectStore) -> Result<Vec<Pod>, StepError> {
        Ok(store
            .list_pods(&self.namespace, &self.label_selector)
            .await?)
    }
}

/// Fingerprint of the spec a mutation starts from.
///
/// `None` means the mutation has no lineage, which is a harness defect.
fn builder_hash<S: Serialize>(mutated_from: Option<&S>) -> Result<String, StepError> {
    let previous = mutated_from.ok_or_else(|| {
        StepError::misconfigured("builder has to have mutated_from set if it's a mutation builder")
    })?;
    fingerprint(previous).map_err(|e| StepError::failed(e.to_string()))
}

/// Annotate pods with the previous spec's fingerprint, then wait until the
/// annotation is visible on all of them.
pub fn annotate_pods_with_builder_hash<S: Serialize>(
    ctx: &TestContext,
    pods: PodSelector,
    mutated_from: Option<&S>,
) -> StepList {
    let hash = builder_hash(mutated_from);
    let key = ctx.config.builder_hash_annotation.clone();

    let annotate = {
        let store = ctx.store.clone();
        let pods = pods.clone();
        let hash = hash.clone();
        let key = key.clone();
        Step::eventually(
            "Annotate Pods with a hash of their Builder spec",
            ctx.eventually(),
            move || {
                let store = store.clone();
                let pods = pods.clone();
                let hash = hash.clone();
                let key = key.clone();
                async move { annotate_pods(store.as_ref(), &pods, &key, &hash?).await }
            },
        )
    };

    let barrier = {
        let store = ctx.store.clone();
        Step::eventually(
            "Wait for annotated Pods to appear in the cache",
            ctx.eventually(),
            move || {
                let store = store.clone();
                let pods = pods.clone();
                let hash = hash.clone();
                let key = key.clone();
                async move { check_pods_annotated(store.as_ref(), &pods, &key, &hash?).await }
            },
        )
    };

    StepList::from(vec![annotate, barrier])
}

/// Write `key=hash` on every selected pod.
///
/// Pods already showing the value are left alone, so a retry after a
/// conflict only rewrites what is missing. A conflict surfaces as
/// [`StepError::Pending`].
pub async fn annotate_pods(
    store: &dyn ObjectStore,
    pods: &PodSelector,
    key: &str,
    hash: &str,
) -> Result<(), StepError> {
    let listed = pods.list(store).await?;
    if listed.is_empty() {
        warn!(
            namespace = %pods.namespace,
            selector = %pods.label_selector,
            "no pods to annotate"
        );
    }

    for mut pod in listed {
        if annotation(&pod, key) == Some(hash) {
            continue;
        }
        pod.annotations_mut().insert(key.to_string(), hash.to_string());
        store.update_pod(&pod).await?;
        info!(pod = %namespaced_name(&pod), annotation = %key, value = %hash, "pod has builder hash set");
    }
    Ok(())
}

/// Probe: every selected pod, as read now, shows `key=hash`
pub async fn check_pods_annotated(
    store: &dyn ObjectStore,
    pods: &PodSelector,
    key: &str,
    hash: &str,
) -> Result<(), StepError> {
    for pod in pods.list(store).await? {
        if annotation(&pod, key) != Some(hash) {
            return Err(StepError::pending(format!(
                "pod {} is not annotated with {}={} yet",
                pod.name_any(),
                key,
                hash
            )));
        }
    }
    Ok(())
}

/// Replace the stored agent's spec with `desired`'s.
///
/// With `retry_mutation_conflicts` set, the read-modify-write is repeated
/// until it lands; otherwise a single attempt is made and a conflict fails
/// the step.
pub fn apply_agent_mutation(ctx: &TestContext, desired: Agent) -> Step {
    let store = ctx.store.clone();
    let desired = Arc::new(desired);
    let name = "Applying the Agent mutation should succeed";
    let action = move || {
        let store = store.clone();
        let desired = desired.clone();
        async move { replace_agent_spec(store.as_ref(), &desired).await }
    };

    if ctx.config.retry_mutation_conflicts {
        Step::eventually(name, ctx.eventually(), action)
    } else {
        Step::new(name, move || {
            let attempt = action();
            async move {
                attempt.await.map_err(|e| match e {
                    StepError::Pending(msg) => StepError::failed(msg),
                    other => other,
                })
            }
        })
    }
}

/// Read the current agent, overwrite its spec, write it back
pub async fn replace_agent_spec(store: &dyn ObjectStore, desired: &Agent) -> Result<(), StepError> {
    let namespace = desired
        .namespace()
        .ok_or_else(|| StepError::misconfigured(format!("agent {} has no namespace", desired.name_any())))?;
    let mut current = store.get_agent(&namespace, &desired.name_any()).await?;
    current.spec = desired.spec.clone();
    store.update_agent(&current).await?;
    info!(agent = %namespaced_name(desired), "agent mutation applied");
    Ok(())
}
