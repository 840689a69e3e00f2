//! Builder for a plain pod that logs a known message
//!
//! Log-shipping agents are validated against what this pod prints: the
//! message ends up as an event in the external store.

use std::collections::BTreeMap;
use std::sync::Arc;

use beacon_common::hash::deterministic_hash;
use beacon_common::kube_utils::ObjectStore;
use k8s_openapi::api::core::v1::{Container, EnvVar, Pod, PodSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;

use crate::builder::{Builder, TestContext};
use crate::error::StepError;
use crate::step::{Step, StepList};

/// Image of the logging container
pub const TEST_POD_IMAGE: &str = "busybox:1.36";

const POD_PHASE_RUNNING: &str = "Running";

/// A pod printing [`TestPodBuilder::logged`] every few seconds
#[derive(Clone, Debug)]
pub struct TestPodBuilder {
    pod: Pod,
    logged: String,
}

impl TestPodBuilder {
    /// Pod `<name>-test-pod` logging a message unique to `name`
    pub fn new(name: &str) -> Self {
        let pod_name = format!("{}-test-pod", name);
        let logged = format!("beacon-e2e-{}", deterministic_hash(&pod_name));
        let pod = Pod {
            metadata: ObjectMeta {
                name: Some(pod_name.clone()),
                labels: Some(BTreeMap::from([(
                    "app.kubernetes.io/name".to_string(),
                    pod_name,
                )])),
                ..Default::default()
            },
            spec: Some(PodSpec {
                containers: vec![Container {
                    name: "logger".to_string(),
                    image: Some(TEST_POD_IMAGE.to_string()),
                    command: Some(vec![
                        "/bin/sh".to_string(),
                        "-c".to_string(),
                        "while true; do echo \"$MESSAGE\"; sleep 5; done".to_string(),
                    ]),
                    env: Some(vec![EnvVar {
                        name: "MESSAGE".to_string(),
                        value: Some(logged.clone()),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }],
                termination_grace_period_seconds: Some(0),
                ..Default::default()
            }),
            ..Default::default()
        };
        Self { pod, logged }
    }

    /// Create the pod in `namespace`
    pub fn with_namespace(mut self, namespace: &str) -> Self {
        self.pod.metadata.namespace = Some(namespace.to_string());
        self
    }

    /// Message the pod prints
    pub fn logged(&self) -> &str {
        &self.logged
    }

    /// Name of the pod
    pub fn pod_name(&self) -> String {
        self.pod.name_any()
    }

    fn resolved(&self, ctx: &TestContext) -> Pod {
        let mut pod = self.pod.clone();
        if pod.metadata.namespace.is_none() {
            pod.metadata.namespace = Some(ctx.config.namespace.clone());
        }
        pod
    }
}

impl Builder for TestPodBuilder {
    fn name(&self) -> String {
        format!("test pod {}", self.pod.name_any())
    }

    fn creation_steps(&self, ctx: &TestContext) -> StepList {
        let store = ctx.store.clone();
        let pod = Arc::new(self.resolved(ctx));
        StepList::new().with_step(Step::new("Creating test Pod should succeed", move || {
            let store = store.clone();
            let pod = pod.clone();
            async move {
                store.create_pod(&pod).await.map_err(|e| StepError::failed(e.to_string()))?;
                Ok(())
            }
        }))
    }

    fn check_platform_steps(&self, ctx: &TestContext) -> StepList {
        let store = ctx.store.clone();
        let pod = Arc::new(self.resolved(ctx));
        StepList::new().with_step(Step::eventually(
            "Test Pod should be running",
            ctx.eventually(),
            move || {
                let store = store.clone();
                let pod = pod.clone();
                async move { check_pod_running(store.as_ref(), &pod).await }
            },
        ))
    }

    fn deletion_steps(&self, ctx: &TestContext) -> StepList {
        let pod = Arc::new(self.resolved(ctx));
        let delete = {
            let store = ctx.store.clone();
            let pod = pod.clone();
            Step::new("Deleting test Pod should succeed", move || {
                let store = store.clone();
                let pod = pod.clone();
                async move {
                    let namespace = pod.namespace().unwrap_or_default();
                    match store.delete_pod(&namespace, &pod.name_any()).await {
                        Ok(()) => Ok(()),
                        Err(e) if e.is_not_found() => Ok(()),
                        Err(e) => Err(e.into()),
                    }
                }
            })
        };
        let store = ctx.store.clone();
        let gone = Step::eventually(
            "Test Pod should eventually be removed",
            ctx.eventually(),
            move || {
                let store = store.clone();
                let pod = pod.clone();
                async move {
                    let namespace = pod.namespace().unwrap_or_default();
                    match store.get_pod(&namespace, &pod.name_any()).await {
                        Ok(_) => Err(StepError::pending(format!("pod {} still exists", pod.name_any()))),
                        Err(e) if e.is_not_found() => Ok(()),
                        Err(e) => Err(e.into()),
                    }
                }
            },
        );
        StepList::from(vec![delete, gone])
    }
}

/// Probe: the pod exists and its phase is `Running`
pub async fn check_pod_running(store: &dyn ObjectStore, pod: &Pod) -> Result<(), StepError> {
    let namespace = pod.namespace().unwrap_or_default();
    let current = store.get_pod(&namespace, &pod.name_any()).await?;
    let phase = current
        .status
        .and_then(|s| s.phase)
        .unwrap_or_else(|| "Unknown".to_string());
    if phase != POD_PHASE_RUNNING {
        return Err(StepError::pending(format!(
            "pod {} is {}, expected {}",
            pod.name_any(),
            phase,
            POD_PHASE_RUNNING
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use beacon_common::kube_utils::MockObjectStore;
    use beacon_common::Error;
    use k8s_openapi::api::core::v1::PodStatus;

    use crate::config::E2eConfig;
    use crate::validation::MockEventStore;

    fn context(store: MockObjectStore) -> TestContext {
        TestContext::new(
            Arc::new(store),
            Arc::new(MockEventStore::new()),
            E2eConfig {
                timeout: Duration::from_secs(5),
                poll_interval: Duration::from_secs(1),
                ..E2eConfig::default()
            },
        )
    }

    #[test]
    fn logged_message_is_stable_and_passed_to_the_container() {
        let a = TestPodBuilder::new("fb");
        let b = TestPodBuilder::new("fb");
        assert_eq!(a.logged(), b.logged());
        assert_ne!(a.logged(), TestPodBuilder::new("mb").logged());
        assert_eq!(a.pod_name(), "fb-test-pod");

        let env = a.pod.spec.as_ref().unwrap().containers[0].env.clone().unwrap();
        assert_eq!(env[0].value.as_deref(), Some(a.logged()));
    }

    #[tokio::test(start_paused = true)]
    async fn running_check_waits_for_phase() {
        let mut store = MockObjectStore::new();
        let mut seq = mockall::Sequence::new();
        store
            .expect_get_pod()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|ns, name| Err(Error::not_found("Pod", format!("{}/{}", ns, name))));
        for phase in ["Pending", "Running"] {
            store
                .expect_get_pod()
                .times(1)
                .in_sequence(&mut seq)
                .returning(move |_, _| {
                    Ok(Pod {
                        status: Some(PodStatus {
                            phase: Some(phase.to_string()),
                            ..Default::default()
                        }),
                        ..Default::default()
                    })
                });
        }

        let ctx = context(store);
        let steps = TestPodBuilder::new("fb").check_platform_steps(&ctx);
        assert_eq!(steps.iter().next().unwrap().run().await, Ok(()));
    }
}
