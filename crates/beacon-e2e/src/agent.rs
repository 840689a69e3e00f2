//! Builder for `Agent` resources

use std::sync::Arc;

use beacon_common::crd::{
    agent_pod_selector, Agent, AgentHealth, AgentSpec, DaemonSetSpec, DeploymentSpec, ObjectRef,
};
use beacon_common::hash::fingerprint;
use beacon_common::kube_utils::{annotation, is_pod_ready, ObjectStore};
use beacon_common::CONFIG_HASH_ANNOTATION;
use kube::ResourceExt;
use tracing::debug;

use crate::builder::{Builder, TestContext};
use crate::error::StepError;
use crate::mutation::{annotate_pods_with_builder_hash, apply_agent_mutation, PodSelector};
use crate::step::{Step, StepList};
use crate::validation::{index_pattern, EventValidation};

/// Declarative description of an Agent under test
#[derive(Clone, Debug)]
pub struct AgentBuilder {
    agent: Agent,
    mutated_from: Option<Box<AgentBuilder>>,
    validations: Vec<EventValidation>,
}

impl AgentBuilder {
    /// An agent of the given type, running on every node, in the run's
    /// namespace unless [`with_namespace`](Self::with_namespace) is used
    pub fn new(name: &str, agent_type: &str) -> Self {
        let agent = Agent::new(
            name,
            AgentSpec {
                agent_type: agent_type.to_string(),
                version: DEFAULT_VERSION.to_string(),
                daemon_set: Some(DaemonSetSpec::default()),
                ..Default::default()
            },
        );
        Self {
            agent,
            mutated_from: None,
            validations: Vec::new(),
        }
    }

    /// Create the agent in `namespace`
    pub fn with_namespace(mut self, namespace: &str) -> Self {
        self.agent.metadata.namespace = Some(namespace.to_string());
        self
    }

    /// Change the agent type
    pub fn with_type(mut self, agent_type: &str) -> Self {
        self.agent.spec.agent_type = agent_type.to_string();
        self
    }

    /// Change the stack version
    pub fn with_version(mut self, version: &str) -> Self {
        self.agent.spec.version = version.to_string();
        self
    }

    /// Override the container image
    pub fn with_image(mut self, image: &str) -> Self {
        self.agent.spec.image = Some(image.to_string());
        self
    }

    /// Set the agent configuration
    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.agent.spec.config = Some(config);
        self
    }

    /// Ship data to the referenced Elasticsearch cluster
    pub fn with_elasticsearch_ref(mut self, es: ObjectRef) -> Self {
        self.agent.spec.elasticsearch_ref = Some(es);
        self
    }

    /// Run as a Deployment with `replicas` pods
    pub fn with_deployment(mut self, replicas: i32) -> Self {
        self.agent.spec.daemon_set = None;
        self.agent.spec.deployment = Some(DeploymentSpec {
            replicas: Some(replicas),
        });
        self
    }

    /// Run on every node
    pub fn with_daemon_set(mut self) -> Self {
        self.agent.spec.deployment = None;
        self.agent.spec.daemon_set = Some(DaemonSetSpec::default());
        self
    }

    /// Queries that must eventually match documents shipped by the agent
    pub fn with_es_validations(mut self, validations: impl IntoIterator<Item = EventValidation>) -> Self {
        self.validations.extend(validations);
        self
    }

    /// Make this builder a mutation of `previous`
    pub fn with_mutated_from(mut self, previous: &AgentBuilder) -> Self {
        self.mutated_from = Some(Box::new(previous.clone()));
        self
    }

    /// Reference to the agent, for other builders
    pub fn object_ref(&self) -> ObjectRef {
        ObjectRef {
            name: self.agent.name_any(),
            namespace: self.agent.namespace(),
        }
    }

    /// The agent as it will be created
    pub fn agent(&self) -> &Agent {
        &self.agent
    }

    /// The builder this one mutates, if any
    pub fn mutated_from(&self) -> Option<&AgentBuilder> {
        self.mutated_from.as_deref()
    }

    /// The agent with its namespace resolved against the run's settings
    fn resolved(&self, ctx: &TestContext) -> Agent {
        let mut agent = self.agent.clone();
        if agent.metadata.namespace.is_none() {
            agent.metadata.namespace = Some(ctx.config.namespace.clone());
        }
        agent
    }

    fn pods(&self, ctx: &TestContext) -> PodSelector {
        let agent = self.resolved(ctx);
        PodSelector::new(
            agent.namespace().unwrap_or_default(),
            agent_pod_selector(&agent.name_any()),
        )
    }
}

/// Stack version used when none is given
pub const DEFAULT_VERSION: &str = "8.15.0";

impl Builder for AgentBuilder {
    fn name(&self) -> String {
        format!("{} {}", self.agent.spec.agent_type, self.agent.name_any())
    }

    fn init_steps(&self, ctx: &TestContext) -> StepList {
        let store = ctx.store.clone();
        let agent = Arc::new(self.resolved(ctx));
        StepList::new().with_step(Step::eventually(
            "Remove Agent if it already exists",
            ctx.eventually(),
            move || {
                let store = store.clone();
                let agent = agent.clone();
                async move {
                    delete_agent(store.as_ref(), &agent).await?;
                    check_agent_gone(store.as_ref(), &agent).await
                }
            },
        ))
    }

    fn creation_steps(&self, ctx: &TestContext) -> StepList {
        let store = ctx.store.clone();
        let agent = Arc::new(self.resolved(ctx));
        StepList::new().with_step(Step::new("Creating Agent should succeed", move || {
            let store = store.clone();
            let agent = agent.clone();
            async move {
                store.create_agent(&agent).await.map_err(|e| StepError::failed(e.to_string()))?;
                Ok(())
            }
        }))
    }

    fn check_platform_steps(&self, ctx: &TestContext) -> StepList {
        let agent = self.resolved(ctx);
        let namespace = agent.namespace().unwrap_or_default();
        let name = agent.name_any();
        let pods = self.pods(ctx);

        let current = match fingerprint(&agent.spec) {
            Ok(hash) => hash,
            Err(e) => return failing_step("Agent spec should be hashable", e.to_string()),
        };

        let mut steps = StepList::new().with_step({
            let store = ctx.store.clone();
            let pods = pods.clone();
            let current = current.clone();
            Step::eventually(
                "Agent Pods should run the current spec",
                ctx.eventually(),
                move || {
                    let store = store.clone();
                    let pods = pods.clone();
                    let current = current.clone();
                    async move { check_pods_run_spec(store.as_ref(), &pods, &current).await }
                },
            )
        });

        if let Some(previous) = &self.mutated_from {
            match fingerprint(&previous.agent.spec) {
                Ok(old) if old == current => {
                    debug!(agent = %name, "mutation keeps the spec fingerprint, pods are not expected to be regenerated");
                }
                Ok(old) => {
                    let store = ctx.store.clone();
                    let pods = pods.clone();
                    let key = ctx.config.builder_hash_annotation.clone();
                    steps = steps.with_step(Step::eventually(
                        "Agent Pods should have been regenerated after the mutation",
                        ctx.eventually(),
                        move || {
                            let store = store.clone();
                            let pods = pods.clone();
                            let key = key.clone();
                            let old = old.clone();
                            async move { check_pods_regenerated(store.as_ref(), &pods, &key, &old).await }
                        },
                    ));
                }
                Err(e) => {
                    return steps.with_steps(failing_step(
                        "Previous Agent spec should be hashable",
                        e.to_string(),
                    ))
                }
            }
        }

        let health = {
            let store = ctx.store.clone();
            let namespace = namespace.clone();
            let name = name.clone();
            Step::eventually("Agent health should be green", ctx.eventually(), move || {
                let store = store.clone();
                let namespace = namespace.clone();
                let name = name.clone();
                async move { check_agent_health(store.as_ref(), &namespace, &name).await }
            })
        };
        let ready = {
            let store = ctx.store.clone();
            Step::eventually(
                "Agent Pods should all be ready",
                ctx.eventually(),
                move || {
                    let store = store.clone();
                    let namespace = namespace.clone();
                    let name = name.clone();
                    let pods = pods.clone();
                    async move { check_pods_ready(store.as_ref(), &namespace, &name, &pods).await }
                },
            )
        };

        steps.with_step(health).with_step(ready)
    }

    fn check_external_steps(&self, ctx: &TestContext) -> StepList {
        let index = index_pattern(&self.agent.spec.agent_type);
        self.validations
            .iter()
            .map(|v| v.to_step(ctx.events.clone(), index.clone(), ctx.eventually()))
            .collect()
    }

    fn mutation_steps(&self, ctx: &TestContext) -> StepList {
        let previous = self.mutated_from.as_ref().map(|b| &b.agent.spec);
        annotate_pods_with_builder_hash(ctx, self.pods(ctx), previous)
            .with_step(apply_agent_mutation(ctx, self.resolved(ctx)))
            .with_steps(self.check_platform_steps(ctx))
            .with_steps(self.check_external_steps(ctx))
    }

    fn deletion_steps(&self, ctx: &TestContext) -> StepList {
        let agent = Arc::new(self.resolved(ctx));
        let delete = {
            let store = ctx.store.clone();
            let agent = agent.clone();
            Step::new("Deleting Agent should succeed", move || {
                let store = store.clone();
                let agent = agent.clone();
                async move { delete_agent(store.as_ref(), &agent).await }
            })
        };
        let store = ctx.store.clone();
        let gone = Step::eventually(
            "Agent and its Pods should eventually be removed",
            ctx.eventually(),
            move || {
                let store = store.clone();
                let agent = agent.clone();
                async move { check_agent_gone(store.as_ref(), &agent).await }
            },
        );
        StepList::from(vec![delete, gone])
    }
}

fn failing_step(name: &str, reason: String) -> StepList {
    StepList::new().with_step(Step::new(name, move || {
        let reason = reason.clone();
        async move { Err(StepError::failed(reason)) }
    }))
}

/// Delete the agent; an agent that is already gone counts as deleted
pub async fn delete_agent(store: &dyn ObjectStore, agent: &Agent) -> Result<(), StepError> {
    let namespace = agent.namespace().unwrap_or_default();
    match store.delete_agent(&namespace, &agent.name_any()).await {
        Ok(()) => Ok(()),
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Probe: the agent and all its pods are gone
pub async fn check_agent_gone(store: &dyn ObjectStore, agent: &Agent) -> Result<(), StepError> {
    let namespace = agent.namespace().unwrap_or_default();
    let name = agent.name_any();
    match store.get_agent(&namespace, &name).await {
        Ok(_) => return Err(StepError::pending(format!("agent {} still exists", name))),
        Err(e) if e.is_not_found() => {}
        Err(e) => return Err(e.into()),
    }
    let remaining = store
        .list_pods(&namespace, &agent_pod_selector(&name))
        .await?
        .len();
    if remaining > 0 {
        return Err(StepError::pending(format!(
            "{} pods of agent {} still exist",
            remaining, name
        )));
    }
    Ok(())
}

/// Probe: the agent expects at least one pod, all of them are available,
/// and its health is green
pub async fn check_agent_health(
    store: &dyn ObjectStore,
    namespace: &str,
    name: &str,
) -> Result<(), StepError> {
    let agent = store.get_agent(namespace, name).await?;
    let status = agent.status.unwrap_or_default();
    if status.expected_nodes <= 0 || status.expected_nodes != status.available_nodes {
        return Err(StepError::pending(format!(
            "agent {}: {} of {} expected pods available",
            name, status.available_nodes, status.expected_nodes
        )));
    }
    if status.health != Some(AgentHealth::Green) {
        return Err(StepError::pending(format!(
            "agent {} health is {:?}, expected green",
            name, status.health
        )));
    }
    Ok(())
}

/// Probe: as many pods as the agent expects exist, and all are ready
pub async fn check_pods_ready(
    store: &dyn ObjectStore,
    namespace: &str,
    name: &str,
    pods: &PodSelector,
) -> Result<(), StepError> {
    let expected = store
        .get_agent(namespace, name)
        .await?
        .status
        .map(|s| s.expected_nodes)
        .unwrap_or_default();
    let listed = store
        .list_pods(&pods.namespace, &pods.label_selector)
        .await?;
    if listed.len() as i32 != expected {
        return Err(StepError::pending(format!(
            "agent {} has {} pods, expected {}",
            name,
            listed.len(),
            expected
        )));
    }
    if let Some(pod) = listed.iter().find(|p| !is_pod_ready(p)) {
        return Err(StepError::pending(format!("pod {} is not ready", pod.name_any())));
    }
    Ok(())
}

/// Probe: there is at least one pod and every pod was built from the spec
/// with fingerprint `hash`
pub async fn check_pods_run_spec(
    store: &dyn ObjectStore,
    pods: &PodSelector,
    hash: &str,
) -> Result<(), StepError> {
    let listed = store
        .list_pods(&pods.namespace, &pods.label_selector)
        .await?;
    if listed.is_empty() {
        return Err(StepError::pending(format!(
            "no pod matches {} yet",
            pods.label_selector
        )));
    }
    for pod in &listed {
        let actual = annotation(pod, CONFIG_HASH_ANNOTATION);
        if actual != Some(hash) {
            return Err(StepError::pending(format!(
                "pod {} runs spec {}, expected {}",
                pod.name_any(),
                actual.unwrap_or("<none>"),
                hash
            )));
        }
    }
    Ok(())
}

/// Probe: no pod still carries the pre-mutation builder hash
pub async fn check_pods_regenerated(
    store: &dyn ObjectStore,
    pods: &PodSelector,
    key: &str,
    old_hash: &str,
) -> Result<(), StepError> {
    let listed = store
        .list_pods(&pods.namespace, &pods.label_selector)
        .await?;
    if let Some(pod) = listed.iter().find(|p| annotation(*p, key) == Some(old_hash)) {
        return Err(StepError::pending(format!(
            "pod {} still carries {}={} from before the mutation",
            pod.name_any(),
            key,
            old_hash
        )));
    }
    Ok(())
}
