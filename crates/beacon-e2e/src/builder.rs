//! Builders: per-resource adapters producing step lists for each phase
//!
//! Every phase function is pure: it only reads the builder's declarative
//! state and returns steps. Nothing touches the cluster until a
//! [`Sequence`](crate::Sequence) runs them.

use std::sync::Arc;

use beacon_common::kube_utils::{KubeStore, ObjectStore};
use beacon_common::Error;

use crate::config::{E2eConfig, ElasticsearchConfig};
use crate::elasticsearch::ElasticsearchEvents;
use crate::error::StepError;
use crate::eventually::Eventually;
use crate::step::{Step, StepList};
use crate::validation::EventStore;

/// Collaborators and settings handed to every phase of every builder
#[derive(Clone)]
pub struct TestContext {
    /// Cluster object store (possibly served from a lagging cache)
    pub store: Arc<dyn ObjectStore>,
    /// External event store agents ship to
    pub events: Arc<dyn EventStore>,
    /// Run-wide settings
    pub config: E2eConfig,
}

impl TestContext {
    /// Bundle collaborators and settings
    pub fn new(store: Arc<dyn ObjectStore>, events: Arc<dyn EventStore>, config: E2eConfig) -> Self {
        Self {
            store,
            events,
            config,
        }
    }

    /// Context for a real cluster: settings from the environment, the
    /// inferred kubeconfig and the configured Elasticsearch cluster
    pub async fn from_env() -> Result<Self, Error> {
        let config = E2eConfig::from_env()?;
        let es = ElasticsearchConfig::from_env().ok_or_else(|| {
            Error::validation_for_field("BEACON_E2E_ES_URL", "no Elasticsearch URL configured")
        })?;
        Ok(Self::new(
            Arc::new(KubeStore::connect(None).await?),
            Arc::new(ElasticsearchEvents::new(es)?),
            config,
        ))
    }

    /// Retry policy inherited by every retried step
    pub fn eventually(&self) -> Eventually {
        self.config.eventually()
    }
}

/// Knows how to create, check, mutate and delete one kind of test resource
pub trait Builder: Send + Sync {
    /// Name used in logs and step names
    fn name(&self) -> String;

    /// Steps preparing the environment before anything is created
    fn init_steps(&self, _ctx: &TestContext) -> StepList {
        StepList::new()
    }

    /// Steps creating the resource
    fn creation_steps(&self, ctx: &TestContext) -> StepList;

    /// Steps checking platform-level state (counts, readiness, spec)
    fn check_platform_steps(&self, ctx: &TestContext) -> StepList;

    /// Steps checking side effects in external systems
    fn check_external_steps(&self, _ctx: &TestContext) -> StepList {
        StepList::new()
    }

    /// Steps applying this builder as a mutation of a previous builder, then
    /// checking convergence
    ///
    /// Builders that cannot be mutated produce a single step that reports
    /// the misuse.
    fn mutation_steps(&self, _ctx: &TestContext) -> StepList {
        let name = self.name();
        StepList::new().with_step(Step::new(
            format!("{} should support mutation", name),
            move || {
                let name = name.clone();
                async move {
                    Err(StepError::misconfigured(format!(
                        "{} does not support mutation",
                        name
                    )))
                }
            },
        ))
    }

    /// Steps deleting the resource and waiting for it to be gone
    fn deletion_steps(&self, ctx: &TestContext) -> StepList;
}

/// Platform checks followed by external checks
pub fn check_steps(builder: &dyn Builder, ctx: &TestContext) -> StepList {
    builder
        .check_platform_steps(ctx)
        .with_steps(builder.check_external_steps(ctx))
}
