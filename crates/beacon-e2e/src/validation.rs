//! Validations against the system agents ship data to
//!
//! The platform being converged is only half the story: a running agent
//! must also produce the documents its configuration implies. Each
//! [`EventValidation`] is a query that must eventually match at least one
//! document.

use async_trait::async_trait;
use beacon_common::Error;

use crate::error::StepError;
use crate::eventually::Eventually;
use crate::step::Step;

/// Count documents matching a query in an external event store
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Number of documents in `index` matching the query-string `query`
    async fn count(&self, index: &str, query: &str) -> Result<u64, Error>;
}

/// Index pattern the given agent type writes to
pub fn index_pattern(agent_type: &str) -> String {
    format!("{}-*", agent_type)
}

/// A query that must eventually match at least one document
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventValidation {
    /// Human-readable description, used in step names
    pub description: String,
    /// Query-string query
    pub query: String,
}

impl EventValidation {
    /// Create a validation from a raw query
    pub fn new(description: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            query: query.into(),
        }
    }

    /// Some event matches the query
    pub fn has_event(query: impl Into<String>) -> Self {
        let query = query.into();
        Self::new(format!("has event {}", query), query)
    }

    /// Some event was shipped by an agent of the given type
    pub fn has_event_from_agent(agent_type: &str) -> Self {
        Self::new(
            format!("has event from {}", agent_type),
            format!("agent.type:{}", agent_type),
        )
    }

    /// Some event was collected from the given pod
    pub fn has_event_from_pod(pod_name: &str) -> Self {
        Self::new(
            format!("has event from pod {}", pod_name),
            format!("kubernetes.pod.name:{}", pod_name),
        )
    }

    /// Some event carries a message containing the given text
    pub fn has_message_containing(message: &str) -> Self {
        Self::new(
            format!("has message containing '{}'", message),
            format!("message:\"{}\"", message.replace('"', "\\\"")),
        )
    }

    /// Step checking this validation against `index`
    pub fn to_step(
        &self,
        events: std::sync::Arc<dyn EventStore>,
        index: String,
        policy: Eventually,
    ) -> Step {
        let query = self.query.clone();
        Step::eventually(
            format!("Event store should eventually pass validation: {}", self.description),
            policy,
            move || {
                let events = events.clone();
                let index = index.clone();
                let query = query.clone();
                async move { check_has_events(events.as_ref(), &index, &query).await }
            },
        )
    }
}

/// Probe: at least one document in `index` matches `query`
pub async fn check_has_events(
    events: &dyn EventStore,
    index: &str,
    query: &str,
) -> Result<(), StepError> {
    let count = events.count(index, query).await?;
    if count == 0 {
        return Err(StepError::pending(format!(
            "no event in {} matches {}",
            index, query
        )));
    }
    Ok(())
}
