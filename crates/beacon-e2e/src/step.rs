//! Steps and step lists
//!
//! A [`Step`] is a named, re-invocable action against live cluster state.
//! A [`StepList`] is an ordered sequence of steps; appending one list to
//! another ([`StepList::with_steps`]) is the only way to compose them and
//! never reorders or deduplicates.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::error::StepError;
use crate::eventually::Eventually;

/// Boxed future returned by a step action
pub type StepFuture = BoxFuture<'static, Result<(), StepError>>;

/// Shared, re-invocable step action
pub type StepFn = Arc<dyn Fn() -> StepFuture + Send + Sync>;

/// A named unit of verification
#[derive(Clone)]
pub struct Step {
    name: String,
    action: StepFn,
    retry: Option<Eventually>,
}

impl Step {
    /// Create a step that runs `action` once
    pub fn new<F, Fut>(name: impl Into<String>, action: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), StepError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            action: Arc::new(move || action().boxed()),
            retry: None,
        }
    }

    /// Create a step whose action is retried under `policy`
    pub fn eventually<F, Fut>(name: impl Into<String>, policy: Eventually, action: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), StepError>> + Send + 'static,
    {
        Self::new(name, action).with_retry(policy)
    }

    /// Wrap this step's action in a retry policy
    pub fn with_retry(mut self, policy: Eventually) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Step name, stable across runs
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Retry policy, if any
    pub fn retry(&self) -> Option<Eventually> {
        self.retry
    }

    /// Execute the step, retrying per its policy
    pub async fn run(&self) -> Result<(), StepError> {
        match self.retry {
            Some(policy) => policy.run(&self.name, || (self.action)()).await,
            None => (self.action)().await,
        }
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

/// Ordered list of steps
#[derive(Clone, Debug, Default)]
pub struct StepList(Vec<Step>);

impl StepList {
    /// An empty list
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a single step
    pub fn with_step(mut self, step: Step) -> Self {
        self.0.push(step);
        self
    }

    /// Append every step of `other`, after the steps already here
    pub fn with_steps(mut self, other: StepList) -> Self {
        self.0.extend(other.0);
        self
    }

    /// Names of the steps, in execution order
    pub fn names(&self) -> Vec<&str> {
        self.0.iter().map(Step::name).collect()
    }

    /// Number of steps
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the list has no step
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over the steps in order
    pub fn iter(&self) -> std::slice::Iter<'_, Step> {
        self.0.iter()
    }
}

impl From<Vec<Step>> for StepList {
    fn from(steps: Vec<Step>) -> Self {
        Self(steps)
    }
}

impl FromIterator<Step> for StepList {
    fn from_iter<I: IntoIterator<Item = Step>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for StepList {
    type Item = Step;
    type IntoIter = std::vec::IntoIter<Step>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a StepList {
    type Item = &'a Step;
    type IntoIter = std::slice::Iter<'a, Step>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn named(names: &[&str]) -> StepList {
        names
            .iter()
            .map(|n| Step::new(*n, || async { Ok(()) }))
            .collect()
    }

    #[test]
    fn concatenation_preserves_order() {
        let list = named(&["a", "b"]).with_steps(named(&["c"]));
        assert_eq!(list.names(), vec!["a", "b", "c"]);
    }

    #[test]
    fn concatenation_is_associative() {
        let left = named(&["a1", "a2"])
            .with_steps(named(&["b"]))
            .with_steps(named(&["c1", "c2"]));
        let right = named(&["a1", "a2"]).with_steps(named(&["b"]).with_steps(named(&["c1", "c2"])));
        assert_eq!(left.names(), right.names());
    }

    #[test]
    fn concatenation_keeps_duplicates() {
        let list = named(&["same"]).with_steps(named(&["same"]));
        assert_eq!(list.names(), vec!["same", "same"]);
        assert!(StepList::new().with_steps(StepList::new()).is_empty());
    }

    #[tokio::test]
    async fn building_a_list_runs_nothing() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let list = StepList::new().with_step(Step::new("count", move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        for step in &list {
            step.run().await.unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retried_step_absorbs_pending_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let step = Step::eventually(
            "flaky",
            Eventually::new(Duration::from_secs(10), Duration::from_millis(100)),
            move || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 3 {
                        Err(StepError::pending("not yet"))
                    } else {
                        Ok(())
                    }
                }
            },
        );
        assert_eq!(step.run().await, Ok(()));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn unretried_step_fails_on_first_error() {
        let step = Step::new("once", || async { Err(StepError::pending("not yet")) });
        assert_eq!(step.run().await, Err(StepError::pending("not yet")));
        assert!(step.retry().is_none());
    }
}
