//! Sequences: flattening builders' step lists and running them in order
//!
//! A sequence runs on a single task, one step at a time: later steps assume
//! the world state established by earlier ones. The first failing step ends
//! the run (fail-fast). Teardown steps are kept apart and run afterwards
//! according to the [`TeardownPolicy`].

use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::builder::{check_steps, Builder, TestContext};
use crate::config::TeardownPolicy;
use crate::error::StepError;
use crate::step::{Step, StepList};

/// Lifecycle of a sequence run
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SequenceState {
    /// Built, not started
    Initial,
    /// Executing steps
    Running,
    /// Every step succeeded
    Completed,
    /// A step failed
    Failed,
}

/// Which list a step came from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepPhase {
    /// Main verification steps
    Main,
    /// Cleanup steps
    Teardown,
}

/// Result of executing one step
#[derive(Clone, Debug)]
pub struct StepReport {
    /// Step name
    pub name: String,
    /// List the step belongs to
    pub phase: StepPhase,
    /// Time spent in the step, retries included
    pub elapsed: Duration,
    /// Outcome
    pub result: Result<(), StepError>,
}

impl StepReport {
    /// Whether the step succeeded
    pub fn passed(&self) -> bool {
        self.result.is_ok()
    }
}

/// Everything that happened during a run
#[derive(Clone, Debug)]
pub struct SequenceReport {
    /// Executed steps, in execution order
    pub steps: Vec<StepReport>,
    /// Final state
    pub state: SequenceState,
}

impl SequenceReport {
    /// Names of the executed steps, in execution order
    pub fn executed(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name.as_str()).collect()
    }

    /// The first step that failed
    pub fn first_failure(&self) -> Option<&StepReport> {
        self.steps.iter().find(|s| !s.passed())
    }
}

/// A failed run: the first failing step and why
#[derive(Debug, Error)]
#[error("step '{step}' failed: {error}")]
pub struct SequenceFailure {
    /// Name of the first failing step
    pub step: String,
    /// Its diagnostic
    pub error: StepError,
    /// Full report of the run
    pub report: SequenceReport,
}

/// Ordered steps for one test, executed once
#[derive(Debug)]
pub struct Sequence {
    steps: StepList,
    teardown: StepList,
    teardown_policy: TeardownPolicy,
    state: SequenceState,
}

impl Sequence {
    /// A sequence running exactly `steps`, with no teardown
    pub fn from_steps(steps: StepList) -> Self {
        Self {
            steps,
            teardown: StepList::new(),
            teardown_policy: TeardownPolicy::default(),
            state: SequenceState::Initial,
        }
    }

    /// Creation and verification of `builders`, in argument order.
    ///
    /// Runs `before`, then every builder's init steps, then every builder's
    /// creation steps, then every builder's checks, then `after`. Deletion
    /// steps make up the teardown, governed by the context's policy.
    pub fn new(
        ctx: &TestContext,
        before: Option<StepList>,
        after: StepList,
        builders: &[&dyn Builder],
    ) -> Self {
        let mut steps = before.unwrap_or_default();
        for b in builders {
            steps = steps.with_steps(b.init_steps(ctx));
        }
        for b in builders {
            steps = steps.with_steps(b.creation_steps(ctx));
        }
        for b in builders {
            steps = steps.with_steps(check_steps(*b, ctx));
        }
        steps = steps.with_steps(after);

        Self::from_steps(steps)
            .with_teardown(deletion_steps(builders, ctx))
            .with_teardown_policy(ctx.config.teardown)
    }

    /// Create and check `creation_builders`, then apply each of
    /// `mutation_builders` as a mutation and check convergence.
    ///
    /// Teardown deletes what the mutation builders describe, which are the
    /// same resources the creation builders created.
    pub fn mutations(
        ctx: &TestContext,
        creation_builders: &[&dyn Builder],
        mutation_builders: &[&dyn Builder],
    ) -> Self {
        let mut steps = StepList::new();
        for b in creation_builders {
            steps = steps.with_steps(b.init_steps(ctx));
        }
        for b in creation_builders {
            steps = steps.with_steps(b.creation_steps(ctx));
        }
        for b in creation_builders {
            steps = steps.with_steps(check_steps(*b, ctx));
        }
        for b in mutation_builders {
            steps = steps.with_steps(b.mutation_steps(ctx));
        }

        Self::from_steps(steps)
            .with_teardown(deletion_steps(mutation_builders, ctx))
            .with_teardown_policy(ctx.config.teardown)
    }

    /// Replace the teardown steps
    pub fn with_teardown(mut self, teardown: StepList) -> Self {
        self.teardown = teardown;
        self
    }

    /// Replace the teardown policy
    pub fn with_teardown_policy(mut self, policy: TeardownPolicy) -> Self {
        self.teardown_policy = policy;
        self
    }

    /// Main steps, in execution order
    pub fn steps(&self) -> &StepList {
        &self.steps
    }

    /// Teardown steps, in execution order
    pub fn teardown_steps(&self) -> &StepList {
        &self.teardown
    }

    /// Current state
    pub fn state(&self) -> SequenceState {
        self.state
    }

    /// Run the main steps fail-fast, then teardown per policy.
    ///
    /// # Panics
    ///
    /// Panics when a step reports [`StepError::Misconfigured`]: the harness
    /// was wired up wrong and no pass/fail verdict would be meaningful.
    pub async fn run(mut self) -> Result<SequenceReport, SequenceFailure> {
        self.state = SequenceState::Running;
        let total = self.steps.len();
        let mut reports = Vec::with_capacity(total + self.teardown.len());

        for (index, step) in self.steps.iter().enumerate() {
            info!(step = %step.name(), index = index + 1, total, "running step");
            let report = execute(step, StepPhase::Main).await;
            let failed = !report.passed();
            reports.push(report);
            if failed {
                self.state = SequenceState::Failed;
                break;
            }
        }

        let main_succeeded = self.state == SequenceState::Running;
        if self.teardown_policy.should_run(main_succeeded) {
            for step in &self.teardown {
                info!(step = %step.name(), "running teardown step");
                reports.push(execute(step, StepPhase::Teardown).await);
            }
        } else if !self.teardown.is_empty() {
            warn!(
                policy = ?self.teardown_policy,
                steps = self.teardown.len(),
                "skipping teardown, resources are left in place"
            );
        }

        let report = SequenceReport {
            state: if reports.iter().all(StepReport::passed) {
                SequenceState::Completed
            } else {
                SequenceState::Failed
            },
            steps: reports,
        };

        match report.first_failure() {
            None => {
                info!(steps = report.steps.len(), "sequence completed");
                Ok(report)
            }
            Some(failed) => Err(SequenceFailure {
                step: failed.name.clone(),
                error: failed.result.clone().err().unwrap_or_else(|| {
                    StepError::failed("step reported failure without a diagnostic")
                }),
                report,
            }),
        }
    }

    /// Run and panic on failure, for use as the body of a test
    pub async fn run_sequential(self) -> SequenceReport {
        match self.run().await {
            Ok(report) => report,
            Err(failure) => panic!("{}", failure),
        }
    }
}

fn deletion_steps(builders: &[&dyn Builder], ctx: &TestContext) -> StepList {
    builders
        .iter()
        .fold(StepList::new(), |steps, b| steps.with_steps(b.deletion_steps(ctx)))
}

async fn execute(step: &Step, phase: StepPhase) -> StepReport {
    let start = Instant::now();
    let result = step.run().await;
    let elapsed = start.elapsed();

    match &result {
        Ok(()) => info!(step = %step.name(), elapsed = ?elapsed, "step passed"),
        Err(StepError::Misconfigured(msg)) => {
            panic!("step '{}' is misconfigured: {}", step.name(), msg)
        }
        Err(e) => error!(step = %step.name(), elapsed = ?elapsed, error = %e, "step failed"),
    }

    StepReport {
        name: step.name().to_string(),
        phase,
        elapsed,
        result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use parking_lot::Mutex;

    type Log = Arc<Mutex<Vec<String>>>;

    fn recording(log: &Log, name: &str, result: Result<(), StepError>) -> Step {
        let log = log.clone();
        let recorded = name.to_string();
        Step::new(name, move || {
            let log = log.clone();
            let recorded = recorded.clone();
            let result = result.clone();
            async move {
                log.lock().push(recorded);
                result
            }
        })
    }

    #[tokio::test]
    async fn all_passing_steps_complete_in_order() {
        let log = Log::default();
        let sequence = Sequence::from_steps(StepList::from(vec![
            recording(&log, "S1", Ok(())),
            recording(&log, "S2", Ok(())),
            recording(&log, "S3", Ok(())),
        ]));
        assert_eq!(sequence.state(), SequenceState::Initial);

        let report = sequence.run().await.unwrap();
        assert_eq!(report.state, SequenceState::Completed);
        assert_eq!(report.executed(), vec!["S1", "S2", "S3"]);
        assert_eq!(*log.lock(), vec!["S1", "S2", "S3"]);
    }

    #[tokio::test]
    async fn first_failure_stops_the_run() {
        let log = Log::default();
        let sequence = Sequence::from_steps(StepList::from(vec![
            recording(&log, "S1", Ok(())),
            recording(&log, "S2", Err(StepError::failed("replicas mismatch"))),
            recording(&log, "S3", Ok(())),
        ]));

        let failure = sequence.run().await.unwrap_err();
        assert_eq!(failure.step, "S2");
        assert_eq!(failure.error, StepError::failed("replicas mismatch"));
        assert_eq!(failure.report.state, SequenceState::Failed);
        assert_eq!(failure.report.executed(), vec!["S1", "S2"]);
        assert_eq!(*log.lock(), vec!["S1", "S2"]);
        assert_eq!(failure.to_string(), "step 'S2' failed: replicas mismatch");
    }

    #[tokio::test]
    async fn teardown_runs_after_success_by_default() {
        let log = Log::default();
        let report = Sequence::from_steps(StepList::from(vec![recording(&log, "main", Ok(()))]))
            .with_teardown(StepList::from(vec![recording(&log, "cleanup", Ok(()))]))
            .run()
            .await
            .unwrap();
        assert_eq!(report.executed(), vec!["main", "cleanup"]);
        assert_eq!(report.steps[1].phase, StepPhase::Teardown);
    }

    #[tokio::test]
    async fn failed_run_keeps_state_for_post_mortem_by_default() {
        let log = Log::default();
        let failure = Sequence::from_steps(StepList::from(vec![recording(
            &log,
            "main",
            Err(StepError::failed("boom")),
        )]))
        .with_teardown(StepList::from(vec![recording(&log, "cleanup", Ok(()))]))
        .run()
        .await
        .unwrap_err();
        assert_eq!(failure.step, "main");
        assert_eq!(*log.lock(), vec!["main"]);
    }

    #[tokio::test]
    async fn always_policy_cleans_up_after_failure_and_reports_the_main_failure() {
        let log = Log::default();
        let failure = Sequence::from_steps(StepList::from(vec![recording(
            &log,
            "main",
            Err(StepError::failed("boom")),
        )]))
        .with_teardown(StepList::from(vec![
            recording(&log, "cleanup-1", Err(StepError::failed("still there"))),
            recording(&log, "cleanup-2", Ok(())),
        ]))
        .with_teardown_policy(TeardownPolicy::Always)
        .run()
        .await
        .unwrap_err();
        assert_eq!(failure.step, "main");
        assert_eq!(*log.lock(), vec!["main", "cleanup-1", "cleanup-2"]);
    }

    #[tokio::test]
    async fn failing_teardown_fails_a_successful_run() {
        let log = Log::default();
        let failure = Sequence::from_steps(StepList::from(vec![recording(&log, "main", Ok(()))]))
            .with_teardown(StepList::from(vec![recording(
                &log,
                "cleanup",
                Err(StepError::failed("finalizer stuck")),
            )]))
            .run()
            .await
            .unwrap_err();
        assert_eq!(failure.step, "cleanup");
        assert_eq!(failure.report.state, SequenceState::Failed);
    }

    #[tokio::test]
    async fn never_policy_skips_teardown() {
        let log = Log::default();
        Sequence::from_steps(StepList::from(vec![recording(&log, "main", Ok(()))]))
            .with_teardown(StepList::from(vec![recording(&log, "cleanup", Ok(()))]))
            .with_teardown_policy(TeardownPolicy::Never)
            .run()
            .await
            .unwrap();
        assert_eq!(*log.lock(), vec!["main"]);
    }

    #[tokio::test]
    #[should_panic(expected = "step 'wired wrong' is misconfigured: missing lineage")]
    async fn misconfigured_step_panics() {
        let log = Log::default();
        let _ = Sequence::from_steps(StepList::from(vec![
            recording(&log, "wired wrong", Err(StepError::misconfigured("missing lineage"))),
            recording(&log, "never runs", Ok(())),
        ]))
        .run()
        .await;
    }

    #[tokio::test]
    #[should_panic(expected = "step 'S1' failed: nope")]
    async fn run_sequential_panics_with_the_diagnostic() {
        let log = Log::default();
        Sequence::from_steps(StepList::from(vec![recording(
            &log,
            "S1",
            Err(StepError::failed("nope")),
        )]))
        .run_sequential()
        .await;
    }
}
