//! End-to-end verification harness for the Beacon agent operator
//!
//! Tests are written as [`Builder`]s, one per resource under test, whose
//! phases produce named [`Step`]s. A [`Sequence`] flattens the builders'
//! steps in order and runs them one at a time, stopping at the first
//! failure. Steps that observe eventually-consistent state are retried by
//! an [`Eventually`] policy bounded by wall-clock time.
//!
//! Mutation tests (see [`mutation`]) additionally prove that pods were
//! regenerated after a spec change by annotating them with the fingerprint
//! of the previous spec before applying the new one.

#![deny(missing_docs)]

pub mod agent;
pub mod builder;
pub mod config;
pub mod elasticsearch;
pub mod error;
pub mod eventually;
pub mod fake;
pub mod mutation;
pub mod pod;
pub mod sequence;
pub mod step;
pub mod validation;

pub use agent::AgentBuilder;
pub use builder::{check_steps, Builder, TestContext};
pub use config::{E2eConfig, ElasticsearchConfig, TeardownPolicy};
pub use error::StepError;
pub use eventually::Eventually;
pub use pod::TestPodBuilder;
pub use sequence::{Sequence, SequenceFailure, SequenceReport, SequenceState};
pub use step::{Step, StepList};
pub use validation::{EventStore, EventValidation};

use beacon_common::telemetry::{init_telemetry, TelemetryConfig};

/// Install logging for a test binary; later calls are no-ops
pub fn init_test_logging() {
    let _ = init_telemetry(TelemetryConfig {
        service_name: "beacon-e2e".to_string(),
        ..TelemetryConfig::default()
    });
}
