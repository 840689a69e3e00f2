//! Stories about changing a running agent

use beacon_agent::METRICBEAT_TYPE;
use beacon_e2e::{AgentBuilder, EventValidation, Sequence};

use super::helpers::{es_ref, kind_context};

/// Story: upgrading metricbeat replaces every pod
///
/// Pods are marked with the fingerprint of the original spec before the
/// version is bumped; the run passes once no marked pod is left and the
/// new pods ship events.
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_metricbeat_version_upgrade_regenerates_pods() {
    let ctx = kind_context().await;
    let name = "test-mb-mutation";

    let initial = AgentBuilder::new(name, METRICBEAT_TYPE)
        .with_version("8.14.3")
        .with_elasticsearch_ref(es_ref())
        .with_es_validations([EventValidation::has_event_from_agent(METRICBEAT_TYPE)]);
    let upgraded = initial
        .clone()
        .with_version("8.15.0")
        .with_mutated_from(&initial);

    Sequence::mutations(&ctx, &[&initial], &[&upgraded])
        .run_sequential()
        .await;
}

/// Story: switching metricbeat from a DaemonSet to a Deployment
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_metricbeat_moves_to_a_deployment() {
    let ctx = kind_context().await;
    let name = "test-mb-to-deployment";

    let initial = AgentBuilder::new(name, METRICBEAT_TYPE).with_elasticsearch_ref(es_ref());
    let deployed = initial
        .clone()
        .with_deployment(2)
        .with_mutated_from(&initial);

    Sequence::mutations(&ctx, &[&initial], &[&deployed])
        .run_sequential()
        .await;
}
