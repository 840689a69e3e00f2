//! Stories about agents running with their default or a custom config

use beacon_agent::{FILEBEAT_TYPE, HEARTBEAT_TYPE, METRICBEAT_TYPE};
use beacon_e2e::{AgentBuilder, EventValidation, Sequence, StepList, TestPodBuilder};
use serde_json::json;

use super::helpers::{es_ref, kind_context};

/// Story: filebeat ships the logs of a pod running next to it
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_filebeat_ships_pod_logs() {
    let ctx = kind_context().await;
    let name = "test-fb-default-cfg";

    let test_pod = TestPodBuilder::new(name);
    let filebeat = AgentBuilder::new(name, FILEBEAT_TYPE)
        .with_elasticsearch_ref(es_ref())
        .with_es_validations([
            EventValidation::has_event_from_agent(FILEBEAT_TYPE),
            EventValidation::has_event_from_pod(&test_pod.pod_name()),
            EventValidation::has_message_containing(test_pod.logged()),
        ]);

    Sequence::new(&ctx, None, StepList::new(), &[&filebeat, &test_pod])
        .run_sequential()
        .await;
}

/// Story: metricbeat collects the system metrics of every node
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_metricbeat_collects_system_metrics() {
    let ctx = kind_context().await;
    let name = "test-mb-default-cfg";

    let datasets = [
        "system.cpu",
        "system.load",
        "system.memory",
        "system.network",
        "system.process",
        "system.process.summary",
        "system.fsstat",
    ];
    let metricbeat = AgentBuilder::new(name, METRICBEAT_TYPE)
        .with_elasticsearch_ref(es_ref())
        .with_es_validations([EventValidation::has_event_from_agent(METRICBEAT_TYPE)])
        .with_es_validations(
            datasets
                .iter()
                .map(|d| EventValidation::has_event(format!("event.dataset:{}", d))),
        );

    Sequence::new(&ctx, None, StepList::new(), &[&metricbeat])
        .run_sequential()
        .await;
}

/// Story: heartbeat as a single-replica deployment monitors Elasticsearch
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_heartbeat_monitors_elasticsearch() {
    let ctx = kind_context().await;
    let name = "test-hb-cfg";
    let es = es_ref();
    let es_namespace = es.namespace.clone().unwrap_or_else(|| ctx.config.namespace.clone());

    let heartbeat = AgentBuilder::new(name, HEARTBEAT_TYPE)
        .with_elasticsearch_ref(es.clone())
        .with_deployment(1)
        .with_config(json!({
            "heartbeat.monitors": [{
                "type": "tcp",
                "schedule": "@every 5s",
                "hosts": [format!("{}-es-http.{}.svc:9200", es.name, es_namespace)],
            }]
        }))
        .with_es_validations([
            EventValidation::has_event_from_agent(HEARTBEAT_TYPE),
            EventValidation::has_event("monitor.status:up"),
        ]);

    Sequence::new(&ctx, None, StepList::new(), &[&heartbeat])
        .run_sequential()
        .await;
}
