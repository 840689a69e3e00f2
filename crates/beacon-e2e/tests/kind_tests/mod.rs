//! End-to-end tests for the Beacon operator on a real cluster
//!
//! These tests require a Kubernetes cluster (kind) with the Beacon operator
//! running, and an Elasticsearch cluster the agents can ship to.
//!
//! # Test Organization
//!
//! - `agent_config`: each agent type with its default or a custom config
//!   converges and produces the expected events
//! - `agent_mutation`: changing an agent's spec regenerates all its pods
//!
//! # Running These Tests
//!
//! These tests are ignored by default:
//!
//! ```bash
//! export BEACON_E2E_ES_URL=https://localhost:9200
//! export BEACON_E2E_ES_USERNAME=elastic BEACON_E2E_ES_PASSWORD=changeme
//! # name of the Elasticsearch cluster agents reference (default: elasticsearch)
//! export BEACON_E2E_ES_REF=elasticsearch
//!
//! cargo test -p beacon-e2e --test kind -- --ignored --nocapture
//!
//! # keep resources of failed runs around for inspection (default)
//! BEACON_E2E_TEARDOWN=on-success cargo test -p beacon-e2e --test kind -- --ignored
//! ```

mod agent_config;
mod agent_mutation;
mod helpers;
