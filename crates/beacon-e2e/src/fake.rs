//! In-memory cluster for exercising the harness without a real API server
//!
//! [`FakeCluster`] behaves like the parts of a cluster the harness depends
//! on:
//!
//! - pod reads go through a cache that shows a write only after a number of
//!   store calls (configurable globally and per pod);
//! - updates carry resource versions and fail with a conflict when stale;
//! - conflicts can be injected, each one simulating a concurrent writer
//!   that bumps the object's version;
//! - a reconciler runs some store calls after an agent changes, and
//!   replaces every pod whose config-hash does not match the agent's
//!   current spec.
//!
//! Every store call advances the simulated clock by one tick.

use std::collections::BTreeMap;

use async_trait::async_trait;
use beacon_agent::{build_pod_template, with_defaults};
use beacon_common::crd::{Agent, AgentHealth, AgentStatus};
use beacon_common::hash::deterministic_hash;
use beacon_common::kube_utils::{annotation, ObjectStore, CONDITION_READY, STATUS_TRUE};
use beacon_common::{Error, CONFIG_HASH_ANNOTATION, LABEL_AGENT_NAME};
use k8s_openapi::api::core::v1::{Pod, PodCondition, PodStatus};
use kube::ResourceExt;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::validation::EventStore;

type Key = (String, String);

const POD_PHASE_RUNNING: &str = "Running";

/// Counters describing what the fake was asked to do
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FakeStats {
    /// Calls to `update_pod`
    pub pod_update_attempts: u32,
    /// Pod updates rejected with a conflict
    pub pod_conflicts_served: u32,
    /// Calls to `update_agent`
    pub agent_update_attempts: u32,
    /// Agent updates rejected with a conflict
    pub agent_conflicts_served: u32,
    /// Reconciler runs
    pub reconciles: u32,
}

#[derive(Debug, Default)]
struct CachedPod {
    visible: Option<Pod>,
    pending: Option<PendingWrite>,
}

#[derive(Debug)]
struct PendingWrite {
    calls_left: u32,
    pod: Option<Pod>,
}

#[derive(Debug, Default)]
struct State {
    nodes: i32,
    reconcile_delay: u32,
    pod_cache_lag: u32,
    lag_overrides: BTreeMap<Key, u32>,

    next_resource_version: u64,
    next_pod_id: u64,

    pods: BTreeMap<Key, Pod>,
    cache: BTreeMap<Key, CachedPod>,
    agents: BTreeMap<Key, Agent>,
    reconcile_queue: BTreeMap<Key, u32>,

    pod_conflicts: u32,
    agent_conflicts: u32,
    stats: FakeStats,
}

/// In-memory [`ObjectStore`] with a lagging pod cache and a reconciler
#[derive(Debug)]
pub struct FakeCluster {
    state: Mutex<State>,
}

impl Default for FakeCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeCluster {
    /// One node, reconciles on the next call after a change, no cache lag
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                nodes: 1,
                reconcile_delay: 1,
                ..Default::default()
            }),
        }
    }

    /// Number of nodes, i.e. pods of a DaemonSet agent
    pub fn with_nodes(self, nodes: i32) -> Self {
        self.state.lock().nodes = nodes;
        self
    }

    /// Store calls between an agent change and the reconcile
    pub fn with_reconcile_delay(self, calls: u32) -> Self {
        self.state.lock().reconcile_delay = calls;
        self
    }

    /// Store calls before any pod write shows up in reads
    pub fn with_pod_cache_lag(self, calls: u32) -> Self {
        self.state.lock().pod_cache_lag = calls;
        self
    }

    /// Store calls before writes to this particular pod show up in reads
    pub fn set_pod_lag(&self, namespace: &str, name: &str, calls: u32) {
        self.state
            .lock()
            .lag_overrides
            .insert(key(namespace, name), calls);
    }

    /// Reject the next `n` pod updates as if someone else wrote first
    pub fn inject_pod_conflicts(&self, n: u32) {
        self.state.lock().pod_conflicts += n;
    }

    /// Reject the next `n` agent updates as if someone else wrote first
    pub fn inject_agent_conflicts(&self, n: u32) {
        self.state.lock().agent_conflicts += n;
    }

    /// What happened so far
    pub fn stats(&self) -> FakeStats {
        self.state.lock().stats
    }

    /// Authoritative pods of an agent, bypassing the cache
    pub fn agent_pods(&self, namespace: &str, agent_name: &str) -> Vec<Pod> {
        let selector = format!("{}={}", LABEL_AGENT_NAME, agent_name);
        self.state
            .lock()
            .pods
            .iter()
            .filter(|((ns, _), pod)| ns == namespace && matches_selector(pod, &selector))
            .map(|(_, pod)| pod.clone())
            .collect()
    }

    /// Run any pending reconcile now
    pub fn reconcile_now(&self) {
        let mut state = self.state.lock();
        let queued: Vec<Key> = state.reconcile_queue.keys().cloned().collect();
        for k in queued {
            state.reconcile_queue.remove(&k);
            state.reconcile(&k);
        }
        state.flush_cache();
    }
}

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

fn object_key<K: ResourceExt>(obj: &K) -> Key {
    key(&obj.namespace().unwrap_or_default(), &obj.name_any())
}

/// Equality-only label selector (`a=b,c=d`); empty matches everything
fn matches_selector(pod: &Pod, selector: &str) -> bool {
    let labels = pod.labels();
    selector
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((k, v)) => labels.get(k.trim()).map(String::as_str) == Some(v.trim()),
            None => labels.contains_key(term),
        })
}

fn running_status() -> PodStatus {
    PodStatus {
        phase: Some(POD_PHASE_RUNNING.to_string()),
        conditions: Some(vec![PodCondition {
            type_: CONDITION_READY.to_string(),
            status: STATUS_TRUE.to_string(),
            ..Default::default()
        }]),
        ..Default::default()
    }
}

impl State {
    fn bump(&mut self) -> String {
        self.next_resource_version += 1;
        self.next_resource_version.to_string()
    }

    /// One store call elapsed
    fn tick(&mut self) {
        let mut due = Vec::new();
        for (k, calls_left) in self.reconcile_queue.iter_mut() {
            *calls_left = calls_left.saturating_sub(1);
            if *calls_left == 0 {
                due.push(k.clone());
            }
        }
        for k in due {
            self.reconcile_queue.remove(&k);
            self.reconcile(&k);
        }

        for entry in self.cache.values_mut() {
            if let Some(pending) = &mut entry.pending {
                pending.calls_left = pending.calls_left.saturating_sub(1);
                if pending.calls_left == 0 {
                    if let Some(pending) = entry.pending.take() {
                        entry.visible = pending.pod;
                    }
                }
            }
        }
        self.cache
            .retain(|_, e| e.visible.is_some() || e.pending.is_some());
    }

    fn flush_cache(&mut self) {
        for entry in self.cache.values_mut() {
            if let Some(pending) = entry.pending.take() {
                entry.visible = pending.pod;
            }
        }
        self.cache
            .retain(|_, e| e.visible.is_some() || e.pending.is_some());
    }

    /// Record an authoritative pod write (or deletion) on the read path
    fn write_pod(&mut self, k: &Key, pod: Option<Pod>) {
        match &pod {
            Some(p) => {
                self.pods.insert(k.clone(), p.clone());
            }
            None => {
                self.pods.remove(k);
            }
        }
        let lag = self
            .lag_overrides
            .get(k)
            .copied()
            .unwrap_or(self.pod_cache_lag);
        let entry = self.cache.entry(k.clone()).or_default();
        if lag == 0 {
            entry.visible = pod;
            entry.pending = None;
        } else {
            entry.pending = Some(PendingWrite {
                calls_left: lag,
                pod,
            });
        }
    }

    fn schedule_reconcile(&mut self, k: &Key) {
        if self.reconcile_delay == 0 {
            self.reconcile(k);
        } else {
            self.reconcile_queue.insert(k.clone(), self.reconcile_delay);
        }
    }

    /// Drive the agent's pods towards its current spec
    fn reconcile(&mut self, k: &Key) {
        self.stats.reconciles += 1;
        let (namespace, name) = k;
        let selector = format!("{}={}", LABEL_AGENT_NAME, name);
        let owned: Vec<Key> = self
            .pods
            .iter()
            .filter(|((ns, _), pod)| ns == namespace && matches_selector(pod, &selector))
            .map(|(pk, _)| pk.clone())
            .collect();

        let Some(agent) = self.agents.get(k).map(with_defaults) else {
            debug!(agent = %name, pods = owned.len(), "agent gone, removing its pods");
            for pk in owned {
                self.write_pod(&pk, None);
            }
            return;
        };

        let template = match build_pod_template(&agent) {
            Ok(t) => t,
            Err(e) => {
                warn!(agent = %name, error = %e, "cannot build pod template");
                return;
            }
        };
        let desired_hash = template
            .metadata
            .as_ref()
            .and_then(|m| m.annotations.as_ref())
            .and_then(|a| a.get(CONFIG_HASH_ANNOTATION))
            .cloned()
            .unwrap_or_default();
        let desired = match &agent.spec.deployment {
            Some(d) => d.replicas.unwrap_or(1),
            None => self.nodes,
        };

        let mut kept = 0;
        for pk in owned {
            let current = self
                .pods
                .get(&pk)
                .and_then(|p| annotation(p, CONFIG_HASH_ANNOTATION).map(str::to_string));
            if current.as_deref() == Some(desired_hash.as_str()) && kept < desired {
                kept += 1;
            } else {
                debug!(pod = %pk.1, "replacing outdated pod");
                self.write_pod(&pk, None);
            }
        }

        for _ in kept..desired {
            self.next_pod_id += 1;
            let suffix = deterministic_hash(&format!("{}/{}/{}", namespace, name, self.next_pod_id));
            let pod_name = format!("{}-{}", name, &suffix[..5]);
            let mut metadata = template.metadata.clone().unwrap_or_default();
            metadata.name = Some(pod_name.clone());
            metadata.namespace = Some(namespace.clone());
            metadata.resource_version = Some(self.bump());
            let pod = Pod {
                metadata,
                spec: template.spec.clone(),
                status: Some(running_status()),
            };
            debug!(pod = %pod_name, config_hash = %desired_hash, "created pod");
            self.write_pod(&key(namespace, &pod_name), Some(pod));
        }

        let status = AgentStatus {
            expected_nodes: desired,
            available_nodes: desired,
            health: Some(AgentHealth::from_counts(desired, desired)),
        };
        let rv = self.bump();
        if let Some(stored) = self.agents.get_mut(k) {
            if stored.status.as_ref() != Some(&status) {
                stored.status = Some(status);
                stored.metadata.resource_version = Some(rv);
            }
        }
    }
}

#[async_trait]
impl ObjectStore for FakeCluster {
    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>, Error> {
        let mut state = self.state.lock();
        state.tick();
        Ok(state
            .cache
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .filter_map(|(_, entry)| entry.visible.as_ref())
            .filter(|pod| matches_selector(pod, label_selector))
            .cloned()
            .collect())
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, Error> {
        let mut state = self.state.lock();
        state.tick();
        state
            .cache
            .get(&key(namespace, name))
            .and_then(|e| e.visible.clone())
            .ok_or_else(|| Error::not_found("Pod", format!("{}/{}", namespace, name)))
    }

    async fn create_pod(&self, pod: &Pod) -> Result<Pod, Error> {
        let mut state = self.state.lock();
        state.tick();
        let k = object_key(pod);
        if state.pods.contains_key(&k) {
            return Err(Error::conflict("Pod", format!("{}/{}", k.0, k.1)));
        }
        let mut created = pod.clone();
        created.metadata.resource_version = Some(state.bump());
        created.status = Some(running_status());
        state.write_pod(&k, Some(created.clone()));
        Ok(created)
    }

    async fn update_pod(&self, pod: &Pod) -> Result<Pod, Error> {
        let mut state = self.state.lock();
        state.tick();
        state.stats.pod_update_attempts += 1;
        let k = object_key(pod);
        let name = format!("{}/{}", k.0, k.1);
        let Some(stored) = state.pods.get(&k).cloned() else {
            return Err(Error::not_found("Pod", name));
        };

        if state.pod_conflicts > 0 {
            state.pod_conflicts -= 1;
            state.stats.pod_conflicts_served += 1;
            let mut concurrent = stored;
            concurrent.metadata.resource_version = Some(state.bump());
            state.write_pod(&k, Some(concurrent));
            return Err(Error::conflict("Pod", name));
        }
        if pod.metadata.resource_version != stored.metadata.resource_version {
            state.stats.pod_conflicts_served += 1;
            return Err(Error::conflict("Pod", name));
        }

        let mut updated = pod.clone();
        updated.metadata.resource_version = Some(state.bump());
        state.write_pod(&k, Some(updated.clone()));
        Ok(updated)
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), Error> {
        let mut state = self.state.lock();
        state.tick();
        let k = key(namespace, name);
        if !state.pods.contains_key(&k) {
            return Err(Error::not_found("Pod", format!("{}/{}", namespace, name)));
        }
        state.write_pod(&k, None);
        Ok(())
    }

    async fn get_agent(&self, namespace: &str, name: &str) -> Result<Agent, Error> {
        let mut state = self.state.lock();
        state.tick();
        state
            .agents
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| Error::not_found("Agent", format!("{}/{}", namespace, name)))
    }

    async fn create_agent(&self, agent: &Agent) -> Result<Agent, Error> {
        let mut state = self.state.lock();
        state.tick();
        let k = object_key(agent);
        if state.agents.contains_key(&k) {
            return Err(Error::conflict("Agent", format!("{}/{}", k.0, k.1)));
        }
        let mut created = agent.clone();
        created.metadata.resource_version = Some(state.bump());
        created.metadata.generation = Some(1);
        created.status = None;
        state.agents.insert(k.clone(), created.clone());
        state.schedule_reconcile(&k);
        Ok(created)
    }

    async fn update_agent(&self, agent: &Agent) -> Result<Agent, Error> {
        let mut state = self.state.lock();
        state.tick();
        state.stats.agent_update_attempts += 1;
        let k = object_key(agent);
        let name = format!("{}/{}", k.0, k.1);
        let Some(stored) = state.agents.get(&k).cloned() else {
            return Err(Error::not_found("Agent", name));
        };

        if state.agent_conflicts > 0 {
            state.agent_conflicts -= 1;
            state.stats.agent_conflicts_served += 1;
            let rv = state.bump();
            if let Some(stored) = state.agents.get_mut(&k) {
                stored.metadata.resource_version = Some(rv);
            }
            return Err(Error::conflict("Agent", name));
        }
        if agent.metadata.resource_version != stored.metadata.resource_version {
            state.stats.agent_conflicts_served += 1;
            return Err(Error::conflict("Agent", name));
        }

        let spec_changed = agent.spec != stored.spec;
        let mut updated = agent.clone();
        updated.status = stored.status.clone();
        updated.metadata.resource_version = Some(state.bump());
        updated.metadata.generation =
            Some(stored.metadata.generation.unwrap_or(1) + i64::from(spec_changed));
        state.agents.insert(k.clone(), updated.clone());
        if spec_changed {
            state.schedule_reconcile(&k);
        }
        Ok(updated)
    }

    async fn delete_agent(&self, namespace: &str, name: &str) -> Result<(), Error> {
        let mut state = self.state.lock();
        state.tick();
        let k = key(namespace, name);
        if state.agents.remove(&k).is_none() {
            return Err(Error::not_found("Agent", format!("{}/{}", namespace, name)));
        }
        state.schedule_reconcile(&k);
        Ok(())
    }
}

/// In-memory [`EventStore`] answering `field:value` and `field:"text"`
/// queries against ingested JSON documents
#[derive(Debug, Default)]
pub struct FakeEvents {
    documents: Mutex<Vec<(String, Value)>>,
}

impl FakeEvents {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a document in `index`
    pub fn ingest(&self, index: &str, document: Value) {
        self.documents.lock().push((index.to_string(), document));
    }
}

fn index_matches(pattern: &str, index: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => index.starts_with(prefix),
        None => pattern == index,
    }
}

fn field<'a>(document: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(document, |v, segment| v.get(segment))
}

fn document_matches(document: &Value, query: &str) -> bool {
    let Some((path, expected)) = query.split_once(':') else {
        return false;
    };
    let Some(actual) = field(document, path) else {
        return false;
    };
    let actual = match actual {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    match expected
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
    {
        Some(phrase) => actual.contains(&phrase.replace("\\\"", "\"")),
        None => actual == expected,
    }
}

#[async_trait]
impl EventStore for FakeEvents {
    async fn count(&self, index: &str, query: &str) -> Result<u64, Error> {
        Ok(self
            .documents
            .lock()
            .iter()
            .filter(|(i, doc)| index_matches(index, i) && document_matches(doc, query))
            .count() as u64)
    }
}
