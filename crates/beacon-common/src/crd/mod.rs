//! Custom Resource Definitions for Beacon

mod agent;

pub use agent::{
    agent_pod_labels, agent_pod_selector, Agent, AgentHealth, AgentSpec, AgentStatus,
    DaemonSetSpec, DeploymentSpec, ObjectRef,
};
