//! Harness configuration
//!
//! Loaded from environment variables so CI can tune timeouts and teardown
//! without code changes:
//!
//! ```bash
//! BEACON_E2E_NAMESPACE=e2e-mb
//! BEACON_E2E_TIMEOUT_SECS=600
//! BEACON_E2E_POLL_INTERVAL_MS=500
//! BEACON_E2E_TEARDOWN=never          # always | on-success | never
//! BEACON_E2E_BUILDER_HASH_ANNOTATION=beacon.dev/builder-hash
//! BEACON_E2E_RETRY_MUTATION_CONFLICTS=true
//! BEACON_E2E_ES_URL=https://localhost:9200
//! ```

use std::str::FromStr;
use std::time::Duration;

use beacon_common::{Error, BUILDER_HASH_ANNOTATION};

use crate::eventually::Eventually;

/// Namespace test resources are created in by default
pub const DEFAULT_NAMESPACE: &str = "e2e";
/// Default budget of every retried step
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);
/// Default delay between two attempts of a retried step
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// What to do with the teardown steps once the main steps have run
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TeardownPolicy {
    /// Clean up whatever the outcome
    Always,
    /// Clean up only after success; keep state for post-mortem otherwise
    #[default]
    OnSuccess,
    /// Never clean up
    Never,
}

impl TeardownPolicy {
    /// Whether teardown runs given the outcome of the main steps
    pub fn should_run(&self, main_succeeded: bool) -> bool {
        match self {
            TeardownPolicy::Always => true,
            TeardownPolicy::OnSuccess => main_succeeded,
            TeardownPolicy::Never => false,
        }
    }
}

impl FromStr for TeardownPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "always" => Ok(TeardownPolicy::Always),
            "on-success" | "onsuccess" => Ok(TeardownPolicy::OnSuccess),
            "never" => Ok(TeardownPolicy::Never),
            other => Err(Error::validation_for_field(
                "BEACON_E2E_TEARDOWN",
                format!("unknown teardown policy '{}'", other),
            )),
        }
    }
}

/// Settings shared by every builder and step of a run
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct E2eConfig {
    /// Namespace test resources are created in
    pub namespace: String,
    /// Budget of every retried step
    pub timeout: Duration,
    /// Delay between two attempts of a retried step
    pub poll_interval: Duration,
    /// When teardown steps run
    pub teardown: TeardownPolicy,
    /// Annotation key the annotate phase writes and the validation phase reads
    pub builder_hash_annotation: String,
    /// Retry the read-modify-write of a mutation on conflict
    pub retry_mutation_conflicts: bool,
}

impl Default for E2eConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            timeout: DEFAULT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            teardown: TeardownPolicy::default(),
            builder_hash_annotation: BUILDER_HASH_ANNOTATION.to_string(),
            retry_mutation_conflicts: true,
        }
    }
}

impl E2eConfig {
    /// Load from the process environment
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup; unset keys keep their defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(ns) = lookup("BEACON_E2E_NAMESPACE") {
            config.namespace = ns;
        }
        if let Some(secs) = lookup("BEACON_E2E_TIMEOUT_SECS") {
            config.timeout = Duration::from_secs(parse_number("BEACON_E2E_TIMEOUT_SECS", &secs)?);
        }
        if let Some(ms) = lookup("BEACON_E2E_POLL_INTERVAL_MS") {
            config.poll_interval =
                Duration::from_millis(parse_number("BEACON_E2E_POLL_INTERVAL_MS", &ms)?);
        }
        if let Some(policy) = lookup("BEACON_E2E_TEARDOWN") {
            config.teardown = policy.parse()?;
        }
        if let Some(key) = lookup("BEACON_E2E_BUILDER_HASH_ANNOTATION") {
            config.builder_hash_annotation = key;
        }
        if let Some(flag) = lookup("BEACON_E2E_RETRY_MUTATION_CONFLICTS") {
            config.retry_mutation_conflicts = parse_bool("BEACON_E2E_RETRY_MUTATION_CONFLICTS", &flag)?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make retries unbounded or meaningless
    pub fn validate(&self) -> Result<(), Error> {
        if self.timeout.is_zero() {
            return Err(Error::validation_for_field("timeout", "timeout must be positive"));
        }
        if self.poll_interval.is_zero() {
            return Err(Error::validation_for_field(
                "poll_interval",
                "poll interval must be positive",
            ));
        }
        if self.builder_hash_annotation.is_empty() {
            return Err(Error::validation_for_field(
                "builder_hash_annotation",
                "annotation key must not be empty",
            ));
        }
        Ok(())
    }

    /// Retry policy every retried step inherits
    pub fn eventually(&self) -> Eventually {
        Eventually::new(self.timeout, self.poll_interval)
    }
}

/// Connection settings for the Elasticsearch cluster agents ship to
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ElasticsearchConfig {
    /// Base URL (e.g. `https://localhost:9200`)
    pub url: String,
    /// Basic auth user
    pub username: Option<String>,
    /// Basic auth password
    pub password: Option<String>,
}

impl ElasticsearchConfig {
    /// Load from the process environment; `None` when no URL is configured
    pub fn from_env() -> Option<Self> {
        Some(Self {
            url: std::env::var("BEACON_E2E_ES_URL").ok()?,
            username: std::env::var("BEACON_E2E_ES_USERNAME").ok(),
            password: std::env::var("BEACON_E2E_ES_PASSWORD").ok(),
        })
    }
}

fn parse_number(key: &str, value: &str) -> Result<u64, Error> {
    value
        .trim()
        .parse()
        .map_err(|e| Error::validation_for_field(key, format!("invalid number '{}': {}", value, e)))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, Error> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        _ => Err(Error::validation_for_field(
            key,
            format!("invalid boolean '{}'", value),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<E2eConfig, Error> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        E2eConfig::from_lookup(|k| vars.get(k).cloned())
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = load(&[]).unwrap();
        assert_eq!(config, E2eConfig::default());
        assert_eq!(config.builder_hash_annotation, BUILDER_HASH_ANNOTATION);
        assert_eq!(config.teardown, TeardownPolicy::OnSuccess);
        assert!(config.retry_mutation_conflicts);
    }

    #[test]
    fn overrides_are_applied() {
        let config = load(&[
            ("BEACON_E2E_NAMESPACE", "e2e-mb"),
            ("BEACON_E2E_TIMEOUT_SECS", "30"),
            ("BEACON_E2E_POLL_INTERVAL_MS", "250"),
            ("BEACON_E2E_TEARDOWN", "never"),
            ("BEACON_E2E_BUILDER_HASH_ANNOTATION", "e2e/pod-template-hash"),
            ("BEACON_E2E_RETRY_MUTATION_CONFLICTS", "false"),
        ])
        .unwrap();
        assert_eq!(config.namespace, "e2e-mb");
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.teardown, TeardownPolicy::Never);
        assert_eq!(config.builder_hash_annotation, "e2e/pod-template-hash");
        assert!(!config.retry_mutation_conflicts);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(load(&[("BEACON_E2E_TIMEOUT_SECS", "soon")]).is_err());
        assert!(load(&[("BEACON_E2E_TIMEOUT_SECS", "0")]).is_err());
        assert!(load(&[("BEACON_E2E_TEARDOWN", "sometimes")]).is_err());
        assert!(load(&[("BEACON_E2E_RETRY_MUTATION_CONFLICTS", "maybe")]).is_err());
    }

    #[test]
    fn teardown_policy_follows_outcome() {
        assert!(TeardownPolicy::Always.should_run(false));
        assert!(TeardownPolicy::OnSuccess.should_run(true));
        assert!(!TeardownPolicy::OnSuccess.should_run(false));
        assert!(!TeardownPolicy::Never.should_run(true));
    }
}
