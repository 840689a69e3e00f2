//! Step-level errors
//!
//! A step either has not observed what it expects yet ([`StepError::Pending`],
//! retried by [`Eventually`](crate::Eventually)), failed for good, ran out
//! of retry budget, or was wired up wrong. The last kind is not a finding
//! about the system under test: the sequence executor panics on it.

use std::time::Duration;

use thiserror::Error;

/// Why a step did not succeed
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StepError {
    /// Expected state not observed yet; worth retrying
    #[error("{0}")]
    Pending(String),

    /// Final failure; retrying cannot help
    #[error("{0}")]
    Failed(String),

    /// The retry budget ran out; carries the last pending reason
    #[error("timed out after {timeout:?} ({attempts} attempts): {last}")]
    TimedOut {
        /// Budget that was exhausted
        timeout: Duration,
        /// Number of probe invocations
        attempts: u32,
        /// Last failure observed
        last: String,
    },

    /// The harness was misused (e.g. a mutation builder without lineage)
    #[error("harness misconfigured: {0}")]
    Misconfigured(String),
}

impl StepError {
    /// Create a pending error
    pub fn pending(msg: impl Into<String>) -> Self {
        Self::Pending(msg.into())
    }

    /// Create a final failure
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }

    /// Create a misconfiguration error
    pub fn misconfigured(msg: impl Into<String>) -> Self {
        Self::Misconfigured(msg.into())
    }

    /// Whether a retry policy may invoke the probe again
    pub fn is_retryable(&self) -> bool {
        matches!(self, StepError::Pending(_))
    }
}

impl From<beacon_common::Error> for StepError {
    fn from(err: beacon_common::Error) -> Self {
        if err.is_transient() {
            StepError::Pending(err.to_string())
        } else {
            StepError::Failed(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_common::Error;

    #[test]
    fn transient_store_errors_stay_pending() {
        assert_eq!(
            StepError::from(Error::conflict("Pod", "e2e/mb-0")),
            StepError::pending("conflict updating Pod e2e/mb-0: the object has been modified")
        );
        assert!(StepError::from(Error::not_found("Pod", "e2e/mb-0")).is_retryable());
    }

    #[test]
    fn other_store_errors_are_final() {
        let err = StepError::from(Error::validation("agent has no type"));
        assert!(matches!(err, StepError::Failed(_)));
        assert!(!err.is_retryable());
        assert!(!StepError::misconfigured("x").is_retryable());
    }

    #[test]
    fn timeout_message_keeps_last_reason() {
        let err = StepError::TimedOut {
            timeout: Duration::from_secs(5),
            attempts: 6,
            last: "pod mb-0 is not annotated yet".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "timed out after 5s (6 attempts): pod mb-0 is not annotated yet"
        );
    }
}
