//! Error types for Beacon
//!
//! Errors carry the kind and name of the object involved so a failing
//! verification step can say exactly what it was looking at.

use thiserror::Error;

/// Main error type for Beacon operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error that is neither a conflict nor a missing object
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// The object does not exist (or is not visible through the read path yet)
    #[error("{kind} {name} not found")]
    NotFound {
        /// Resource kind (e.g. "Pod")
        kind: String,
        /// Namespaced name of the object
        name: String,
    },

    /// Optimistic concurrency conflict: the object changed since it was read
    #[error("conflict updating {kind} {name}: the object has been modified")]
    Conflict {
        /// Resource kind (e.g. "Pod")
        kind: String,
        /// Namespaced name of the object
        name: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// A system outside the cluster (e.g. Elasticsearch) could not be reached
    #[error("{system} unavailable: {message}")]
    Unavailable {
        /// Name of the external system
        system: String,
        /// Description of what failed
        message: String,
    },

    /// A system outside the cluster answered with an error or garbage
    #[error("{system} error: {message}")]
    External {
        /// Name of the external system
        system: String,
        /// Description of what failed
        message: String,
    },

    /// Invalid configuration or spec
    #[error("validation error: {message}")]
    Validation {
        /// Description of what's invalid
        message: String,
        /// The invalid field or setting, if known
        field: Option<String>,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred
        context: String,
    },
}

impl Error {
    /// Create a not-found error
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create a conflict error
    pub fn conflict(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Conflict {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create an error for an external system that could not be reached
    pub fn unavailable(system: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Unavailable {
            system: system.into(),
            message: msg.into(),
        }
    }

    /// Create an error for an external system that rejected a request
    pub fn external(system: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::External {
            system: system.into(),
            message: msg.into(),
        }
    }

    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error for a specific field or setting
    pub fn validation_for_field(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Whether this error describes a condition expected to clear on its own.
    ///
    /// Conflicts (a concurrent writer got there first) and missing objects
    /// (not yet visible through a lagging cache) are transient, as are
    /// connection failures. Any other answer from a server is final.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::NotFound { .. } | Error::Conflict { .. } | Error::Unavailable { .. } => true,
            Error::Kube { source } => match source {
                kube::Error::Api(ae) => ae.code == 404 || ae.code == 409,
                _ => true,
            },
            Error::External { .. }
            | Error::Serialization { .. }
            | Error::Validation { .. }
            | Error::Internal { .. } => false,
        }
    }

    /// Whether this is an optimistic concurrency conflict
    pub fn is_conflict(&self) -> bool {
        match self {
            Error::Conflict { .. } => true,
            Error::Kube {
                source: kube::Error::Api(ae),
            } => ae.code == 409,
            _ => false,
        }
    }

    /// Whether this is a missing object
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound { .. } => true,
            Error::Kube {
                source: kube::Error::Api(ae),
            } => ae.code == 404,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_error(code: u16) -> Error {
        Error::Kube {
            source: kube::Error::Api(kube::core::ErrorResponse {
                status: "Failure".to_string(),
                message: "boom".to_string(),
                reason: "Test".to_string(),
                code,
            }),
        }
    }

    #[test]
    fn conflicts_and_missing_objects_are_transient() {
        assert!(Error::conflict("Pod", "e2e/mb-0").is_transient());
        assert!(Error::not_found("Pod", "e2e/mb-0").is_transient());
        assert!(api_error(409).is_transient());
        assert!(api_error(404).is_transient());
        assert!(Error::unavailable("elasticsearch", "connection refused").is_transient());
    }

    #[test]
    fn client_errors_and_config_errors_are_final() {
        assert!(!api_error(403).is_transient());
        assert!(!api_error(422).is_transient());
        assert!(!api_error(503).is_transient());
        assert!(!Error::external("elasticsearch", "HTTP 401 Unauthorized").is_transient());
        assert!(!Error::validation("bad timeout").is_transient());
        assert!(!Error::serialization("bad json").is_transient());
    }

    #[test]
    fn conflict_detection_covers_raw_api_errors() {
        assert!(api_error(409).is_conflict());
        assert!(!api_error(404).is_conflict());
        assert!(api_error(404).is_not_found());
        assert!(Error::conflict("Agent", "e2e/mb").is_conflict());
    }

    #[test]
    fn messages_name_the_object() {
        let err = Error::conflict("Pod", "e2e/mb-0");
        assert_eq!(
            err.to_string(),
            "conflict updating Pod e2e/mb-0: the object has been modified"
        );
        assert_eq!(
            Error::not_found("Agent", "e2e/mb").to_string(),
            "Agent e2e/mb not found"
        );
    }
}
