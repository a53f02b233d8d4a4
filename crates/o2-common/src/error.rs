//! Error types for the OpenObserve operator
//!
//! Errors are structured with fields to aid debugging in production.
//! Each variant maps onto one failure category of the reconcile and
//! admission paths, and carries enough context (resource key, remote
//! operation, HTTP status) to explain a non-Ready condition.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for operator operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Structural or admission rule failure
    #[error("validation error for {resource}: {message}")]
    Validation {
        /// Key of the resource with the invalid spec
        resource: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "spec.outputFormat")
        field: Option<String>,
    },

    /// A referenced resource is absent or not Ready yet
    #[error("dependency missing for {resource}: {dependency} {message}")]
    DependencyMissing {
        /// Key of the resource that holds the reference
        resource: String,
        /// Key of the referenced resource
        dependency: String,
        /// Why the dependency is unusable (e.g., "not found", "not Ready")
        message: String,
    },

    /// Network failure, timeout, 5xx or throttling from the backend
    #[error("remote transient error during {operation}: {message}")]
    RemoteTransient {
        /// Remote operation that failed (e.g., "create alerts")
        operation: String,
        /// Description of what failed
        message: String,
        /// HTTP status if a response was received
        status: Option<u16>,
    },

    /// Remote object exists under a different identity than expected
    #[error("remote conflict for {resource}: {message}")]
    RemoteConflict {
        /// Key of the resource whose remote identity conflicts
        resource: String,
        /// Description of the conflict
        message: String,
    },

    /// Backend rejected the credentials
    #[error("remote authentication failed for {endpoint}: {message}")]
    RemoteAuth {
        /// Backend endpoint that rejected the request
        endpoint: String,
        /// Description of what failed
        message: String,
        /// HTTP status (401 or 403)
        status: u16,
    },

    /// Backend rejected the payload with a non-retryable 4xx
    #[error("remote rejected {operation} with status {status}: {message}")]
    RemoteRejected {
        /// Remote operation that was rejected
        operation: String,
        /// HTTP status returned
        status: u16,
        /// Response body or message
        message: String,
    },

    /// Deletion blocked because other resources still reference this one
    #[error("{resource} still referenced by: {}", dependents.join(", "))]
    HasDependents {
        /// Key of the resource being deleted
        resource: String,
        /// Keys of the resources still referencing it
        dependents: Vec<String>,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "reconciler", "webhook")
        context: String,
    },
}

impl Error {
    /// Create a validation error with the given message
    ///
    /// For simple validation errors without resource context.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            resource: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with resource context
    pub fn validation_for(resource: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            resource: resource.into(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with resource context and field path
    pub fn validation_for_field(
        resource: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            resource: resource.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a dependency-missing error
    pub fn dependency_missing(
        resource: impl Into<String>,
        dependency: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::DependencyMissing {
            resource: resource.into(),
            dependency: dependency.into(),
            message: msg.into(),
        }
    }

    /// Create a transient remote error
    pub fn remote_transient(
        operation: impl Into<String>,
        msg: impl Into<String>,
        status: Option<u16>,
    ) -> Self {
        Self::RemoteTransient {
            operation: operation.into(),
            message: msg.into(),
            status,
        }
    }

    /// Create a remote conflict error
    pub fn remote_conflict(resource: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::RemoteConflict {
            resource: resource.into(),
            message: msg.into(),
        }
    }

    /// Create a remote authentication error
    pub fn remote_auth(endpoint: impl Into<String>, status: u16, msg: impl Into<String>) -> Self {
        Self::RemoteAuth {
            endpoint: endpoint.into(),
            message: msg.into(),
            status,
        }
    }

    /// Create a terminal remote rejection (non-retryable 4xx)
    pub fn remote_rejected(
        operation: impl Into<String>,
        status: u16,
        msg: impl Into<String>,
    ) -> Self {
        Self::RemoteRejected {
            operation: operation.into(),
            status,
            message: msg.into(),
        }
    }

    /// Create a has-dependents error
    pub fn has_dependents(resource: impl Into<String>, dependents: Vec<String>) -> Self {
        Self::HasDependents {
            resource: resource.into(),
            dependents,
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Transient conditions (network, 5xx, missing dependencies, blocked
    /// deletion) clear on their own. Validation, serialization and remote
    /// 4xx rejections need a spec change. Auth failures need a credential
    /// change; callers still requeue those with capped backoff.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => {
                // Don't retry on 4xx errors (validation, not found, etc.)
                !matches!(
                    source,
                    kube::Error::Api(ae) if (400..500).contains(&ae.code)
                )
            }
            Error::Validation { .. } => false,
            Error::DependencyMissing { .. } => true,
            Error::RemoteTransient { .. } => true,
            Error::RemoteConflict { .. } => false,
            Error::RemoteAuth { .. } => false,
            Error::RemoteRejected { .. } => false,
            Error::HasDependents { .. } => true,
            Error::Serialization { .. } => false,
            Error::Internal { .. } => true,
        }
    }

    /// Whether only a spec change can resolve this error
    ///
    /// Terminal errors park the resource until its generation changes.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Error::Validation { .. } | Error::RemoteRejected { .. } | Error::Serialization { .. }
        )
    }

    /// Machine-readable reason used in conditions and events
    pub fn reason(&self) -> &'static str {
        match self {
            Error::Kube { .. } => "KubernetesError",
            Error::Validation { .. } => "ValidationFailed",
            Error::DependencyMissing { .. } => "DependencyMissing",
            Error::RemoteTransient { .. } => "RemoteUnavailable",
            Error::RemoteConflict { .. } => "RemoteConflict",
            Error::RemoteAuth { .. } => "RemoteAuthFailed",
            Error::RemoteRejected { .. } => "RemoteRejected",
            Error::HasDependents { .. } => "HasDependents",
            Error::Serialization { .. } => "SerializationFailed",
            Error::Internal { .. } => "InternalError",
        }
    }

    /// Get the context if this error has one
    pub fn context(&self) -> Option<&str> {
        match self {
            Error::Internal { context, .. } => Some(context),
            _ => None,
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

    // ==========================================================================
    // Story Tests: How failures steer the reconcile loop
    // ==========================================================================

    /// Story: A bad spec is parked until the user edits it
    ///
    /// Validation failures and 4xx rejections from the backend cannot be
    /// fixed by retrying; they are terminal and not retryable.
    #[test]
    fn story_terminal_errors_wait_for_a_spec_change() {
        let err = Error::validation_for("Destination/obs/splunk", "outputFormat must be nestedevent");
        assert!(err.to_string().contains("validation error"));
        assert!(err.to_string().contains("Destination/obs/splunk"));
        assert!(!err.is_retryable());
        assert!(err.is_terminal());
        assert_eq!(err.reason(), "ValidationFailed");

        let err = Error::remote_rejected("create alerts", 400, "invalid stream");
        assert!(err.to_string().contains("status 400"));
        assert!(!err.is_retryable());
        assert!(err.is_terminal());
    }

    /// Story: Dependencies appear later, so missing ones are retried
    #[test]
    fn story_missing_dependency_is_retried_with_backoff() {
        let err = Error::dependency_missing("Alert/obs/cpu", "Config/obs/main", "not Ready");
        assert!(err.is_retryable());
        assert!(!err.is_terminal());
        assert_eq!(err.reason(), "DependencyMissing");
        assert!(err.to_string().contains("Config/obs/main"));
    }

    /// Story: Backend outages and throttling are transient
    #[test]
    fn story_remote_transient_errors_are_retryable() {
        let err = Error::remote_transient("update pipelines", "503 Service Unavailable", Some(503));
        assert!(err.is_retryable());
        assert_eq!(err.reason(), "RemoteUnavailable");

        let err = Error::remote_transient("get functions", "operation timed out", None);
        assert!(err.is_retryable());
    }

    /// Story: Rejected credentials are reported, not hammered
    ///
    /// Auth failures are neither retryable nor terminal: the controller
    /// keeps requeueing at the backoff cap until the Secret changes.
    #[test]
    fn story_auth_failures_are_not_retryable_but_not_terminal() {
        let err = Error::remote_auth("https://o2.example.com", 401, "invalid credentials");
        assert!(!err.is_retryable());
        assert!(!err.is_terminal());
        assert_eq!(err.reason(), "RemoteAuthFailed");
    }

    /// Story: Deletion waits while dependents still exist
    #[test]
    fn story_has_dependents_lists_every_referrer() {
        let err = Error::has_dependents(
            "Template/obs/slack",
            vec![
                "Destination/obs/a".to_string(),
                "Destination/obs/b".to_string(),
            ],
        );
        assert_eq!(
            err.to_string(),
            "Template/obs/slack still referenced by: Destination/obs/a, Destination/obs/b"
        );
        assert!(err.is_retryable());
    }

    #[test]
    fn test_validation_for_field_keeps_path() {
        let err = Error::validation_for_field("Alert/obs/cpu", "spec.destinations", "too many");
        match &err {
            Error::Validation { field, .. } => {
                assert_eq!(field.as_deref(), Some("spec.destinations"));
            }
            _ => panic!("Expected Validation variant"),
        }
    }

    #[test]
    fn test_internal_error_default_context() {
        let err = Error::internal("unexpected state");
        assert_eq!(err.context(), Some(super::UNKNOWN_CONTEXT));
        assert!(err.to_string().contains("[unknown]"));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_serde_json_error_converts_to_serialization() {
        let parse: std::result::Result<serde_json::Value, _> = serde_json::from_str("{");
        let err: Error = parse.unwrap_err().into();
        assert!(matches!(err, Error::Serialization { .. }));
        assert!(err.is_terminal());
    }

    #[test]
    fn test_remote_conflict_is_reported_not_retried() {
        let err = Error::remote_conflict("Alert/obs/cpu", "remote id abc vanished");
        assert!(!err.is_retryable());
        assert!(!err.is_terminal());
        assert_eq!(err.reason(), "RemoteConflict");
    }
}
