//! Error types for the deployment orchestrator.
//!
//! This module provides the error hierarchy for every stage of the
//! deployment lifecycle: input validation, stack deployment, endpoint
//! discovery, health probing, lifecycle operations and cost reporting.
//! Every error names the stage that failed and the resource involved.

use std::path::PathBuf;
use thiserror::Error;

/// Pipeline stage an error or outcome belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Settings loading.
    Config,
    /// Request validation.
    Validate,
    /// Stack submission and polling.
    Deploy,
    /// Endpoint discovery.
    Resolve,
    /// Health probes.
    Probe,
    /// Start/stop/scale/restart.
    Lifecycle,
    /// Spend reporting.
    Cost,
}

/// The main error type for the orchestrator.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Settings file errors.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// Bad input; raised before any network call.
    #[error("{0}")]
    Validation(#[from] ValidationError),

    /// Stack reached a failed state or cannot be deployed.
    #[error("{0}")]
    Deployment(#[from] DeploymentError),

    /// Nothing resolvable from a complete stack.
    #[error("{0}")]
    Discovery(#[from] DiscoveryError),

    /// A probe could not execute at all.
    #[error("{0}")]
    Probe(#[from] ProbeError),

    /// A bounded wait was exceeded.
    #[error("{0}")]
    Timeout(#[from] TimeoutError),

    /// The platform denied an action.
    #[error("{0}")]
    Permission(#[from] PermissionError),

    /// Cloud API failures other than permission denials.
    #[error("{0}")]
    Cloud(#[from] CloudError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Settings file errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The settings file was not found.
    #[error("Settings file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The settings file could not be parsed.
    #[error("Failed to parse settings: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// The infrastructure template could not be read.
    #[error("Failed to read template {path}: {message}")]
    TemplateUnreadable {
        /// Template path.
        path: PathBuf,
        /// Underlying error.
        message: String,
    },
}

/// Input validation failures.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A field holds a value outside its allowed set or range.
    #[error("invalid {field} '{value}': {reason}")]
    InvalidField {
        /// Field name as it appears in the request.
        field: String,
        /// The offending value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The operation is not available for this deployment.
    #[error("{operation} is not supported for deploymentType '{deployment_type}'")]
    Unsupported {
        /// Operation attempted.
        operation: String,
        /// Deployment type of the target stack.
        deployment_type: String,
    },
}

/// Stack deployment failures.
#[derive(Debug, Error)]
pub enum DeploymentError {
    /// The stack reached a failed terminal state.
    #[error("stack {stack} failed with status {last_status}{}", reason_suffix(.reason.as_deref()))]
    StackFailed {
        /// Stack name.
        stack: String,
        /// Last status string reported by the platform.
        last_status: String,
        /// Status reason, if reported.
        reason: Option<String>,
    },

    /// The stack is mid-transition and cannot accept another change.
    #[error("stack {stack} is busy ({status}); wait for it to settle before deploying")]
    StackBusy {
        /// Stack name.
        stack: String,
        /// Current status.
        status: String,
    },

    /// The stack vanished while being polled.
    #[error("stack {stack} disappeared while waiting for {operation} to finish")]
    StackVanished {
        /// Stack name.
        stack: String,
        /// Operation that was in progress.
        operation: String,
    },

    /// Template validation rejected the artifact.
    #[error("template validation failed for {stack}: {message}")]
    TemplateRejected {
        /// Stack name.
        stack: String,
        /// Platform message.
        message: String,
    },

    /// Deployment was declined at the confirmation prompt.
    #[error("deployment of {stack} was not confirmed")]
    NotConfirmed {
        /// Stack name.
        stack: String,
    },
}

/// Endpoint or service discovery failures.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The stack does not exist.
    #[error("stack {stack} not found")]
    StackNotFound {
        /// Stack name.
        stack: String,
    },

    /// The stack is complete but yields no endpoint.
    #[error("stack {stack} is complete but no endpoint could be resolved: {reason}")]
    NoEndpoints {
        /// Stack name.
        stack: String,
        /// Explanation of why nothing was found.
        reason: String,
    },

    /// The container service does not exist.
    #[error("service {service} not found in cluster {cluster}")]
    ServiceNotFound {
        /// Cluster name.
        cluster: String,
        /// Service name.
        service: String,
    },
}

/// A probe failed to execute (distinct from a failed verdict).
#[derive(Debug, Error)]
pub enum ProbeError {
    /// The HTTP client could not be constructed.
    #[error("failed to create HTTP client: {message}")]
    ClientSetup {
        /// Underlying error.
        message: String,
    },

    /// A probe request could not be built or its body encoded.
    #[error("{probe} probe against {endpoint} could not run: {message}")]
    Execution {
        /// Probe name.
        probe: String,
        /// Endpoint URL.
        endpoint: String,
        /// Underlying error.
        message: String,
    },
}

/// A bounded wait expired.
#[derive(Debug, Error)]
#[error("[{stage}] timed out after {waited_secs}s waiting for {resource} to reach {expected} (last observed: {last_observed})")]
pub struct TimeoutError {
    /// Stage that was waiting.
    pub stage: Stage,
    /// Resource identifier.
    pub resource: String,
    /// Condition that was never met.
    pub expected: String,
    /// Last observed state.
    pub last_observed: String,
    /// Seconds waited.
    pub waited_secs: u64,
}

/// The platform refused an action.
#[derive(Debug, Error)]
#[error("permission denied for {action} on {resource}: {message}")]
pub struct PermissionError {
    /// API action attempted.
    pub action: String,
    /// Resource identifier.
    pub resource: String,
    /// Platform message.
    pub message: String,
}

/// Cloud API failures.
#[derive(Debug, Error)]
pub enum CloudError {
    /// The API throttled us.
    #[error("{service} throttled {operation} on {resource}")]
    Throttled {
        /// Service name.
        service: String,
        /// API operation.
        operation: String,
        /// Resource identifier.
        resource: String,
    },

    /// Transport-level failure.
    #[error("network error calling {service} {operation} on {resource}: {message}")]
    Network {
        /// Service name.
        service: String,
        /// API operation.
        operation: String,
        /// Resource identifier.
        resource: String,
        /// Description of the failure.
        message: String,
    },

    /// The API returned an error.
    #[error("{service} {operation} failed on {resource}: {code}: {message}")]
    ApiFailed {
        /// Service name.
        service: String,
        /// API operation.
        operation: String,
        /// Resource identifier.
        resource: String,
        /// Error code.
        code: String,
        /// Error message.
        message: String,
    },

    /// The API returned something we could not interpret.
    #[error("invalid response from {service}: {message}")]
    InvalidResponse {
        /// Service name.
        service: String,
        /// Description of the response issue.
        message: String,
    },
}

/// Result type alias for orchestrator operations.
pub type Result<T> = std::result::Result<T, OrchestratorError>;

fn reason_suffix(reason: Option<&str>) -> String {
    reason.map(|r| format!(" ({r})")).unwrap_or_default()
}

impl OrchestratorError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if this error is transient and the call may be repeated.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Cloud(CloudError::Throttled { .. } | CloudError::Network { .. })
        )
    }

    /// Returns the suggested retry delay in seconds, if applicable.
    #[must_use]
    pub const fn retry_delay_secs(&self) -> Option<u64> {
        match self {
            Self::Cloud(CloudError::Throttled { .. }) => Some(10),
            Self::Cloud(CloudError::Network { .. }) => Some(5),
            _ => None,
        }
    }

    /// Returns the stage this error belongs to, when it is intrinsic to the error.
    #[must_use]
    pub const fn stage(&self) -> Option<Stage> {
        match self {
            Self::Config(_) => Some(Stage::Config),
            Self::Validation(_) => Some(Stage::Validate),
            Self::Deployment(_) => Some(Stage::Deploy),
            Self::Discovery(_) => Some(Stage::Resolve),
            Self::Probe(_) => Some(Stage::Probe),
            Self::Timeout(t) => Some(t.stage),
            Self::Permission(_) | Self::Cloud(_) | Self::Io(_) | Self::Internal(_) => None,
        }
    }
}

impl ValidationError {
    /// Creates an invalid-field error.
    #[must_use]
    pub fn field(
        field: impl Into<String>,
        value: impl ToString,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidField {
            field: field.into(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    /// Returns the field name, if this error is about a field.
    #[must_use]
    pub fn field_name(&self) -> Option<&str> {
        match self {
            Self::InvalidField { field, .. } => Some(field),
            Self::Unsupported { .. } => None,
        }
    }
}

impl CloudError {
    /// Creates an invalid-response error.
    #[must_use]
    pub fn invalid_response(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            service: service.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Config => "config",
            Self::Validate => "validate",
            Self::Deploy => "deploy",
            Self::Resolve => "resolve",
            Self::Probe => "probe",
            Self::Lifecycle => "lifecycle",
            Self::Cost => "cost",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_mentions_field_and_value() {
        let err = OrchestratorError::from(ValidationError::field(
            "instanceCount",
            25,
            "must be between 1 and 20",
        ));
        let message = err.to_string();
        assert!(message.contains("instanceCount"));
        assert!(message.contains("25"));
        assert_eq!(err.stage(), Some(Stage::Validate));
    }

    #[test]
    fn test_retryable_classification() {
        let throttled = OrchestratorError::from(CloudError::Throttled {
            service: String::from("ecs"),
            operation: String::from("DescribeServices"),
            resource: String::from("svc"),
        });
        assert!(throttled.is_retryable());
        assert_eq!(throttled.retry_delay_secs(), Some(10));

        let denied = OrchestratorError::from(PermissionError {
            action: String::from("UpdateService"),
            resource: String::from("svc"),
            message: String::from("not authorized"),
        });
        assert!(!denied.is_retryable());
        assert_eq!(denied.retry_delay_secs(), None);
    }

    #[test]
    fn test_stack_failed_message_carries_status() {
        let err = DeploymentError::StackFailed {
            stack: String::from("llm-testgen-dev"),
            last_status: String::from("ROLLBACK_COMPLETE"),
            reason: Some(String::from("Resource creation cancelled")),
        };
        let message = err.to_string();
        assert!(message.contains("llm-testgen-dev"));
        assert!(message.contains("ROLLBACK_COMPLETE"));
        assert!(message.contains("Resource creation cancelled"));
    }

    #[test]
    fn test_timeout_stage_is_reported() {
        let err = OrchestratorError::from(TimeoutError {
            stage: Stage::Deploy,
            resource: String::from("llm-testgen-dev"),
            expected: String::from("CREATE_COMPLETE"),
            last_observed: String::from("CREATE_IN_PROGRESS"),
            waited_secs: 1800,
        });
        assert_eq!(err.stage(), Some(Stage::Deploy));
        assert!(err.to_string().starts_with("[deploy]"));
    }
}
