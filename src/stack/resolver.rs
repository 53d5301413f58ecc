//! Endpoint discovery.
//!
//! Resolves the network addresses of the deployed LLM service from a
//! [`StackHandle`]. A stack that is not complete never yields endpoints;
//! callers get an empty list together with the reason, never an error.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cloud::{ServiceApi, StackStatus};
use crate::config::{Environment, OrchestratorSettings};
use crate::error::{DiscoveryError, OrchestratorError, Result};

use super::deployer::StackHandle;

/// How an endpoint was discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum EndpointKind {
    /// From the stack's service endpoint output.
    LoadBalancer,
    /// A running task's private address.
    DirectContainer,
    /// The configured local fallback.
    LocalFallback,
}

/// A reachable service address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Endpoint {
    /// Base URL, without trailing slash.
    pub url: String,
    /// Discovery source.
    pub kind: EndpointKind,
}

/// Why a resolution came back empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "camelCase")]
pub enum UnresolvedReason {
    /// The stack is not in a complete state.
    StackNotReady {
        /// Stack name.
        stack: String,
        /// Current status.
        status: StackStatus,
    },
    /// The stack is complete but exposes nothing.
    NothingDefined {
        /// Stack name.
        stack: String,
        /// What was looked for.
        detail: String,
    },
}

/// Endpoints found for a stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Resolution {
    /// Endpoints in discovery order, deduplicated.
    pub endpoints: Vec<Endpoint>,
    /// Set when `endpoints` is empty.
    pub empty_reason: Option<UnresolvedReason>,
}

/// Cluster and service backing a stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceIdentity {
    /// Cluster name.
    pub cluster: String,
    /// Service name.
    pub service: String,
}

impl fmt::Display for ServiceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.cluster, self.service)
    }
}

impl fmt::Display for UnresolvedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StackNotReady { stack, status } => {
                write!(f, "stack {stack} is not ready (status {status})")
            }
            Self::NothingDefined { stack, detail } => {
                write!(f, "stack {stack} is complete but {detail}")
            }
        }
    }
}

/// Discovers service endpoints and identity for a stack.
pub struct EndpointResolver {
    services: Arc<dyn ServiceApi>,
    settings: OrchestratorSettings,
}

impl EndpointResolver {
    /// Creates a resolver.
    #[must_use]
    pub fn new(services: Arc<dyn ServiceApi>, settings: &OrchestratorSettings) -> Self {
        Self {
            services,
            settings: settings.clone(),
        }
    }

    /// Resolves endpoints for `handle`.
    ///
    /// Sources, in order: the service endpoint output, the private addresses
    /// of running tasks, and the local fallback when nothing else was found.
    ///
    /// # Errors
    ///
    /// Returns an error only when the platform denies the task lookup.
    pub async fn resolve(&self, handle: &StackHandle, environment: Environment) -> Result<Resolution> {
        if !handle.is_complete() {
            debug!("Stack {} is {}; no endpoints", handle.stack_name, handle.status);
            return Ok(Resolution {
                endpoints: Vec::new(),
                empty_reason: Some(UnresolvedReason::StackNotReady {
                    stack: handle.stack_name.clone(),
                    status: handle.status,
                }),
            });
        }

        let mut endpoints = Vec::new();
        let output_key = &self.settings.stack.endpoint_output;

        if let Some(value) = handle.outputs.get(output_key).filter(|v| !v.trim().is_empty()) {
            endpoints.push(Endpoint {
                url: normalize_url(value),
                kind: EndpointKind::LoadBalancer,
            });
        }

        let runs_containers = handle
            .deployment_type()
            .is_none_or(|t| t.has_container_service());

        if runs_containers {
            let identity = self.service_identity(handle, environment);
            match self
                .services
                .list_task_addresses(&identity.cluster, &identity.service)
                .await
            {
                Ok(addresses) => endpoints.extend(addresses.into_iter().map(|ip| Endpoint {
                    url: format!("http://{ip}:{}", self.settings.service.container_port),
                    kind: EndpointKind::DirectContainer,
                })),
                Err(e @ OrchestratorError::Permission(_)) => return Err(e),
                Err(e) => warn!("Task address lookup for {identity} failed: {e}"),
            }
        }

        if endpoints.is_empty() {
            if let Some(fallback) = &self.settings.service.local_fallback {
                debug!("Using local fallback endpoint {fallback}");
                endpoints.push(Endpoint {
                    url: normalize_url(fallback),
                    kind: EndpointKind::LocalFallback,
                });
            }
        }

        let mut seen = std::collections::HashSet::new();
        endpoints.retain(|e| seen.insert(e.url.clone()));

        let empty_reason = endpoints.is_empty().then(|| UnresolvedReason::NothingDefined {
            stack: handle.stack_name.clone(),
            detail: format!(
                "has no '{output_key}' output, no running tasks and no local fallback configured"
            ),
        });

        info!("Resolved {} endpoint(s) for {}", endpoints.len(), handle.stack_name);
        Ok(Resolution {
            endpoints,
            empty_reason,
        })
    }

    /// Cluster and service for `handle`: stack outputs, then settings
    /// overrides, then the `<project>-<env>-cluster|service` convention.
    #[must_use]
    pub fn service_identity(&self, handle: &StackHandle, environment: Environment) -> ServiceIdentity {
        let stack = &self.settings.stack;
        let service = &self.settings.service;

        let cluster = handle
            .outputs
            .get(&stack.cluster_output)
            .cloned()
            .or_else(|| service.cluster.clone())
            .unwrap_or_else(|| self.settings.default_cluster(environment));

        let service_name = handle
            .outputs
            .get(&stack.service_output)
            .cloned()
            .or_else(|| service.service.clone())
            .unwrap_or_else(|| self.settings.default_service(environment));

        ServiceIdentity {
            cluster,
            service: service_name,
        }
    }
}

impl Resolution {
    /// Returns the endpoints, or a [`DiscoveryError`] explaining their absence.
    ///
    /// # Errors
    ///
    /// Returns an error when no endpoint was resolved.
    pub fn require_endpoints(self) -> Result<Vec<Endpoint>> {
        match self.empty_reason {
            None if !self.endpoints.is_empty() => Ok(self.endpoints),
            Some(UnresolvedReason::StackNotReady { stack, status }) => {
                Err(DiscoveryError::NoEndpoints {
                    stack,
                    reason: format!("stack is not ready (status {status})"),
                }
                .into())
            }
            Some(UnresolvedReason::NothingDefined { stack, detail }) => {
                Err(DiscoveryError::NoEndpoints { stack, reason: detail }.into())
            }
            None => Err(DiscoveryError::NoEndpoints {
                stack: String::from("unknown"),
                reason: String::from("no endpoints"),
            }
            .into()),
        }
    }
}

fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    }
}

impl fmt::Debug for EndpointResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointResolver").finish_non_exhaustive()
    }
}
