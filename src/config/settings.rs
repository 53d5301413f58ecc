//! Operator settings.
//!
//! These map to the optional `llmdeploy.yaml` file. Every section has a
//! default so an absent file is equivalent to an empty one. Durations are
//! held as plain seconds here and converted to [`Duration`] in the runtime
//! option structs ([`DeployOptions`], [`ProbeOptions`], [`LifecycleOptions`]).

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::request::Environment;

/// Root settings structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OrchestratorSettings {
    /// Project identity.
    pub project: ProjectSettings,
    /// Infrastructure template.
    pub template: TemplateSettings,
    /// Stack polling and output names.
    pub stack: StackSettings,
    /// Container service.
    pub service: ServiceSettings,
    /// Health probes.
    pub probes: ProbeSettings,
    /// Job queue round-trip.
    pub queue: QueueSettings,
    /// Auto-stop policy.
    pub policy: PolicySettings,
    /// Cost reporting.
    pub cost: CostSettings,
    /// Log retrieval.
    pub logs: LogSettings,
}

/// Project identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProjectSettings {
    /// Project name; prefix of every stack name.
    pub name: String,
    /// Value of the `ManagedBy` tag.
    pub managed_by: String,
}

/// Infrastructure template location.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TemplateSettings {
    /// Local template path.
    pub path: PathBuf,
    /// Remote template URL; takes precedence over `path` when set.
    pub url: Option<String>,
    /// Capabilities acknowledged on create/update.
    pub capabilities: Vec<String>,
}

/// Stack polling and output names.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StackSettings {
    /// Seconds between status polls.
    pub poll_interval_secs: u64,
    /// Seconds before a create/update is declared timed out.
    pub timeout_secs: u64,
    /// Output key holding the service URL.
    pub endpoint_output: String,
    /// Output key holding the cluster name.
    pub cluster_output: String,
    /// Output key holding the service name.
    pub service_output: String,
    /// Output key holding the job queue URL.
    pub queue_output: String,
    /// Output key holding the results bucket name.
    pub bucket_output: String,
}

/// Container service settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServiceSettings {
    /// Cluster name override.
    pub cluster: Option<String>,
    /// Service name override.
    pub service: Option<String>,
    /// Container port the LLM server listens on.
    pub container_port: u16,
    /// Local fallback URL used when nothing else resolves. Unset unless
    /// configured, for sandboxed checks only.
    pub local_fallback: Option<String>,
    /// Desired count used by `start` from a stopped state.
    pub default_running_count: u32,
    /// Seconds to wait for a scaled service to stabilise.
    pub stable_timeout_secs: u64,
    /// Seconds to wait for a stopped service to drain.
    pub stop_timeout_secs: u64,
    /// Seconds between service polls.
    pub poll_interval_secs: u64,
    /// Seconds to pause between the stop and start halves of a restart.
    pub restart_pause_secs: u64,
}

/// Health probe settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProbeSettings {
    /// Liveness path.
    pub health_path: String,
    /// Capability listing path.
    pub capability_path: String,
    /// Inference path.
    pub inference_path: String,
    /// Seconds to keep retrying liveness.
    pub liveness_timeout_secs: u64,
    /// Seconds between liveness attempts.
    pub liveness_interval_secs: u64,
    /// Seconds allowed for the inference round-trip.
    pub inference_timeout_secs: u64,
    /// Model used for inference; defaults to the first listed one.
    pub model: Option<String>,
    /// Deterministic inference prompt.
    pub prompt: String,
    /// Token budget for the inference response.
    pub max_tokens: u32,
    /// Models that should be listed; missing ones produce warnings.
    pub required_models: Vec<String>,
    /// Maximum endpoints probed concurrently.
    pub max_concurrent_endpoints: usize,
    /// Attempts per request on transient network errors.
    pub retry_attempts: u32,
    /// Milliseconds between transient retries.
    pub retry_backoff_ms: u64,
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
}

/// Job queue round-trip settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct QueueSettings {
    /// Queue URL override; otherwise taken from stack outputs.
    pub url: Option<String>,
    /// Results bucket override; otherwise taken from stack outputs.
    pub results_bucket: Option<String>,
    /// Key prefix under which results are written.
    pub results_prefix: String,
    /// Seconds to wait after enqueueing before looking for results.
    pub grace_secs: u64,
}

/// Auto-stop policy settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PolicySettings {
    /// Name prefix of the scheduled scale-down rule.
    pub auto_stop_rule_prefix: Option<String>,
}

/// Cost reporting settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CostSettings {
    /// Cost allocation tag key used to attribute spend.
    pub tag_key: String,
}

/// Log retrieval settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LogSettings {
    /// Log group override.
    pub group: Option<String>,
}

impl Default for ProjectSettings {
    fn default() -> Self {
        Self {
            name: String::from("llm-testgen"),
            managed_by: String::from("llmdeploy"),
        }
    }
}

impl Default for TemplateSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("infrastructure/llm-stack.yaml"),
            url: None,
            capabilities: vec![String::from("CAPABILITY_NAMED_IAM")],
        }
    }
}

impl Default for StackSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: 15,
            timeout_secs: 1800,
            endpoint_output: String::from("ServiceEndpoint"),
            cluster_output: String::from("ClusterName"),
            service_output: String::from("ServiceName"),
            queue_output: String::from("JobQueueUrl"),
            bucket_output: String::from("ResultsBucketName"),
        }
    }
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            cluster: None,
            service: None,
            container_port: 11434,
            local_fallback: None,
            default_running_count: 2,
            stable_timeout_secs: 600,
            stop_timeout_secs: 300,
            poll_interval_secs: 10,
            restart_pause_secs: 10,
        }
    }
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            health_path: String::from("/"),
            capability_path: String::from("/api/tags"),
            inference_path: String::from("/api/generate"),
            liveness_timeout_secs: 300,
            liveness_interval_secs: 5,
            inference_timeout_secs: 60,
            model: None,
            prompt: String::from("Tell me who was the president of USA in 2000"),
            max_tokens: 50,
            required_models: Vec::new(),
            max_concurrent_endpoints: 10,
            retry_attempts: 3,
            retry_backoff_ms: 2000,
            request_timeout_secs: 10,
        }
    }
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            url: None,
            results_bucket: None,
            results_prefix: String::from("test-results/"),
            grace_secs: 30,
        }
    }
}

impl Default for CostSettings {
    fn default() -> Self {
        Self {
            tag_key: String::from("Project"),
        }
    }
}

impl OrchestratorSettings {
    /// Default cluster name for an environment.
    #[must_use]
    pub fn default_cluster(&self, environment: Environment) -> String {
        format!("{}-{environment}-cluster", self.project.name)
    }

    /// Default service name for an environment.
    #[must_use]
    pub fn default_service(&self, environment: Environment) -> String {
        format!("{}-{environment}-service", self.project.name)
    }

    /// Auto-stop rule prefix for an environment.
    #[must_use]
    pub fn auto_stop_rule_prefix(&self, environment: Environment) -> String {
        self.policy
            .auto_stop_rule_prefix
            .clone()
            .unwrap_or_else(|| format!("{}-{environment}-auto-stop", self.project.name))
    }

    /// Log group for an environment.
    #[must_use]
    pub fn log_group(&self, environment: Environment) -> String {
        self.logs
            .group
            .clone()
            .unwrap_or_else(|| format!("/ecs/{}-{environment}", self.project.name))
    }
}

/// Stack deployment timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeployOptions {
    /// Delay between status polls.
    pub poll_interval: Duration,
    /// Deadline for reaching a terminal state.
    pub timeout: Duration,
}

/// Probe pipeline parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOptions {
    /// Liveness path.
    pub health_path: String,
    /// Capability listing path.
    pub capability_path: String,
    /// Inference path.
    pub inference_path: String,
    /// Liveness retry deadline.
    pub liveness_timeout: Duration,
    /// Delay between liveness attempts.
    pub liveness_interval: Duration,
    /// Inference round-trip deadline.
    pub inference_timeout: Duration,
    /// Model override for inference.
    pub model: Option<String>,
    /// Inference prompt.
    pub prompt: String,
    /// Inference token budget.
    pub max_tokens: u32,
    /// Models expected in the listing.
    pub required_models: Vec<String>,
    /// Concurrency cap across endpoints.
    pub max_concurrent_endpoints: usize,
    /// Attempts per request on transient errors.
    pub retry_attempts: u32,
    /// Delay between transient retries.
    pub retry_backoff: Duration,
    /// Per-request timeout.
    pub request_timeout: Duration,
    /// Delay between enqueue and result lookup.
    pub queue_grace: Duration,
}

/// Lifecycle timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleOptions {
    /// Desired count used by `start` from zero.
    pub default_running_count: u32,
    /// Deadline for scale-up stabilisation.
    pub stable_timeout: Duration,
    /// Deadline for drain after stop.
    pub stop_timeout: Duration,
    /// Delay between service polls.
    pub poll_interval: Duration,
    /// Pause between stop and scale in a restart.
    pub restart_pause: Duration,
}

impl From<&OrchestratorSettings> for DeployOptions {
    fn from(settings: &OrchestratorSettings) -> Self {
        Self {
            poll_interval: Duration::from_secs(settings.stack.poll_interval_secs),
            timeout: Duration::from_secs(settings.stack.timeout_secs),
        }
    }
}

impl From<&OrchestratorSettings> for ProbeOptions {
    fn from(settings: &OrchestratorSettings) -> Self {
        let probes = &settings.probes;
        Self {
            health_path: probes.health_path.clone(),
            capability_path: probes.capability_path.clone(),
            inference_path: probes.inference_path.clone(),
            liveness_timeout: Duration::from_secs(probes.liveness_timeout_secs),
            liveness_interval: Duration::from_secs(probes.liveness_interval_secs),
            inference_timeout: Duration::from_secs(probes.inference_timeout_secs),
            model: probes.model.clone(),
            prompt: probes.prompt.clone(),
            max_tokens: probes.max_tokens,
            required_models: probes.required_models.clone(),
            max_concurrent_endpoints: probes.max_concurrent_endpoints.max(1),
            retry_attempts: probes.retry_attempts.max(1),
            retry_backoff: Duration::from_millis(probes.retry_backoff_ms),
            request_timeout: Duration::from_secs(probes.request_timeout_secs),
            queue_grace: Duration::from_secs(settings.queue.grace_secs),
        }
    }
}

impl From<&OrchestratorSettings> for LifecycleOptions {
    fn from(settings: &OrchestratorSettings) -> Self {
        let service = &settings.service;
        Self {
            default_running_count: service.default_running_count,
            stable_timeout: Duration::from_secs(service.stable_timeout_secs),
            stop_timeout: Duration::from_secs(service.stop_timeout_secs),
            poll_interval: Duration::from_secs(service.poll_interval_secs),
            restart_pause: Duration::from_secs(service.restart_pause_secs),
        }
    }
}

impl Default for ProbeOptions {
    fn default() -> Self {
        Self::from(&OrchestratorSettings::default())
    }
}
