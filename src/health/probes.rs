//! Layered health probes.
//!
//! Each endpoint runs a fixed chain: liveness, capability listing,
//! inference, then the queue round-trip and the auto-stop policy check when
//! those are configured. A failed liveness probe records every remaining
//! probe of that endpoint as skipped. Endpoints are probed concurrently up to
//! a cap; results come back grouped per endpoint in input order.

use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::cloud::{ObjectStoreApi, QueueApi, QueueJob, ScheduleApi};
use crate::config::ProbeOptions;
use crate::error::Result;
use crate::poll::{Poll, PollOutcome, poll_until};
use crate::stack::Endpoint;

use super::client::{CallError, ServiceClient, Timed, millis};

/// Detail recorded for probes not run after a liveness failure.
pub const SKIPPED_DETAIL: &str = "skipped: liveness failed";

/// Probe identity, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeKind {
    /// Health path answers 2xx.
    Liveness,
    /// Model listing is non-empty.
    Capability,
    /// One inference round-trip.
    Inference,
    /// Job queue round-trip.
    Queue,
    /// Auto-stop schedule matches the request.
    Policy,
}

impl fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Liveness => "liveness",
            Self::Capability => "capability",
            Self::Inference => "inference",
            Self::Queue => "queue",
            Self::Policy => "policy",
        };
        write!(f, "{s}")
    }
}

/// Advisory inference latency class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LatencyClass {
    /// Under 30s.
    Excellent,
    /// Under 60s.
    Good,
    /// Under 120s.
    Acceptable,
    /// 120s or more.
    Slow,
}

impl LatencyClass {
    /// Classifies an inference latency.
    #[must_use]
    pub const fn classify(latency: Duration) -> Self {
        match latency.as_secs() {
            0..30 => Self::Excellent,
            30..60 => Self::Good,
            60..120 => Self::Acceptable,
            _ => Self::Slow,
        }
    }
}

impl fmt::Display for LatencyClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Excellent => "EXCELLENT",
            Self::Good => "GOOD",
            Self::Acceptable => "ACCEPTABLE",
            Self::Slow => "SLOW",
        };
        write!(f, "{s}")
    }
}

/// Outcome of one probe against one endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeResult {
    /// Probe that ran.
    pub probe: ProbeKind,
    /// Endpoint probed.
    pub endpoint: Endpoint,
    /// Verdict. Warnings do not fail a probe.
    pub passed: bool,
    /// Latency of the measured call.
    pub latency_ms: u64,
    /// Human-readable outcome.
    pub detail: String,
    /// Non-fatal findings.
    pub warnings: Vec<String>,
}

impl ProbeResult {
    /// A passing result.
    #[must_use]
    pub fn pass(probe: ProbeKind, endpoint: &Endpoint, latency_ms: u64, detail: impl Into<String>) -> Self {
        Self {
            probe,
            endpoint: endpoint.clone(),
            passed: true,
            latency_ms,
            detail: detail.into(),
            warnings: Vec::new(),
        }
    }

    /// A failing result.
    #[must_use]
    pub fn fail(probe: ProbeKind, endpoint: &Endpoint, latency_ms: u64, detail: impl Into<String>) -> Self {
        Self {
            passed: false,
            ..Self::pass(probe, endpoint, latency_ms, detail)
        }
    }

    /// A probe not run because liveness failed.
    #[must_use]
    pub fn skipped(probe: ProbeKind, endpoint: &Endpoint) -> Self {
        Self::fail(probe, endpoint, 0, SKIPPED_DETAIL)
    }

    /// Attaches warnings.
    #[must_use]
    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings = warnings;
        self
    }

    /// Returns true if the probe was skipped.
    #[must_use]
    pub fn is_skipped(&self) -> bool {
        self.detail.starts_with("skipped:")
    }
}

/// Where the queue round-trip sends and looks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueTarget {
    /// Queue URL.
    pub queue_url: String,
    /// Results bucket, if known.
    pub bucket: Option<String>,
    /// Results key prefix; the UTC date path is appended.
    pub prefix: String,
}

/// What the policy probe expects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyTarget {
    /// Rule name prefix.
    pub rule_prefix: String,
    /// Whether auto-stop was requested.
    pub auto_stop_expected: bool,
}

struct QueueProbe {
    queue: Arc<dyn QueueApi>,
    objects: Arc<dyn ObjectStoreApi>,
    target: QueueTarget,
}

struct PolicyProbe {
    schedules: Arc<dyn ScheduleApi>,
    target: PolicyTarget,
}

/// Runs the probe chain across endpoints.
pub struct HealthProbeEngine {
    client: ServiceClient,
    options: ProbeOptions,
    queue: Option<QueueProbe>,
    policy: Option<PolicyProbe>,
}

impl HealthProbeEngine {
    /// Creates an engine with the HTTP probes only.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(options: ProbeOptions) -> Result<Self> {
        Ok(Self {
            client: ServiceClient::new(&options)?,
            options,
            queue: None,
            policy: None,
        })
    }

    /// Enables the queue round-trip probe.
    #[must_use]
    pub fn with_queue(
        mut self,
        queue: Arc<dyn QueueApi>,
        objects: Arc<dyn ObjectStoreApi>,
        target: QueueTarget,
    ) -> Self {
        self.queue = Some(QueueProbe {
            queue,
            objects,
            target,
        });
        self
    }

    /// Enables the auto-stop policy probe.
    #[must_use]
    pub fn with_policy(mut self, schedules: Arc<dyn ScheduleApi>, target: PolicyTarget) -> Self {
        self.policy = Some(PolicyProbe { schedules, target });
        self
    }

    /// Probes the engine will run per endpoint, in order.
    #[must_use]
    pub fn probe_kinds(&self) -> Vec<ProbeKind> {
        let mut kinds = vec![ProbeKind::Liveness, ProbeKind::Capability, ProbeKind::Inference];
        if self.queue.is_some() {
            kinds.push(ProbeKind::Queue);
        }
        if self.policy.is_some() {
            kinds.push(ProbeKind::Policy);
        }
        kinds
    }

    /// Runs every probe against every endpoint.
    ///
    /// `liveness_timeout` bounds how long each endpoint may take to come
    /// alive. Returns exactly `endpoints.len() * probe_kinds().len()`
    /// results.
    pub async fn run_probes(&self, endpoints: &[Endpoint], liveness_timeout: Duration) -> Vec<ProbeResult> {
        info!(
            "Probing {} endpoint(s), up to {} concurrently",
            endpoints.len(),
            self.options.max_concurrent_endpoints
        );

        let chains: Vec<Vec<ProbeResult>> = stream::iter(endpoints)
            .map(|endpoint| self.probe_endpoint(endpoint, liveness_timeout))
            .buffered(self.options.max_concurrent_endpoints.max(1))
            .collect()
            .await;

        chains.into_iter().flatten().collect()
    }

    async fn probe_endpoint(&self, endpoint: &Endpoint, liveness_timeout: Duration) -> Vec<ProbeResult> {
        let kinds = self.probe_kinds();
        let mut results = Vec::with_capacity(kinds.len());

        let liveness = self.liveness(endpoint, liveness_timeout).await;
        let alive = liveness.passed;
        results.push(liveness);

        if !alive {
            warn!("{} is not alive; skipping remaining probes", endpoint.url);
            results.extend(kinds[1..].iter().map(|kind| ProbeResult::skipped(*kind, endpoint)));
            return results;
        }

        let (capability, models) = self.capability(endpoint).await;
        results.push(capability);
        results.push(self.inference(endpoint, &models).await);

        if let Some(queue) = &self.queue {
            results.push(self.queue_round_trip(queue, endpoint).await);
        }
        if let Some(policy) = &self.policy {
            results.push(check_policy(policy, endpoint).await);
        }

        results
    }

    async fn liveness(&self, endpoint: &Endpoint, timeout: Duration) -> ProbeResult {
        let client = &self.client;
        let url = endpoint.url.as_str();

        let outcome = poll_until(self.options.liveness_interval, timeout, move || {
            check_alive(client, url)
        })
        .await;

        match outcome {
            Ok(PollOutcome::Ready { value, attempts }) => ProbeResult::pass(
                ProbeKind::Liveness,
                endpoint,
                millis(value.latency),
                format!("HTTP {} after {attempts} attempt(s)", value.value),
            ),
            Ok(PollOutcome::TimedOut {
                last,
                attempts,
                elapsed,
            }) => {
                let last = last.map_or_else(|| String::from("no response"), |e| e.to_string());
                ProbeResult::fail(
                    ProbeKind::Liveness,
                    endpoint,
                    0,
                    format!(
                        "not alive after {}s and {attempts} attempt(s): {last}",
                        elapsed.as_secs()
                    ),
                )
            }
            Err(e) => ProbeResult::fail(ProbeKind::Liveness, endpoint, 0, e.to_string()),
        }
    }

    async fn capability(&self, endpoint: &Endpoint) -> (ProbeResult, Vec<String>) {
        match self.client.list_models(&endpoint.url).await {
            Ok(Timed { value: models, latency }) if models.is_empty() => (
                ProbeResult::fail(
                    ProbeKind::Capability,
                    endpoint,
                    millis(latency),
                    "capability listing is empty",
                ),
                models,
            ),
            Ok(Timed { value: models, latency }) => {
                let warnings: Vec<String> = self
                    .options
                    .required_models
                    .iter()
                    .filter(|required| !models.contains(required))
                    .map(|missing| format!("required model {missing} is not listed"))
                    .collect();

                let result = ProbeResult::pass(
                    ProbeKind::Capability,
                    endpoint,
                    millis(latency),
                    format!("{} model(s): {}", models.len(), models.join(", ")),
                )
                .with_warnings(warnings);
                (result, models)
            }
            Err(e) => (
                ProbeResult::fail(ProbeKind::Capability, endpoint, 0, e.to_string()),
                Vec::new(),
            ),
        }
    }

    async fn inference(&self, endpoint: &Endpoint, models: &[String]) -> ProbeResult {
        let Some(model) = self.options.model.as_deref().or_else(|| models.first().map(String::as_str)) else {
            return ProbeResult::fail(
                ProbeKind::Inference,
                endpoint,
                0,
                "no model configured or listed to run inference with",
            );
        };

        debug!("Running inference on {} with {model}", endpoint.url);
        match self
            .client
            .generate(
                &endpoint.url,
                model,
                &self.options.prompt,
                self.options.max_tokens,
                self.options.inference_timeout,
            )
            .await
        {
            Ok(Timed { value, latency }) => {
                let class = LatencyClass::classify(latency);
                ProbeResult::pass(
                    ProbeKind::Inference,
                    endpoint,
                    millis(latency),
                    format!("{model} answered {} chars, latency {class}", value.chars().count()),
                )
            }
            Err(e) => ProbeResult::fail(
                ProbeKind::Inference,
                endpoint,
                0,
                format!("{model}: {e}"),
            ),
        }
    }

    async fn queue_round_trip(&self, probe: &QueueProbe, endpoint: &Endpoint) -> ProbeResult {
        let target = &probe.target;
        let started = Utc::now();
        let job = QueueJob::probe(started);
        let clock = std::time::Instant::now();

        let message_id = match probe.queue.send_job(&target.queue_url, &job).await {
            Ok(id) => id,
            Err(e) => {
                return ProbeResult::fail(
                    ProbeKind::Queue,
                    endpoint,
                    millis(clock.elapsed()),
                    format!("enqueue to {} failed: {e}", target.queue_url),
                );
            }
        };
        let latency_ms = millis(clock.elapsed());
        let accepted = format!("job {} accepted as message {message_id}", job.id);

        let Some(bucket) = &target.bucket else {
            return ProbeResult::pass(ProbeKind::Queue, endpoint, latency_ms, accepted)
                .with_warnings(vec![String::from("no results bucket configured; result not checked")]);
        };

        tokio::time::sleep(self.options.queue_grace).await;

        let prefix = format!("{}{}", target.prefix, started.format("%Y/%m/%d/"));
        let warning = match probe.objects.list_objects_since(bucket, &prefix, started).await {
            Ok(objects) if !objects.is_empty() => {
                return ProbeResult::pass(
                    ProbeKind::Queue,
                    endpoint,
                    latency_ms,
                    format!("{accepted}; {} new result(s) under s3://{bucket}/{prefix}", objects.len()),
                );
            }
            Ok(_) => format!(
                "no new result under s3://{bucket}/{prefix} after {}s",
                self.options.queue_grace.as_secs()
            ),
            Err(e) => format!("results lookup failed: {e}"),
        };

        ProbeResult::pass(ProbeKind::Queue, endpoint, latency_ms, accepted).with_warnings(vec![warning])
    }
}

async fn check_alive(client: &ServiceClient, url: &str) -> Result<Poll<Timed<u16>, CallError>> {
    match client.check_health(url).await {
        Ok(timed) => Ok(Poll::Ready(timed)),
        Err(e @ CallError::Invalid(_)) => Err(e.into_probe_error("liveness", url).into()),
        Err(e) => Ok(Poll::Pending(e)),
    }
}

async fn check_policy(probe: &PolicyProbe, endpoint: &Endpoint) -> ProbeResult {
    let target = &probe.target;
    let clock = std::time::Instant::now();

    let rules = match probe.schedules.list_rules(&target.rule_prefix).await {
        Ok(rules) => rules,
        Err(e) => {
            return ProbeResult::fail(
                ProbeKind::Policy,
                endpoint,
                millis(clock.elapsed()),
                format!("could not list rules with prefix {}: {e}", target.rule_prefix),
            );
        }
    };
    let latency_ms = millis(clock.elapsed());

    let enabled: Vec<&str> = rules
        .iter()
        .filter(|r| r.enabled)
        .map(|r| r.name.as_str())
        .collect();

    match (target.auto_stop_expected, enabled.is_empty()) {
        (true, false) => ProbeResult::pass(
            ProbeKind::Policy,
            endpoint,
            latency_ms,
            format!("auto-stop rule enabled: {}", enabled.join(", ")),
        ),
        (true, true) => ProbeResult::fail(
            ProbeKind::Policy,
            endpoint,
            latency_ms,
            format!("auto-stop requested but no enabled rule starts with {}", target.rule_prefix),
        ),
        (false, true) => ProbeResult::pass(
            ProbeKind::Policy,
            endpoint,
            latency_ms,
            "auto-stop not requested and no rule enabled",
        ),
        (false, false) => ProbeResult::fail(
            ProbeKind::Policy,
            endpoint,
            latency_ms,
            format!("auto-stop not requested but rule(s) enabled: {}", enabled.join(", ")),
        ),
    }
}

impl fmt::Debug for HealthProbeEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HealthProbeEngine")
            .field("probes", &self.probe_kinds())
            .finish_non_exhaustive()
    }
}
