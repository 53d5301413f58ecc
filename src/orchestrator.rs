//! Top-level pipeline.
//!
//! Wires the components together for each CLI operation:
//!
//! - deploy: validate, create/update, resolve endpoints, probe, aggregate
//! - status: stack, service counts, endpoints, queue depth, optional health
//! - lifecycle: start/stop/scale/restart against the stack's service
//! - cost and logs
//!
//! The orchestrator holds no state between invocations; every call
//! re-reads the platform.

use chrono::{Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::cloud::{CloudClients, LogEvent, QueueDepth, ServiceState, StackStatus};
use crate::config::{
    ConfigValidator, DeployOptions, DeploymentRequest, Environment, LifecycleOptions,
    OrchestratorSettings, ProbeOptions, TAG_AUTO_STOP, TAG_ENVIRONMENT, ValidatedRequest,
    stack_name,
};
use crate::cost::{CostReport, CostReporter};
use crate::error::{DiscoveryError, OrchestratorError, Result};
use crate::health::{HealthProbeEngine, HealthReport, HealthReportAggregator, PolicyTarget, QueueTarget};
use crate::lifecycle::{LifecycleController, LifecycleOperation, LifecyclePhase, ensure_supported};
use crate::stack::{
    EndpointResolver, Resolution, ServiceIdentity, StackDeployer, StackDeployment, StackDiff,
    StackHandle, TemplateValidationResult,
};

/// Result of `deploy`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum DeployReport {
    /// Template validation only.
    DryRun {
        /// Validation result.
        validation: TemplateValidationResult,
    },
    /// Stack deployed and verified.
    Deployed {
        /// Stack outcome.
        deployment: StackDeployment,
        /// Endpoints probed.
        resolution: Resolution,
        /// Aggregated probe results.
        health: HealthReport,
    },
}

impl DeployReport {
    /// Process exit code: the health verdict's, or 0 for a valid dry run.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::DryRun { validation } => i32::from(!validation.is_valid()),
            Self::Deployed { health, .. } => health.exit_code(),
        }
    }
}

/// Service part of a status snapshot.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSnapshot {
    /// Cluster and service.
    pub identity: ServiceIdentity,
    /// Live counts.
    pub state: ServiceState,
    /// Phase of `state`.
    pub phase: LifecyclePhase,
}

/// Result of `status`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    /// Stack as observed.
    pub stack: StackHandle,
    /// Service counts, when the deployment has a service.
    pub service: Option<ServiceSnapshot>,
    /// Resolved endpoints, or why there are none.
    pub resolution: Resolution,
    /// Queue depth, when a queue is configured.
    pub queue: Option<QueueDepth>,
    /// Probe results, when requested.
    pub health: Option<HealthReport>,
}

impl StatusSnapshot {
    /// Process exit code: the health verdict's, or 0.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        self.health.as_ref().map_or(0, HealthReport::exit_code)
    }
}

/// Coordinates validation, deployment, discovery, probing and lifecycle.
pub struct Orchestrator {
    settings: OrchestratorSettings,
    clouds: CloudClients,
    region: String,
    validator: ConfigValidator,
    deploy_options: DeployOptions,
    probe_options: ProbeOptions,
    lifecycle_options: LifecycleOptions,
}

impl Orchestrator {
    /// Creates an orchestrator for `region`.
    #[must_use]
    pub fn new(settings: OrchestratorSettings, clouds: CloudClients, region: &str) -> Self {
        Self {
            deploy_options: DeployOptions::from(&settings),
            probe_options: ProbeOptions::from(&settings),
            lifecycle_options: LifecycleOptions::from(&settings),
            settings,
            clouds,
            region: region.to_string(),
            validator: ConfigValidator::new(),
        }
    }

    /// Overrides deploy timings.
    #[must_use]
    pub const fn with_deploy_options(mut self, options: DeployOptions) -> Self {
        self.deploy_options = options;
        self
    }

    /// Overrides probe parameters.
    #[must_use]
    pub fn with_probe_options(mut self, options: ProbeOptions) -> Self {
        self.probe_options = options;
        self
    }

    /// Overrides lifecycle timings.
    #[must_use]
    pub const fn with_lifecycle_options(mut self, options: LifecycleOptions) -> Self {
        self.lifecycle_options = options;
        self
    }

    /// Settings in use.
    #[must_use]
    pub const fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Validates a request.
    ///
    /// # Errors
    ///
    /// Returns a validation error naming the offending field.
    pub fn validate(&self, request: &DeploymentRequest) -> Result<ValidatedRequest> {
        self.validator.validate(request)
    }

    /// Computes what deploying `request` would change.
    ///
    /// # Errors
    ///
    /// Returns an error if the stack cannot be described.
    pub async fn plan(&self, request: &ValidatedRequest) -> Result<StackDiff> {
        self.deployer().plan(request).await
    }

    /// Runs the full deploy pipeline, or validation only for a dry run.
    ///
    /// # Errors
    ///
    /// Returns an error tagged with the failing stage.
    pub async fn deploy(&self, request: &ValidatedRequest) -> Result<DeployReport> {
        let deployer = self.deployer();

        if request.dry_run() {
            let validation = deployer.dry_run_validate(request).await?;
            return Ok(DeployReport::DryRun { validation });
        }

        let deployment = deployer.deploy(request).await?;
        let handle = &deployment.handle;

        let resolution = self.resolver().resolve(handle, request.environment()).await?;
        let endpoints = resolution.clone().require_endpoints()?;

        let engine = self.probe_engine(handle, request.environment(), Some(request.auto_stop()))?;
        let results = engine
            .run_probes(&endpoints, self.probe_options.liveness_timeout)
            .await;
        let health = HealthReportAggregator::new().aggregate(results);

        info!(
            "Deployed {} ({:?}); health {}",
            handle.stack_name, deployment.action, health.verdict
        );

        Ok(DeployReport::Deployed {
            deployment,
            resolution,
            health,
        })
    }

    /// Describes the stack for `environment`.
    ///
    /// # Errors
    ///
    /// Returns an error if the stack cannot be described.
    pub async fn stack(&self, environment: Environment) -> Result<StackHandle> {
        let name = stack_name(&self.settings.project.name, environment);
        self.deployer().current(&name, &self.region).await
    }

    /// Builds a lifecycle controller for the stack's service.
    ///
    /// # Errors
    ///
    /// Returns an error if the stack does not exist or has no container
    /// service.
    pub async fn lifecycle(
        &self,
        environment: Environment,
        operation: LifecycleOperation,
    ) -> Result<LifecycleController> {
        let handle = self.stack(environment).await?;
        if handle.status == StackStatus::NotFound {
            return Err(DiscoveryError::StackNotFound {
                stack: handle.stack_name,
            }
            .into());
        }
        ensure_supported(operation, handle.deployment_type())?;

        let identity = self.resolver().service_identity(&handle, environment);
        Ok(LifecycleController::new(
            self.clouds.services.clone(),
            identity,
            self.lifecycle_options,
        ))
    }

    /// Collects a status snapshot; probes as well when `with_health`.
    ///
    /// # Errors
    ///
    /// Returns an error if the stack cannot be described or access is denied.
    pub async fn status(&self, environment: Environment, with_health: bool) -> Result<StatusSnapshot> {
        let stack = self.stack(environment).await?;
        let resolver = self.resolver();

        let service = if stack.deployment_type().is_some_and(|t| !t.has_container_service())
            || stack.status == StackStatus::NotFound
        {
            None
        } else {
            let identity = resolver.service_identity(&stack, environment);
            match self
                .clouds
                .services
                .describe_service(&identity.cluster, &identity.service)
                .await
            {
                Ok(Some(state)) => Some(ServiceSnapshot {
                    phase: LifecyclePhase::of(&state),
                    identity,
                    state,
                }),
                Ok(None) => {
                    warn!("Service {identity} not found");
                    None
                }
                Err(e @ OrchestratorError::Permission(_)) => return Err(e),
                Err(e) => {
                    warn!("Could not read service {identity}: {e}");
                    None
                }
            }
        };

        let resolution = resolver.resolve(&stack, environment).await?;

        let queue = match self.queue_target(&stack) {
            Some(target) => match self.clouds.queue.queue_depth(&target.queue_url).await {
                Ok(depth) => Some(depth),
                Err(e) => {
                    warn!("Could not read queue depth for {}: {e}", target.queue_url);
                    None
                }
            },
            None => None,
        };

        let health = if with_health {
            let auto_stop = stack.tags.get(TAG_AUTO_STOP).and_then(|v| v.parse::<bool>().ok());
            let engine = self.probe_engine(&stack, environment, auto_stop)?;
            let results = engine
                .run_probes(&resolution.endpoints, self.probe_options.liveness_timeout)
                .await;
            Some(HealthReportAggregator::new().aggregate(results))
        } else {
            None
        };

        Ok(StatusSnapshot {
            stack,
            service,
            resolution,
            queue,
            health,
        })
    }

    /// Month-to-date spend for the deployment's tags.
    ///
    /// # Errors
    ///
    /// Returns an error if spend cannot be read.
    pub async fn cost(&self, environment: Environment) -> Result<CostReport> {
        let tags = BTreeMap::from([
            (self.settings.cost.tag_key.clone(), self.settings.project.name.clone()),
            (TAG_ENVIRONMENT.to_string(), environment.to_string()),
        ]);
        CostReporter::new(self.clouds.costs.clone())
            .current_period_cost(&tags)
            .await
    }

    /// Recent service log events.
    ///
    /// # Errors
    ///
    /// Returns an error if the log group cannot be read.
    pub async fn logs(&self, environment: Environment, since_minutes: u32, limit: u32) -> Result<Vec<LogEvent>> {
        let group = self.settings.log_group(environment);
        let since = Utc::now() - ChronoDuration::minutes(i64::from(since_minutes));
        self.clouds.logs.recent_events(&group, since, limit).await
    }

    fn deployer(&self) -> StackDeployer {
        StackDeployer::new(self.clouds.stacks.clone(), &self.settings).with_options(self.deploy_options)
    }

    fn resolver(&self) -> EndpointResolver {
        EndpointResolver::new(self.clouds.services.clone(), &self.settings)
    }

    fn queue_target(&self, stack: &StackHandle) -> Option<QueueTarget> {
        let queue = &self.settings.queue;
        let outputs = &stack.outputs;

        let queue_url = queue
            .url
            .clone()
            .or_else(|| outputs.get(&self.settings.stack.queue_output).cloned())?;
        let bucket = queue
            .results_bucket
            .clone()
            .or_else(|| outputs.get(&self.settings.stack.bucket_output).cloned());

        Some(QueueTarget {
            queue_url,
            bucket,
            prefix: queue.results_prefix.clone(),
        })
    }

    fn probe_engine(
        &self,
        stack: &StackHandle,
        environment: Environment,
        auto_stop: Option<bool>,
    ) -> Result<HealthProbeEngine> {
        let mut engine = HealthProbeEngine::new(self.probe_options.clone())?;

        if let Some(target) = self.queue_target(stack) {
            engine = engine.with_queue(self.clouds.queue.clone(), self.clouds.objects.clone(), target);
        }
        if let Some(expected) = auto_stop {
            engine = engine.with_policy(
                self.clouds.schedules.clone(),
                PolicyTarget {
                    rule_prefix: self.settings.auto_stop_rule_prefix(environment),
                    auto_stop_expected: expected,
                },
            );
        }

        Ok(engine)
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("region", &self.region)
            .field("project", &self.settings.project.name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::{
        MockCostApi, MockLogApi, MockObjectStoreApi, MockQueueApi, MockScheduleApi,
        MockServiceApi, MockStackApi, ScheduleRule, StackDescription, TemplateValidation,
        UpdateOutcome,
    };
    use crate::error::Stage;
    use crate::health::Verdict;
    use crate::stack::DeployAction;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Mocks {
        stacks: MockStackApi,
        services: MockServiceApi,
        queue: MockQueueApi,
        schedules: MockScheduleApi,
    }

    impl Mocks {
        fn new() -> Self {
            Self {
                stacks: MockStackApi::new(),
                services: MockServiceApi::new(),
                queue: MockQueueApi::new(),
                schedules: MockScheduleApi::new(),
            }
        }

        fn into_orchestrator(self) -> Orchestrator {
            let clouds = CloudClients {
                stacks: Arc::new(self.stacks),
                services: Arc::new(self.services),
                queue: Arc::new(self.queue),
                objects: Arc::new(MockObjectStoreApi::new()),
                schedules: Arc::new(self.schedules),
                costs: Arc::new(MockCostApi::new()),
                logs: Arc::new(MockLogApi::new()),
            };

            let mut settings = OrchestratorSettings::default();
            settings.template.url = Some(String::from("https://templates.example.com/llm.yaml"));

            Orchestrator::new(settings, clouds, "us-east-1")
                .with_deploy_options(DeployOptions {
                    poll_interval: Duration::from_millis(1),
                    timeout: Duration::from_secs(5),
                })
                .with_probe_options(ProbeOptions {
                    liveness_timeout: Duration::from_millis(50),
                    liveness_interval: Duration::from_millis(5),
                    retry_backoff: Duration::from_millis(1),
                    ..ProbeOptions::default()
                })
        }
    }

    fn request(dry_run: bool) -> ValidatedRequest {
        ConfigValidator::new()
            .validate(&DeploymentRequest {
                environment: String::from("dev"),
                deployment_type: String::from("ecs-fargate"),
                region: String::from("us-east-1"),
                instance_count: 2,
                auto_stop: true,
                dry_run,
            })
            .unwrap()
    }

    async fn llm_server() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"models": [{"name": "llama3.2:1b"}]})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"response": "Bill Clinton"})))
            .mount(&server)
            .await;
        server
    }

    fn complete_stack(req: &ValidatedRequest, endpoint: &str) -> StackDescription {
        StackDescription {
            name: String::from("llm-testgen-dev"),
            raw_status: String::from("CREATE_COMPLETE"),
            reason: None,
            outputs: BTreeMap::from([(String::from("ServiceEndpoint"), endpoint.to_string())]),
            parameters: req.parameters(),
            tags: req.tags("llm-testgen", "llmdeploy"),
        }
    }

    #[tokio::test]
    async fn test_dry_run_issues_no_mutation() {
        let mut mocks = Mocks::new();
        mocks.stacks.expect_validate_template().times(1).returning(|_| {
            Ok(TemplateValidation {
                parameters: vec![
                    String::from("Environment"),
                    String::from("DeploymentType"),
                    String::from("InstanceCount"),
                    String::from("AutoStop"),
                ],
                ..TemplateValidation::default()
            })
        });
        mocks.stacks.expect_create_stack().times(0);
        mocks.stacks.expect_update_stack().times(0);
        mocks.services.expect_set_desired_count().times(0);
        mocks.queue.expect_send_job().times(0);

        let orchestrator = mocks.into_orchestrator();
        let report = orchestrator.deploy(&request(true)).await.unwrap();

        assert!(matches!(report, DeployReport::DryRun { .. }));
        assert_eq!(report.exit_code(), 0);
    }

    #[tokio::test]
    async fn test_redeploy_verifies_the_existing_stack() {
        let server = llm_server().await;
        let uri = server.uri();

        let mut mocks = Mocks::new();
        let req = request(false);
        let stack = complete_stack(&req, &uri);

        mocks
            .stacks
            .expect_describe_stack()
            .returning(move |_| Ok(Some(stack.clone())));
        mocks
            .stacks
            .expect_update_stack()
            .times(1)
            .returning(|_| Ok(UpdateOutcome::NoChanges));
        mocks
            .services
            .expect_list_task_addresses()
            .returning(|_, _| Ok(Vec::new()));
        mocks
            .schedules
            .expect_list_rules()
            .withf(|prefix| prefix == "llm-testgen-dev-auto-stop")
            .returning(|prefix| {
                Ok(vec![ScheduleRule {
                    name: format!("{prefix}-rule"),
                    enabled: true,
                    schedule: Some(String::from("rate(30 minutes)")),
                }])
            });

        let report = mocks.into_orchestrator().deploy(&req).await.unwrap();

        let DeployReport::Deployed {
            deployment,
            resolution,
            health,
        } = report
        else {
            panic!("expected a deployed report");
        };
        assert_eq!(deployment.action, DeployAction::Unchanged);
        assert_eq!(resolution.endpoints.len(), 1);
        assert_eq!(health.total_checks, 4);
        assert_eq!(health.passed, 4);
        assert_eq!(health.verdict, Verdict::Healthy);
    }

    #[tokio::test]
    async fn test_deploy_without_endpoints_fails_in_resolve_stage() {
        let mut mocks = Mocks::new();
        let req = request(false);
        let mut stack = complete_stack(&req, "");
        stack.outputs.clear();

        mocks
            .stacks
            .expect_describe_stack()
            .returning(move |_| Ok(Some(stack.clone())));
        mocks
            .stacks
            .expect_update_stack()
            .returning(|_| Ok(UpdateOutcome::NoChanges));
        mocks
            .services
            .expect_list_task_addresses()
            .returning(|_, _| Ok(Vec::new()));

        let orchestrator = mocks.into_orchestrator();
        assert!(orchestrator.settings().service.local_fallback.is_none());

        let err = orchestrator.deploy(&req).await.unwrap_err();
        assert_eq!(err.stage(), Some(Stage::Resolve));
        assert!(matches!(
            err,
            OrchestratorError::Discovery(DiscoveryError::NoEndpoints { .. })
        ));
        assert!(err.to_string().contains("ServiceEndpoint"));
    }

    #[tokio::test]
    async fn test_lifecycle_requires_existing_container_stack() {
        let mut mocks = Mocks::new();
        mocks.stacks.expect_describe_stack().returning(|_| Ok(None));
        let err = mocks
            .into_orchestrator()
            .lifecycle(Environment::Dev, LifecycleOperation::Stop)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Discovery(DiscoveryError::StackNotFound { .. })
        ));

        let mut mocks = Mocks::new();
        mocks.stacks.expect_describe_stack().returning(|_| {
            Ok(Some(StackDescription {
                name: String::from("llm-testgen-dev"),
                raw_status: String::from("UPDATE_COMPLETE"),
                tags: BTreeMap::from([(String::from("DeploymentType"), String::from("lambda"))]),
                ..StackDescription::default()
            }))
        });
        let err = mocks
            .into_orchestrator()
            .lifecycle(Environment::Dev, LifecycleOperation::Start)
            .await
            .unwrap_err();
        assert_eq!(err.stage(), Some(Stage::Validate));
    }

    #[tokio::test]
    async fn test_status_of_stack_in_progress_explains_empty_endpoints() {
        let mut mocks = Mocks::new();
        mocks.stacks.expect_describe_stack().returning(|_| {
            Ok(Some(StackDescription {
                name: String::from("llm-testgen-dev"),
                raw_status: String::from("CREATE_IN_PROGRESS"),
                tags: BTreeMap::from([(String::from("DeploymentType"), String::from("ecs-fargate"))]),
                ..StackDescription::default()
            }))
        });
        mocks.services.expect_describe_service().returning(|_, _| {
            Ok(Some(ServiceState {
                desired_count: 2,
                running_count: 1,
                pending_count: 1,
            }))
        });
        mocks.services.expect_list_task_addresses().times(0);

        let snapshot = mocks.into_orchestrator().status(Environment::Dev, false).await.unwrap();

        assert!(snapshot.resolution.endpoints.is_empty());
        assert!(snapshot.resolution.empty_reason.is_some());
        assert_eq!(snapshot.service.as_ref().map(|s| s.phase), Some(LifecyclePhase::Scaling));
        assert!(snapshot.queue.is_none());
        assert_eq!(snapshot.exit_code(), 0);
    }
}
