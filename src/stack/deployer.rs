//! Stack deployment.
//!
//! The deployer submits a create or update for the stack derived from a
//! [`ValidatedRequest`] and then blocks until the stack reaches the expected
//! terminal state or the deadline expires. It never rolls back or deletes:
//! a failed stack is reported with its last status and left to the
//! platform's own rollback.

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::cloud::{
    StackApi, StackDescription, StackRequest, StackStatus, TemplateSource, TemplateValidation,
    UpdateOutcome,
};
use crate::config::{
    DeployOptions, DeploymentType, OrchestratorSettings, TAG_DEPLOYMENT_TYPE, TemplateSettings,
    ValidatedRequest,
};
use crate::error::{
    CloudError, ConfigError, DeploymentError, OrchestratorError, Result, Stage, TimeoutError,
};
use crate::poll::{Poll, PollOutcome, poll_until};

use super::diff::{DiffEngine, StackDiff};

/// A deployed stack as last observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StackHandle {
    /// Stack name.
    pub stack_name: String,
    /// Region the stack lives in.
    pub region: String,
    /// Mapped status.
    pub status: StackStatus,
    /// Status string as reported.
    pub raw_status: String,
    /// Status reason, if any.
    pub reason: Option<String>,
    /// Stack outputs.
    pub outputs: BTreeMap<String, String>,
    /// Deployed parameters.
    pub parameters: BTreeMap<String, String>,
    /// Stack tags.
    pub tags: BTreeMap<String, String>,
}

impl StackHandle {
    /// Builds a handle from a platform description.
    #[must_use]
    pub fn from_description(description: StackDescription, region: &str) -> Self {
        Self {
            stack_name: description.name.clone(),
            region: region.to_string(),
            status: description.status(),
            raw_status: description.raw_status,
            reason: description.reason,
            outputs: description.outputs,
            parameters: description.parameters,
            tags: description.tags,
        }
    }

    /// Handle for a stack that does not exist.
    #[must_use]
    pub fn not_found(stack_name: &str, region: &str) -> Self {
        Self {
            stack_name: stack_name.to_string(),
            region: region.to_string(),
            status: StackStatus::NotFound,
            raw_status: String::from(StackStatus::NotFound.as_str()),
            reason: None,
            outputs: BTreeMap::new(),
            parameters: BTreeMap::new(),
            tags: BTreeMap::new(),
        }
    }

    /// Returns true if the stack is usable.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.status.is_complete()
    }

    /// Deployment type recorded in the stack tags.
    #[must_use]
    pub fn deployment_type(&self) -> Option<DeploymentType> {
        self.tags.get(TAG_DEPLOYMENT_TYPE).and_then(|t| t.parse().ok())
    }
}

/// What a deploy did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeployAction {
    /// A new stack was created.
    Created,
    /// An existing stack was updated.
    Updated,
    /// Nothing needed to change.
    Unchanged,
}

/// Result of a deploy.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StackDeployment {
    /// Final stack state.
    pub handle: StackHandle,
    /// What was done.
    pub action: DeployAction,
    /// Status polls issued while waiting.
    pub polls: u32,
    /// Inputs diff that drove the action.
    pub diff: StackDiff,
}

/// Result of a dry run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateValidationResult {
    /// Stack that would be deployed.
    pub stack_name: String,
    /// What the platform reported about the template.
    pub validation: TemplateValidation,
    /// Parameters that would be passed.
    pub parameters: BTreeMap<String, String>,
    /// Tags that would be applied.
    pub tags: BTreeMap<String, String>,
    /// Problems found comparing the request with the template.
    pub issues: Vec<String>,
}

impl TemplateValidationResult {
    /// Returns true if no issues were found.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Submits stacks and waits for them to settle.
pub struct StackDeployer {
    stacks: Arc<dyn StackApi>,
    project: String,
    managed_by: String,
    template: TemplateSettings,
    options: DeployOptions,
    diff_engine: DiffEngine,
}

impl StackDeployer {
    /// Creates a deployer using timings from `settings`.
    #[must_use]
    pub fn new(stacks: Arc<dyn StackApi>, settings: &OrchestratorSettings) -> Self {
        Self {
            stacks,
            project: settings.project.name.clone(),
            managed_by: settings.project.managed_by.clone(),
            template: settings.template.clone(),
            options: DeployOptions::from(settings),
            diff_engine: DiffEngine::new(),
        }
    }

    /// Overrides polling interval and deadline.
    #[must_use]
    pub const fn with_options(mut self, options: DeployOptions) -> Self {
        self.options = options;
        self
    }

    /// Validates the template and parameters without mutating anything.
    ///
    /// # Errors
    ///
    /// Returns an error if the template cannot be read or the platform rejects it.
    pub async fn dry_run_validate(
        &self,
        request: &ValidatedRequest,
    ) -> Result<TemplateValidationResult> {
        let stack_name = request.stack_name(&self.project);
        info!("Dry run: validating template for {stack_name}");

        let template = self.template_source()?;
        let validation = self.validate(&stack_name, &template).await?;

        let parameters = request.parameters();
        let issues = parameters
            .keys()
            .filter(|k| !validation.parameters.contains(k))
            .map(|k| format!("parameter {k} is not declared by the template"))
            .collect();

        Ok(TemplateValidationResult {
            stack_name,
            validation,
            parameters,
            tags: request.tags(&self.project, &self.managed_by),
            issues,
        })
    }

    /// Computes what a deploy of `request` would change.
    ///
    /// # Errors
    ///
    /// Returns an error if the stack cannot be described.
    pub async fn plan(&self, request: &ValidatedRequest) -> Result<StackDiff> {
        let stack_name = request.stack_name(&self.project);
        let existing = self.stacks.describe_stack(&stack_name).await?;
        Ok(self.diff(request, existing.as_ref()))
    }

    /// Creates or updates the stack and waits for it to settle.
    ///
    /// A complete stack always receives an update so template edits are
    /// applied; identical inputs end as [`DeployAction::Unchanged`] when the
    /// platform reports nothing to do.
    ///
    /// # Errors
    ///
    /// Returns [`DeploymentError`] if the stack fails, is busy or vanishes,
    /// and [`TimeoutError`] if the deadline passes.
    pub async fn deploy(&self, request: &ValidatedRequest) -> Result<StackDeployment> {
        let stack_name = request.stack_name(&self.project);
        let existing = self.stacks.describe_stack(&stack_name).await?;
        let diff = self.diff(request, existing.as_ref());

        let status = existing.as_ref().map_or(StackStatus::NotFound, StackDescription::status);
        info!("Deploying {stack_name} (current status: {status})");

        match (status, existing) {
            (StackStatus::NotFound, _) | (_, None) => {
                let template = self.template_source()?;
                self.stacks
                    .create_stack(&self.stack_request(request, &stack_name, template))
                    .await?;

                let (description, polls) =
                    self.wait_for(&stack_name, StackStatus::CreateComplete, "create").await?;
                Ok(self.finish(description, request, DeployAction::Created, polls, diff))
            }
            (s, Some(description)) if s.is_complete() => {
                if !diff.has_changes() {
                    info!("Parameters and tags of {stack_name} are unchanged; submitting the template update");
                }

                let template = self.template_source()?;
                match self
                    .stacks
                    .update_stack(&self.stack_request(request, &stack_name, template))
                    .await?
                {
                    UpdateOutcome::NoChanges => {
                        info!("Platform reported no changes for {stack_name}");
                        Ok(self.finish(description, request, DeployAction::Unchanged, 0, diff))
                    }
                    UpdateOutcome::Started(_) => {
                        let (description, polls) = self
                            .wait_for(&stack_name, StackStatus::UpdateComplete, "update")
                            .await?;
                        Ok(self.finish(description, request, DeployAction::Updated, polls, diff))
                    }
                }
            }
            (s, Some(description)) if s.is_in_progress() => Err(DeploymentError::StackBusy {
                stack: stack_name,
                status: description.raw_status,
            }
            .into()),
            (_, Some(description)) => {
                error!("Stack {stack_name} is in {}; refusing to deploy over it", description.raw_status);
                Err(DeploymentError::StackFailed {
                    stack: stack_name,
                    last_status: description.raw_status,
                    reason: description.reason,
                }
                .into())
            }
        }
    }

    /// Describes the stack for `request` without changing it.
    ///
    /// # Errors
    ///
    /// Returns an error if the stack cannot be described.
    pub async fn current(&self, stack_name: &str, region: &str) -> Result<StackHandle> {
        Ok(self
            .stacks
            .describe_stack(stack_name)
            .await?
            .map_or_else(|| StackHandle::not_found(stack_name, region), |d| {
                StackHandle::from_description(d, region)
            }))
    }

    fn diff(&self, request: &ValidatedRequest, existing: Option<&StackDescription>) -> StackDiff {
        self.diff_engine.compute_diff(
            &request.stack_name(&self.project),
            &request.parameters(),
            &request.tags(&self.project, &self.managed_by),
            existing.filter(|d| d.status() != StackStatus::NotFound),
        )
    }

    fn finish(
        &self,
        description: StackDescription,
        request: &ValidatedRequest,
        action: DeployAction,
        polls: u32,
        diff: StackDiff,
    ) -> StackDeployment {
        let handle = StackHandle::from_description(description, request.region());
        info!("Stack {} is {} ({action:?})", handle.stack_name, handle.raw_status);
        StackDeployment {
            handle,
            action,
            polls,
            diff,
        }
    }

    fn stack_request(
        &self,
        request: &ValidatedRequest,
        stack_name: &str,
        template: TemplateSource,
    ) -> StackRequest {
        StackRequest {
            stack_name: stack_name.to_string(),
            template,
            parameters: request.parameters(),
            tags: request.tags(&self.project, &self.managed_by),
            capabilities: self.template.capabilities.clone(),
        }
    }

    fn template_source(&self) -> Result<TemplateSource> {
        if let Some(url) = &self.template.url {
            return Ok(TemplateSource::Url(url.clone()));
        }
        read_template(&self.template.path).map(TemplateSource::Body)
    }

    async fn validate(&self, stack_name: &str, template: &TemplateSource) -> Result<TemplateValidation> {
        match self.stacks.validate_template(template).await {
            Err(OrchestratorError::Cloud(CloudError::ApiFailed { code, message, .. }))
                if code == "ValidationError" =>
            {
                Err(DeploymentError::TemplateRejected {
                    stack: stack_name.to_string(),
                    message,
                }
                .into())
            }
            other => other,
        }
    }

    /// Polls until the stack reaches `target`.
    ///
    /// Only the platform's current status is trusted: a failed status ends
    /// the wait immediately and the first poll reporting `target` ends it
    /// successfully. A complete status other than `target` keeps polling.
    /// Callers only wait after the platform accepted the operation, which
    /// moves the stack into an in-progress state before returning, so a
    /// `target` status seen here belongs to this operation.
    async fn wait_for(
        &self,
        stack_name: &str,
        target: StackStatus,
        operation: &str,
    ) -> Result<(StackDescription, u32)> {
        let stacks = self.stacks.as_ref();

        let outcome = poll_until(self.options.poll_interval, self.options.timeout, move || {
            observe(stacks, stack_name, target, operation)
        })
        .await?;

        match outcome {
            PollOutcome::Ready { value, attempts } => Ok((value, attempts)),
            PollOutcome::TimedOut { last, elapsed, .. } => {
                warn!("Timed out waiting for {stack_name} to reach {target}");
                Err(TimeoutError {
                    stage: Stage::Deploy,
                    resource: stack_name.to_string(),
                    expected: target.to_string(),
                    last_observed: last.unwrap_or_else(|| String::from("unknown")),
                    waited_secs: elapsed.as_secs(),
                }
                .into())
            }
        }
    }
}

/// One status poll on behalf of [`StackDeployer::wait_for`].
async fn observe(
    stacks: &dyn StackApi,
    stack_name: &str,
    target: StackStatus,
    operation: &str,
) -> Result<Poll<StackDescription, String>> {
    let Some(description) = stacks.describe_stack(stack_name).await? else {
        return Err(DeploymentError::StackVanished {
            stack: stack_name.to_string(),
            operation: operation.to_string(),
        }
        .into());
    };

    match description.status() {
        s if s == target => Ok(Poll::Ready(description)),
        StackStatus::Failed => {
            error!("Stack {stack_name} failed: {}", description.raw_status);
            Err(DeploymentError::StackFailed {
                stack: stack_name.to_string(),
                last_status: description.raw_status,
                reason: description.reason,
            }
            .into())
        }
        StackStatus::NotFound => Err(DeploymentError::StackVanished {
            stack: stack_name.to_string(),
            operation: operation.to_string(),
        }
        .into()),
        StackStatus::CreateInProgress
        | StackStatus::UpdateInProgress
        | StackStatus::CreateComplete
        | StackStatus::UpdateComplete => Ok(Poll::Pending(description.raw_status)),
    }
}

fn read_template(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| {
        ConfigError::TemplateUnreadable {
            path: path.to_path_buf(),
            message: e.to_string(),
        }
        .into()
    })
}

impl std::fmt::Debug for StackDeployer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StackDeployer")
            .field("project", &self.project)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::MockStackApi;
    use crate::config::{ConfigValidator, DeploymentRequest};
    use mockall::Sequence;
    use std::time::Duration;

    const STACK: &str = "llm-testgen-dev";

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

    fn settings() -> OrchestratorSettings {
        let mut settings = OrchestratorSettings::default();
        settings.template.url = Some(String::from("https://templates.example.com/llm-stack.yaml"));
        settings
    }

    fn deployer(mock: MockStackApi) -> StackDeployer {
        StackDeployer::new(Arc::new(mock), &settings()).with_options(DeployOptions {
            poll_interval: Duration::from_millis(1),
            timeout: Duration::from_secs(5),
        })
    }

    fn description(status: &str, req: &ValidatedRequest) -> StackDescription {
        StackDescription {
            name: STACK.to_string(),
            raw_status: status.to_string(),
            reason: None,
            outputs: BTreeMap::from([(
                String::from("ServiceEndpoint"),
                String::from("http://llm-alb.example.com"),
            )]),
            parameters: req.parameters(),
            tags: req.tags("llm-testgen", "llmdeploy"),
        }
    }

    #[tokio::test]
    async fn test_dry_run_only_validates() {
        let req = request(true);
        let mut mock = MockStackApi::new();

        mock.expect_validate_template().times(1).returning(|_| {
            Ok(TemplateValidation {
                parameters: vec![
                    String::from("Environment"),
                    String::from("DeploymentType"),
                    String::from("InstanceCount"),
                    String::from("AutoStop"),
                ],
                capabilities: vec![String::from("CAPABILITY_NAMED_IAM")],
                description: Some(String::from("LLM stack")),
            })
        });
        mock.expect_create_stack().times(0);
        mock.expect_update_stack().times(0);
        mock.expect_describe_stack().times(0);

        let result = deployer(mock).dry_run_validate(&req).await.unwrap();
        assert!(result.is_valid());
        assert_eq!(result.stack_name, STACK);
        assert_eq!(result.parameters.get("InstanceCount").map(String::as_str), Some("2"));
        assert_eq!(result.tags.len(), 5);
    }

    #[tokio::test]
    async fn test_dry_run_reports_undeclared_parameters() {
        let mut mock = MockStackApi::new();
        mock.expect_validate_template().returning(|_| {
            Ok(TemplateValidation {
                parameters: vec![String::from("Environment")],
                ..TemplateValidation::default()
            })
        });

        let result = deployer(mock).dry_run_validate(&request(true)).await.unwrap();
        assert!(!result.is_valid());
        assert_eq!(result.issues.len(), 3);
    }

    #[tokio::test]
    async fn test_dry_run_maps_template_rejection() {
        let mut mock = MockStackApi::new();
        mock.expect_validate_template().returning(|_| {
            Err(CloudError::ApiFailed {
                service: String::from("cloudformation"),
                operation: String::from("ValidateTemplate"),
                resource: String::from("template"),
                code: String::from("ValidationError"),
                message: String::from("Template format error"),
            }
            .into())
        });

        let err = deployer(mock).dry_run_validate(&request(true)).await.unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Deployment(DeploymentError::TemplateRejected { .. })
        ));
    }

    #[tokio::test]
    async fn test_create_completes_after_three_polls() {
        let req = request(false);
        let mut mock = MockStackApi::new();
        let mut seq = Sequence::new();

        mock.expect_describe_stack()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(None));
        mock.expect_create_stack()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|r| r.stack_name == STACK && r.tags.len() == 5 && r.parameters.len() == 4)
            .returning(|_| Ok(String::from("arn:aws:cloudformation:stack/llm-testgen-dev")));

        for status in ["CREATE_IN_PROGRESS", "CREATE_IN_PROGRESS", "CREATE_COMPLETE"] {
            let desc = description(status, &req);
            mock.expect_describe_stack()
                .times(1)
                .in_sequence(&mut seq)
                .returning(move |_| Ok(Some(desc.clone())));
        }

        let deployment = deployer(mock).deploy(&req).await.unwrap();
        assert_eq!(deployment.action, DeployAction::Created);
        assert_eq!(deployment.polls, 3);
        assert_eq!(deployment.handle.status, StackStatus::CreateComplete);
        assert!(deployment.handle.is_complete());
        assert_eq!(deployment.handle.deployment_type(), Some(DeploymentType::EcsFargate));
    }

    #[tokio::test]
    async fn test_redeploy_identical_request_is_noop() {
        let req = request(false);
        let mut mock = MockStackApi::new();
        let desc = description("CREATE_COMPLETE", &req);

        mock.expect_describe_stack()
            .times(2)
            .returning(move |_| Ok(Some(desc.clone())));
        mock.expect_update_stack()
            .times(2)
            .returning(|_| Ok(UpdateOutcome::NoChanges));
        mock.expect_create_stack().times(0);

        let deployer = deployer(mock);
        for _ in 0..2 {
            let deployment = deployer.deploy(&req).await.unwrap();
            assert_eq!(deployment.action, DeployAction::Unchanged);
            assert!(deployment.diff.details.is_empty());
            assert_eq!(deployment.polls, 0);
        }
    }

    #[tokio::test]
    async fn test_template_change_is_submitted_with_identical_parameters() {
        let req = request(false);
        let mut mock = MockStackApi::new();
        let mut seq = Sequence::new();

        let current = description("UPDATE_COMPLETE", &req);
        mock.expect_describe_stack()
            .times(1)
            .in_sequence(&mut seq)
            .returning(move |_| Ok(Some(current.clone())));
        mock.expect_update_stack()
            .withf(|r| {
                r.template == TemplateSource::Url(String::from("https://templates.example.com/llm-stack-v2.yaml"))
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(UpdateOutcome::Started(String::from("stack-id"))));

        let in_progress = description("UPDATE_IN_PROGRESS", &req);
        mock.expect_describe_stack()
            .times(1)
            .in_sequence(&mut seq)
            .returning(move |_| Ok(Some(in_progress.clone())));
        let done = description("UPDATE_COMPLETE", &req);
        mock.expect_describe_stack()
            .times(1)
            .in_sequence(&mut seq)
            .returning(move |_| Ok(Some(done.clone())));

        let mut settings = settings();
        settings.template.url = Some(String::from("https://templates.example.com/llm-stack-v2.yaml"));
        let deployer = StackDeployer::new(Arc::new(mock), &settings).with_options(DeployOptions {
            poll_interval: Duration::from_millis(1),
            timeout: Duration::from_secs(5),
        });

        let deployment = deployer.deploy(&req).await.unwrap();
        assert_eq!(deployment.action, DeployAction::Updated);
        assert_eq!(deployment.polls, 2);
        assert!(deployment.diff.details.is_empty());
    }

    #[tokio::test]
    async fn test_changed_request_updates_and_ignores_stale_complete() {
        let req = request(false);
        let mut deployed = description("CREATE_COMPLETE", &req);
        deployed.parameters.insert(String::from("InstanceCount"), String::from("1"));

        let mut mock = MockStackApi::new();
        let mut seq = Sequence::new();

        let initial = deployed.clone();
        mock.expect_describe_stack()
            .times(1)
            .in_sequence(&mut seq)
            .returning(move |_| Ok(Some(initial.clone())));
        mock.expect_update_stack()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(UpdateOutcome::Started(String::from("stack-id"))));

        let stale = deployed.clone();
        mock.expect_describe_stack()
            .times(1)
            .in_sequence(&mut seq)
            .returning(move |_| Ok(Some(stale.clone())));
        let done = description("UPDATE_COMPLETE", &req);
        mock.expect_describe_stack()
            .times(1)
            .in_sequence(&mut seq)
            .returning(move |_| Ok(Some(done.clone())));

        let deployment = deployer(mock).deploy(&req).await.unwrap();
        assert_eq!(deployment.action, DeployAction::Updated);
        assert_eq!(deployment.polls, 2);
        assert_eq!(deployment.diff.details[0].field, "parameter.InstanceCount");
    }

    #[tokio::test]
    async fn test_failed_create_reports_last_status() {
        let req = request(false);
        let mut mock = MockStackApi::new();
        let mut seq = Sequence::new();

        mock.expect_describe_stack()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(None));
        mock.expect_create_stack()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(String::from("stack-id")));

        let mut failed = description("ROLLBACK_COMPLETE", &req);
        failed.reason = Some(String::from("The following resource(s) failed to create: [Service]"));
        mock.expect_describe_stack()
            .times(1)
            .in_sequence(&mut seq)
            .returning(move |_| Ok(Some(failed.clone())));

        let err = deployer(mock).deploy(&req).await.unwrap_err();
        assert_eq!(err.stage(), Some(Stage::Deploy));
        match err {
            OrchestratorError::Deployment(DeploymentError::StackFailed { stack, last_status, reason }) => {
                assert_eq!(stack, STACK);
                assert_eq!(last_status, "ROLLBACK_COMPLETE");
                assert!(reason.unwrap().contains("Service"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_deploy_over_failed_stack_is_refused() {
        let req = request(false);
        let mut mock = MockStackApi::new();
        let desc = description("UPDATE_ROLLBACK_FAILED", &req);

        mock.expect_describe_stack().returning(move |_| Ok(Some(desc.clone())));
        mock.expect_update_stack().times(0);
        mock.expect_create_stack().times(0);

        let err = deployer(mock).deploy(&req).await.unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Deployment(DeploymentError::StackFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_busy_stack_is_refused() {
        let req = request(false);
        let mut mock = MockStackApi::new();
        let desc = description("UPDATE_IN_PROGRESS", &req);

        mock.expect_describe_stack().returning(move |_| Ok(Some(desc.clone())));
        mock.expect_update_stack().times(0);

        let err = deployer(mock).deploy(&req).await.unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Deployment(DeploymentError::StackBusy { .. })
        ));
    }

    #[tokio::test]
    async fn test_create_timeout_is_typed() {
        let req = request(false);
        let mut mock = MockStackApi::new();

        let pending = description("CREATE_IN_PROGRESS", &req);
        let mut describes = 0u32;
        mock.expect_describe_stack().returning(move |_| {
            describes += 1;
            if describes == 1 {
                Ok(None)
            } else {
                Ok(Some(pending.clone()))
            }
        });
        mock.expect_create_stack()
            .times(1)
            .returning(|_| Ok(String::from("stack-id")));

        let deployer = StackDeployer::new(Arc::new(mock), &settings()).with_options(DeployOptions {
            poll_interval: Duration::from_millis(2),
            timeout: Duration::from_millis(20),
        });

        let err = deployer.deploy(&req).await.unwrap_err();
        match err {
            OrchestratorError::Timeout(t) => {
                assert_eq!(t.stage, Stage::Deploy);
                assert_eq!(t.resource, STACK);
                assert_eq!(t.last_observed, "CREATE_IN_PROGRESS");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_template_file_is_config_error() {
        let err = read_template(Path::new("/nonexistent/llm-stack.yaml")).unwrap_err();
        assert_eq!(err.stage(), Some(Stage::Config));
    }
}
