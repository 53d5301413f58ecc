//! Service lifecycle control.
//!
//! Start, stop, scale and restart the container service behind a stack.
//! Every operation sets the desired count and then waits, bounded, for the
//! platform to converge. Wait timeouts are reported as warnings: the
//! platform keeps converging after we stop watching.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

use crate::cloud::{ServiceApi, ServiceState};
use crate::config::{DeploymentType, LifecycleOptions, validate_instance_count};
use crate::error::{DiscoveryError, Result, Stage, TimeoutError, ValidationError};
use crate::poll::{Poll, PollOutcome, poll_until};
use crate::stack::ServiceIdentity;

/// Coarse state of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecyclePhase {
    /// Desired is zero and nothing runs.
    Stopped,
    /// Running has not caught up with desired.
    Scaling,
    /// Running equals desired.
    Stable,
}

impl LifecyclePhase {
    /// Phase of an observed state.
    #[must_use]
    pub const fn of(state: &ServiceState) -> Self {
        if state.desired_count == 0 && state.running_count == 0 && state.pending_count == 0 {
            Self::Stopped
        } else if state.is_stable() {
            Self::Stable
        } else {
            Self::Scaling
        }
    }
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Stopped => "STOPPED",
            Self::Scaling => "SCALING",
            Self::Stable => "STABLE",
        };
        write!(f, "{s}")
    }
}

/// Lifecycle operation names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleOperation {
    /// Scale up from zero.
    Start,
    /// Scale to zero.
    Stop,
    /// Scale to a count.
    Scale,
    /// Stop then restore.
    Restart,
}

impl fmt::Display for LifecycleOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Scale => "scale",
            Self::Restart => "restart",
        };
        write!(f, "{s}")
    }
}

/// What a lifecycle operation did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleOutcome {
    /// Operation performed.
    pub operation: LifecycleOperation,
    /// Target service.
    pub service: ServiceIdentity,
    /// State before the operation.
    pub previous: ServiceState,
    /// Desired count requested.
    pub target: u32,
    /// Last observed state.
    pub final_state: ServiceState,
    /// Phase of `final_state`.
    pub phase: LifecyclePhase,
    /// Downgraded timeouts and no-op notices.
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
enum Wait {
    Drained,
    Stable(u32),
}

impl Wait {
    const fn is_met(self, state: &ServiceState) -> bool {
        match self {
            Self::Drained => state.running_count == 0,
            Self::Stable(target) => state.desired_count == target && state.is_stable(),
        }
    }

    fn describe(self) -> String {
        match self {
            Self::Drained => String::from("running=0"),
            Self::Stable(target) => format!("running={target}"),
        }
    }
}

/// Rejects lifecycle operations on deployments without a container service.
///
/// # Errors
///
/// Returns a [`ValidationError`] for `lambda` deployments.
pub fn ensure_supported(operation: LifecycleOperation, deployment_type: Option<DeploymentType>) -> Result<()> {
    match deployment_type {
        Some(t) if !t.has_container_service() => Err(ValidationError::Unsupported {
            operation: operation.to_string(),
            deployment_type: t.to_string(),
        }
        .into()),
        _ => Ok(()),
    }
}

/// Drives the desired count of one service.
pub struct LifecycleController {
    services: Arc<dyn ServiceApi>,
    identity: ServiceIdentity,
    options: LifecycleOptions,
}

impl LifecycleController {
    /// Creates a controller for `identity`.
    #[must_use]
    pub fn new(services: Arc<dyn ServiceApi>, identity: ServiceIdentity, options: LifecycleOptions) -> Self {
        Self {
            services,
            identity,
            options,
        }
    }

    /// Target service.
    #[must_use]
    pub const fn identity(&self) -> &ServiceIdentity {
        &self.identity
    }

    /// Reads live counts.
    ///
    /// # Errors
    ///
    /// Returns an error if the service does not exist or the read fails.
    pub async fn status(&self) -> Result<ServiceState> {
        observe_state(self.services.as_ref(), &self.identity).await
    }

    /// Scales up to the default count if the service is stopped.
    ///
    /// # Errors
    ///
    /// Returns an error if the service cannot be read or updated.
    pub async fn start(&self) -> Result<LifecycleOutcome> {
        let previous = self.status().await?;

        if previous.desired_count > 0 {
            warn!("{} already has desired={}; start is a no-op", self.identity, previous.desired_count);
            return Ok(self.outcome(
                LifecycleOperation::Start,
                previous,
                previous.desired_count,
                previous,
                vec![format!(
                    "service already running with desired count {}",
                    previous.desired_count
                )],
            ));
        }

        let target = self.options.default_running_count;
        self.converge(LifecycleOperation::Start, previous, target).await
    }

    /// Scales to zero and waits for the service to drain.
    ///
    /// # Errors
    ///
    /// Returns an error if the service cannot be read or updated. A drain
    /// timeout is a warning.
    pub async fn stop(&self) -> Result<LifecycleOutcome> {
        let previous = self.status().await?;
        self.converge(LifecycleOperation::Stop, previous, 0).await
    }

    /// Sets the desired count to `count` in `[0, 20]`.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] for out-of-range counts, or an error if
    /// the service cannot be read or updated.
    pub async fn scale(&self, count: i64) -> Result<LifecycleOutcome> {
        let target = validate_instance_count(count, true)?;
        let previous = self.status().await?;
        self.converge(LifecycleOperation::Scale, previous, target).await
    }

    /// Stops the service, pauses, then restores the previous desired count
    /// (or the default count if it was stopped). The restore runs even if
    /// the drain timed out.
    ///
    /// # Errors
    ///
    /// Returns an error if the service cannot be read or updated.
    pub async fn restart(&self) -> Result<LifecycleOutcome> {
        let previous = self.status().await?;
        let target = if previous.desired_count == 0 {
            self.options.default_running_count
        } else {
            previous.desired_count
        };

        info!("Restarting {} (desired {} -> 0 -> {target})", self.identity, previous.desired_count);
        let stopped = self.converge(LifecycleOperation::Stop, previous, 0).await?;

        tokio::time::sleep(self.options.restart_pause).await;

        let restored = self
            .converge(LifecycleOperation::Restart, stopped.final_state, target)
            .await?;

        let mut warnings = stopped.warnings;
        warnings.extend(restored.warnings);

        Ok(self.outcome(
            LifecycleOperation::Restart,
            previous,
            target,
            restored.final_state,
            warnings,
        ))
    }

    async fn converge(
        &self,
        operation: LifecycleOperation,
        previous: ServiceState,
        target: u32,
    ) -> Result<LifecycleOutcome> {
        info!("{operation}: setting {} desired count to {target}", self.identity);
        self.services
            .set_desired_count(&self.identity.cluster, &self.identity.service, target)
            .await?;

        let (wait, timeout) = if target == 0 {
            (Wait::Drained, self.options.stop_timeout)
        } else {
            (Wait::Stable(target), self.options.stable_timeout)
        };

        let services = self.services.as_ref();
        let identity = &self.identity;
        let outcome = poll_until(self.options.poll_interval, timeout, move || {
            observe(services, identity, wait)
        })
        .await?;

        let (final_state, warnings) = match outcome {
            PollOutcome::Ready { value, attempts } => {
                info!("{} reached {} after {attempts} poll(s)", self.identity, wait.describe());
                (value, Vec::new())
            }
            PollOutcome::TimedOut {
                last,
                attempts,
                elapsed,
            } => {
                let last_state = last.unwrap_or(previous);
                let timeout = TimeoutError {
                    stage: Stage::Lifecycle,
                    resource: self.identity.to_string(),
                    expected: wait.describe(),
                    last_observed: last_state.to_string(),
                    waited_secs: elapsed.as_secs(),
                };
                warn!("{timeout} after {attempts} poll(s); the platform is still converging");
                (last_state, vec![timeout.to_string()])
            }
        };

        Ok(self.outcome(operation, previous, target, final_state, warnings))
    }

    fn outcome(
        &self,
        operation: LifecycleOperation,
        previous: ServiceState,
        target: u32,
        final_state: ServiceState,
        warnings: Vec<String>,
    ) -> LifecycleOutcome {
        LifecycleOutcome {
            operation,
            service: self.identity.clone(),
            previous,
            target,
            final_state,
            phase: LifecyclePhase::of(&final_state),
            warnings,
        }
    }
}

async fn observe_state(services: &dyn ServiceApi, identity: &ServiceIdentity) -> Result<ServiceState> {
    services
        .describe_service(&identity.cluster, &identity.service)
        .await?
        .ok_or_else(|| {
            DiscoveryError::ServiceNotFound {
                cluster: identity.cluster.clone(),
                service: identity.service.clone(),
            }
            .into()
        })
}

async fn observe(
    services: &dyn ServiceApi,
    identity: &ServiceIdentity,
    wait: Wait,
) -> Result<Poll<ServiceState, ServiceState>> {
    let state = observe_state(services, identity).await?;
    Ok(if wait.is_met(&state) {
        Poll::Ready(state)
    } else {
        Poll::Pending(state)
    })
}

impl fmt::Debug for LifecycleController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleController")
            .field("identity", &self.identity)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OrchestratorError;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Moves running one step toward desired on every describe.
    #[derive(Default)]
    struct FakeService {
        state: Mutex<ServiceState>,
        stuck: bool,
        missing: bool,
        updates: Mutex<Vec<u32>>,
    }

    impl FakeService {
        fn running(count: u32) -> Self {
            Self {
                state: Mutex::new(ServiceState {
                    desired_count: count,
                    running_count: count,
                    pending_count: 0,
                }),
                ..Self::default()
            }
        }

        fn updates(&self) -> Vec<u32> {
            self.updates.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ServiceApi for FakeService {
        async fn describe_service(&self, _: &str, _: &str) -> Result<Option<ServiceState>> {
            if self.missing {
                return Ok(None);
            }
            let mut state = self.state.lock().unwrap();
            if !self.stuck {
                if state.running_count < state.desired_count {
                    state.running_count += 1;
                } else if state.running_count > state.desired_count {
                    state.running_count -= 1;
                }
            }
            Ok(Some(*state))
        }

        async fn set_desired_count(&self, _: &str, _: &str, count: u32) -> Result<()> {
            self.updates.lock().unwrap().push(count);
            self.state.lock().unwrap().desired_count = count;
            Ok(())
        }

        async fn list_task_addresses(&self, _: &str, _: &str) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
    }

    fn options() -> LifecycleOptions {
        LifecycleOptions {
            default_running_count: 2,
            stable_timeout: Duration::from_millis(200),
            stop_timeout: Duration::from_millis(30),
            poll_interval: Duration::from_millis(1),
            restart_pause: Duration::from_millis(1),
        }
    }

    fn controller(fake: &Arc<FakeService>) -> LifecycleController {
        LifecycleController::new(
            fake.clone(),
            ServiceIdentity {
                cluster: String::from("llm-testgen-dev-cluster"),
                service: String::from("llm-testgen-dev-service"),
            },
            options(),
        )
    }

    #[tokio::test]
    async fn test_start_from_stopped() {
        let fake = Arc::new(FakeService::running(0));
        let outcome = controller(&fake).start().await.unwrap();

        assert_eq!(outcome.target, 2);
        assert_eq!(outcome.final_state.running_count, 2);
        assert_eq!(outcome.phase, LifecyclePhase::Stable);
        assert!(outcome.warnings.is_empty());
        assert_eq!(fake.updates(), vec![2]);
    }

    #[tokio::test]
    async fn test_start_when_running_is_noop_with_warning() {
        let fake = Arc::new(FakeService::running(3));
        let outcome = controller(&fake).start().await.unwrap();

        assert!(fake.updates().is_empty());
        assert_eq!(outcome.target, 3);
        assert_eq!(outcome.warnings.len(), 1);
    }

    #[tokio::test]
    async fn test_stop_drains() {
        let fake = Arc::new(FakeService::running(2));
        let outcome = controller(&fake).stop().await.unwrap();

        assert_eq!(outcome.final_state.running_count, 0);
        assert_eq!(outcome.phase, LifecyclePhase::Stopped);
        assert!(outcome.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_stop_timeout_is_a_warning() {
        let fake = Arc::new(FakeService {
            stuck: true,
            ..FakeService::running(2)
        });
        let outcome = controller(&fake).stop().await.unwrap();

        assert_eq!(outcome.final_state.running_count, 2);
        assert_eq!(outcome.phase, LifecyclePhase::Scaling);
        assert_eq!(outcome.warnings.len(), 1);
        assert!(outcome.warnings[0].starts_with("[lifecycle] timed out"));
        assert!(outcome.warnings[0].contains("llm-testgen-dev-cluster/llm-testgen-dev-service"));
    }

    #[tokio::test]
    async fn test_scale_to_zero_then_status_reports_zero_running() {
        let fake = Arc::new(FakeService::running(4));
        let controller = controller(&fake);

        let outcome = controller.scale(0).await.unwrap();
        let status = controller.status().await.unwrap();

        assert!(status.running_count == 0 || !outcome.warnings.is_empty());
        assert_eq!(status.running_count, 0);
    }

    #[tokio::test]
    async fn test_scale_validates_range() {
        let fake = Arc::new(FakeService::running(1));
        let controller = controller(&fake);

        for count in [-1, 21, 100] {
            let err = controller.scale(count).await.unwrap_err();
            assert!(err.to_string().contains("instanceCount"), "{err}");
        }
        assert!(fake.updates().is_empty());

        let outcome = controller.scale(5).await.unwrap();
        assert_eq!(outcome.final_state.running_count, 5);
        assert_eq!(outcome.phase, LifecyclePhase::Stable);
    }

    #[tokio::test]
    async fn test_restart_restores_previous_count() {
        let fake = Arc::new(FakeService::running(3));
        let outcome = controller(&fake).restart().await.unwrap();

        assert_eq!(fake.updates(), vec![0, 3]);
        assert_eq!(outcome.operation, LifecycleOperation::Restart);
        assert_eq!(outcome.previous.desired_count, 3);
        assert_eq!(outcome.final_state.running_count, 3);
        assert!(outcome.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_restart_proceeds_after_stop_timeout() {
        let fake = Arc::new(FakeService {
            stuck: true,
            ..FakeService::running(3)
        });
        let outcome = controller(&fake).restart().await.unwrap();

        assert_eq!(fake.updates(), vec![0, 3]);
        assert_eq!(outcome.warnings.len(), 1);
    }

    #[tokio::test]
    async fn test_restart_from_stopped_uses_default_count() {
        let fake = Arc::new(FakeService::running(0));
        let outcome = controller(&fake).restart().await.unwrap();

        assert_eq!(fake.updates(), vec![0, 2]);
        assert_eq!(outcome.target, 2);
    }

    #[tokio::test]
    async fn test_missing_service_is_discovery_error() {
        let fake = Arc::new(FakeService {
            missing: true,
            ..FakeService::default()
        });
        let err = controller(&fake).stop().await.unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Discovery(DiscoveryError::ServiceNotFound { .. })
        ));
    }

    #[test]
    fn test_lambda_deployments_are_rejected() {
        assert!(ensure_supported(LifecycleOperation::Start, Some(DeploymentType::EcsFargate)).is_ok());
        assert!(ensure_supported(LifecycleOperation::Start, None).is_ok());

        let err = ensure_supported(LifecycleOperation::Scale, Some(DeploymentType::Lambda)).unwrap_err();
        assert_eq!(err.to_string(), "scale is not supported for deploymentType 'lambda'");
    }

    #[test]
    fn test_phases() {
        let state = |d, r, p| ServiceState {
            desired_count: d,
            running_count: r,
            pending_count: p,
        };
        assert_eq!(LifecyclePhase::of(&state(0, 0, 0)), LifecyclePhase::Stopped);
        assert_eq!(LifecyclePhase::of(&state(0, 1, 0)), LifecyclePhase::Scaling);
        assert_eq!(LifecyclePhase::of(&state(2, 1, 1)), LifecyclePhase::Scaling);
        assert_eq!(LifecyclePhase::of(&state(2, 2, 0)), LifecyclePhase::Stable);
    }
}
