//! Validation of deployment requests and operator settings.
//!
//! Request validation is the mandatory gate in front of every cloud call:
//! nothing reaches the network until [`ConfigValidator::validate`] has
//! produced a [`ValidatedRequest`]. Settings validation collects every issue
//! and reports the first error, with non-fatal findings kept as warnings.

use crate::error::{Result, ValidationError};
use tracing::debug;

use super::request::{DeploymentRequest, DeploymentType, Environment, ValidatedRequest};
use super::settings::OrchestratorSettings;

/// Smallest instance count accepted by a deploy.
pub const MIN_INSTANCE_COUNT: i64 = 1;

/// Largest instance count accepted anywhere.
pub const MAX_INSTANCE_COUNT: i64 = 20;

/// Validator for requests and settings.
#[derive(Debug, Default)]
pub struct ConfigValidator;

/// Outcome of settings validation.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// Fatal issues.
    pub errors: Vec<ValidationIssue>,
    /// Non-fatal issues.
    pub warnings: Vec<String>,
}

/// A single settings issue.
#[derive(Debug)]
pub struct ValidationIssue {
    /// Settings path that failed.
    pub field: String,
    /// Offending value.
    pub value: String,
    /// What is wrong with it.
    pub message: String,
}

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a deployment request.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] naming the first offending field and value.
    pub fn validate(&self, request: &DeploymentRequest) -> Result<ValidatedRequest> {
        let environment = parse_environment(&request.environment)?;

        let deployment_type: DeploymentType = request
            .deployment_type
            .parse()
            .map_err(|reason: String| {
                ValidationError::field("deploymentType", &request.deployment_type, reason)
            })?;

        let instance_count = validate_instance_count(request.instance_count, false)?;
        let region = validate_region(&request.region)?;

        debug!(
            "Request validated: env={environment} type={deployment_type} count={instance_count} region={region}"
        );

        Ok(ValidatedRequest::new(
            environment,
            deployment_type,
            region,
            instance_count,
            request.auto_stop,
            request.dry_run,
        ))
    }

    /// Validates operator settings.
    ///
    /// # Errors
    ///
    /// Returns the first fatal issue as a [`ValidationError`].
    pub fn validate_settings(&self, settings: &OrchestratorSettings) -> Result<ValidationResult> {
        let mut result = ValidationResult::default();

        Self::validate_project(settings, &mut result);
        Self::validate_timings(settings, &mut result);
        Self::validate_probes(settings, &mut result);
        Self::validate_service(settings, &mut result);
        Self::validate_queue(settings, &mut result);

        if settings.template.url.is_none() && !settings.template.path.exists() {
            result.warnings.push(format!(
                "template.path: {} does not exist; deploy will fail until it does",
                settings.template.path.display()
            ));
        }

        match result.errors.first() {
            None => {
                debug!("Settings validation passed");
                Ok(result)
            }
            Some(first) => Err(ValidationError::field(
                first.field.clone(),
                &first.value,
                first.message.clone(),
            )
            .into()),
        }
    }

    fn validate_project(settings: &OrchestratorSettings, result: &mut ValidationResult) {
        let name = &settings.project.name;
        if !is_valid_name(name) {
            result.push_error(
                "project.name",
                name,
                "must be lowercase alphanumeric with hyphens, starting with a letter",
            );
        }

        if settings.project.managed_by.trim().is_empty() {
            result.push_error("project.managed_by", "", "cannot be empty");
        }
    }

    fn validate_timings(settings: &OrchestratorSettings, result: &mut ValidationResult) {
        let checks = [
            ("stack.poll_interval_secs", settings.stack.poll_interval_secs),
            ("stack.timeout_secs", settings.stack.timeout_secs),
            ("service.poll_interval_secs", settings.service.poll_interval_secs),
            ("service.stable_timeout_secs", settings.service.stable_timeout_secs),
            ("service.stop_timeout_secs", settings.service.stop_timeout_secs),
            ("probes.liveness_timeout_secs", settings.probes.liveness_timeout_secs),
            ("probes.liveness_interval_secs", settings.probes.liveness_interval_secs),
            ("probes.inference_timeout_secs", settings.probes.inference_timeout_secs),
            ("probes.request_timeout_secs", settings.probes.request_timeout_secs),
        ];

        for (field, value) in checks {
            if value == 0 {
                result.push_error(field, "0", "must be greater than zero");
            }
        }

        if settings.stack.poll_interval_secs > settings.stack.timeout_secs {
            result.warnings.push(String::from(
                "stack.poll_interval_secs exceeds stack.timeout_secs; only one poll will run",
            ));
        }
    }

    fn validate_probes(settings: &OrchestratorSettings, result: &mut ValidationResult) {
        let probes = &settings.probes;

        for (field, path) in [
            ("probes.health_path", &probes.health_path),
            ("probes.capability_path", &probes.capability_path),
            ("probes.inference_path", &probes.inference_path),
        ] {
            if !path.starts_with('/') {
                result.push_error(field, path, "must start with '/'");
            }
        }

        if probes.max_concurrent_endpoints == 0 {
            result.push_error("probes.max_concurrent_endpoints", "0", "must be at least 1");
        }

        if probes.prompt.trim().is_empty() {
            result.push_error("probes.prompt", "", "cannot be empty");
        }
    }

    fn validate_service(settings: &OrchestratorSettings, result: &mut ValidationResult) {
        let service = &settings.service;

        if service.container_port == 0 {
            result.push_error("service.container_port", "0", "must be a valid port");
        }

        if let Err(e) = validate_instance_count(i64::from(service.default_running_count), false) {
            result.push_error(
                "service.default_running_count",
                &service.default_running_count.to_string(),
                &e.to_string(),
            );
        }

        if let Some(url) = &service.local_fallback {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                result.push_error("service.local_fallback", url, "must be an http(s) URL");
            }
        }
    }

    fn validate_queue(settings: &OrchestratorSettings, result: &mut ValidationResult) {
        let queue = &settings.queue;

        if queue.url.is_some() && queue.results_bucket.is_none() {
            result.warnings.push(String::from(
                "queue.url is set without queue.results_bucket; results will only be found via stack outputs",
            ));
        }

        if !queue.results_prefix.is_empty() && !queue.results_prefix.ends_with('/') {
            result.warnings.push(format!(
                "queue.results_prefix '{}' does not end with '/'",
                queue.results_prefix
            ));
        }
    }
}

/// Parses an environment name.
///
/// # Errors
///
/// Returns a [`ValidationError`] for `environment` when the value is not in the closed set.
pub fn parse_environment(value: &str) -> Result<Environment> {
    value
        .parse()
        .map_err(|reason: String| ValidationError::field("environment", value, reason).into())
}

/// Checks an instance count against `[1, 20]`, or `[0, 20]` when `allow_zero`.
///
/// # Errors
///
/// Returns a [`ValidationError`] for `instanceCount` when out of range.
pub fn validate_instance_count(count: i64, allow_zero: bool) -> Result<u32> {
    let min = if allow_zero { 0 } else { MIN_INSTANCE_COUNT };

    if (min..=MAX_INSTANCE_COUNT).contains(&count) {
        u32::try_from(count).map_err(|_| {
            ValidationError::field("instanceCount", count, "does not fit in u32").into()
        })
    } else {
        Err(ValidationError::field(
            "instanceCount",
            count,
            format!("must be between {min} and {MAX_INSTANCE_COUNT}"),
        )
        .into())
    }
}

/// Checks cloud region syntax such as `us-east-1` or `us-gov-west-1`.
///
/// # Errors
///
/// Returns a [`ValidationError`] for `region` when the syntax does not match.
pub fn validate_region(region: &str) -> Result<String> {
    let trimmed = region.trim();

    if trimmed.is_empty() {
        return Err(ValidationError::field("region", region, "cannot be empty").into());
    }

    if is_valid_region(trimmed) {
        Ok(trimmed.to_string())
    } else {
        Err(ValidationError::field(
            "region",
            region,
            "must look like <area>-<direction>-<number>, e.g. us-east-1",
        )
        .into())
    }
}

fn is_valid_region(region: &str) -> bool {
    let parts: Vec<&str> = region.split('-').collect();

    let (area, words, number) = match parts.as_slice() {
        [area, word, number] => (*area, vec![*word], *number),
        [area, qualifier, word, number] => (*area, vec![*qualifier, *word], *number),
        _ => return false,
    };

    let is_lower_word = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_lowercase());

    area.len() == 2
        && is_lower_word(area)
        && words.into_iter().all(is_lower_word)
        && (1..=2).contains(&number.len())
        && number.chars().all(|c| c.is_ascii_digit())
}

/// Names must be lowercase alphanumeric with hyphens, starting with a letter.
fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();

    match chars.next() {
        Some(first) if first.is_ascii_lowercase() => {}
        _ => return false,
    }

    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !name.ends_with('-')
        && !name.contains("--")
}

impl ValidationResult {
    fn push_error(&mut self, field: &str, value: &str, message: &str) {
        self.errors.push(ValidationIssue {
            field: field.to_string(),
            value: value.to_string(),
            message: message.to_string(),
        });
    }

    /// Returns true if there are no errors.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} '{}': {}", self.field, self.value, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OrchestratorError;

    fn request(environment: &str, deployment_type: &str, instance_count: i64) -> DeploymentRequest {
        DeploymentRequest {
            environment: environment.to_string(),
            deployment_type: deployment_type.to_string(),
            region: String::from("us-east-1"),
            instance_count,
            auto_stop: true,
            dry_run: false,
        }
    }

    fn field_of(err: &OrchestratorError) -> Option<&str> {
        match err {
            OrchestratorError::Validation(v) => v.field_name(),
            _ => None,
        }
    }

    #[test]
    fn test_out_of_range_counts_name_instance_count() {
        let validator = ConfigValidator::new();

        for count in [i64::MIN, -5, -1, 0, 21, 22, 100, i64::MAX] {
            let err = validator.validate(&request("dev", "ecs-fargate", count)).unwrap_err();
            assert_eq!(field_of(&err), Some("instanceCount"), "count {count}");
            assert!(err.to_string().contains("instanceCount"));
            assert!(err.to_string().contains(&count.to_string()));
        }
    }

    #[test]
    fn test_all_valid_enumerations_pass() {
        let validator = ConfigValidator::new();

        for env in Environment::ALL {
            for ty in DeploymentType::ALL {
                for count in [1, 2, 10, 20] {
                    let validated = validator
                        .validate(&request(env.as_str(), ty.as_str(), count))
                        .unwrap();
                    assert_eq!(validated.environment(), env);
                    assert_eq!(validated.deployment_type(), ty);
                    assert_eq!(i64::from(validated.instance_count()), count);
                }
            }
        }
    }

    #[test]
    fn test_unknown_environment_and_type() {
        let validator = ConfigValidator::new();

        let err = validator.validate(&request("qa", "ecs-fargate", 2)).unwrap_err();
        assert_eq!(field_of(&err), Some("environment"));
        assert!(err.to_string().contains("'qa'"));

        let err = validator.validate(&request("dev", "k8s", 2)).unwrap_err();
        assert_eq!(field_of(&err), Some("deploymentType"));
    }

    #[test]
    fn test_region_syntax() {
        for good in ["us-east-1", "eu-west-3", "ap-southeast-2", "us-gov-west-1", "il-central-1"] {
            assert!(validate_region(good).is_ok(), "{good}");
        }
        for bad in ["", "  ", "us-east", "useast1", "US-EAST-1", "us-east-one", "usa-east-1", "us--1"] {
            let err = validate_region(bad).unwrap_err();
            assert_eq!(field_of(&err), Some("region"), "{bad}");
        }
    }

    #[test]
    fn test_lifecycle_range_allows_zero() {
        assert_eq!(validate_instance_count(0, true).unwrap(), 0);
        assert_eq!(validate_instance_count(20, true).unwrap(), 20);
        assert!(validate_instance_count(21, true).is_err());
        assert!(validate_instance_count(-1, true).is_err());
    }

    #[test]
    fn test_valid_name() {
        assert!(is_valid_name("llm-testgen"));
        assert!(is_valid_name("a1"));
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("LLM"));
        assert!(!is_valid_name("1llm"));
        assert!(!is_valid_name("llm_testgen"));
        assert!(!is_valid_name("llm-"));
        assert!(!is_valid_name("llm--testgen"));
    }

    #[test]
    fn test_settings_defaults_are_valid() {
        let mut settings = OrchestratorSettings::default();
        settings.template.url = Some(String::from("https://bucket.s3.amazonaws.com/llm-stack.yaml"));

        let result = ConfigValidator::new().validate_settings(&settings).unwrap();
        assert!(result.is_valid());
        assert_eq!(result.warning_count(), 0);
    }

    #[test]
    fn test_settings_errors_and_warnings() {
        let mut settings = OrchestratorSettings::default();
        settings.probes.health_path = String::from("health");
        let err = ConfigValidator::new().validate_settings(&settings).unwrap_err();
        assert_eq!(field_of(&err), Some("probes.health_path"));

        let mut settings = OrchestratorSettings::default();
        settings.template.path = std::path::PathBuf::from("/nonexistent/llm-stack.yaml");
        settings.queue.url = Some(String::from("https://sqs.us-east-1.amazonaws.com/1/jobs"));
        let result = ConfigValidator::new().validate_settings(&settings).unwrap();
        assert_eq!(result.warning_count(), 2);
    }
}
