//! Deployment request types.
//!
//! A [`DeploymentRequest`] is the raw, untrusted input collected from the
//! CLI. It only becomes usable once [`ConfigValidator`](super::ConfigValidator)
//! turns it into a [`ValidatedRequest`], which is immutable and carries
//! closed enumerations instead of strings.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Tag key for the project name.
pub const TAG_PROJECT: &str = "Project";

/// Tag key for the environment.
pub const TAG_ENVIRONMENT: &str = "Environment";

/// Tag key for the deployment type.
pub const TAG_DEPLOYMENT_TYPE: &str = "DeploymentType";

/// Tag key for the auto-stop flag.
pub const TAG_AUTO_STOP: &str = "AutoStop";

/// Tag key for the managing tool.
pub const TAG_MANAGED_BY: &str = "ManagedBy";

/// Template parameter keys passed on every deploy.
pub const PARAM_ENVIRONMENT: &str = "Environment";
/// Template parameter for the deployment type.
pub const PARAM_DEPLOYMENT_TYPE: &str = "DeploymentType";
/// Template parameter for the instance count.
pub const PARAM_INSTANCE_COUNT: &str = "InstanceCount";
/// Template parameter for the auto-stop flag.
pub const PARAM_AUTO_STOP: &str = "AutoStop";

/// Raw deployment request as supplied by the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentRequest {
    /// Target environment name.
    pub environment: String,
    /// Deployment type name.
    pub deployment_type: String,
    /// Cloud region.
    pub region: String,
    /// Number of service instances.
    pub instance_count: i64,
    /// Whether the auto-stop schedule should be provisioned.
    pub auto_stop: bool,
    /// Validate only, never mutate.
    pub dry_run: bool,
}

/// Target environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Development.
    Dev,
    /// Staging.
    Staging,
    /// Production.
    Prod,
}

/// How the LLM service is hosted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeploymentType {
    /// Containers on Fargate.
    EcsFargate,
    /// Containers on GPU instances.
    Ec2Gpu,
    /// Serverless functions.
    Lambda,
}

impl Environment {
    /// All accepted values.
    pub const ALL: [Self; 3] = [Self::Dev, Self::Staging, Self::Prod];

    /// Returns the canonical string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Dev => "dev",
            Self::Staging => "staging",
            Self::Prod => "prod",
        }
    }
}

impl DeploymentType {
    /// All accepted values.
    pub const ALL: [Self; 3] = [Self::EcsFargate, Self::Ec2Gpu, Self::Lambda];

    /// Returns the canonical string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::EcsFargate => "ecs-fargate",
            Self::Ec2Gpu => "ec2-gpu",
            Self::Lambda => "lambda",
        }
    }

    /// Returns true if the deployment runs as a scalable container service.
    #[must_use]
    pub const fn has_container_service(self) -> bool {
        matches!(self, Self::EcsFargate | Self::Ec2Gpu)
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for DeploymentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|e| e.as_str() == s)
            .ok_or_else(|| format!("expected one of {}", join_names(Self::ALL.map(Self::as_str))))
    }
}

impl FromStr for DeploymentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("expected one of {}", join_names(Self::ALL.map(Self::as_str))))
    }
}

fn join_names(names: [&str; 3]) -> String {
    names.join(", ")
}

/// A request that passed validation. Only the validator constructs these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatedRequest {
    environment: Environment,
    deployment_type: DeploymentType,
    region: String,
    instance_count: u32,
    auto_stop: bool,
    dry_run: bool,
}

impl ValidatedRequest {
    pub(crate) const fn new(
        environment: Environment,
        deployment_type: DeploymentType,
        region: String,
        instance_count: u32,
        auto_stop: bool,
        dry_run: bool,
    ) -> Self {
        Self {
            environment,
            deployment_type,
            region,
            instance_count,
            auto_stop,
            dry_run,
        }
    }

    /// Target environment.
    #[must_use]
    pub const fn environment(&self) -> Environment {
        self.environment
    }

    /// Deployment type.
    #[must_use]
    pub const fn deployment_type(&self) -> DeploymentType {
        self.deployment_type
    }

    /// Cloud region.
    #[must_use]
    pub fn region(&self) -> &str {
        &self.region
    }

    /// Instance count, in `[1, 20]`.
    #[must_use]
    pub const fn instance_count(&self) -> u32 {
        self.instance_count
    }

    /// Whether auto-stop was requested.
    #[must_use]
    pub const fn auto_stop(&self) -> bool {
        self.auto_stop
    }

    /// Whether this is a dry run.
    #[must_use]
    pub const fn dry_run(&self) -> bool {
        self.dry_run
    }

    /// Stack name, derived deterministically from project and environment.
    #[must_use]
    pub fn stack_name(&self, project: &str) -> String {
        stack_name(project, self.environment)
    }

    /// Template parameters for this request.
    #[must_use]
    pub fn parameters(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (PARAM_ENVIRONMENT.to_string(), self.environment.to_string()),
            (PARAM_DEPLOYMENT_TYPE.to_string(), self.deployment_type.to_string()),
            (PARAM_INSTANCE_COUNT.to_string(), self.instance_count.to_string()),
            (PARAM_AUTO_STOP.to_string(), self.auto_stop.to_string()),
        ])
    }

    /// Mandatory stack tags. Discovery and cost reporting filter on these.
    #[must_use]
    pub fn tags(&self, project: &str, managed_by: &str) -> BTreeMap<String, String> {
        BTreeMap::from([
            (TAG_PROJECT.to_string(), project.to_string()),
            (TAG_ENVIRONMENT.to_string(), self.environment.to_string()),
            (TAG_DEPLOYMENT_TYPE.to_string(), self.deployment_type.to_string()),
            (TAG_AUTO_STOP.to_string(), self.auto_stop.to_string()),
            (TAG_MANAGED_BY.to_string(), managed_by.to_string()),
        ])
    }
}

/// Builds the stack name for a project and environment.
#[must_use]
pub fn stack_name(project: &str, environment: Environment) -> String {
    format!("{project}-{environment}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> ValidatedRequest {
        ValidatedRequest::new(
            Environment::Dev,
            DeploymentType::EcsFargate,
            String::from("us-east-1"),
            2,
            true,
            false,
        )
    }

    #[test]
    fn test_enum_round_trip_strings() {
        for env in Environment::ALL {
            assert_eq!(env.as_str().parse::<Environment>().unwrap(), env);
        }
        for ty in DeploymentType::ALL {
            assert_eq!(ty.as_str().parse::<DeploymentType>().unwrap(), ty);
        }
        assert!("production".parse::<Environment>().is_err());
        assert!("ecs_fargate".parse::<DeploymentType>().is_err());
    }

    #[test]
    fn test_stack_name_is_deterministic() {
        assert_eq!(request().stack_name("llm-testgen"), "llm-testgen-dev");
        assert_eq!(stack_name("llm-testgen", Environment::Prod), "llm-testgen-prod");
    }

    #[test]
    fn test_parameters_and_tags() {
        let req = request();

        let params = req.parameters();
        assert_eq!(params.get(PARAM_INSTANCE_COUNT).map(String::as_str), Some("2"));
        assert_eq!(params.get(PARAM_AUTO_STOP).map(String::as_str), Some("true"));
        assert_eq!(params.len(), 4);

        let tags = req.tags("llm-testgen", "llmdeploy");
        for key in [TAG_PROJECT, TAG_ENVIRONMENT, TAG_DEPLOYMENT_TYPE, TAG_AUTO_STOP, TAG_MANAGED_BY] {
            assert!(tags.contains_key(key), "missing tag {key}");
        }
        assert_eq!(tags[TAG_DEPLOYMENT_TYPE], "ecs-fargate");
    }

    #[test]
    fn test_request_deserializes_camel_case() {
        let json = r#"{"environment":"dev","deploymentType":"lambda","region":"eu-west-1",
            "instanceCount":3,"autoStop":false,"dryRun":true}"#;
        let req: DeploymentRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.instance_count, 3);
        assert!(req.dry_run);
    }
}
