//! Configuration module.
//!
//! This module handles everything that happens before the first cloud call:
//! - The deployment request and its validated, immutable form
//! - Operator settings loaded from `llmdeploy.yaml`
//! - Validation of requests and settings
//! - Parameter fingerprints for change detection

mod hash;
mod parser;
mod request;
mod settings;
mod validator;

pub use hash::ConfigHasher;
pub use parser::{ConfigParser, DEFAULT_CONFIG_FILES, apply_env_overrides, find_config_file};
pub use request::{
    DeploymentRequest, DeploymentType, Environment, PARAM_AUTO_STOP, PARAM_DEPLOYMENT_TYPE,
    PARAM_ENVIRONMENT, PARAM_INSTANCE_COUNT, TAG_AUTO_STOP, TAG_DEPLOYMENT_TYPE, TAG_ENVIRONMENT,
    TAG_MANAGED_BY, TAG_PROJECT, ValidatedRequest, stack_name,
};
pub use settings::{
    CostSettings, DeployOptions, LifecycleOptions, LogSettings, OrchestratorSettings,
    PolicySettings, ProbeOptions, ProbeSettings, ProjectSettings, QueueSettings, ServiceSettings,
    StackSettings, TemplateSettings,
};
pub use validator::{
    ConfigValidator, MAX_INSTANCE_COUNT, MIN_INSTANCE_COUNT, ValidationIssue, ValidationResult,
    parse_environment, validate_instance_count, validate_region,
};
