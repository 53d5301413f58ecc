//! Stack lifecycle.
//!
//! This module provides:
//! - Create/update submission and terminal-state polling
//! - Parameter and tag diffs for idempotent updates
//! - Endpoint discovery from a deployed stack

mod deployer;
mod diff;
mod resolver;

pub use deployer::{
    DeployAction, StackDeployer, StackDeployment, StackHandle, TemplateValidationResult,
};
pub use diff::{DiffDetail, DiffEngine, DiffType, StackDiff};
pub use resolver::{
    Endpoint, EndpointKind, EndpointResolver, Resolution, ServiceIdentity, UnresolvedReason,
};
