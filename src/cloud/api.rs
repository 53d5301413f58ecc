//! Platform capability traits.
//!
//! Each trait covers one cloud service. The core components only ever hold
//! `Arc<dyn …>` handles to these, so tests substitute mocks and the AWS
//! binding lives entirely in [`aws`](super::aws).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::error::Result;

use super::types::{
    LogEvent, QueueDepth, QueueJob, ScheduleRule, ServiceCost, ServiceState, StackDescription,
    StackRequest, StoredObject, TemplateSource, TemplateValidation, UpdateOutcome,
};

/// Infrastructure stack operations.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StackApi: Send + Sync {
    /// Describes a stack, returning `None` if it does not exist.
    async fn describe_stack(&self, stack_name: &str) -> Result<Option<StackDescription>>;

    /// Validates a template without creating anything.
    async fn validate_template(&self, template: &TemplateSource) -> Result<TemplateValidation>;

    /// Submits a create, returning the stack id.
    async fn create_stack(&self, request: &StackRequest) -> Result<String>;

    /// Submits an update.
    async fn update_stack(&self, request: &StackRequest) -> Result<UpdateOutcome>;
}

/// Container service operations.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ServiceApi: Send + Sync {
    /// Reads live counts, returning `None` if the service does not exist.
    async fn describe_service(&self, cluster: &str, service: &str) -> Result<Option<ServiceState>>;

    /// Sets the desired count.
    async fn set_desired_count(&self, cluster: &str, service: &str, count: u32) -> Result<()>;

    /// Lists private IPv4 addresses of the running tasks.
    async fn list_task_addresses(&self, cluster: &str, service: &str) -> Result<Vec<String>>;
}

/// Job queue operations.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QueueApi: Send + Sync {
    /// Enqueues a job, returning the message id.
    async fn send_job(&self, queue_url: &str, job: &QueueJob) -> Result<String>;

    /// Reads approximate queue depth.
    async fn queue_depth(&self, queue_url: &str) -> Result<QueueDepth>;
}

/// Results store operations.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStoreApi: Send + Sync {
    /// Lists objects under `prefix` modified strictly after `since`.
    async fn list_objects_since(
        &self,
        bucket: &str,
        prefix: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<StoredObject>>;
}

/// Scheduled rule operations.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ScheduleApi: Send + Sync {
    /// Lists rules whose name starts with `prefix`.
    async fn list_rules(&self, prefix: &str) -> Result<Vec<ScheduleRule>>;
}

/// Spend reporting.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CostApi: Send + Sync {
    /// Unblended cost grouped by service for resources carrying all `tags`.
    async fn cost_by_service(
        &self,
        tags: &BTreeMap<String, String>,
        start: chrono::NaiveDate,
        end: chrono::NaiveDate,
    ) -> Result<Vec<ServiceCost>>;
}

/// Log retrieval.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LogApi: Send + Sync {
    /// Up to `limit` events in `group` since `since`, oldest first.
    async fn recent_events(
        &self,
        group: &str,
        since: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<LogEvent>>;
}
