//! Cloud platform access.
//!
//! This module provides:
//! - Capability traits the core depends on ([`StackApi`], [`ServiceApi`], ...)
//! - Typed records those traits return
//! - The AWS SDK binding

mod api;
mod aws;
mod types;

use std::sync::Arc;

pub use api::{CostApi, LogApi, ObjectStoreApi, QueueApi, ScheduleApi, ServiceApi, StackApi};
#[cfg(test)]
pub use api::{
    MockCostApi, MockLogApi, MockObjectStoreApi, MockQueueApi, MockScheduleApi, MockServiceApi,
    MockStackApi,
};
pub use aws::AwsCloud;
pub use types::{
    LogEvent, QueueDepth, QueueJob, ScheduleRule, ServiceCost, ServiceState, StackDescription,
    StackRequest, StackStatus, StoredObject, TemplateSource, TemplateValidation, UpdateOutcome,
};

/// Handles to every platform capability.
#[derive(Clone)]
pub struct CloudClients {
    /// Stack operations.
    pub stacks: Arc<dyn StackApi>,
    /// Container service operations.
    pub services: Arc<dyn ServiceApi>,
    /// Job queue.
    pub queue: Arc<dyn QueueApi>,
    /// Results store.
    pub objects: Arc<dyn ObjectStoreApi>,
    /// Scheduled rules.
    pub schedules: Arc<dyn ScheduleApi>,
    /// Spend reporting.
    pub costs: Arc<dyn CostApi>,
    /// Log retrieval.
    pub logs: Arc<dyn LogApi>,
}

impl CloudClients {
    /// Connects every capability to AWS in `region`.
    pub async fn aws(region: &str) -> Self {
        let cloud = Arc::new(AwsCloud::connect(region).await);
        Self {
            stacks: cloud.clone(),
            services: cloud.clone(),
            queue: cloud.clone(),
            objects: cloud.clone(),
            schedules: cloud.clone(),
            costs: cloud.clone(),
            logs: cloud,
        }
    }
}

impl std::fmt::Debug for CloudClients {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudClients").finish_non_exhaustive()
    }
}
