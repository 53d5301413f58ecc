//! Typed platform records.
//!
//! These are the structured results returned by the [`api`](super::api)
//! traits. Nothing outside `cloud::aws` ever sees an SDK type or a raw
//! status string that has not been mapped onto one of these.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Lifecycle status of an infrastructure stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StackStatus {
    /// Create is running.
    CreateInProgress,
    /// Update is running.
    UpdateInProgress,
    /// Create finished.
    CreateComplete,
    /// Update finished.
    UpdateComplete,
    /// Any failed, rolled-back or deleting state.
    Failed,
    /// The stack does not exist.
    NotFound,
}

impl StackStatus {
    /// Maps a platform status string onto the closed set.
    ///
    /// Rollbacks, failures and deletions are all [`Failed`](Self::Failed):
    /// none of them leaves a usable stack. Unknown strings are treated as
    /// failed rather than silently accepted.
    #[must_use]
    pub fn from_raw(raw: &str) -> Self {
        match raw {
            "CREATE_IN_PROGRESS" => Self::CreateInProgress,
            "UPDATE_IN_PROGRESS" | "UPDATE_COMPLETE_CLEANUP_IN_PROGRESS" => Self::UpdateInProgress,
            "CREATE_COMPLETE" => Self::CreateComplete,
            "UPDATE_COMPLETE" => Self::UpdateComplete,
            "DELETE_COMPLETE" => Self::NotFound,
            _ => Self::Failed,
        }
    }

    /// Returns true for the states in which the stack is usable.
    #[must_use]
    pub const fn is_complete(self) -> bool {
        matches!(self, Self::CreateComplete | Self::UpdateComplete)
    }

    /// Returns true while an operation is running.
    #[must_use]
    pub const fn is_in_progress(self) -> bool {
        matches!(self, Self::CreateInProgress | Self::UpdateInProgress)
    }

    /// Canonical string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CreateInProgress => "CREATE_IN_PROGRESS",
            Self::UpdateInProgress => "UPDATE_IN_PROGRESS",
            Self::CreateComplete => "CREATE_COMPLETE",
            Self::UpdateComplete => "UPDATE_COMPLETE",
            Self::Failed => "FAILED",
            Self::NotFound => "NOT_FOUND",
        }
    }
}

impl fmt::Display for StackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stack as reported by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StackDescription {
    /// Stack name.
    pub name: String,
    /// Status string exactly as reported.
    pub raw_status: String,
    /// Status reason, if any.
    pub reason: Option<String>,
    /// Stack outputs by key.
    pub outputs: BTreeMap<String, String>,
    /// Current parameter values by key.
    pub parameters: BTreeMap<String, String>,
    /// Stack tags.
    pub tags: BTreeMap<String, String>,
}

impl StackDescription {
    /// Mapped status.
    #[must_use]
    pub fn status(&self) -> StackStatus {
        StackStatus::from_raw(&self.raw_status)
    }
}

/// Where the template body comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateSource {
    /// Inline template body.
    Body(String),
    /// Remote template URL.
    Url(String),
}

/// Result of template validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TemplateValidation {
    /// Parameter keys declared by the template.
    pub parameters: Vec<String>,
    /// Capabilities the template requires.
    pub capabilities: Vec<String>,
    /// Template description.
    pub description: Option<String>,
}

/// A create or update submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackRequest {
    /// Stack name.
    pub stack_name: String,
    /// Template location.
    pub template: TemplateSource,
    /// Parameter values.
    pub parameters: BTreeMap<String, String>,
    /// Stack tags.
    pub tags: BTreeMap<String, String>,
    /// Acknowledged capabilities.
    pub capabilities: Vec<String>,
}

/// Outcome of an update submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The update is running.
    Started(String),
    /// The platform found nothing to change.
    NoChanges,
}

/// Live counts of a container service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceState {
    /// Target instance count.
    pub desired_count: u32,
    /// Running instances.
    pub running_count: u32,
    /// Instances starting up.
    pub pending_count: u32,
}

impl ServiceState {
    /// Returns true once running matches desired with nothing pending.
    #[must_use]
    pub const fn is_stable(&self) -> bool {
        self.running_count == self.desired_count && self.pending_count == 0
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "desired={} running={} pending={}",
            self.desired_count, self.running_count, self.pending_count
        )
    }
}

/// A synthetic test-generation job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueJob {
    /// Job identifier.
    pub id: String,
    /// Source code under test.
    pub code: String,
    /// Source language.
    pub language: String,
    /// Kind of tests requested.
    pub test_type: String,
    /// Priority, 1 (highest) to 5.
    pub priority: u8,
    /// Retries already spent.
    pub retry_count: u32,
    /// Retry budget.
    pub max_retries: u32,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl QueueJob {
    /// Builds the minimal probe job.
    #[must_use]
    pub fn probe(created_at: DateTime<Utc>) -> Self {
        Self {
            id: format!("health-probe-{}", uuid::Uuid::new_v4()),
            code: String::from("def add(a, b):\n    return a + b\n"),
            language: String::from("python"),
            test_type: String::from("unit"),
            priority: 1,
            retry_count: 0,
            max_retries: 0,
            created_at,
        }
    }
}

/// Approximate queue depth.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueDepth {
    /// Messages waiting.
    pub visible: u64,
    /// Messages received but not deleted.
    pub in_flight: u64,
    /// Messages not yet visible.
    pub delayed: u64,
}

/// An object in the results store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    /// Object key.
    pub key: String,
    /// Last modification time.
    pub last_modified: DateTime<Utc>,
}

/// A scheduled rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleRule {
    /// Rule name.
    pub name: String,
    /// Whether the rule fires.
    pub enabled: bool,
    /// Schedule expression, if any.
    pub schedule: Option<String>,
}

/// Spend attributed to one platform service.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceCost {
    /// Platform service name.
    pub service: String,
    /// Amount in USD.
    pub amount_usd: f64,
}

/// One log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEvent {
    /// Event time.
    pub timestamp: DateTime<Utc>,
    /// Originating stream.
    pub stream: Option<String>,
    /// Message text.
    pub message: String,
}
