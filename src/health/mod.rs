//! Health verification.
//!
//! This module provides:
//! - A typed HTTP client for the deployed service
//! - The layered probe engine
//! - Aggregation into a scored report with a verdict

mod client;
mod probes;
mod report;

pub use client::{CallError, ServiceClient, Timed};
pub use probes::{
    HealthProbeEngine, LatencyClass, PolicyTarget, ProbeKind, ProbeResult, QueueTarget,
    SKIPPED_DETAIL,
};
pub use report::{
    DEGRADED_THRESHOLD_PCT, HEALTHY_THRESHOLD_PCT, HealthReport, HealthReportAggregator, Verdict,
    VerdictThresholds,
};
