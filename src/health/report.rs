//! Health report aggregation.
//!
//! Folds the per-endpoint probe results into one score and verdict, and
//! turns failures into diagnostics an operator can act on.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use tracing::info;

use super::probes::{ProbeKind, ProbeResult};

/// Minimum success rate for a HEALTHY verdict.
pub const HEALTHY_THRESHOLD_PCT: u8 = 80;

/// Minimum success rate for a DEGRADED verdict.
pub const DEGRADED_THRESHOLD_PCT: u8 = 60;

/// Aggregated classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    /// At or above the healthy threshold.
    Healthy,
    /// Between the two thresholds.
    Degraded,
    /// Below the degraded threshold.
    Unhealthy,
}

impl Verdict {
    /// Process exit code for this verdict.
    #[must_use]
    pub const fn exit_code(self) -> i32 {
        match self {
            Self::Healthy => 0,
            Self::Degraded => 2,
            Self::Unhealthy => 1,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Healthy => "HEALTHY",
            Self::Degraded => "DEGRADED",
            Self::Unhealthy => "UNHEALTHY",
        };
        write!(f, "{s}")
    }
}

/// Verdict boundaries, in percent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerdictThresholds {
    /// Lowest rate that is HEALTHY.
    pub healthy_pct: u8,
    /// Lowest rate that is DEGRADED.
    pub degraded_pct: u8,
}

impl Default for VerdictThresholds {
    fn default() -> Self {
        Self {
            healthy_pct: HEALTHY_THRESHOLD_PCT,
            degraded_pct: DEGRADED_THRESHOLD_PCT,
        }
    }
}

impl VerdictThresholds {
    /// Classifies a success rate.
    #[must_use]
    pub const fn classify(&self, success_rate_pct: u8) -> Verdict {
        if success_rate_pct >= self.healthy_pct {
            Verdict::Healthy
        } else if success_rate_pct >= self.degraded_pct {
            Verdict::Degraded
        } else {
            Verdict::Unhealthy
        }
    }
}

/// Result of one health-check run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    /// When the report was built.
    pub timestamp: DateTime<Utc>,
    /// Number of probe results.
    pub total_checks: usize,
    /// Results that passed.
    pub passed: usize,
    /// Results that failed, skipped ones included.
    pub failed: usize,
    /// `passed / total * 100`, floored.
    pub success_rate_pct: u8,
    /// Classification of the rate.
    pub verdict: Verdict,
    /// Every probe result.
    pub results: Vec<ProbeResult>,
    /// Failures and warnings with suggested actions.
    pub diagnostics: Vec<String>,
}

/// Builds [`HealthReport`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct HealthReportAggregator {
    thresholds: VerdictThresholds,
}

impl HealthReportAggregator {
    /// Creates an aggregator with the standard thresholds.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            thresholds: VerdictThresholds {
                healthy_pct: HEALTHY_THRESHOLD_PCT,
                degraded_pct: DEGRADED_THRESHOLD_PCT,
            },
        }
    }

    /// Creates an aggregator with custom thresholds.
    #[must_use]
    pub const fn with_thresholds(thresholds: VerdictThresholds) -> Self {
        Self { thresholds }
    }

    /// Aggregates probe results. An empty list is 0% and UNHEALTHY.
    #[must_use]
    pub fn aggregate(&self, results: Vec<ProbeResult>) -> HealthReport {
        let total_checks = results.len();
        let passed = results.iter().filter(|r| r.passed).count();
        let failed = total_checks - passed;

        let success_rate_pct = if total_checks == 0 {
            0
        } else {
            u8::try_from(passed * 100 / total_checks).unwrap_or(100)
        };
        let verdict = if total_checks == 0 {
            Verdict::Unhealthy
        } else {
            self.thresholds.classify(success_rate_pct)
        };

        let diagnostics = diagnose(&results);

        info!("Health: {passed}/{total_checks} checks passed ({success_rate_pct}%), {verdict}");

        HealthReport {
            timestamp: Utc::now(),
            total_checks,
            passed,
            failed,
            success_rate_pct,
            verdict,
            results,
            diagnostics,
        }
    }
}

fn diagnose(results: &[ProbeResult]) -> Vec<String> {
    let mut diagnostics = Vec::new();

    if results.is_empty() {
        diagnostics.push(String::from("no checks were run: no endpoint was resolved"));
        return diagnostics;
    }

    for result in results {
        if !result.passed && !result.is_skipped() {
            diagnostics.push(format!(
                "{} failed on {}: {}. {}",
                result.probe,
                result.endpoint.url,
                result.detail,
                suggestion(result.probe)
            ));
        }
        for warning in &result.warnings {
            diagnostics.push(format!("{} on {}: {warning}", result.probe, result.endpoint.url));
        }
    }

    diagnostics
}

const fn suggestion(probe: ProbeKind) -> &'static str {
    match probe {
        ProbeKind::Liveness => {
            "Check that tasks are running and the security group allows the service port"
        }
        ProbeKind::Capability => "Pull at least one model onto the server",
        ProbeKind::Inference => "Check the model name and the service logs for load errors",
        ProbeKind::Queue => "Check the queue URL and the send permissions of the caller",
        ProbeKind::Policy => "Redeploy with the intended auto-stop setting",
    }
}

impl HealthReport {
    /// Process exit code for this report.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        self.verdict.exit_code()
    }
}
