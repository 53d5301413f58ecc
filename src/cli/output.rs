//! Output formatting for CLI commands.
//!
//! Text output uses tables and colour; JSON output serialises the same
//! report structures the library returns.

use colored::Colorize;
use serde::Serialize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::cloud::LogEvent;
use crate::cost::{CostReport, CostStatus};
use crate::error::{OrchestratorError, Stage};
use crate::health::{HealthReport, Verdict};
use crate::lifecycle::{LifecycleOutcome, LifecyclePhase};
use crate::orchestrator::{DeployReport, StatusSnapshot};
use crate::stack::{DiffType, Resolution, StackDiff, TemplateValidationResult};

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug, Clone, Copy)]
pub struct OutputFormatter {
    format: OutputFormat,
}

#[derive(Tabled)]
struct ProbeRow {
    #[tabled(rename = "Probe")]
    probe: String,
    #[tabled(rename = "Endpoint")]
    endpoint: String,
    #[tabled(rename = "Result")]
    result: String,
    #[tabled(rename = "Latency")]
    latency: String,
    #[tabled(rename = "Detail")]
    detail: String,
}

#[derive(Tabled)]
struct DiffRow {
    #[tabled(rename = "Field")]
    field: String,
    #[tabled(rename = "Deployed")]
    old: String,
    #[tabled(rename = "Requested")]
    new: String,
}

#[derive(Tabled)]
struct CostRow {
    #[tabled(rename = "Service")]
    service: String,
    #[tabled(rename = "USD")]
    amount: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Returns true for JSON output.
    #[must_use]
    pub const fn is_json(&self) -> bool {
        matches!(self.format, OutputFormat::Json)
    }

    /// Formats a stack diff shown before confirmation.
    #[must_use]
    pub fn format_diff(&self, diff: &StackDiff) -> String {
        match self.format {
            OutputFormat::Json => json(diff),
            OutputFormat::Text => {
                let headline = match diff.diff_type {
                    DiffType::Create => format!("Stack {} will be {}", diff.stack_name, "created".green()),
                    DiffType::Update => format!("Stack {} will be {}", diff.stack_name, "updated".yellow()),
                    DiffType::NoChange => {
                        return format!(
                            "{} Parameters and tags of stack {} are unchanged; the template will be resubmitted.\n",
                            "✓".green(),
                            diff.stack_name
                        );
                    }
                };

                let rows: Vec<DiffRow> = diff
                    .details
                    .iter()
                    .map(|d| DiffRow {
                        field: d.field.clone(),
                        old: d.old_value.clone().unwrap_or_else(|| String::from("-")),
                        new: d.new_value.clone().unwrap_or_else(|| String::from("-")),
                    })
                    .collect();

                format!("\n{headline}\n{}\n", Table::new(rows))
            }
        }
    }

    /// Formats a deploy result.
    #[must_use]
    pub fn format_deploy(&self, report: &DeployReport) -> String {
        match self.format {
            OutputFormat::Json => json(report),
            OutputFormat::Text => match report {
                DeployReport::DryRun { validation } => Self::validation_text(validation),
                DeployReport::Deployed {
                    deployment,
                    resolution,
                    health,
                } => {
                    let mut output = String::new();
                    let _ = writeln!(
                        output,
                        "\n{} Stack {} is {} ({:?}, {} poll(s))",
                        "✓".green(),
                        deployment.handle.stack_name,
                        deployment.handle.raw_status,
                        deployment.action,
                        deployment.polls
                    );
                    output.push_str(&Self::resolution_text(resolution));
                    output.push_str(&Self::health_text(health));
                    output
                }
            },
        }
    }

    /// Formats a health report.
    #[must_use]
    pub fn format_health(&self, report: &HealthReport) -> String {
        match self.format {
            OutputFormat::Json => json(report),
            OutputFormat::Text => Self::health_text(report),
        }
    }

    /// Formats a status snapshot.
    #[must_use]
    pub fn format_status(&self, snapshot: &StatusSnapshot) -> String {
        match self.format {
            OutputFormat::Json => json(snapshot),
            OutputFormat::Text => {
                let stack = &snapshot.stack;
                let mut output = String::new();

                let status = if stack.is_complete() {
                    stack.raw_status.green().to_string()
                } else {
                    stack.raw_status.yellow().to_string()
                };
                let _ = writeln!(output, "\nStack: {} ({}) {status}", stack.stack_name, stack.region);
                if let Some(reason) = &stack.reason {
                    let _ = writeln!(output, "   Reason: {reason}");
                }

                match &snapshot.service {
                    Some(service) => {
                        let _ = writeln!(
                            output,
                            "Service: {} {} [{}]",
                            service.identity,
                            service.state,
                            Self::phase(service.phase)
                        );
                    }
                    None => output.push_str("Service: not available\n"),
                }

                if let Some(queue) = &snapshot.queue {
                    let _ = writeln!(
                        output,
                        "Queue: {} visible, {} in flight, {} delayed",
                        queue.visible, queue.in_flight, queue.delayed
                    );
                }

                output.push_str(&Self::resolution_text(&snapshot.resolution));

                if let Some(health) = &snapshot.health {
                    output.push_str(&Self::health_text(health));
                }

                output
            }
        }
    }

    /// Formats a lifecycle outcome.
    #[must_use]
    pub fn format_lifecycle(&self, outcome: &LifecycleOutcome) -> String {
        match self.format {
            OutputFormat::Json => json(outcome),
            OutputFormat::Text => {
                let mut output = String::new();
                let _ = writeln!(
                    output,
                    "\n{} {} on {}: desired {} -> {}",
                    "✓".green(),
                    outcome.operation,
                    outcome.service,
                    outcome.previous.desired_count,
                    outcome.target
                );
                let _ = writeln!(
                    output,
                    "   Now: {} [{}]",
                    outcome.final_state,
                    Self::phase(outcome.phase)
                );
                for warning in &outcome.warnings {
                    let _ = writeln!(output, "{} {warning}", "⚠".yellow());
                }
                output
            }
        }
    }

    /// Formats a cost report.
    #[must_use]
    pub fn format_cost(&self, report: &CostReport) -> String {
        match self.format {
            OutputFormat::Json => json(report),
            OutputFormat::Text => {
                let mut output = String::new();
                let _ = writeln!(
                    output,
                    "\nSpend {} to {} (exclusive)",
                    report.period_start, report.period_end
                );

                let rows: Vec<CostRow> = report
                    .by_service
                    .iter()
                    .map(|(service, amount)| CostRow {
                        service: service.clone(),
                        amount: format!("{amount:.2}"),
                    })
                    .collect();
                if !rows.is_empty() {
                    output.push_str(&Table::new(rows).to_string());
                    output.push('\n');
                }

                let status = match report.status {
                    CostStatus::Excellent | CostStatus::Good => report.status.to_string().green(),
                    CostStatus::Acceptable => report.status.to_string().yellow(),
                    CostStatus::High => report.status.to_string().red(),
                };
                let _ = writeln!(output, "Total: ${:.2} {status}", report.total_usd);
                output
            }
        }
    }

    /// Formats log events.
    #[must_use]
    pub fn format_logs(&self, events: &[LogEvent]) -> String {
        match self.format {
            OutputFormat::Json => json(&events),
            OutputFormat::Text => {
                if events.is_empty() {
                    return String::from("No log events in the selected window.\n");
                }
                let mut output = String::new();
                for event in events {
                    let _ = writeln!(
                        output,
                        "{} {}",
                        event.timestamp.format("%Y-%m-%d %H:%M:%S").to_string().dimmed(),
                        event.message.trim_end()
                    );
                }
                output
            }
        }
    }

    /// Formats an error with the stage it came from; `fallback` names
    /// the command's stage when the error does not carry one.
    #[must_use]
    pub fn format_error(&self, error: &OrchestratorError, fallback: Stage) -> String {
        let stage = error.stage().unwrap_or(fallback);
        match self.format {
            OutputFormat::Json => json(&serde_json::json!({
                "status": "error",
                "stage": stage,
                "message": error.to_string(),
            })),
            OutputFormat::Text => match error {
                OrchestratorError::Timeout(_) => format!("{} {error}", "✗".red()),
                _ => format!("{} [{stage}] {error}", "✗".red()),
            },
        }
    }

    fn validation_text(validation: &TemplateValidationResult) -> String {
        let mut output = String::new();
        let mark = if validation.is_valid() { "✓".green() } else { "✗".red() };
        let _ = writeln!(
            output,
            "\n{mark} Dry run for {}: template validated, nothing deployed",
            validation.stack_name
        );
        if let Some(description) = &validation.validation.description {
            let _ = writeln!(output, "   Template: {description}");
        }
        let _ = writeln!(output, "   Parameters:");
        for (key, value) in &validation.parameters {
            let _ = writeln!(output, "     {key} = {value}");
        }
        let _ = writeln!(output, "   Tags:");
        for (key, value) in &validation.tags {
            let _ = writeln!(output, "     {key} = {value}");
        }
        for issue in &validation.issues {
            let _ = writeln!(output, "{} {issue}", "⚠".yellow());
        }
        output
    }

    fn resolution_text(resolution: &Resolution) -> String {
        let mut output = String::from("Endpoints:\n");
        if resolution.endpoints.is_empty() {
            let reason = resolution
                .empty_reason
                .as_ref()
                .map_or_else(|| String::from("none"), ToString::to_string);
            let _ = writeln!(output, "   none: {reason}");
        }
        for endpoint in &resolution.endpoints {
            let _ = writeln!(output, "   {} ({:?})", endpoint.url, endpoint.kind);
        }
        output
    }

    fn health_text(report: &HealthReport) -> String {
        let mut output = String::new();

        let rows: Vec<ProbeRow> = report
            .results
            .iter()
            .map(|r| ProbeRow {
                probe: r.probe.to_string(),
                endpoint: r.endpoint.url.clone(),
                result: if r.passed {
                    "pass".green().to_string()
                } else if r.is_skipped() {
                    "skip".dimmed().to_string()
                } else {
                    "fail".red().to_string()
                },
                latency: format!("{}ms", r.latency_ms),
                detail: truncate(&r.detail, 60),
            })
            .collect();

        if !rows.is_empty() {
            output.push('\n');
            output.push_str(&Table::new(rows).to_string());
            output.push('\n');
        }

        let verdict = match report.verdict {
            Verdict::Healthy => report.verdict.to_string().green(),
            Verdict::Degraded => report.verdict.to_string().yellow(),
            Verdict::Unhealthy => report.verdict.to_string().red(),
        };
        let _ = writeln!(
            output,
            "\nHealth: {verdict} ({}/{} passed, {}%)",
            report.passed, report.total_checks, report.success_rate_pct
        );

        if !report.diagnostics.is_empty() {
            output.push_str("\nDiagnostics:\n");
            for line in &report.diagnostics {
                let _ = writeln!(output, "   - {line}");
            }
        }

        output
    }

    fn phase(phase: LifecyclePhase) -> String {
        match phase {
            LifecyclePhase::Stable => phase.to_string().green().to_string(),
            LifecyclePhase::Scaling => phase.to_string().yellow().to_string(),
            LifecyclePhase::Stopped => phase.to_string().dimmed().to_string(),
        }
    }
}

fn json<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default()
}

/// Truncates to `max_len` characters.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{head}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CloudError, TimeoutError};
    use crate::health::{HealthReportAggregator, ProbeKind, ProbeResult};
    use crate::stack::{Endpoint, EndpointKind};

    fn report() -> HealthReport {
        let ep = Endpoint {
            url: String::from("http://alb"),
            kind: EndpointKind::LoadBalancer,
        };
        HealthReportAggregator::new().aggregate(vec![
            ProbeResult::pass(ProbeKind::Liveness, &ep, 50, "HTTP 200 after 1 attempt(s)"),
            ProbeResult::fail(ProbeKind::Inference, &ep, 0, "HTTP 500"),
        ])
    }

    #[test]
    fn test_health_text_shows_verdict_and_diagnostics() {
        let text = OutputFormatter::new(OutputFormat::Text).format_health(&report());
        assert!(text.contains("UNHEALTHY"));
        assert!(text.contains("1/2 passed, 50%"));
        assert!(text.contains("inference failed on http://alb"));
    }

    #[test]
    fn test_health_json_is_parseable() {
        let text = OutputFormatter::new(OutputFormat::Json).format_health(&report());
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["totalChecks"], 2);
        assert_eq!(value["verdict"], "UNHEALTHY");
        assert_eq!(value["results"][0]["probe"], "liveness");
    }

    #[test]
    fn test_error_names_stage() {
        let err = OrchestratorError::from(TimeoutError {
            stage: Stage::Deploy,
            resource: String::from("llm-testgen-dev"),
            expected: String::from("CREATE_COMPLETE"),
            last_observed: String::from("CREATE_IN_PROGRESS"),
            waited_secs: 1800,
        });

        let json = OutputFormatter::new(OutputFormat::Json).format_error(&err, Stage::Lifecycle);
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["stage"], "deploy");
        assert!(value["message"].as_str().unwrap().contains("llm-testgen-dev"));
    }

    #[test]
    fn test_error_without_stage_uses_fallback() {
        let err = OrchestratorError::from(CloudError::invalid_response("ecs", "empty body"));
        let text = OutputFormatter::new(OutputFormat::Text).format_error(&err, Stage::Lifecycle);
        assert!(text.contains("[lifecycle]"));
        assert!(text.contains("invalid response from ecs"));
    }

    #[test]
    fn test_truncate_is_char_safe() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("ééééééééééé", 6), "ééé...");
    }
}
