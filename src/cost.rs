//! Month-to-date spend.

use chrono::{Datelike, Days, NaiveDate, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

use crate::cloud::CostApi;
use crate::error::{OrchestratorError, Result};

/// Upper bound (exclusive) of an EXCELLENT month, in USD.
pub const EXCELLENT_BELOW_USD: f64 = 50.0;

/// Upper bound (exclusive) of a GOOD month, in USD.
pub const GOOD_BELOW_USD: f64 = 120.0;

/// Upper bound (exclusive) of an ACCEPTABLE month, in USD.
pub const ACCEPTABLE_BELOW_USD: f64 = 200.0;

/// Advisory spend classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CostStatus {
    /// Under $50.
    Excellent,
    /// Under $120.
    Good,
    /// Under $200.
    Acceptable,
    /// $200 or more.
    High,
}

impl CostStatus {
    /// Classifies a total.
    #[must_use]
    pub fn classify(total_usd: f64) -> Self {
        if total_usd < EXCELLENT_BELOW_USD {
            Self::Excellent
        } else if total_usd < GOOD_BELOW_USD {
            Self::Good
        } else if total_usd < ACCEPTABLE_BELOW_USD {
            Self::Acceptable
        } else {
            Self::High
        }
    }
}

impl fmt::Display for CostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Excellent => "EXCELLENT",
            Self::Good => "GOOD",
            Self::Acceptable => "ACCEPTABLE",
            Self::High => "HIGH",
        };
        write!(f, "{s}")
    }
}

/// Spend for the current billing period.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CostReport {
    /// First day of the period.
    pub period_start: NaiveDate,
    /// Day after the last included day.
    pub period_end: NaiveDate,
    /// Tags spend was filtered by.
    pub tags: BTreeMap<String, String>,
    /// Sum over services.
    pub total_usd: f64,
    /// Spend per platform service.
    pub by_service: BTreeMap<String, f64>,
    /// Classification of `total_usd`.
    pub status: CostStatus,
}

/// Reports spend attributed to a deployment's tags.
pub struct CostReporter {
    costs: Arc<dyn CostApi>,
}

impl CostReporter {
    /// Creates a reporter.
    #[must_use]
    pub fn new(costs: Arc<dyn CostApi>) -> Self {
        Self { costs }
    }

    /// Month-to-date spend for resources carrying `tags`.
    ///
    /// # Errors
    ///
    /// Returns an error if spend cannot be read.
    pub async fn current_period_cost(&self, tags: &BTreeMap<String, String>) -> Result<CostReport> {
        self.period_cost(tags, Utc::now().date_naive()).await
    }

    /// Spend from the first of `today`'s month through `today`.
    ///
    /// # Errors
    ///
    /// Returns an error if spend cannot be read.
    pub async fn period_cost(&self, tags: &BTreeMap<String, String>, today: NaiveDate) -> Result<CostReport> {
        let (start, end) = current_period(today)?;
        debug!("Reading spend {start}..{end} for {tags:?}");

        let mut by_service = BTreeMap::new();
        for entry in self.costs.cost_by_service(tags, start, end).await? {
            if entry.amount_usd.abs() > 0.0 {
                *by_service.entry(entry.service).or_insert(0.0) += entry.amount_usd;
            }
        }

        let total_usd: f64 = by_service.values().sum();
        let status = CostStatus::classify(total_usd);
        info!("Spend since {start}: ${total_usd:.2} ({status})");

        Ok(CostReport {
            period_start: start,
            period_end: end,
            tags: tags.clone(),
            total_usd,
            by_service,
            status,
        })
    }
}

/// `[first of month, tomorrow)` for `today`.
///
/// # Errors
///
/// Returns an error only at the edge of the calendar range.
pub fn current_period(today: NaiveDate) -> Result<(NaiveDate, NaiveDate)> {
    let start = today
        .with_day(1)
        .ok_or_else(|| OrchestratorError::internal(format!("no first day for {today}")))?;
    let end = today
        .checked_add_days(Days::new(1))
        .ok_or_else(|| OrchestratorError::internal(format!("no day after {today}")))?;
    Ok((start, end))
}

impl fmt::Debug for CostReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CostReporter").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::{MockCostApi, ServiceCost};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_classification_boundaries() {
        assert_eq!(CostStatus::classify(0.0), CostStatus::Excellent);
        assert_eq!(CostStatus::classify(49.99), CostStatus::Excellent);
        assert_eq!(CostStatus::classify(50.0), CostStatus::Good);
        assert_eq!(CostStatus::classify(119.99), CostStatus::Good);
        assert_eq!(CostStatus::classify(120.0), CostStatus::Acceptable);
        assert_eq!(CostStatus::classify(200.0), CostStatus::High);
    }

    #[test]
    fn test_period_spans_month_start_to_tomorrow() {
        assert_eq!(
            current_period(date(2026, 10, 16)).unwrap(),
            (date(2026, 10, 1), date(2026, 10, 17))
        );
        assert_eq!(
            current_period(date(2026, 12, 31)).unwrap(),
            (date(2026, 12, 1), date(2027, 1, 1))
        );
    }

    #[tokio::test]
    async fn test_report_sums_services() {
        let mut costs = MockCostApi::new();
        costs
            .expect_cost_by_service()
            .withf(|tags, start, end| {
                tags.get("Project").map(String::as_str) == Some("llm-testgen")
                    && *start == NaiveDate::from_ymd_opt(2026, 10, 1).unwrap()
                    && *end == NaiveDate::from_ymd_opt(2026, 10, 17).unwrap()
            })
            .returning(|_, _, _| {
                Ok(vec![
                    ServiceCost {
                        service: String::from("Amazon Elastic Container Service"),
                        amount_usd: 61.25,
                    },
                    ServiceCost {
                        service: String::from("Amazon Simple Storage Service"),
                        amount_usd: 1.75,
                    },
                    ServiceCost {
                        service: String::from("Tax"),
                        amount_usd: 0.0,
                    },
                ])
            });

        let tags = BTreeMap::from([(String::from("Project"), String::from("llm-testgen"))]);
        let report = CostReporter::new(Arc::new(costs))
            .period_cost(&tags, date(2026, 10, 16))
            .await
            .unwrap();

        assert_eq!(report.by_service.len(), 2);
        assert!((report.total_usd - 63.0).abs() < f64::EPSILON);
        assert_eq!(report.status, CostStatus::Good);
    }
}
