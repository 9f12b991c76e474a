//! Built-in alert rules
//!
//! Each rule inspects one site's aggregated probe report and says whether an
//! alert should fire, and why.

use crate::aggregator::AggregatedReport;
use crate::triggers::TriggerRule;
use log::warn;

/// Fail-rate threshold used when the configured one is unusable
pub const DEFAULT_THRESHOLD: f64 = 0.20;

/// Failed nodes in one region that fire an alert on their own
pub const REGION_FAILURE_LIMIT: usize = 3;

/// Fail-rate threshold in `[0.0, 1.0]`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlertThreshold(f64);

impl Default for AlertThreshold {
    fn default() -> Self {
        Self(DEFAULT_THRESHOLD)
    }
}

impl AlertThreshold {
    /// Build a threshold, falling back to [`DEFAULT_THRESHOLD`] when the
    /// value is outside `[0.0, 1.0]` or not finite
    pub fn new(value: f64) -> Self {
        if value.is_finite() && (0.0..=1.0).contains(&value) {
            Self(value)
        } else {
            warn!(
                "Alert threshold {} is outside [0, 1], using default {}",
                value, DEFAULT_THRESHOLD
            );
            Self::default()
        }
    }

    pub fn value(&self) -> f64 {
        self.0
    }
}

/// Fires when the overall fail-rate is strictly above the threshold
pub struct FailRateRule {
    pub threshold: AlertThreshold,
}

impl FailRateRule {
    pub fn new(threshold: AlertThreshold) -> Self {
        Self { threshold }
    }
}

impl TriggerRule for FailRateRule {
    fn evaluate(&self, report: &AggregatedReport) -> Option<String> {
        let rate = report.fail_rate()?;
        if rate > self.threshold.value() {
            Some(format!(
                "fail-rate {:.2}% above threshold {:.2}%",
                rate * 100.0,
                self.threshold.value() * 100.0
            ))
        } else {
            None
        }
    }

    fn name(&self) -> &str {
        "FailRateRule"
    }
}

/// Fires when a single region collects enough failed nodes, whatever the
/// overall fail-rate
pub struct RegionConcentrationRule {
    pub min_failed_nodes: usize,
}

impl RegionConcentrationRule {
    pub fn new(min_failed_nodes: usize) -> Self {
        Self { min_failed_nodes }
    }

    /// Three failed nodes in one region
    pub fn with_defaults() -> Self {
        Self::new(REGION_FAILURE_LIMIT)
    }
}

impl TriggerRule for RegionConcentrationRule {
    fn evaluate(&self, report: &AggregatedReport) -> Option<String> {
        report
            .regions
            .iter()
            .find(|(_, count)| **count >= self.min_failed_nodes)
            .map(|(region, count)| {
                format!(
                    "{} failed nodes in {} (limit {})",
                    count, region, self.min_failed_nodes
                )
            })
    }

    fn name(&self) -> &str {
        "RegionConcentrationRule"
    }
}


// Property-based tests
#[cfg(test)]
mod property_tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    // The fail-rate rule fires exactly when failed/valid exceeds the threshold
    #[quickcheck]
    fn prop_fail_rate_rule_matches_ratio(valid: u8, failed: u8, threshold_pct: u8) -> bool {
        let valid = valid as usize;
        let failed = (failed as usize).min(valid);
        let threshold = AlertThreshold::new((threshold_pct % 101) as f64 / 100.0);
        let report = AggregatedReport {
            total: valid,
            failed,
            ..AggregatedReport::default()
        };

        let fired = FailRateRule::new(threshold).evaluate(&report).is_some();
        let expected = valid > 0 && (failed as f64 / valid as f64) > threshold.value();
        fired == expected
    }

    // Thresholds are always usable, whatever the input
    #[quickcheck]
    fn prop_threshold_always_in_range(value: f64) -> bool {
        (0.0..=1.0).contains(&AlertThreshold::new(value).value())
    }
}
