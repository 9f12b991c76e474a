use crate::aggregator::AggregatedReport;
use std::fmt;

/// Fail-rate at or above which a site is graded abnormal
pub const ABNORMAL_RATE: f64 = 0.20;
/// Fail-rate at or above which a site is graded as a warning
pub const WARNING_RATE: f64 = 0.10;

/// Coarse health grade used by the interactive check report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Normal,
    Warning,
    Abnormal,
    /// Probe finished but no node carried a usable measurement
    NoData,
    /// Probe service returned nothing after all retries
    ApiFailure,
}

impl HealthStatus {
    /// Grade a probe outcome; `None` means the probe itself failed
    pub fn grade(report: Option<&AggregatedReport>) -> Self {
        let Some(report) = report else {
            return HealthStatus::ApiFailure;
        };
        match report.fail_rate() {
            None => HealthStatus::NoData,
            Some(rate) if rate >= ABNORMAL_RATE => HealthStatus::Abnormal,
            Some(rate) if rate >= WARNING_RATE => HealthStatus::Warning,
            Some(_) => HealthStatus::Normal,
        }
    }

    pub fn is_problem(&self) -> bool {
        !matches!(self, HealthStatus::Normal)
    }

    /// Single-character marker for the text report
    pub fn marker(&self) -> &'static str {
        match self {
            HealthStatus::Normal => "✅",
            HealthStatus::Warning => "⚠️",
            HealthStatus::Abnormal => "❌",
            HealthStatus::NoData => "❔",
            HealthStatus::ApiFailure => "⛔",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            HealthStatus::Normal => "normal",
            HealthStatus::Warning => "warning",
            HealthStatus::Abnormal => "abnormal",
            HealthStatus::NoData => "no data",
            HealthStatus::ApiFailure => "probe API failure",
        };
        write!(f, "{}", label)
    }
}
