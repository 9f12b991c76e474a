use crate::aggregator::AggregatedReport;
use crate::config::Site;
use crate::events::Timestamp;
use crate::triggers::rules::{AlertThreshold, FailRateRule, RegionConcentrationRule};
use chrono::Utc;
use log::{info, warn};

/// Engine deciding whether a site's probe report should raise an alert
pub struct AlertDecisionEngine {
    rules: Vec<Box<dyn TriggerRule>>,
}

/// Trait for implementing rules that decide when an alert fires
pub trait TriggerRule: Send + Sync {
    /// Evaluate the report; `Some(reason)` when this rule fires
    fn evaluate(&self, report: &AggregatedReport) -> Option<String>;

    /// Get a human-readable name for this rule
    fn name(&self) -> &str;
}

/// Outcome of evaluating one site's report
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Batch was empty or every node was skipped; the site's health is unknown
    NoUsableData { site: Site, report: AggregatedReport },
    /// Report carried data and the rules were evaluated
    Verdict(AlertVerdict),
}

impl Decision {
    /// The verdict if an alert should fire
    pub fn alert(&self) -> Option<&AlertVerdict> {
        match self {
            Decision::Verdict(verdict) if verdict.triggered => Some(verdict),
            _ => None,
        }
    }

    pub fn report(&self) -> &AggregatedReport {
        match self {
            Decision::NoUsableData { report, .. } => report,
            Decision::Verdict(verdict) => &verdict.report,
        }
    }
}

/// Alert decision for one site in one monitoring pass
#[derive(Debug, Clone, PartialEq)]
pub struct AlertVerdict {
    /// When the decision was made
    pub timestamp: Timestamp,
    /// Site the report belongs to
    pub site: Site,
    /// Whether an alert should fire
    pub triggered: bool,
    /// Name of the first rule that fired
    pub triggered_by: Option<String>,
    /// Why that rule fired
    pub trigger_reason: Option<String>,
    /// Aggregated statistics the decision was based on
    pub report: AggregatedReport,
}

impl AlertVerdict {
    /// Fail-rate of a verdict; verdicts are only built for reports with data
    pub fn fail_rate(&self) -> f64 {
        self.report.fail_rate().unwrap_or(0.0)
    }
}

impl Default for AlertDecisionEngine {
    fn default() -> Self {
        Self::new(AlertThreshold::default())
    }
}

impl AlertDecisionEngine {
    /// Create an engine with the fail-rate rule followed by the region rule
    pub fn new(threshold: AlertThreshold) -> Self {
        let mut engine = Self::empty();
        engine.add_rule(Box::new(FailRateRule::new(threshold)));
        engine.add_rule(Box::new(RegionConcentrationRule::with_defaults()));
        engine
    }

    /// Create an engine with no rules
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Add a rule; rules are evaluated in insertion order
    pub fn add_rule(&mut self, rule: Box<dyn TriggerRule>) {
        self.rules.push(rule);
    }

    /// Get the number of configured rules
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Evaluate a site's report
    ///
    /// Stops at the first rule that fires. A report with no valid nodes
    /// yields [`Decision::NoUsableData`] without consulting any rule.
    pub fn evaluate(&self, site: &Site, report: AggregatedReport) -> Decision {
        if !report.has_usable_data() {
            warn!(
                "No usable probe data for {} ({} nodes, {} skipped)",
                site.name, report.total, report.skipped
            );
            return Decision::NoUsableData {
                site: site.clone(),
                report,
            };
        }

        let fired = self
            .rules
            .iter()
            .find_map(|rule| rule.evaluate(&report).map(|reason| (rule.name(), reason)));

        let (triggered_by, trigger_reason) = match fired {
            Some((name, reason)) => {
                info!("Alert triggered for {} by {}: {}", site.name, name, reason);
                (Some(name.to_string()), Some(reason))
            }
            None => (None, None),
        };

        Decision::Verdict(AlertVerdict {
            timestamp: Utc::now(),
            site: site.clone(),
            triggered: triggered_by.is_some(),
            triggered_by,
            trigger_reason,
            report,
        })
    }
}
