//! Result aggregation for one probe batch
//!
//! This module provides the ResultAggregator which folds a batch of raw node
//! payloads into failure statistics by operator, region and failure kind.

use crate::classifier::{classify, FailureKind, NodeOutcome, ProbeNodeResult};
use crate::events::RawNode;
use log::{debug, warn};
use std::collections::BTreeMap;
use std::fmt;

/// Network operator bucket for a probe node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Operator {
    Telecom,
    Unicom,
    Mobile,
    /// Catch-all for any label not matching the three carriers
    Other,
}

impl Operator {
    pub const ALL: [Operator; 4] = [
        Operator::Telecom,
        Operator::Unicom,
        Operator::Mobile,
        Operator::Other,
    ];

    /// Substrings identifying each carrier in the vendor's free-text ISP label
    fn markers(&self) -> &'static [&'static str] {
        match self {
            Operator::Telecom => &["电信", "telecom"],
            Operator::Unicom => &["联通", "unicom"],
            Operator::Mobile => &["移动", "mobile"],
            Operator::Other => &[],
        }
    }

    /// Bucket an ISP label by substring match, falling back to `Other`
    ///
    /// # Examples
    ///
    /// ```
    /// use teleping::aggregator::Operator;
    ///
    /// assert_eq!(Operator::from_label("广东电信"), Operator::Telecom);
    /// assert_eq!(Operator::from_label("China Unicom"), Operator::Unicom);
    /// assert_eq!(Operator::from_label("教育网"), Operator::Other);
    /// ```
    pub fn from_label(label: &str) -> Self {
        let lowered = label.to_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|op| op.markers().iter().any(|m| lowered.contains(m)))
            .unwrap_or(Operator::Other)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Operator::Telecom => "Telecom",
            Operator::Unicom => "Unicom",
            Operator::Mobile => "Mobile",
            Operator::Other => "Other",
        };
        write!(f, "{}", label)
    }
}

/// Failure statistics for one site's probe batch
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedReport {
    /// Number of node payloads received
    pub total: usize,
    /// Nodes left out because they carried no usable measurement
    pub skipped: usize,
    /// Nodes classified as failed
    pub failed: usize,
    /// Failed nodes per operator, always holding all four buckets
    pub operators: BTreeMap<Operator, usize>,
    /// Failed nodes per region
    pub regions: BTreeMap<String, usize>,
    /// Failed nodes per failure kind and region
    pub failure_types: BTreeMap<FailureKind, BTreeMap<String, usize>>,
}

impl Default for AggregatedReport {
    fn default() -> Self {
        Self {
            total: 0,
            skipped: 0,
            failed: 0,
            operators: Operator::ALL.iter().map(|op| (*op, 0)).collect(),
            regions: BTreeMap::new(),
            failure_types: BTreeMap::new(),
        }
    }
}

impl AggregatedReport {
    /// Nodes that count towards the fail-rate denominator
    pub fn valid_total(&self) -> usize {
        self.total.saturating_sub(self.skipped)
    }

    /// Whether at least one node carried a usable measurement
    pub fn has_usable_data(&self) -> bool {
        self.valid_total() > 0
    }

    /// Failed over valid nodes; `None` when there are no valid nodes
    pub fn fail_rate(&self) -> Option<f64> {
        match self.valid_total() {
            0 => None,
            valid => Some(self.failed as f64 / valid as f64),
        }
    }

    /// Failed-node count for one operator bucket
    pub fn operator_count(&self, operator: Operator) -> usize {
        self.operators.get(&operator).copied().unwrap_or(0)
    }

    /// Regions sorted by failed count, highest first, ties by name
    pub fn top_regions(&self, limit: usize) -> Vec<(&str, usize)> {
        sorted_counts(&self.regions, limit)
    }

    /// Regions for one failure kind, sorted like [`Self::top_regions`]
    pub fn top_regions_for(&self, kind: FailureKind, limit: usize) -> Vec<(&str, usize)> {
        self.failure_types
            .get(&kind)
            .map(|regions| sorted_counts(regions, limit))
            .unwrap_or_default()
    }

    /// Record a node that was left out of the statistics
    pub fn record_skipped(&mut self) {
        self.total += 1;
        self.skipped += 1;
    }

    /// Record a usable node with its classification outcome
    pub fn record(&mut self, node: &ProbeNodeResult, outcome: NodeOutcome) {
        self.total += 1;

        let NodeOutcome::Failed(kind) = outcome else {
            return;
        };

        self.failed += 1;
        *self
            .operators
            .entry(Operator::from_label(&node.isp))
            .or_insert(0) += 1;
        *self.regions.entry(node.region.clone()).or_insert(0) += 1;
        *self
            .failure_types
            .entry(kind)
            .or_default()
            .entry(node.region.clone())
            .or_insert(0) += 1;
    }
}

fn sorted_counts(counts: &BTreeMap<String, usize>, limit: usize) -> Vec<(&str, usize)> {
    let mut sorted: Vec<(&str, usize)> = counts.iter().map(|(k, v)| (k.as_str(), *v)).collect();
    // BTreeMap iteration is already name-ordered, so a stable sort keeps ties by name
    sorted.sort_by(|a, b| b.1.cmp(&a.1));
    sorted.truncate(limit);
    sorted
}

/// Folds node batches into [`AggregatedReport`]s
#[derive(Debug, Default, Clone)]
pub struct ResultAggregator;

impl ResultAggregator {
    pub fn new() -> Self {
        Self
    }

    /// Aggregate a full node batch for one site
    ///
    /// # Examples
    ///
    /// ```
    /// use teleping::aggregator::ResultAggregator;
    /// use serde_json::json;
    ///
    /// let batch: Vec<_> = [json!({"status": 200, "loss": 0}), json!({"status": 502, "loss": 0})]
    ///     .into_iter()
    ///     .filter_map(|v| v.as_object().cloned())
    ///     .collect();
    ///
    /// let report = ResultAggregator::new().aggregate(&batch);
    /// assert_eq!(report.failed, 1);
    /// assert_eq!(report.fail_rate(), Some(0.5));
    /// ```
    pub fn aggregate(&self, nodes: &[RawNode]) -> AggregatedReport {
        let mut report = AggregatedReport::default();

        for raw in nodes {
            match ProbeNodeResult::from_raw(raw) {
                Ok(node) => {
                    let outcome = classify(&node);
                    if let NodeOutcome::Failed(kind) = outcome {
                        debug!(
                            "Node failed: {} (region={}, isp={}, ip={})",
                            kind, node.region, node.isp, node.ip
                        );
                    }
                    report.record(&node, outcome);
                }
                Err(reason) => {
                    debug!("Skipping node: {}", reason);
                    report.record_skipped();
                }
            }
        }

        if report.skipped > 0 {
            warn!(
                "Skipped {} of {} nodes with unusable data",
                report.skipped, report.total
            );
        }

        report
    }
}


// Property-based tests
#[cfg(test)]
mod property_tests {
    use super::*;
    use quickcheck::{Arbitrary, Gen};
    use quickcheck_macros::quickcheck;
    use serde_json::json;

    /// A node payload that may be healthy, failing or unusable
    #[derive(Debug, Clone)]
    struct ArbitraryNode(RawNode);

    impl Arbitrary for ArbitraryNode {
        fn arbitrary(g: &mut Gen) -> Self {
            let statuses = [json!(200), json!(0), json!(404), json!(502), json!("--"), json!("")];
            let losses = [json!(0), json!(100), json!("50"), json!(""), json!(null)];
            let regions = ["北京", "上海", "广东", ""];
            let isps = ["电信", "联通", "移动", "其他"];

            let value = json!({
                "status": g.choose(&statuses).cloned(),
                "loss": g.choose(&losses).cloned(),
                "province_name": g.choose(&regions).copied(),
                "isp_name": g.choose(&isps).copied(),
                "ip": if bool::arbitrary(g) { "1.1.1.1" } else { "0.0.0.0" },
            });
            ArbitraryNode(value.as_object().cloned().unwrap_or_default())
        }
    }

    // Counts stay consistent whatever mix of nodes arrives
    #[quickcheck]
    fn prop_report_counts_are_consistent(nodes: Vec<ArbitraryNode>) -> bool {
        let batch: Vec<RawNode> = nodes.into_iter().map(|n| n.0).collect();
        let report = ResultAggregator::new().aggregate(&batch);

        let operator_sum: usize = report.operators.values().sum();
        let region_sum: usize = report.regions.values().sum();
        let kind_sum: usize = report
            .failure_types
            .values()
            .flat_map(|regions| regions.values())
            .sum();

        report.total == batch.len()
            && report.failed + report.skipped <= report.total
            && operator_sum == report.failed
            && region_sum == report.failed
            && kind_sum == report.failed
            && report.operators.len() == 4
            && match report.fail_rate() {
                Some(rate) => (0.0..=1.0).contains(&rate) && report.valid_total() > 0,
                None => report.valid_total() == 0,
            }
    }
}
