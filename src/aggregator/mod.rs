/// Batch aggregation of per-node probe results
pub mod result_aggregator;

pub use result_aggregator::{AggregatedReport, Operator, ResultAggregator};
