//! Population views over stored statistics
//!
//! Everything here is pure and synchronous. It only ever sees sanitized
//! trees; hydration payloads never reach this module.

pub mod aggregator;
pub mod percentile;
pub mod summary;

use crate::tree::StatTree;

pub use aggregator::{
    aggregate, aggregate_records, AggregationInputError, CohortAggregator, CohortReport,
    DistributionBucket,
};
pub use percentile::{default_catalog, percentiles, Direction, MetricSpec, PercentileResult};
pub use summary::AggregateSummary;

/// The map holding the statistics sections
///
/// Desktop exports wrap everything under `raw`; older uploads do not.
pub fn stats_root(tree: &StatTree) -> &StatTree {
    match tree.get("raw") {
        Some(raw) if raw.is_map() => raw,
        _ => tree,
    }
}
