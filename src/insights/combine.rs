//! Combining shard partials into final metric values.
//!
//! All merges are associative and commutative, so partials may arrive in
//! any order. Rankings break ties by the first dataset position of each
//! key, which keeps them independent of shard layout.

use super::partial::{LengthStats, PartialAggregate};
use crate::error::Result;
use crate::models::{MetricKind, MetricValue};

/// Default number of entries kept in rankings.
pub const DEFAULT_TOP_K: usize = 10;

/// Merge every partial of `kind` and finalize the metric.
pub fn combine(
    kind: MetricKind,
    partials: impl IntoIterator<Item = PartialAggregate>,
    top_k: usize,
) -> Result<MetricValue> {
    let merged = partials
        .into_iter()
        .try_fold(PartialAggregate::empty(kind), PartialAggregate::merge)?;
    Ok(finish(merged, top_k))
}

/// Turn fully merged state into the reported value.
pub fn finish(merged: PartialAggregate, top_k: usize) -> MetricValue {
    match merged {
        PartialAggregate::UniquePosts(texts) => MetricValue::Count(texts.len() as u64),
        PartialAggregate::LengthStats(stats) => MetricValue::Mean(mean_length(stats)),
        PartialAggregate::Authors(table) | PartialAggregate::Hashtags(table) => {
            MetricValue::Ranking(table.top(top_k))
        }
        PartialAggregate::Hours(hours) => MetricValue::Histogram(hours),
    }
}

fn mean_length(stats: LengthStats) -> f64 {
    if stats.count == 0 {
        0.0
    } else {
        stats.sum as f64 / stats.count as f64
    }
}
