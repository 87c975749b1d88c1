//! Data models for posts, datasets and computed insights.
//!
//! This module contains the record schema supplied by the dataset source,
//! the shard view used by the engine, and the typed result that is
//! serialized into the insights store.

use crate::error::{InsightsError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::ops::Range;
use std::sync::Arc;

/// Name under which the dataset version token is stored.
pub const VERSION_KEY: &str = "version";

/// A single social-media post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Post body.
    pub text: String,
    /// Author identifier (handle or DID).
    pub author: String,
    /// Creation time as an ISO-8601 string.
    pub created_at: String,
    /// Whether the post carries images.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_images: Option<bool>,
    /// URI of the post this one replies to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    /// URI of the post itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
}

#[cfg(test)]
impl Record {
    /// Creates a record with only the required columns set.
    pub fn new(
        text: impl Into<String>,
        author: impl Into<String>,
        created_at: impl Into<String>,
    ) -> Self {
        Self {
            text: text.into(),
            author: author.into(),
            created_at: created_at.into(),
            has_images: None,
            reply_to: None,
            uri: None,
        }
    }
}

/// An ordered, read-only collection of records with a version token.
#[derive(Debug, Clone)]
pub struct Dataset {
    records: Arc<[Record]>,
    version: String,
}

impl Dataset {
    pub fn new(records: Vec<Record>, version: impl Into<String>) -> Self {
        Self {
            records: records.into(),
            version: version.into(),
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    #[cfg(test)]
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Split the dataset into contiguous shards of at most `batch_size` records.
    ///
    /// A `batch_size` of zero is treated as one.
    pub fn shards(&self, batch_size: usize) -> Vec<Shard> {
        let batch_size = batch_size.max(1);
        (0..self.records.len())
            .step_by(batch_size)
            .map(|start| Shard {
                records: Arc::clone(&self.records),
                range: start..start.saturating_add(batch_size).min(self.records.len()),
            })
            .collect()
    }
}

/// A contiguous slice of a dataset, cheap to clone and send to a worker.
#[derive(Debug, Clone)]
pub struct Shard {
    records: Arc<[Record]>,
    range: Range<usize>,
}

impl Shard {
    /// Absolute index of the first record of this shard in the dataset.
    pub fn offset(&self) -> usize {
        self.range.start
    }

    pub fn records(&self) -> &[Record] {
        &self.records[self.range.clone()]
    }

    /// Records paired with their absolute dataset index.
    pub fn indexed(&self) -> impl Iterator<Item = (usize, &Record)> {
        let offset = self.offset();
        self.records()
            .iter()
            .enumerate()
            .map(move |(i, r)| (offset + i, r))
    }

    pub fn len(&self) -> usize {
        self.range.len()
    }
}

/// The metrics computed on every run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MetricKind {
    UniquePosts,
    AveragePostLength,
    TopAuthors,
    HourlyDistribution,
    TopHashtags,
}

impl MetricKind {
    /// Every metric, in persistence order.
    pub const ALL: [MetricKind; 5] = [
        MetricKind::UniquePosts,
        MetricKind::AveragePostLength,
        MetricKind::TopAuthors,
        MetricKind::HourlyDistribution,
        MetricKind::TopHashtags,
    ];

    /// Name used as the storage key.
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::UniquePosts => "unique_posts",
            MetricKind::AveragePostLength => "average_post_length",
            MetricKind::TopAuthors => "top_authors",
            MetricKind::HourlyDistribution => "hourly_distribution",
            MetricKind::TopHashtags => "top_hashtags",
        }
    }

    /// Decode a stored text value into the value kind this metric produces.
    pub fn decode(&self, text: &str) -> Result<MetricValue> {
        let invalid = |e: serde_json::Error| InsightsError::InvalidMetric {
            metric: self.as_str().to_string(),
            reason: e.to_string(),
        };
        let value = match self {
            MetricKind::UniquePosts => {
                MetricValue::Count(serde_json::from_str(text).map_err(invalid)?)
            }
            MetricKind::AveragePostLength => {
                MetricValue::Mean(serde_json::from_str(text).map_err(invalid)?)
            }
            MetricKind::TopAuthors | MetricKind::TopHashtags => {
                MetricValue::Ranking(serde_json::from_str(text).map_err(invalid)?)
            }
            MetricKind::HourlyDistribution => {
                MetricValue::Histogram(serde_json::from_str(text).map_err(invalid)?)
            }
        };
        Ok(value)
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final value of one metric.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    /// Exact cardinality.
    Count(u64),
    /// Arithmetic mean.
    Mean(f64),
    /// Keys with counts, highest count first.
    Ranking(Vec<(String, u64)>),
    /// Hour of day to occurrence count.
    Histogram(BTreeMap<u32, u64>),
}

impl MetricValue {
    /// Short name of the value kind, for error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            MetricValue::Count(_) => "count",
            MetricValue::Mean(_) => "mean",
            MetricValue::Ranking(_) => "ranking",
            MetricValue::Histogram(_) => "histogram",
        }
    }

    /// Text encoding handed to the store.
    pub fn encode(&self) -> Result<String> {
        let text = match self {
            MetricValue::Count(n) => n.to_string(),
            MetricValue::Mean(mean) => serde_json::to_string(mean)?,
            MetricValue::Ranking(entries) => serde_json::to_string(entries)?,
            MetricValue::Histogram(hours) => serde_json::to_string(hours)?,
        };
        Ok(text)
    }
}

/// The complete set of insights for one dataset version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightsResult {
    pub unique_posts: u64,
    pub average_post_length: f64,
    pub top_authors: Vec<(String, u64)>,
    pub hourly_distribution: BTreeMap<u32, u64>,
    pub top_hashtags: Vec<(String, u64)>,
    pub version: String,
}

impl InsightsResult {
    /// Assemble a result from one value per metric.
    pub fn from_values(
        mut values: HashMap<MetricKind, MetricValue>,
        version: impl Into<String>,
    ) -> Result<Self> {
        let mut take = |kind: MetricKind| {
            values
                .remove(&kind)
                .ok_or_else(|| InsightsError::MissingMetric(kind.as_str().to_string()))
        };

        let unique_posts = match take(MetricKind::UniquePosts)? {
            MetricValue::Count(n) => n,
            other => return Err(mismatch(MetricKind::UniquePosts, &other)),
        };
        let average_post_length = match take(MetricKind::AveragePostLength)? {
            MetricValue::Mean(mean) => mean,
            other => return Err(mismatch(MetricKind::AveragePostLength, &other)),
        };
        let top_authors = match take(MetricKind::TopAuthors)? {
            MetricValue::Ranking(entries) => entries,
            other => return Err(mismatch(MetricKind::TopAuthors, &other)),
        };
        let hourly_distribution = match take(MetricKind::HourlyDistribution)? {
            MetricValue::Histogram(hours) => hours,
            other => return Err(mismatch(MetricKind::HourlyDistribution, &other)),
        };
        let top_hashtags = match take(MetricKind::TopHashtags)? {
            MetricValue::Ranking(entries) => entries,
            other => return Err(mismatch(MetricKind::TopHashtags, &other)),
        };

        Ok(Self {
            unique_posts,
            average_post_length,
            top_authors,
            hourly_distribution,
            top_hashtags,
            version: version.into(),
        })
    }

    /// The value of one metric.
    pub fn value(&self, kind: MetricKind) -> MetricValue {
        match kind {
            MetricKind::UniquePosts => MetricValue::Count(self.unique_posts),
            MetricKind::AveragePostLength => MetricValue::Mean(self.average_post_length),
            MetricKind::TopAuthors => MetricValue::Ranking(self.top_authors.clone()),
            MetricKind::HourlyDistribution => {
                MetricValue::Histogram(self.hourly_distribution.clone())
            }
            MetricKind::TopHashtags => MetricValue::Ranking(self.top_hashtags.clone()),
        }
    }

    /// Serialize into `(metric, text)` rows, version last.
    pub fn to_rows(&self) -> Result<Vec<(String, String)>> {
        let mut rows = Vec::with_capacity(MetricKind::ALL.len() + 1);
        for kind in MetricKind::ALL {
            rows.push((kind.as_str().to_string(), self.value(kind).encode()?));
        }
        rows.push((VERSION_KEY.to_string(), self.version.clone()));
        Ok(rows)
    }

    /// Rebuild a result from stored rows. Unknown metrics are ignored.
    pub fn from_rows(rows: impl IntoIterator<Item = (String, String)>) -> Result<Self> {
        let rows: HashMap<String, String> = rows.into_iter().collect();

        let mut values = HashMap::new();
        for kind in MetricKind::ALL {
            let text = rows
                .get(kind.as_str())
                .ok_or_else(|| InsightsError::MissingMetric(kind.as_str().to_string()))?;
            values.insert(kind, kind.decode(text)?);
        }

        let version = rows
            .get(VERSION_KEY)
            .cloned()
            .ok_or_else(|| InsightsError::MissingMetric(VERSION_KEY.to_string()))?;

        Self::from_values(values, version)
    }
}

/// How the insights in a report were obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportSource {
    /// Computed and persisted by this run.
    Computed,
    /// Computed without persisting (`--dry-run`).
    DryRun,
    /// Read back from the store.
    Stored,
}

impl fmt::Display for ReportSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportSource::Computed => write!(f, "Computed and stored"),
            ReportSource::DryRun => write!(f, "Computed (dry run, not stored)"),
            ReportSource::Stored => write!(f, "Read from store"),
        }
    }
}

/// Metadata about a report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMetadata {
    /// Dataset path, URL, or database the insights came from.
    pub dataset: String,
    /// When the report was generated.
    pub generated_at: DateTime<Utc>,
    /// How the insights were obtained.
    pub source: ReportSource,
    /// Number of records aggregated, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub records: Option<usize>,
    /// Computation time in seconds, when computed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
}

/// The complete insights report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub metadata: ReportMetadata,
    pub insights: InsightsResult,
}

fn mismatch(kind: MetricKind, value: &MetricValue) -> InsightsError {
    InsightsError::MetricMismatch {
        expected: kind.as_str(),
        found: value.kind_name(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dataset(n: usize) -> Dataset {
        let records = (0..n)
            .map(|i| Record::new(format!("post {}", i), "alice", "2024-12-26T10:00:00"))
            .collect();
        Dataset::new(records, "v1")
    }

    fn sample_result() -> InsightsResult {
        InsightsResult {
            unique_posts: 3,
            average_post_length: 22.25,
            top_authors: vec![("Alice".to_string(), 2), ("Bob".to_string(), 1)],
            hourly_distribution: [(10, 2), (11, 1)].into_iter().collect(),
            top_hashtags: vec![("#test".to_string(), 2)],
            version: "0.1.0".to_string(),
        }
    }

    #[test]
    fn test_shards_cover_dataset() {
        let ds = dataset(10);
        let shards = ds.shards(4);

        assert_eq!(shards.len(), 3);
        assert_eq!(shards[0].offset(), 0);
        assert_eq!(shards[1].offset(), 4);
        assert_eq!(shards[2].offset(), 8);
        assert_eq!(shards[2].len(), 2);
        assert_eq!(shards.iter().map(Shard::len).sum::<usize>(), 10);
    }

    #[test]
    fn test_shards_empty_dataset() {
        assert!(dataset(0).shards(1000).is_empty());
    }

    #[test]
    fn test_shard_indexed_uses_absolute_positions() {
        let ds = dataset(5);
        let shards = ds.shards(2);
        let indices: Vec<usize> = shards[1].indexed().map(|(i, _)| i).collect();
        assert_eq!(indices, vec![2, 3]);
        assert_eq!(shards[1].records()[0].text, "post 2");
    }

    #[test]
    fn test_record_optional_columns() {
        let json = r#"{"text":"hi","author":"bob","created_at":"2024-12-26T10:00:00","has_images":true}"#;
        let record: Record = serde_json::from_str(json).unwrap();
        assert_eq!(record.has_images, Some(true));
        assert!(record.reply_to.is_none());
    }

    #[test]
    fn test_metric_value_encoding() {
        assert_eq!(MetricValue::Count(3).encode().unwrap(), "3");
        assert_eq!(MetricValue::Mean(0.0).encode().unwrap(), "0.0");
        assert_eq!(
            MetricValue::Ranking(vec![("#test".to_string(), 2)]).encode().unwrap(),
            r##"[["#test",2]]"##
        );
        let hours: BTreeMap<u32, u64> = [(10, 2), (12, 1)].into_iter().collect();
        assert_eq!(
            MetricValue::Histogram(hours).encode().unwrap(),
            r#"{"10":2,"12":1}"#
        );
    }

    #[test]
    fn test_rows_round_trip() {
        let result = sample_result();
        let rows = result.to_rows().unwrap();

        assert_eq!(rows.len(), 6);
        assert_eq!(rows.last().unwrap(), &("version".to_string(), "0.1.0".to_string()));

        let decoded = InsightsResult::from_rows(rows).unwrap();
        assert_eq!(decoded, result);
    }

    #[test]
    fn test_from_rows_missing_metric() {
        let rows = vec![("version".to_string(), "1".to_string())];
        let err = InsightsResult::from_rows(rows).unwrap_err();
        assert!(matches!(err, InsightsError::MissingMetric(m) if m == "unique_posts"));
    }

    #[test]
    fn test_decode_invalid_value() {
        let err = MetricKind::TopAuthors.decode("not json").unwrap_err();
        assert!(matches!(err, InsightsError::InvalidMetric { .. }));
    }

    #[test]
    fn test_from_values_rejects_wrong_kind() {
        let mut values: HashMap<MetricKind, MetricValue> = sample_result()
            .to_rows()
            .unwrap()
            .into_iter()
            .filter_map(|(name, text)| {
                MetricKind::ALL
                    .into_iter()
                    .find(|k| k.as_str() == name)
                    .map(|k| (k, k.decode(&text).unwrap()))
            })
            .collect();
        values.insert(MetricKind::UniquePosts, MetricValue::Mean(1.0));

        let err = InsightsResult::from_values(values, "v").unwrap_err();
        assert!(matches!(err, InsightsError::MetricMismatch { .. }));
    }
}
