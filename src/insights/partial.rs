//! Shard-local partial aggregates.
//!
//! Each reducer scans one shard and returns mergeable state. Nothing is
//! finalized here: counts that depend on the whole dataset (distinct texts,
//! rankings) are only computed after all partials are merged.

use crate::error::{InsightsError, Result};
use crate::models::{MetricKind, Shard};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Timelike};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Sum and count of post lengths.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LengthStats {
    pub sum: u64,
    pub count: u64,
}

impl LengthStats {
    pub fn merge(&mut self, other: LengthStats) {
        self.sum += other.sum;
        self.count += other.count;
    }
}

/// Where an occurrence sits in the dataset: record index, then token index
/// within the record.
pub type Position = (usize, usize);

/// Occurrence count of a key and the position where it first appeared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyStat {
    pub count: u64,
    pub first_seen: Position,
}

/// Frequency counter that remembers first occurrence for stable ranking.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrequencyTable {
    entries: HashMap<String, KeyStat>,
}

impl FrequencyTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one occurrence of `key` in record `index`.
    pub fn observe(&mut self, key: &str, index: usize) {
        self.observe_at(key, (index, 0));
    }

    /// Count one occurrence of `key` at `position`.
    pub fn observe_at(&mut self, key: &str, position: Position) {
        match self.entries.get_mut(key) {
            Some(stat) => {
                stat.count += 1;
                stat.first_seen = stat.first_seen.min(position);
            }
            None => {
                self.entries.insert(
                    key.to_string(),
                    KeyStat {
                        count: 1,
                        first_seen: position,
                    },
                );
            }
        }
    }

    /// Add another table's counts into this one.
    pub fn merge(&mut self, other: FrequencyTable) {
        for (key, theirs) in other.entries {
            self.entries
                .entry(key)
                .and_modify(|ours| {
                    ours.count += theirs.count;
                    ours.first_seen = ours.first_seen.min(theirs.first_seen);
                })
                .or_insert(theirs);
        }
    }

    #[cfg(test)]
    pub fn get(&self, key: &str) -> Option<KeyStat> {
        self.entries.get(key).copied()
    }

    /// The `k` most frequent keys, count descending, ties by first occurrence.
    pub fn top(&self, k: usize) -> Vec<(String, u64)> {
        let mut ranked: Vec<(&String, &KeyStat)> = self.entries.iter().collect();
        ranked.sort_by(|(_, a), (_, b)| {
            b.count
                .cmp(&a.count)
                .then_with(|| a.first_seen.cmp(&b.first_seen))
        });
        ranked.truncate(k);
        ranked
            .into_iter()
            .map(|(key, stat)| (key.clone(), stat.count))
            .collect()
    }
}

/// Intermediate state for one metric over one or more shards.
#[derive(Debug, Clone, PartialEq)]
pub enum PartialAggregate {
    UniquePosts(HashSet<String>),
    LengthStats(LengthStats),
    Authors(FrequencyTable),
    Hours(BTreeMap<u32, u64>),
    Hashtags(FrequencyTable),
}

impl PartialAggregate {
    /// Identity element for `kind`.
    pub fn empty(kind: MetricKind) -> Self {
        match kind {
            MetricKind::UniquePosts => PartialAggregate::UniquePosts(HashSet::new()),
            MetricKind::AveragePostLength => PartialAggregate::LengthStats(LengthStats::default()),
            MetricKind::TopAuthors => PartialAggregate::Authors(FrequencyTable::new()),
            MetricKind::HourlyDistribution => PartialAggregate::Hours(BTreeMap::new()),
            MetricKind::TopHashtags => PartialAggregate::Hashtags(FrequencyTable::new()),
        }
    }

    /// Run the reducer for `kind` over one shard.
    pub fn reduce(kind: MetricKind, shard: &Shard) -> Result<Self> {
        let partial = match kind {
            MetricKind::UniquePosts => PartialAggregate::UniquePosts(unique_posts_partial(shard)),
            MetricKind::AveragePostLength => {
                PartialAggregate::LengthStats(length_stats_partial(shard))
            }
            MetricKind::TopAuthors => PartialAggregate::Authors(author_counts_partial(shard)),
            MetricKind::HourlyDistribution => PartialAggregate::Hours(hour_counts_partial(shard)?),
            MetricKind::TopHashtags => PartialAggregate::Hashtags(hashtag_counts_partial(shard)),
        };
        Ok(partial)
    }

    pub fn kind(&self) -> MetricKind {
        match self {
            PartialAggregate::UniquePosts(_) => MetricKind::UniquePosts,
            PartialAggregate::LengthStats(_) => MetricKind::AveragePostLength,
            PartialAggregate::Authors(_) => MetricKind::TopAuthors,
            PartialAggregate::Hours(_) => MetricKind::HourlyDistribution,
            PartialAggregate::Hashtags(_) => MetricKind::TopHashtags,
        }
    }

    /// Merge two partials of the same metric.
    pub fn merge(self, other: PartialAggregate) -> Result<Self> {
        let merged = match (self, other) {
            (PartialAggregate::UniquePosts(mut a), PartialAggregate::UniquePosts(b)) => {
                if a.len() < b.len() {
                    return PartialAggregate::UniquePosts(b).merge(PartialAggregate::UniquePosts(a));
                }
                a.extend(b);
                PartialAggregate::UniquePosts(a)
            }
            (PartialAggregate::LengthStats(mut a), PartialAggregate::LengthStats(b)) => {
                a.merge(b);
                PartialAggregate::LengthStats(a)
            }
            (PartialAggregate::Authors(mut a), PartialAggregate::Authors(b)) => {
                a.merge(b);
                PartialAggregate::Authors(a)
            }
            (PartialAggregate::Hours(mut a), PartialAggregate::Hours(b)) => {
                for (hour, count) in b {
                    *a.entry(hour).or_default() += count;
                }
                PartialAggregate::Hours(a)
            }
            (PartialAggregate::Hashtags(mut a), PartialAggregate::Hashtags(b)) => {
                a.merge(b);
                PartialAggregate::Hashtags(a)
            }
            (a, b) => {
                return Err(InsightsError::MetricMismatch {
                    expected: a.kind().as_str(),
                    found: b.kind().as_str(),
                })
            }
        };
        Ok(merged)
    }
}

/// Distinct post texts in the shard.
pub fn unique_posts_partial(shard: &Shard) -> HashSet<String> {
    shard.records().iter().map(|r| r.text.clone()).collect()
}

/// Total length (in characters) and number of posts.
pub fn length_stats_partial(shard: &Shard) -> LengthStats {
    shard
        .records()
        .iter()
        .fold(LengthStats::default(), |mut stats, record| {
            stats.sum += record.text.chars().count() as u64;
            stats.count += 1;
            stats
        })
}

/// Posts per author.
pub fn author_counts_partial(shard: &Shard) -> FrequencyTable {
    let mut table = FrequencyTable::new();
    for (index, record) in shard.indexed() {
        table.observe(&record.author, index);
    }
    table
}

/// Posts per hour of day. Fails on the first unparsable timestamp.
pub fn hour_counts_partial(shard: &Shard) -> Result<BTreeMap<u32, u64>> {
    let mut hours = BTreeMap::new();
    for (index, record) in shard.indexed() {
        let created =
            parse_created_at(&record.created_at).map_err(|reason| InsightsError::DataFormat {
                index,
                field: "created_at",
                reason,
            })?;
        *hours.entry(created.hour()).or_default() += 1;
    }
    Ok(hours)
}

/// Whitespace-separated tokens starting with `#`, punctuation included.
pub fn hashtag_counts_partial(shard: &Shard) -> FrequencyTable {
    let mut table = FrequencyTable::new();
    for (index, record) in shard.indexed() {
        for (position, token) in record.text.split_whitespace().enumerate() {
            if token.starts_with('#') {
                table.observe_at(token, (index, position));
            }
        }
    }
    table
}

const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Parse an ISO-8601 timestamp as written, without timezone conversion.
pub fn parse_created_at(value: &str) -> std::result::Result<NaiveDateTime, String> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.naive_local());
    }

    let local = strip_offset(value);
    for format in NAIVE_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(local, format) {
            return Ok(dt);
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(local, "%Y-%m-%d") {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return Ok(midnight);
        }
    }

    Err(format!("'{}' is not an ISO-8601 datetime", value))
}

/// Drop a trailing `Z` or `±HH:MM` designator.
fn strip_offset(value: &str) -> &str {
    if let Some(rest) = value.strip_suffix(['Z', 'z']) {
        return rest;
    }

    let bytes = value.as_bytes();
    if bytes.len() > 6 {
        let tail = &bytes[bytes.len() - 6..];
        let is_offset = matches!(tail[0], b'+' | b'-')
            && tail[1].is_ascii_digit()
            && tail[2].is_ascii_digit()
            && tail[3] == b':'
            && tail[4].is_ascii_digit()
            && tail[5].is_ascii_digit();
        if is_offset {
            return &value[..value.len() - 6];
        }
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Dataset, Record};

    fn shard_of(records: Vec<Record>) -> Shard {
        let ds = Dataset::new(records, "v1");
        ds.shards(usize::MAX).remove(0)
    }

    fn post(text: &str, author: &str, created_at: &str) -> Record {
        Record::new(text, author, created_at)
    }

    #[test]
    fn test_unique_posts_partial_keeps_set() {
        let shard = shard_of(vec![
            post("a", "x", "2024-12-26T10:00:00"),
            post("a", "y", "2024-12-26T10:00:00"),
            post("b", "z", "2024-12-26T10:00:00"),
        ]);
        let set = unique_posts_partial(&shard);
        assert_eq!(set.len(), 2);
        assert!(set.contains("a") && set.contains("b"));
    }

    #[test]
    fn test_length_stats_counts_characters() {
        let shard = shard_of(vec![
            post("héllo", "x", "2024-12-26T10:00:00"),
            post("hi", "x", "2024-12-26T10:00:00"),
        ]);
        assert_eq!(length_stats_partial(&shard), LengthStats { sum: 7, count: 2 });
    }

    #[test]
    fn test_author_counts_track_first_seen() {
        let shard = shard_of(vec![
            post("1", "bob", "2024-12-26T10:00:00"),
            post("2", "alice", "2024-12-26T10:00:00"),
            post("3", "bob", "2024-12-26T10:00:00"),
        ]);
        let table = author_counts_partial(&shard);
        assert_eq!(table.get("bob"), Some(KeyStat { count: 2, first_seen: (0, 0) }));
        assert_eq!(table.get("alice"), Some(KeyStat { count: 1, first_seen: (1, 0) }));
    }

    #[test]
    fn test_hour_counts() {
        let shard = shard_of(vec![
            post("1", "a", "2024-12-26T10:00:00"),
            post("2", "a", "2024-12-26T10:30:00"),
            post("3", "a", "2024-12-26T23:59:59.999"),
        ]);
        let hours = hour_counts_partial(&shard).unwrap();
        assert_eq!(hours.get(&10), Some(&2));
        assert_eq!(hours.get(&23), Some(&1));
        assert_eq!(hours.len(), 2);
    }

    #[test]
    fn test_hour_counts_rejects_bad_timestamp() {
        let records = vec![
            post("1", "a", "2024-12-26T10:00:00"),
            post("2", "a", "yesterday"),
        ];
        let ds = Dataset::new(records, "v1");
        let shard = ds.shards(1).remove(1);

        let err = hour_counts_partial(&shard).unwrap_err();
        match err {
            InsightsError::DataFormat { index, field, .. } => {
                assert_eq!(index, 1);
                assert_eq!(field, "created_at");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_parse_created_at_shapes() {
        let hour = |s: &str| parse_created_at(s).map(|dt| dt.hour());

        assert_eq!(hour("2024-12-26T10:00:00"), Ok(10));
        assert_eq!(hour("2024-12-26 07:15:00"), Ok(7));
        assert_eq!(hour("2024-12-26T18:05"), Ok(18));
        assert_eq!(hour("2024-12-26"), Ok(0));
        // Offsets are not converted: the written wall-clock hour is kept.
        assert_eq!(hour("2024-12-26T10:00:00.123Z"), Ok(10));
        assert_eq!(hour("2024-12-26T10:00:00+05:00"), Ok(10));
        assert_eq!(hour("2024-12-26T10:00Z"), Ok(10));
        assert_eq!(hour("2024-12-26T10:00+05:00"), Ok(10));
        assert_eq!(hour("2024-12-26 21:45-03:00"), Ok(21));
        assert_eq!(hour("2024-12-26 21:45:10.5-03:00"), Ok(21));
        assert_eq!(hour("2024-12-26Z"), Ok(0));
        assert_eq!(hour("2024-12-26+01:00"), Ok(0));

        assert!(parse_created_at("").is_err());
        assert!(parse_created_at("2024-13-01T00:00:00").is_err());
        assert!(parse_created_at("10:00").is_err());
        assert!(parse_created_at("2024-12-26T10:00+5:00").is_err());
        assert!(parse_created_at("Z").is_err());
    }

    #[test]
    fn test_hashtags_literal_tokens() {
        let shard = shard_of(vec![
            post("Hello #rust, and #rust", "a", "2024-12-26T10:00:00"),
            post("no tags # here? mid#tag", "a", "2024-12-26T10:00:00"),
        ]);
        let table = hashtag_counts_partial(&shard);

        assert_eq!(table.get("#rust,").map(|s| s.count), Some(1));
        assert_eq!(table.get("#rust").map(|s| s.count), Some(1));
        assert_eq!(table.get("#").map(|s| s.count), Some(1));
        assert!(table.get("mid#tag").is_none());
    }

    #[test]
    fn test_tied_hashtags_in_one_post_keep_written_order() {
        let tags: Vec<String> = ('a'..='l').map(|c| format!("#{}", c)).collect();
        let shard = shard_of(vec![post(&tags.join(" "), "a", "2024-12-26T10:00:00")]);

        let table = hashtag_counts_partial(&shard);

        assert_eq!(table.get("#c"), Some(KeyStat { count: 1, first_seen: (0, 2) }));
        let expected: Vec<(String, u64)> = tags.iter().take(10).map(|t| (t.clone(), 1)).collect();
        for _ in 0..20 {
            assert_eq!(table.top(10), expected);
        }
    }

    #[test]
    fn test_hashtag_first_seen_spans_records() {
        let shard = shard_of(vec![
            post("#late #early", "a", "2024-12-26T10:00:00"),
            post("#early", "a", "2024-12-26T10:00:00"),
        ]);

        let table = hashtag_counts_partial(&shard);

        assert_eq!(table.get("#late"), Some(KeyStat { count: 1, first_seen: (0, 0) }));
        assert_eq!(table.get("#early"), Some(KeyStat { count: 2, first_seen: (0, 1) }));
        assert_eq!(
            table.top(10),
            vec![("#early".to_string(), 2), ("#late".to_string(), 1)]
        );
    }

    #[test]
    fn test_frequency_merge_is_commutative() {
        let mut a = FrequencyTable::new();
        a.observe("x", 5);
        a.observe("y", 6);
        let mut b = FrequencyTable::new();
        b.observe("x", 1);
        b.observe("z", 2);

        let mut ab = a.clone();
        ab.merge(b.clone());
        let mut ba = b;
        ba.merge(a);

        assert_eq!(ab, ba);
        assert_eq!(ab.get("x"), Some(KeyStat { count: 2, first_seen: (1, 0) }));
    }

    #[test]
    fn test_top_breaks_ties_by_first_seen() {
        let mut table = FrequencyTable::new();
        table.observe("carol", 4);
        table.observe("bob", 2);
        table.observe("alice", 3);
        table.observe("alice", 7);

        assert_eq!(
            table.top(10),
            vec![
                ("alice".to_string(), 2),
                ("bob".to_string(), 1),
                ("carol".to_string(), 1),
            ]
        );
        assert_eq!(table.top(1).len(), 1);
    }

    #[test]
    fn test_merge_rejects_mismatched_kinds() {
        let a = PartialAggregate::empty(MetricKind::TopAuthors);
        let b = PartialAggregate::empty(MetricKind::TopHashtags);
        assert!(matches!(
            a.merge(b),
            Err(InsightsError::MetricMismatch { .. })
        ));
    }

    #[test]
    fn test_reduce_dispatches_by_kind() {
        let shard = shard_of(vec![post("a #b", "x", "2024-12-26T10:00:00")]);
        for kind in MetricKind::ALL {
            let partial = PartialAggregate::reduce(kind, &shard).unwrap();
            assert_eq!(partial.kind(), kind);
        }
    }
}
