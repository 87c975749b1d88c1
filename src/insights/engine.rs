//! Aggregation orchestrator.
//!
//! Shards are reduced on tokio's blocking pool with at most `workers`
//! shards in flight per metric. The first failing shard aborts its metric
//! and the whole run; nothing is returned unless every metric succeeded.

use super::combine::{combine, DEFAULT_TOP_K};
use super::partial::PartialAggregate;
use crate::error::{InsightsError, Result};
use crate::models::{Dataset, InsightsResult, MetricKind, Shard};
use futures::stream::{self, StreamExt, TryStreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, info, trace, warn};

/// Default number of records per shard.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Default number of shards reduced concurrently.
pub const DEFAULT_WORKERS: usize = 4;

/// Settings threaded through a computation.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Records per shard.
    pub batch_size: usize,
    /// Shards reduced concurrently.
    pub workers: usize,
    /// Entries kept in rankings.
    pub top_k: usize,
    /// Draw a progress bar on stderr.
    pub show_progress: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            workers: DEFAULT_WORKERS,
            top_k: DEFAULT_TOP_K,
            show_progress: false,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(InsightsError::Configuration(
                "batch size must be at least 1".to_string(),
            ));
        }
        if self.workers == 0 {
            return Err(InsightsError::Configuration(
                "worker count must be at least 1".to_string(),
            ));
        }
        if self.top_k == 0 {
            return Err(InsightsError::Configuration(
                "top-k must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Computes every metric over a dataset.
#[derive(Debug, Clone)]
pub struct InsightsEngine {
    config: EngineConfig,
}

impl InsightsEngine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Run all metrics and assemble the result for the dataset's version.
    pub async fn compute(&self, dataset: &Dataset) -> Result<InsightsResult> {
        let started = Instant::now();
        let shards = dataset.shards(self.config.batch_size);

        info!(
            "Computing insights over {} records in {} shards ({} workers)",
            dataset.len(),
            shards.len(),
            self.config.workers
        );

        if dataset.is_empty() {
            debug!("Empty dataset, every metric takes its identity value");
        }

        let progress = self.progress_bar((shards.len() * MetricKind::ALL.len()) as u64);
        let mut values = HashMap::with_capacity(MetricKind::ALL.len());

        for kind in MetricKind::ALL {
            progress.set_message(kind.as_str());
            let partials = match self.reduce_shards(kind, &shards, &progress).await {
                Ok(partials) => partials,
                Err(e) => {
                    progress.abandon();
                    warn!("Aborting insights run: {} failed: {}", kind, e);
                    return Err(e);
                }
            };
            debug!("Combining {} partials for {}", partials.len(), kind);
            values.insert(kind, combine(kind, partials, self.config.top_k)?);
        }

        progress.finish_and_clear();
        info!(
            "Computed {} metrics in {:.2}s",
            values.len(),
            started.elapsed().as_secs_f64()
        );

        InsightsResult::from_values(values, dataset.version())
    }

    /// Reduce every shard for one metric, stopping at the first error.
    async fn reduce_shards(
        &self,
        kind: MetricKind,
        shards: &[Shard],
        progress: &ProgressBar,
    ) -> Result<Vec<PartialAggregate>> {
        stream::iter(shards.iter().cloned())
            .map(|shard| {
                let progress = progress.clone();
                tokio::task::spawn_blocking(move || {
                    trace!(
                        "Reducing {} over records {}..{}",
                        kind,
                        shard.offset(),
                        shard.offset() + shard.len()
                    );
                    let partial = PartialAggregate::reduce(kind, &shard);
                    progress.inc(1);
                    partial
                })
            })
            .buffer_unordered(self.config.workers)
            .map(|joined| match joined {
                Ok(partial) => partial,
                Err(e) => Err(InsightsError::Worker(e.to_string())),
            })
            .try_collect()
            .await
    }

    fn progress_bar(&self, len: u64) -> ProgressBar {
        if !self.config.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(len);
        let style = ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
        )
        .map(|style| style.progress_chars("#>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
        pb.set_style(style);
        pb
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Record;

    fn sample_dataset() -> Dataset {
        let rows = [
            ("Hello world! #test", "Alice", "2024-12-26T10:00:00"),
            ("Another post without hashtags", "Bob", "2024-12-26T11:00:00"),
            ("Hello world! #test", "Alice", "2024-12-26T10:30:00"),
            ("Unique post here #unique", "Charlie", "2024-12-26T12:00:00"),
        ];
        let records = rows
            .iter()
            .map(|(text, author, at)| Record::new(*text, *author, *at))
            .collect();
        Dataset::new(records, "0.0.0")
    }

    /// Deterministic dataset with many ties and duplicates spread over shards.
    fn generated_dataset(n: usize) -> Dataset {
        let authors = ["ann", "ben", "cat", "dan", "eve", "fay", "gus"];
        let tags = ["#rust", "#go", "#zig", "#c", "#rust,", "#ml"];
        let mut seed: u64 = 42;
        let mut next = move || {
            seed = seed
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            (seed >> 33) as usize
        };

        let records = (0..n)
            .map(|_| {
                let author = authors[next() % authors.len()];
                let tag = tags[next() % tags.len()];
                let text = format!("post {} about {} #x{}", next() % 50, tag, next() % 3);
                let at = format!(
                    "2024-12-{:02}T{:02}:{:02}:00",
                    1 + next() % 28,
                    next() % 24,
                    next() % 60
                );
                Record::new(text, author, at)
            })
            .collect();
        Dataset::new(records, "gen")
    }

    fn engine(batch_size: usize, workers: usize) -> InsightsEngine {
        InsightsEngine::new(EngineConfig {
            batch_size,
            workers,
            ..EngineConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_compute_sample_dataset() {
        let ds = sample_dataset();
        let result = engine(2, 2).compute(&ds).await.unwrap();

        let expected_avg = ds
            .records()
            .iter()
            .map(|r| r.text.chars().count() as f64)
            .sum::<f64>()
            / 4.0;

        assert_eq!(result.unique_posts, 3);
        assert_eq!(result.average_post_length, expected_avg);
        assert_eq!(
            result.top_authors,
            vec![
                ("Alice".to_string(), 2),
                ("Bob".to_string(), 1),
                ("Charlie".to_string(), 1)
            ]
        );
        assert_eq!(
            result.hourly_distribution,
            [(10, 2), (11, 1), (12, 1)].into_iter().collect()
        );
        assert_eq!(
            result.top_hashtags,
            vec![("#test".to_string(), 2), ("#unique".to_string(), 1)]
        );
        assert_eq!(result.version, "0.0.0");
    }

    #[tokio::test]
    async fn test_duplicates_across_shards() {
        let records = ["a", "a", "b"]
            .iter()
            .map(|t| Record::new(*t, "x", "2024-12-26T10:00:00"))
            .collect();
        let ds = Dataset::new(records, "v");

        for batch in [1, 2, 3] {
            let result = engine(batch, 2).compute(&ds).await.unwrap();
            assert_eq!(result.unique_posts, 2, "batch size {}", batch);
        }
    }

    #[tokio::test]
    async fn test_shard_invariance() {
        let ds = generated_dataset(600);
        let reference = engine(ds.len(), 1).compute(&ds).await.unwrap();

        for (batch, workers) in [(1, 4), (7, 3), (64, 1), (100, 8), (599, 2), (5000, 4)] {
            let result = engine(batch, workers).compute(&ds).await.unwrap();
            assert_eq!(result, reference, "batch {} workers {}", batch, workers);
        }
    }

    #[tokio::test]
    async fn test_hashtags_tied_in_one_post_rank_in_written_order() {
        let text = "#a #b #c #d #e #f #g #h #i #j #k #l";
        let mut records = vec![Record::new(text, "x", "2024-12-26T10:00:00Z")];
        records.push(Record::new("no tags", "y", "2024-12-26T11:00+01:00"));
        let ds = Dataset::new(records, "v");

        let expected: Vec<(String, u64)> = text
            .split_whitespace()
            .take(10)
            .map(|t| (t.to_string(), 1))
            .collect();
        for (batch, workers) in [(1, 1), (1, 4), (2, 2), (1000, 8)] {
            for _ in 0..5 {
                let result = engine(batch, workers).compute(&ds).await.unwrap();
                assert_eq!(
                    result.top_hashtags, expected,
                    "batch {} workers {}",
                    batch, workers
                );
            }
        }
    }

    #[tokio::test]
    async fn test_empty_dataset() {
        let ds = Dataset::new(Vec::new(), "empty");
        let result = engine(1000, 4).compute(&ds).await.unwrap();

        assert_eq!(result.unique_posts, 0);
        assert_eq!(result.average_post_length, 0.0);
        assert!(result.top_authors.is_empty());
        assert!(result.hourly_distribution.is_empty());
        assert!(result.top_hashtags.is_empty());
        assert_eq!(result.version, "empty");
    }

    #[tokio::test]
    async fn test_bad_timestamp_fails_run() {
        let mut records: Vec<Record> = sample_dataset().records().to_vec();
        records.push(Record::new("late", "Dora", "26/12/2024 10:00"));
        let ds = Dataset::new(records, "broken");

        let err = engine(2, 2).compute(&ds).await.unwrap_err();
        match err {
            InsightsError::DataFormat { index, field, .. } => {
                assert_eq!(index, 4);
                assert_eq!(field, "created_at");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_top_k_limits_rankings() {
        let ds = generated_dataset(200);
        let engine = InsightsEngine::new(EngineConfig {
            top_k: 3,
            ..EngineConfig::default()
        })
        .unwrap();

        let result = tokio_test::block_on(engine.compute(&ds)).unwrap();
        assert_eq!(result.top_authors.len(), 3);
        assert_eq!(result.top_hashtags.len(), 3);
        assert!(result.top_authors[0].1 >= result.top_authors[1].1);
    }

    #[test]
    fn test_config_validation() {
        for config in [
            EngineConfig {
                batch_size: 0,
                ..EngineConfig::default()
            },
            EngineConfig {
                workers: 0,
                ..EngineConfig::default()
            },
            EngineConfig {
                top_k: 0,
                ..EngineConfig::default()
            },
        ] {
            assert!(matches!(
                InsightsEngine::new(config),
                Err(InsightsError::Configuration(_))
            ));
        }
        assert!(InsightsEngine::new(EngineConfig::default()).is_ok());
    }
}
