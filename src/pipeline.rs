//! Extract-transform-load pipeline.
//!
//! Ties the version gate, the insights engine and the store together. A
//! run either persists a complete result for the dataset version or leaves
//! the store untouched.

use crate::insights::{should_run, InsightsEngine, VersionScheme};
use crate::models::{Dataset, InsightsResult};
use crate::storage::InsightStore;
use anyhow::{Context, Result};
use tracing::{debug, info};

/// What a pipeline run did.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// The stored insights are already current for this version.
    Skipped { version: String, persisted: String },
    /// Insights were computed and stored.
    Completed(InsightsResult),
}

/// Runs insights for datasets against a store.
pub struct Pipeline<S: InsightStore> {
    store: S,
    engine: InsightsEngine,
    scheme: VersionScheme,
}

impl<S: InsightStore> Pipeline<S> {
    pub fn new(store: S, engine: InsightsEngine, scheme: VersionScheme) -> Self {
        Self {
            store,
            engine,
            scheme,
        }
    }

    /// Whether `version` is newer than the last persisted one.
    pub fn has_new_version(&self, version: &str) -> Result<bool> {
        let persisted = self
            .store
            .latest_version()
            .context("Failed to read the persisted dataset version")?;
        self.gate(version, persisted.as_deref())
    }

    fn gate(&self, version: &str, persisted: Option<&str>) -> Result<bool> {
        let run = should_run(version, persisted, self.scheme)?;
        match persisted {
            Some(persisted) => info!(
                "Dataset version {} vs persisted {} ({} ordering): {}",
                version,
                persisted,
                self.scheme,
                if run { "new data" } else { "up to date" }
            ),
            None => info!("No persisted insights, dataset version {} is new", version),
        }
        Ok(run)
    }

    /// Compute insights for the dataset.
    pub async fn transform(&self, dataset: &Dataset) -> Result<InsightsResult> {
        self.engine
            .compute(dataset)
            .await
            .with_context(|| {
                format!("Failed to compute insights for version {}", dataset.version())
            })
    }

    /// Persist every metric of `result` in one transaction.
    pub fn load(&self, result: &InsightsResult) -> Result<usize> {
        let rows = result.to_rows().context("Failed to serialize insights")?;
        debug!("Writing {} rows for version {}", rows.len(), result.version);
        self.store.upsert(&rows).context("Failed to store insights")
    }

    /// Gate, transform and load. `force` bypasses the version gate.
    pub async fn run(&self, dataset: &Dataset, force: bool) -> Result<RunOutcome> {
        let version = dataset.version();
        info!("Checking dataset version {}", version);

        if force {
            info!("Forced run, ignoring the version check");
        } else if !self.has_new_version(version)? {
            let persisted = self
                .store
                .latest_version()
                .context("Failed to read the persisted dataset version")?;
            return Ok(RunOutcome::Skipped {
                version: version.to_string(),
                persisted: persisted.unwrap_or_default(),
            });
        }

        info!("Transforming {} records", dataset.len());
        let result = self.transform(dataset).await?;

        info!("Loading insights for version {}", result.version);
        let written = self.load(&result)?;
        info!("Pipeline complete: {} rows stored", written);

        Ok(RunOutcome::Completed(result))
    }

    /// Insights currently in the store, or `None` when nothing was stored.
    pub fn stored_insights(&self) -> Result<Option<InsightsResult>> {
        let rows = self.store.all().context("Failed to read stored insights")?;
        if rows.is_empty() {
            return Ok(None);
        }
        let result = InsightsResult::from_rows(rows).context("Stored insights are incomplete")?;
        Ok(Some(result))
    }
}
