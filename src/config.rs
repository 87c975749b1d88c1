//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.postinsights.toml` files.

use crate::insights::{EngineConfig, VersionScheme};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default configuration file name, looked up in the working directory.
pub const CONFIG_FILE: &str = ".postinsights.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Dataset location and versioning.
    #[serde(default)]
    pub dataset: DatasetConfig,

    /// Aggregation engine settings.
    #[serde(default)]
    pub engine: EngineSettings,

    /// Remote download settings.
    #[serde(default)]
    pub fetch: FetchConfig,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// SQLite database holding the insights table.
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Directory where remote datasets are cached.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,

    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            cache_dir: default_cache_dir(),
            verbose: false,
        }
    }
}

fn default_db_path() -> String {
    "data/pipeline.db".to_string()
}

fn default_cache_dir() -> String {
    "data".to_string()
}

/// Where the posts come from and how their versions compare.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatasetConfig {
    /// Local JSON-lines file or directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Remote JSON-lines file, downloaded into the cache directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Explicit version token, overriding the detected one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Ordering used by the version gate.
    #[serde(default)]
    pub version_scheme: VersionScheme,
}

/// Aggregation engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Records per shard.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Shards reduced concurrently.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Entries kept in the author and hashtag rankings.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            workers: default_workers(),
            top_k: default_top_k(),
        }
    }
}

fn default_batch_size() -> usize {
    crate::insights::engine::DEFAULT_BATCH_SIZE
}

fn default_workers() -> usize {
    crate::insights::engine::DEFAULT_WORKERS
}

fn default_top_k() -> usize {
    crate::insights::combine::DEFAULT_TOP_K
}

/// Remote download settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Number of retries on failure.
    #[serde(default = "default_retries")]
    pub retries: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout(),
            retries: default_retries(),
        }
    }
}

fn default_timeout() -> u64 {
    300
}

fn default_retries() -> usize {
    3
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings.
    /// Only values given explicitly on the command line override the file.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref db) = args.db {
            self.general.db_path = db.display().to_string();
        }
        if let Some(ref cache_dir) = args.cache_dir {
            self.general.cache_dir = cache_dir.display().to_string();
        }

        // A source given on the command line replaces both configured sources
        if let Some(ref data) = args.data {
            self.dataset.path = Some(data.display().to_string());
            self.dataset.url = None;
        } else if let Some(ref url) = args.url {
            self.dataset.url = Some(url.clone());
            self.dataset.path = None;
        }
        if let Some(ref version) = args.dataset_version {
            self.dataset.version = Some(version.clone());
        }
        if let Some(scheme) = args.version_scheme {
            self.dataset.version_scheme = scheme.into();
        }

        if let Some(batch_size) = args.batch_size {
            self.engine.batch_size = batch_size;
        }
        if let Some(workers) = args.workers {
            self.engine.workers = workers;
        }
        if let Some(top_k) = args.top_k {
            self.engine.top_k = top_k;
        }

        if let Some(timeout) = args.timeout {
            self.fetch.timeout_seconds = timeout;
        }

        // Flags always override
        if args.verbose {
            self.general.verbose = true;
        }
    }

    /// Engine settings for a run.
    pub fn engine_config(&self, show_progress: bool) -> EngineConfig {
        EngineConfig {
            batch_size: self.engine.batch_size,
            workers: self.engine.workers,
            top_k: self.engine.top_k,
            show_progress,
        }
    }

    pub fn db_path(&self) -> PathBuf {
        PathBuf::from(&self.general.db_path)
    }

    pub fn cache_dir(&self) -> PathBuf {
        PathBuf::from(&self.general.cache_dir)
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}
