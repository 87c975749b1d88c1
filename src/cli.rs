//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use crate::insights::VersionScheme;
use clap::Parser;
use std::path::PathBuf;

/// PostInsights - aggregate statistics over social-media post datasets
///
/// Computes unique posts, average post length, top authors, hourly
/// distribution and top hashtags, and stores them in SQLite. Runs are
/// skipped when the dataset version has not advanced.
///
/// Examples:
///   postinsights --data ./posts.jsonl
///   postinsights --data ./dump/ --dataset-version 2024-12-26 --workers 8
///   postinsights --url https://example.com/posts.jsonl --cache-dir ./data
///   postinsights --show --format json
///   postinsights --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Local dataset: a JSON-lines file or a directory of .jsonl files
    #[arg(short, long, value_name = "PATH", env = "POSTINSIGHTS_DATA", conflicts_with = "url")]
    pub data: Option<PathBuf>,

    /// Remote JSON-lines dataset, downloaded into the cache directory
    #[arg(short, long, value_name = "URL", env = "POSTINSIGHTS_URL")]
    pub url: Option<String>,

    /// Version token for the dataset
    ///
    /// Overrides the VERSION file and the modification-time fallback.
    #[arg(long, value_name = "TOKEN")]
    pub dataset_version: Option<String>,

    /// How version tokens are compared (lexical, ordinal)
    #[arg(long, value_name = "SCHEME")]
    pub version_scheme: Option<SchemeArg>,

    /// SQLite database file holding the insights
    #[arg(long, value_name = "FILE", env = "POSTINSIGHTS_DB")]
    pub db: Option<PathBuf>,

    /// Directory where remote datasets are cached
    #[arg(long, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Records per shard
    #[arg(long, value_name = "COUNT")]
    pub batch_size: Option<usize>,

    /// Number of shards reduced concurrently
    #[arg(short, long, value_name = "NUM")]
    pub workers: Option<usize>,

    /// Entries kept in the author and hashtag rankings
    #[arg(long, value_name = "COUNT")]
    pub top_k: Option<usize>,

    /// Download timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Recompute even if the stored version is current
    #[arg(long)]
    pub force: bool,

    /// Download the remote dataset again even if it is cached
    #[arg(long)]
    pub refresh: bool,

    /// Compute and print insights without writing to the database
    #[arg(long, conflicts_with = "show")]
    pub dry_run: bool,

    /// Print the stored insights and exit
    #[arg(long)]
    pub show: bool,

    /// Report format (markdown, json)
    #[arg(long, default_value = "markdown", value_name = "FORMAT")]
    pub format: OutputFormat,

    /// Write the report to a file instead of stdout
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Path to configuration file
    ///
    /// If not specified, looks for .postinsights.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Generate a default .postinsights.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

/// Output format for the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
}

/// Version comparison scheme for --version-scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SchemeArg {
    Lexical,
    Ordinal,
}

impl From<SchemeArg> for VersionScheme {
    fn from(arg: SchemeArg) -> Self {
        match arg {
            SchemeArg::Lexical => VersionScheme::Lexical,
            SchemeArg::Ordinal => VersionScheme::Ordinal,
        }
    }
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        // Skip validation for --init-config
        if self.init_config {
            return Ok(());
        }

        if let Some(ref url) = self.url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err("Dataset URL must start with 'http://' or 'https://'".to_string());
            }
        }

        if let Some(ref data) = self.data {
            if !data.exists() {
                return Err(format!("Dataset path does not exist: {}", data.display()));
            }
        }

        if self.batch_size == Some(0) {
            return Err("Batch size must be at least 1".to_string());
        }

        if self.workers == Some(0) {
            return Err("Workers must be at least 1".to_string());
        }

        if self.top_k == Some(0) {
            return Err("Top-k must be at least 1".to_string());
        }

        if self.timeout == Some(0) {
            return Err("Timeout must be at least 1 second".to_string());
        }

        // Check for conflicting options
        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings. `verbose_default`
    /// comes from the config file; `--quiet` overrides it.
    pub fn log_level(&self, verbose_default: bool) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose || verbose_default {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}
