//! PostInsights - batch insights over social-media post datasets
//!
//! A CLI tool that loads a versioned JSON-lines dataset of posts, computes
//! aggregate insights in parallel shards and persists them to SQLite,
//! skipping datasets whose version has not advanced.
//!
//! Exit codes:
//!   0 - Success (insights stored, shown, or already up to date)
//!   1 - Runtime error (bad data, config, storage, download failure, etc.)

mod cli;
mod config;
mod error;
mod insights;
mod models;
mod pipeline;
mod report;
mod source;
mod storage;

use anyhow::{Context, Result};
use chrono::Utc;
use cli::{Args, OutputFormat};
use config::{Config, CONFIG_FILE};
use insights::InsightsEngine;
use models::{InsightsResult, Report, ReportMetadata, ReportSource};
use pipeline::{Pipeline, RunOutcome};
use source::fetch::FetchOptions;
use source::DatasetLocation;
use std::path::{Path, PathBuf};
use std::time::Instant;
use storage::SqliteStore;
use tracing::{debug, error, info, warn};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    // Load config first: `general.verbose` sets the log level.
    let (mut config, origin) = match load_config(&args) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    };
    config.merge_with_args(&args);

    init_logging(args.log_level(config.general.verbose))?;

    info!("PostInsights v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);
    origin.log();

    if let Err(e) = run(args, config).await {
        error!("Run failed: {:#}", e);
        eprintln!("\n❌ Error: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}

/// Handle --init-config: generate a default .postinsights.toml.
fn handle_init_config() -> Result<()> {
    let path = Path::new(CONFIG_FILE);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            CONFIG_FILE
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content).with_context(|| format!("Failed to write {}", CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", CONFIG_FILE);
    println!("   Edit it to set the dataset, database path, batch size and workers.");
    Ok(())
}

/// Initialize logging at `level`. `RUST_LOG` wins when set.
fn init_logging(level: tracing::Level) -> Result<()> {
    let default_level = LevelFilter::from_level(level);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::default().add_directive(default_level.into()));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")
}

/// Run the requested workflow: show, dry run, or the full pipeline.
async fn run(args: Args, config: Config) -> Result<()> {
    let engine = InsightsEngine::new(config.engine_config(!args.quiet))
        .context("Invalid engine settings")?;

    let db_path = config.db_path();
    let store = if args.dry_run {
        SqliteStore::in_memory()?
    } else {
        SqliteStore::open(&db_path)
            .with_context(|| format!("Failed to open database {}", db_path.display()))?
    };
    let pipeline = Pipeline::new(store, engine, config.dataset.version_scheme);

    if args.show {
        return handle_show(&args, &db_path, &pipeline);
    }

    // Step 1: Extract
    let location = DatasetLocation::from_config(&config.dataset)?;
    let mut fetch_options = FetchOptions::from(&config.fetch);
    fetch_options.refresh = args.refresh;
    fetch_options.show_progress = !args.quiet;

    status(&args, &format!("📥 Loading dataset: {}", location));
    let dataset = source::extract(
        &location,
        &config.cache_dir(),
        config.dataset.version.as_deref(),
        &fetch_options,
    )
    .await?;
    status(
        &args,
        &format!(
            "   {} records, version {}",
            dataset.len(),
            dataset.version()
        ),
    );

    let start_time = Instant::now();

    // Handle --dry-run: compute and report without touching the database
    if args.dry_run {
        status(&args, "🔍 Dry run: computing insights (nothing is stored)...");
        let result = pipeline.transform(&dataset).await?;
        let duration = start_time.elapsed().as_secs_f64();
        emit_report(
            &args,
            &location.to_string(),
            ReportSource::DryRun,
            Some(dataset.len()),
            Some(duration),
            result,
        )?;
        return Ok(());
    }

    // Step 2: Gate, transform and load
    status(&args, "⚙️  Computing insights...");
    match pipeline.run(&dataset, args.force).await? {
        RunOutcome::Skipped { version, persisted } => {
            status(
                &args,
                &format!(
                    "⏭️  Dataset version {} is not newer than stored version {}. Nothing to do.",
                    version, persisted
                ),
            );
            status(&args, "   Use --force to recompute anyway.");
        }
        RunOutcome::Completed(result) => {
            let duration = start_time.elapsed().as_secs_f64();
            print_summary(&args, &result, duration, &db_path);
            emit_report(
                &args,
                &location.to_string(),
                ReportSource::Computed,
                Some(dataset.len()),
                Some(duration),
                result,
            )?;
        }
    }

    Ok(())
}

/// Handle --show: print the stored insights.
fn handle_show(args: &Args, db_path: &Path, pipeline: &Pipeline<SqliteStore>) -> Result<()> {
    match pipeline.stored_insights()? {
        Some(result) => emit_report(
            args,
            &db_path.display().to_string(),
            ReportSource::Stored,
            None,
            None,
            result,
        ),
        None => {
            warn!("No insights stored in {}", db_path.display());
            status(args, "No insights stored yet. Run without --show first.");
            Ok(())
        }
    }
}

/// Render the report and write it to --output or stdout.
fn emit_report(
    args: &Args,
    dataset: &str,
    source: ReportSource,
    records: Option<usize>,
    duration_seconds: Option<f64>,
    insights: InsightsResult,
) -> Result<()> {
    let report = Report {
        metadata: ReportMetadata {
            dataset: dataset.to_string(),
            generated_at: Utc::now(),
            source,
            records,
            duration_seconds,
        },
        insights,
    };

    let output = match args.format {
        OutputFormat::Json => report::generate_json_report(&report)?,
        OutputFormat::Markdown => report::generate_markdown_report(&report),
    };

    match args.output {
        Some(ref path) => {
            report::write_report(&output, path)?;
            status(args, &format!("📝 Report saved to: {}", path.display()));
        }
        None => println!("{}", output),
    }

    Ok(())
}

fn print_summary(args: &Args, result: &InsightsResult, duration: f64, db_path: &Path) {
    status(args, "\n📊 Insights Summary:");
    status(args, &format!("   Unique posts: {}", result.unique_posts));
    status(
        args,
        &format!("   Average post length: {:.2}", result.average_post_length),
    );
    if let Some((author, count)) = result.top_authors.first() {
        status(args, &format!("   Top author: {} ({} posts)", author, count));
    }
    if let Some((tag, count)) = result.top_hashtags.first() {
        status(args, &format!("   Top hashtag: {} ({} posts)", tag, count));
    }
    status(args, &format!("   Duration: {:.1}s", duration));
    status(
        args,
        &format!(
            "\n✅ Insights for version {} stored in {}",
            result.version,
            db_path.display()
        ),
    );
}

/// Print a progress line to stderr unless --quiet. Stdout carries the report.
fn status(args: &Args, message: &str) {
    if !args.quiet {
        eprintln!("{}", message);
    }
}

/// Where the configuration came from. Logged once logging is up.
enum ConfigOrigin {
    Explicit(PathBuf),
    DefaultFile,
    Defaults,
    Unreadable(anyhow::Error),
}

impl ConfigOrigin {
    fn log(&self) {
        match self {
            ConfigOrigin::Explicit(path) => info!("Loaded config from: {}", path.display()),
            ConfigOrigin::DefaultFile => info!("Loaded default config from {}", CONFIG_FILE),
            ConfigOrigin::Defaults => debug!("No config file found, using defaults"),
            ConfigOrigin::Unreadable(e) => warn!("Failed to load config: {}", e),
        }
    }
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<(Config, ConfigOrigin)> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        let config = Config::load(config_path)?;
        return Ok((config, ConfigOrigin::Explicit(config_path.clone())));
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => Ok((config, ConfigOrigin::DefaultFile)),
        Ok(None) => Ok((Config::default(), ConfigOrigin::Defaults)),
        Err(e) => Ok((Config::default(), ConfigOrigin::Unreadable(e))),
    }
}
