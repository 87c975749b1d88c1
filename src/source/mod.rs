//! Dataset source: loads posts from JSON-lines files and resolves the
//! dataset version token.
//!
//! A dataset is either a single `.jsonl` file or a directory tree of them.
//! Remote datasets are downloaded into the cache directory first (see
//! [`fetch`]) and then loaded like a local file.

pub mod fetch;

use crate::config::DatasetConfig;
use crate::models::{Dataset, Record};
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use fetch::FetchOptions;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// File holding an explicit version token, looked up beside the data.
pub const VERSION_FILE: &str = "VERSION";

/// Extension of dataset files inside a directory.
const DATA_EXTENSION: &str = "jsonl";

/// Extension appended to a data file's name for its own version token.
const SIDECAR_EXTENSION: &str = "version";

/// Where the posts come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatasetLocation {
    /// A `.jsonl` file or a directory of them.
    Local(PathBuf),
    /// A JSON-lines file served over HTTP(S).
    Remote(String),
}

impl DatasetLocation {
    /// Pick the configured source. A local path wins over a URL.
    pub fn from_config(config: &DatasetConfig) -> Result<Self> {
        if let Some(ref path) = config.path {
            return Ok(DatasetLocation::Local(PathBuf::from(path)));
        }
        if let Some(ref url) = config.url {
            return Ok(DatasetLocation::Remote(url.clone()));
        }
        bail!("No dataset configured: pass --data or --url, or set [dataset] in the config file")
    }
}

impl std::fmt::Display for DatasetLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatasetLocation::Local(path) => write!(f, "{}", path.display()),
            DatasetLocation::Remote(url) => write!(f, "{}", url),
        }
    }
}

/// Materialize the dataset, downloading it first when it is remote.
pub async fn extract(
    location: &DatasetLocation,
    cache_dir: &Path,
    version_override: Option<&str>,
    options: &FetchOptions,
) -> Result<Dataset> {
    let path = match location {
        DatasetLocation::Local(path) => path.clone(),
        DatasetLocation::Remote(url) => fetch::fetch_dataset(url, cache_dir, options).await?,
    };

    let version_override = version_override.map(str::to_string);
    tokio::task::spawn_blocking(move || load_dataset(&path, version_override.as_deref()))
        .await
        .context("Dataset loading task failed")?
}

/// Load every record under `path` and resolve the dataset version.
pub fn load_dataset(path: &Path, version_override: Option<&str>) -> Result<Dataset> {
    let files = data_files(path)?;
    if files.is_empty() {
        warn!("No .{} files found under {}", DATA_EXTENSION, path.display());
    }

    let mut records = Vec::new();
    for file in &files {
        let before = records.len();
        read_records(file, &mut records)?;
        debug!("Read {} records from {}", records.len() - before, file.display());
    }

    let version = resolve_version(path, &files, version_override)?;
    info!(
        "Loaded {} records from {} file(s), version {}",
        records.len(),
        files.len(),
        version
    );

    Ok(Dataset::new(records, version))
}

/// Data files for `path`, in deterministic order.
fn data_files(path: &Path) -> Result<Vec<PathBuf>> {
    if !path.exists() {
        bail!("Dataset path does not exist: {}", path.display());
    }

    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(path).follow_links(false) {
        let entry =
            entry.with_context(|| format!("Failed to walk dataset directory {}", path.display()))?;
        if entry.file_type().is_file()
            && entry.path().extension().and_then(|e| e.to_str()) == Some(DATA_EXTENSION)
        {
            files.push(entry.into_path());
        }
    }
    files.sort();

    Ok(files)
}

/// Append the records of one JSON-lines file. Blank lines are skipped.
fn read_records(file: &Path, records: &mut Vec<Record>) -> Result<()> {
    let reader = BufReader::new(
        File::open(file).with_context(|| format!("Failed to open {}", file.display()))?,
    );

    for (index, line) in reader.lines().enumerate() {
        let line =
            line.with_context(|| format!("Failed to read {}:{}", file.display(), index + 1))?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let record: Record = serde_json::from_str(line)
            .with_context(|| format!("Invalid record at {}:{}", file.display(), index + 1))?;
        records.push(record);
    }

    Ok(())
}

/// Version token for the data at `path`.
///
/// Resolution order: explicit override, then the `<file>.version` sidecar
/// of a single data file, then a `VERSION` file beside the data, then the
/// newest data-file modification time as `YYYYMMDDTHHMMSSZ`.
pub fn resolve_version(
    path: &Path,
    files: &[PathBuf],
    version_override: Option<&str>,
) -> Result<String> {
    if let Some(version) = version_override.map(str::trim).filter(|v| !v.is_empty()) {
        debug!("Using explicit dataset version {}", version);
        return Ok(version.to_string());
    }

    if path.is_file() {
        if let Some(version) = read_version_file(&version_sidecar(path))? {
            return Ok(version);
        }
    }

    if let Some(version) = read_version_file(&version_dir(path).join(VERSION_FILE))? {
        return Ok(version);
    }

    let mut newest: Option<SystemTime> = None;
    let candidates: Vec<&Path> = if files.is_empty() {
        vec![path]
    } else {
        files.iter().map(PathBuf::as_path).collect()
    };
    for candidate in candidates {
        let modified = std::fs::metadata(candidate)
            .and_then(|m| m.modified())
            .with_context(|| {
                format!("Failed to read modification time of {}", candidate.display())
            })?;
        newest = Some(newest.map_or(modified, |n| n.max(modified)));
    }

    match newest {
        Some(time) => Ok(mtime_version(time)),
        None => bail!("Cannot determine a version for {}", path.display()),
    }
}

/// Path of the version sidecar for one data file, e.g.
/// `posts.jsonl.version`.
pub fn version_sidecar(file: &Path) -> PathBuf {
    let mut name = file.as_os_str().to_os_string();
    name.push(".");
    name.push(SIDECAR_EXTENSION);
    PathBuf::from(name)
}

/// Trimmed token from a version file, or `None` if it is missing or empty.
fn read_version_file(version_file: &Path) -> Result<Option<String>> {
    if !version_file.is_file() {
        return Ok(None);
    }

    let content = std::fs::read_to_string(version_file)
        .with_context(|| format!("Failed to read {}", version_file.display()))?;
    let version = content.trim();
    if version.is_empty() {
        warn!("{} is empty, ignoring it", version_file.display());
        return Ok(None);
    }
    debug!("Using version {} from {}", version, version_file.display());
    Ok(Some(version.to_string()))
}

/// Directory that may hold the `VERSION` file for `path`.
fn version_dir(path: &Path) -> PathBuf {
    if path.is_dir() {
        return path.to_path_buf();
    }
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Render a modification time as a lexically ordered version token.
fn mtime_version(time: SystemTime) -> String {
    DateTime::<Utc>::from(time)
        .format("%Y%m%dT%H%M%SZ")
        .to_string()
}
