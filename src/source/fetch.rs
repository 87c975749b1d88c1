//! Remote dataset download into a local cache directory.

use super::version_sidecar;
use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// File name used when the URL path has none.
const DEFAULT_FILE_NAME: &str = "posts.jsonl";

/// Base delay between download attempts; grows linearly per attempt.
const RETRY_DELAY: Duration = Duration::from_millis(500);

const DOWNLOAD_TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})";

/// Options for downloading a dataset.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Request timeout in seconds.
    pub timeout_seconds: u64,
    /// Additional attempts after the first failure.
    pub retries: usize,
    /// Download even if a cached copy exists.
    pub refresh: bool,
    /// Whether to show progress.
    pub show_progress: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            timeout_seconds: 300,
            retries: 3,
            refresh: false,
            show_progress: true,
        }
    }
}

impl From<&crate::config::FetchConfig> for FetchOptions {
    fn from(config: &crate::config::FetchConfig) -> Self {
        Self {
            timeout_seconds: config.timeout_seconds,
            retries: config.retries,
            ..Self::default()
        }
    }
}

/// A failed attempt and whether trying again could help.
struct AttemptError {
    error: anyhow::Error,
    retryable: bool,
}

impl AttemptError {
    fn transient(error: anyhow::Error) -> Self {
        Self {
            error,
            retryable: true,
        }
    }

    fn fatal(error: anyhow::Error) -> Self {
        Self {
            error,
            retryable: false,
        }
    }
}

/// Download `url` into `cache_dir` and return the local file path.
///
/// An existing cached file is reused unless `options.refresh` is set. The
/// body is streamed into a temporary file in the cache directory and
/// renamed into place only once complete.
pub async fn fetch_dataset(url: &str, cache_dir: &Path, options: &FetchOptions) -> Result<PathBuf> {
    ensure_http_url(url)?;
    let target = cache_dir.join(file_name_from_url(url));

    if target.is_file() && !options.refresh {
        info!("Using cached dataset at {}", target.display());
        return Ok(target);
    }

    std::fs::create_dir_all(cache_dir)
        .with_context(|| format!("Failed to create cache directory {}", cache_dir.display()))?;

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(options.timeout_seconds))
        .build()
        .context("Failed to create HTTP client")?;

    let mut attempt = 0;
    let last_modified = loop {
        match download_once(&client, url, &target, options).await {
            Ok(last_modified) => break last_modified,
            Err(failure) if failure.retryable && attempt < options.retries => {
                attempt += 1;
                let delay = RETRY_DELAY * attempt as u32;
                warn!(
                    "Download attempt {} of {} failed: {:#}. Retrying in {:?}",
                    attempt,
                    options.retries + 1,
                    failure.error,
                    delay
                );
                tokio::time::sleep(delay).await;
            }
            Err(failure) => {
                return Err(failure
                    .error
                    .context(format!("Failed to download dataset from {}", url)))
            }
        }
    };

    record_version(&target, last_modified.as_deref())?;

    info!("Dataset downloaded to {}", target.display());
    Ok(target)
}

/// Keep the version sidecar of a fresh download in step with its
/// `Last-Modified` header. Without a usable header the old sidecar is
/// removed so the version falls back to the file's modification time.
fn record_version(target: &Path, last_modified: Option<&str>) -> Result<()> {
    let sidecar = version_sidecar(target);

    match last_modified.and_then(version_from_last_modified) {
        Some(version) => {
            std::fs::write(&sidecar, format!("{}\n", version))
                .with_context(|| format!("Failed to write {}", sidecar.display()))?;
            debug!("Recorded dataset version {} from Last-Modified", version);
        }
        None => match std::fs::remove_file(&sidecar) {
            Ok(()) => debug!("Removed stale version file {}", sidecar.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to remove {}", sidecar.display()))
            }
        },
    }

    Ok(())
}

/// One download attempt. Returns the `Last-Modified` header, if any.
async fn download_once(
    client: &reqwest::Client,
    url: &str,
    target: &Path,
    options: &FetchOptions,
) -> std::result::Result<Option<String>, AttemptError> {
    let mut response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            AttemptError::transient(anyhow!("Request timed out after {}s", options.timeout_seconds))
        } else if e.is_connect() {
            AttemptError::transient(anyhow!("Cannot connect to {}", url))
        } else {
            AttemptError::transient(anyhow!("Failed to send request: {}", e))
        }
    })?;

    let status = response.status();
    if !status.is_success() {
        let error = anyhow!("Server responded with {}", status);
        return Err(if status.is_server_error() {
            AttemptError::transient(error)
        } else {
            AttemptError::fatal(error)
        });
    }

    let last_modified = response
        .headers()
        .get(reqwest::header::LAST_MODIFIED)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let progress = download_progress(response.content_length(), options.show_progress);

    let dir = target.parent().unwrap_or_else(|| Path::new("."));
    let mut file = NamedTempFile::new_in(dir)
        .context("Failed to create temporary download file")
        .map_err(AttemptError::fatal)?;

    loop {
        let chunk = response
            .chunk()
            .await
            .map_err(|e| AttemptError::transient(anyhow!("Download interrupted: {}", e)))?;
        let Some(chunk) = chunk else { break };
        file.write_all(&chunk)
            .context("Failed to write downloaded data")
            .map_err(AttemptError::fatal)?;
        progress.inc(chunk.len() as u64);
    }
    progress.finish_and_clear();

    file.persist(target)
        .map_err(|e| AttemptError::fatal(anyhow!("Failed to move download into place: {}", e)))?;

    Ok(last_modified)
}

fn download_progress(length: Option<u64>, show: bool) -> ProgressBar {
    if !show {
        return ProgressBar::hidden();
    }

    match length {
        Some(total) => {
            let pb = ProgressBar::new(total);
            if let Ok(style) = ProgressStyle::default_bar().template(DOWNLOAD_TEMPLATE) {
                pb.set_style(style.progress_chars("#>-"));
            }
            pb
        }
        None => ProgressBar::new_spinner(),
    }
}

/// Local file name for a dataset URL: the last path segment, without
/// query or fragment.
pub fn file_name_from_url(url: &str) -> String {
    let without_suffix = url.split(['?', '#']).next().unwrap_or(url);
    let path = without_suffix
        .split_once("://")
        .map_or(without_suffix, |(_, rest)| rest);

    match path.split_once('/') {
        Some((_, path)) => path
            .rsplit('/')
            .find(|segment| !segment.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| DEFAULT_FILE_NAME.to_string()),
        None => DEFAULT_FILE_NAME.to_string(),
    }
}

/// Version token for an HTTP `Last-Modified` value, formatted like the
/// modification-time fallback.
pub fn version_from_last_modified(value: &str) -> Option<String> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc).format("%Y%m%dT%H%M%SZ").to_string())
}

/// Validate a URL before attempting a download.
pub fn ensure_http_url(url: &str) -> Result<()> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        bail!("Unsupported dataset URL (expected http or https): {}", url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_name_from_url() {
        assert_eq!(
            file_name_from_url("https://example.com/data/posts.jsonl"),
            "posts.jsonl"
        );
        assert_eq!(
            file_name_from_url("https://example.com/dump.jsonl?token=abc#top"),
            "dump.jsonl"
        );
        assert_eq!(file_name_from_url("https://example.com/dir/"), "dir");
        assert_eq!(file_name_from_url("https://example.com"), DEFAULT_FILE_NAME);
        assert_eq!(file_name_from_url("https://example.com/"), DEFAULT_FILE_NAME);
    }

    #[test]
    fn test_version_from_last_modified() {
        assert_eq!(
            version_from_last_modified("Thu, 26 Dec 2024 10:00:00 GMT").as_deref(),
            Some("20241226T100000Z")
        );
        assert_eq!(version_from_last_modified("yesterday"), None);
    }

    #[test]
    fn test_ensure_http_url() {
        assert!(ensure_http_url("https://example.com/posts.jsonl").is_ok());
        assert!(ensure_http_url("file:///tmp/posts.jsonl").is_err());
    }

    #[tokio::test]
    async fn test_cached_file_is_reused() {
        let dir = TempDir::new().unwrap();
        let cached = dir.path().join("posts.jsonl");
        std::fs::write(&cached, "").unwrap();

        // Port 1 is never served; reaching the network would fail the test.
        let url = "http://127.0.0.1:1/posts.jsonl";
        let path = fetch_dataset(url, dir.path(), &FetchOptions::default())
            .await
            .unwrap();
        assert_eq!(path, cached);
    }

    #[tokio::test]
    async fn test_unreachable_server_fails_without_partial_file() {
        let dir = TempDir::new().unwrap();
        let options = FetchOptions {
            timeout_seconds: 5,
            retries: 0,
            refresh: true,
            show_progress: false,
        };

        let result = fetch_dataset("http://127.0.0.1:1/posts.jsonl", dir.path(), &options).await;

        assert!(result.is_err());
        assert!(!dir.path().join("posts.jsonl").exists());
        assert!(!dir.path().join("posts.jsonl.version").exists());
    }

    #[test]
    fn test_refresh_without_last_modified_drops_old_version() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("posts.jsonl");
        std::fs::write(
            &target,
            r#"{"text":"x","author":"a","created_at":"2024-12-26T10:00:00"}"#,
        )
        .unwrap();

        record_version(&target, Some("Thu, 26 Dec 2024 10:00:00 GMT")).unwrap();
        let sidecar = dir.path().join("posts.jsonl.version");
        assert_eq!(std::fs::read_to_string(&sidecar).unwrap(), "20241226T100000Z\n");
        let dataset = crate::source::load_dataset(&target, None).unwrap();
        assert_eq!(dataset.version(), "20241226T100000Z");

        record_version(&target, None).unwrap();
        assert!(!sidecar.exists());
        let dataset = crate::source::load_dataset(&target, None).unwrap();
        assert_ne!(dataset.version(), "20241226T100000Z");

        // Unparseable header behaves like a missing one; nothing to remove.
        record_version(&target, Some("yesterday")).unwrap();
        assert!(!sidecar.exists());
    }

    #[test]
    fn test_versions_are_kept_per_download() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join(file_name_from_url("https://a.example.com/a.jsonl"));
        let b = dir.path().join(file_name_from_url("https://b.example.com/b.jsonl"));

        record_version(&a, Some("Thu, 26 Dec 2024 10:00:00 GMT")).unwrap();
        record_version(&b, Some("Fri, 27 Dec 2024 10:00:00 GMT")).unwrap();

        assert_eq!(
            std::fs::read_to_string(dir.path().join("a.jsonl.version")).unwrap(),
            "20241226T100000Z\n"
        );
        assert_eq!(
            std::fs::read_to_string(dir.path().join("b.jsonl.version")).unwrap(),
            "20241227T100000Z\n"
        );
    }
}
