//! Fetch hooks that materialize missing dataset files.
//!
//! A dataset picks its hook explicitly: [`LocalOnly`] for datasets that
//! are assumed to be fully on disk, or a network-backed hook such as the
//! one the Natural Image Noise Dataset uses. [`Downloader`] is the shared
//! HTTP helper: it downloads a URL to a local path, creating parent
//! directories, and never re-downloads a file that already exists.

use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::types::BenchError;

/// Materializes a missing local file.
pub trait Fetch: Send + Sync {
    /// Make `path` exist locally.
    ///
    /// # Errors
    ///
    /// Returns [`BenchError::MissingAsset`] if the file cannot be
    /// obtained.
    fn fetch(&self, path: &Path) -> Result<(), BenchError>;
}

/// Hook for datasets that are entirely local: fetching does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalOnly;

impl Fetch for LocalOnly {
    fn fetch(&self, _path: &Path) -> Result<(), BenchError> {
        Ok(())
    }
}

/// Make sure `path` exists, invoking `fetcher` if it does not.
///
/// # Errors
///
/// Returns [`BenchError::MissingAsset`] if the file is still missing
/// after the fetch hook ran.
pub fn ensure_local(fetcher: &dyn Fetch, path: &Path) -> Result<(), BenchError> {
    if path.exists() {
        return Ok(());
    }
    tracing::debug!(path = %path.display(), "file missing locally, fetching");
    fetcher.fetch(path)?;
    if path.exists() {
        Ok(())
    } else {
        Err(BenchError::MissingAsset {
            path: path.to_path_buf(),
            reason: "not found locally and the dataset could not fetch it".to_string(),
        })
    }
}

/// Blocking HTTP downloader with on-disk caching.
#[derive(Debug, Clone)]
pub struct Downloader {
    client: reqwest::blocking::Client,
}

impl Downloader {
    /// Timeout for a single request; dataset images can be large.
    pub const TIMEOUT: Duration = Duration::from_secs(300);

    /// Create a downloader.
    ///
    /// # Errors
    ///
    /// Returns [`BenchError::InvalidConfig`] if the HTTP client cannot be
    /// built (e.g. no TLS backend).
    pub fn new() -> Result<Self, BenchError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Self::TIMEOUT)
            .user_agent(concat!("denoisebench/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| BenchError::InvalidConfig(format!("cannot build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// The underlying HTTP client, for API queries.
    #[must_use]
    pub const fn client(&self) -> &reqwest::blocking::Client {
        &self.client
    }

    /// Download `url` to `local_path` unless it is already cached.
    ///
    /// The body is written to a sibling `.part` file first and renamed
    /// into place, so an interrupted download never leaves a truncated
    /// image behind.
    ///
    /// # Errors
    ///
    /// Returns [`BenchError::MissingAsset`] on any network or
    /// filesystem failure.
    pub fn download(&self, url: &str, local_path: &Path) -> Result<(), BenchError> {
        if local_path.exists() {
            tracing::debug!(path = %local_path.display(), "using cached file");
            return Ok(());
        }
        let missing = |reason: String| BenchError::MissingAsset {
            path: local_path.to_path_buf(),
            reason,
        };

        if let Some(parent) = local_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| missing(format!("cannot create {}: {e}", parent.display())))?;
        }

        tracing::info!(%url, "downloading");
        let bytes = self
            .client
            .get(url)
            .send()
            .and_then(reqwest::blocking::Response::error_for_status)
            .and_then(reqwest::blocking::Response::bytes)
            .map_err(|e| missing(format!("download of {url} failed: {e}")))?;

        let mut partial = local_path.as_os_str().to_owned();
        partial.push(".part");
        fs::write(&partial, &bytes).map_err(|e| missing(format!("cannot write download: {e}")))?;
        fs::rename(&partial, local_path).map_err(|e| missing(format!("cannot move download into place: {e}")))
    }
}
