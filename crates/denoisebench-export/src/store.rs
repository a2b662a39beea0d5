//! Crash-safe on-disk result store.
//!
//! A run writes three things next to each other:
//!
//! ```text
//! <dir>/<stem>.csv    results table, rewritten in full on every append
//! <dir>/<stem>.json   run metadata, written once before any result
//! <dir>/<stem>/       image artifacts, when enabled
//! ```
//!
//! Every write goes to a temporary sibling first and is then renamed over
//! the target, so an interrupted run leaves either the previous or the
//! new complete table on disk, never a truncated one.

use std::fs;
use std::path::{Path, PathBuf};

use denoisebench_pipeline::{ResultRecord, ResultSink, RunMetadata, SinkError};

use crate::ExportError;
use crate::csv::to_csv;

/// Append-only results table backed by a CSV file.
#[derive(Debug)]
pub struct ResultsStore {
    path: PathBuf,
    records: Vec<ResultRecord>,
    echo: bool,
}

impl ResultsStore {
    /// A store writing its table to `path`. Nothing touches the disk
    /// until the first append or metadata snapshot.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            records: Vec::new(),
            echo: false,
        }
    }

    /// Log every appended record at `info` level.
    #[must_use]
    pub const fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    /// Path of the results table.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records appended so far.
    #[must_use]
    pub fn records(&self) -> &[ResultRecord] {
        &self.records
    }

    /// Path of the run metadata document: the table path with a `.json`
    /// extension.
    #[must_use]
    pub fn metadata_path(&self) -> PathBuf {
        self.path.with_extension("json")
    }

    /// Directory for image artifacts: a sibling of the table named after
    /// its stem, or `<name>_images` when the table has no extension.
    #[must_use]
    pub fn images_dir(&self) -> PathBuf {
        if self.path.extension().is_some() {
            return self.path.with_extension("");
        }
        let mut name = self.path.file_name().map(std::ffi::OsStr::to_os_string).unwrap_or_default();
        name.push("_images");
        self.path.with_file_name(name)
    }

    /// Append one record and rewrite the table.
    ///
    /// # Errors
    ///
    /// Returns [`ExportError::Io`] if the table cannot be written. The
    /// record stays in memory and is included in the next rewrite.
    pub fn append(&mut self, record: ResultRecord) -> Result<(), ExportError> {
        if self.echo {
            tracing::info!(
                "{} {} {}: {} ({:.3}s)",
                record.image,
                record.denoiser,
                record.metric,
                record.value,
                record.duration.as_secs_f64(),
            );
        }
        self.records.push(record);
        self.flush()
    }

    /// Rewrite the whole table from the records in memory.
    ///
    /// # Errors
    ///
    /// Returns [`ExportError::Io`] if the table cannot be written.
    pub fn flush(&self) -> Result<(), ExportError> {
        write_atomic(&self.path, &to_csv(&self.records))
    }

    /// Write the run metadata document.
    ///
    /// # Errors
    ///
    /// Returns [`ExportError::Json`] if serialization fails, or
    /// [`ExportError::Io`] if the document cannot be written.
    pub fn write_metadata(&self, metadata: &RunMetadata) -> Result<(), ExportError> {
        let json = serde_json::to_string_pretty(metadata)?;
        let path = self.metadata_path();
        write_atomic(&path, &json)?;
        tracing::debug!(path = %path.display(), "wrote run metadata");
        Ok(())
    }
}

impl ResultSink for ResultsStore {
    fn snapshot(&mut self, metadata: &RunMetadata) -> Result<(), SinkError> {
        Ok(self.write_metadata(metadata)?)
    }

    fn append(&mut self, record: ResultRecord) -> Result<(), SinkError> {
        Ok(Self::append(self, record)?)
    }
}

/// Write `contents` to a temporary sibling of `path`, then rename it into
/// place. Parent directories are created as needed.
fn write_atomic(path: &Path, contents: &str) -> Result<(), ExportError> {
    let io_err = |source| ExportError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err)?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, contents).map_err(io_err)?;
    fs::rename(&tmp, path).map_err(io_err)
}
