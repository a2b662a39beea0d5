//! denoisebench-export: Persistence of benchmark results.
//!
//! [`csv`] turns result records into the results table text and is
//! sans-IO. [`store`] owns the on-disk layout of a run (results table,
//! metadata document, image directory) and implements the pipeline's
//! `ResultSink`.

pub mod csv;
pub mod store;

pub use csv::{HEADER, csv_row, to_csv};
pub use store::ResultsStore;

/// Errors that can occur while persisting results.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    /// Writing or renaming a results file failed.
    #[error("cannot write {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The run metadata could not be serialized.
    #[error("cannot serialize run metadata: {0}")]
    Json(#[from] serde_json::Error),
}
