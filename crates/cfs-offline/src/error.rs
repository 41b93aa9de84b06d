//! Errors from offline storage operations.

use std::path::PathBuf;

use thiserror::Error;

/// Errors from conversion and source reads.
#[derive(Error, Debug)]
pub enum OfflineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("input file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("missing column {column:?} in {}", path.display())]
    MissingColumn { column: String, path: PathBuf },

    #[error("column {column:?} cannot be read as {expected}: {message}")]
    ColumnType {
        column: String,
        expected: String,
        message: String,
    },

    #[error("column {column:?}, row {row}: {message}")]
    InvalidValue {
        column: String,
        row: usize,
        message: String,
    },

    #[error("column {column:?}, row {row}: unexpected null")]
    NullValue { column: String, row: usize },
}

impl From<OfflineError> for cfs_common::Error {
    fn from(err: OfflineError) -> Self {
        match err {
            OfflineError::NotFound(path) => cfs_common::Error::FileNotFound { path },
            OfflineError::MissingColumn { .. }
            | OfflineError::ColumnType { .. }
            | OfflineError::InvalidValue { .. } => {
                cfs_common::Error::SchemaMismatch(err.to_string())
            }
            OfflineError::NullValue { .. }
            | OfflineError::Io(_)
            | OfflineError::Parquet(_)
            | OfflineError::Arrow(_) => cfs_common::Error::DataAccess(err.to_string()),
        }
    }
}
