use std::path::PathBuf;

use schwc_core::CapabilityError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("required source not found: {0}")]
    NotFound(PathBuf),

    #[error("{0} is not available locally and downloading is disabled")]
    Unavailable(PathBuf),

    #[error("download from {location} failed after {attempts} attempts: {source}")]
    Download {
        location: String,
        attempts: u32,
        #[source]
        source: CapabilityError,
    },

    #[error("failed to persist {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: Box<StoreError>,
    },

    #[error("malformed {what}: {reason}")]
    Malformed { what: String, reason: String },

    #[error("arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl StoreError {
    pub(crate) fn persist(path: impl Into<PathBuf>, source: StoreError) -> Self {
        Self::Persist {
            path: path.into(),
            source: Box::new(source),
        }
    }
}
