// src/error.rs

use std::{io, path::PathBuf};

use crate::normalize::RejectionSummary;

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

/// Fatal errors of a transformation or analytics run.
///
/// Per-record problems are not errors: they are collected as
/// [`crate::normalize::Rejection`]s and only surface here as
/// `RejectionThresholdExceeded` once the policy says the run failed.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("dataset_not_found: no raw dataset `{dataset_id}` under {}", path.display())]
    DatasetNotFound { dataset_id: String, path: PathBuf },

    #[error("failed to read raw file {}: {message}", path.display())]
    RawRead { path: PathBuf, message: String },

    #[error("write_failure: dataset `{dataset_id}` partition `{partition}`: {message}")]
    WriteFailure {
        dataset_id: String,
        partition: String,
        message: String,
    },

    #[error("query_error: `{query}`: {message}")]
    Query { query: String, message: String },

    #[error("rejected records exceed threshold: {0}")]
    RejectionThresholdExceeded(RejectionSummary),

    #[error("no processed data under {}; run transform first", .0.display())]
    NoProcessedData(PathBuf),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Arrow error (boxed - large type).
    #[error("Arrow error: {0}")]
    Arrow(Box<arrow::error::ArrowError>),

    /// Parquet error (boxed - large type).
    #[error("Parquet error: {0}")]
    Parquet(Box<parquet::errors::ParquetError>),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("glob error: {0}")]
    Glob(#[from] glob::PatternError),
}

impl From<arrow::error::ArrowError> for PipelineError {
    fn from(e: arrow::error::ArrowError) -> Self {
        PipelineError::Arrow(Box::new(e))
    }
}

impl From<parquet::errors::ParquetError> for PipelineError {
    fn from(e: parquet::errors::ParquetError) -> Self {
        PipelineError::Parquet(Box::new(e))
    }
}

impl PipelineError {
    /// Process exit code for the CLI.
    pub fn exit_code(&self) -> i32 {
        match self {
            PipelineError::RejectionThresholdExceeded(_) => 2,
            _ => 1,
        }
    }
}
