// src/raw/mod.rs

use chrono::{DateTime, Utc};
use glob::glob;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use std::{
    fs::{self, File},
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument, warn};

use crate::error::{PipelineError, Result};
use crate::model::{arrow::batch_to_records, Record, Value};
use crate::normalize::cast::parse_timestamp;

/// Hive-style prefix of a raw ingestion partition.
pub const INGESTED_AT_PREFIX: &str = "ingested_at=";

/// One immutable raw ingestion, as landed by a connector.
#[derive(Debug, Clone)]
pub struct RawDataset {
    pub dataset_id: String,
    /// The `ingested_at=...` directory the records came from.
    pub partition: PathBuf,
    pub ingested_at: Option<DateTime<Utc>>,
    pub records: Vec<Record>,
}

impl RawDataset {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Read-only view over `<data_dir>/raw/<dataset_id>/ingested_at=<ts>/part-*`.
#[derive(Debug, Clone)]
pub struct RawStore {
    root: PathBuf,
}

impl RawStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            root: data_dir.as_ref().join("raw"),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dataset_dir(&self, dataset_id: &str) -> PathBuf {
        self.root.join(dataset_id)
    }

    /// Newest partition that holds at least one complete part file.
    pub fn latest_partition(&self, dataset_id: &str) -> Result<PathBuf> {
        let dir = self.dataset_dir(dataset_id);
        let pattern = format!("{}/{}*", dir.display(), INGESTED_AT_PREFIX);
        let mut partitions: Vec<PathBuf> = glob(&pattern)?
            .filter_map(|e| e.ok())
            .filter(|p| p.is_dir())
            .collect();
        partitions.sort();

        for partition in partitions.into_iter().rev() {
            if !part_files(&partition)?.is_empty() {
                return Ok(partition);
            }
            warn!(partition = %partition.display(), "skipping incomplete raw partition");
        }

        Err(PipelineError::DatasetNotFound {
            dataset_id: dataset_id.to_string(),
            path: dir,
        })
    }

    /// Load the most recent complete raw dataset for `dataset_id`.
    #[instrument(level = "info", skip(self))]
    pub fn read_latest(&self, dataset_id: &str) -> Result<RawDataset> {
        let partition = self.latest_partition(dataset_id)?;
        let ingested_at = partition
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_prefix(INGESTED_AT_PREFIX))
            .and_then(parse_timestamp);

        let mut records = Vec::new();
        for path in part_files(&partition)? {
            let mut part = read_part(&path)?;
            debug!(file = %path.display(), rows = part.len(), "read raw part");
            records.append(&mut part);
        }

        info!(
            dataset = dataset_id,
            partition = %partition.display(),
            rows = records.len(),
            "loaded raw dataset"
        );
        Ok(RawDataset {
            dataset_id: dataset_id.to_string(),
            partition,
            ingested_at,
            records,
        })
    }
}

/// `part-*.parquet` / `part-*.csv` files in name order; in-flight `.tmp`
/// files never match.
pub fn part_files(partition: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(partition)? {
        let path = entry?.path();
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
        if path.is_file() && name.starts_with("part-") && matches!(ext, "parquet" | "csv") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn read_part(path: &Path) -> Result<Vec<Record>> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("parquet") => read_parquet_records(path),
        Some("csv") => read_csv_records(path),
        _ => Err(PipelineError::RawRead {
            path: path.to_path_buf(),
            message: "unsupported file type".into(),
        }),
    }
}

pub fn read_parquet_records(path: &Path) -> Result<Vec<Record>> {
    let file = File::open(path)?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?
        .with_batch_size(8192)
        .build()?;
    let mut records = Vec::new();
    for batch in reader {
        records.extend(batch_to_records(&batch?)?);
    }
    Ok(records)
}

/// Every CSV cell is text; short rows simply lack the trailing columns.
pub fn read_csv_records(path: &Path) -> Result<Vec<Record>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)?;
    let headers = rdr.headers()?.clone();

    let mut records = Vec::new();
    for (idx, row) in rdr.records().enumerate() {
        let row = row.map_err(|e| PipelineError::RawRead {
            path: path.to_path_buf(),
            message: format!("record {idx}: {e}"),
        })?;
        records.push(
            headers
                .iter()
                .zip(row.iter())
                .map(|(h, v)| (h, Value::from(v)))
                .collect(),
        );
    }
    Ok(records)
}
