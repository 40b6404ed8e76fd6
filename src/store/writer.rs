// src/store/writer.rs

use chrono::Utc;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use serde::Serialize;
use std::{
    collections::BTreeMap,
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};
use tempfile::{NamedTempFile, TempDir};
use tracing::{debug, info, instrument, warn};

use super::{
    PartitionManifest, PartitionSpec, ProcessedStore, CURRENT_POINTER, MANIFEST_FILE, PART_FILE,
    STAGING_PREFIX, VERSION_PREFIX,
};
use crate::error::{PipelineError, Result};
use crate::model::{arrow::records_to_batch, Dataset, Record};

/// One partition of a committed version.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PartitionWrite {
    pub partition: String,
    pub rows: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WriteReport {
    pub dataset_id: String,
    pub run_id: String,
    /// Directory name `_CURRENT` now points at.
    pub version: String,
    pub rows: usize,
    pub partitions: Vec<PartitionWrite>,
}

/// A complete dataset version that no reader can see yet.
struct StagedVersion {
    dataset_dir: PathBuf,
    tmp: TempDir,
    partitions: Vec<PartitionWrite>,
}

/// A version moved to its final directory name, still not pointed at.
struct PublishedVersion {
    dataset_dir: PathBuf,
    version: String,
    partitions: Vec<PartitionWrite>,
}

/// Whole-dataset Parquet writer.
///
/// Every run produces a complete new version of the dataset: all partitions
/// are staged into one hidden directory, which is renamed to `v-<run_id>`
/// and then made visible by replacing the single `_CURRENT` pointer. Readers
/// therefore see either the previous version or the new one in full, and
/// partitions the new run does not produce disappear with the old version.
pub struct ProcessedWriter {
    store: ProcessedStore,
    partitioning: PartitionSpec,
    props: WriterProperties,
}

impl ProcessedWriter {
    pub fn new(store: ProcessedStore, partitioning: PartitionSpec) -> Self {
        let props = WriterProperties::builder()
            .set_compression(Compression::SNAPPY)
            .build();
        Self {
            store,
            partitioning,
            props,
        }
    }

    pub fn store(&self) -> &ProcessedStore {
        &self.store
    }

    #[instrument(level = "info", skip(self, dataset), fields(dataset = %dataset.id, rows = dataset.len()))]
    pub fn write(&self, dataset: &Dataset) -> Result<WriteReport> {
        let run_id = Utc::now().format("%Y%m%dT%H%M%S%6fZ").to_string();

        // dropping `staged` on error removes the staging directory
        let staged = self.stage(dataset, &run_id)?;
        let published = staged
            .publish(&run_id)
            .map_err(|e| write_failure(dataset, ALL_PARTITIONS, e))?;
        let (version, partitions) = published
            .activate()
            .map_err(|e| write_failure(dataset, ALL_PARTITIONS, e))?;

        info!(
            run_id = %run_id,
            %version,
            partitions = partitions.len(),
            "committed processed dataset"
        );
        Ok(WriteReport {
            dataset_id: dataset.id.clone(),
            run_id,
            version,
            rows: dataset.len(),
            partitions,
        })
    }

    /// Write every partition of `dataset` into a fresh staging directory
    /// inside the dataset directory.
    fn stage(&self, dataset: &Dataset, run_id: &str) -> Result<StagedVersion> {
        let dataset_dir = self.store.dataset_dir(&dataset.id);
        let tmp = fs::create_dir_all(&dataset_dir)
            .and_then(|_| {
                tempfile::Builder::new()
                    .prefix(STAGING_PREFIX)
                    .tempdir_in(&dataset_dir)
            })
            .map_err(|e| write_failure(dataset, ALL_PARTITIONS, e.into()))?;

        let mut groups: BTreeMap<String, Vec<&Record>> = BTreeMap::new();
        for record in &dataset.records {
            groups
                .entry(self.partitioning.path_for(record))
                .or_default()
                .push(record);
        }

        let mut partitions = Vec::with_capacity(groups.len());
        for (partition, records) in &groups {
            self.write_partition(tmp.path(), dataset, run_id, partition, records)
                .map_err(|e| write_failure(dataset, partition, e))?;
            debug!(%partition, rows = records.len(), "staged");
            partitions.push(PartitionWrite {
                partition: partition.clone(),
                rows: records.len(),
            });
        }

        Ok(StagedVersion {
            dataset_dir,
            tmp,
            partitions,
        })
    }

    fn write_partition(
        &self,
        staging: &Path,
        dataset: &Dataset,
        run_id: &str,
        partition: &str,
        records: &[&Record],
    ) -> Result<()> {
        let dir = staging.join(partition);
        fs::create_dir_all(&dir)?;

        let batch = records_to_batch(&dataset.schema, records)?;
        let file = File::create(dir.join(PART_FILE))?;
        let mut writer =
            ArrowWriter::try_new(BufWriter::new(file), batch.schema(), Some(self.props.clone()))?;
        writer.write(&batch)?;
        writer.close()?;

        let manifest = PartitionManifest {
            dataset_id: dataset.id.clone(),
            partition: partition.to_string(),
            run_id: run_id.to_string(),
            rows: records.len(),
            columns: dataset.schema.names().map(str::to_string).collect(),
            written_at: Utc::now(),
        };
        let mut out = BufWriter::new(File::create(dir.join(MANIFEST_FILE))?);
        serde_json::to_writer_pretty(&mut out, &manifest)?;
        out.write_all(b"\n")?;
        out.flush()?;
        Ok(())
    }
}

impl StagedVersion {
    /// Rename the staging directory to its version name. Readers only follow
    /// `_CURRENT`, so the renamed directory is still invisible.
    fn publish(self, run_id: &str) -> Result<PublishedVersion> {
        let mut version = format!("{VERSION_PREFIX}{run_id}");
        let mut n = 1;
        while self.dataset_dir.join(&version).exists() {
            version = format!("{VERSION_PREFIX}{run_id}-{n}");
            n += 1;
        }

        let staged_path = self.tmp.keep();
        if let Err(e) = fs::rename(&staged_path, self.dataset_dir.join(&version)) {
            let _ = fs::remove_dir_all(&staged_path);
            return Err(e.into());
        }

        Ok(PublishedVersion {
            dataset_dir: self.dataset_dir,
            version,
            partitions: self.partitions,
        })
    }
}

impl PublishedVersion {
    /// Swap `_CURRENT` to this version, then drop superseded versions.
    fn activate(self) -> Result<(String, Vec<PartitionWrite>)> {
        if let Err(e) = swap_pointer(&self.dataset_dir, &self.version) {
            let _ = fs::remove_dir_all(self.dataset_dir.join(&self.version));
            return Err(e);
        }

        // superseded versions are invisible now; failing to delete them is harmless
        for entry in fs::read_dir(&self.dataset_dir)? {
            let path = entry?.path();
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            if name.starts_with(VERSION_PREFIX) && name != self.version {
                if let Err(e) = fs::remove_dir_all(&path) {
                    warn!(path = %path.display(), "could not remove old version: {}", e);
                }
            }
        }

        Ok((self.version, self.partitions))
    }
}

/// write-then-rename so the pointer is replaced atomically
fn swap_pointer(dataset_dir: &Path, version: &str) -> Result<()> {
    let mut pointer = NamedTempFile::new_in(dataset_dir)?;
    pointer.write_all(version.as_bytes())?;
    pointer.as_file().sync_all()?;
    pointer
        .persist(dataset_dir.join(CURRENT_POINTER))
        .map_err(|e| e.error)?;
    Ok(())
}

/// Partition label for failures that concern the whole version.
const ALL_PARTITIONS: &str = "*";

fn write_failure(dataset: &Dataset, partition: &str, e: PipelineError) -> PipelineError {
    PipelineError::WriteFailure {
        dataset_id: dataset.id.clone(),
        partition: partition.to_string(),
        message: e.to_string(),
    }
}
