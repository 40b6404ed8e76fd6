// src/store/mod.rs
//
// Processed layer layout:
//
//   <data_dir>/processed/<dataset_id>/
//       _CURRENT                                 name of the committed version
//       v-<run_id>/<field>=<value>[/...]/part-000.parquet
//       v-<run_id>/<field>=<value>[/...]/_manifest.json
//
// Every run writes a complete version. Readers go through `_CURRENT` only, so
// the whole dataset flips from one version to the next with a single rename.

pub mod inspect;
pub mod partition;
pub mod writer;

use chrono::{DateTime, Utc};
use glob::glob;
use serde::{Deserialize, Serialize};
use std::{
    fs::{self, File},
    path::{Path, PathBuf},
};
use tracing::warn;

pub use partition::{PartitionField, PartitionSpec};
pub use writer::{PartitionWrite, ProcessedWriter, WriteReport};

use crate::error::Result;
use crate::model::{CanonicalSchema, Dataset};
use crate::raw::read_parquet_records;

pub const CURRENT_POINTER: &str = "_CURRENT";
pub const MANIFEST_FILE: &str = "_manifest.json";
pub const PART_FILE: &str = "part-000.parquet";
pub const VERSION_PREFIX: &str = "v-";
pub const STAGING_PREFIX: &str = ".staging-";

/// Sidecar written next to every committed part file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionManifest {
    pub dataset_id: String,
    pub partition: String,
    pub run_id: String,
    pub rows: usize,
    pub columns: Vec<String>,
    pub written_at: DateTime<Utc>,
}

/// A partition of the version `_CURRENT` points at.
#[derive(Debug, Clone, PartialEq)]
pub struct CommittedPartition {
    /// Partition path relative to the version directory, `""` when unpartitioned.
    pub partition: String,
    pub dir: PathBuf,
    pub version: String,
    pub files: Vec<PathBuf>,
}

impl CommittedPartition {
    pub fn manifest(&self) -> Result<Option<PartitionManifest>> {
        let path = self.dir.join(MANIFEST_FILE);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_reader(File::open(path)?)?))
    }
}

/// Read side of the processed layer.
#[derive(Debug, Clone)]
pub struct ProcessedStore {
    root: PathBuf,
}

impl ProcessedStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            root: data_dir.as_ref().join("processed"),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dataset_dir(&self, dataset_id: &str) -> PathBuf {
        self.root.join(dataset_id)
    }

    /// Dataset identifiers present under the processed root, sorted.
    pub fn datasets(&self) -> Result<Vec<String>> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if !name.starts_with('.') {
                    ids.push(name.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Version named by the dataset's `_CURRENT` pointer, if any run committed.
    pub fn current_version(&self, dataset_id: &str) -> Result<Option<String>> {
        let pointer = self.dataset_dir(dataset_id).join(CURRENT_POINTER);
        if !pointer.exists() {
            return Ok(None);
        }
        let version = fs::read_to_string(&pointer)?.trim().to_string();
        Ok((!version.is_empty()).then_some(version))
    }

    /// Every partition of the committed version of `dataset_id`, sorted by
    /// partition path.
    pub fn partitions(&self, dataset_id: &str) -> Result<Vec<CommittedPartition>> {
        let Some(version) = self.current_version(dataset_id)? else {
            return Ok(Vec::new());
        };
        let version_dir = self.dataset_dir(dataset_id).join(&version);
        if !version_dir.is_dir() {
            warn!(dataset = dataset_id, %version, "pointer names a missing version");
            return Ok(Vec::new());
        }

        let pattern = format!("{}/**/{}", version_dir.display(), PART_FILE);
        let mut out = Vec::new();
        for entry in glob(&pattern)? {
            let part = match entry {
                Ok(p) => p,
                Err(e) => {
                    warn!("cannot read glob entry: {:?}", e);
                    continue;
                }
            };
            let Some(dir) = part.parent().map(Path::to_path_buf) else {
                continue;
            };

            let mut files: Vec<PathBuf> = glob(&format!("{}/*.parquet", dir.display()))?
                .filter_map(|e| e.ok())
                .collect();
            files.sort();

            let partition = dir
                .strip_prefix(&version_dir)
                .map(|rel| {
                    rel.components()
                        .map(|c| c.as_os_str().to_string_lossy().into_owned())
                        .collect::<Vec<_>>()
                        .join("/")
                })
                .unwrap_or_default();

            out.push(CommittedPartition {
                partition,
                dir,
                version: version.clone(),
                files,
            });
        }
        out.sort_by(|a, b| a.partition.cmp(&b.partition));
        Ok(out)
    }

    pub fn committed_files(&self, dataset_id: &str) -> Result<Vec<PathBuf>> {
        Ok(self
            .partitions(dataset_id)?
            .into_iter()
            .flat_map(|p| p.files)
            .collect())
    }

    /// Read the committed contents of `dataset_id` back into records,
    /// partition by partition.
    pub fn read_dataset(&self, dataset_id: &str, schema: &CanonicalSchema) -> Result<Dataset> {
        let mut dataset = Dataset::new(dataset_id, schema.clone());
        for file in self.committed_files(dataset_id)? {
            dataset.records.extend(read_parquet_records(&file)?);
        }
        Ok(dataset)
    }
}
