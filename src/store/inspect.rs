// src/store/inspect.rs

use parquet::file::reader::{FileReader, SerializedFileReader};
use std::{fmt, fs::File, path::PathBuf};

use super::{CommittedPartition, PartitionManifest, ProcessedStore};
use crate::error::Result;

/// Parquet metadata of one committed part file.
#[derive(Debug, Clone)]
pub struct FileInspection {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub rows: i64,
    pub row_groups: usize,
    pub created_by: Option<String>,
    /// `(column, physical type)`
    pub columns: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct PartitionInspection {
    pub partition: String,
    pub version: String,
    pub manifest: Option<PartitionManifest>,
    pub files: Vec<FileInspection>,
}

impl PartitionInspection {
    pub fn rows(&self) -> i64 {
        self.files.iter().map(|f| f.rows).sum()
    }
}

fn inspect_file(path: PathBuf) -> Result<FileInspection> {
    let size_bytes = std::fs::metadata(&path)?.len();
    let reader = SerializedFileReader::new(File::open(&path)?)?;
    let meta = reader.metadata();
    let file_meta = meta.file_metadata();

    let columns = file_meta
        .schema_descr()
        .columns()
        .iter()
        .map(|c| (c.name().to_string(), format!("{:?}", c.physical_type())))
        .collect();

    Ok(FileInspection {
        size_bytes,
        rows: file_meta.num_rows(),
        row_groups: meta.num_row_groups(),
        created_by: file_meta.created_by().map(str::to_string),
        columns,
        path,
    })
}

fn inspect_partition(p: CommittedPartition) -> Result<PartitionInspection> {
    let manifest = p.manifest()?;
    let files = p
        .files
        .into_iter()
        .map(inspect_file)
        .collect::<Result<Vec<_>>>()?;
    Ok(PartitionInspection {
        partition: p.partition,
        version: p.version,
        manifest,
        files,
    })
}

/// Metadata for every committed partition of `dataset_id`.
pub fn inspect_dataset(store: &ProcessedStore, dataset_id: &str) -> Result<Vec<PartitionInspection>> {
    store
        .partitions(dataset_id)?
        .into_iter()
        .map(inspect_partition)
        .collect()
}

impl fmt::Display for PartitionInspection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = if self.partition.is_empty() {
            "<unpartitioned>"
        } else {
            self.partition.as_str()
        };
        writeln!(f, "=== {} ({}) rows={} ===", name, self.version, self.rows())?;
        if let Some(m) = &self.manifest {
            writeln!(f, "run_id:     {}", m.run_id)?;
            writeln!(f, "written_at: {}", m.written_at.to_rfc3339())?;
        }
        for file in &self.files {
            writeln!(f, "- {}", file.path.display())?;
            writeln!(
                f,
                "  {} bytes, {} rows, {} row groups, created by {}",
                file.size_bytes,
                file.rows,
                file.row_groups,
                file.created_by.as_deref().unwrap_or("<unknown>")
            )?;
            for (name, ty) in &file.columns {
                writeln!(f, "  {:<20} {}", name, ty)?;
            }
        }
        Ok(())
    }
}
