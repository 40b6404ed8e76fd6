// src/config.rs

use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs::File,
    path::{Path, PathBuf},
};

use crate::error::{PipelineError, Result};
use crate::model::NaturalKey;
use crate::normalize::RejectPolicy;
use crate::store::PartitionSpec;

pub const DEFAULT_LOG_FILTER: &str = "info,sustainlake=info";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Holds `raw/` and `processed/`.
    pub data_dir: PathBuf,
    pub log_filter: String,
    pub rejects: RejectPolicy,
    pub partition_by: PartitionSpec,
    pub natural_key: NaturalKey,
    /// Extra `source header -> canonical column` aliases, on top of the
    /// built-in table.
    pub column_aliases: BTreeMap<String, String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            rejects: RejectPolicy::default(),
            partition_by: PartitionSpec::default(),
            natural_key: NaturalKey::energy_metrics(),
            column_aliases: BTreeMap::new(),
        }
    }
}

impl PipelineConfig {
    /// Defaults when `path` is `None`, otherwise the YAML file at `path`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let config: Self = serde_yaml::from_reader(File::open(path)?)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.rejects.max_ratio) {
            return Err(PipelineError::Config(format!(
                "rejects.max_ratio must be within [0, 1], got {}",
                self.rejects.max_ratio
            )));
        }
        if self.natural_key.columns.is_empty() {
            return Err(PipelineError::Config("natural_key must not be empty".into()));
        }
        Ok(())
    }

    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = data_dir.into();
        self
    }
}
