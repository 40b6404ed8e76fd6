// src/store/partition.rs

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use crate::error::PipelineError;
use crate::model::{Record, Value};

/// Directory value used for null partition keys.
pub const NULL_PARTITION: &str = "__null__";

/// One level of the partition path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PartitionField {
    /// `column=<value>`
    Column(String),
    /// `month=<YYYY-MM>` of a date or timestamp column.
    Month(String),
}

impl PartitionField {
    pub fn dir_name(&self) -> &str {
        match self {
            PartitionField::Column(c) => c,
            PartitionField::Month(_) => "month",
        }
    }

    fn raw_value(&self, record: &Record) -> Option<String> {
        match self {
            PartitionField::Column(c) => match record.get(c) {
                Value::Null => None,
                v => Some(v.to_string()),
            },
            PartitionField::Month(c) => record
                .get(c)
                .as_date()
                .map(|d| d.format("%Y-%m").to_string()),
        }
    }

    /// `name=value` path segment for `record`.
    pub fn segment(&self, record: &Record) -> String {
        let value = self
            .raw_value(record)
            .map(|v| escape_segment(&v))
            .unwrap_or_else(|| NULL_PARTITION.to_string());
        format!("{}={}", self.dir_name(), value)
    }
}

impl FromStr for PartitionField {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let inner = s
            .strip_prefix("month(")
            .and_then(|rest| rest.strip_suffix(')'));
        let (field, name) = match inner {
            Some(col) => (PartitionField::Month(col.trim().to_string()), col.trim()),
            None => (PartitionField::Column(s.to_string()), s),
        };
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(PipelineError::Config(format!("bad partition field `{s}`")));
        }
        Ok(field)
    }
}

impl TryFrom<String> for PartitionField {
    type Error = PipelineError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<PartitionField> for String {
    fn from(f: PartitionField) -> Self {
        f.to_string()
    }
}

impl fmt::Display for PartitionField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartitionField::Column(c) => f.write_str(c),
            PartitionField::Month(c) => write!(f, "month({c})"),
        }
    }
}

/// Ordered partition fields; empty means a single unpartitioned unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartitionSpec(pub Vec<PartitionField>);

impl PartitionSpec {
    pub fn none() -> Self {
        Self(Vec::new())
    }

    pub fn by_region() -> Self {
        Self(vec![PartitionField::Column("region".into())])
    }

    /// Relative partition path for `record`, e.g. `region=BC/month=2024-01`.
    pub fn path_for(&self, record: &Record) -> String {
        self.0
            .iter()
            .map(|f| f.segment(record))
            .collect::<Vec<_>>()
            .join("/")
    }
}

impl Default for PartitionSpec {
    fn default() -> Self {
        Self::by_region()
    }
}

/// Keep `[A-Za-z0-9-]` plus inner dots and underscores; percent-encode every
/// other byte. Values cannot escape their directory, look like hidden staging
/// names, or spell the `__null__` placeholder.
pub fn escape_segment(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for (i, b) in value.bytes().enumerate() {
        let inner = i > 0;
        let keep = b.is_ascii_alphanumeric()
            || b == b'-'
            || (b == b'_' && inner)
            || (b == b'.' && inner);
        if keep {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    out
}
