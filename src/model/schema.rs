// src/model/schema.rs

use serde::{Deserialize, Serialize};

use super::{Record, Value};

/// Declared type of a canonical column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Text,
    Number,
    Date,
    Timestamp,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Text => "text",
            ColumnType::Number => "number",
            ColumnType::Date => "date",
            ColumnType::Timestamp => "timestamp",
        }
    }

    /// Whether `value` is a legal (non-null) value of this type.
    pub fn accepts(&self, value: &Value) -> bool {
        matches!(
            (self, value),
            (ColumnType::Text, Value::Text(_))
                | (ColumnType::Number, Value::Number(_))
                | (ColumnType::Date, Value::Date(_))
                | (ColumnType::Timestamp, Value::Timestamp(_))
        )
    }
}

/// A single canonical column: name, type, nullability and an optional
/// inclusive numeric range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub ty: ColumnType,
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

impl ColumnSpec {
    pub fn required(name: &str, ty: ColumnType) -> Self {
        Self {
            name: name.to_string(),
            ty,
            nullable: false,
            min: None,
            max: None,
        }
    }

    pub fn nullable(name: &str, ty: ColumnType) -> Self {
        Self {
            nullable: true,
            ..Self::required(name, ty)
        }
    }

    pub fn with_min(mut self, min: f64) -> Self {
        self.min = Some(min);
        self
    }

    pub fn with_max(mut self, max: f64) -> Self {
        self.max = Some(max);
        self
    }

    pub fn in_range(&self, n: f64) -> bool {
        self.min.map_or(true, |lo| n >= lo) && self.max.map_or(true, |hi| n <= hi)
    }
}

/// Ordered list of canonical columns every processed record must satisfy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalSchema {
    pub columns: Vec<ColumnSpec>,
}

impl CanonicalSchema {
    pub fn new(columns: Vec<ColumnSpec>) -> Self {
        Self { columns }
    }

    /// The sustainability metric fact layout.
    pub fn energy_metrics() -> Self {
        Self::new(vec![
            ColumnSpec::nullable("source", ColumnType::Text),
            ColumnSpec::required("region", ColumnType::Text),
            ColumnSpec::required("metric_date", ColumnType::Date),
            ColumnSpec::required("metric_name", ColumnType::Text),
            ColumnSpec::required("metric_value", ColumnType::Number).with_min(0.0),
            ColumnSpec::nullable("unit", ColumnType::Text),
            ColumnSpec::nullable("ingested_at", ColumnType::Timestamp),
        ])
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Exactly the schema's columns, each null-where-permitted or of the
    /// declared type.
    pub fn admits(&self, record: &Record) -> bool {
        record.len() == self.columns.len()
            && self.columns.iter().all(|c| {
                if !record.contains(&c.name) {
                    return false;
                }
                match record.get(&c.name) {
                    Value::Null => c.nullable,
                    v => c.ty.accepts(v),
                }
            })
    }
}

impl Default for CanonicalSchema {
    fn default() -> Self {
        Self::energy_metrics()
    }
}

/// Columns that identify a record uniquely after deduplication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NaturalKey {
    pub columns: Vec<String>,
}

impl NaturalKey {
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
        }
    }

    /// `(region, metric_name, metric_date)`
    pub fn energy_metrics() -> Self {
        Self::new(["region", "metric_name", "metric_date"])
    }

    /// Hashable, type-tagged key of `record`.
    pub fn key_of(&self, record: &Record) -> Vec<String> {
        self.columns
            .iter()
            .map(|c| record.get(c).key_fragment())
            .collect()
    }
}

impl Default for NaturalKey {
    fn default() -> Self {
        Self::energy_metrics()
    }
}
