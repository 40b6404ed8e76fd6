// src/normalize/mod.rs

pub mod cast;
pub mod mapping;

use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt};
use tracing::debug;

pub use mapping::{fold_header, ColumnMapping, Resolution};

use crate::error::{PipelineError, Result};
use crate::model::{CanonicalSchema, ColumnSpec, ColumnType, Dataset, Record, Value};

/// Why a record did not make it into the normalized dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    MissingRequiredField,
    TypeCastFailure,
    OutOfRangeValue,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::MissingRequiredField => "missing_required_field",
            RejectReason::TypeCastFailure => "type_cast_failure",
            RejectReason::OutOfRangeValue => "out_of_range_value",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A rejected input record with the first column that failed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rejection {
    /// Position in the raw input.
    pub index: usize,
    pub reason: RejectReason,
    pub column: String,
    pub detail: String,
    pub record: Record,
}

/// Normalizer output: the conforming dataset plus every rejection.
#[derive(Debug, Clone)]
pub struct Normalized {
    pub dataset: Dataset,
    pub rejects: Vec<Rejection>,
}

impl Normalized {
    pub fn summary(&self) -> RejectionSummary {
        let mut by_reason = BTreeMap::new();
        for r in &self.rejects {
            *by_reason.entry(r.reason).or_insert(0) += 1;
        }
        RejectionSummary {
            input_rows: self.dataset.len() + self.rejects.len(),
            accepted_rows: self.dataset.len(),
            rejected_rows: self.rejects.len(),
            by_reason,
        }
    }
}

/// Counts per rejection reason for one normalization pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectionSummary {
    pub input_rows: usize,
    pub accepted_rows: usize,
    pub rejected_rows: usize,
    pub by_reason: BTreeMap<RejectReason, usize>,
}

impl RejectionSummary {
    pub fn count(&self, reason: RejectReason) -> usize {
        self.by_reason.get(&reason).copied().unwrap_or(0)
    }

    pub fn rejected_ratio(&self) -> f64 {
        if self.input_rows == 0 {
            0.0
        } else {
            self.rejected_rows as f64 / self.input_rows as f64
        }
    }
}

impl fmt::Display for RejectionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "input={} accepted={} rejected={}",
            self.input_rows, self.accepted_rows, self.rejected_rows
        )?;
        for (reason, n) in &self.by_reason {
            write!(f, " {reason}={n}")?;
        }
        Ok(())
    }
}

/// How many rejects a run tolerates before failing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RejectPolicy {
    /// Largest tolerated `rejected / input` fraction.
    pub max_ratio: f64,
    /// Optional absolute cap, checked in addition to the ratio.
    pub max_count: Option<usize>,
}

impl Default for RejectPolicy {
    fn default() -> Self {
        Self {
            max_ratio: 0.05,
            max_count: None,
        }
    }
}

impl RejectPolicy {
    pub fn check(&self, summary: &RejectionSummary) -> Result<()> {
        let over_ratio = summary.rejected_ratio() > self.max_ratio;
        let over_count = self
            .max_count
            .is_some_and(|max| summary.rejected_rows > max);
        if over_ratio || over_count {
            return Err(PipelineError::RejectionThresholdExceeded(summary.clone()));
        }
        Ok(())
    }
}

/// Maps raw records onto a canonical schema.
#[derive(Debug, Clone)]
pub struct SchemaNormalizer {
    schema: CanonicalSchema,
    mapping: ColumnMapping,
    /// Values for canonical columns no source column fills.
    fallbacks: BTreeMap<String, Value>,
}

impl SchemaNormalizer {
    pub fn new(schema: CanonicalSchema, mapping: ColumnMapping) -> Self {
        Self {
            schema,
            mapping,
            fallbacks: BTreeMap::new(),
        }
    }

    /// Use `value` for `column` in records where no source column resolves to
    /// it, or where the resolved cell is blank. Used for the raw partition's
    /// ingestion stamp.
    pub fn with_fallback(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fallbacks.insert(column.into(), value.into());
        self
    }

    pub fn schema(&self) -> &CanonicalSchema {
        &self.schema
    }

    /// Normalize `records` into a dataset named `dataset_id`. Never fails:
    /// bad rows come back as rejections.
    pub fn normalize(&self, dataset_id: &str, records: &[Record]) -> Normalized {
        let mut dataset = Dataset::new(dataset_id, self.schema.clone());
        let mut rejects = Vec::new();

        for (index, raw) in records.iter().enumerate() {
            match self.normalize_record(raw) {
                Ok(rec) => dataset.records.push(rec),
                Err((reason, column, detail)) => {
                    debug!(dataset = dataset_id, index, %reason, column = %column, "rejected record");
                    rejects.push(Rejection {
                        index,
                        reason,
                        column,
                        detail,
                        record: raw.clone(),
                    });
                }
            }
        }

        Normalized { dataset, rejects }
    }

    /// Pick one source value per canonical column. An exact-name column beats
    /// an alias; otherwise the first in sorted source-name order wins.
    fn map_columns<'r>(&self, raw: &'r Record) -> BTreeMap<&str, (bool, &'r Value)> {
        let mut mapped: BTreeMap<&str, (bool, &Value)> = BTreeMap::new();
        for (source, value) in raw.iter() {
            let Some(res) = self.mapping.resolve(source, &self.schema) else {
                continue;
            };
            let exact = matches!(res, Resolution::Exact(_));
            match mapped.get(res.canonical()) {
                Some((true, _)) => {}
                Some((false, _)) if !exact => {}
                _ => {
                    mapped.insert(res.canonical(), (exact, value));
                }
            }
        }
        mapped
    }

    fn normalize_record(
        &self,
        raw: &Record,
    ) -> std::result::Result<Record, (RejectReason, String, String)> {
        let mapped = self.map_columns(raw);
        let mut out = Record::new();

        for spec in &self.schema.columns {
            let cleaned = mapped
                .get(spec.name.as_str())
                .map(|(_, v)| cast::clean_value(v))
                .filter(|v| !v.is_null())
                .or_else(|| self.fallbacks.get(&spec.name).cloned())
                .unwrap_or(Value::Null);

            let value = check_column(spec, &cleaned)
                .map_err(|(reason, detail)| (reason, spec.name.clone(), detail))?;
            out.insert(spec.name.clone(), value);
        }

        Ok(out)
    }
}

impl Default for SchemaNormalizer {
    fn default() -> Self {
        Self::new(CanonicalSchema::energy_metrics(), ColumnMapping::standard())
    }
}

fn check_column(
    spec: &ColumnSpec,
    value: &Value,
) -> std::result::Result<Value, (RejectReason, String)> {
    if value.is_null() {
        return if spec.nullable {
            Ok(Value::Null)
        } else {
            Err((
                RejectReason::MissingRequiredField,
                format!("`{}` is required", spec.name),
            ))
        };
    }

    let casted =
        cast::cast_to(value, spec.ty).map_err(|detail| (RejectReason::TypeCastFailure, detail))?;

    if spec.ty == ColumnType::Number {
        if let Value::Number(n) = casted {
            if !n.is_finite() || !spec.in_range(n) {
                return Err((
                    RejectReason::OutOfRangeValue,
                    format!(
                        "{n} outside [{}, {}]",
                        spec.min.map_or("-inf".into(), |v| v.to_string()),
                        spec.max.map_or("inf".into(), |v| v.to_string())
                    ),
                ));
            }
        }
    }

    Ok(casted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn raw(pairs: &[(&str, &str)]) -> Record {
        pairs.iter().map(|(k, v)| (*k, Value::from(*v))).collect()
    }

    fn good() -> Record {
        raw(&[
            ("source", "api"),
            ("region", "BC"),
            ("metric_date", "2025-01-01"),
            ("metric_name", "energy_mwh"),
            ("metric_value", "10.0"),
            ("unit", "MWh"),
        ])
    }

    #[test]
    fn output_has_exactly_canonical_columns() {
        let n = SchemaNormalizer::default();
        let mut r = good();
        r.insert("comment", "dropped");
        let out = n.normalize("energy_metrics", &[r]);

        assert!(out.rejects.is_empty());
        assert!(out.dataset.conforms());
        let cols: Vec<&str> = out.dataset.records[0].columns().collect();
        let mut want: Vec<&str> = n.schema().names().collect();
        want.sort();
        assert_eq!(cols, want);
        assert_eq!(out.dataset.records[0].get("ingested_at"), &Value::Null);
        assert_eq!(
            out.dataset.records[0].get("metric_date"),
            &Value::Date(NaiveDate::from_ymd_opt(2025, 1, 1).unwrap())
        );
    }

    #[test]
    fn aliases_are_mapped() {
        let n = SchemaNormalizer::default();
        let r = raw(&[
            ("Province", "ON"),
            ("Date", "2025/02/03"),
            ("Indicator", "emissions_tco2"),
            ("Value", "4"),
        ]);
        let out = n.normalize("d", &[r]);
        assert!(out.rejects.is_empty());
        let rec = &out.dataset.records[0];
        assert_eq!(rec.get("region"), &Value::from("ON"));
        assert_eq!(rec.get("metric_value"), &Value::Number(4.0));
        assert_eq!(rec.get("unit"), &Value::Null);
    }

    #[test]
    fn exact_column_beats_alias() {
        let n = SchemaNormalizer::default();
        let mut r = good();
        r.insert("area", "SHADOW");
        let out = n.normalize("d", &[r]);
        assert_eq!(out.dataset.records[0].get("region"), &Value::from("BC"));
    }

    #[test]
    fn rejection_reasons() {
        let n = SchemaNormalizer::default();

        let mut missing = good();
        missing.insert("region", "   ");
        let mut bad_cast = good();
        bad_cast.insert("metric_value", "ten");
        let mut bad_date = good();
        bad_date.insert("metric_date", "not-a-date");
        let mut negative = good();
        negative.insert("metric_value", "-3");
        let mut nan = good();
        nan.insert("metric_value", "NaN");

        let out = n.normalize("d", &[good(), missing, bad_cast, bad_date, negative, nan]);
        assert_eq!(out.dataset.len(), 1);

        let reasons: Vec<(usize, RejectReason, &str)> = out
            .rejects
            .iter()
            .map(|r| (r.index, r.reason, r.column.as_str()))
            .collect();
        assert_eq!(
            reasons,
            vec![
                (1, RejectReason::MissingRequiredField, "region"),
                (2, RejectReason::TypeCastFailure, "metric_value"),
                (3, RejectReason::TypeCastFailure, "metric_date"),
                (4, RejectReason::OutOfRangeValue, "metric_value"),
                (5, RejectReason::OutOfRangeValue, "metric_value"),
            ]
        );

        let summary = out.summary();
        assert_eq!(summary.input_rows, 6);
        assert_eq!(summary.accepted_rows, 1);
        assert_eq!(summary.count(RejectReason::TypeCastFailure), 2);
        assert_eq!(summary.count(RejectReason::OutOfRangeValue), 2);
        assert_eq!(summary.count(RejectReason::MissingRequiredField), 1);
        assert_eq!(
            summary.to_string(),
            "input=6 accepted=1 rejected=5 missing_required_field=1 type_cast_failure=2 out_of_range_value=2"
        );
    }

    #[test]
    fn aliased_ingestion_time_beats_partition_stamp() {
        use chrono::{TimeZone, Utc};

        let stamp = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let n = SchemaNormalizer::default().with_fallback("ingested_at", stamp);

        let mut with_own = good();
        with_own.insert("ingestion_time", "2024-02-02T00:00:00Z");
        let mut blank = good();
        blank.insert("ingestion_time", "  ");
        let out = n.normalize("d", &[with_own, blank, good()]);

        let stamps: Vec<&Value> = out
            .dataset
            .records
            .iter()
            .map(|r| r.get("ingested_at"))
            .collect();
        assert_eq!(
            stamps,
            vec![
                &Value::Timestamp(Utc.with_ymd_and_hms(2024, 2, 2, 0, 0, 0).unwrap()),
                &Value::Timestamp(stamp),
                &Value::Timestamp(stamp),
            ]
        );
    }

    #[test]
    fn rejected_record_keeps_raw_values() {
        let n = SchemaNormalizer::default();
        let mut r = good();
        r.insert("metric_value", "ten");
        let out = n.normalize("d", &[r.clone()]);
        assert_eq!(out.rejects[0].record, r);
    }

    #[test]
    fn policy_thresholds() {
        let summary = RejectionSummary {
            input_rows: 100,
            accepted_rows: 95,
            rejected_rows: 5,
            by_reason: BTreeMap::from([(RejectReason::TypeCastFailure, 5)]),
        };
        assert!(RejectPolicy::default().check(&summary).is_ok());

        let strict = RejectPolicy {
            max_ratio: 0.01,
            max_count: None,
        };
        assert!(matches!(
            strict.check(&summary),
            Err(PipelineError::RejectionThresholdExceeded(s)) if s == summary
        ));

        let capped = RejectPolicy {
            max_ratio: 1.0,
            max_count: Some(4),
        };
        assert!(capped.check(&summary).is_err());

        assert!(strict.check(&RejectionSummary::default()).is_ok());
    }
}
