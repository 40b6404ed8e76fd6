// src/analytics/mod.rs

pub mod metrics;
pub mod table;

use chrono::DateTime;
use duckdb::{params, types::TimeUnit, types::Value as DuckValue, Connection};
use std::path::PathBuf;
use tracing::{debug, info, instrument};

pub use metrics::{MetricQuery, ALL_METRICS};
pub use table::ResultTable;

use crate::error::{PipelineError, Result};
use crate::model::{arrow::days_to_date, Dataset, Value};
use crate::store::ProcessedStore;

pub const FACT_TABLE: &str = "fact_sustainability_metric";

const CREATE_FACT_TABLE: &str = "CREATE TABLE IF NOT EXISTS fact_sustainability_metric(
    region VARCHAR,
    metric_date DATE,
    metric_name VARCHAR,
    metric_value DOUBLE
);";

fn query_error(query: &str, e: duckdb::Error) -> PipelineError {
    PipelineError::Query {
        query: query.to_string(),
        message: e.to_string(),
    }
}

/// In-memory DuckDB holding the fact table the metric queries read.
pub struct AnalyticsRunner {
    conn: Connection,
}

impl AnalyticsRunner {
    pub fn new() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| query_error("open", e))?;
        conn.execute(CREATE_FACT_TABLE, [])
            .map_err(|e| query_error("create_fact_table", e))?;
        Ok(Self { conn })
    }

    pub fn row_count(&self) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {FACT_TABLE}");
        self.conn
            .query_row(&sql, [], |r| r.get(0))
            .map_err(|e| query_error("row_count", e))
    }

    /// Load the committed Parquet of every dataset in `dataset_ids` into the
    /// fact table. Fails with `NoProcessedData` when none of them has a
    /// committed file.
    #[instrument(skip(self, store))]
    pub fn load_processed(&self, store: &ProcessedStore, dataset_ids: &[String]) -> Result<usize> {
        let mut files: Vec<PathBuf> = Vec::new();
        for id in dataset_ids {
            files.extend(store.committed_files(id)?);
        }
        if files.is_empty() {
            return Err(PipelineError::NoProcessedData(store.root().to_path_buf()));
        }

        let list = files
            .iter()
            .map(|f| format!("'{}'", f.to_string_lossy().replace('\'', "''")))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO {FACT_TABLE} \
             SELECT region, CAST(metric_date AS DATE), metric_name, CAST(metric_value AS DOUBLE) \
             FROM read_parquet([{list}])"
        );
        let n = self
            .conn
            .execute(&sql, [])
            .map_err(|e| query_error("load_processed", e))?;
        info!(files = files.len(), rows = n, "loaded processed parquet");
        Ok(n)
    }

    /// Load an in-memory dataset; records missing a fact column load as NULL.
    pub fn load_dataset(&self, dataset: &Dataset) -> Result<usize> {
        let sql = format!("INSERT INTO {FACT_TABLE} VALUES (?, CAST(? AS DATE), ?, ?)");
        let mut stmt = self
            .conn
            .prepare(&sql)
            .map_err(|e| query_error("load_dataset", e))?;
        for r in &dataset.records {
            let date = r.get("metric_date").as_date().map(|d| d.to_string());
            stmt.execute(params![
                r.get("region").as_str(),
                date,
                r.get("metric_name").as_str(),
                r.get("metric_value").as_f64(),
            ])
            .map_err(|e| query_error("load_dataset", e))?;
        }
        debug!(rows = dataset.len(), dataset = %dataset.id, "loaded dataset");
        Ok(dataset.len())
    }

    /// Run `query` with its default metric name bound.
    pub fn run(&self, query: &MetricQuery) -> Result<ResultTable> {
        self.run_with(query, query.metric_name)
    }

    #[instrument(skip(self, query), fields(query = query.name))]
    pub fn run_with(&self, query: &MetricQuery, metric_name: &str) -> Result<ResultTable> {
        self.run_sql(query.name, query.sql, metric_name)
    }

    pub fn run_all(&self) -> Result<Vec<ResultTable>> {
        ALL_METRICS.iter().map(|q| self.run(q)).collect()
    }

    /// Run an arbitrary single-placeholder statement; the engine's error
    /// text is passed through unchanged.
    pub fn run_sql(&self, name: &str, sql: &str, metric_name: &str) -> Result<ResultTable> {
        let mut stmt = self.conn.prepare(sql).map_err(|e| query_error(name, e))?;
        let mut rows = stmt
            .query(params![metric_name])
            .map_err(|e| query_error(name, e))?;
        let columns = rows
            .as_ref()
            .map(|s| s.column_names())
            .unwrap_or_default();

        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(|e| query_error(name, e))? {
            let mut values = Vec::with_capacity(columns.len());
            for i in 0..columns.len() {
                let v: DuckValue = row.get(i).map_err(|e| query_error(name, e))?;
                values.push(from_duck(v));
            }
            out.push(values);
        }
        debug!(rows = out.len(), "query finished");

        Ok(ResultTable {
            name: name.to_string(),
            columns,
            rows: out,
        })
    }
}

fn from_duck(v: DuckValue) -> Value {
    match v {
        DuckValue::Null => Value::Null,
        DuckValue::Boolean(b) => Value::Text(b.to_string()),
        DuckValue::TinyInt(n) => Value::Number(n.into()),
        DuckValue::SmallInt(n) => Value::Number(n.into()),
        DuckValue::Int(n) => Value::Number(n.into()),
        DuckValue::BigInt(n) => Value::Number(n as f64),
        DuckValue::HugeInt(n) => Value::Number(n as f64),
        DuckValue::UTinyInt(n) => Value::Number(n.into()),
        DuckValue::USmallInt(n) => Value::Number(n.into()),
        DuckValue::UInt(n) => Value::Number(n.into()),
        DuckValue::UBigInt(n) => Value::Number(n as f64),
        DuckValue::Float(n) => Value::Number(n.into()),
        DuckValue::Double(n) => Value::Number(n),
        DuckValue::Decimal(d) => decimal_value(&d.to_string()),
        DuckValue::Text(s) => Value::Text(s),
        DuckValue::Date32(days) => days_to_date(days).map(Value::Date).unwrap_or(Value::Null),
        DuckValue::Timestamp(unit, n) => {
            let micros = match unit {
                TimeUnit::Second => n.saturating_mul(1_000_000),
                TimeUnit::Millisecond => n.saturating_mul(1_000),
                TimeUnit::Microsecond => n,
                TimeUnit::Nanosecond => n / 1_000,
            };
            DateTime::from_timestamp_micros(micros)
                .map(Value::Timestamp)
                .unwrap_or(Value::Null)
        }
        other => Value::Text(format!("{other:?}")),
    }
}

/// Decimals become numbers; one that does not fit an f64 is kept as its text.
fn decimal_value(text: &str) -> Value {
    text.parse::<f64>()
        .ok()
        .filter(|n| n.is_finite())
        .map(Value::Number)
        .unwrap_or_else(|| Value::Text(text.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CanonicalSchema, Record};
    use chrono::NaiveDate;

    fn fact(region: &str, date: (i32, u32, u32), metric: &str, value: f64) -> Record {
        [
            ("region", Value::from(region)),
            (
                "metric_date",
                Value::from(NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap()),
            ),
            ("metric_name", Value::from(metric)),
            ("metric_value", Value::from(value)),
        ]
        .into_iter()
        .collect()
    }

    fn ymd(y: i32, m: u32, d: u32) -> Value {
        Value::from(NaiveDate::from_ymd_opt(y, m, d).unwrap())
    }

    fn runner_with(records: Vec<Record>) -> anyhow::Result<AnalyticsRunner> {
        let runner = AnalyticsRunner::new()?;
        let d = Dataset::new("energy_metrics", CanonicalSchema::energy_metrics())
            .with_records(records);
        runner.load_dataset(&d)?;
        Ok(runner)
    }

    fn energy_rows() -> Vec<Record> {
        vec![
            fact("A", (2024, 1, 5), "energy_mwh", 10.0),
            fact("A", (2024, 1, 20), "energy_mwh", 5.0),
            fact("A", (2024, 2, 3), "energy_mwh", 8.0),
        ]
    }

    #[test]
    fn monthly_energy_sums_per_month() -> anyhow::Result<()> {
        let runner = runner_with(energy_rows())?;
        let t = runner.run(&metrics::MONTHLY_ENERGY_BY_REGION)?;
        assert_eq!(t.columns, vec!["region", "month_start", "total_energy_mwh"]);
        assert_eq!(
            t.rows,
            vec![
                vec![Value::from("A"), ymd(2024, 1, 1), Value::from(15.0)],
                vec![Value::from("A"), ymd(2024, 2, 1), Value::from(8.0)],
            ]
        );
        Ok(())
    }

    #[test]
    fn trend_has_null_first_delta() -> anyhow::Result<()> {
        let runner = runner_with(energy_rows())?;
        let t = runner.run(&metrics::ENERGY_TREND_MONTH_OVER_MONTH)?;
        let deltas = t.column("month_over_month_change").unwrap();
        assert_eq!(deltas, vec![&Value::Null, &Value::from(-7.0)]);
        Ok(())
    }

    #[test]
    fn trend_ignores_month_gaps() -> anyhow::Result<()> {
        let runner = runner_with(vec![
            fact("A", (2024, 1, 1), "energy_mwh", 10.0),
            fact("A", (2024, 3, 1), "energy_mwh", 4.0),
        ])?;
        let t = runner.run(&metrics::ENERGY_TREND_MONTH_OVER_MONTH)?;
        let deltas = t.column("month_over_month_change").unwrap();
        assert_eq!(deltas, vec![&Value::Null, &Value::from(-6.0)]);
        Ok(())
    }

    #[test]
    fn average_emissions_ordered_descending() -> anyhow::Result<()> {
        let runner = runner_with(vec![
            fact("A", (2024, 1, 1), "emissions_tco2", 4.0),
            fact("A", (2024, 1, 2), "emissions_tco2", 6.0),
            fact("B", (2024, 1, 1), "emissions_tco2", 9.0),
            fact("C", (2024, 1, 1), "emissions_tco2", 5.0),
        ])?;
        let t = runner.run(&metrics::AVERAGE_EMISSIONS_BY_REGION)?;
        assert_eq!(
            t.rows,
            vec![
                vec![Value::from("B"), Value::from(9.0)],
                vec![Value::from("A"), Value::from(5.0)],
                vec![Value::from("C"), Value::from(5.0)],
            ]
        );
        Ok(())
    }

    #[test]
    fn absent_metric_gives_empty_table() -> anyhow::Result<()> {
        let runner = runner_with(energy_rows())?;
        let t = runner.run(&metrics::AVERAGE_EMISSIONS_BY_REGION)?;
        assert!(t.is_empty());
        assert_eq!(t.columns, vec!["region", "avg_emissions_tco2"]);
        Ok(())
    }

    #[test]
    fn decimals_are_never_dropped() -> anyhow::Result<()> {
        let runner = AnalyticsRunner::new()?;
        let t = runner.run_sql(
            "decimal",
            "SELECT CAST(12.50 AS DECIMAL(10, 2)) AS amount, ? AS metric",
            "energy_mwh",
        )?;
        assert_eq!(t.rows, vec![vec![Value::from(12.5), Value::from("energy_mwh")]]);

        assert_eq!(decimal_value("1e999"), Value::Text("1e999".into()));
        assert_eq!(decimal_value("-0.25"), Value::Number(-0.25));
        Ok(())
    }

    #[test]
    fn malformed_sql_is_query_error() -> anyhow::Result<()> {
        let runner = AnalyticsRunner::new()?;
        let err = runner
            .run_sql("broken", "SELEC region FROM nowhere WHERE x = ?", "energy_mwh")
            .unwrap_err();
        match err {
            PipelineError::Query { query, message } => {
                assert_eq!(query, "broken");
                assert!(!message.is_empty());
            }
            other => panic!("unexpected error: {other}"),
        }
        Ok(())
    }

    #[test]
    fn empty_store_is_no_processed_data() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let runner = AnalyticsRunner::new()?;
        let err = runner
            .load_processed(&ProcessedStore::new(tmp.path()), &["energy_metrics".into()])
            .unwrap_err();
        assert!(matches!(err, PipelineError::NoProcessedData(_)));
        Ok(())
    }

    #[test]
    fn loads_committed_parquet() -> anyhow::Result<()> {
        use crate::store::{PartitionSpec, ProcessedWriter};

        let tmp = tempfile::tempdir()?;
        let store = ProcessedStore::new(tmp.path());
        let schema = CanonicalSchema::energy_metrics();
        let records = energy_rows()
            .into_iter()
            .map(|mut r| {
                for c in ["source", "unit", "ingested_at"] {
                    r.insert(c, Value::Null);
                }
                r
            })
            .collect();
        let d = Dataset::new("energy_metrics", schema).with_records(records);
        ProcessedWriter::new(store.clone(), PartitionSpec::by_region()).write(&d)?;

        let runner = AnalyticsRunner::new()?;
        assert_eq!(runner.load_processed(&store, &["energy_metrics".into()])?, 3);
        assert_eq!(runner.row_count()?, 3);
        let t = runner.run(&metrics::MONTHLY_ENERGY_BY_REGION)?;
        assert_eq!(t.len(), 2);
        Ok(())
    }
}
