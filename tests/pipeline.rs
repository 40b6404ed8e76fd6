use anyhow::Result;
use chrono::NaiveDate;
use std::{fs, path::Path};
use sustainlake::{
    analytics::ResultTable,
    config::PipelineConfig,
    model::{CanonicalSchema, Value},
    normalize::{RejectPolicy, RejectReason},
    pipeline::{run_analytics, run_transform},
    store::ProcessedStore,
    PipelineError,
};
use tempfile::tempdir;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

const DATASET: &str = "energy_metrics";

fn init_test_logging() {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,sustainlake=debug")),
        )
        .with_test_writer()
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn land(data_dir: &Path, stamp: &str, body: &str) -> Result<()> {
    let dir = data_dir
        .join("raw")
        .join(DATASET)
        .join(format!("ingested_at={stamp}"));
    fs::create_dir_all(&dir)?;
    fs::write(dir.join("part-000.csv"), body)?;
    Ok(())
}

fn config(data_dir: &Path, max_ratio: f64) -> PipelineConfig {
    PipelineConfig {
        rejects: RejectPolicy {
            max_ratio,
            max_count: None,
        },
        ..PipelineConfig::default()
    }
    .with_data_dir(data_dir)
}

fn table<'a>(tables: &'a [ResultTable], name: &str) -> &'a ResultTable {
    tables
        .iter()
        .find(|t| t.name == name)
        .unwrap_or_else(|| panic!("missing table {name}"))
}

fn date(y: i32, m: u32, d: u32) -> Value {
    Value::from(NaiveDate::from_ymd_opt(y, m, d).unwrap())
}

const FIRST: &str = "\
Region,Date,Metric,Value,Unit
A,2024-01-05,energy_mwh,10,MWh
A,2024-01-20,energy_mwh,5,MWh
A,2024-02-03,energy_mwh,8,MWh
A,2024-02-03,energy_mwh,8,MWh
A,2024-01-01,emissions_tco2,4,t
A,2024-02-01,emissions_tco2,6,t
B,2024-01-01,energy_mwh,99,MWh
A,not-a-date,energy_mwh,3,MWh
";

#[test]
fn transform_then_analytics() -> Result<()> {
    init_test_logging();
    let tmp = tempdir()?;
    land(tmp.path(), "20240301T000000Z", FIRST)?;
    let cfg = config(tmp.path(), 0.5);

    let report = run_transform(&cfg, DATASET)?;
    assert_eq!(report.summary.input_rows, 8);
    assert_eq!(report.summary.accepted_rows, 7);
    assert_eq!(report.summary.count(RejectReason::TypeCastFailure), 1);
    assert_eq!(report.duplicates_dropped, 1);
    assert_eq!(report.deduplicated_rows, 6);
    assert!(report.deduplicated_rows <= report.summary.input_rows);

    let processed = ProcessedStore::new(tmp.path())
        .read_dataset(DATASET, &CanonicalSchema::energy_metrics())?;
    assert_eq!(processed.len(), 6);
    assert!(processed.conforms());

    let tables = run_analytics(&cfg, &[])?;
    let monthly = table(&tables, "monthly_energy_by_region");
    assert_eq!(
        monthly.rows,
        vec![
            vec![Value::from("A"), date(2024, 1, 1), Value::from(15.0)],
            vec![Value::from("A"), date(2024, 2, 1), Value::from(8.0)],
            vec![Value::from("B"), date(2024, 1, 1), Value::from(99.0)],
        ]
    );

    let trend = table(&tables, "energy_trend_month_over_month");
    assert_eq!(
        trend.column("month_over_month_change").unwrap(),
        vec![&Value::Null, &Value::from(-7.0), &Value::Null]
    );

    let avg = table(&tables, "average_emissions_by_region");
    assert_eq!(avg.rows, vec![vec![Value::from("A"), Value::from(5.0)]]);
    Ok(())
}

#[test]
fn rerun_rebuilds_the_whole_dataset() -> Result<()> {
    init_test_logging();
    let tmp = tempdir()?;
    land(tmp.path(), "20240301T000000Z", FIRST)?;
    let cfg = config(tmp.path(), 0.5);
    let first = run_transform(&cfg, DATASET)?;
    assert_eq!(first.write.partitions.len(), 2);

    // the newer ingestion no longer carries region B
    land(
        tmp.path(),
        "20240401T000000Z",
        "region,metric_date,metric_name,metric_value\nA,2024-01-05,energy_mwh,1\n",
    )?;
    let report = run_transform(&cfg, DATASET)?;
    assert_eq!(report.write.partitions.len(), 1);
    assert_eq!(report.write.partitions[0].partition, "region=A");

    let processed = ProcessedStore::new(tmp.path())
        .read_dataset(DATASET, &CanonicalSchema::energy_metrics())?;
    let regions: Vec<&Value> = processed.records.iter().map(|r| r.get("region")).collect();
    assert_eq!(regions, vec![&Value::from("A")]);

    let tables = run_analytics(&cfg, &[DATASET.to_string()])?;
    let monthly = table(&tables, "monthly_energy_by_region");
    assert_eq!(
        monthly.rows,
        vec![vec![Value::from("A"), date(2024, 1, 1), Value::from(1.0)]]
    );
    Ok(())
}

#[test]
fn own_ingestion_time_decides_duplicates() -> Result<()> {
    let tmp = tempdir()?;
    land(
        tmp.path(),
        "20240301T000000Z",
        "region,metric_date,metric_name,metric_value,ingestion_time\n\
         A,2024-01-05,energy_mwh,10,2024-02-02T00:00:00Z\n\
         A,2024-01-05,energy_mwh,5,2024-02-01T00:00:00Z\n",
    )?;
    let report = run_transform(&config(tmp.path(), 0.05), DATASET)?;
    assert_eq!(report.duplicates_dropped, 1);

    let processed = ProcessedStore::new(tmp.path())
        .read_dataset(DATASET, &CanonicalSchema::energy_metrics())?;
    assert_eq!(processed.len(), 1);
    assert_eq!(processed.records[0].get("metric_value"), &Value::from(10.0));
    Ok(())
}

#[test]
fn too_many_rejects_fail_before_writing() -> Result<()> {
    let tmp = tempdir()?;
    land(
        tmp.path(),
        "20240301T000000Z",
        "region,metric_date,metric_name,metric_value\nA,2024-01-05,energy_mwh,10\nA,2024-01-06,energy_mwh,-4\n",
    )?;

    let err = run_transform(&config(tmp.path(), 0.05), DATASET).unwrap_err();
    assert_eq!(err.exit_code(), 2);
    match err {
        PipelineError::RejectionThresholdExceeded(summary) => {
            assert_eq!(summary.rejected_rows, 1);
            assert_eq!(summary.count(RejectReason::OutOfRangeValue), 1);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!tmp.path().join("processed").exists());
    Ok(())
}

#[test]
fn analytics_without_processed_data_fails() -> Result<()> {
    let tmp = tempdir()?;
    let err = run_analytics(&config(tmp.path(), 0.05), &[]).unwrap_err();
    assert!(matches!(err, PipelineError::NoProcessedData(_)));
    assert_eq!(err.exit_code(), 1);
    Ok(())
}

#[test]
fn missing_raw_dataset_is_reported() -> Result<()> {
    let tmp = tempdir()?;
    let err = run_transform(&config(tmp.path(), 0.05), "water_usage").unwrap_err();
    assert!(matches!(err, PipelineError::DatasetNotFound { .. }));
    Ok(())
}
