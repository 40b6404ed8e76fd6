// src/pipeline/mod.rs

use serde::Serialize;
use std::path::PathBuf;
use tracing::{info, instrument, warn};

use crate::analytics::{AnalyticsRunner, ResultTable};
use crate::config::PipelineConfig;
use crate::dedup::{Deduplicator, DEFAULT_ORDER_COLUMN};
use crate::error::Result;
use crate::model::CanonicalSchema;
use crate::normalize::{ColumnMapping, Rejection, RejectionSummary, SchemaNormalizer};
use crate::raw::RawStore;
use crate::store::{ProcessedStore, ProcessedWriter, WriteReport};

/// Rejections logged individually before the rest are only counted.
const LOGGED_REJECTS: usize = 10;

/// Outcome of one successful `transform` run.
#[derive(Debug, Clone, Serialize)]
pub struct TransformReport {
    pub dataset_id: String,
    pub raw_partition: PathBuf,
    pub summary: RejectionSummary,
    pub deduplicated_rows: usize,
    pub duplicates_dropped: usize,
    pub write: WriteReport,
}

/// Normalizer built from the config's alias table on top of the standard one.
pub fn normalizer_for(config: &PipelineConfig) -> SchemaNormalizer {
    let mapping = ColumnMapping::standard().with_aliases(&config.column_aliases);
    SchemaNormalizer::new(CanonicalSchema::energy_metrics(), mapping)
}

fn log_rejects(rejects: &[Rejection]) {
    for r in rejects.iter().take(LOGGED_REJECTS) {
        warn!(
            index = r.index,
            reason = %r.reason,
            column = %r.column,
            detail = %r.detail,
            "rejected record"
        );
    }
    if rejects.len() > LOGGED_REJECTS {
        warn!(more = rejects.len() - LOGGED_REJECTS, "further rejects not logged");
    }
}

/// raw -> normalize -> reject policy -> dedup -> publish a new processed version.
///
/// The rejection summary is carried in the error when the policy fails, so
/// callers can print it either way.
#[instrument(level = "info", skip(config), fields(data_dir = %config.data_dir.display()))]
pub fn run_transform(config: &PipelineConfig, dataset_id: &str) -> Result<TransformReport> {
    let raw = RawStore::new(&config.data_dir).read_latest(dataset_id)?;

    let mut normalizer = normalizer_for(config);
    if let Some(ts) = raw.ingested_at {
        // only for rows whose own ingestion column is absent or blank
        normalizer = normalizer.with_fallback(DEFAULT_ORDER_COLUMN, ts);
    }
    let normalized = normalizer.normalize(dataset_id, &raw.records);
    let summary = normalized.summary();
    info!(%summary, "normalized");
    log_rejects(&normalized.rejects);
    config.rejects.check(&summary)?;

    let deduped = Deduplicator::new(config.natural_key.clone()).dedup(&normalized.dataset);
    info!(
        rows = deduped.dataset.len(),
        dropped = deduped.duplicates_dropped,
        "deduplicated"
    );

    let writer = ProcessedWriter::new(
        ProcessedStore::new(&config.data_dir),
        config.partition_by.clone(),
    );
    let write = writer.write(&deduped.dataset)?;

    Ok(TransformReport {
        dataset_id: dataset_id.to_string(),
        raw_partition: raw.partition,
        summary,
        deduplicated_rows: deduped.dataset.len(),
        duplicates_dropped: deduped.duplicates_dropped,
        write,
    })
}

/// Run every metric query over the committed data of `datasets`, or of every
/// processed dataset when `datasets` is empty.
#[instrument(level = "info", skip(config))]
pub fn run_analytics(config: &PipelineConfig, datasets: &[String]) -> Result<Vec<ResultTable>> {
    let store = ProcessedStore::new(&config.data_dir);
    let ids = if datasets.is_empty() {
        store.datasets()?
    } else {
        datasets.to_vec()
    };

    let runner = AnalyticsRunner::new()?;
    runner.load_processed(&store, &ids)?;
    runner.run_all()
}
