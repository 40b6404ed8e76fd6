// src/normalize/mapping.rs

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

use crate::model::CanonicalSchema;

static NON_ALNUM: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9]+").expect("static regex"));

/// Alias table shipped with the pipeline: common spellings seen in agency
/// exports, keyed by folded name.
const STANDARD_ALIASES: &[(&str, &str)] = &[
    ("data_source", "source"),
    ("provider", "source"),
    ("region_code", "region"),
    ("province", "region"),
    ("state", "region"),
    ("area", "region"),
    ("zone", "region"),
    ("date", "metric_date"),
    ("period", "metric_date"),
    ("observation_date", "metric_date"),
    ("reporting_date", "metric_date"),
    ("metric", "metric_name"),
    ("indicator", "metric_name"),
    ("measure", "metric_name"),
    ("series", "metric_name"),
    ("value", "metric_value"),
    ("amount", "metric_value"),
    ("reading", "metric_value"),
    ("quantity", "metric_value"),
    ("units", "unit"),
    ("uom", "unit"),
    ("unit_of_measure", "unit"),
    ("ingestion_time", "ingested_at"),
    ("ingested_at_utc", "ingested_at"),
    ("loaded_at", "ingested_at"),
];

/// Fold a source header: lowercase, runs of non-alphanumerics become `_`,
/// no leading/trailing `_`. `"Metric Value (MWh)"` → `metric_value_mwh`.
pub fn fold_header(raw: &str) -> String {
    let lower = raw.trim().to_lowercase();
    NON_ALNUM
        .replace_all(&lower, "_")
        .trim_matches('_')
        .to_string()
}

/// How a source column resolved onto the canonical schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution<'s> {
    /// Folded source name equals the canonical name.
    Exact(&'s str),
    Alias(&'s str),
}

impl<'s> Resolution<'s> {
    pub fn canonical(&self) -> &'s str {
        match self {
            Resolution::Exact(c) | Resolution::Alias(c) => c,
        }
    }
}

/// Fixed lookup from source column names to canonical names.
#[derive(Debug, Clone)]
pub struct ColumnMapping {
    aliases: HashMap<String, String>,
}

impl ColumnMapping {
    /// No aliases: only columns already named canonically survive.
    pub fn identity() -> Self {
        Self {
            aliases: HashMap::new(),
        }
    }

    pub fn standard() -> Self {
        STANDARD_ALIASES
            .iter()
            .fold(Self::identity(), |m, (src, dst)| m.with_alias(src, dst))
    }

    pub fn with_alias(mut self, source: &str, canonical: &str) -> Self {
        self.aliases
            .insert(fold_header(source), canonical.to_string());
        self
    }

    pub fn with_aliases<'a, I>(self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        pairs
            .into_iter()
            .fold(self, |m, (src, dst)| m.with_alias(src, dst))
    }

    /// Resolve `source` against `schema`; `None` means the column is dropped.
    pub fn resolve<'s>(&self, source: &str, schema: &'s CanonicalSchema) -> Option<Resolution<'s>> {
        let folded = fold_header(source);
        if let Some(col) = schema.column(&folded) {
            return Some(Resolution::Exact(&col.name));
        }
        let target = self.aliases.get(&folded)?;
        schema.column(target).map(|c| Resolution::Alias(&c.name))
    }
}

impl Default for ColumnMapping {
    fn default() -> Self {
        Self::standard()
    }
}
