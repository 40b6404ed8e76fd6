// src/dedup/mod.rs

use chrono::{DateTime, Utc};
use std::{cmp::Ordering, collections::HashMap};
use tracing::debug;

use crate::model::{Dataset, NaturalKey, Record};

/// Column whose value decides which duplicate is the latest.
pub const DEFAULT_ORDER_COLUMN: &str = "ingested_at";

/// Result of a dedup pass.
#[derive(Debug, Clone)]
pub struct Deduplicated {
    pub dataset: Dataset,
    pub duplicates_dropped: usize,
}

/// Keeps exactly one record per natural key.
///
/// Candidates sharing a key are ranked by `(order column, input position)`:
/// a record with a timestamp ranks above one without, a later timestamp
/// above an earlier one, and among equal timestamps the later position
/// wins. Positions are unique, so the ranking is total. Surviving keys keep
/// the order in which each key was first seen.
#[derive(Debug, Clone)]
pub struct Deduplicator {
    key: NaturalKey,
    order_column: String,
}

impl Deduplicator {
    pub fn new(key: NaturalKey) -> Self {
        Self {
            key,
            order_column: DEFAULT_ORDER_COLUMN.to_string(),
        }
    }

    pub fn with_order_column(mut self, column: impl Into<String>) -> Self {
        self.order_column = column.into();
        self
    }

    pub fn key(&self) -> &NaturalKey {
        &self.key
    }

    fn rank(&self, record: &Record, position: usize) -> (Option<DateTime<Utc>>, usize) {
        (record.get(&self.order_column).as_timestamp(), position)
    }

    /// The ordering used to pick a winner; `Greater` means `a` wins.
    pub fn compare(&self, a: (&Record, usize), b: (&Record, usize)) -> Ordering {
        self.rank(a.0, a.1).cmp(&self.rank(b.0, b.1))
    }

    pub fn dedup(&self, dataset: &Dataset) -> Deduplicated {
        // key -> slot in first-seen order
        let mut slots: HashMap<Vec<String>, usize> = HashMap::with_capacity(dataset.len());
        // per slot: position of the current winner
        let mut winners: Vec<usize> = Vec::new();

        for (pos, record) in dataset.records.iter().enumerate() {
            let key = self.key.key_of(record);
            match slots.get(&key) {
                Some(&slot) => {
                    let current = winners[slot];
                    let incumbent = (&dataset.records[current], current);
                    if self.compare((record, pos), incumbent) == Ordering::Greater {
                        winners[slot] = pos;
                    }
                }
                None => {
                    slots.insert(key, winners.len());
                    winners.push(pos);
                }
            }
        }

        let records: Vec<Record> = winners
            .iter()
            .map(|&pos| dataset.records[pos].clone())
            .collect();
        let duplicates_dropped = dataset.len() - records.len();
        debug!(
            dataset = %dataset.id,
            input = dataset.len(),
            kept = records.len(),
            duplicates_dropped,
            "deduplicated"
        );

        Deduplicated {
            dataset: Dataset {
                id: dataset.id.clone(),
                schema: dataset.schema.clone(),
                records,
            },
            duplicates_dropped,
        }
    }
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self::new(NaturalKey::energy_metrics())
    }
}
