//! Dense per-run series identifiers for (store, family) pairs.

use std::collections::HashMap;

use sha2::{Digest, Sha256};
use tracing::info;

use crate::records::{SalesRecord, SeriesKey};

/// Bijection between series keys and dense ids `0..len`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeriesIndex {
    keys: Vec<SeriesKey>,
    ids: HashMap<SeriesKey, u32>,
}

impl SeriesIndex {
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn id_of(&self, key: &SeriesKey) -> Option<u32> {
        self.ids.get(key).copied()
    }

    pub fn key_of(&self, series_id: u32) -> Option<&SeriesKey> {
        self.keys.get(series_id as usize)
    }

    pub fn keys(&self) -> &[SeriesKey] {
        &self.keys
    }

    fn get_or_assign(&mut self, key: SeriesKey) -> u32 {
        if let Some(id) = self.ids.get(&key) {
            return *id;
        }
        let id = self.keys.len() as u32;
        self.keys.push(key.clone());
        self.ids.insert(key, id);
        id
    }

    /// SHA-256 over the stable keys in id order.
    ///
    /// Equal fingerprints across two runs mean every series kept its dense id.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for key in &self.keys {
            hasher.update(key.stable_key().as_bytes());
            hasher.update(b";");
        }
        hex::encode(hasher.finalize())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IdentifiedRecord {
    pub series_id: u32,
    pub record: SalesRecord,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SeriesTable {
    pub index: SeriesIndex,
    pub rows: Vec<IdentifiedRecord>,
}

pub fn assign_series_id(records: Vec<SalesRecord>) -> SeriesTable {
    let mut index = SeriesIndex::default();
    let rows: Vec<IdentifiedRecord> = records
        .into_iter()
        .map(|record| IdentifiedRecord {
            series_id: index.get_or_assign(record.series_key()),
            record,
        })
        .collect();

    info!(
        component = "series",
        event = "prep.series.assigned",
        rows = rows.len(),
        series_count = index.len(),
        fingerprint = %index.fingerprint()
    );

    SeriesTable { index, rows }
}
