//! Store reference table and the store-metadata join.

use std::collections::{BTreeMap, HashMap};

use tracing::{error, info};

use crate::preprocess::FeatureError;
use crate::records::{SalesRecord, StoreInfo};
use crate::series::IdentifiedRecord;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreDirectory {
    stores: HashMap<u32, StoreInfo>,
}

impl StoreDirectory {
    /// Fails on a repeated `store_nbr`; a join against it would fan rows out.
    pub fn new(stores: Vec<StoreInfo>) -> Result<Self, FeatureError> {
        let mut by_nbr = HashMap::with_capacity(stores.len());
        for store in stores {
            let store_nbr = store.store_nbr;
            if by_nbr.insert(store_nbr, store).is_some() {
                return Err(FeatureError::DuplicateStore(store_nbr));
            }
        }
        Ok(Self { stores: by_nbr })
    }

    pub fn get(&self, store_nbr: u32) -> Option<&StoreInfo> {
        self.stores.get(&store_nbr)
    }

    pub fn require(&self, store_nbr: u32) -> Result<&StoreInfo, FeatureError> {
        self.get(store_nbr)
            .ok_or(FeatureError::UnknownStore(store_nbr))
    }

    pub fn len(&self) -> usize {
        self.stores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedRecord {
    pub series_id: u32,
    pub record: SalesRecord,
    pub store: StoreInfo,
}

/// Equality join on `store_nbr`. Every row must find its store.
pub fn join_store_metadata(
    rows: Vec<IdentifiedRecord>,
    stores: &StoreDirectory,
) -> Result<Vec<EnrichedRecord>, FeatureError> {
    let mut unmatched: BTreeMap<u32, u64> = BTreeMap::new();
    let mut joined = Vec::with_capacity(rows.len());
    for row in rows {
        match stores.get(row.record.store_nbr) {
            Some(store) => joined.push(EnrichedRecord {
                series_id: row.series_id,
                store: store.clone(),
                record: row.record,
            }),
            None => *unmatched.entry(row.record.store_nbr).or_default() += 1,
        }
    }

    if let Some((&store_nbr, &count)) = unmatched.iter().next() {
        error!(
            component = "stores",
            event = "prep.stores.join_violation",
            missing_store_count = unmatched.len(),
            first_store_nbr = store_nbr,
            first_store_rows = count
        );
        return Err(FeatureError::JoinIntegrityViolation {
            store_nbr,
            rows: count,
            missing_stores: unmatched.len(),
        });
    }

    info!(
        component = "stores",
        event = "prep.stores.joined",
        rows = joined.len(),
        store_count = stores.len()
    );

    Ok(joined)
}
