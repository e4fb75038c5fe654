//! Calendar gap filling: one row per (date, store, family) across the global date range.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::records::{SalesRecord, SeriesKey};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GapFillReport {
    pub input_rows: u64,
    pub output_rows: u64,
    pub series_count: u64,
    pub day_count: u64,
    pub synthesized_rows: u64,
    pub duplicate_rows_removed: u64,
    pub first_date: Option<NaiveDate>,
    pub last_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GapFillResult {
    pub rows: Vec<SalesRecord>,
    pub report: GapFillReport,
}

/// Fills every series out to the global `[min date, max date]` range.
///
/// Missing cells are read as "store closed": `id`, `sales` and `onpromotion` are 0.
/// Output is date-major with series in first-seen order. Duplicate input keys keep
/// the first occurrence.
pub fn fill_missing_dates(records: &[SalesRecord]) -> GapFillResult {
    let Some((first_date, last_date)) = date_bounds(records) else {
        return GapFillResult {
            rows: Vec::new(),
            report: GapFillReport {
                input_rows: 0,
                output_rows: 0,
                series_count: 0,
                day_count: 0,
                synthesized_rows: 0,
                duplicate_rows_removed: 0,
                first_date: None,
                last_date: None,
            },
        };
    };

    let series = distinct_series(records);
    let mut by_cell: HashMap<(NaiveDate, u32, &str), &SalesRecord> =
        HashMap::with_capacity(records.len());
    let mut duplicate_rows_removed = 0u64;

    for record in records {
        match by_cell.entry((record.date, record.store_nbr, record.family.as_str())) {
            Entry::Occupied(_) => duplicate_rows_removed += 1,
            Entry::Vacant(slot) => {
                slot.insert(record);
            }
        }
    }

    let day_count = (last_date - first_date).num_days() as u64 + 1;
    let mut rows = Vec::with_capacity(day_count as usize * series.len());
    let mut synthesized_rows = 0u64;

    for date in first_date.iter_days().take(day_count as usize) {
        for key in &series {
            match by_cell.get(&(date, key.store_nbr, key.family.as_str())) {
                Some(record) => rows.push((*record).clone()),
                None => {
                    synthesized_rows += 1;
                    rows.push(SalesRecord {
                        id: 0,
                        date,
                        store_nbr: key.store_nbr,
                        family: key.family.clone(),
                        sales: Some(0.0),
                        onpromotion: 0,
                    });
                }
            }
        }
    }

    if duplicate_rows_removed > 0 {
        warn!(
            component = "gapfill",
            event = "prep.gapfill.duplicates_removed",
            duplicate_rows_removed
        );
    }

    let report = GapFillReport {
        input_rows: records.len() as u64,
        output_rows: rows.len() as u64,
        series_count: series.len() as u64,
        day_count,
        synthesized_rows,
        duplicate_rows_removed,
        first_date: Some(first_date),
        last_date: Some(last_date),
    };

    info!(
        component = "gapfill",
        event = "prep.gapfill.finish",
        input_rows = report.input_rows,
        output_rows = report.output_rows,
        series_count = report.series_count,
        day_count = report.day_count,
        synthesized_rows = report.synthesized_rows,
        first_date = %first_date,
        last_date = %last_date
    );

    GapFillResult { rows, report }
}

/// Distinct series keys in first-seen order.
pub fn distinct_series(records: &[SalesRecord]) -> Vec<SeriesKey> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for record in records {
        if seen.insert((record.store_nbr, record.family.as_str())) {
            out.push(record.series_key());
        }
    }
    out
}

fn date_bounds(records: &[SalesRecord]) -> Option<(NaiveDate, NaiveDate)> {
    let first = records.iter().map(|r| r.date).min()?;
    let last = records.iter().map(|r| r.date).max()?;
    Some((first, last))
}
