//! Feature preparation stage: raw tables in, prepared train/test and holiday windows out.

use std::collections::HashSet;
use std::time::Instant;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::config::PipelineConfig;
use crate::gapfill::fill_missing_dates;
use crate::holidays::{build_holiday_windows, flag_holidays, holidays_for_store};
use crate::records::{HolidayEvent, PreparedRow, SalesRecord};
use crate::series::assign_series_id;
use crate::stores::{join_store_metadata, StoreDirectory};
use crate::tables::{self, TableError};

#[derive(Debug, Error)]
pub enum FeatureError {
    #[error(transparent)]
    Table(#[from] TableError),
    #[error(
        "store {store_nbr} has no entry in the store table ({rows} rows affected, {missing_stores} unknown stores in total)"
    )]
    JoinIntegrityViolation {
        store_nbr: u32,
        rows: u64,
        missing_stores: usize,
    },
    #[error("store {0} appears more than once in the store table")]
    DuplicateStore(u32),
    #[error("unknown store {0}")]
    UnknownStore(u32),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeaturePrepReport {
    pub raw_train_rows: u64,
    pub raw_test_rows: u64,
    pub train_rows: u64,
    pub test_rows: u64,
    pub series_count: u64,
    pub synthesized_rows: u64,
    pub holiday_window_rows: u64,
    pub flagged_rows: u64,
    pub series_fingerprint: String,
    pub store_holiday_rows: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PreparedTables {
    pub train: Vec<PreparedRow>,
    pub test: Vec<PreparedRow>,
    pub series_fingerprint: String,
    pub series_count: u64,
    pub synthesized_rows: u64,
}

/// Gap-fills train, stacks test under it and runs the shared feature joins.
///
/// Rows are split back out by date: a combined row goes to train when its date is in
/// the gap-filled train range and to test when it is a raw test date.
pub fn prepare_tables(
    train: Vec<SalesRecord>,
    test: Vec<SalesRecord>,
    stores: &StoreDirectory,
    events: &[HolidayEvent],
) -> Result<PreparedTables, FeatureError> {
    let filled = fill_missing_dates(&train);
    let train_dates: HashSet<NaiveDate> = filled.rows.iter().map(|r| r.date).collect();
    let test_dates: HashSet<NaiveDate> = test.iter().map(|r| r.date).collect();
    let mut combined = filled.rows;
    combined.extend(test.into_iter().map(|record| SalesRecord {
        sales: None,
        ..record
    }));

    let series = assign_series_id(combined);
    let series_fingerprint = series.index.fingerprint();
    let series_count = series.index.len() as u64;
    let joined = join_store_metadata(series.rows, stores)?;
    let prepared = flag_holidays(joined, events);

    let mut train_rows = Vec::new();
    let mut test_rows = Vec::new();
    for row in prepared {
        let in_train = train_dates.contains(&row.date);
        let in_test = test_dates.contains(&row.date);
        match (in_train, in_test) {
            (true, true) => {
                test_rows.push(PreparedRow {
                    sales: None,
                    ..row.clone()
                });
                train_rows.push(row);
            }
            (true, false) => train_rows.push(row),
            (false, true) => test_rows.push(PreparedRow { sales: None, ..row }),
            (false, false) => {}
        }
    }

    Ok(PreparedTables {
        train: train_rows,
        test: test_rows,
        series_fingerprint,
        series_count,
        synthesized_rows: filled.report.synthesized_rows,
    })
}

/// Runs the whole stage. Nothing is written unless every table was built.
pub fn run_feature_preparation(config: &PipelineConfig) -> Result<FeaturePrepReport, FeatureError> {
    let started = Instant::now();
    info!(
        component = "preprocess",
        event = "prep.start",
        data_root = %config.data_root.display()
    );

    let train = tables::read_sales_csv(&config.raw_train_path())?;
    let test = tables::read_sales_csv(&config.raw_test_path())?;
    let stores = StoreDirectory::new(tables::read_stores_csv(&config.stores_path())?)?;
    let events = tables::read_holidays_csv(&config.holidays_path())?;

    let raw_train_rows = train.len() as u64;
    let raw_test_rows = test.len() as u64;

    let windows = build_holiday_windows(&events);
    let store_holidays = match config.holidays_store {
        Some(store_nbr) => Some((store_nbr, holidays_for_store(&stores, &windows, store_nbr)?)),
        None => None,
    };
    let prepared = prepare_tables(train, test, &stores, &events)?;

    let windows_csv = tables::encode_holiday_windows(&windows)?;
    let train_csv = tables::encode_prepared_train(&prepared.train)?;
    let test_csv = tables::encode_prepared_test(&prepared.test)?;
    let store_holidays_csv = match &store_holidays {
        Some((_, rows)) => Some(tables::encode_store_holidays(rows)?),
        None => None,
    };

    tables::write_atomic(&config.holiday_windows_path(), &windows_csv)?;
    tables::write_atomic(&config.prepared_train_path(), &train_csv)?;
    tables::write_atomic(&config.prepared_test_path(), &test_csv)?;
    if let (Some((store_nbr, _)), Some(bytes)) = (&store_holidays, &store_holidays_csv) {
        tables::write_atomic(&config.store_holidays_path(*store_nbr), bytes)?;
    }

    let flagged_rows = prepared
        .train
        .iter()
        .chain(prepared.test.iter())
        .filter(|row| row.event)
        .count() as u64;

    let report = FeaturePrepReport {
        raw_train_rows,
        raw_test_rows,
        train_rows: prepared.train.len() as u64,
        test_rows: prepared.test.len() as u64,
        series_count: prepared.series_count,
        synthesized_rows: prepared.synthesized_rows,
        holiday_window_rows: windows.len() as u64,
        flagged_rows,
        series_fingerprint: prepared.series_fingerprint,
        store_holiday_rows: store_holidays.map(|(_, rows)| rows.len() as u64),
    };

    info!(
        component = "preprocess",
        event = "prep.finish",
        train_rows = report.train_rows,
        test_rows = report.test_rows,
        series_count = report.series_count,
        synthesized_rows = report.synthesized_rows,
        holiday_window_rows = report.holiday_window_rows,
        flagged_rows = report.flagged_rows,
        series_fingerprint = %report.series_fingerprint,
        elapsed_ms = started.elapsed().as_millis() as u64
    );

    Ok(report)
}
