//! CSV reading and writing for raw inputs, prepared tables and submissions.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::NaiveDate;
use csv::StringRecord;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::records::{
    HolidayEvent, HolidayKind, HolidayWindowRecord, Locale, PreparedRow, SalesRecord, StoreHoliday,
    StoreInfo, SubmissionRecord,
};

const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Error)]
pub enum TableError {
    #[error("input file not found: {path}")]
    InputNotFound { path: PathBuf },
    #[error("{path} is missing expected column '{column}'")]
    SchemaMismatch { path: PathBuf, column: &'static str },
    #[error("{path} line {line}: failed to parse field {field} value '{value}'")]
    ParseField {
        path: PathBuf,
        line: u64,
        field: &'static str,
        value: String,
    },
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Column positions resolved from a CSV header row.
struct HeaderIndex {
    path: PathBuf,
    positions: HashMap<String, usize>,
}

impl HeaderIndex {
    fn new(path: &Path, headers: &StringRecord) -> Self {
        let positions = headers
            .iter()
            .enumerate()
            .map(|(idx, name)| (name.trim().to_string(), idx))
            .collect();
        Self {
            path: path.to_path_buf(),
            positions,
        }
    }

    fn require(&self, column: &'static str) -> Result<usize, TableError> {
        self.positions
            .get(column)
            .copied()
            .ok_or_else(|| TableError::SchemaMismatch {
                path: self.path.clone(),
                column,
            })
    }

    fn optional(&self, column: &str) -> Option<usize> {
        self.positions.get(column).copied()
    }
}

struct RecordCursor<'a> {
    path: &'a Path,
    record: &'a StringRecord,
}

impl RecordCursor<'_> {
    fn line(&self) -> u64 {
        self.record.position().map(|pos| pos.line()).unwrap_or(0)
    }

    fn raw(&self, idx: usize) -> &str {
        self.record.get(idx).unwrap_or_default().trim()
    }

    fn text(&self, idx: usize) -> String {
        self.raw(idx).to_string()
    }

    fn parse_error(&self, field: &'static str, value: &str) -> TableError {
        TableError::ParseField {
            path: self.path.to_path_buf(),
            line: self.line(),
            field,
            value: value.to_string(),
        }
    }

    fn parse<T: FromStr>(&self, idx: usize, field: &'static str) -> Result<T, TableError> {
        let raw = self.raw(idx);
        raw.parse::<T>().map_err(|_| self.parse_error(field, raw))
    }

    /// Empty cells read as `None`.
    fn parse_opt<T: FromStr>(&self, idx: usize, field: &'static str) -> Result<Option<T>, TableError> {
        let raw = self.raw(idx);
        if raw.is_empty() {
            return Ok(None);
        }
        raw.parse::<T>()
            .map(Some)
            .map_err(|_| self.parse_error(field, raw))
    }

    fn date(&self, idx: usize, field: &'static str) -> Result<NaiveDate, TableError> {
        let raw = self.raw(idx);
        // Tolerate a trailing time part, e.g. `2017-08-16 00:00:00`.
        let day = raw.get(..10).unwrap_or(raw);
        NaiveDate::parse_from_str(day, DATE_FORMAT).map_err(|_| self.parse_error(field, raw))
    }

    fn flag(&self, idx: usize, field: &'static str) -> Result<bool, TableError> {
        let raw = self.raw(idx);
        match raw.to_ascii_lowercase().as_str() {
            "true" | "1" => Ok(true),
            "false" | "0" => Ok(false),
            _ => Err(self.parse_error(field, raw)),
        }
    }
}

fn open_reader(path: &Path) -> Result<(csv::Reader<fs::File>, HeaderIndex), TableError> {
    if !path.is_file() {
        return Err(TableError::InputNotFound {
            path: path.to_path_buf(),
        });
    }
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)?;
    let headers = reader.headers()?.clone();
    Ok((reader, HeaderIndex::new(path, &headers)))
}

fn read_rows<T>(
    path: &Path,
    table: &'static str,
    mut parse_row: impl FnMut(&HeaderIndex, &RecordCursor<'_>) -> Result<T, TableError>,
    prepare: impl FnOnce(&HeaderIndex) -> Result<(), TableError>,
) -> Result<Vec<T>, TableError> {
    let (mut reader, headers) = open_reader(path)?;
    prepare(&headers)?;

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let cursor = RecordCursor {
            path,
            record: &record,
        };
        rows.push(parse_row(&headers, &cursor)?);
    }

    info!(
        component = "tables",
        event = "tables.read",
        table,
        path = %path.display(),
        rows = rows.len()
    );
    Ok(rows)
}

/// Reads a raw `train.csv` or `test.csv`; the `sales` column is optional.
pub fn read_sales_csv(path: &Path) -> Result<Vec<SalesRecord>, TableError> {
    read_rows(
        path,
        "sales",
        |headers, row| {
            let sales = match headers.optional("sales") {
                Some(idx) => row.parse_opt::<f64>(idx, "sales")?,
                None => None,
            };
            let onpromotion = match headers.optional("onpromotion") {
                Some(idx) => row.parse_opt::<u32>(idx, "onpromotion")?.unwrap_or(0),
                None => 0,
            };
            Ok(SalesRecord {
                id: row.parse(headers.require("id")?, "id")?,
                date: row.date(headers.require("date")?, "date")?,
                store_nbr: row.parse(headers.require("store_nbr")?, "store_nbr")?,
                family: row.text(headers.require("family")?),
                sales,
                onpromotion,
            })
        },
        |headers| {
            for column in ["id", "date", "store_nbr", "family"] {
                headers.require(column)?;
            }
            Ok(())
        },
    )
}

pub fn read_stores_csv(path: &Path) -> Result<Vec<StoreInfo>, TableError> {
    read_rows(
        path,
        "stores",
        |headers, row| {
            Ok(StoreInfo {
                store_nbr: row.parse(headers.require("store_nbr")?, "store_nbr")?,
                city: row.text(headers.require("city")?),
                state: row.text(headers.require("state")?),
                store_type: row.text(headers.require("type")?),
                cluster: row.parse(headers.require("cluster")?, "cluster")?,
            })
        },
        |headers| {
            for column in ["store_nbr", "city", "state", "type", "cluster"] {
                headers.require(column)?;
            }
            Ok(())
        },
    )
}

pub fn read_holidays_csv(path: &Path) -> Result<Vec<HolidayEvent>, TableError> {
    read_rows(
        path,
        "holidays_events",
        |headers, row| {
            let locale_idx = headers.require("locale")?;
            let locale = Locale::parse(row.raw(locale_idx))
                .ok_or_else(|| row.parse_error("locale", row.raw(locale_idx)))?;
            Ok(HolidayEvent {
                date: row.date(headers.require("date")?, "date")?,
                kind: HolidayKind::parse(row.raw(headers.require("type")?)),
                locale,
                locale_name: row.text(headers.require("locale_name")?),
                description: row.text(headers.require("description")?),
                transferred: row.flag(headers.require("transferred")?, "transferred")?,
            })
        },
        |headers| {
            for column in [
                "date",
                "type",
                "locale",
                "locale_name",
                "description",
                "transferred",
            ] {
                headers.require(column)?;
            }
            Ok(())
        },
    )
}

/// Reads a prepared table; the test table has no `sales` column.
pub fn read_prepared_csv(path: &Path) -> Result<Vec<PreparedRow>, TableError> {
    read_rows(
        path,
        "prepared",
        |headers, row| {
            let sales = match headers.optional("sales") {
                Some(idx) => row.parse_opt::<f64>(idx, "sales")?,
                None => None,
            };
            Ok(PreparedRow {
                id: row.parse(headers.require("id")?, "id")?,
                date: row.date(headers.require("date")?, "date")?,
                store_nbr: row.parse(headers.require("store_nbr")?, "store_nbr")?,
                family: row.text(headers.require("family")?),
                sales,
                onpromotion: row.parse(headers.require("onpromotion")?, "onpromotion")?,
                city: row.text(headers.require("city")?),
                state: row.text(headers.require("state")?),
                store_type: row.text(headers.require("store_type")?),
                store_cluster: row.parse(headers.require("store_cluster")?, "store_cluster")?,
                series_id: row.parse(headers.require("series_id")?, "series_id")?,
                event: row.flag(headers.require("event")?, "event")?,
            })
        },
        |headers| {
            for column in ["id", "date", "series_id", "onpromotion", "event"] {
                headers.require(column)?;
            }
            Ok(())
        },
    )
}

pub fn read_submission_csv(path: &Path) -> Result<Vec<SubmissionRecord>, TableError> {
    read_rows(
        path,
        "submission",
        |headers, row| {
            Ok(SubmissionRecord {
                id: row.parse(headers.require("id")?, "id")?,
                sales: row.parse(headers.require("sales")?, "sales")?,
            })
        },
        |headers| {
            headers.require("id")?;
            headers.require("sales")?;
            Ok(())
        },
    )
}

#[derive(Serialize)]
struct PreparedTestRow<'a> {
    id: u64,
    date: NaiveDate,
    store_nbr: u32,
    family: &'a str,
    onpromotion: u32,
    city: &'a str,
    state: &'a str,
    store_type: &'a str,
    store_cluster: u32,
    series_id: u32,
    event: bool,
}

impl<'a> From<&'a PreparedRow> for PreparedTestRow<'a> {
    fn from(row: &'a PreparedRow) -> Self {
        Self {
            id: row.id,
            date: row.date,
            store_nbr: row.store_nbr,
            family: &row.family,
            onpromotion: row.onpromotion,
            city: &row.city,
            state: &row.state,
            store_type: &row.store_type,
            store_cluster: row.store_cluster,
            series_id: row.series_id,
            event: row.event,
        }
    }
}

pub fn encode_prepared_train(rows: &[PreparedRow]) -> Result<Vec<u8>, TableError> {
    encode_rows(rows.iter())
}

/// Same layout as the train table minus `sales`.
pub fn encode_prepared_test(rows: &[PreparedRow]) -> Result<Vec<u8>, TableError> {
    encode_rows(rows.iter().map(PreparedTestRow::from))
}

pub fn encode_holiday_windows(rows: &[HolidayWindowRecord]) -> Result<Vec<u8>, TableError> {
    encode_rows(rows.iter())
}

pub fn encode_store_holidays(rows: &[StoreHoliday]) -> Result<Vec<u8>, TableError> {
    encode_rows(rows.iter())
}

pub fn encode_submission(rows: &[SubmissionRecord]) -> Result<Vec<u8>, TableError> {
    encode_rows(rows.iter())
}

fn encode_rows<T: Serialize>(rows: impl Iterator<Item = T>) -> Result<Vec<u8>, TableError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for row in rows {
        writer.serialize(row)?;
    }
    writer
        .into_inner()
        .map_err(|err| TableError::Io(err.into_error()))
}

/// Writes via a sibling temp file and rename so readers never see a partial table.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), TableError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .ok_or_else(|| {
            TableError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("invalid output path: {}", path.display()),
            ))
        })?;
    let tmp_path = path.with_file_name(format!("{file_name}.tmp"));

    {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }

    fs::rename(&tmp_path, path)?;
    debug!(
        component = "tables",
        event = "tables.write",
        path = %path.display(),
        bytes = bytes.len()
    );
    Ok(())
}
