//! Row types shared by both pipeline stages.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SalesRecord {
    pub id: u64,
    pub date: NaiveDate,
    pub store_nbr: u32,
    pub family: String,
    /// `None` for test rows.
    pub sales: Option<f64>,
    pub onpromotion: u32,
}

impl SalesRecord {
    pub fn series_key(&self) -> SeriesKey {
        SeriesKey::new(self.store_nbr, self.family.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SeriesKey {
    pub store_nbr: u32,
    pub family: String,
}

impl SeriesKey {
    pub fn new(store_nbr: u32, family: impl Into<String>) -> Self {
        Self {
            store_nbr,
            family: family.into(),
        }
    }

    /// Run-independent identifier: first 16 hex digits of SHA-256 over `store|family`.
    pub fn stable_key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!("{}|{}", self.store_nbr, self.family));
        let digest = hex::encode(hasher.finalize());
        digest[..16].to_string()
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.store_nbr, self.family)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreInfo {
    pub store_nbr: u32,
    pub city: String,
    pub state: String,
    pub store_type: String,
    pub cluster: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Locale {
    National,
    Regional,
    Local,
}

impl Locale {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::National => "National",
            Self::Regional => "Regional",
            Self::Local => "Local",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "National" => Some(Self::National),
            "Regional" => Some(Self::Regional),
            "Local" => Some(Self::Local),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HolidayKind {
    Holiday,
    Transfer,
    Additional,
    Bridge,
    WorkDay,
    Event,
    Other(String),
}

impl HolidayKind {
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "Holiday" => Self::Holiday,
            "Transfer" => Self::Transfer,
            "Additional" => Self::Additional,
            "Bridge" => Self::Bridge,
            "Work Day" => Self::WorkDay,
            "Event" => Self::Event,
            other => Self::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HolidayEvent {
    pub date: NaiveDate,
    pub kind: HolidayKind,
    pub locale: Locale,
    pub locale_name: String,
    pub description: String,
    pub transferred: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HolidayWindowRecord {
    pub date: NaiveDate,
    pub locale: Locale,
    pub locale_name: String,
    pub event: String,
    pub lower_window: i32,
    pub upper_window: i32,
}

/// Prophet `holidays` frame row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreHoliday {
    pub ds: NaiveDate,
    pub holiday: String,
    pub lower_window: i32,
    pub upper_window: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreparedRow {
    pub id: u64,
    pub date: NaiveDate,
    pub store_nbr: u32,
    pub family: String,
    pub sales: Option<f64>,
    pub onpromotion: u32,
    pub city: String,
    pub state: String,
    pub store_type: String,
    pub store_cluster: u32,
    pub series_id: u32,
    pub event: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionRecord {
    pub id: u64,
    pub sales: f64,
}
