//! Run configuration for both pipeline stages.

use std::env;
use std::path::{Path, PathBuf};

pub const DEFAULT_MODEL_ID: &str = "amazon/chronos-2";
pub const DEFAULT_PREDICTION_LENGTH: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub data_root: PathBuf,
    /// Also export the Prophet holiday frame for this store.
    pub holidays_store: Option<u32>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("data"),
            holidays_store: None,
        }
    }
}

impl PipelineConfig {
    pub fn new(data_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
            ..Self::default()
        }
    }

    pub fn raw_train_path(&self) -> PathBuf {
        self.data_root.join("train.csv")
    }

    pub fn raw_test_path(&self) -> PathBuf {
        self.data_root.join("test.csv")
    }

    pub fn stores_path(&self) -> PathBuf {
        self.data_root.join("stores.csv")
    }

    pub fn holidays_path(&self) -> PathBuf {
        self.data_root.join("holidays_events.csv")
    }

    pub fn preproc_dir(&self) -> PathBuf {
        self.data_root.join("preproc")
    }

    pub fn prepared_train_path(&self) -> PathBuf {
        self.preproc_dir().join("train.csv")
    }

    pub fn prepared_test_path(&self) -> PathBuf {
        self.preproc_dir().join("test.csv")
    }

    pub fn holiday_windows_path(&self) -> PathBuf {
        self.preproc_dir().join("prophet_events.csv")
    }

    pub fn store_holidays_path(&self, store_nbr: u32) -> PathBuf {
        self.preproc_dir()
            .join(format!("prophet_events_store_{store_nbr}.csv"))
    }

    pub fn submission_path(&self) -> PathBuf {
        self.data_root.join("submission.csv")
    }

    pub fn data_root(&self) -> &Path {
        &self.data_root
    }
}

/// Where `forecast_submission` gets its predictions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForecastSource {
    /// The pretrained model behind `endpoint`.
    Remote,
    /// Offline seasonal-naive baseline; only used when asked for.
    Baseline,
}

impl ForecastSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Remote => "remote",
            Self::Baseline => "baseline",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "remote" => Some(Self::Remote),
            "baseline" => Some(Self::Baseline),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForecastConfig {
    pub source: ForecastSource,
    pub model_id: String,
    /// Inference endpoint serving `model_id`. Required unless `source` is `Baseline`.
    pub endpoint: Option<String>,
    pub prediction_length: usize,
    pub quantile_levels: Vec<f64>,
    pub id_column: String,
    pub timestamp_column: String,
    pub target: String,
    pub http_timeout_ms: u64,
    /// Extra attempts after an unreachable endpoint. 0 means the call is made once.
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub lookback_weeks: usize,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            source: ForecastSource::Remote,
            model_id: DEFAULT_MODEL_ID.to_string(),
            endpoint: None,
            prediction_length: DEFAULT_PREDICTION_LENGTH,
            quantile_levels: vec![0.5],
            id_column: "series_id".to_string(),
            timestamp_column: "date".to_string(),
            target: "sales".to_string(),
            http_timeout_ms: 300_000,
            max_retries: 0,
            retry_backoff_ms: 500,
            lookback_weeks: 4,
        }
    }
}

pub fn pipeline_config_from_env() -> PipelineConfig {
    let mut config = PipelineConfig::default();

    if let Ok(root) = env::var("STORE_SALES_DATA_ROOT") {
        let trimmed = root.trim();
        if !trimmed.is_empty() {
            config.data_root = PathBuf::from(trimmed);
        }
    }

    config.holidays_store = env_parse::<u32>("STORE_SALES_HOLIDAYS_STORE");

    config
}

pub fn forecast_config_from_env() -> ForecastConfig {
    let mut config = ForecastConfig::default();

    if let Some(source) = env::var("STORE_SALES_FORECAST_SOURCE")
        .ok()
        .and_then(|raw| ForecastSource::parse(&raw))
    {
        config.source = source;
    }

    if let Ok(url) = env::var("STORE_SALES_FORECAST_URL") {
        let trimmed = url.trim().trim_end_matches('/');
        if !trimmed.is_empty() {
            config.endpoint = Some(trimmed.to_string());
        }
    }

    if let Ok(model_id) = env::var("STORE_SALES_MODEL_ID") {
        let trimmed = model_id.trim();
        if !trimmed.is_empty() {
            config.model_id = trimmed.to_string();
        }
    }

    if let Some(timeout_ms) = env_parse::<u64>("STORE_SALES_HTTP_TIMEOUT_MS") {
        if timeout_ms > 0 {
            config.http_timeout_ms = timeout_ms;
        }
    }

    if let Some(retries) = env_parse::<u32>("STORE_SALES_HTTP_MAX_RETRIES") {
        config.max_retries = retries;
    }

    if let Some(weeks) = env_parse::<usize>("STORE_SALES_LOOKBACK_WEEKS") {
        if weeks > 0 {
            config.lookback_weeks = weeks;
        }
    }

    config
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|raw| raw.trim().parse().ok())
}
