//! Forecasting seam: request/prediction frames, coverage checks and the offline baseline.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{Duration as ChronoDuration, NaiveDate};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::ForecastConfig;
use crate::records::PreparedRow;
use crate::tables::TableError;

const SEASON_DAYS: i64 = 7;
const MAX_REPORTED_MISSING: usize = 5;

#[derive(Debug, Error)]
pub enum ForecastError {
    #[error(transparent)]
    Table(#[from] TableError),
    #[error("invalid forecast request: {0}")]
    InvalidRequest(String),
    #[error("HTTP client build error: {0}")]
    HttpClientBuild(String),
    #[error("forecast source not configured: {0}")]
    Config(String),
    #[error("HTTP request failed for {url}: {message}")]
    HttpRequest { url: String, message: String },
    #[error("forecast endpoint {url} answered with HTTP status {status}")]
    HttpStatus { url: String, status: u16 },
    #[error("invalid forecast response: {0}")]
    InvalidResponse(String),
    #[error("forecasting pipeline returned unusable predictions: {0}")]
    ExternalPrediction(String),
    #[error("no prediction for test row {id} (series {series_id} on {date})")]
    MissingPrediction {
        id: u64,
        series_id: u32,
        date: NaiveDate,
    },
}

/// Historical observation in the model's column set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextRow {
    pub series_id: u32,
    pub date: NaiveDate,
    pub store_nbr: u32,
    pub family: String,
    pub sales: f64,
    pub onpromotion: u32,
    pub event: bool,
}

/// Known-in-advance covariates for a forecast date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FutureRow {
    pub series_id: u32,
    pub date: NaiveDate,
    pub store_nbr: u32,
    pub family: String,
    pub onpromotion: u32,
    pub event: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PredictRequest {
    pub context: Vec<ContextRow>,
    pub future: Vec<FutureRow>,
    pub prediction_length: usize,
    pub quantile_levels: Vec<f64>,
    pub id_column: String,
    pub timestamp_column: String,
    pub target: String,
}

impl PredictRequest {
    /// Projects prepared tables onto the columns the model accepts.
    ///
    /// `id`, city, state, store type and cluster are dropped. `store_nbr` and `family`
    /// stay as static covariates next to `series_id`.
    pub fn from_prepared(
        train: &[PreparedRow],
        test: &[PreparedRow],
        cfg: &ForecastConfig,
    ) -> Result<Self, ForecastError> {
        validate_config(cfg)?;

        let context = train
            .iter()
            .map(|row| {
                let sales = row.sales.ok_or_else(|| {
                    ForecastError::InvalidRequest(format!(
                        "train row for series {} on {} has no sales value",
                        row.series_id, row.date
                    ))
                })?;
                Ok(ContextRow {
                    series_id: row.series_id,
                    date: row.date,
                    store_nbr: row.store_nbr,
                    family: row.family.clone(),
                    sales,
                    onpromotion: row.onpromotion,
                    event: row.event,
                })
            })
            .collect::<Result<Vec<_>, ForecastError>>()?;

        let future: Vec<FutureRow> = test
            .iter()
            .map(|row| FutureRow {
                series_id: row.series_id,
                date: row.date,
                store_nbr: row.store_nbr,
                family: row.family.clone(),
                onpromotion: row.onpromotion,
                event: row.event,
            })
            .collect();

        let mut dates_per_series: HashMap<u32, HashSet<NaiveDate>> = HashMap::new();
        for row in &future {
            dates_per_series
                .entry(row.series_id)
                .or_default()
                .insert(row.date);
        }
        if let Some((series_id, dates)) = dates_per_series
            .iter()
            .find(|(_, dates)| dates.len() > cfg.prediction_length)
        {
            return Err(ForecastError::InvalidRequest(format!(
                "series {series_id} has {} future dates, more than the horizon of {}",
                dates.len(),
                cfg.prediction_length
            )));
        }

        Ok(Self {
            context,
            future,
            prediction_length: cfg.prediction_length,
            quantile_levels: cfg.quantile_levels.clone(),
            id_column: cfg.id_column.clone(),
            timestamp_column: cfg.timestamp_column.clone(),
            target: cfg.target.clone(),
        })
    }

    pub fn series_count(&self) -> usize {
        self.future
            .iter()
            .map(|row| row.series_id)
            .collect::<HashSet<_>>()
            .len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRow {
    pub series_id: u32,
    pub date: NaiveDate,
    /// Point forecast.
    pub predictions: f64,
    /// One value per requested quantile level, in request order.
    pub quantiles: Vec<f64>,
}

/// A pretrained batch forecaster.
pub trait ForecastPipeline {
    fn model_id(&self) -> &str;

    /// One call covering every series in `request.future`.
    fn predict_df(&self, request: &PredictRequest) -> Result<Vec<PredictionRow>, ForecastError>;
}

fn validate_config(cfg: &ForecastConfig) -> Result<(), ForecastError> {
    if cfg.prediction_length == 0 {
        return Err(ForecastError::InvalidRequest(
            "prediction_length must be > 0".to_string(),
        ));
    }
    if cfg.quantile_levels.is_empty() {
        return Err(ForecastError::InvalidRequest(
            "at least one quantile level is required".to_string(),
        ));
    }
    if let Some(level) = cfg
        .quantile_levels
        .iter()
        .find(|level| !(**level > 0.0 && **level < 1.0))
    {
        return Err(ForecastError::InvalidRequest(format!(
            "quantile level {level} must be strictly between 0 and 1"
        )));
    }
    Ok(())
}

/// Every (series, future date) pair must have exactly one finite prediction.
pub fn validate_coverage(
    request: &PredictRequest,
    predictions: &[PredictionRow],
) -> Result<(), ForecastError> {
    let mut seen: HashSet<(u32, NaiveDate)> = HashSet::with_capacity(predictions.len());
    for row in predictions {
        if !row.predictions.is_finite() || row.quantiles.iter().any(|q| !q.is_finite()) {
            return Err(ForecastError::ExternalPrediction(format!(
                "non-finite prediction for series {} on {}",
                row.series_id, row.date
            )));
        }
        if row.quantiles.len() != request.quantile_levels.len() {
            return Err(ForecastError::ExternalPrediction(format!(
                "series {} on {} has {} quantile values, expected {}",
                row.series_id,
                row.date,
                row.quantiles.len(),
                request.quantile_levels.len()
            )));
        }
        if !seen.insert((row.series_id, row.date)) {
            return Err(ForecastError::ExternalPrediction(format!(
                "duplicate prediction for series {} on {}",
                row.series_id, row.date
            )));
        }
    }

    let expected: HashSet<(u32, NaiveDate)> = request
        .future
        .iter()
        .map(|row| (row.series_id, row.date))
        .collect();
    let mut missing: Vec<(u32, NaiveDate)> = expected.difference(&seen).copied().collect();
    if !missing.is_empty() {
        missing.sort_unstable();
        let sample: Vec<String> = missing
            .iter()
            .take(MAX_REPORTED_MISSING)
            .map(|(series_id, date)| format!("{series_id}@{date}"))
            .collect();
        warn!(
            component = "forecast",
            event = "forecast.coverage.incomplete",
            expected_pairs = expected.len(),
            missing_pairs = missing.len()
        );
        return Err(ForecastError::ExternalPrediction(format!(
            "missing {} of {} (series, date) pairs, e.g. {}",
            missing.len(),
            expected.len(),
            sample.join(", ")
        )));
    }

    let extra = seen.len() - expected.len();
    if extra > 0 {
        debug!(
            component = "forecast",
            event = "forecast.coverage.extra_rows",
            extra_rows = extra
        );
    }

    Ok(())
}

/// Same-weekday quantile over recent weeks; a stand-in when no model endpoint is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeasonalNaiveForecaster {
    pub lookback_weeks: usize,
}

impl SeasonalNaiveForecaster {
    pub const MODEL_ID: &'static str = "seasonal-naive";

    pub fn new(lookback_weeks: usize) -> Self {
        Self {
            lookback_weeks: lookback_weeks.max(1),
        }
    }

    fn season_values(
        &self,
        history: &HashMap<NaiveDate, f64>,
        last_date: NaiveDate,
        target: NaiveDate,
    ) -> Vec<f64> {
        let mut values = Vec::with_capacity(self.lookback_weeks);
        let mut lag = target - ChronoDuration::days(SEASON_DAYS);
        // Step back to the most recent same-weekday date inside the history.
        while lag > last_date {
            lag -= ChronoDuration::days(SEASON_DAYS);
        }
        for _ in 0..self.lookback_weeks {
            if let Some(value) = history.get(&lag) {
                values.push(*value);
            }
            lag -= ChronoDuration::days(SEASON_DAYS);
        }
        values
    }
}

impl ForecastPipeline for SeasonalNaiveForecaster {
    fn model_id(&self) -> &str {
        Self::MODEL_ID
    }

    fn predict_df(&self, request: &PredictRequest) -> Result<Vec<PredictionRow>, ForecastError> {
        let mut history: BTreeMap<u32, HashMap<NaiveDate, f64>> = BTreeMap::new();
        let mut last_dates: HashMap<u32, NaiveDate> = HashMap::new();
        for row in &request.context {
            history
                .entry(row.series_id)
                .or_default()
                .insert(row.date, row.sales);
            let last = last_dates.entry(row.series_id).or_insert(row.date);
            if row.date > *last {
                *last = row.date;
            }
        }

        let empty = HashMap::new();
        let mut out = Vec::with_capacity(request.future.len());
        for row in &request.future {
            let series_history = history.get(&row.series_id).unwrap_or(&empty);
            let values = match last_dates.get(&row.series_id) {
                Some(last_date) => self.season_values(series_history, *last_date, row.date),
                None => Vec::new(),
            };

            let quantiles: Vec<f64> = request
                .quantile_levels
                .iter()
                .map(|level| empirical_quantile(&values, *level).max(0.0))
                .collect();
            let predictions = empirical_quantile(&values, 0.5).max(0.0);

            out.push(PredictionRow {
                series_id: row.series_id,
                date: row.date,
                predictions,
                quantiles,
            });
        }

        info!(
            component = "forecast",
            event = "forecast.baseline.finish",
            model_id = Self::MODEL_ID,
            lookback_weeks = self.lookback_weeks,
            rows = out.len()
        );

        Ok(out)
    }
}

/// Linear-interpolated quantile; 0 for an empty sample.
pub fn empirical_quantile(values: &[f64], level: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let pos = level.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn request(context: Vec<ContextRow>, future: Vec<FutureRow>) -> PredictRequest {
        PredictRequest {
            context,
            future,
            prediction_length: 16,
            quantile_levels: vec![0.5],
            id_column: "series_id".to_string(),
            timestamp_column: "date".to_string(),
            target: "sales".to_string(),
        }
    }

    fn ctx(series_id: u32, date: NaiveDate, sales: f64) -> ContextRow {
        ContextRow {
            series_id,
            date,
            store_nbr: 1,
            family: "AUTOMOTIVE".to_string(),
            sales,
            onpromotion: 0,
            event: false,
        }
    }

    fn fut(series_id: u32, date: NaiveDate) -> FutureRow {
        FutureRow {
            series_id,
            date,
            store_nbr: 1,
            family: "AUTOMOTIVE".to_string(),
            onpromotion: 0,
            event: false,
        }
    }

    fn pred(series_id: u32, date: NaiveDate, value: f64) -> PredictionRow {
        PredictionRow {
            series_id,
            date,
            predictions: value,
            quantiles: vec![value],
        }
    }

    #[test]
    fn quantile_interpolates() {
        assert_eq!(empirical_quantile(&[], 0.5), 0.0);
        assert_eq!(empirical_quantile(&[4.0, 1.0, 3.0], 0.5), 3.0);
        assert_eq!(empirical_quantile(&[1.0, 2.0, 3.0, 4.0], 0.5), 2.5);
    }

    #[test]
    fn baseline_uses_same_weekday_median() {
        // Four Wednesdays of history: 10, 20, 30, 40.
        let context = vec![
            ctx(0, day(2017, 7, 26), 10.0),
            ctx(0, day(2017, 8, 2), 20.0),
            ctx(0, day(2017, 8, 9), 30.0),
            ctx(0, day(2017, 8, 15), 99.0),
            ctx(0, day(2017, 8, 16), 40.0),
        ];
        let future = vec![fut(0, day(2017, 8, 23)), fut(0, day(2017, 8, 30))];
        let req = request(context, future);

        let out = SeasonalNaiveForecaster::new(4).predict_df(&req).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].predictions, 25.0);
        // two weeks out still lands on the latest observed Wednesdays
        assert_eq!(out[1].predictions, 25.0);
        validate_coverage(&req, &out).unwrap();
    }

    #[test]
    fn baseline_without_history_predicts_zero() {
        let req = request(vec![], vec![fut(3, day(2017, 8, 16))]);
        let out = SeasonalNaiveForecaster::new(4).predict_df(&req).unwrap();
        assert_eq!(out[0].predictions, 0.0);
        assert_eq!(out[0].quantiles, vec![0.0]);
    }

    #[test]
    fn coverage_rejects_missing_and_duplicate_pairs() {
        let req = request(
            vec![],
            vec![fut(0, day(2017, 8, 16)), fut(0, day(2017, 8, 17))],
        );

        let err = validate_coverage(&req, &[pred(0, day(2017, 8, 16), 1.0)]).unwrap_err();
        assert!(matches!(err, ForecastError::ExternalPrediction(_)));

        let err = validate_coverage(
            &req,
            &[
                pred(0, day(2017, 8, 16), 1.0),
                pred(0, day(2017, 8, 16), 2.0),
                pred(0, day(2017, 8, 17), 1.0),
            ],
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate"));

        let err = validate_coverage(
            &req,
            &[
                pred(0, day(2017, 8, 16), f64::NAN),
                pred(0, day(2017, 8, 17), 1.0),
            ],
        )
        .unwrap_err();
        assert!(err.to_string().contains("non-finite"));
    }

    #[test]
    fn coverage_tolerates_extra_horizon_rows() {
        let req = request(vec![], vec![fut(0, day(2017, 8, 16))]);
        validate_coverage(
            &req,
            &[
                pred(0, day(2017, 8, 16), 1.0),
                pred(0, day(2017, 8, 17), 1.0),
            ],
        )
        .unwrap();
    }

    #[test]
    fn request_rejects_future_longer_than_horizon() {
        let cfg = ForecastConfig {
            prediction_length: 1,
            ..ForecastConfig::default()
        };
        let row = |date| PreparedRow {
            id: 1,
            date,
            store_nbr: 1,
            family: "AUTOMOTIVE".to_string(),
            sales: None,
            onpromotion: 0,
            city: "Quito".to_string(),
            state: "Pichincha".to_string(),
            store_type: "D".to_string(),
            store_cluster: 13,
            series_id: 0,
            event: false,
        };
        let test = vec![row(day(2017, 8, 16)), row(day(2017, 8, 17))];

        let err = PredictRequest::from_prepared(&[], &test, &cfg).unwrap_err();
        assert!(matches!(err, ForecastError::InvalidRequest(_)));
    }

    #[test]
    fn request_keeps_store_and_family_covariates() {
        let row = |date, sales| PreparedRow {
            id: 7,
            date,
            store_nbr: 44,
            family: "PRODUCE".to_string(),
            sales,
            onpromotion: 2,
            city: "Quito".to_string(),
            state: "Pichincha".to_string(),
            store_type: "A".to_string(),
            store_cluster: 5,
            series_id: 3,
            event: true,
        };
        let train = vec![row(day(2017, 8, 15), Some(11.0))];
        let test = vec![row(day(2017, 8, 16), None)];

        let req = PredictRequest::from_prepared(&train, &test, &ForecastConfig::default()).unwrap();

        assert_eq!(req.context[0].store_nbr, 44);
        assert_eq!(req.context[0].family, "PRODUCE");
        assert_eq!(req.future[0].store_nbr, 44);
        assert_eq!(req.future[0].family, "PRODUCE");
        assert_eq!(req.future[0].series_id, 3);
    }

    #[test]
    fn request_rejects_bad_quantiles() {
        let cfg = ForecastConfig {
            quantile_levels: vec![1.5],
            ..ForecastConfig::default()
        };
        let err = PredictRequest::from_prepared(&[], &[], &cfg).unwrap_err();
        assert!(matches!(err, ForecastError::InvalidRequest(_)));
    }
}
