//! Forecast stage: prepared tables in, Kaggle submission out.

use std::collections::HashMap;
use std::time::Instant;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::{ForecastConfig, ForecastSource, PipelineConfig};
use crate::forecast::{
    validate_coverage, ForecastError, ForecastPipeline, PredictRequest, PredictionRow,
    SeasonalNaiveForecaster,
};
use crate::observability::log_source_selected;
use crate::records::{PreparedRow, SubmissionRecord};
#[cfg(feature = "remote-pipeline")]
use crate::remote_pipeline::RemotePipeline;
use crate::tables;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionReport {
    pub model_id: String,
    pub context_rows: u64,
    pub future_rows: u64,
    pub series_count: u64,
    pub prediction_rows: u64,
    pub submission_rows: u64,
}

/// Resolves the forecaster for a run. The baseline is used only when selected explicitly.
pub fn pipeline_from_config(
    cfg: &ForecastConfig,
) -> Result<Box<dyn ForecastPipeline>, ForecastError> {
    match cfg.source {
        ForecastSource::Baseline => {
            log_source_selected(
                ForecastSource::Baseline.as_str(),
                SeasonalNaiveForecaster::MODEL_ID,
                Some("STORE_SALES_FORECAST_SOURCE=baseline"),
            );
            Ok(Box::new(SeasonalNaiveForecaster::new(cfg.lookback_weeks)))
        }
        ForecastSource::Remote => remote_pipeline(cfg),
    }
}

#[cfg(feature = "remote-pipeline")]
fn remote_pipeline(cfg: &ForecastConfig) -> Result<Box<dyn ForecastPipeline>, ForecastError> {
    let remote = RemotePipeline::from_config(cfg)?.ok_or_else(|| {
        ForecastError::Config(
            "STORE_SALES_FORECAST_URL is not set; point it at the model endpoint or set \
             STORE_SALES_FORECAST_SOURCE=baseline"
                .to_string(),
        )
    })?;
    log_source_selected(ForecastSource::Remote.as_str(), remote.model_id(), None);
    Ok(Box::new(remote))
}

#[cfg(not(feature = "remote-pipeline"))]
fn remote_pipeline(_cfg: &ForecastConfig) -> Result<Box<dyn ForecastPipeline>, ForecastError> {
    Err(ForecastError::Config(
        "built without the remote-pipeline feature; set STORE_SALES_FORECAST_SOURCE=baseline"
            .to_string(),
    ))
}

/// Joins predictions back onto test rows by (date, series_id) and orders by `id`.
pub fn build_submission(
    test: &[PreparedRow],
    predictions: &[PredictionRow],
) -> Result<Vec<SubmissionRecord>, ForecastError> {
    let by_pair: HashMap<(NaiveDate, u32), f64> = predictions
        .iter()
        .map(|row| ((row.date, row.series_id), row.predictions))
        .collect();

    let mut out = test
        .iter()
        .map(|row| {
            by_pair
                .get(&(row.date, row.series_id))
                .map(|sales| SubmissionRecord {
                    id: row.id,
                    sales: *sales,
                })
                .ok_or(ForecastError::MissingPrediction {
                    id: row.id,
                    series_id: row.series_id,
                    date: row.date,
                })
        })
        .collect::<Result<Vec<_>, _>>()?;

    out.sort_by_key(|record| record.id);
    Ok(out)
}

/// Reads the prepared tables, runs one batch prediction and writes `submission.csv`.
pub fn run_forecast_submission(
    pipeline_cfg: &PipelineConfig,
    forecast_cfg: &ForecastConfig,
    pipeline: &dyn ForecastPipeline,
) -> Result<SubmissionReport, ForecastError> {
    let started = Instant::now();
    info!(
        component = "submission",
        event = "forecast.start",
        model_id = %pipeline.model_id(),
        data_root = %pipeline_cfg.data_root.display()
    );

    let train = tables::read_prepared_csv(&pipeline_cfg.prepared_train_path())?;
    let test = tables::read_prepared_csv(&pipeline_cfg.prepared_test_path())?;

    let request = PredictRequest::from_prepared(&train, &test, forecast_cfg)?;
    let predictions = pipeline.predict_df(&request)?;
    validate_coverage(&request, &predictions)?;

    let submission = build_submission(&test, &predictions)?;
    let bytes = tables::encode_submission(&submission)?;
    tables::write_atomic(&pipeline_cfg.submission_path(), &bytes)?;

    let report = SubmissionReport {
        model_id: pipeline.model_id().to_string(),
        context_rows: request.context.len() as u64,
        future_rows: request.future.len() as u64,
        series_count: request.series_count() as u64,
        prediction_rows: predictions.len() as u64,
        submission_rows: submission.len() as u64,
    };

    info!(
        component = "submission",
        event = "forecast.finish",
        model_id = %report.model_id,
        series_count = report.series_count,
        prediction_rows = report.prediction_rows,
        submission_rows = report.submission_rows,
        elapsed_ms = started.elapsed().as_millis() as u64
    );

    Ok(report)
}
