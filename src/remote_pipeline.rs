//! JSON-over-HTTP client for a hosted `predict_df` endpoint.

use chrono::NaiveDate;
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use crate::config::ForecastConfig;
use crate::forecast::{ForecastError, ForecastPipeline, PredictRequest, PredictionRow};

const POINT_FORECAST_KEY: &str = "predictions";

/// Sends one request body and returns the raw response body.
pub trait HttpTransport {
    fn post_json(&self, url: &str, body: &[u8]) -> Result<Vec<u8>, ForecastError>;
}

#[cfg(feature = "remote-pipeline")]
pub struct ReqwestTransport {
    client: reqwest::blocking::Client,
}

#[cfg(feature = "remote-pipeline")]
impl ReqwestTransport {
    pub fn new(timeout_ms: u64) -> Result<Self, ForecastError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_millis(timeout_ms))
            .build()
            .map_err(|err| ForecastError::HttpClientBuild(err.to_string()))?;
        Ok(Self { client })
    }
}

#[cfg(feature = "remote-pipeline")]
impl HttpTransport for ReqwestTransport {
    fn post_json(&self, url: &str, body: &[u8]) -> Result<Vec<u8>, ForecastError> {
        let response = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body.to_vec())
            .send()
            .map_err(|err| ForecastError::HttpRequest {
                url: url.to_string(),
                message: err.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ForecastError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response
            .bytes()
            .map(|bytes| bytes.to_vec())
            .map_err(|err| ForecastError::HttpRequest {
                url: url.to_string(),
                message: err.to_string(),
            })
    }
}

pub struct RemotePipeline<T> {
    transport: T,
    endpoint: String,
    model_id: String,
    max_retries: u32,
    retry_backoff_ms: u64,
}

#[cfg(feature = "remote-pipeline")]
impl RemotePipeline<ReqwestTransport> {
    /// `None` when no endpoint is configured.
    pub fn from_config(cfg: &ForecastConfig) -> Result<Option<Self>, ForecastError> {
        match &cfg.endpoint {
            Some(_) => {
                let transport = ReqwestTransport::new(cfg.http_timeout_ms)?;
                Ok(RemotePipeline::with_transport(transport, cfg))
            }
            None => Ok(None),
        }
    }
}

impl<T: HttpTransport> RemotePipeline<T> {
    pub fn with_transport(transport: T, cfg: &ForecastConfig) -> Option<Self> {
        let endpoint = cfg.endpoint.as_ref()?;
        Some(Self {
            transport,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model_id: cfg.model_id.clone(),
            max_retries: cfg.max_retries,
            retry_backoff_ms: cfg.retry_backoff_ms,
        })
    }

    pub fn predict_url(&self) -> String {
        format!("{}/predict", self.endpoint)
    }

    /// One attempt unless `max_retries` is raised. Only failures to reach the endpoint
    /// are retried; an HTTP status answer is final.
    fn post_with_retry(&self, url: &str, body: &[u8]) -> Result<Vec<u8>, ForecastError> {
        let mut attempt: u32 = 0;
        loop {
            match self.transport.post_json(url, body) {
                Ok(bytes) => return Ok(bytes),
                Err(err @ ForecastError::HttpRequest { .. }) if attempt < self.max_retries => {
                    attempt = attempt.saturating_add(1);
                    let shift = attempt.saturating_sub(1).min(10);
                    let sleep_ms = self.retry_backoff_ms.saturating_mul(1u64 << shift);
                    warn!(
                        component = "remote_pipeline",
                        event = "forecast.http.retry",
                        attempt,
                        sleep_ms,
                        error = %err
                    );
                    std::thread::sleep(std::time::Duration::from_millis(sleep_ms));
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl<T: HttpTransport> ForecastPipeline for RemotePipeline<T> {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn predict_df(&self, request: &PredictRequest) -> Result<Vec<PredictionRow>, ForecastError> {
        let url = self.predict_url();
        let body = serde_json::to_vec(&encode_request(&self.model_id, request))
            .map_err(|err| ForecastError::InvalidRequest(err.to_string()))?;

        info!(
            component = "remote_pipeline",
            event = "forecast.http.request",
            url = %url,
            model_id = %self.model_id,
            context_rows = request.context.len(),
            future_rows = request.future.len(),
            body_bytes = body.len()
        );

        let payload = self.post_with_retry(&url, &body)?;
        let rows = decode_response(request, &payload)?;

        info!(
            component = "remote_pipeline",
            event = "forecast.http.response",
            rows = rows.len()
        );

        Ok(rows)
    }
}

/// Long-format frames keyed by the configured column names.
pub fn encode_request(model_id: &str, request: &PredictRequest) -> Value {
    let context: Vec<Value> = request
        .context
        .iter()
        .map(|row| {
            let mut obj = Map::new();
            obj.insert(request.id_column.clone(), json!(row.series_id));
            obj.insert(request.timestamp_column.clone(), json!(row.date.to_string()));
            obj.insert(request.target.clone(), json!(row.sales));
            obj.insert("store_nbr".to_string(), json!(row.store_nbr));
            obj.insert("family".to_string(), json!(row.family));
            obj.insert("onpromotion".to_string(), json!(row.onpromotion));
            obj.insert("event".to_string(), json!(row.event));
            Value::Object(obj)
        })
        .collect();

    let future: Vec<Value> = request
        .future
        .iter()
        .map(|row| {
            let mut obj = Map::new();
            obj.insert(request.id_column.clone(), json!(row.series_id));
            obj.insert(request.timestamp_column.clone(), json!(row.date.to_string()));
            obj.insert("store_nbr".to_string(), json!(row.store_nbr));
            obj.insert("family".to_string(), json!(row.family));
            obj.insert("onpromotion".to_string(), json!(row.onpromotion));
            obj.insert("event".to_string(), json!(row.event));
            Value::Object(obj)
        })
        .collect();

    json!({
        "model_id": model_id,
        "prediction_length": request.prediction_length,
        "quantile_levels": request.quantile_levels,
        "id_column": request.id_column,
        "timestamp_column": request.timestamp_column,
        "target": request.target,
        "context": context,
        "future": future,
    })
}

/// Accepts either a bare array of rows or `{"predictions": [...]}`.
pub fn decode_response(
    request: &PredictRequest,
    payload: &[u8],
) -> Result<Vec<PredictionRow>, ForecastError> {
    let value: Value = serde_json::from_slice(payload)
        .map_err(|err| ForecastError::InvalidResponse(format!("response is not JSON: {err}")))?;

    let rows = match &value {
        Value::Array(rows) => rows,
        Value::Object(obj) => match obj.get(POINT_FORECAST_KEY) {
            Some(Value::Array(rows)) => rows,
            _ => {
                return Err(ForecastError::InvalidResponse(
                    "expected an array of prediction rows".to_string(),
                ))
            }
        },
        _ => {
            return Err(ForecastError::InvalidResponse(
                "expected an array of prediction rows".to_string(),
            ))
        }
    };

    rows.iter()
        .enumerate()
        .map(|(index, row)| decode_row(request, index, row))
        .collect()
}

fn decode_row(
    request: &PredictRequest,
    index: usize,
    row: &Value,
) -> Result<PredictionRow, ForecastError> {
    let obj = row.as_object().ok_or_else(|| {
        ForecastError::InvalidResponse(format!("prediction row {index} is not an object"))
    })?;

    let series_id = obj
        .get(&request.id_column)
        .and_then(|value| match value {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })
        .and_then(|id| u32::try_from(id).ok())
        .ok_or_else(|| {
            ForecastError::InvalidResponse(format!(
                "prediction row {index} has no usable '{}'",
                request.id_column
            ))
        })?;

    let date = obj
        .get(&request.timestamp_column)
        .and_then(Value::as_str)
        .and_then(|raw| raw.get(..10))
        .and_then(|raw| NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok())
        .ok_or_else(|| {
            ForecastError::InvalidResponse(format!(
                "prediction row {index} has no usable '{}'",
                request.timestamp_column
            ))
        })?;

    let median_key = quantile_key(0.5);
    let predictions = obj
        .get(POINT_FORECAST_KEY)
        .or_else(|| obj.get(&median_key))
        .and_then(Value::as_f64)
        .ok_or_else(|| {
            ForecastError::InvalidResponse(format!(
                "prediction row {index} has neither '{POINT_FORECAST_KEY}' nor '{median_key}'"
            ))
        })?;

    let quantiles = request
        .quantile_levels
        .iter()
        .map(|level| {
            let key = quantile_key(*level);
            match obj.get(&key).and_then(Value::as_f64) {
                Some(value) => Ok(value),
                None if key == median_key => Ok(predictions),
                None => Err(ForecastError::InvalidResponse(format!(
                    "prediction row {index} is missing quantile column '{key}'"
                ))),
            }
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(PredictionRow {
        series_id,
        date,
        predictions,
        quantiles,
    })
}

fn quantile_key(level: f64) -> String {
    format!("{level}")
}
