//! Store-sales forecasting pipeline.
//!
//! Two stages, each with its own binary:
//! - feature preparation: gap-filled daily panel, dense series ids, store metadata,
//!   holiday flags and holiday-window tables
//! - forecasting: one batch call to a pretrained forecaster and the submission file

mod config;
mod forecast;
mod gapfill;
mod holidays;
mod observability;
mod preprocess;
mod records;
mod remote_pipeline;
mod series;
mod stores;
mod submission;
mod tables;

pub use config::{
    forecast_config_from_env, pipeline_config_from_env, ForecastConfig, ForecastSource,
    PipelineConfig, DEFAULT_MODEL_ID, DEFAULT_PREDICTION_LENGTH,
};
pub use forecast::{
    empirical_quantile, validate_coverage, ContextRow, ForecastError, ForecastPipeline, FutureRow,
    PredictRequest, PredictionRow, SeasonalNaiveForecaster,
};
pub use gapfill::{distinct_series, fill_missing_dates, GapFillReport, GapFillResult};
pub use holidays::{
    build_holiday_windows, flag_holidays, holidays_for_store, parse_window_suffix,
    HolidayCalendar,
};
pub use observability::{
    init_logging, log_app_finish, log_app_start, log_source_selected, logging_config_from_env,
    LogFormat, LoggingConfig, LoggingInitError,
};
pub use preprocess::{
    prepare_tables, run_feature_preparation, FeatureError, FeaturePrepReport, PreparedTables,
};
pub use records::{
    HolidayEvent, HolidayKind, HolidayWindowRecord, Locale, PreparedRow, SalesRecord, SeriesKey,
    StoreHoliday, StoreInfo, SubmissionRecord,
};
pub use remote_pipeline::{decode_response, encode_request, HttpTransport, RemotePipeline};
#[cfg(feature = "remote-pipeline")]
pub use remote_pipeline::ReqwestTransport;
pub use series::{assign_series_id, IdentifiedRecord, SeriesIndex, SeriesTable};
pub use stores::{join_store_metadata, EnrichedRecord, StoreDirectory};
pub use submission::{
    build_submission, pipeline_from_config, run_forecast_submission, SubmissionReport,
};
pub use tables::{
    encode_holiday_windows, encode_prepared_test, encode_prepared_train, encode_store_holidays,
    encode_submission, read_holidays_csv, read_prepared_csv, read_sales_csv, read_stores_csv,
    read_submission_csv, write_atomic, TableError,
};
