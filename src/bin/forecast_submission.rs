use std::time::Instant;

use store_sales::{
    forecast_config_from_env, init_logging, log_app_finish, log_app_start,
    logging_config_from_env, pipeline_config_from_env, pipeline_from_config,
    run_forecast_submission,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let started = Instant::now();
    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;

    let pipeline_cfg = pipeline_config_from_env();
    let forecast_cfg = forecast_config_from_env();
    log_app_start("forecast_submission", &logging_cfg, pipeline_cfg.data_root());

    let pipeline = pipeline_from_config(&forecast_cfg)?;
    let report = run_forecast_submission(&pipeline_cfg, &forecast_cfg, pipeline.as_ref())?;

    println!(
        "Wrote {} predictions from {} for {} series to {}",
        report.submission_rows,
        report.model_id,
        report.series_count,
        pipeline_cfg.submission_path().display()
    );

    log_app_finish("forecast_submission", started.elapsed().as_millis());
    Ok(())
}
