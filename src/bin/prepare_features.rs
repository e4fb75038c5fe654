use std::time::Instant;

use store_sales::{
    init_logging, log_app_finish, log_app_start, logging_config_from_env,
    pipeline_config_from_env, run_feature_preparation,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let started = Instant::now();
    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;

    let cfg = pipeline_config_from_env();
    log_app_start("prepare_features", &logging_cfg, cfg.data_root());

    let report = run_feature_preparation(&cfg)?;

    println!(
        "Prepared {} train rows and {} test rows across {} series ({} gap-filled, {} holiday windows) under {}",
        report.train_rows,
        report.test_rows,
        report.series_count,
        report.synthesized_rows,
        report.holiday_window_rows,
        cfg.preproc_dir().display()
    );

    log_app_finish("prepare_features", started.elapsed().as_millis());
    Ok(())
}
