use std::cell::RefCell;
use std::fs;
use std::path::Path;

use store_sales::{
    read_submission_csv, run_feature_preparation, run_forecast_submission, ForecastConfig,
    ForecastError, ForecastPipeline, PipelineConfig, PredictRequest, PredictionRow,
    SeasonalNaiveForecaster,
};
use tempfile::tempdir;

const STORES_CSV: &str = "\
store_nbr,city,state,type,cluster
1,Quito,Pichincha,D,13
";

const HOLIDAYS_CSV: &str = "\
date,type,locale,locale_name,description,transferred
2017-08-10,Holiday,National,Ecuador,Primer Grito de Independencia,True
2017-08-11,Transfer,National,Ecuador,Traslado Primer Grito de Independencia,False
";

/// Two weeks of history for two families, then two test days with shuffled ids.
fn seed(root: &Path) {
    let mut train = String::from("id,date,store_nbr,family,sales,onpromotion\n");
    let mut id = 0;
    for d in 3..=16u32 {
        for (family, base) in [("AUTOMOTIVE", 2.0), ("BEVERAGES", 100.0)] {
            train.push_str(&format!(
                "{id},2017-08-{d:02},1,{family},{},0\n",
                base + f64::from(d)
            ));
            id += 1;
        }
    }
    let test = "\
id,date,store_nbr,family,onpromotion
3000891,2017-08-18,1,BEVERAGES,0
3000888,2017-08-17,1,AUTOMOTIVE,1
3000890,2017-08-18,1,AUTOMOTIVE,0
3000889,2017-08-17,1,BEVERAGES,2
";
    fs::write(root.join("train.csv"), train).expect("write train");
    fs::write(root.join("test.csv"), test).expect("write test");
    fs::write(root.join("stores.csv"), STORES_CSV).expect("write stores");
    fs::write(root.join("holidays_events.csv"), HOLIDAYS_CSV).expect("write holidays");
}

fn prepared_root() -> (tempfile::TempDir, PipelineConfig) {
    let dir = tempdir().expect("tempdir");
    seed(dir.path());
    let cfg = PipelineConfig::new(dir.path());
    run_feature_preparation(&cfg).expect("feature preparation should succeed");
    (dir, cfg)
}

/// Answers with a fixed value per series and remembers what it was asked.
struct FixedPipeline {
    drop_last: bool,
    duplicate_first: bool,
    seen: RefCell<Option<PredictRequest>>,
}

impl FixedPipeline {
    fn new() -> Self {
        Self {
            drop_last: false,
            duplicate_first: false,
            seen: RefCell::new(None),
        }
    }
}

impl ForecastPipeline for FixedPipeline {
    fn model_id(&self) -> &str {
        "fixed"
    }

    fn predict_df(&self, request: &PredictRequest) -> Result<Vec<PredictionRow>, ForecastError> {
        *self.seen.borrow_mut() = Some(request.clone());
        let mut rows: Vec<PredictionRow> = request
            .future
            .iter()
            .map(|row| {
                let value = 10.0 * f64::from(row.series_id + 1);
                PredictionRow {
                    series_id: row.series_id,
                    date: row.date,
                    predictions: value,
                    quantiles: vec![value],
                }
            })
            .collect();
        if self.drop_last {
            rows.pop();
        }
        if self.duplicate_first {
            let first = rows[0].clone();
            rows.push(first);
        }
        Ok(rows)
    }
}

#[test]
fn submission_is_sorted_by_id_and_round_trips() {
    let (_dir, cfg) = prepared_root();
    let pipeline = FixedPipeline::new();

    let report = run_forecast_submission(&cfg, &ForecastConfig::default(), &pipeline)
        .expect("submission should be written");

    assert_eq!(report.model_id, "fixed");
    assert_eq!(report.context_rows, 28);
    assert_eq!(report.future_rows, 4);
    assert_eq!(report.series_count, 2);
    assert_eq!(report.submission_rows, 4);

    let request = pipeline.seen.borrow().clone().expect("pipeline was called");
    assert_eq!(request.prediction_length, 16);
    assert_eq!(request.quantile_levels, vec![0.5]);
    assert_eq!(request.id_column, "series_id");
    assert!(request.context.iter().all(|row| row.series_id < 2));

    let rows = read_submission_csv(&cfg.submission_path()).expect("submission csv");
    let ids: Vec<u64> = rows.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![3000888, 3000889, 3000890, 3000891]);
    // AUTOMOTIVE is series 0, BEVERAGES series 1
    let sales: Vec<f64> = rows.iter().map(|r| r.sales).collect();
    assert_eq!(sales, vec![10.0, 20.0, 10.0, 20.0]);

    let header = fs::read_to_string(cfg.submission_path()).expect("read submission");
    assert_eq!(header.lines().next(), Some("id,sales"));
}

#[test]
fn incomplete_or_duplicated_predictions_are_rejected() {
    let (_dir, cfg) = prepared_root();

    let short = FixedPipeline {
        drop_last: true,
        ..FixedPipeline::new()
    };
    let err = run_forecast_submission(&cfg, &ForecastConfig::default(), &short)
        .expect_err("one pair is missing");
    assert!(matches!(err, ForecastError::ExternalPrediction(_)));

    let doubled = FixedPipeline {
        duplicate_first: true,
        ..FixedPipeline::new()
    };
    let err = run_forecast_submission(&cfg, &ForecastConfig::default(), &doubled)
        .expect_err("one pair is duplicated");
    assert!(matches!(err, ForecastError::ExternalPrediction(_)));

    assert!(!cfg.submission_path().exists());
}

#[test]
fn baseline_forecaster_fills_every_test_row() {
    let (_dir, cfg) = prepared_root();
    let forecast_cfg = ForecastConfig {
        lookback_weeks: 2,
        ..ForecastConfig::default()
    };
    let pipeline = SeasonalNaiveForecaster::new(forecast_cfg.lookback_weeks);

    let report = run_forecast_submission(&cfg, &forecast_cfg, &pipeline)
        .expect("baseline submission should be written");
    assert_eq!(report.model_id, "seasonal-naive");

    let rows = read_submission_csv(&cfg.submission_path()).expect("submission csv");
    assert_eq!(rows.len(), 4);
    // 2017-08-17 AUTOMOTIVE: same weekday on 08-10 (12.0) and 08-03 (5.0)
    assert_eq!(rows[0].id, 3000888);
    assert!((rows[0].sales - 8.5).abs() < 1e-9);
    assert!(rows.iter().all(|r| r.sales >= 0.0));
}

#[test]
fn missing_prepared_tables_surface_as_table_errors() {
    let dir = tempdir().expect("tempdir");
    let cfg = PipelineConfig::new(dir.path());
    let err = run_forecast_submission(&cfg, &ForecastConfig::default(), &FixedPipeline::new())
        .expect_err("nothing was prepared");
    assert!(matches!(err, ForecastError::Table(_)));
}
