use std::fs;
use std::path::PathBuf;

use ridership::{
    build_feature_table, init_logging, load_daily_counts, load_holidays, load_school_holidays,
    log_app_start, log_export_written, log_store_opened, logging_config_from_env, FeatureConfig,
    FeatureRow, FeatureSchema, GridConfig, SchoolHolidayFilter, WalkForwardConfig,
};
use rusqlite::Connection;
use tracing::info;

/// Days of empty forecast rows appended after the last observed date.
const EXPORT_FORWARD_HORIZON_DAYS: i64 = 10;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;
    log_app_start(&logging_cfg);

    let store_path = PathBuf::from(
        std::env::var("RIDERSHIP_STORE").unwrap_or_else(|_| "data/ridership.sqlite".to_string()),
    );
    let out_dir =
        PathBuf::from(std::env::var("RIDERSHIP_OUT_DIR").unwrap_or_else(|_| "data".to_string()));

    let conn = Connection::open(&store_path)?;
    log_store_opened(&store_path);

    let counts = load_daily_counts(&conn)?;
    let holidays = load_holidays(&conn)?;
    let school_intervals = load_school_holidays(&conn, &SchoolHolidayFilter::default())?;

    let feature_cfg = FeatureConfig::default();
    let grid_cfg = GridConfig {
        forward_horizon_days: EXPORT_FORWARD_HORIZON_DAYS,
    };
    let (schema, rows) =
        build_feature_table(&counts, &holidays, &school_intervals, &feature_cfg, &grid_cfg)?;

    // Fail fast when the series could never produce a single evaluation fold.
    let observed_days: Vec<chrono::NaiveDate> = counts.iter().map(|c| c.day).collect();
    let split_cfg = WalkForwardConfig::default();
    split_cfg.ensure_sufficient_history(&observed_days)?;
    let folds = split_cfg.split(&observed_days)?;
    info!(
        component = "feature_export",
        event = "export.split_preview",
        folds = folds.len()
    );

    fs::create_dir_all(&out_dir)?;
    let features_path = out_dir.join("features.csv");
    let schema_path = out_dir.join("feature_schema.json");
    write_features_csv(&features_path, &schema, &rows)?;
    fs::write(&schema_path, serde_json::to_vec_pretty(&schema)?)?;

    log_export_written(&features_path, &schema_path, rows.len());
    Ok(())
}

fn write_features_csv(
    path: &std::path::Path,
    schema: &FeatureSchema,
    rows: &[FeatureRow],
) -> Result<(), Box<dyn std::error::Error>> {
    let mut writer = csv::Writer::from_path(path)?;

    let mut header = vec!["line".to_string(), "day".to_string()];
    header.extend(schema.columns.iter().map(|c| c.name.clone()));
    writer.write_record(&header)?;

    for row in rows {
        let mut record = Vec::with_capacity(header.len());
        record.push(row.line.clone());
        record.push(row.day.to_string());
        for value in &row.values {
            record.push(value.map(|v| v.to_string()).unwrap_or_default());
        }
        writer.write_record(&record)?;
    }

    writer.flush()?;
    Ok(())
}
