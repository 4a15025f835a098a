//! Daily transit-line ridership feature engineering and evaluation core.
//!
//! Implemented scope:
//! - sqlite loading of raw validation counts and calendar tables
//! - dense daily time grid per line
//! - leakage-safe lag and rolling-mean features plus calendar enrichment
//! - walk-forward train/test splitting with an enforced temporal gap

mod calendar;
mod features;
mod grid;
mod observability;
mod split;
mod store;

pub use calendar::{
    holiday_flags, school_holiday_events, school_holiday_flags, CalendarError, CalendarEvent,
    SchoolHolidayInterval,
};
pub use features::{
    build_feature_schema, build_feature_table, FeatureColumn, FeatureConfig, FeatureDType,
    FeatureError, FeatureRow, FeatureSchema, FEATURE_SCHEMA_VERSION,
};
pub use grid::{build_time_grid, DailyCount, GridConfig, GridError, GridRow};
pub use observability::{
    init_logging, log_app_start, log_export_written, log_store_opened, logging_config_from_env,
    LogFormat, LoggingConfig, LoggingInitError,
};
pub use split::{Fold, SplitError, WalkForwardConfig};
pub use store::{
    load_daily_counts, load_holidays, load_school_holidays, SchoolHolidayFilter, StoreError,
};
