//! Walk-forward train/test splitting with an enforced temporal gap.
//!
//! Train rows strictly precede the split point; test rows start `gap` days
//! after it. The gap exists so features derived from lagged windows upstream
//! never straddle the train/test boundary. Keeping `gap` at least as large
//! as the smallest feature lag in use is the caller's obligation.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

/// All durations are in days. Defaults follow the evaluation protocol used
/// for the ridership models: 3-day gap, 90-day test windows, at least 90 days
/// of initial training history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalkForwardConfig {
    pub gap: i64,
    pub test_length: i64,
    pub min_train_size: i64,
    /// When set, only the most recent `max_splits` folds are kept.
    pub max_splits: Option<usize>,
}

impl Default for WalkForwardConfig {
    fn default() -> Self {
        Self {
            gap: 3,
            test_length: 90,
            min_train_size: 90,
            max_splits: None,
        }
    }
}

/// Train/test index sets referencing positions in the date snapshot the
/// split was computed from. Both sets are always non-empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fold {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SplitError {
    #[error("cannot split an empty date snapshot")]
    EmptyInput,
    #[error("insufficient history: span of {span_days} days cannot produce a fold; more than min_train_size + gap = {required_days} days are needed")]
    InsufficientHistory { span_days: i64, required_days: i64 },
    #[error("invalid walk-forward config: {0}")]
    InvalidConfig(String),
}

impl WalkForwardConfig {
    fn validate(&self) -> Result<(), SplitError> {
        if self.test_length < 1 {
            return Err(SplitError::InvalidConfig(
                "test_length must be at least 1 day".to_string(),
            ));
        }
        if self.gap < 0 || self.min_train_size < 1 {
            return Err(SplitError::InvalidConfig(
                "gap must be >= 0 and min_train_size >= 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Caller-level sanity check: fails when the observed span could never
    /// yield a single fold, instead of silently producing an empty list.
    ///
    /// The first candidate split point sits `min_train_size` days after the
    /// span start and must fall strictly before `d_max - gap`, so the span
    /// has to exceed `min_train_size + gap` days.
    pub fn ensure_sufficient_history(&self, dates: &[NaiveDate]) -> Result<(), SplitError> {
        self.validate()?;
        let (d_min, d_max) = span(dates)?;
        let span_days = (d_max - d_min).num_days();
        let required_days = self.min_train_size + self.gap;
        if span_days <= required_days {
            return Err(SplitError::InsufficientHistory {
                span_days,
                required_days,
            });
        }
        Ok(())
    }

    /// Generates chronologically ordered folds over a snapshot of row dates.
    ///
    /// Split points step by `test_length` from `d_min + min_train_size`,
    /// stopping strictly before `d_max - gap`. For a split point `s`:
    /// train = rows before `s`, test = rows in `[s + gap, s + gap +
    /// test_length)`. Folds where either side is empty are skipped. With
    /// `max_splits = Some(k)` only the last `k` folds survive, order intact.
    ///
    /// The snapshot does not have to be sorted; indices select by date value.
    pub fn split(&self, dates: &[NaiveDate]) -> Result<Vec<Fold>, SplitError> {
        self.validate()?;
        let (d_min, d_max) = span(dates)?;

        let mut folds = Vec::new();
        let mut split_day = d_min + Duration::days(self.min_train_size);
        let stop = d_max - Duration::days(self.gap);
        while split_day < stop {
            let test_start = split_day + Duration::days(self.gap);
            let test_end = test_start + Duration::days(self.test_length);

            let mut train = Vec::new();
            let mut test = Vec::new();
            for (index, day) in dates.iter().enumerate() {
                if *day < split_day {
                    train.push(index);
                } else if *day >= test_start && *day < test_end {
                    test.push(index);
                }
            }
            if !train.is_empty() && !test.is_empty() {
                folds.push(Fold { train, test });
            }
            split_day += Duration::days(self.test_length);
        }

        if let Some(max_splits) = self.max_splits {
            let drop = folds.len().saturating_sub(max_splits);
            folds.drain(..drop);
        }

        info!(
            component = "split",
            event = "split.generated",
            folds = folds.len(),
            gap = self.gap,
            test_length = self.test_length,
            min_train_size = self.min_train_size
        );

        Ok(folds)
    }
}

fn span(dates: &[NaiveDate]) -> Result<(NaiveDate, NaiveDate), SplitError> {
    let d_min = dates.iter().copied().min().ok_or(SplitError::EmptyInput)?;
    let d_max = dates.iter().copied().max().ok_or(SplitError::EmptyInput)?;
    Ok((d_min, d_max))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).expect("valid date")
    }

    fn daily_series(start: NaiveDate, days: i64) -> Vec<NaiveDate> {
        (0..days).map(|offset| start + Duration::days(offset)).collect()
    }

    #[test]
    fn one_year_series_produces_the_documented_first_fold() {
        let dates = daily_series(d(2022, 1, 1), 365);
        let folds = WalkForwardConfig::default().split(&dates).unwrap();

        assert!(!folds.is_empty());
        let first = &folds[0];
        // Split point 2022-04-01: train is everything before it.
        assert_eq!(dates[*first.train.last().unwrap()], d(2022, 3, 31));
        assert_eq!(dates[first.test[0]], d(2022, 4, 4));
        assert_eq!(dates[*first.test.last().unwrap()], d(2022, 7, 2));
    }

    #[test]
    fn every_fold_honors_the_gap() {
        let cfg = WalkForwardConfig::default();
        let dates = daily_series(d(2022, 1, 1), 500);
        for fold in cfg.split(&dates).unwrap() {
            let train_max = fold.train.iter().map(|i| dates[*i]).max().unwrap();
            let test_min = fold.test.iter().map(|i| dates[*i]).min().unwrap();
            assert!(test_min >= train_max + Duration::days(cfg.gap));
            assert!(!fold.train.is_empty());
            assert!(!fold.test.is_empty());
        }
    }

    #[test]
    fn test_windows_are_bounded_by_test_length() {
        let cfg = WalkForwardConfig {
            test_length: 30,
            ..WalkForwardConfig::default()
        };
        let dates = daily_series(d(2022, 1, 1), 400);
        for fold in cfg.split(&dates).unwrap() {
            let test_min = fold.test.iter().map(|i| dates[*i]).min().unwrap();
            let test_max = fold.test.iter().map(|i| dates[*i]).max().unwrap();
            assert!((test_max - test_min).num_days() < 30);
        }
    }

    #[test]
    fn max_splits_keeps_the_last_folds_in_order() {
        let dates = daily_series(d(2021, 1, 1), 800);
        let all = WalkForwardConfig::default().split(&dates).unwrap();
        assert!(all.len() > 3);

        let truncated = WalkForwardConfig {
            max_splits: Some(3),
            ..WalkForwardConfig::default()
        }
        .split(&dates)
        .unwrap();

        assert_eq!(truncated.len(), 3);
        assert_eq!(truncated.as_slice(), &all[all.len() - 3..]);
    }

    #[test]
    fn max_splits_larger_than_fold_count_keeps_everything() {
        let dates = daily_series(d(2022, 1, 1), 365);
        let all = WalkForwardConfig::default().split(&dates).unwrap();
        let truncated = WalkForwardConfig {
            max_splits: Some(100),
            ..WalkForwardConfig::default()
        }
        .split(&dates)
        .unwrap();
        assert_eq!(truncated, all);
    }

    #[test]
    fn folds_advance_chronologically() {
        let dates = daily_series(d(2021, 6, 1), 600);
        let folds = WalkForwardConfig::default().split(&dates).unwrap();
        for pair in folds.windows(2) {
            let earlier = pair[0].test.iter().map(|i| dates[*i]).min().unwrap();
            let later = pair[1].test.iter().map(|i| dates[*i]).min().unwrap();
            assert!(earlier < later);
        }
    }

    #[test]
    fn unsorted_snapshot_selects_by_date_value() {
        // Indices must reference the snapshot as given, not a sorted copy.
        let mut dates = daily_series(d(2022, 1, 1), 200);
        dates.reverse();
        let folds = WalkForwardConfig::default().split(&dates).unwrap();
        let first = &folds[0];
        for index in &first.train {
            assert!(dates[*index] < d(2022, 4, 1));
        }
        for index in &first.test {
            assert!(dates[*index] >= d(2022, 4, 4));
        }
    }

    #[test]
    fn short_series_yields_no_folds_and_fails_the_history_check() {
        let cfg = WalkForwardConfig::default();
        let dates = daily_series(d(2022, 1, 1), 60);
        assert!(cfg.split(&dates).unwrap().is_empty());
        assert_eq!(
            cfg.ensure_sufficient_history(&dates).unwrap_err(),
            SplitError::InsufficientHistory {
                span_days: 59,
                required_days: 93,
            }
        );
    }

    #[test]
    fn exact_threshold_span_yields_no_fold_and_fails_the_check() {
        // 94 daily dates span exactly min_train_size + gap days: the first
        // candidate split point lands on the exclusive stop, so no fold
        // exists and the check must reject rather than pass.
        let cfg = WalkForwardConfig::default();
        let dates = daily_series(d(2022, 1, 1), 94);
        assert!(cfg.split(&dates).unwrap().is_empty());
        assert_eq!(
            cfg.ensure_sufficient_history(&dates).unwrap_err(),
            SplitError::InsufficientHistory {
                span_days: 93,
                required_days: 93,
            }
        );
    }

    #[test]
    fn sufficient_history_passes_the_check_and_splits() {
        let cfg = WalkForwardConfig::default();
        let dates = daily_series(d(2022, 1, 1), 95);
        cfg.ensure_sufficient_history(&dates).unwrap();
        assert!(!cfg.split(&dates).unwrap().is_empty());
    }

    #[test]
    fn empty_snapshot_is_rejected() {
        assert_eq!(
            WalkForwardConfig::default().split(&[]).unwrap_err(),
            SplitError::EmptyInput
        );
    }
}
