use chrono::NaiveDateTime;
use serde::Serialize;

use crate::models::{
    CanonicalTable, CleaningConfig, MissingPolicy, OutlierMethod, TableRegistry,
};
use crate::stats::{nan_mean, nan_quantile, nan_std};

/// What one cleaning pass did to one table. Serialized into the run summary.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CleaningStats {
    pub rows_in: usize,
    pub rows_out: usize,
    pub duplicates_removed: usize,
    pub missing_cells_filled: usize,
    pub rows_dropped_missing: usize,
    pub outliers_replaced: usize,
}

/// Applies the fixed cleaning order: sort, dedup, missing values, outliers.
/// Row count never increases, and an empty table passes through untouched.
pub struct DataCleaner {
    config: CleaningConfig,
}

impl DataCleaner {
    pub fn new(config: CleaningConfig) -> Self {
        Self { config }
    }

    pub fn clean(&self, table: &CanonicalTable) -> (CanonicalTable, CleaningStats) {
        let mut stats = CleaningStats {
            rows_in: table.height(),
            ..Default::default()
        };
        if table.is_empty() {
            stats.rows_out = 0;
            return (table.clone(), stats);
        }

        let mut table = table.clone();
        table.sort_by_timestamp();

        if self.config.remove_duplicates {
            stats.duplicates_removed = remove_duplicate_timestamps(&mut table);
        }

        match self.config.handle_missing {
            MissingPolicy::Drop => {
                stats.rows_dropped_missing = drop_rows_with_missing(&mut table);
            }
            MissingPolicy::FillZero => {
                let (_, columns) = table.parts_mut();
                for col in columns.iter_mut() {
                    for v in &mut col.values {
                        if v.is_nan() {
                            *v = 0.0;
                            stats.missing_cells_filled += 1;
                        }
                    }
                }
            }
            MissingPolicy::Interpolate => {
                let (timestamps, columns) = table.parts_mut();
                for col in columns.iter_mut() {
                    stats.missing_cells_filled += interpolate_time(timestamps, &mut col.values);
                }
            }
            MissingPolicy::ForwardFill => {
                let (_, columns) = table.parts_mut();
                for col in columns.iter_mut() {
                    stats.missing_cells_filled += forward_then_back_fill(&mut col.values);
                }
            }
        }

        if self.config.remove_outliers {
            let threshold = self.config.outlier_threshold;
            let method = self.config.outlier_method;
            let (timestamps, columns) = table.parts_mut();
            for col in columns.iter_mut() {
                let flagged = detect_outliers(&col.values, method, threshold);
                let count = flagged.iter().filter(|f| **f).count();
                if count == 0 {
                    continue;
                }
                for (v, is_outlier) in col.values.iter_mut().zip(&flagged) {
                    if *is_outlier {
                        *v = f64::NAN;
                    }
                }
                // outliers are always re-imputed in time, whatever the
                // missing-value policy says
                interpolate_time(timestamps, &mut col.values);
                stats.outliers_replaced += count;
            }
        }

        stats.rows_out = table.height();
        (table, stats)
    }

    /// Clean every table in a registry with the same config.
    pub fn clean_registry(
        &self,
        registry: &TableRegistry,
    ) -> (TableRegistry, Vec<(String, CleaningStats)>) {
        let mut cleaned = TableRegistry::new();
        let mut all_stats = Vec::with_capacity(registry.len());
        for (name, table) in registry.iter() {
            let (table, stats) = self.clean(table);
            cleaned.insert(name, table);
            all_stats.push((name.to_string(), stats));
        }
        (cleaned, all_stats)
    }
}

/// Assumes the table is sorted; keeps the first row of each timestamp run.
fn remove_duplicate_timestamps(table: &mut CanonicalTable) -> usize {
    let timestamps = table.timestamps();
    let mut keep = Vec::with_capacity(timestamps.len());
    let mut removed = 0usize;
    for i in 0..timestamps.len() {
        let first = i == 0 || timestamps[i] != timestamps[i - 1];
        if !first {
            removed += 1;
        }
        keep.push(first);
    }
    if removed > 0 {
        table.retain_rows(&keep);
    }
    removed
}

fn drop_rows_with_missing(table: &mut CanonicalTable) -> usize {
    if table.width() == 0 {
        return 0;
    }
    let height = table.height();
    let mut keep = vec![true; height];
    for col in table.columns() {
        for (i, v) in col.values.iter().enumerate() {
            if v.is_nan() {
                keep[i] = false;
            }
        }
    }
    let dropped = keep.iter().filter(|k| !**k).count();
    if dropped > 0 {
        table.retain_rows(&keep);
    }
    dropped
}

/// Time-weighted linear interpolation. Interior gaps interpolate between
/// their valid neighbors in proportion to elapsed time; gaps before the
/// first valid point take the first valid value and gaps after the last
/// take the last. An all-NaN column stays as it is.
fn interpolate_time(timestamps: &[NaiveDateTime], values: &mut [f64]) -> usize {
    let n = values.len();
    let mut prev_valid: Vec<Option<usize>> = vec![None; n];
    let mut next_valid: Vec<Option<usize>> = vec![None; n];
    let mut last = None;
    for i in 0..n {
        if !values[i].is_nan() {
            last = Some(i);
        }
        prev_valid[i] = last;
    }
    last = None;
    for i in (0..n).rev() {
        if !values[i].is_nan() {
            last = Some(i);
        }
        next_valid[i] = last;
    }

    let mut filled = 0usize;
    for i in 0..n {
        if !values[i].is_nan() {
            continue;
        }
        let replacement = match (prev_valid[i], next_valid[i]) {
            (Some(p), Some(q)) => {
                let span = (timestamps[q] - timestamps[p]).num_seconds() as f64;
                if span <= 0.0 {
                    values[p]
                } else {
                    let elapsed = (timestamps[i] - timestamps[p]).num_seconds() as f64;
                    values[p] + (values[q] - values[p]) * elapsed / span
                }
            }
            (Some(p), None) => values[p],
            (None, Some(q)) => values[q],
            (None, None) => continue,
        };
        values[i] = replacement;
        filled += 1;
    }
    filled
}

fn forward_then_back_fill(values: &mut [f64]) -> usize {
    let mut filled = 0usize;
    let mut last = f64::NAN;
    for v in values.iter_mut() {
        if v.is_nan() {
            if !last.is_nan() {
                *v = last;
                filled += 1;
            }
        } else {
            last = *v;
        }
    }
    // leading gap backfills from the first valid value
    let first = values.iter().copied().find(|v| !v.is_nan());
    if let Some(first) = first {
        for v in values.iter_mut() {
            if v.is_nan() {
                *v = first;
                filled += 1;
            } else {
                break;
            }
        }
    }
    filled
}

fn detect_outliers(values: &[f64], method: OutlierMethod, threshold: f64) -> Vec<bool> {
    match method {
        OutlierMethod::Iqr => {
            let q1 = nan_quantile(values, 0.25);
            let q3 = nan_quantile(values, 0.75);
            if q1.is_nan() || q3.is_nan() {
                return vec![false; values.len()];
            }
            let iqr = q3 - q1;
            let lower = q1 - threshold * iqr;
            let upper = q3 + threshold * iqr;
            values
                .iter()
                .map(|v| !v.is_nan() && (*v < lower || *v > upper))
                .collect()
        }
        OutlierMethod::Zscore => {
            let mean = nan_mean(values);
            let std = nan_std(values);
            // zero or undefined variance means nothing can be an outlier
            if std.is_nan() || std == 0.0 {
                return vec![false; values.len()];
            }
            values
                .iter()
                .map(|v| !v.is_nan() && ((*v - mean) / std).abs() > threshold)
                .collect()
        }
    }
}
