use std::f64::consts::PI;

use anyhow::Result;
use chrono::{Datelike, Timelike};

use crate::models::{CanonicalTable, FeatureConfig};
use crate::roles::{ColumnRole, RoleSchema};
use crate::stats::{nan_mean, nan_std};

/// Derives model-ready feature columns from the merged table.
///
/// Every feature appends a new column; the row count and the existing
/// columns are never touched. Lag and difference features need a target
/// column, which defaults to the first power-role column when none is set.
pub struct FeatureEngineer {
    config: FeatureConfig,
    schema: RoleSchema,
    target: Option<String>,
}

impl FeatureEngineer {
    pub fn new(config: FeatureConfig) -> Self {
        Self {
            config,
            schema: RoleSchema::standard(),
            target: None,
        }
    }

    pub fn with_schema(mut self, schema: RoleSchema) -> Self {
        self.schema = schema;
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// The configured target if the table has it, else the first
    /// power-role column.
    pub fn resolve_target(&self, table: &CanonicalTable) -> Option<String> {
        if let Some(name) = &self.target {
            if table.column(name).is_some() {
                return Some(name.clone());
            }
            log::warn!("target column '{}' not present, falling back to role lookup", name);
        }
        self.schema.first_with_role(table, ColumnRole::Power)
    }

    pub fn create_all_features(&self, table: &CanonicalTable) -> Result<CanonicalTable> {
        let mut out = table.clone();
        if self.config.time_features {
            self.add_time_features(&mut out)?;
        }
        if self.config.cyclical_features {
            self.add_cyclical_features(&mut out)?;
        }
        let target = self.resolve_target(table);
        if self.config.lag_features {
            match &target {
                Some(name) => self.add_lag_features(&mut out, name)?,
                None => log::warn!("no target column resolved, skipping lag features"),
            }
        }
        if self.config.rolling_features {
            self.add_rolling_features(&mut out, table)?;
        }
        if self.config.difference_features {
            if let Some(name) = &target {
                self.add_difference_features(&mut out, name)?;
            }
        }
        if self.config.interaction_features {
            self.add_interaction_features(&mut out, table)?;
        }
        Ok(out)
    }

    fn add_time_features(&self, table: &mut CanonicalTable) -> Result<()> {
        let hour: Vec<f64> = table.timestamps().iter().map(|t| t.hour() as f64).collect();
        let day_of_week: Vec<f64> = table
            .timestamps()
            .iter()
            .map(|t| t.weekday().num_days_from_monday() as f64)
            .collect();
        let day_of_month: Vec<f64> = table.timestamps().iter().map(|t| t.day() as f64).collect();
        let month: Vec<f64> = table.timestamps().iter().map(|t| t.month() as f64).collect();
        let year: Vec<f64> = table.timestamps().iter().map(|t| t.year() as f64).collect();
        let is_weekend: Vec<f64> = day_of_week
            .iter()
            .map(|d| if *d >= 5.0 { 1.0 } else { 0.0 })
            .collect();
        table.add_column("hour", hour)?;
        table.add_column("day_of_week", day_of_week)?;
        table.add_column("day_of_month", day_of_month)?;
        table.add_column("month", month)?;
        table.add_column("year", year)?;
        table.add_column("is_weekend", is_weekend)?;
        Ok(())
    }

    fn add_cyclical_features(&self, table: &mut CanonicalTable) -> Result<()> {
        let hour: Vec<f64> = table.timestamps().iter().map(|t| t.hour() as f64).collect();
        let day_of_week: Vec<f64> = table
            .timestamps()
            .iter()
            .map(|t| t.weekday().num_days_from_monday() as f64)
            .collect();
        let month: Vec<f64> = table.timestamps().iter().map(|t| t.month() as f64).collect();
        add_cycle(table, "hour", &hour, 24.0)?;
        add_cycle(table, "day_of_week", &day_of_week, 7.0)?;
        add_cycle(table, "month", &month, 12.0)?;
        Ok(())
    }

    fn add_lag_features(&self, table: &mut CanonicalTable, target: &str) -> Result<()> {
        let values = match table.column_values(target) {
            Some(v) => v.to_vec(),
            None => return Ok(()),
        };
        for &k in &self.config.lag_offsets {
            let lagged: Vec<f64> = (0..values.len())
                .map(|i| if i >= k { values[i - k] } else { f64::NAN })
                .collect();
            table.add_column(format!("{}_lag_{}", target, k), lagged)?;
        }
        Ok(())
    }

    fn add_rolling_features(
        &self,
        table: &mut CanonicalTable,
        source: &CanonicalTable,
    ) -> Result<()> {
        let candidates = self
            .schema
            .important_columns(source, self.config.max_important_columns);
        for name in candidates {
            let values = match table.column_values(&name) {
                Some(v) => v.to_vec(),
                None => continue,
            };
            for &w in &self.config.rolling_windows {
                if w == 0 {
                    continue;
                }
                let mut means = Vec::with_capacity(values.len());
                let mut stds = Vec::with_capacity(values.len());
                for i in 0..values.len() {
                    let start = (i + 1).saturating_sub(w);
                    let window = &values[start..=i];
                    means.push(nan_mean(window));
                    stds.push(nan_std(window));
                }
                table.add_column(format!("{}_rolling_mean_{}", name, w), means)?;
                table.add_column(format!("{}_rolling_std_{}", name, w), stds)?;
            }
        }
        Ok(())
    }

    fn add_difference_features(&self, table: &mut CanonicalTable, target: &str) -> Result<()> {
        let values = match table.column_values(target) {
            Some(v) => v.to_vec(),
            None => return Ok(()),
        };
        for &p in &self.config.difference_periods {
            let diff: Vec<f64> = (0..values.len())
                .map(|i| if i >= p { values[i] - values[i - p] } else { f64::NAN })
                .collect();
            table.add_column(format!("{}_diff_{}", target, p), diff)?;
        }
        Ok(())
    }

    fn add_interaction_features(
        &self,
        table: &mut CanonicalTable,
        source: &CanonicalTable,
    ) -> Result<()> {
        let candidates = self
            .schema
            .important_columns(source, self.config.max_important_columns);
        if candidates.len() < 2 {
            log::debug!("fewer than two role-bearing columns, skipping interactions");
            return Ok(());
        }
        let (a, b) = (&candidates[0], &candidates[1]);
        let va = match table.column_values(a) {
            Some(v) => v.to_vec(),
            None => return Ok(()),
        };
        let vb = match table.column_values(b) {
            Some(v) => v.to_vec(),
            None => return Ok(()),
        };
        let product: Vec<f64> = va.iter().zip(&vb).map(|(x, y)| x * y).collect();
        // guard the ratio against near-zero denominators
        let ratio: Vec<f64> = va
            .iter()
            .zip(&vb)
            .map(|(x, y)| if y.abs() < 1e-8 { f64::NAN } else { x / y })
            .collect();
        table.add_column(format!("{}_x_{}", a, b), product)?;
        table.add_column(format!("{}_div_{}", a, b), ratio)?;
        Ok(())
    }
}

fn add_cycle(
    table: &mut CanonicalTable,
    name: &str,
    values: &[f64],
    period: f64,
) -> Result<()> {
    let angles: Vec<f64> = values.iter().map(|v| 2.0 * PI * v / period).collect();
    table.add_column(
        format!("{}_sin", name),
        angles.iter().map(|a| a.sin()).collect(),
    )?;
    table.add_column(
        format!("{}_cos", name),
        angles.iter().map(|a| a.cos()).collect(),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Column;
    use chrono::{NaiveDate, NaiveDateTime};

    fn ts(d: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 10, d)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn minutes(n: usize) -> Vec<NaiveDateTime> {
        (0..n).map(|i| ts(1, 0, i as u32)).collect()
    }

    fn table(cols: Vec<(&str, Vec<f64>)>) -> CanonicalTable {
        let n = cols[0].1.len();
        let columns = cols.into_iter().map(|(name, v)| Column::new(name, v)).collect();
        CanonicalTable::from_parts(minutes(n), columns).unwrap()
    }

    fn config(adjust: impl FnOnce(&mut FeatureConfig)) -> FeatureConfig {
        let mut c = FeatureConfig {
            time_features: false,
            cyclical_features: false,
            lag_features: false,
            rolling_features: false,
            difference_features: false,
            interaction_features: false,
            ..FeatureConfig::default()
        };
        adjust(&mut c);
        c
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn calendar_features_encode_the_clock() {
        // Oct 1 2025 is a Wednesday, Oct 4 a Saturday
        let timestamps = vec![ts(1, 13, 30), ts(4, 6, 0)];
        let source = CanonicalTable::from_parts(
            timestamps,
            vec![Column::new("Power_MW", vec![1.0, 2.0])],
        )
        .unwrap();
        let engineer = FeatureEngineer::new(config(|c| c.time_features = true));
        let out = engineer.create_all_features(&source).unwrap();
        assert_eq!(out.column_values("hour").unwrap(), &[13.0, 6.0]);
        assert_eq!(out.column_values("day_of_week").unwrap(), &[2.0, 5.0]);
        assert_eq!(out.column_values("day_of_month").unwrap(), &[1.0, 4.0]);
        assert_eq!(out.column_values("month").unwrap(), &[10.0, 10.0]);
        assert_eq!(out.column_values("year").unwrap(), &[2025.0, 2025.0]);
        assert_eq!(out.column_values("is_weekend").unwrap(), &[0.0, 1.0]);
        assert_eq!(out.height(), source.height());
    }

    #[test]
    fn cyclical_features_wrap_the_period() {
        let source = CanonicalTable::from_parts(
            vec![ts(1, 6, 0)],
            vec![Column::new("Power_MW", vec![1.0])],
        )
        .unwrap();
        let engineer = FeatureEngineer::new(config(|c| c.cyclical_features = true));
        let out = engineer.create_all_features(&source).unwrap();
        // hour 6 of 24 is a quarter turn
        assert!(close(out.column_values("hour_sin").unwrap()[0], 1.0));
        assert!(close(out.column_values("hour_cos").unwrap()[0], 0.0));
        // month 10 of 12
        let expected = (2.0 * PI * 10.0 / 12.0).sin();
        assert!(close(out.column_values("month_sin").unwrap()[0], expected));
    }

    #[test]
    fn lag_features_shift_with_leading_nans() {
        let source = table(vec![("Power_MW", vec![1.0, 2.0, 3.0, 4.0, 5.0])]);
        let engineer = FeatureEngineer::new(config(|c| {
            c.lag_features = true;
            c.lag_offsets = vec![1, 3];
        }));
        let out = engineer.create_all_features(&source).unwrap();
        let lag1 = out.column_values("Power_MW_lag_1").unwrap();
        assert!(lag1[0].is_nan());
        assert_eq!(&lag1[1..], &[1.0, 2.0, 3.0, 4.0]);
        let lag3 = out.column_values("Power_MW_lag_3").unwrap();
        assert!(lag3[..3].iter().all(|v| v.is_nan()));
        assert_eq!(&lag3[3..], &[1.0, 2.0]);
        assert_eq!(out.height(), 5);
    }

    #[test]
    fn rolling_stats_honor_short_and_gappy_windows() {
        let source = table(vec![("Power_MW", vec![1.0, 2.0, 3.0, 4.0])]);
        let engineer = FeatureEngineer::new(config(|c| {
            c.rolling_features = true;
            c.rolling_windows = vec![3];
        }));
        let out = engineer.create_all_features(&source).unwrap();
        let mean = out.column_values("Power_MW_rolling_mean_3").unwrap();
        assert_eq!(mean, &[1.0, 1.5, 2.0, 3.0]);
        let std = out.column_values("Power_MW_rolling_std_3").unwrap();
        // a single observation has no sample deviation
        assert!(std[0].is_nan());
        assert!(close(std[1], (0.5_f64).sqrt()));
        assert!(close(std[2], 1.0));
        assert!(close(std[3], 1.0));

        let gappy = table(vec![("Power_MW", vec![1.0, f64::NAN, 3.0])]);
        let out = engineer.create_all_features(&gappy).unwrap();
        let mean = out.column_values("Power_MW_rolling_mean_3").unwrap();
        assert_eq!(mean[2], 2.0);
        let std = out.column_values("Power_MW_rolling_std_3").unwrap();
        assert!(std[1].is_nan());
    }

    #[test]
    fn difference_features_subtract_earlier_rows() {
        let source = table(vec![("Power_MW", vec![1.0, 3.0, 6.0])]);
        let engineer = FeatureEngineer::new(config(|c| {
            c.difference_features = true;
            c.difference_periods = vec![1, 2];
        }));
        let out = engineer.create_all_features(&source).unwrap();
        let d1 = out.column_values("Power_MW_diff_1").unwrap();
        assert!(d1[0].is_nan());
        assert_eq!(&d1[1..], &[2.0, 3.0]);
        let d2 = out.column_values("Power_MW_diff_2").unwrap();
        assert!(d2[0].is_nan() && d2[1].is_nan());
        assert_eq!(d2[2], 5.0);
    }

    #[test]
    fn interactions_pair_the_first_two_important_columns() {
        let source = table(vec![
            ("Power_MW", vec![2.0, 4.0, 6.0]),
            ("Irr_Plane", vec![1.0, 0.0, 2.0]),
        ]);
        let engineer = FeatureEngineer::new(config(|c| c.interaction_features = true));
        let out = engineer.create_all_features(&source).unwrap();
        let product = out.column_values("Power_MW_x_Irr_Plane").unwrap();
        assert_eq!(product, &[2.0, 0.0, 12.0]);
        let ratio = out.column_values("Power_MW_div_Irr_Plane").unwrap();
        assert_eq!(ratio[0], 2.0);
        assert!(ratio[1].is_nan());
        assert_eq!(ratio[2], 3.0);
    }

    #[test]
    fn explicit_target_overrides_role_lookup() {
        let source = table(vec![
            ("A_Power", vec![1.0, 2.0]),
            ("B_Power", vec![3.0, 4.0]),
        ]);
        let engineer = FeatureEngineer::new(config(|c| {
            c.lag_features = true;
            c.lag_offsets = vec![1];
        }))
        .with_target("B_Power");
        let out = engineer.create_all_features(&source).unwrap();
        assert!(out.column("B_Power_lag_1").is_some());
        assert!(out.column("A_Power_lag_1").is_none());
    }

    #[test]
    fn disabled_flags_add_nothing() {
        let source = table(vec![("Power_MW", vec![1.0, 2.0])]);
        let engineer = FeatureEngineer::new(config(|_| {}));
        let out = engineer.create_all_features(&source).unwrap();
        assert_eq!(out.width(), source.width());
    }

    #[test]
    fn empty_table_passes_through() {
        let engineer = FeatureEngineer::new(FeatureConfig::default());
        let out = engineer.create_all_features(&CanonicalTable::empty()).unwrap();
        assert_eq!(out.height(), 0);
    }

    #[test]
    fn full_default_run_keeps_every_row() {
        let n = 30;
        let values: Vec<f64> = (0..n).map(|i| (i as f64 / 3.0).sin() * 10.0).collect();
        let irr: Vec<f64> = (0..n).map(|i| i as f64).collect();
        let source = table(vec![("Power_MW", values), ("Irradiance", irr)]);
        let engineer = FeatureEngineer::new(FeatureConfig::default());
        let out = engineer.create_all_features(&source).unwrap();
        assert_eq!(out.height(), n);
        // calendar + cyclical + lags + rolling over both role columns
        let expected = 2 + 6 + 6 + 6 + 2 * 3 * 2;
        assert_eq!(out.width(), expected);
    }
}
