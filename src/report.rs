use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::NaiveDateTime;

use crate::cleaner::CleaningStats;
use crate::models::{CanonicalTable, CSV_TIMESTAMP_FORMAT};
use crate::roles::{ColumnRole, RoleSchema};
use crate::stats::{nan_max, nan_mean, nan_min, nan_pearson, nan_quantile, nan_std};

const CORRELATION_COLUMNS: usize = 5;

/// Markdown summary of a processed table: shape, per-column stats,
/// correlations against the target, and an efficiency proxy.
pub struct SummaryReport<'a> {
    table: &'a CanonicalTable,
    schema: RoleSchema,
    target: Option<String>,
    cleaning: Option<&'a [(String, CleaningStats)]>,
}

impl<'a> SummaryReport<'a> {
    pub fn new(table: &'a CanonicalTable) -> Self {
        Self {
            table,
            schema: RoleSchema::standard(),
            target: None,
            cleaning: None,
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

    pub fn with_cleaning_stats(mut self, stats: &'a [(String, CleaningStats)]) -> Self {
        self.cleaning = Some(stats);
        self
    }

    pub fn render(&self) -> Result<String> {
        let mut out = String::new();
        self.write_overview(&mut out)?;
        self.write_column_table(&mut out)?;
        self.write_correlations(&mut out)?;
        self.write_efficiency(&mut out)?;
        self.write_cleaning(&mut out)?;
        Ok(out)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = self.render()?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
        }
        fs::write(path, content).with_context(|| format!("writing {}", path.display()))?;
        println!("  📝 {}", path.display());
        Ok(())
    }

    fn resolved_target(&self) -> Option<String> {
        if let Some(name) = &self.target {
            if self.table.column(name).is_some() {
                return Some(name.clone());
            }
        }
        self.schema.first_with_role(self.table, ColumnRole::Power)
    }

    fn write_overview(&self, out: &mut String) -> Result<()> {
        writeln!(out, "# PV Plant Data Report")?;
        writeln!(
            out,
            "\nGenerated: {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
        )?;
        writeln!(out)?;
        writeln!(out, "## Dataset Overview")?;
        writeln!(out)?;
        writeln!(out, "- **Rows**: {}", self.table.height())?;
        writeln!(out, "- **Columns**: {}", self.table.width())?;
        if let Some((start, end)) = self.table.time_range() {
            writeln!(
                out,
                "- **Time range**: {} to {}",
                start.format(CSV_TIMESTAMP_FORMAT),
                end.format(CSV_TIMESTAMP_FORMAT)
            )?;
        }
        if let Some(cadence) = median_cadence_seconds(self.table.timestamps()) {
            writeln!(out, "- **Median cadence**: {:.0} s", cadence)?;
        }
        writeln!(out)?;
        Ok(())
    }

    fn write_column_table(&self, out: &mut String) -> Result<()> {
        writeln!(out, "## Columns")?;
        writeln!(out)?;
        writeln!(out, "| Column | Count | Missing % | Mean | Std | Min | Max |")?;
        writeln!(out, "|--------|-------|-----------|------|-----|-----|-----|")?;
        let height = self.table.height();
        for col in self.table.columns() {
            let missing = col.missing_count();
            let count = height - missing;
            let missing_pct = if height == 0 {
                0.0
            } else {
                100.0 * missing as f64 / height as f64
            };
            writeln!(
                out,
                "| {} | {} | {:.1}% | {} | {} | {} | {} |",
                col.name,
                count,
                missing_pct,
                fmt_stat(nan_mean(&col.values)),
                fmt_stat(nan_std(&col.values)),
                fmt_stat(nan_min(&col.values)),
                fmt_stat(nan_max(&col.values)),
            )?;
        }
        writeln!(out)?;
        Ok(())
    }

    fn write_correlations(&self, out: &mut String) -> Result<()> {
        writeln!(out, "## Correlations")?;
        writeln!(out)?;
        let target = match self.resolved_target() {
            Some(t) => t,
            None => {
                writeln!(out, "_No target column identified._")?;
                writeln!(out)?;
                return Ok(());
            }
        };
        let target_values = match self.table.column_values(&target) {
            Some(v) => v,
            None => return Ok(()),
        };
        let others: Vec<String> = self
            .schema
            .important_columns(self.table, CORRELATION_COLUMNS + 1)
            .into_iter()
            .filter(|c| *c != target)
            .take(CORRELATION_COLUMNS)
            .collect();
        if others.is_empty() {
            writeln!(out, "_No role-bearing columns to correlate with {}._", target)?;
            writeln!(out)?;
            return Ok(());
        }
        writeln!(out, "Pearson correlation against **{}**:", target)?;
        writeln!(out)?;
        writeln!(out, "| Column | r |")?;
        writeln!(out, "|--------|---|")?;
        for name in others {
            if let Some(values) = self.table.column_values(&name) {
                writeln!(out, "| {} | {} |", name, fmt_stat(nan_pearson(target_values, values)))?;
            }
        }
        writeln!(out)?;
        Ok(())
    }

    /// Mean power over mean irradiance, when both roles are present. A crude
    /// plant efficiency proxy, mainly useful for spotting month-over-month
    /// drift.
    fn write_efficiency(&self, out: &mut String) -> Result<()> {
        let power = self.schema.first_with_role(self.table, ColumnRole::Power);
        let irradiance = self.schema.first_with_role(self.table, ColumnRole::Irradiance);
        let (power, irradiance) = match (power, irradiance) {
            (Some(p), Some(i)) => (p, i),
            _ => return Ok(()),
        };
        let mean_power = self
            .table
            .column_values(&power)
            .map(nan_mean)
            .unwrap_or(f64::NAN);
        let mean_irr = self
            .table
            .column_values(&irradiance)
            .map(nan_mean)
            .unwrap_or(f64::NAN);
        writeln!(out, "## Efficiency Proxy")?;
        writeln!(out)?;
        if mean_irr.is_nan() || mean_power.is_nan() || mean_irr.abs() < 1e-12 {
            writeln!(out, "_Insufficient data for {} / {}._", power, irradiance)?;
        } else {
            writeln!(
                out,
                "- **Mean {} / mean {}**: {:.4}",
                power,
                irradiance,
                mean_power / mean_irr
            )?;
        }
        writeln!(out)?;
        Ok(())
    }

    fn write_cleaning(&self, out: &mut String) -> Result<()> {
        let stats = match self.cleaning {
            Some(s) if !s.is_empty() => s,
            _ => return Ok(()),
        };
        writeln!(out, "## Cleaning Summary")?;
        writeln!(out)?;
        writeln!(
            out,
            "| Source | Rows in | Rows out | Duplicates | Cells filled | Rows dropped | Outliers |"
        )?;
        writeln!(
            out,
            "|--------|---------|----------|------------|--------------|--------------|----------|"
        )?;
        for (name, s) in stats {
            writeln!(
                out,
                "| {} | {} | {} | {} | {} | {} | {} |",
                name,
                s.rows_in,
                s.rows_out,
                s.duplicates_removed,
                s.missing_cells_filled,
                s.rows_dropped_missing,
                s.outliers_replaced
            )?;
        }
        writeln!(out)?;
        Ok(())
    }
}

fn fmt_stat(v: f64) -> String {
    if v.is_nan() {
        "-".to_string()
    } else {
        format!("{:.3}", v)
    }
}

fn median_cadence_seconds(timestamps: &[NaiveDateTime]) -> Option<f64> {
    if timestamps.len() < 2 {
        return None;
    }
    let mut sorted = timestamps.to_vec();
    sorted.sort();
    let gaps: Vec<f64> = sorted
        .windows(2)
        .map(|w| (w[1] - w[0]).num_seconds() as f64)
        .filter(|g| *g > 0.0)
        .collect();
    let median = nan_quantile(&gaps, 0.5);
    if median.is_nan() {
        None
    } else {
        Some(median)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Column;
    use chrono::NaiveDate;

    fn ts(m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 10, 1)
            .unwrap()
            .and_hms_opt(0, m, 0)
            .unwrap()
    }

    fn sample_table() -> CanonicalTable {
        CanonicalTable::from_parts(
            vec![ts(0), ts(10), ts(20), ts(30)],
            vec![
                Column::new("Power_MW", vec![1.0, 2.0, 3.0, 4.0]),
                Column::new("Irradiance", vec![2.0, 4.0, 6.0, 8.0]),
                Column::new("raw", vec![5.0, f64::NAN, 7.0, 8.0]),
            ],
        )
        .unwrap()
    }

    #[test]
    fn report_covers_shape_stats_and_cadence() {
        let table = sample_table();
        let report = SummaryReport::new(&table).render().unwrap();
        assert!(report.starts_with("# PV Plant Data Report"));
        assert!(report.contains("- **Rows**: 4"));
        assert!(report.contains("- **Columns**: 3"));
        assert!(report.contains("2025-10-01 00:00:00 to 2025-10-01 00:30:00"));
        assert!(report.contains("- **Median cadence**: 600 s"));
        // the raw column has one missing cell out of four
        assert!(report.contains("| raw | 3 | 25.0% |"));
    }

    #[test]
    fn correlations_use_the_power_target() {
        let table = sample_table();
        let report = SummaryReport::new(&table).render().unwrap();
        assert!(report.contains("Pearson correlation against **Power_MW**"));
        // irradiance is an exact multiple of power
        assert!(report.contains("| Irradiance | 1.000 |"));
    }

    #[test]
    fn efficiency_proxy_divides_means() {
        let table = sample_table();
        let report = SummaryReport::new(&table).render().unwrap();
        // mean power 2.5 over mean irradiance 5.0
        assert!(report.contains("- **Mean Power_MW / mean Irradiance**: 0.5000"));
    }

    #[test]
    fn missing_roles_degrade_gracefully() {
        let table = CanonicalTable::from_parts(
            vec![ts(0), ts(10)],
            vec![Column::new("a", vec![1.0, 2.0])],
        )
        .unwrap();
        let report = SummaryReport::new(&table).render().unwrap();
        assert!(report.contains("_No target column identified._"));
        assert!(!report.contains("## Efficiency Proxy"));
    }

    #[test]
    fn cleaning_stats_render_as_a_table() {
        let table = sample_table();
        let stats = vec![(
            "forecast".to_string(),
            CleaningStats {
                rows_in: 10,
                rows_out: 9,
                duplicates_removed: 1,
                ..Default::default()
            },
        )];
        let report = SummaryReport::new(&table)
            .with_cleaning_stats(&stats)
            .render()
            .unwrap();
        assert!(report.contains("## Cleaning Summary"));
        assert!(report.contains("| forecast | 10 | 9 | 1 | 0 | 0 | 0 |"));
    }

    #[test]
    fn explicit_target_wins_over_roles() {
        let table = sample_table();
        let report = SummaryReport::new(&table)
            .with_target("Irradiance")
            .render()
            .unwrap();
        assert!(report.contains("Pearson correlation against **Irradiance**"));
        assert!(report.contains("| Power_MW | 1.000 |"));
    }

    #[test]
    fn save_writes_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let table = sample_table();
        let path = dir.path().join("reports/summary.md");
        SummaryReport::new(&table).save(&path).unwrap();
        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("# PV Plant Data Report"));
    }
}
