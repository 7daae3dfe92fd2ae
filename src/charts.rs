use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{Duration, NaiveDateTime, Timelike};
use plotters::prelude::*;

use crate::models::CanonicalTable;
use crate::roles::{ColumnRole, RoleSchema};
use crate::stats::{nan_max, nan_min};

pub const DEFAULT_CHART_CAP: usize = 10;
const OVERVIEW_COLUMNS: usize = 5;
const CHART_SIZE: (u32, u32) = (800, 600);

/// Renders PNG charts for a canonical table. Chart failures never stop a
/// pipeline run; `render_all` downgrades them to warnings.
pub struct ChartRenderer {
    out_dir: PathBuf,
    schema: RoleSchema,
    cap: usize,
}

impl ChartRenderer {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
            schema: RoleSchema::standard(),
            cap: DEFAULT_CHART_CAP,
        }
    }

    pub fn with_cap(mut self, cap: usize) -> Self {
        self.cap = cap;
        self
    }

    pub fn with_schema(mut self, schema: RoleSchema) -> Self {
        self.schema = schema;
        self
    }

    pub fn render_all(&self, table: &CanonicalTable) -> Vec<PathBuf> {
        let mut written = Vec::new();
        match self.render_column_charts(table) {
            Ok(mut paths) => written.append(&mut paths),
            Err(err) => log::warn!("column charts failed: {:#}", err),
        }
        match self.render_overview_chart(table) {
            Ok(Some(path)) => written.push(path),
            Ok(None) => {}
            Err(err) => log::warn!("overview chart failed: {:#}", err),
        }
        match self.render_daily_profile(table) {
            Ok(Some(path)) => written.push(path),
            Ok(None) => {}
            Err(err) => log::warn!("daily profile chart failed: {:#}", err),
        }
        written
    }

    /// One time-series line per column, NaN cells dropped from the line,
    /// all-NaN columns skipped, capped.
    pub fn render_column_charts(&self, table: &CanonicalTable) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(&self.out_dir)?;
        let mut written = Vec::new();
        for (name, points) in renderable_columns(table, self.cap) {
            let path = self.out_dir.join(chart_file_name(&name));
            match self.line_chart(&path, &name, &points) {
                Ok(()) => {
                    println!("  📈 {}", path.display());
                    written.push(path);
                }
                Err(err) => log::warn!("chart for '{}' failed: {:#}", name, err),
            }
        }
        Ok(written)
    }

    /// The role-selected important columns on one canvas, min-max
    /// normalized so different units share an axis.
    pub fn render_overview_chart(&self, table: &CanonicalTable) -> Result<Option<PathBuf>> {
        let mut series = Vec::new();
        for name in self.schema.important_columns(table, OVERVIEW_COLUMNS) {
            let values = match table.column_values(&name) {
                Some(v) => v,
                None => continue,
            };
            let normalized = match normalize(values) {
                Some(v) => v,
                None => {
                    log::debug!("skipping flat or empty column '{}'", name);
                    continue;
                }
            };
            let points = series_points(table.timestamps(), &normalized);
            if !points.is_empty() {
                series.push((name, points));
            }
        }
        if series.is_empty() {
            return Ok(None);
        }

        fs::create_dir_all(&self.out_dir)?;
        let path = self.out_dir.join("overview.png");
        let min_t = match series.iter().flat_map(|(_, p)| p.iter().map(|(t, _)| *t)).min() {
            Some(t) => t,
            None => return Ok(None),
        };
        let max_t = match series.iter().flat_map(|(_, p)| p.iter().map(|(t, _)| *t)).max() {
            Some(t) => t,
            None => return Ok(None),
        };
        let (min_t, max_t) = pad_time_range(min_t, max_t);

        let root = BitMapBackend::new(&path, CHART_SIZE).into_drawing_area();
        root.fill(&WHITE)?;
        let mut chart = ChartBuilder::on(&root)
            .caption("Source Overview (normalized)", ("sans-serif", 30).into_font())
            .margin(10)
            .x_label_area_size(40)
            .y_label_area_size(70)
            .build_cartesian_2d(RangedDateTime::from(min_t..max_t), -0.05..1.05_f64)?;
        chart
            .configure_mesh()
            .x_desc("Time")
            .y_desc("Normalized value")
            .draw()?;
        for (idx, (name, points)) in series.iter().enumerate() {
            let color = Palette99::pick(idx);
            chart
                .draw_series(LineSeries::new(points.iter().copied(), &color))?
                .label(name.as_str())
                .legend(move |(x, y)| {
                    PathElement::new(vec![(x, y), (x + 10, y)], Palette99::pick(idx))
                });
        }
        chart
            .configure_series_labels()
            .background_style(&WHITE.mix(0.8))
            .border_style(&BLACK)
            .draw()?;
        root.present()?;
        drop(chart);
        drop(root);
        println!("  📈 {}", path.display());
        Ok(Some(path))
    }

    /// Hour-of-day mean of the first power column.
    pub fn render_daily_profile(&self, table: &CanonicalTable) -> Result<Option<PathBuf>> {
        let target = match self.schema.first_with_role(table, ColumnRole::Power) {
            Some(name) => name,
            None => {
                log::debug!("no power column, skipping daily profile");
                return Ok(None);
            }
        };
        let values = match table.column_values(&target) {
            Some(v) => v,
            None => return Ok(None),
        };
        let profile = hourly_means(table.timestamps(), values);
        if profile.is_empty() {
            return Ok(None);
        }

        fs::create_dir_all(&self.out_dir)?;
        let path = self.out_dir.join("daily_profile.png");
        let min_v = profile.iter().map(|(_, v)| *v).fold(f64::INFINITY, f64::min);
        let max_v = profile.iter().map(|(_, v)| *v).fold(f64::NEG_INFINITY, f64::max);
        let pad = ((max_v - min_v) * 0.05).max(1e-6);

        let root = BitMapBackend::new(&path, CHART_SIZE).into_drawing_area();
        root.fill(&WHITE)?;
        let mut chart = ChartBuilder::on(&root)
            .caption(
                format!("Mean {} by hour", target),
                ("sans-serif", 30).into_font(),
            )
            .margin(10)
            .x_label_area_size(40)
            .y_label_area_size(70)
            .build_cartesian_2d(0u32..24u32, (min_v - pad)..(max_v + pad))?;
        chart
            .configure_mesh()
            .x_desc("Hour of day")
            .y_desc(target.as_str())
            .draw()?;
        chart.draw_series(LineSeries::new(
            profile.iter().map(|(h, v)| (*h, *v)),
            &BLUE,
        ))?;
        root.present()?;
        drop(chart);
        drop(root);
        println!("  📈 {}", path.display());
        Ok(Some(path))
    }

    fn line_chart(
        &self,
        path: &Path,
        name: &str,
        points: &[(NaiveDateTime, f64)],
    ) -> Result<()> {
        let min_t = match points.iter().map(|(t, _)| *t).min() {
            Some(t) => t,
            None => return Ok(()),
        };
        let max_t = match points.iter().map(|(t, _)| *t).max() {
            Some(t) => t,
            None => return Ok(()),
        };
        let (min_t, max_t) = pad_time_range(min_t, max_t);
        let min_v = points.iter().map(|(_, v)| *v).fold(f64::INFINITY, f64::min);
        let max_v = points.iter().map(|(_, v)| *v).fold(f64::NEG_INFINITY, f64::max);
        let pad = ((max_v - min_v) * 0.05).max(1e-6);

        let root = BitMapBackend::new(path, CHART_SIZE).into_drawing_area();
        root.fill(&WHITE)?;
        let mut chart = ChartBuilder::on(&root)
            .caption(name, ("sans-serif", 30).into_font())
            .margin(10)
            .x_label_area_size(40)
            .y_label_area_size(70)
            .build_cartesian_2d(RangedDateTime::from(min_t..max_t), (min_v - pad)..(max_v + pad))?;
        chart.configure_mesh().x_desc("Time").y_desc(name).draw()?;
        chart.draw_series(LineSeries::new(points.iter().copied(), &BLUE))?;
        root.present()?;
        Ok(())
    }
}

fn pad_time_range(min_t: NaiveDateTime, max_t: NaiveDateTime) -> (NaiveDateTime, NaiveDateTime) {
    if min_t == max_t {
        (min_t - Duration::minutes(1), max_t + Duration::minutes(1))
    } else {
        (min_t, max_t)
    }
}

fn chart_file_name(column: &str) -> String {
    format!("{}.png", column.replace("/", "_").replace(" ", "_"))
}

fn series_points(timestamps: &[NaiveDateTime], values: &[f64]) -> Vec<(NaiveDateTime, f64)> {
    timestamps
        .iter()
        .zip(values)
        .filter(|(_, v)| !v.is_nan())
        .map(|(t, v)| (*t, *v))
        .collect()
}

fn renderable_columns(
    table: &CanonicalTable,
    cap: usize,
) -> Vec<(String, Vec<(NaiveDateTime, f64)>)> {
    let mut out = Vec::new();
    for col in table.columns() {
        if out.len() == cap {
            break;
        }
        let points = series_points(table.timestamps(), &col.values);
        if points.is_empty() {
            log::debug!("skipping empty column '{}'", col.name);
            continue;
        }
        out.push((col.name.clone(), points));
    }
    out
}

/// Min-max normalize to [0, 1]; None when the column is flat or has no
/// finite values. NaN cells stay NaN.
fn normalize(values: &[f64]) -> Option<Vec<f64>> {
    let min = nan_min(values);
    let max = nan_max(values);
    if !min.is_finite() || !max.is_finite() {
        return None;
    }
    let span = max - min;
    if span.abs() < f64::EPSILON {
        return None;
    }
    Some(
        values
            .iter()
            .map(|v| if v.is_nan() { f64::NAN } else { (v - min) / span })
            .collect(),
    )
}

fn hourly_means(timestamps: &[NaiveDateTime], values: &[f64]) -> Vec<(u32, f64)> {
    let mut sums = [0.0_f64; 24];
    let mut counts = [0_usize; 24];
    for (ts, v) in timestamps.iter().zip(values) {
        if v.is_nan() {
            continue;
        }
        let hour = ts.hour() as usize;
        sums[hour] += v;
        counts[hour] += 1;
    }
    (0..24)
        .filter(|&h| counts[h] > 0)
        .map(|h| (h as u32, sums[h] / counts[h] as f64))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Column;
    use chrono::NaiveDate;

    fn ts(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 10, 1)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[test]
    fn series_points_drop_nan_cells() {
        let stamps = vec![ts(0, 0), ts(0, 1), ts(0, 2)];
        let points = series_points(&stamps, &[1.0, f64::NAN, 3.0]);
        assert_eq!(points, vec![(ts(0, 0), 1.0), (ts(0, 2), 3.0)]);
    }

    #[test]
    fn renderable_columns_skip_all_nan_and_honor_the_cap() {
        let stamps = vec![ts(0, 0), ts(0, 1)];
        let table = CanonicalTable::from_parts(
            stamps,
            vec![
                Column::new("gaps_only", vec![f64::NAN, f64::NAN]),
                Column::new("b", vec![1.0, 2.0]),
                Column::new("c", vec![3.0, 4.0]),
                Column::new("d", vec![5.0, 6.0]),
            ],
        )
        .unwrap();
        let cols = renderable_columns(&table, 2);
        let names: Vec<_> = cols.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["b", "c"]);
    }

    #[test]
    fn normalize_maps_to_unit_range_and_keeps_nan() {
        let n = normalize(&[0.0, f64::NAN, 10.0, 5.0]).unwrap();
        assert_eq!(n[0], 0.0);
        assert!(n[1].is_nan());
        assert_eq!(n[2], 1.0);
        assert_eq!(n[3], 0.5);
        assert!(normalize(&[3.0, 3.0]).is_none());
        assert!(normalize(&[f64::NAN, f64::NAN]).is_none());
    }

    #[test]
    fn hourly_means_average_within_each_hour() {
        let stamps = vec![ts(0, 0), ts(0, 30), ts(1, 0), ts(2, 0)];
        let means = hourly_means(&stamps, &[1.0, 3.0, 5.0, f64::NAN]);
        assert_eq!(means, vec![(0, 2.0), (1, 5.0)]);
    }

    #[test]
    fn chart_file_names_are_path_safe() {
        assert_eq!(chart_file_name("Power_MW"), "Power_MW.png");
        assert_eq!(chart_file_name("BLOCK1 INV/1"), "BLOCK1_INV_1.png");
    }
}
