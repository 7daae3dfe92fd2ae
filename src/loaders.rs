use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;

use crate::header::HeaderResolver;
use crate::log_grouper::LogGrouper;
use crate::models::{
    parse_numeric_cell, parse_plant_timestamp, sanitize_column_name, CanonicalTable, Column,
    HeaderResolution, LogGroupKey,
};
use crate::raw::RawTable;

fn progress_bar(len: usize, message: &str) -> ProgressBar {
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );
    pb.set_message(message.to_string());
    pb
}

/// Canonicalize one spreadsheet report: resolve the header, parse timestamps
/// (bad ones drop the row), coerce everything else to f64, drop all-empty
/// data columns, and sort by time.
pub fn load_report_file(path: &Path) -> Result<CanonicalTable> {
    if !path.exists() {
        bail!("report file not found: {}", path.display());
    }
    let raw = RawTable::from_path(path)?;
    let resolution = HeaderResolver::new().resolve(&raw);
    if resolution.guessed {
        log::warn!(
            "{}: no 'Date Time' marker found, assuming header at row {}",
            path.display(),
            resolution.spec.marker_row
        );
    }
    canonicalize(&raw, &resolution)
}

fn canonicalize(raw: &RawTable, resolution: &HeaderResolution) -> Result<CanonicalTable> {
    let spec = &resolution.spec;
    let ts_col = match spec.timestamp_column {
        Some(col) => col,
        None => {
            log::warn!("no timestamp column resolved, returning empty table");
            return Ok(CanonicalTable::empty());
        }
    };
    let data_cols: Vec<(usize, String)> = spec
        .columns
        .iter()
        .filter(|(idx, _)| *idx != ts_col)
        .cloned()
        .collect();

    let mut timestamps = Vec::new();
    let mut values: Vec<Vec<f64>> = data_cols.iter().map(|_| Vec::new()).collect();
    let mut dropped = 0usize;
    for row in spec.data_start_row()..raw.height() {
        let ts = match parse_plant_timestamp(raw.cell(row, ts_col)) {
            Some(ts) => ts,
            None => {
                if !raw.row(row).iter().all(|c| c.is_empty()) {
                    dropped += 1;
                }
                continue;
            }
        };
        timestamps.push(ts);
        for (slot, (idx, _)) in data_cols.iter().enumerate() {
            values[slot].push(parse_numeric_cell(raw.cell(row, *idx)));
        }
    }
    if dropped > 0 {
        log::debug!("dropped {} rows with unparsable timestamps", dropped);
    }

    let mut columns = Vec::new();
    for ((_, name), vals) in data_cols.into_iter().zip(values) {
        // fully empty columns are placeholder tails in the export
        if !timestamps.is_empty() && vals.iter().all(|v| v.is_nan()) {
            continue;
        }
        columns.push(Column::new(name, vals));
    }
    let mut table = CanonicalTable::from_parts(timestamps, columns)?;
    table.sort_by_timestamp();
    Ok(table)
}

/// PV production forecast: tab-separated text with `Date`, `Time` and
/// `Power (MW)` columns. Output is exactly `[DateTime, Power_MW]`.
pub struct ForecastLoader {
    path: PathBuf,
}

impl ForecastLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn load(&self) -> Result<CanonicalTable> {
        if !self.path.exists() {
            bail!("forecast file not found: {}", self.path.display());
        }
        let raw = RawTable::from_delimited_path(&self.path, b'\t')?;
        if raw.height() == 0 {
            return Ok(CanonicalTable::empty());
        }
        let header = raw.row(0);
        let date_col = required_column(header, "Date", &self.path)?;
        let time_col = required_column(header, "Time", &self.path)?;
        let power_col = required_column(header, "Power (MW)", &self.path)?;

        let mut timestamps = Vec::new();
        let mut power = Vec::new();
        let mut dropped = 0usize;
        for row in 1..raw.height() {
            let text = format!("{} {}", raw.cell(row, date_col), raw.cell(row, time_col));
            match parse_plant_timestamp(&text) {
                Some(ts) => {
                    timestamps.push(ts);
                    power.push(parse_numeric_cell(raw.cell(row, power_col)));
                }
                None => {
                    if !raw.row(row).iter().all(|c| c.is_empty()) {
                        dropped += 1;
                    }
                }
            }
        }
        if dropped > 0 {
            log::debug!(
                "{}: dropped {} forecast rows with unparsable timestamps",
                self.path.display(),
                dropped
            );
        }
        let name = sanitize_column_name("Power (MW)");
        let mut table =
            CanonicalTable::from_parts(timestamps, vec![Column::new(name, power)])?;
        table.sort_by_timestamp();
        Ok(table)
    }
}

fn required_column(header: &[String], name: &str, path: &Path) -> Result<usize> {
    header
        .iter()
        .position(|c| c == name)
        .with_context(|| format!("{}: missing required column '{}'", path.display(), name))
}

/// Inverter power reports, exported as day-range files that together cover a
/// month. Files load in parallel and concatenate into one sorted table;
/// identical sanitization keeps the schema stable across files.
pub struct PowerReportsLoader {
    paths: Vec<PathBuf>,
}

impl PowerReportsLoader {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self { paths }
    }

    pub fn from_glob(pattern: &str) -> Result<Self> {
        let mut paths: Vec<PathBuf> = glob::glob(pattern)?.filter_map(|e| e.ok()).collect();
        paths.sort();
        Ok(Self { paths })
    }

    pub fn load(&self) -> Result<CanonicalTable> {
        if self.paths.is_empty() {
            bail!("no power report files given");
        }
        for path in &self.paths {
            if !path.exists() {
                bail!("report file not found: {}", path.display());
            }
        }
        let pb = progress_bar(self.paths.len(), "power reports");
        let tables: Vec<CanonicalTable> = self
            .paths
            .par_iter()
            .map(|path| {
                let table = load_report_file(path);
                pb.inc(1);
                table
            })
            .collect::<Result<Vec<_>>>()?;
        pb.finish_and_clear();

        let mut merged = CanonicalTable::empty();
        for table in &tables {
            merged.concat(table);
        }
        merged.sort_by_timestamp();
        Ok(merged)
    }
}

/// Weather station report, one `.xlsm` workbook.
pub struct WeatherReportsLoader {
    path: PathBuf,
}

impl WeatherReportsLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn load(&self) -> Result<CanonicalTable> {
        load_report_file(&self.path)
    }
}

/// Energy meter report, one `.xls` workbook.
pub struct EnergyReportsLoader {
    path: PathBuf,
}

impl EnergyReportsLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn load(&self) -> Result<CanonicalTable> {
        load_report_file(&self.path)
    }
}

/// Directory of multiplexed inverter log CSVs. Every file is demultiplexed
/// with `LogGrouper`; streams concatenate across files by key and come back
/// sorted, in first-seen key order.
pub struct InverterLogLoader {
    dir: PathBuf,
    log_types: Option<Vec<String>>,
}

impl InverterLogLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into(), log_types: None }
    }

    pub fn with_log_types(mut self, types: Vec<String>) -> Self {
        self.log_types = Some(types);
        self
    }

    pub fn load(&self) -> Result<Vec<(LogGroupKey, CanonicalTable)>> {
        if !self.dir.exists() {
            bail!("log directory not found: {}", self.dir.display());
        }
        let pattern = self.dir.join("*.csv").to_string_lossy().into_owned();
        let mut files: Vec<PathBuf> = glob::glob(&pattern)?.filter_map(|e| e.ok()).collect();
        files.sort();
        if files.is_empty() {
            log::warn!("no log files under {}", self.dir.display());
            return Ok(Vec::new());
        }

        let mut grouper = LogGrouper::new();
        if let Some(types) = &self.log_types {
            grouper = grouper.with_log_types(types);
        }
        let pb = progress_bar(files.len(), "inverter logs");
        let per_file: Vec<Vec<(LogGroupKey, CanonicalTable)>> = files
            .par_iter()
            .map(|path| {
                let raw = RawTable::from_csv_path(path)?;
                let groups = grouper.group(&raw);
                pb.inc(1);
                groups
            })
            .collect::<Result<Vec<_>>>()?;
        pb.finish_and_clear();

        let mut out: Vec<(LogGroupKey, CanonicalTable)> = Vec::new();
        for groups in per_file {
            for (key, table) in groups {
                match out.iter_mut().find(|(k, _)| *k == key) {
                    Some((_, existing)) => existing.concat(&table),
                    None => out.push((key, table)),
                }
            }
        }
        for (_, table) in &mut out {
            table.sort_by_timestamp();
        }
        Ok(out)
    }
}
