use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Datelike;

use crate::loaders::load_report_file;
use crate::models::{sanitize_column_name, CanonicalTable};

/// Split a table into one sub-table per calendar month, chronologically.
/// With a year given, rows from other years are left out entirely.
pub fn split_by_month(
    table: &CanonicalTable,
    year: Option<i32>,
) -> Vec<((i32, u32), CanonicalTable)> {
    let height = table.height();
    let mut buckets: BTreeMap<(i32, u32), Vec<bool>> = BTreeMap::new();
    for (i, ts) in table.timestamps().iter().enumerate() {
        let key = (ts.year(), ts.month());
        if year.map_or(false, |y| y != key.0) {
            continue;
        }
        buckets.entry(key).or_insert_with(|| vec![false; height])[i] = true;
    }
    buckets
        .into_iter()
        .map(|(key, mask)| {
            let mut part = table.clone();
            part.retain_rows(&mask);
            (key, part)
        })
        .collect()
}

/// Row count per (year, month), chronologically.
pub fn monthly_counts(table: &CanonicalTable) -> Vec<((i32, u32), usize)> {
    let mut counts: BTreeMap<(i32, u32), usize> = BTreeMap::new();
    for ts in table.timestamps() {
        *counts.entry((ts.year(), ts.month())).or_insert(0) += 1;
    }
    counts.into_iter().collect()
}

/// Write one CSV per month as `{base_name}_{year}_{month:02}.csv` and
/// return the written paths.
pub fn write_monthly(
    table: &CanonicalTable,
    out_dir: &Path,
    base_name: &str,
    year: Option<i32>,
) -> Result<Vec<PathBuf>> {
    let parts = split_by_month(table, year);
    if parts.is_empty() {
        log::warn!("no rows to split for '{}'", base_name);
        return Ok(Vec::new());
    }
    fs::create_dir_all(out_dir)
        .with_context(|| format!("creating {}", out_dir.display()))?;
    let mut written = Vec::with_capacity(parts.len());
    for ((y, m), part) in &parts {
        let path = out_dir.join(format!("{}_{}_{:02}.csv", base_name, y, m));
        part.to_csv(&path)?;
        println!("  📅 {} ({} rows)", path.display(), part.height());
        written.push(path);
    }
    Ok(written)
}

/// Load a raw report and write its monthly CSVs. The base name comes from
/// the report's file stem, sanitized the same way column names are.
pub fn split_report_file(
    path: &Path,
    out_dir: &Path,
    year: Option<i32>,
) -> Result<Vec<PathBuf>> {
    let table = load_report_file(path)?;
    println!(
        "  📄 {}: {} rows, {} columns",
        path.display(),
        table.height(),
        table.width()
    );
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("report");
    let mut base = sanitize_column_name(stem);
    if base.is_empty() {
        base = "report".to_string();
    }
    write_monthly(&table, out_dir, &base, year)
}
