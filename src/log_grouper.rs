use std::collections::HashMap;

use anyhow::Result;

use crate::models::{
    dedup_column_names, parse_numeric_cell, parse_plant_timestamp, sanitize_column_name,
    CanonicalTable, Column, LogGroupKey,
};
use crate::raw::RawTable;

/// The inverter firmware multiplexes these streams into one file. Anything
/// else in the log-type cell is noise and its rows are dropped.
pub const RECOGNIZED_LOG_TYPES: [&str; 11] = [
    "APS Ctrl Trig",
    "APS Energy",
    "APS Stat 10s",
    "APS Stat 60s",
    "APS Stat Trig",
    "APS Switching Cycles",
    "APU Ctrl Trig",
    "APU Energy",
    "APU Stat 10s",
    "APU Stat 60s",
    "APU Stat Trig",
];

/// Demultiplexes one inverter log file. Rows look like
/// `[log_type, system, timestamp, values...]`; a header region near the top
/// declares the column labels of each `(log_type, system)` stream, and the
/// data block starts at a fixed row offset.
pub struct LogGrouper {
    header_scan_end: usize,
    data_start_row: usize,
    log_types: Option<Vec<String>>,
}

impl Default for LogGrouper {
    fn default() -> Self {
        Self {
            header_scan_end: 15,
            data_start_row: 12,
            log_types: None,
        }
    }
}

impl LogGrouper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict grouping to a subset of the recognized log types.
    pub fn with_log_types<S: AsRef<str>>(mut self, types: &[S]) -> Self {
        self.log_types = Some(types.iter().map(|t| t.as_ref().to_string()).collect());
        self
    }

    /// Split the file into per-stream tables, in header discovery order.
    /// Each table is timestamp-parsed, sorted and numerically coerced.
    pub fn group(&self, raw: &RawTable) -> Result<Vec<(LogGroupKey, CanonicalTable)>> {
        let headers = self.discover_headers(raw);
        if headers.is_empty() {
            return Ok(Vec::new());
        }
        let index: HashMap<(&str, &str), usize> = headers
            .iter()
            .enumerate()
            .map(|(i, (key, _))| ((key.log_type.as_str(), key.system.as_str()), i))
            .collect();

        let mut timestamps: Vec<Vec<chrono::NaiveDateTime>> =
            headers.iter().map(|_| Vec::new()).collect();
        let mut values: Vec<Vec<Vec<f64>>> = headers
            .iter()
            .map(|(_, cols)| cols.iter().map(|_| Vec::new()).collect())
            .collect();
        let mut dropped_unmatched = 0usize;
        let mut dropped_bad_timestamp = 0usize;

        for row in self.data_start_row..raw.height() {
            let slot = match index.get(&(raw.cell(row, 0), raw.cell(row, 1))) {
                Some(&slot) => slot,
                None => {
                    dropped_unmatched += 1;
                    continue;
                }
            };
            let ts = match parse_plant_timestamp(raw.cell(row, 2)) {
                Some(ts) => ts,
                None => {
                    dropped_bad_timestamp += 1;
                    continue;
                }
            };
            timestamps[slot].push(ts);
            let width = values[slot].len();
            for col in 0..width {
                values[slot][col].push(parse_numeric_cell(raw.cell(row, 3 + col)));
            }
        }
        if dropped_unmatched > 0 || dropped_bad_timestamp > 0 {
            log::debug!(
                "log grouping dropped {} unmatched and {} bad-timestamp rows",
                dropped_unmatched,
                dropped_bad_timestamp
            );
        }

        let mut out = Vec::with_capacity(headers.len());
        for (slot, (key, cols)) in headers.into_iter().enumerate() {
            let columns = cols
                .into_iter()
                .zip(std::mem::take(&mut values[slot]))
                .map(|(name, vals)| Column::new(name, vals))
                .collect();
            let mut table =
                CanonicalTable::from_parts(std::mem::take(&mut timestamps[slot]), columns)?;
            table.sort_by_timestamp();
            out.push((key, table));
        }
        Ok(out)
    }

    /// Scan the header region for stream declarations. A declaration row has
    /// a recognized log type in cell 0 and no timestamp in cell 2 (a
    /// timestamp there means the row is data that strayed into the window).
    /// The first declaration of a key wins.
    fn discover_headers(&self, raw: &RawTable) -> Vec<(LogGroupKey, Vec<String>)> {
        let mut headers: Vec<(LogGroupKey, Vec<String>)> = Vec::new();
        for row in 1..self.header_scan_end.min(raw.height()) {
            let log_type = raw.cell(row, 0);
            if !RECOGNIZED_LOG_TYPES.contains(&log_type) {
                continue;
            }
            if let Some(filter) = &self.log_types {
                if !filter.iter().any(|t| t == log_type) {
                    continue;
                }
            }
            if parse_plant_timestamp(raw.cell(row, 2)).is_some() {
                continue;
            }
            let key = LogGroupKey::new(log_type, raw.cell(row, 1));
            if headers.iter().any(|(k, _)| *k == key) {
                log::debug!("duplicate header for {:?} ignored", key);
                continue;
            }
            let mut labels = Vec::new();
            let mut col = 3;
            loop {
                let cell = raw.cell(row, col);
                if cell.is_empty() {
                    break;
                }
                labels.push(sanitize_column_name(cell));
                col += 1;
            }
            if labels.is_empty() {
                continue;
            }
            headers.push((key, dedup_column_names(&labels)));
        }
        headers
    }
}
