use std::collections::HashSet;
use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Canonical name of the time axis in every serialized table.
pub const TIMESTAMP_COLUMN: &str = "DateTime";

/// Serialization format used by `to_csv` / accepted back by the parsers.
pub const CSV_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// Plant exports are day-first; the 10s log streams carry seconds.
const TIMESTAMP_FORMATS: &[&str] = &[
    "%d/%m/%Y %H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
];

/// Parse a timestamp cell in any of the plant's known formats.
pub fn parse_plant_timestamp(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
}

/// Coerce a cell to f64; empty or unparsable cells become NaN.
pub fn parse_numeric_cell(text: &str) -> f64 {
    let text = text.trim();
    if text.is_empty() {
        return f64::NAN;
    }
    text.parse::<f64>().unwrap_or(f64::NAN)
}

/// Normalize a raw header label: `Power (MW)` -> `Power_MW`, `INV#1` -> `INV1`.
pub fn sanitize_column_name(raw: &str) -> String {
    let mut cleaned = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '#' | '%' | '°' | '"' | '\'' => {}
            '(' | ')' | '[' | ']' | '/' | '\\' | ',' | ';' => cleaned.push(' '),
            _ => cleaned.push(c),
        }
    }
    cleaned.split_whitespace().collect::<Vec<_>>().join("_")
}

/// True for any label that denotes the time axis (`Date Time`, `TimeStamp`, ...).
pub fn is_timestamp_name(name: &str) -> bool {
    let normalized: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase();
    matches!(normalized.as_str(), "datetime" | "date" | "time" | "timestamp")
}

/// Make names unique by suffixing repeats with `_2`, `_3`, ...
/// The first occurrence keeps the bare name.
pub fn dedup_column_names(names: &[String]) -> Vec<String> {
    let mut used: HashSet<String> = HashSet::new();
    let mut out = Vec::with_capacity(names.len());
    for name in names {
        if used.insert(name.clone()) {
            out.push(name.clone());
            continue;
        }
        let mut n = 2;
        loop {
            let candidate = format!("{}_{}", name, n);
            if used.insert(candidate.clone()) {
                out.push(candidate);
                break;
            }
            n += 1;
        }
    }
    out
}

/// A named numeric column. NaN is the missing-value sentinel.
#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub values: Vec<f64>,
}

impl Column {
    pub fn new(name: impl Into<String>, values: Vec<f64>) -> Self {
        Self { name: name.into(), values }
    }

    pub fn missing_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_nan()).count()
    }
}

/// The typed inter-stage contract: a time axis plus named numeric columns.
///
/// Construction validates that every column matches the axis length and that
/// names are unique and non-empty, so downstream stages can rely on the join
/// key existing instead of checking for a "DateTime" column by name.
#[derive(Debug, Clone, Default)]
pub struct CanonicalTable {
    timestamps: Vec<NaiveDateTime>,
    columns: Vec<Column>,
}

impl CanonicalTable {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_parts(timestamps: Vec<NaiveDateTime>, columns: Vec<Column>) -> Result<Self> {
        let mut seen = HashSet::new();
        for col in &columns {
            if col.name.is_empty() {
                bail!("column with empty name");
            }
            if !seen.insert(col.name.clone()) {
                bail!("duplicate column name '{}'", col.name);
            }
            if col.values.len() != timestamps.len() {
                bail!(
                    "column '{}' has {} values for {} timestamps",
                    col.name,
                    col.values.len(),
                    timestamps.len()
                );
            }
        }
        Ok(Self { timestamps, columns })
    }

    pub fn height(&self) -> usize {
        self.timestamps.len()
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn timestamps(&self) -> &[NaiveDateTime] {
        &self.timestamps
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_values(&self, name: &str) -> Option<&[f64]> {
        self.column(name).map(|c| c.values.as_slice())
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Append a new column. Fails on a name collision or length mismatch.
    pub fn add_column(&mut self, name: impl Into<String>, values: Vec<f64>) -> Result<()> {
        let name = name.into();
        if name.is_empty() {
            bail!("column with empty name");
        }
        if self.column(&name).is_some() {
            bail!("duplicate column name '{}'", name);
        }
        if values.len() != self.timestamps.len() {
            bail!(
                "column '{}' has {} values for {} timestamps",
                name,
                values.len(),
                self.timestamps.len()
            );
        }
        self.columns.push(Column { name, values });
        Ok(())
    }

    /// Keep only the rows whose mask entry is true.
    pub fn retain_rows(&mut self, keep: &[bool]) {
        debug_assert_eq!(keep.len(), self.height());
        let mut iter = keep.iter();
        self.timestamps.retain(|_| *iter.next().unwrap_or(&false));
        for col in &mut self.columns {
            let mut iter = keep.iter();
            col.values.retain(|_| *iter.next().unwrap_or(&false));
        }
    }

    /// Split borrow for in-place cleaning: the time axis stays readable
    /// while column values are mutated.
    pub(crate) fn parts_mut(&mut self) -> (&[NaiveDateTime], &mut [Column]) {
        (&self.timestamps, &mut self.columns)
    }

    /// Stable sort of all rows by timestamp. Equal timestamps keep their
    /// relative order, which is what makes dedup-keep-first deterministic.
    pub fn sort_by_timestamp(&mut self) {
        if self.timestamps.windows(2).all(|w| w[0] <= w[1]) {
            return;
        }
        let mut order: Vec<usize> = (0..self.height()).collect();
        order.sort_by_key(|&i| self.timestamps[i]);
        self.timestamps = order.iter().map(|&i| self.timestamps[i]).collect();
        for col in &mut self.columns {
            col.values = order.iter().map(|&i| col.values[i]).collect();
        }
    }

    /// Append another table's rows, unioning schemas: columns missing on
    /// either side fill with NaN. Caller re-sorts when order matters.
    pub fn concat(&mut self, other: &CanonicalTable) {
        let old_height = self.height();
        let added = other.height();
        self.timestamps.extend_from_slice(other.timestamps());
        for col in &mut self.columns {
            match other.column(&col.name) {
                Some(oc) => col.values.extend_from_slice(&oc.values),
                None => col.values.extend(std::iter::repeat(f64::NAN).take(added)),
            }
        }
        for oc in other.columns() {
            if self.column(&oc.name).is_none() {
                let mut values = vec![f64::NAN; old_height];
                values.extend_from_slice(&oc.values);
                self.columns.push(Column::new(oc.name.clone(), values));
            }
        }
    }

    pub fn time_range(&self) -> Option<(NaiveDateTime, NaiveDateTime)> {
        let min = self.timestamps.iter().min()?;
        let max = self.timestamps.iter().max()?;
        Some((*min, *max))
    }

    /// Write the table as a flat CSV: header row, then one row per timestamp.
    /// NaN serializes as an empty cell, like the original exports.
    pub fn to_csv(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
        }
        let mut writer = csv::Writer::from_path(path)
            .with_context(|| format!("writing {}", path.display()))?;
        let mut header = Vec::with_capacity(self.width() + 1);
        header.push(TIMESTAMP_COLUMN.to_string());
        header.extend(self.columns.iter().map(|c| c.name.clone()));
        writer.write_record(&header)?;
        let mut record = Vec::with_capacity(self.width() + 1);
        for (i, ts) in self.timestamps.iter().enumerate() {
            record.clear();
            record.push(ts.format(CSV_TIMESTAMP_FORMAT).to_string());
            for col in &self.columns {
                let v = col.values[i];
                record.push(if v.is_nan() { String::new() } else { v.to_string() });
            }
            writer.write_record(&record)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Exact inverse of `to_csv`: header at row 0, data from row 1.
    /// Rows with unparsable timestamps are dropped.
    pub fn read_csv(path: &Path) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let mut records = reader.records();
        let header = match records.next() {
            Some(record) => record?,
            None => return Ok(Self::empty()),
        };
        let names: Vec<String> = header.iter().map(|c| c.trim().to_string()).collect();
        let ts_col = names
            .iter()
            .position(|n| is_timestamp_name(n))
            .with_context(|| format!("{}: no timestamp column in header", path.display()))?;

        let data_names: Vec<(usize, String)> = names
            .into_iter()
            .enumerate()
            .filter(|(i, _)| *i != ts_col)
            .collect();
        let mut timestamps = Vec::new();
        let mut columns: Vec<Column> = data_names
            .iter()
            .map(|(_, n)| Column::new(n.clone(), Vec::new()))
            .collect();
        for record in records {
            let record = record?;
            let ts = match record.get(ts_col).and_then(parse_timestamp_opt) {
                Some(ts) => ts,
                None => continue,
            };
            timestamps.push(ts);
            for (slot, (idx, _)) in data_names.iter().enumerate() {
                let cell = record.get(*idx).unwrap_or("");
                columns[slot].values.push(parse_numeric_cell(cell));
            }
        }
        Self::from_parts(timestamps, columns)
    }
}

fn parse_timestamp_opt(cell: &str) -> Option<NaiveDateTime> {
    parse_plant_timestamp(cell)
}

/// Ordered name -> table map shared between pipeline stages. Insertion order
/// is load order, and the first entry is the merge base.
#[derive(Debug, Clone, Default)]
pub struct TableRegistry {
    entries: Vec<(String, CanonicalTable)>,
}

impl TableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a table, replacing any same-named entry in place.
    pub fn insert(&mut self, name: impl Into<String>, table: CanonicalTable) {
        let name = name.into();
        if let Some(slot) = self.entries.iter_mut().find(|(n, _)| *n == name) {
            log::warn!("registry entry '{}' replaced", name);
            slot.1 = table;
        } else {
            self.entries.push((name, table));
        }
    }

    pub fn get(&self, name: &str) -> Option<&CanonicalTable> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, t)| t)
    }

    pub fn get_required(&self, name: &str) -> Result<&CanonicalTable> {
        self.get(name)
            .with_context(|| format!("no table named '{}' in registry", name))
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &CanonicalTable)> {
        self.entries.iter().map(|(n, t)| (n.as_str(), t))
    }

    pub fn entries(&self) -> &[(String, CanonicalTable)] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Resolved header layout of one spreadsheet export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderSpec {
    pub marker_row: usize,
    pub sublabel_row: Option<usize>,
    pub timestamp_column: Option<usize>,
    /// Ordered (column index, resolved name) pairs covering the header width.
    pub columns: Vec<(usize, String)>,
}

impl HeaderSpec {
    /// One row for the marker, one for the sub-label row, even when empty.
    pub fn data_start_row(&self) -> usize {
        self.marker_row + 2
    }

    pub fn name_of(&self, column: usize) -> Option<&str> {
        self.columns
            .iter()
            .find(|(idx, _)| *idx == column)
            .map(|(_, name)| name.as_str())
    }
}

/// Header resolution outcome. `guessed` means the marker scan found nothing
/// and the resolver fell back to the default header row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderResolution {
    pub spec: HeaderSpec,
    pub guessed: bool,
}

/// Identity of one demultiplexed log stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LogGroupKey {
    pub log_type: String,
    pub system: String,
}

impl LogGroupKey {
    pub fn new(log_type: impl Into<String>, system: impl Into<String>) -> Self {
        Self { log_type: log_type.into(), system: system.into() }
    }

    /// Registry-friendly name: `("APS Energy", "APS")` -> `aps_energy_aps`.
    pub fn slug(&self) -> String {
        let joined = format!("{} {}", self.log_type, self.system);
        joined
            .trim()
            .to_ascii_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join("_")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingPolicy {
    Drop,
    FillZero,
    Interpolate,
    ForwardFill,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutlierMethod {
    Iqr,
    Zscore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeMethod {
    Outer,
    Inner,
    Left,
    Right,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleaningConfig {
    pub remove_duplicates: bool,
    pub handle_missing: MissingPolicy,
    pub remove_outliers: bool,
    pub outlier_method: OutlierMethod,
    pub outlier_threshold: f64,
}

impl Default for CleaningConfig {
    fn default() -> Self {
        Self {
            remove_duplicates: true,
            handle_missing: MissingPolicy::Interpolate,
            remove_outliers: true,
            outlier_method: OutlierMethod::Iqr,
            outlier_threshold: 3.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureConfig {
    pub time_features: bool,
    pub cyclical_features: bool,
    pub lag_features: bool,
    pub rolling_features: bool,
    pub difference_features: bool,
    pub interaction_features: bool,
    pub lag_offsets: Vec<usize>,
    pub rolling_windows: Vec<usize>,
    pub difference_periods: Vec<usize>,
    /// Cap on role-selected columns used for rolling/interaction features.
    pub max_important_columns: usize,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            time_features: true,
            cyclical_features: true,
            lag_features: true,
            rolling_features: true,
            difference_features: false,
            interaction_features: false,
            lag_offsets: vec![1, 2, 3, 6, 12, 24],
            rolling_windows: vec![3, 6, 12],
            difference_periods: vec![1, 2],
            max_important_columns: 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 10, 1)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[test]
    fn parses_all_plant_timestamp_formats() {
        let expected = ts(14, 30);
        assert_eq!(parse_plant_timestamp("01/10/2025 14:30"), Some(expected));
        assert_eq!(parse_plant_timestamp("01/10/2025 14:30:00"), Some(expected));
        assert_eq!(parse_plant_timestamp("2025-10-01 14:30:00"), Some(expected));
        assert_eq!(parse_plant_timestamp("2025-10-01T14:30:00"), Some(expected));
        assert_eq!(parse_plant_timestamp("not a date"), None);
        assert_eq!(parse_plant_timestamp(""), None);
    }

    #[test]
    fn numeric_coercion_sends_bad_cells_to_nan() {
        assert_eq!(parse_numeric_cell(" 12.5 "), 12.5);
        assert_eq!(parse_numeric_cell("-3"), -3.0);
        assert!(parse_numeric_cell("").is_nan());
        assert!(parse_numeric_cell("n/a").is_nan());
    }

    #[test]
    fn sanitizes_plant_labels() {
        assert_eq!(sanitize_column_name("Power (MW)"), "Power_MW");
        assert_eq!(sanitize_column_name("INV#1"), "INV1");
        assert_eq!(sanitize_column_name("  Date Time "), "Date_Time");
        assert_eq!(sanitize_column_name("Temp (°C)"), "Temp_C");
        assert_eq!(sanitize_column_name("Humidity (%)"), "Humidity");
    }

    #[test]
    fn recognizes_timestamp_labels() {
        assert!(is_timestamp_name("DateTime"));
        assert!(is_timestamp_name("Date Time"));
        assert!(is_timestamp_name("Date_Time"));
        assert!(is_timestamp_name("TimeStamp"));
        assert!(is_timestamp_name("Date"));
        assert!(!is_timestamp_name("Power_MW"));
        assert!(!is_timestamp_name("Daytime_Temp"));
    }

    #[test]
    fn dedup_suffixes_repeats_and_keeps_first_bare() {
        let names = vec![
            "INV1".to_string(),
            "INV1".to_string(),
            "INV1".to_string(),
            "INV2".to_string(),
        ];
        assert_eq!(
            dedup_column_names(&names),
            vec!["INV1", "INV1_2", "INV1_3", "INV2"]
        );
    }

    #[test]
    fn from_parts_rejects_ragged_and_duplicate_columns() {
        let t = vec![ts(0, 0), ts(0, 10)];
        let short = vec![Column::new("a", vec![1.0])];
        assert!(CanonicalTable::from_parts(t.clone(), short).is_err());
        let dup = vec![
            Column::new("a", vec![1.0, 2.0]),
            Column::new("a", vec![3.0, 4.0]),
        ];
        assert!(CanonicalTable::from_parts(t, dup).is_err());
    }

    #[test]
    fn sort_is_stable_for_equal_timestamps() {
        let t = vec![ts(0, 10), ts(0, 0), ts(0, 10)];
        let cols = vec![Column::new("v", vec![1.0, 2.0, 3.0])];
        let mut table = CanonicalTable::from_parts(t, cols).unwrap();
        table.sort_by_timestamp();
        assert_eq!(table.timestamps(), &[ts(0, 0), ts(0, 10), ts(0, 10)]);
        // 1.0 appeared before 3.0 at the same timestamp and must stay first
        assert_eq!(table.column_values("v").unwrap(), &[2.0, 1.0, 3.0]);
    }

    #[test]
    fn concat_unions_schemas_with_nan_fill() {
        let mut left = CanonicalTable::from_parts(
            vec![ts(0, 0)],
            vec![Column::new("a", vec![1.0])],
        )
        .unwrap();
        let right = CanonicalTable::from_parts(
            vec![ts(0, 10)],
            vec![Column::new("b", vec![2.0])],
        )
        .unwrap();
        left.concat(&right);
        assert_eq!(left.height(), 2);
        let a = left.column_values("a").unwrap();
        let b = left.column_values("b").unwrap();
        assert_eq!(a[0], 1.0);
        assert!(a[1].is_nan());
        assert!(b[0].is_nan());
        assert_eq!(b[1], 2.0);
    }

    #[test]
    fn csv_round_trip_is_exact_for_flat_tables() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("table.csv");
        let table = CanonicalTable::from_parts(
            vec![ts(0, 0), ts(0, 10), ts(0, 20)],
            vec![
                Column::new("Power_MW", vec![1.5, f64::NAN, 3.0]),
                Column::new("Irr_Wm2", vec![100.0, 200.0, 300.0]),
            ],
        )
        .unwrap();
        table.to_csv(&path).unwrap();
        let back = CanonicalTable::read_csv(&path).unwrap();
        assert_eq!(back.height(), 3);
        assert_eq!(back.column_names(), vec!["Power_MW", "Irr_Wm2"]);
        assert_eq!(back.timestamps(), table.timestamps());
        let p = back.column_values("Power_MW").unwrap();
        assert_eq!(p[0], 1.5);
        assert!(p[1].is_nan());
        assert_eq!(p[2], 3.0);
    }

    #[test]
    fn registry_preserves_insertion_order_and_replaces_in_place() {
        let mut registry = TableRegistry::new();
        registry.insert("forecast", CanonicalTable::empty());
        registry.insert("power", CanonicalTable::empty());
        registry.insert("weather", CanonicalTable::empty());
        assert_eq!(registry.names(), vec!["forecast", "power", "weather"]);
        registry.insert("power", CanonicalTable::empty());
        assert_eq!(registry.names(), vec!["forecast", "power", "weather"]);
        assert!(registry.get_required("missing").is_err());
    }

    #[test]
    fn log_group_slug_is_lowercase_joined() {
        let key = LogGroupKey::new("APS Energy", "APS");
        assert_eq!(key.slug(), "aps_energy_aps");
        let bare = LogGroupKey::new("APU Stat 10s", "");
        assert_eq!(bare.slug(), "apu_stat_10s");
    }
}
