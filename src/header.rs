use crate::models::{
    dedup_column_names, is_timestamp_name, parse_numeric_cell, parse_plant_timestamp,
    sanitize_column_name, HeaderResolution, HeaderSpec, TIMESTAMP_COLUMN,
};
use crate::raw::RawTable;

/// Finds and flattens the header region of plant spreadsheet exports.
///
/// The reports carry a few title rows, then a header row whose column 1 holds
/// the timestamp marker ("Date Time"), then a sub-label row (inverter names,
/// units, or nothing), then data. Merged group cells like "BLOCK1" appear
/// only over the first column of their group, so resolution rebuilds the
/// missing prefixes by searching backward along the header row.
pub struct HeaderResolver {
    scan_rows: usize,
    marker_column: usize,
    fallback_row: usize,
    block_search_window: usize,
}

impl Default for HeaderResolver {
    fn default() -> Self {
        Self {
            scan_rows: 20,
            marker_column: 1,
            fallback_row: 0,
            block_search_window: 10,
        }
    }
}

impl HeaderResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scan_rows(mut self, rows: usize) -> Self {
        self.scan_rows = rows;
        self
    }

    pub fn marker_column(mut self, column: usize) -> Self {
        self.marker_column = column;
        self
    }

    pub fn fallback_row(mut self, row: usize) -> Self {
        self.fallback_row = row;
        self
    }

    /// Resolve the header. Never fails: when the marker scan comes up empty
    /// the resolver guesses the default header row and says so via the
    /// `guessed` flag, which callers surface as a warning.
    pub fn resolve(&self, raw: &RawTable) -> HeaderResolution {
        let marker = self.find_marker(raw);
        let guessed = marker.is_none();
        let (marker_row, marker_col) = match marker {
            Some((row, col)) => (row, Some(col)),
            None => (self.fallback_row, None),
        };
        let sublabel_row = if marker_row + 1 < raw.height() {
            Some(marker_row + 1)
        } else {
            None
        };

        let width = raw
            .row(marker_row)
            .len()
            .max(sublabel_row.map(|r| raw.row(r).len()).unwrap_or(0));
        let mut names = Vec::with_capacity(width);
        for idx in 0..width {
            names.push(self.resolve_name(raw, marker_row, idx));
        }
        if let Some(col) = marker_col {
            names[col] = TIMESTAMP_COLUMN.to_string();
        }
        let names = dedup_column_names(&names);

        let timestamp_column = marker_col.or_else(|| {
            names.iter().position(|n| n == TIMESTAMP_COLUMN)
        });

        HeaderResolution {
            spec: HeaderSpec {
                marker_row,
                sublabel_row,
                timestamp_column,
                columns: names.into_iter().enumerate().collect(),
            },
            guessed,
        }
    }

    fn find_marker(&self, raw: &RawTable) -> Option<(usize, usize)> {
        for row in 0..self.scan_rows.min(raw.height()) {
            let cell = raw.cell(row, self.marker_column);
            if !cell.is_empty() && is_timestamp_name(cell) {
                return Some((row, self.marker_column));
            }
        }
        None
    }

    fn resolve_name(&self, raw: &RawTable, tier1_row: usize, idx: usize) -> String {
        let tier1 = sanitize_column_name(raw.cell(tier1_row, idx));
        let tier2_raw = raw.cell(tier1_row + 1, idx);
        let tier2 = if is_sublabel(tier2_raw) {
            sanitize_column_name(tier2_raw)
        } else {
            String::new()
        };

        let name = match (!tier1.is_empty(), !tier2.is_empty()) {
            (true, true) => format!("{}_{}", tier1, tier2),
            (true, false) => tier1,
            (false, true) => match self.find_group_label(raw, tier1_row, idx) {
                Some(group) => format!("{}_{}", group, tier2),
                None => tier2,
            },
            (false, false) => return format!("Column_{}", idx),
        };
        if is_timestamp_name(&name) {
            TIMESTAMP_COLUMN.to_string()
        } else {
            name
        }
    }

    /// Backward search for the nearest group label to the left. A tier-1
    /// label only counts as a group when its own column also carries a
    /// sub-label; standalone column names and the timestamp marker must not
    /// leak onto their neighbors.
    fn find_group_label(&self, raw: &RawTable, tier1_row: usize, idx: usize) -> Option<String> {
        let start = idx.saturating_sub(self.block_search_window);
        for j in (start..idx).rev() {
            let candidate = raw.cell(tier1_row, j);
            if candidate.is_empty() || is_timestamp_name(candidate) {
                continue;
            }
            if is_sublabel(raw.cell(tier1_row + 1, j)) {
                return Some(sanitize_column_name(candidate));
            }
            return None;
        }
        None
    }
}

/// A sub-label cell must be text: a cell holding a number or a timestamp
/// means the row below the header is already data (single-tier layout).
fn is_sublabel(cell: &str) -> bool {
    !cell.is_empty()
        && parse_numeric_cell(cell).is_nan()
        && parse_plant_timestamp(cell).is_none()
}
