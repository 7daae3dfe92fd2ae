use std::path::Path;

use anyhow::{Context, Result};
use calamine::{open_workbook_auto, Data, Reader};

/// Untyped grid of trimmed cell strings, possibly ragged, as read from disk
/// before any header resolution. Plant exports arrive as delimited text or
/// as Excel workbooks; both land here in the same shape.
#[derive(Debug, Clone, Default)]
pub struct RawTable {
    pub rows: Vec<Vec<String>>,
}

impl RawTable {
    pub fn new(rows: Vec<Vec<String>>) -> Self {
        Self { rows }
    }

    pub fn height(&self) -> usize {
        self.rows.len()
    }

    /// Cell accessor that treats out-of-range coordinates as empty.
    pub fn cell(&self, row: usize, col: usize) -> &str {
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .map(|s| s.as_str())
            .unwrap_or("")
    }

    pub fn row(&self, row: usize) -> &[String] {
        self.rows.get(row).map(|r| r.as_slice()).unwrap_or(&[])
    }

    /// Read a delimited text file without header interpretation.
    pub fn from_delimited_path(path: &Path, delimiter: u8) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .delimiter(delimiter)
            .from_path(path)
            .with_context(|| format!("opening {}", path.display()))?;
        let mut rows = Vec::new();
        for record in reader.records() {
            let record =
                record.with_context(|| format!("reading {}", path.display()))?;
            rows.push(record.iter().map(clean_cell).collect());
        }
        Ok(Self { rows })
    }

    pub fn from_csv_path(path: &Path) -> Result<Self> {
        Self::from_delimited_path(path, b',')
    }

    /// Read the first worksheet of an Excel workbook (.xls/.xlsx/.xlsm).
    pub fn from_workbook_path(path: &Path) -> Result<Self> {
        let mut workbook = open_workbook_auto(path)
            .with_context(|| format!("opening workbook {}", path.display()))?;
        let sheet_names = workbook.sheet_names().to_vec();
        let first = sheet_names
            .first()
            .with_context(|| format!("{}: workbook has no sheets", path.display()))?
            .clone();
        Self::read_sheet(&mut workbook, path, &first)
    }

    pub fn from_workbook_sheet(path: &Path, sheet: &str) -> Result<Self> {
        let mut workbook = open_workbook_auto(path)
            .with_context(|| format!("opening workbook {}", path.display()))?;
        Self::read_sheet(&mut workbook, path, sheet)
    }

    /// Dispatch on extension: workbook formats go through calamine, `.tsv`
    /// is tab-delimited, everything else is treated as comma-delimited text.
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "xls" | "xlsx" | "xlsm" | "xlsb" => Self::from_workbook_path(path),
            "tsv" => Self::from_delimited_path(path, b'\t'),
            _ => Self::from_csv_path(path),
        }
    }

    fn read_sheet(
        workbook: &mut calamine::Sheets<std::io::BufReader<std::fs::File>>,
        path: &Path,
        sheet: &str,
    ) -> Result<Self> {
        let range = workbook
            .worksheet_range(sheet)
            .with_context(|| format!("{}: reading sheet '{}'", path.display(), sheet))?;
        let mut rows = Vec::with_capacity(range.height());
        for row in range.rows() {
            rows.push(row.iter().map(workbook_cell_to_string).collect());
        }
        Ok(Self { rows })
    }
}

fn clean_cell(cell: &str) -> String {
    cell.trim_matches('\u{feff}').trim().to_string()
}

/// Render a workbook cell as the text the delimited-file path would have
/// produced, so header resolution and timestamp parsing see one format.
fn workbook_cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.trim().to_string(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) => {
            if f.fract() == 0.0 && f.abs() < 1e15 {
                format!("{}", *f as i64)
            } else {
                f.to_string()
            }
        }
        Data::Bool(b) => b.to_string(),
        // Native datetime cells render in the plant's day-first text format
        // so text exports and binary workbooks share one timestamp path.
        Data::DateTime(dt) => match dt.as_datetime() {
            Some(ndt) => ndt.format("%d/%m/%Y %H:%M:%S").to_string(),
            None => dt.as_f64().to_string(),
        },
        Data::DateTimeIso(s) => s.trim().to_string(),
        Data::DurationIso(s) => s.trim().to_string(),
        Data::Error(_) => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn reads_ragged_csv_without_header_interpretation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raw.csv");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "Plant export,,").unwrap();
        writeln!(file, ",Date Time,INV1").unwrap();
        writeln!(file, "x").unwrap();
        drop(file);

        let raw = RawTable::from_csv_path(&path).unwrap();
        assert_eq!(raw.height(), 3);
        assert_eq!(raw.cell(0, 0), "Plant export");
        assert_eq!(raw.cell(1, 1), "Date Time");
        assert_eq!(raw.cell(2, 0), "x");
        // ragged and out-of-range access is empty, not a panic
        assert_eq!(raw.cell(2, 5), "");
        assert_eq!(raw.cell(99, 0), "");
    }

    #[test]
    fn tsv_extension_switches_the_delimiter() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("forecast.tsv");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "Date\tTime\tPower (MW)").unwrap();
        writeln!(file, "01/10/2025\t00:00\t0.0").unwrap();
        drop(file);

        let raw = RawTable::from_path(&path).unwrap();
        assert_eq!(raw.cell(0, 2), "Power (MW)");
        assert_eq!(raw.cell(1, 0), "01/10/2025");
    }

    #[test]
    fn cells_are_trimmed_including_bom() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bom.csv");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "\u{feff}APS Energy, APS ,01/10/2025 00:00").unwrap();
        drop(file);

        let raw = RawTable::from_csv_path(&path).unwrap();
        assert_eq!(raw.cell(0, 0), "APS Energy");
        assert_eq!(raw.cell(0, 1), "APS");
    }

    #[test]
    fn workbook_numeric_cells_render_like_text_cells() {
        assert_eq!(workbook_cell_to_string(&Data::Float(10.0)), "10");
        assert_eq!(workbook_cell_to_string(&Data::Float(12.5)), "12.5");
        assert_eq!(workbook_cell_to_string(&Data::Int(-3)), "-3");
        assert_eq!(workbook_cell_to_string(&Data::Empty), "");
        assert_eq!(
            workbook_cell_to_string(&Data::String("  BLOCK1 ".into())),
            "BLOCK1"
        );
    }
}
