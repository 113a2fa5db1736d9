//! Per-instrument result tables and the workbook they are written to.
//!
//! Each run produces one `.xlsx` workbook with a worksheet per instrument plus a
//! `Version` sheet holding the run metadata. Statistics are rows and test cases are
//! columns, in execution order:
//!
//! ```text
//! bt_current_20261019_101500.xlsx
//!     VBAT      |                | Deep_Sleep | BT_Idle | ...
//!               | 1.Average (mA) |      0.012 |   1.234 |
//!               | ...            |            |         |
//!               | 5.Count        |       1000 |    1000 |
//!     VIO
//!     Version   | Item | Value |
//! ```
//!
//! With `[output] csv_export = 1` the same tables are also written as a directory of
//! CSV files (one row per case), useful for diffing runs.

use crate::error::{AppResult, BenchError};
use crate::metadata::RunMetadata;
use crate::stats::CaptureStats;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Statistic rows, in fixed order.
pub const STAT_ROWS: [&str; 5] = [
    "1.Average (mA)",
    "2.Max (mA)",
    "3.Min (mA)",
    "4.Sdev (mA)",
    "5.Count",
];

/// Raw-sample row, written last when enabled.
pub const RAW_ROW: &str = "6.Raw";

/// Name of the metadata worksheet.
pub const VERSION_SHEET: &str = "Version";

/// Longest worksheet name a workbook accepts.
const MAX_SHEET_NAME: usize = 31;

/// One worksheet cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    /// Nothing written.
    Empty,
    /// A label.
    Text(String),
    /// A numeric value.
    Number(f64),
}

/// Test-case columns collected from one instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultTable {
    sheet: String,
    columns: Vec<(String, CaptureStats)>,
}

impl ResultTable {
    /// Empty table for worksheet `sheet`.
    pub fn new(sheet: impl Into<String>) -> Self {
        Self {
            sheet: sheet.into(),
            columns: Vec::new(),
        }
    }

    /// Worksheet name.
    pub fn sheet(&self) -> &str {
        &self.sheet
    }

    /// Columns in insertion order.
    pub fn columns(&self) -> &[(String, CaptureStats)] {
        &self.columns
    }

    /// Statistics for `case`, if present.
    pub fn get(&self, case: &str) -> Option<&CaptureStats> {
        self.columns
            .iter()
            .find(|(name, _)| name == case)
            .map(|(_, stats)| stats)
    }

    /// Append a column. Case names are unique per table.
    pub fn add_column(&mut self, case: &str, stats: CaptureStats) -> AppResult<()> {
        if self.get(case).is_some() {
            return Err(BenchError::DuplicateCase(case.to_string()));
        }
        self.columns.push((case.to_string(), stats));
        Ok(())
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// True when no case has been recorded.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Worksheet layout: a header row of case names, then one row per statistic.
    pub fn grid(&self, include_raw: bool) -> Vec<Vec<Cell>> {
        let mut header = vec![Cell::Empty];
        header.extend(self.columns.iter().map(|(case, _)| Cell::Text(case.clone())));

        let stat_row = |label: &str, value: fn(&CaptureStats) -> f64| {
            let mut row = vec![Cell::Text(label.to_string())];
            row.extend(self.columns.iter().map(|(_, stats)| Cell::Number(value(stats))));
            row
        };
        let mut grid = vec![
            header,
            stat_row(STAT_ROWS[0], |s| s.mean),
            stat_row(STAT_ROWS[1], |s| s.max),
            stat_row(STAT_ROWS[2], |s| s.min),
            stat_row(STAT_ROWS[3], |s| s.stdev),
            stat_row(STAT_ROWS[4], |s| s.count as f64),
        ];
        if include_raw {
            let mut raw = vec![Cell::Text(RAW_ROW.to_string())];
            raw.extend(self.columns.iter().map(|(_, stats)| Cell::Text(stats.raw_cell())));
            grid.push(raw);
        }
        grid
    }

    /// CSV header row.
    pub fn header(include_raw: bool) -> Vec<String> {
        let mut header = vec!["Case".to_string()];
        header.extend(STAT_ROWS.iter().map(|s| s.to_string()));
        if include_raw {
            header.push(RAW_ROW.to_string());
        }
        header
    }

    /// One CSV record per case, statistics in [`STAT_ROWS`] order.
    pub fn records(&self, include_raw: bool) -> Vec<Vec<String>> {
        self.columns
            .iter()
            .map(|(case, stats)| {
                let mut record = vec![
                    case.clone(),
                    format!("{:.3}", stats.mean),
                    format!("{:.3}", stats.max),
                    format!("{:.3}", stats.min),
                    format!("{:.3}", stats.stdev),
                    stats.count.to_string(),
                ];
                if include_raw {
                    record.push(stats.raw_cell());
                }
                record
            })
            .collect()
    }
}

/// `Version` worksheet layout.
pub fn version_grid(metadata: &RunMetadata) -> Vec<Vec<Cell>> {
    let mut grid = vec![vec![Cell::Text("Item".to_string()), Cell::Text("Value".to_string())]];
    grid.extend(
        metadata
            .rows()
            .into_iter()
            .map(|(key, value)| vec![Cell::Text(key), Cell::Text(value)]),
    );
    grid
}

/// Worksheet name the workbook will use for `sheet`.
///
/// `[]:*?/\` become `_`, surrounding apostrophes are dropped and the result is cut
/// to 31 characters.
pub fn worksheet_name(sheet: &str) -> String {
    let cleaned: String = sheet
        .trim()
        .trim_matches('\'')
        .chars()
        .map(|c| if matches!(c, '[' | ']' | ':' | '*' | '?' | '/' | '\\') { '_' } else { c })
        .take(MAX_SHEET_NAME)
        .collect();
    if cleaned.is_empty() {
        "Sheet".to_string()
    } else {
        cleaned
    }
}

/// `<name>_<YYYYmmdd_HHMMSS>`, shared by the workbook and the CSV export of a run.
pub fn run_stem(name: &str) -> String {
    format!("{}_{}", name, chrono::Local::now().format("%Y%m%d_%H%M%S"))
}

/// Replace characters that are not safe in a file name.
#[cfg(feature = "storage_csv")]
fn sheet_file_name(sheet: &str) -> String {
    let cleaned: String = sheet
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ' ') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{}.csv", cleaned)
}

/// Writes result tables and metadata into `<base>/<stem>.xlsx`.
#[cfg(feature = "storage_xlsx")]
pub struct WorkbookWriter {
    path: PathBuf,
    include_raw: bool,
}

#[cfg(feature = "storage_xlsx")]
impl WorkbookWriter {
    /// Prepare `<base>/<stem>.xlsx`, creating `base` if needed.
    pub fn create(base: &Path, stem: &str, include_raw: bool) -> AppResult<Self> {
        std::fs::create_dir_all(base)?;
        let path = base.join(format!("{}.xlsx", stem));
        tracing::info!("Workbook will be written to '{}'.", path.display());
        Ok(Self { path, include_raw })
    }

    /// Write every table followed by the `Version` sheet, then save.
    pub fn write_all(&self, tables: &[ResultTable], metadata: &RunMetadata) -> AppResult<PathBuf> {
        use rust_xlsxwriter::{Format, Workbook};

        let mut workbook = Workbook::new();
        let bold = Format::new().set_bold();

        for table in tables {
            let sheet = workbook.add_worksheet();
            sheet.set_name(worksheet_name(table.sheet()))?;
            sheet.set_column_width(0, 16.0)?;
            write_grid(sheet, &table.grid(self.include_raw), &bold)?;
            tracing::debug!("Worksheet '{}': {} cases", table.sheet(), table.len());
        }

        let version = workbook.add_worksheet();
        version.set_name(VERSION_SHEET)?;
        version.set_column_width(0, 20.0)?;
        write_grid(version, &version_grid(metadata), &bold)?;

        workbook.save(&self.path)?;
        tracing::info!(
            "Workbook '{}' complete ({} worksheets).",
            self.path.display(),
            tables.len() + 1
        );
        Ok(self.path.clone())
    }
}

/// Labels in the first row and column are bold.
#[cfg(feature = "storage_xlsx")]
fn write_grid(
    sheet: &mut rust_xlsxwriter::Worksheet,
    grid: &[Vec<Cell>],
    label: &rust_xlsxwriter::Format,
) -> AppResult<()> {
    for (r, row) in grid.iter().enumerate() {
        let r = u32::try_from(r).map_err(|_| BenchError::Processing("too many rows".to_string()))?;
        for (c, cell) in row.iter().enumerate() {
            let c = u16::try_from(c).map_err(|_| BenchError::Processing("too many columns".to_string()))?;
            match cell {
                Cell::Empty => {}
                Cell::Text(text) if r == 0 || c == 0 => {
                    sheet.write_string_with_format(r, c, text.as_str(), label)?;
                }
                Cell::Text(text) => {
                    sheet.write_string(r, c, text.as_str())?;
                }
                Cell::Number(value) => {
                    sheet.write_number(r, c, *value)?;
                }
            }
        }
    }
    Ok(())
}

#[cfg(not(feature = "storage_xlsx"))]
/// Placeholder when the `storage_xlsx` feature is off; every call fails.
pub struct WorkbookWriter;

#[cfg(not(feature = "storage_xlsx"))]
impl WorkbookWriter {
    /// Always fails with [`BenchError::FeatureNotEnabled`].
    pub fn create(_base: &Path, _stem: &str, _include_raw: bool) -> AppResult<Self> {
        Err(BenchError::FeatureNotEnabled("storage_xlsx".to_string()))
    }

    /// Always fails with [`BenchError::FeatureNotEnabled`].
    pub fn write_all(&self, _tables: &[ResultTable], _metadata: &RunMetadata) -> AppResult<PathBuf> {
        Err(BenchError::FeatureNotEnabled("storage_xlsx".to_string()))
    }
}

/// Writes the tables as `<base>/<stem>/<sheet>.csv` plus `Version.csv`.
#[cfg(feature = "storage_csv")]
pub struct CsvExport {
    dir: PathBuf,
    include_raw: bool,
}

#[cfg(feature = "storage_csv")]
impl CsvExport {
    /// Create the export directory `<base>/<stem>/`.
    pub fn create(base: &Path, stem: &str, include_raw: bool) -> AppResult<Self> {
        let dir = base.join(stem);
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir, include_raw })
    }

    /// Write one instrument sheet.
    pub fn write_sheet(&self, table: &ResultTable) -> AppResult<PathBuf> {
        let path = self.dir.join(sheet_file_name(table.sheet()));
        let mut writer = csv::Writer::from_path(&path)?;
        writer.write_record(ResultTable::header(self.include_raw))?;
        for record in table.records(self.include_raw) {
            writer.write_record(&record)?;
        }
        writer.flush()?;
        tracing::debug!("Wrote {} cases to '{}'", table.len(), path.display());
        Ok(path)
    }

    /// Write `Version.csv`.
    pub fn write_version(&self, metadata: &RunMetadata) -> AppResult<PathBuf> {
        let path = self.dir.join(sheet_file_name(VERSION_SHEET));
        let mut writer = csv::Writer::from_path(&path)?;
        writer.write_record(["Item", "Value"])?;
        for (key, value) in metadata.rows() {
            writer.write_record([key, value])?;
        }
        writer.flush()?;
        Ok(path)
    }

    /// Write every table followed by `Version.csv`.
    pub fn write_all(&self, tables: &[ResultTable], metadata: &RunMetadata) -> AppResult<PathBuf> {
        for table in tables {
            self.write_sheet(table)?;
        }
        self.write_version(metadata)?;
        tracing::info!("CSV export written to '{}'.", self.dir.display());
        Ok(self.dir.clone())
    }
}

#[cfg(not(feature = "storage_csv"))]
/// Placeholder when the `storage_csv` feature is off; every call fails.
pub struct CsvExport;

#[cfg(not(feature = "storage_csv"))]
impl CsvExport {
    /// Always fails with [`BenchError::FeatureNotEnabled`].
    pub fn create(_base: &Path, _stem: &str, _include_raw: bool) -> AppResult<Self> {
        Err(BenchError::FeatureNotEnabled("storage_csv".to_string()))
    }

    /// Always fails with [`BenchError::FeatureNotEnabled`].
    pub fn write_all(&self, _tables: &[ResultTable], _metadata: &RunMetadata) -> AppResult<PathBuf> {
        Err(BenchError::FeatureNotEnabled("storage_csv".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(amps: &[f64]) -> CaptureStats {
        CaptureStats::from_amps(amps).unwrap().rounded()
    }

    #[test]
    fn duplicate_columns_rejected() {
        let mut table = ResultTable::new("VBAT");
        table.add_column("Deep_Sleep", stats(&[0.0001])).unwrap();
        match table.add_column("Deep_Sleep", stats(&[0.0002])) {
            Err(BenchError::DuplicateCase(name)) => assert_eq!(name, "Deep_Sleep"),
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn grid_has_cases_as_columns_and_fixed_stat_rows() {
        let mut table = ResultTable::new("VBAT");
        table.add_column("Deep_Sleep", stats(&[0.0001])).unwrap();
        table.add_column("BT_Idle", stats(&[0.001, 0.003])).unwrap();

        let grid = table.grid(false);
        assert_eq!(grid.len(), 1 + STAT_ROWS.len());
        assert_eq!(
            grid[0],
            vec![
                Cell::Empty,
                Cell::Text("Deep_Sleep".to_string()),
                Cell::Text("BT_Idle".to_string())
            ]
        );
        let labels: Vec<&Cell> = grid[1..].iter().map(|row| &row[0]).collect();
        for (label, expected) in labels.iter().zip(STAT_ROWS) {
            assert_eq!(**label, Cell::Text(expected.to_string()));
        }
        assert_eq!(grid[1][2], Cell::Number(2.0));
        assert_eq!(grid[4][2], Cell::Number(1.0));
        assert_eq!(grid[5][2], Cell::Number(2.0));

        let with_raw = table.grid(true);
        assert_eq!(with_raw[6][0], Cell::Text(RAW_ROW.to_string()));
        assert_eq!(with_raw[6][2], Cell::Text("1,3".to_string()));
    }

    #[test]
    fn version_grid_starts_with_item_value() {
        let grid = version_grid(&RunMetadata::default());
        assert_eq!(grid[0], vec![Cell::Text("Item".to_string()), Cell::Text("Value".to_string())]);
        assert_eq!(grid[1][0], Cell::Text("Software Version".to_string()));
    }

    #[test]
    fn records_follow_fixed_row_order() {
        let mut table = ResultTable::new("VBAT");
        table.add_column("BT_Idle", stats(&[0.001, 0.003])).unwrap();
        let records = table.records(true);
        assert_eq!(records[0], vec!["BT_Idle", "2.000", "3.000", "1.000", "1.000", "2", "1,3"]);
        assert_eq!(ResultTable::header(false).len(), 6);
        assert_eq!(ResultTable::header(true).last().unwrap(), RAW_ROW);
    }

    #[test]
    fn worksheet_names_are_cleaned_and_truncated() {
        assert_eq!(worksheet_name(" VBAT "), "VBAT");
        assert_eq!(worksheet_name("VDD/1.8V [main]"), "VDD_1.8V _main_");
        assert_eq!(worksheet_name("'quoted'"), "quoted");
        assert_eq!(worksheet_name(&"X".repeat(40)).len(), 31);
        assert_eq!(worksheet_name("  "), "Sheet");
    }

    #[cfg(feature = "storage_csv")]
    #[test]
    fn sheet_names_become_safe_file_names() {
        assert_eq!(sheet_file_name("VBAT"), "VBAT.csv");
        assert_eq!(sheet_file_name("VDD/1.8V"), "VDD_1.8V.csv");
    }

    #[cfg(feature = "storage_xlsx")]
    #[test]
    fn writes_xlsx_workbook() {
        let tmp = tempfile::tempdir().unwrap();
        let writer = WorkbookWriter::create(&tmp.path().join("out"), "bench_run", true).unwrap();
        let mut table = ResultTable::new("VDD/1V8");
        table.add_column("Deep_Sleep", stats(&[0.0001])).unwrap();

        let path = writer.write_all(&[table], &RunMetadata::default()).unwrap();
        assert_eq!(path, tmp.path().join("out").join("bench_run.xlsx"));
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[..4], b"PK\x03\x04");
    }

    #[cfg(feature = "storage_csv")]
    #[test]
    fn csv_export_writes_sheets_and_version() {
        let tmp = tempfile::tempdir().unwrap();
        let export = CsvExport::create(tmp.path(), "bench", false).unwrap();
        let mut table = ResultTable::new("VBAT");
        table.add_column("Deep_Sleep", stats(&[0.0001])).unwrap();
        table.add_column("BT_Idle", stats(&[0.002])).unwrap();

        let dir = export.write_all(&[table], &RunMetadata::default()).unwrap();
        let sheet = std::fs::read_to_string(dir.join("VBAT.csv")).unwrap();
        let lines: Vec<&str> = sheet.lines().collect();
        assert_eq!(lines[0], "Case,1.Average (mA),2.Max (mA),3.Min (mA),4.Sdev (mA),5.Count");
        assert!(lines[1].starts_with("Deep_Sleep,0.100,"));
        assert!(lines[2].starts_with("BT_Idle,2.000,"));
        assert!(dir.join("Version.csv").exists());
    }
}
