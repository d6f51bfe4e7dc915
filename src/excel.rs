//! Native spreadsheet workbooks (xlsx, xlsm, xlsb, xls, ods) read through
//! calamine. Cells come back as text so the rest of the import sees the same
//! shape as a CSV sheet.

use std::path::Path;

use calamine::{open_workbook_auto, Data, DataType, Reader};

use crate::sheet::{Sheet, SheetError, SheetReader};

const SPREADSHEET_EXTENSIONS: &[&str] = &["xlsx", "xlsm", "xlsb", "xls", "ods"];

pub fn is_spreadsheet_path(path: &Path) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|ext| {
            SPREADSHEET_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}

/// Whole numbers print without a fraction; date cells print as `YYYY-MM-DD`.
fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty | Data::Error(_) => String::new(),
        Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
        Data::DateTime(_) => cell
            .as_date()
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| cell.to_string()),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ExcelWorkbookReader;

impl SheetReader for ExcelWorkbookReader {
    fn read_sheet(&self, path: &Path, sheet: &str) -> Result<Sheet, SheetError> {
        let shown = path.to_string_lossy().to_string();
        if !path.is_file() {
            return Err(SheetError::NotFound(shown));
        }
        let unreadable = |reason: String| SheetError::Unreadable {
            path: shown.clone(),
            reason,
        };

        let mut workbook = open_workbook_auto(path).map_err(|e| unreadable(e.to_string()))?;
        if !workbook.sheet_names().iter().any(|name| name == sheet) {
            return Err(SheetError::SheetMissing {
                path: shown.clone(),
                sheet: sheet.to_string(),
            });
        }
        let range = workbook
            .worksheet_range(sheet)
            .map_err(|e| unreadable(e.to_string()))?;
        let records: Vec<Vec<String>> = range
            .rows()
            .map(|row| row.iter().map(cell_text).collect())
            .collect();
        Ok(Sheet::from_rows(sheet, records))
    }
}
