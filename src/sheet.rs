use std::fs::File;
use std::io::Read;
use std::path::Path;

use thiserror::Error;
use zip::ZipArchive;

use crate::excel::{self, ExcelWorkbookReader};

#[derive(Debug, Error)]
pub enum SheetError {
    #[error("workbook not found: {0}")]
    NotFound(String),
    #[error("sheet '{sheet}' not found in {path}")]
    SheetMissing { path: String, sheet: String },
    #[error("cannot read {path}: {reason}")]
    Unreadable { path: String, reason: String },
}

/// One sheet as text: the first row is the header row, taken literally.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sheet {
    pub name: String,
    pub headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Sheet {
    pub fn from_csv_text(name: &str, text: &str) -> Self {
        Self::from_rows(name, parse_csv(text))
    }

    /// First record is the header row; rows with nothing but blanks are dropped.
    pub fn from_rows(name: &str, records: Vec<Vec<String>>) -> Self {
        let mut records = records.into_iter();
        let headers = records.next().unwrap_or_default();
        let width = headers.len();
        let rows = records
            .filter(|r| r.iter().any(|c| !c.trim().is_empty()))
            .map(|mut r| {
                r.resize(width, String::new());
                r
            })
            .collect();
        Sheet {
            name: name.to_string(),
            headers,
            rows,
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// First column carrying exactly this header text.
    pub fn column_index(&self, header: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == header)
    }

    /// Missing cells read as empty text.
    pub fn cell(&self, row: usize, col: usize) -> &str {
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .map(|s| s.as_str())
            .unwrap_or("")
    }
}

/// Source of spreadsheet rows for an import run.
pub trait SheetReader {
    fn read_sheet(&self, path: &Path, sheet: &str) -> Result<Sheet, SheetError>;
}

/// Reads sheets saved as CSV. A workbook is a single `.csv` file (one sheet
/// named after the file stem), a directory of `<sheet>.csv` files, or a
/// `.zip` archive of them.
#[derive(Debug, Clone, Copy, Default)]
pub struct CsvWorkbookReader;

impl SheetReader for CsvWorkbookReader {
    fn read_sheet(&self, path: &Path, sheet: &str) -> Result<Sheet, SheetError> {
        let shown = path.to_string_lossy().to_string();
        if !path.exists() {
            return Err(SheetError::NotFound(shown));
        }
        let missing = || SheetError::SheetMissing {
            path: shown.clone(),
            sheet: sheet.to_string(),
        };
        let unreadable = |reason: String| SheetError::Unreadable {
            path: shown.clone(),
            reason,
        };

        if path.is_dir() {
            let file = path.join(format!("{}.csv", sheet));
            if !file.is_file() {
                return Err(missing());
            }
            let bytes = std::fs::read(&file).map_err(|e| unreadable(e.to_string()))?;
            return Ok(Sheet::from_csv_text(sheet, &String::from_utf8_lossy(&bytes)));
        }

        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();
        match ext.as_str() {
            "csv" => {
                let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("");
                if stem != sheet {
                    return Err(missing());
                }
                let bytes = std::fs::read(path).map_err(|e| unreadable(e.to_string()))?;
                Ok(Sheet::from_csv_text(sheet, &String::from_utf8_lossy(&bytes)))
            }
            "zip" => {
                let file = File::open(path).map_err(|e| unreadable(e.to_string()))?;
                let mut archive =
                    ZipArchive::new(file).map_err(|e| unreadable(e.to_string()))?;
                let mut entry = match archive.by_name(&format!("{}.csv", sheet)) {
                    Ok(e) => e,
                    Err(zip::result::ZipError::FileNotFound) => return Err(missing()),
                    Err(e) => return Err(unreadable(e.to_string())),
                };
                let mut bytes = Vec::new();
                entry
                    .read_to_end(&mut bytes)
                    .map_err(|e| unreadable(e.to_string()))?;
                Ok(Sheet::from_csv_text(sheet, &String::from_utf8_lossy(&bytes)))
            }
            other => Err(unreadable(format!("unsupported workbook format '{}'", other))),
        }
    }
}

/// Reader used for imports: native spreadsheet workbooks go through
/// [`ExcelWorkbookReader`], anything else is read as CSV.
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkbookReader;

impl SheetReader for WorkbookReader {
    fn read_sheet(&self, path: &Path, sheet: &str) -> Result<Sheet, SheetError> {
        if excel::is_spreadsheet_path(path) {
            ExcelWorkbookReader.read_sheet(path, sheet)
        } else {
            CsvWorkbookReader.read_sheet(path, sheet)
        }
    }
}

/// Sheet to read when a request names none: a `.csv` workbook holds exactly
/// one sheet named after its stem, anything else falls back to `configured`.
pub fn default_sheet_name(path: &Path, configured: &str) -> String {
    let is_csv = path
        .extension()
        .and_then(|s| s.to_str())
        .map(|e| e.eq_ignore_ascii_case("csv"))
        .unwrap_or(false);
    if is_csv {
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            return stem.to_string();
        }
    }
    configured.to_string()
}

/// RFC 4180 style records: quoted fields may hold commas, doubled quotes and
/// line breaks. A leading byte-order mark is dropped.
pub fn parse_csv(text: &str) -> Vec<Vec<String>> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut records: Vec<Vec<String>> = Vec::new();
    let mut record: Vec<String> = Vec::new();
    let mut buf = String::new();
    let mut in_quotes = false;
    let mut pending = false;
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        if in_quotes {
            if ch == '"' {
                if chars.peek() == Some(&'"') {
                    buf.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            } else {
                buf.push(ch);
            }
            continue;
        }
        match ch {
            '"' => {
                in_quotes = true;
                pending = true;
            }
            ',' => {
                record.push(std::mem::take(&mut buf));
                pending = true;
            }
            '\r' | '\n' => {
                if ch == '\r' && chars.peek() == Some(&'\n') {
                    chars.next();
                }
                record.push(std::mem::take(&mut buf));
                records.push(std::mem::take(&mut record));
                pending = false;
            }
            _ => {
                buf.push(ch);
                pending = true;
            }
        }
    }
    if pending {
        record.push(buf);
        records.push(record);
    }
    records
}
