//! Import reconciliation: every incoming row resolves to a stable id from its
//! natural key and becomes exactly one insert or one update.

use std::collections::HashMap;
use std::path::Path;

use rusqlite::Connection;
use thiserror::Error;
use uuid::Uuid;

use crate::audit::{self, AuditAction, AuditEvent};
use crate::columns::ColumnMap;
use crate::db;
use crate::sheet::{SheetError, SheetReader};
use crate::store::{StoreError, StudentStore};
use crate::student::{ImportRow, StudentRecord};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciled {
    Inserted { student_id: String, stable_id: String },
    Updated { student_id: String, stable_id: String },
}

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("import source unreadable: {0}")]
    SourceUnreadable(String),
    #[error("import source has no data rows")]
    SourceEmpty,
    #[error("import aborted after {inserted} inserts and {updated} updates: {reason}")]
    WriteFailure {
        inserted: usize,
        updated: usize,
        reason: String,
    },
}

impl From<SheetError> for ImportError {
    fn from(e: SheetError) -> Self {
        ImportError::SourceUnreadable(e.to_string())
    }
}

pub fn reconcile<S: StudentStore + ?Sized>(
    row: &ImportRow,
    store: &S,
    now: &str,
) -> Result<Reconciled, StoreError> {
    let stable_id = row.stable_id();
    match store.find_by_stable_id(&stable_id)? {
        Some(existing) => {
            store.update_identity_fields(&stable_id, row, now)?;
            Ok(Reconciled::Updated {
                student_id: existing.id,
                stable_id,
            })
        }
        None => {
            let record =
                StudentRecord::from_import(Uuid::new_v4().to_string(), stable_id.clone(), row, now);
            store.insert_student(&record)?;
            Ok(Reconciled::Inserted {
                student_id: record.id,
                stable_id,
            })
        }
    }
}

/// Rows read and normalized from a sheet, before anything is written.
#[derive(Debug, Clone)]
pub struct ImportSource {
    pub sheet_name: String,
    pub column_map: ColumnMap,
    pub rows: Vec<ImportRow>,
}

pub fn load_source(
    reader: &dyn SheetReader,
    path: &Path,
    sheet_name: &str,
) -> Result<ImportSource, ImportError> {
    let sheet = reader.read_sheet(path, sheet_name)?;
    if sheet.row_count() == 0 {
        return Err(ImportError::SourceEmpty);
    }
    let column_map = ColumnMap::resolve(&sheet);
    if column_map.is_empty() {
        return Err(ImportError::SourceUnreadable(format!(
            "sheet '{}' has no recognised column headers",
            sheet.name
        )));
    }
    tracing::info!(
        sheet = %sheet.name,
        rows = sheet.row_count(),
        mapping = %column_map.to_json(),
        "detected import column mapping"
    );
    let rows = (0..sheet.row_count())
        .map(|i| column_map.import_row(&sheet, i))
        .collect();
    Ok(ImportSource {
        sheet_name: sheet.name,
        column_map,
        rows,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowStatus {
    New,
    Existing,
}

impl RowStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RowStatus::New => "new",
            RowStatus::Existing => "existing",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewRow {
    pub line: usize,
    pub stable_id: String,
    pub status: RowStatus,
    pub matched_student_id: Option<String>,
}

/// Classifies rows the way `apply_rows` would treat them, without writing.
/// A later row sharing a key with an earlier new row counts as existing.
pub fn preview<S: StudentStore + ?Sized>(
    store: &S,
    rows: &[ImportRow],
) -> Result<Vec<PreviewRow>, StoreError> {
    let mut seen: HashMap<String, Option<String>> = HashMap::new();
    let mut out = Vec::with_capacity(rows.len());
    for (i, row) in rows.iter().enumerate() {
        let stable_id = row.stable_id();
        let (status, matched) = match seen.get(&stable_id) {
            Some(matched) => (RowStatus::Existing, matched.clone()),
            None => match store.find_by_stable_id(&stable_id)? {
                Some(existing) => (RowStatus::Existing, Some(existing.id)),
                None => (RowStatus::New, None),
            },
        };
        seen.insert(stable_id.clone(), matched.clone());
        out.push(PreviewRow {
            // Header is line 1.
            line: i + 2,
            stable_id,
            status,
            matched_student_id: matched,
        });
    }
    Ok(out)
}

#[derive(Debug, Clone)]
pub struct ImportReport {
    pub sheet_name: String,
    pub column_map: ColumnMap,
    pub rows: usize,
    pub inserted: usize,
    pub updated: usize,
}

/// Writes all rows in one transaction. Any failed write rolls back the whole
/// run and reports how far it got.
pub fn apply_rows(
    conn: &Connection,
    rows: &[ImportRow],
    actor: &str,
) -> Result<(usize, usize), ImportError> {
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| ImportError::WriteFailure {
            inserted: 0,
            updated: 0,
            reason: e.to_string(),
        })?;
    let now = db::now_ts();
    let mut inserted = 0usize;
    let mut updated = 0usize;

    for row in rows {
        let outcome = match reconcile(row, &*tx, &now) {
            Ok(v) => v,
            Err(e) => {
                let _ = tx.rollback();
                tracing::warn!(inserted, updated, error = %e, "import write failed; rolled back");
                return Err(ImportError::WriteFailure {
                    inserted,
                    updated,
                    reason: e.to_string(),
                });
            }
        };
        let (action, student_id, summary) = match &outcome {
            Reconciled::Inserted { student_id, .. } => {
                inserted += 1;
                (
                    AuditAction::Create,
                    student_id,
                    format!("Imported student {}", row.student_name),
                )
            }
            Reconciled::Updated { student_id, .. } => {
                updated += 1;
                (
                    AuditAction::Update,
                    student_id,
                    format!("Re-imported student {}", row.student_name),
                )
            }
        };
        audit::record(&*tx, AuditEvent::new(actor, action, Some(student_id), summary));
    }

    tx.commit().map_err(|e| ImportError::WriteFailure {
        inserted,
        updated,
        reason: e.to_string(),
    })?;
    Ok((inserted, updated))
}

pub fn run_import(
    conn: &Connection,
    reader: &dyn SheetReader,
    path: &Path,
    sheet_name: &str,
    actor: &str,
) -> Result<ImportReport, ImportError> {
    let source = load_source(reader, path, sheet_name)?;
    let (inserted, updated) = apply_rows(conn, &source.rows, actor)?;
    tracing::info!(
        sheet = %source.sheet_name,
        inserted,
        updated,
        "import finished"
    );
    Ok(ImportReport {
        sheet_name: source.sheet_name,
        column_map: source.column_map,
        rows: source.rows.len(),
        inserted,
        updated,
    })
}
