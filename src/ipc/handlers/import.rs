use crate::ipc::error::ok;
use crate::ipc::helpers::{get_opt_str, get_required_str, require_session, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::reconcile;
use crate::sheet::{self, WorkbookReader};
use serde_json::json;
use std::path::{Path, PathBuf};

fn sheet_name_for(state: &AppState, params: &serde_json::Value, path: &Path) -> String {
    get_opt_str(params, "sheet")
        .unwrap_or_else(|| sheet::default_sheet_name(path, &state.config.import_sheet))
}

fn import_preview(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let (conn, _user) = require_session(state)?;
    let path = PathBuf::from(get_required_str(params, "path")?);
    let sheet = sheet_name_for(state, params, &path);
    let source = reconcile::load_source(&WorkbookReader, &path, &sheet)?;
    let rows = reconcile::preview(conn, &source.rows)?;

    let new_count = rows
        .iter()
        .filter(|r| r.status == reconcile::RowStatus::New)
        .count();
    let rows_json: Vec<serde_json::Value> = rows
        .iter()
        .zip(source.rows.iter())
        .map(|(p, row)| {
            json!({
                "line": p.line,
                "stableId": p.stable_id,
                "status": p.status.as_str(),
                "matchedStudentId": p.matched_student_id,
                "row": row,
            })
        })
        .collect();
    Ok(json!({
        "sheet": source.sheet_name,
        "columnMap": source.column_map.to_json(),
        "rowsTotal": rows.len(),
        "newCount": new_count,
        "existingCount": rows.len() - new_count,
        "rows": rows_json,
    }))
}

fn import_run(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let (conn, user) = require_session(state)?;
    let path = PathBuf::from(get_required_str(params, "path")?);
    let sheet = sheet_name_for(state, params, &path);
    let report = reconcile::run_import(conn, &WorkbookReader, &path, &sheet, &user.username)
        .map_err(|e| {
            tracing::error!(path = %path.to_string_lossy(), sheet = %sheet, error = %e, "import failed");
            HandlerErr::from(e)
        })?;
    Ok(json!({
        "sheet": report.sheet_name,
        "rows": report.rows,
        "inserted": report.inserted,
        "updated": report.updated,
        "columnMap": report.column_map.to_json(),
    }))
}

fn handle_import_preview(state: &mut AppState, req: &Request) -> serde_json::Value {
    match import_preview(state, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_import_run(state: &mut AppState, req: &Request) -> serde_json::Value {
    match import_run(state, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "import.preview" => Some(handle_import_preview(state, req)),
        "import.run" => Some(handle_import_run(state, req)),
        _ => None,
    }
}
