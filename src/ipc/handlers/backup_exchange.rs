use crate::backup;
use crate::export;
use crate::ipc::error::ok;
use crate::ipc::helpers::{get_required_str, require_admin, require_session, HandlerErr};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;

fn required_path(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    let v = get_required_str(params, key)?;
    let v = v.trim();
    if v.is_empty() {
        return Err(HandlerErr::bad_params(format!("missing {}", key)));
    }
    Ok(v.to_string())
}

fn export_csv(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let (conn, _user) = require_session(state)?;
    let out_path = required_path(params, "outPath")?;
    let rows = export::export_students_csv(conn, &PathBuf::from(&out_path)).map_err(|e| {
        HandlerErr::new("export_failed", format!("{e:#}")).with_details(json!({ "path": out_path }))
    })?;
    Ok(json!({ "path": out_path, "rowsExported": rows }))
}

fn backup_export(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let (conn, _user) = require_session(state)?;
    let out_path = required_path(params, "outPath")?;
    let Some(workspace) = state.workspace.as_ref() else {
        return Err(HandlerErr::new("no_workspace", "select a workspace first"));
    };
    let _ = conn.execute_batch("PRAGMA wal_checkpoint(FULL)");

    let summary = backup::export_workspace_bundle(workspace, &PathBuf::from(&out_path)).map_err(|e| {
        HandlerErr::new("export_failed", format!("{e:#}")).with_details(json!({ "path": out_path }))
    })?;
    tracing::info!(path = %out_path, photos = summary.photo_count, "workspace backup written");
    Ok(json!({
        "path": out_path,
        "bundleFormat": summary.bundle_format,
        "entryCount": summary.entry_count,
        "photoCount": summary.photo_count,
    }))
}

fn backup_import(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let (workspace, admin) = {
        let (_conn, user) = require_admin(state)?;
        let workspace = state
            .workspace
            .clone()
            .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))?;
        (workspace, user.username.clone())
    };
    let in_path = required_path(params, "inPath")?;
    let src = PathBuf::from(&in_path);
    if !src.is_file() {
        return Err(HandlerErr::new("not_found", "backup file not found")
            .with_details(json!({ "path": in_path })));
    }

    // Drop open handle before replacing file.
    state.db = None;
    let restored = backup::import_workspace_bundle(&src, &workspace);

    // Reopen whatever database is on disk now, restored or not.
    let reopened = state.open_workspace(&workspace);
    let summary = restored.map_err(|e| {
        HandlerErr::new("io_failed", format!("{e:#}")).with_details(json!({ "path": in_path }))
    })?;
    reopened.map_err(|e| HandlerErr::new("db_open_failed", format!("{e:#}")))?;

    tracing::info!(
        path = %in_path,
        by = %admin,
        format = %summary.bundle_format_detected,
        "workspace restored from backup"
    );
    Ok(json!({
        "workspacePath": workspace.to_string_lossy(),
        "bundleFormatDetected": summary.bundle_format_detected,
        "photosRestored": summary.photos_restored,
        "sessionEnded": true,
    }))
}

fn handle_export_csv(state: &mut AppState, req: &Request) -> serde_json::Value {
    match export_csv(state, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_backup_export(state: &mut AppState, req: &Request) -> serde_json::Value {
    match backup_export(state, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_backup_import(state: &mut AppState, req: &Request) -> serde_json::Value {
    match backup_import(state, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "export.csv" => Some(handle_export_csv(state, req)),
        "backup.export" => Some(handle_backup_export(state, req)),
        "backup.import" => Some(handle_backup_import(state, req)),
        _ => None,
    }
}
