use crate::audit;
use crate::duplicates;
use crate::ipc::error::ok;
use crate::ipc::helpers::{get_opt_str, require_session, HandlerErr};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

const AUDIT_DEFAULT_LIMIT: u64 = 100;
const AUDIT_MAX_LIMIT: u64 = 1000;

fn duplicates_find(state: &AppState) -> Result<serde_json::Value, HandlerErr> {
    let (conn, _user) = require_session(state)?;
    let pairs: Vec<duplicates::DuplicatePair> = duplicates::find_duplicates(conn)?.collect();
    tracing::debug!(pairs = pairs.len(), "duplicate scan finished");
    Ok(json!({ "pairs": pairs }))
}

fn audit_list(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let (conn, _user) = require_session(state)?;
    let student_id = get_opt_str(params, "studentId");
    let limit = match params.get("limit") {
        None | Some(serde_json::Value::Null) => AUDIT_DEFAULT_LIMIT,
        Some(v) => match v.as_u64() {
            Some(n) if n >= 1 => n.min(AUDIT_MAX_LIMIT),
            _ => return Err(HandlerErr::bad_params("limit must be a positive integer")),
        },
    };
    let events = audit::list_events(conn, student_id.as_deref(), limit as usize)
        .map_err(HandlerErr::query)?;
    Ok(json!({ "events": events }))
}

fn handle_duplicates_find(state: &mut AppState, req: &Request) -> serde_json::Value {
    match duplicates_find(state) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_audit_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    match audit_list(state, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "duplicates.find" => Some(handle_duplicates_find(state, req)),
        "audit.list" => Some(handle_audit_list(state, req)),
        _ => None,
    }
}
