use crate::db;
use crate::ipc::error::ok;
use crate::ipc::helpers::{get_opt_str, get_required_str, require_session, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::store::{self, StoreError};
use chrono::Datelike;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn fee_json(r: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "studentId": r.get::<_, String>(1)?,
        "year": r.get::<_, i64>(2)?,
        "month": r.get::<_, i64>(3)?,
        "amount": r.get::<_, f64>(4)?,
        "paid": r.get::<_, i64>(5)? != 0,
        "paidOn": r.get::<_, Option<String>>(6)?,
        "note": r.get::<_, String>(7)?,
    }))
}

const FEE_COLUMNS: &str = "id, student_id, year, month, amount, paid, paid_on, note";

/// Newest period first.
pub fn list_fees(conn: &Connection, student_id: &str) -> Result<Vec<serde_json::Value>, HandlerErr> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM fees WHERE student_id = ? ORDER BY year DESC, month DESC, rowid DESC",
            FEE_COLUMNS
        ))
        .map_err(HandlerErr::query)?;
    stmt.query_map([student_id], fee_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)
}

fn require_student(conn: &Connection, student_id: &str) -> Result<(), HandlerErr> {
    if !store::student_exists(conn, student_id)? {
        return Err(StoreError::RecordNotFound(student_id.to_string()).into());
    }
    Ok(())
}

fn get_opt_i64(params: &serde_json::Value, key: &str) -> Result<Option<i64>, HandlerErr> {
    match params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => v
            .as_i64()
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be an integer", key))),
    }
}

fn fees_list(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let (conn, _user) = require_session(state)?;
    let student_id = get_required_str(params, "studentId")?;
    require_student(conn, &student_id)?;
    Ok(json!({ "fees": list_fees(conn, &student_id)? }))
}

fn fees_add(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let (conn, _user) = require_session(state)?;
    let student_id = get_required_str(params, "studentId")?;
    let now = chrono::Utc::now().date_naive();
    let year = get_opt_i64(params, "year")?.unwrap_or(now.year() as i64);
    let month = get_opt_i64(params, "month")?.unwrap_or(now.month() as i64);
    if !(1..=12).contains(&month) {
        return Err(HandlerErr::bad_params("month must be between 1 and 12")
            .with_details(json!({ "month": month })));
    }
    let Some(amount) = params.get("amount").and_then(|v| v.as_f64()) else {
        return Err(HandlerErr::bad_params("missing amount"));
    };
    if !amount.is_finite() || amount < 0.0 {
        return Err(HandlerErr::bad_params("amount must be >= 0")
            .with_details(json!({ "amount": amount })));
    }
    let note = get_opt_str(params, "note").unwrap_or_default();
    require_student(conn, &student_id)?;

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO fees(id, student_id, year, month, amount, paid, paid_on, note)
         VALUES(?, ?, ?, ?, ?, 0, NULL, ?)",
        (&id, &student_id, year, month, amount, &note),
    )
    .map_err(HandlerErr::update)?;
    Ok(json!({ "feeId": id }))
}

fn fees_pay(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let (conn, _user) = require_session(state)?;
    let fee_id = get_required_str(params, "feeId")?;
    let changed = conn
        .execute(
            "UPDATE fees SET paid = 1, paid_on = ? WHERE id = ?",
            (db::now_ts(), &fee_id),
        )
        .map_err(HandlerErr::update)?;
    if changed == 0 {
        return Err(HandlerErr::new("not_found", "fee not found")
            .with_details(json!({ "feeId": fee_id })));
    }
    let fee = conn
        .query_row(
            &format!("SELECT {} FROM fees WHERE id = ?", FEE_COLUMNS),
            [&fee_id],
            fee_json,
        )
        .optional()
        .map_err(HandlerErr::query)?;
    Ok(json!({ "fee": fee }))
}

fn handle_fees_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    match fees_list(state, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_fees_add(state: &mut AppState, req: &Request) -> serde_json::Value {
    match fees_add(state, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_fees_pay(state: &mut AppState, req: &Request) -> serde_json::Value {
    match fees_pay(state, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "fees.list" => Some(handle_fees_list(state, req)),
        "fees.add" => Some(handle_fees_add(state, req)),
        "fees.pay" => Some(handle_fees_pay(state, req)),
        _ => None,
    }
}
