use crate::ipc::error::ok;
use crate::ipc::helpers::{get_opt_str, get_required_str, require_session, today, HandlerErr};
use crate::ipc::types::{AppState, Request};
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

const STATUSES: &[&str] = &["present", "absent", "late", "excused"];
const DEFAULT_STATUS: &str = "absent";
const RECENT_DATES: i64 = 14;

fn parse_date(raw: &str) -> Result<String, HandlerErr> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map(|d| d.format("%Y-%m-%d").to_string())
        .map_err(|_| HandlerErr::bad_params("date must be YYYY-MM-DD").with_details(json!({ "date": raw })))
}

fn parse_status(v: Option<&serde_json::Value>) -> Result<String, HandlerErr> {
    let Some(raw) = v.and_then(|v| v.as_str()).map(|s| s.trim().to_ascii_lowercase()) else {
        return Ok(DEFAULT_STATUS.to_string());
    };
    if raw.is_empty() {
        return Ok(DEFAULT_STATUS.to_string());
    }
    if !STATUSES.contains(&raw.as_str()) {
        return Err(
            HandlerErr::bad_params("status must be one of: present, absent, late, excused")
                .with_details(json!({ "status": raw })),
        );
    }
    Ok(raw)
}

/// Newest first.
pub fn recent_attendance(
    conn: &Connection,
    student_id: &str,
    limit: i64,
) -> Result<Vec<serde_json::Value>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT date, status, note FROM attendance
             WHERE student_id = ?
             ORDER BY date DESC
             LIMIT ?",
        )
        .map_err(HandlerErr::query)?;
    stmt.query_map((student_id, limit), |r| {
        Ok(json!({
            "date": r.get::<_, String>(0)?,
            "status": r.get::<_, String>(1)?,
            "note": r.get::<_, String>(2)?,
        }))
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::query)
}

fn attendance_class_open(
    state: &AppState,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let (conn, _user) = require_session(state)?;
    let class = get_required_str(params, "class")?;

    let mut stmt = conn
        .prepare(
            "SELECT id, student_name, admission_no FROM students
             WHERE admission_class = ?
             ORDER BY student_name COLLATE NOCASE",
        )
        .map_err(HandlerErr::query)?;
    let students = stmt
        .query_map([&class], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "studentName": r.get::<_, Option<String>>(1)?.unwrap_or_default(),
                "admissionNo": r.get::<_, Option<String>>(2)?.unwrap_or_default(),
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;

    let mut stmt = conn
        .prepare(
            "SELECT DISTINCT a.date FROM attendance a
             JOIN students s ON s.id = a.student_id
             WHERE s.admission_class = ?
             ORDER BY a.date DESC
             LIMIT ?",
        )
        .map_err(HandlerErr::query)?;
    let dates = stmt
        .query_map((&class, RECENT_DATES), |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;

    Ok(json!({
        "class": class,
        "students": students,
        "recentDates": dates,
    }))
}

fn save_entries(
    conn: &Connection,
    class: &str,
    date: &str,
    entries: &[serde_json::Value],
) -> Result<usize, HandlerErr> {
    let mut saved = 0usize;
    for (i, entry) in entries.iter().enumerate() {
        let student_id =
            get_required_str(entry, "studentId").map_err(|e| e.with_details(json!({ "entry": i })))?;
        let status = parse_status(entry.get("status"))?;
        let note = get_opt_str(entry, "note").unwrap_or_default();
        let in_class = conn
            .query_row(
                "SELECT 1 FROM students WHERE id = ? AND admission_class = ?",
                (&student_id, class),
                |r| r.get::<_, i64>(0),
            )
            .optional()
            .map_err(HandlerErr::query)?;
        if in_class.is_none() {
            return Err(HandlerErr::new("not_found", "student not found in class")
                .with_details(json!({ "studentId": student_id, "class": class })));
        }
        conn.execute(
            "INSERT INTO attendance(id, student_id, date, status, note)
             VALUES(?, ?, ?, ?, ?)
             ON CONFLICT(student_id, date) DO UPDATE SET
               status = excluded.status,
               note = excluded.note",
            (Uuid::new_v4().to_string(), &student_id, date, &status, &note),
        )
        .map_err(HandlerErr::update)?;
        saved += 1;
    }
    Ok(saved)
}

fn attendance_save(
    state: &AppState,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let (conn, _user) = require_session(state)?;
    let class = get_required_str(params, "class")?;
    let date = match get_opt_str(params, "date") {
        Some(d) => parse_date(&d)?,
        None => today(),
    };
    let Some(entries) = params.get("entries").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("missing entries"));
    };

    let tx = conn.unchecked_transaction().map_err(HandlerErr::update)?;
    let saved = match save_entries(&tx, &class, &date, entries) {
        Ok(n) => n,
        Err(e) => {
            let _ = tx.rollback();
            return Err(e);
        }
    };
    tx.commit().map_err(HandlerErr::update)?;
    tracing::info!(class = %class, date = %date, saved, "attendance saved");
    Ok(json!({ "date": date, "saved": saved }))
}

fn handle_attendance_class_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    match attendance_class_open(state, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_attendance_save(state: &mut AppState, req: &Request) -> serde_json::Value {
    match attendance_save(state, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.classOpen" => Some(handle_attendance_class_open(state, req)),
        "attendance.save" => Some(handle_attendance_save(state, req)),
        _ => None,
    }
}
