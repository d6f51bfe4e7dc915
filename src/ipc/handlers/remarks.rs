use crate::audit::{self, AuditAction, AuditEvent};
use crate::auth::User;
use crate::db;
use crate::ipc::error::ok;
use crate::ipc::helpers::{get_required_str, require_session, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::store;
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

/// Stores a remark signed by `author` and audits it. Blank text is rejected.
pub fn insert_remark(
    conn: &Connection,
    author: &User,
    student_id: &str,
    text: &str,
) -> Result<serde_json::Value, HandlerErr> {
    let text = text.trim();
    if text.is_empty() {
        return Err(HandlerErr::bad_params("remark text must not be blank"));
    }
    let id = Uuid::new_v4().to_string();
    let created_at = db::now_ts();
    conn.execute(
        "INSERT INTO remarks(id, student_id, author, role, text, created_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &id,
            student_id,
            &author.username,
            author.role.as_str(),
            text,
            &created_at,
        ),
    )
    .map_err(HandlerErr::update)?;
    audit::record(
        conn,
        AuditEvent::new(&author.username, AuditAction::Remark, Some(student_id), text),
    );
    Ok(json!({
        "id": id,
        "studentId": student_id,
        "author": author.username,
        "role": author.role.as_str(),
        "text": text,
        "createdAt": created_at,
    }))
}

pub fn list_remarks(conn: &Connection, student_id: &str) -> Result<Vec<serde_json::Value>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, author, role, text, created_at
             FROM remarks
             WHERE student_id = ?
             ORDER BY created_at DESC, rowid DESC",
        )
        .map_err(HandlerErr::query)?;
    stmt.query_map([student_id], |r| {
        Ok(json!({
            "id": r.get::<_, String>(0)?,
            "author": r.get::<_, String>(1)?,
            "role": r.get::<_, String>(2)?,
            "text": r.get::<_, String>(3)?,
            "createdAt": r.get::<_, String>(4)?,
        }))
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::query)
}

fn remarks_add(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let (conn, user) = require_session(state)?;
    let student_id = get_required_str(params, "studentId")?;
    let text = get_required_str(params, "text")?;
    if !store::student_exists(conn, &student_id)? {
        return Err(store::StoreError::RecordNotFound(student_id).into());
    }
    let remark = insert_remark(conn, user, &student_id, &text)?;
    Ok(json!({ "remark": remark }))
}

fn handle_remarks_add(state: &mut AppState, req: &Request) -> serde_json::Value {
    match remarks_add(state, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "remarks.add" => Some(handle_remarks_add(state, req)),
        _ => None,
    }
}
