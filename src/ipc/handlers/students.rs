use crate::audit::{self, AuditAction, AuditEvent};
use crate::db;
use crate::ipc::error::ok;
use crate::ipc::handlers::{attendance, fees, remarks};
use crate::ipc::helpers::{
    get_opt_str, get_required_str, require_admin, require_session, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::normalize;
use crate::store::{self, StoreError, StudentStore};
use crate::student::{ImportRow, StudentRecord, STATUS_ACTIVE};
use crate::uploads;
use rusqlite::Connection;
use serde_json::json;
use std::path::PathBuf;
use uuid::Uuid;

const SEARCH_LIMIT: i64 = 500;
const DETAIL_ATTENDANCE_ROWS: i64 = 30;
const STATUSES: &[&str] = &["active", "inactive"];

/// Text fields a client may set, as (param key, column).
const EDITABLE_TEXT_FIELDS: &[(&str, &str)] = &[
    ("schoolId", "school_id"),
    ("slNo", "sl_no"),
    ("studentName", "student_name"),
    ("fatherName", "father_name"),
    ("motherName", "mother_name"),
    ("sexCast", "sex_cast"),
    ("dob", "dob"),
    ("nationalId", "aadhaar_no"),
    ("mobileNo", "mobile_no"),
    ("admissionClass", "admission_class"),
    ("admissionNo", "admission_no"),
    ("bloodGroup", "blood_group"),
    ("address", "address"),
    ("category", "category"),
    ("religion", "religion"),
    ("prevSchool", "prev_school"),
    ("medicalIssues", "medical_issues"),
    ("emergencyContact", "emergency_contact"),
    ("remarks", "remarks"),
    ("status", "status"),
];

fn field_text(fields: &serde_json::Value, key: &str) -> Result<Option<String>, HandlerErr> {
    match fields.get(key) {
        None => Ok(None),
        Some(serde_json::Value::Null) => Ok(Some(String::new())),
        Some(serde_json::Value::String(s)) => Ok(Some(s.trim().to_string())),
        Some(serde_json::Value::Number(n)) => Ok(Some(n.to_string())),
        Some(_) => Err(HandlerErr::bad_params(format!("fields.{} must be a string", key))),
    }
}

fn check_status(status: &str) -> Result<(), HandlerErr> {
    if STATUSES.contains(&status) {
        Ok(())
    } else {
        Err(HandlerErr::bad_params("status must be one of: active, inactive")
            .with_details(json!({ "status": status })))
    }
}

fn fields_param(params: &serde_json::Value) -> Result<&serde_json::Value, HandlerErr> {
    match params.get("fields") {
        Some(v) if v.is_object() => Ok(v),
        _ => Err(HandlerErr::bad_params("missing fields object")),
    }
}

fn record_from_fields(fields: &serde_json::Value, now: &str) -> Result<StudentRecord, HandlerErr> {
    let text = |key: &str| -> Result<String, HandlerErr> {
        Ok(field_text(fields, key)?.unwrap_or_default())
    };
    let identity = ImportRow {
        school_id: text("schoolId")?,
        sl_no: text("slNo")?,
        student_name: text("studentName")?,
        father_name: text("fatherName")?,
        mother_name: text("motherName")?,
        sex_cast: text("sexCast")?,
        dob: text("dob")?,
        national_id: text("nationalId")?,
        mobile_no: text("mobileNo")?,
        admission_class: text("admissionClass")?,
        admission_no: text("admissionNo")?,
    };
    if normalize::non_empty(&identity.student_name).is_none() {
        return Err(HandlerErr::bad_params("studentName is required"));
    }
    let stable_id = identity.stable_id();
    let mut rec = StudentRecord::from_import(Uuid::new_v4().to_string(), stable_id, &identity, now);
    rec.blood_group = text("bloodGroup")?;
    rec.address = text("address")?;
    rec.category = text("category")?;
    rec.religion = text("religion")?;
    rec.prev_school = text("prevSchool")?;
    rec.medical_issues = text("medicalIssues")?;
    rec.emergency_contact = text("emergencyContact")?;
    rec.remarks = text("remarks")?;
    rec.transport_required = fields
        .get("transportRequired")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    if let Some(status) = field_text(fields, "status")?.filter(|s| !s.is_empty()) {
        check_status(&status)?;
        rec.status = status;
    } else {
        rec.status = STATUS_ACTIVE.to_string();
    }
    Ok(rec)
}

fn students_create(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let (conn, user) = require_session(state)?;
    let fields = fields_param(params)?;
    let rec = record_from_fields(fields, &db::now_ts())?;
    let stable_id = rec.stable_id.clone().unwrap_or_default();
    if let Some(existing) = conn.find_by_stable_id(&stable_id)? {
        return Err(HandlerErr::new(
            "duplicate_key",
            "a student with this school and admission/serial number already exists",
        )
        .with_details(json!({ "existingId": existing.id, "stableId": stable_id })));
    }
    conn.insert_student(&rec)?;
    audit::record(
        conn,
        AuditEvent::new(
            &user.username,
            AuditAction::Create,
            Some(&rec.id),
            format!("Added student {}", rec.display_name()),
        ),
    );
    Ok(json!({ "studentId": rec.id, "stableId": stable_id }))
}

fn students_get(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let (conn, _user) = require_session(state)?;
    let student_id = get_required_str(params, "studentId")?;
    let student = store::get_student(conn, &student_id)?;
    Ok(json!({
        "student": student,
        "remarks": remarks::list_remarks(conn, &student_id)?,
        "attendance": attendance::recent_attendance(conn, &student_id, DETAIL_ATTENDANCE_ROWS)?,
        "fees": fees::list_fees(conn, &student_id)?,
    }))
}

fn students_update(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let (conn, user) = require_session(state)?;
    let student_id = get_required_str(params, "studentId")?;
    let fields = fields_param(params)?;
    let before = store::get_student(conn, &student_id)?;

    let mut sets: Vec<String> = Vec::new();
    let mut values: Vec<rusqlite::types::Value> = Vec::new();
    let mut changed: Vec<&str> = Vec::new();
    for (key, column) in EDITABLE_TEXT_FIELDS {
        let Some(v) = field_text(fields, key)? else {
            continue;
        };
        if *key == "studentName" && v.is_empty() {
            return Err(HandlerErr::bad_params("studentName must not be blank"));
        }
        if *key == "status" {
            check_status(&v)?;
        }
        sets.push(format!("{} = ?", column));
        values.push(rusqlite::types::Value::Text(v));
        changed.push(key);
    }
    if let Some(v) = fields.get("transportRequired") {
        let Some(b) = v.as_bool() else {
            return Err(HandlerErr::bad_params("fields.transportRequired must be a boolean"));
        };
        sets.push("transport_required = ?".to_string());
        values.push(rusqlite::types::Value::Integer(if b { 1 } else { 0 }));
        changed.push("transportRequired");
    }
    sets.push("updated_at = ?".to_string());
    values.push(rusqlite::types::Value::Text(db::now_ts()));
    values.push(rusqlite::types::Value::Text(student_id.clone()));

    // stable_id stays as first assigned even when key fields change.
    let sql = format!("UPDATE students SET {} WHERE id = ?", sets.join(", "));
    conn.execute(&sql, rusqlite::params_from_iter(values))
        .map_err(HandlerErr::update)?;

    audit::record(
        conn,
        AuditEvent::new(
            &user.username,
            AuditAction::Update,
            Some(&student_id),
            format!(
                "Updated student {} ({})",
                before.display_name(),
                if changed.is_empty() {
                    "no field changes".to_string()
                } else {
                    changed.join(", ")
                }
            ),
        ),
    );

    let remark = match get_opt_str(params, "newRemark") {
        Some(text) => Some(remarks::insert_remark(conn, user, &student_id, &text)?),
        None => None,
    };
    Ok(json!({
        "student": store::get_student(conn, &student_id)?,
        "remark": remark,
    }))
}

fn delete_student_rows(conn: &Connection, student_id: &str) -> Result<(), rusqlite::Error> {
    conn.execute("DELETE FROM attendance WHERE student_id = ?", [student_id])?;
    conn.execute("DELETE FROM fees WHERE student_id = ?", [student_id])?;
    conn.execute("DELETE FROM remarks WHERE student_id = ?", [student_id])?;
    conn.execute("DELETE FROM students WHERE id = ?", [student_id])?;
    Ok(())
}

fn students_delete(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let (conn, user) = require_admin(state)?;
    let student_id = get_required_str(params, "studentId")?;
    let student = store::get_student(conn, &student_id)?;

    let tx = conn.unchecked_transaction().map_err(HandlerErr::update)?;
    if let Err(e) = delete_student_rows(&tx, &student_id) {
        let _ = tx.rollback();
        return Err(HandlerErr::update(e));
    }
    tx.commit().map_err(HandlerErr::update)?;

    audit::record(
        conn,
        AuditEvent::new(
            &user.username,
            AuditAction::Delete,
            Some(&student_id),
            format!("Deleted student {}", student.display_name()),
        ),
    );
    Ok(json!({ "deleted": true, "studentId": student_id }))
}

/// LIKE pattern with `%`, `_` and the escape char itself taken literally.
fn like_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

fn students_search(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let (conn, _user) = require_session(state)?;
    let q = get_opt_str(params, "q").map(|s| format!("%{}%", like_escape(&s)));
    let class = get_opt_str(params, "class");
    let gender = get_opt_str(params, "gender").map(|s| format!("{}%", like_escape(&s)));
    let status = get_opt_str(params, "status");

    let sql = store::select_sql(
        "WHERE (?1 IS NULL
                OR student_name LIKE ?1 ESCAPE '\\'
                OR father_name LIKE ?1 ESCAPE '\\'
                OR mother_name LIKE ?1 ESCAPE '\\'
                OR mobile_no LIKE ?1 ESCAPE '\\'
                OR admission_no LIKE ?1 ESCAPE '\\')
           AND (?2 IS NULL OR admission_class = ?2)
           AND (?3 IS NULL OR sex_cast LIKE ?3 ESCAPE '\\')
           AND (?4 IS NULL OR status = ?4)
         ORDER BY student_name COLLATE NOCASE, rowid
         LIMIT ?5",
    );
    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::query)?;
    let students = stmt
        .query_map((q, class, gender, status, SEARCH_LIMIT), store::student_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    Ok(json!({ "students": students, "limit": SEARCH_LIMIT }))
}

fn students_set_photo(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let (conn, user) = require_session(state)?;
    let Some(workspace) = state.workspace.as_ref() else {
        return Err(HandlerErr::new("no_workspace", "select a workspace first"));
    };
    let student_id = get_required_str(params, "studentId")?;
    let source = PathBuf::from(get_required_str(params, "sourcePath")?);
    if !store::student_exists(conn, &student_id)? {
        return Err(StoreError::RecordNotFound(student_id).into());
    }
    let file_name = source
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    if !uploads::allowed_file(file_name) {
        return Err(HandlerErr::bad_params("photo must be a png, jpg or jpeg file")
            .with_details(json!({ "sourcePath": source.to_string_lossy() })));
    }
    if !source.is_file() {
        return Err(HandlerErr::new("not_found", "photo file not found")
            .with_details(json!({ "sourcePath": source.to_string_lossy() })));
    }
    let stored = uploads::store_photo(workspace, &source)
        .map_err(|e| HandlerErr::new("io_failed", format!("{e:#}")))?;
    conn.execute(
        "UPDATE students SET photo = ?, updated_at = ? WHERE id = ?",
        (&stored, db::now_ts(), &student_id),
    )
    .map_err(HandlerErr::update)?;
    audit::record(
        conn,
        AuditEvent::new(
            &user.username,
            AuditAction::Update,
            Some(&student_id),
            format!("Set photo {}", stored),
        ),
    );
    Ok(json!({ "photo": stored }))
}

fn count(conn: &Connection, sql: &str) -> Result<i64, HandlerErr> {
    conn.query_row(sql, [], |r| r.get(0)).map_err(HandlerErr::query)
}

fn dashboard_summary(state: &AppState) -> Result<serde_json::Value, HandlerErr> {
    let (conn, _user) = require_session(state)?;
    let total = count(conn, "SELECT COUNT(*) FROM students")?;
    let active = count(conn, "SELECT COUNT(*) FROM students WHERE status = 'active'")?;
    let boys = count(conn, "SELECT COUNT(*) FROM students WHERE sex_cast LIKE 'M%'")?;
    let girls = count(conn, "SELECT COUNT(*) FROM students WHERE sex_cast LIKE 'F%'")?;
    let mut stmt = conn
        .prepare(
            "SELECT COALESCE(admission_class, ''), COUNT(*)
             FROM students
             GROUP BY COALESCE(admission_class, '')
             ORDER BY 1",
        )
        .map_err(HandlerErr::query)?;
    let per_class = stmt
        .query_map([], |r| {
            Ok(json!({
                "class": r.get::<_, String>(0)?,
                "count": r.get::<_, i64>(1)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    Ok(json!({
        "total": total,
        "active": active,
        "boys": boys,
        "girls": girls,
        "perClass": per_class,
    }))
}

fn respond(req: &Request, result: Result<serde_json::Value, HandlerErr>) -> serde_json::Value {
    match result {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "students.create" => students_create(state, &req.params),
        "students.get" => students_get(state, &req.params),
        "students.update" => students_update(state, &req.params),
        "students.delete" => students_delete(state, &req.params),
        "students.search" => students_search(state, &req.params),
        "students.setPhoto" => students_set_photo(state, &req.params),
        "dashboard.summary" => dashboard_summary(state),
        _ => return None,
    };
    Some(respond(req, result))
}
