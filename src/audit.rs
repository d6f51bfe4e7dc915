//! Audit trail. Writing an event is best-effort: a failed write is logged
//! and never reaches the caller of the mutation being audited.

use rusqlite::Connection;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    Create,
    Update,
    Delete,
    Remark,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditAction::Create => "CREATE",
            AuditAction::Update => "UPDATE",
            AuditAction::Delete => "DELETE",
            AuditAction::Remark => "REMARK",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuditEvent {
    pub actor: String,
    pub action: AuditAction,
    pub student_id: Option<String>,
    pub summary: String,
    pub timestamp: String,
}

impl AuditEvent {
    pub fn new(
        actor: &str,
        action: AuditAction,
        student_id: Option<&str>,
        summary: impl Into<String>,
    ) -> Self {
        AuditEvent {
            actor: actor.to_string(),
            action,
            student_id: student_id.map(|s| s.to_string()),
            summary: summary.into(),
            timestamp: crate::db::now_ts(),
        }
    }
}

pub trait AuditSink {
    fn write_event(&self, event: &AuditEvent) -> anyhow::Result<()>;
}

impl AuditSink for Connection {
    fn write_event(&self, event: &AuditEvent) -> anyhow::Result<()> {
        self.execute(
            "INSERT INTO audit_log(id, actor, action, student_id, change_summary, timestamp)
             VALUES(?, ?, ?, ?, ?, ?)",
            (
                Uuid::new_v4().to_string(),
                &event.actor,
                event.action.as_str(),
                &event.student_id,
                &event.summary,
                &event.timestamp,
            ),
        )?;
        Ok(())
    }
}

pub fn record(sink: &dyn AuditSink, event: AuditEvent) {
    if let Err(e) = sink.write_event(&event) {
        tracing::warn!(
            action = event.action.as_str(),
            student_id = ?event.student_id,
            error = %e,
            "audit event dropped"
        );
    }
}

pub fn list_events(
    conn: &Connection,
    student_id: Option<&str>,
    limit: usize,
) -> rusqlite::Result<Vec<serde_json::Value>> {
    let mut stmt = conn.prepare(
        "SELECT id, actor, action, student_id, change_summary, timestamp
         FROM audit_log
         WHERE (?1 IS NULL OR student_id = ?1)
         ORDER BY timestamp DESC, rowid DESC
         LIMIT ?2",
    )?;
    let rows = stmt
        .query_map((student_id, limit as i64), |r| {
            Ok(serde_json::json!({
                "id": r.get::<_, String>(0)?,
                "actor": r.get::<_, String>(1)?,
                "action": r.get::<_, String>(2)?,
                "studentId": r.get::<_, Option<String>>(3)?,
                "summary": r.get::<_, String>(4)?,
                "timestamp": r.get::<_, String>(5)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
