use rusqlite::Connection;
use serde_json::json;

use crate::auth::{AuthError, User};
use crate::ipc::error::err;
use crate::ipc::types::AppState;
use crate::reconcile::ImportError;
use crate::store::StoreError;

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        HandlerErr {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn query(e: impl ToString) -> Self {
        Self::new("db_query_failed", e.to_string())
    }

    pub fn update(e: impl ToString) -> Self {
        Self::new("db_update_failed", e.to_string())
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<StoreError> for HandlerErr {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::RecordNotFound(id) => HandlerErr::new("not_found", "student not found")
                .with_details(json!({ "studentId": id })),
            StoreError::Db(e) => HandlerErr::query(e),
        }
    }
}

impl From<AuthError> for HandlerErr {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::InvalidCredentials => HandlerErr::new("auth_failed", e.to_string()),
            AuthError::UsernameTaken(_) => HandlerErr::new("duplicate_key", e.to_string()),
            AuthError::WeakPassword { .. } => HandlerErr::bad_params(e.to_string()),
            AuthError::Hash(_) => HandlerErr::new("auth_failed", e.to_string()),
            AuthError::Db(e) => HandlerErr::update(e),
        }
    }
}

impl From<ImportError> for HandlerErr {
    fn from(e: ImportError) -> Self {
        match e {
            ImportError::SourceUnreadable(_) => HandlerErr::new("source_unreadable", e.to_string()),
            ImportError::SourceEmpty => HandlerErr::new("source_empty", e.to_string()),
            ImportError::WriteFailure {
                inserted, updated, ..
            } => HandlerErr::new("write_failed", e.to_string())
                .with_details(json!({ "inserted": inserted, "updated": updated })),
        }
    }
}

pub fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

/// Trimmed string param; absent, null and blank all read as `None`.
pub fn get_opt_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn require_db(state: &AppState) -> Result<&Connection, HandlerErr> {
    state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

/// Open workspace plus a logged-in user.
pub fn require_session(state: &AppState) -> Result<(&Connection, &User), HandlerErr> {
    let conn = require_db(state)?;
    let user = state
        .session
        .as_ref()
        .ok_or_else(|| HandlerErr::new("not_authenticated", "log in first"))?;
    Ok((conn, user))
}

pub fn require_admin(state: &AppState) -> Result<(&Connection, &User), HandlerErr> {
    let (conn, user) = require_session(state)?;
    if !user.is_admin() {
        return Err(HandlerErr::new("forbidden", "admin role required"));
    }
    Ok((conn, user))
}

pub fn today() -> String {
    chrono::Utc::now().format("%Y-%m-%d").to_string()
}
