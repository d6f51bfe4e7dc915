use crate::auth::{self, Role};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_opt_str, get_required_str, require_admin, require_db, HandlerErr};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn login(state: &AppState, params: &serde_json::Value) -> Result<auth::User, HandlerErr> {
    let conn = require_db(state)?;
    let username = get_required_str(params, "username")?;
    let password = get_required_str(params, "password")?;
    Ok(auth::authenticate(conn, &username, &password)?)
}

fn handle_login(state: &mut AppState, req: &Request) -> serde_json::Value {
    match login(state, &req.params) {
        Ok(user) => {
            tracing::info!(username = %user.username, role = user.role.as_str(), "login");
            let body = json!({ "user": user });
            state.session = Some(user);
            ok(&req.id, body)
        }
        Err(e) => {
            if e.code == "auth_failed" {
                tracing::warn!("failed login attempt");
            }
            e.response(&req.id)
        }
    }
}

fn handle_logout(state: &mut AppState, req: &Request) -> serde_json::Value {
    let was = state.session.take().is_some();
    ok(&req.id, json!({ "loggedOut": was }))
}

fn handle_whoami(state: &mut AppState, req: &Request) -> serde_json::Value {
    match state.session.as_ref() {
        Some(user) => ok(&req.id, json!({ "user": user })),
        None => err(&req.id, "not_authenticated", "log in first", None),
    }
}

fn register(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let (conn, _admin) = require_admin(state)?;
    let username = get_required_str(params, "username")?;
    let password = get_required_str(params, "password")?;
    let role = match get_opt_str(params, "role") {
        Some(r) => Role::parse(&r)
            .ok_or_else(|| HandlerErr::bad_params("role must be one of: admin, teacher"))?,
        None => Role::Teacher,
    };
    let full_name = get_opt_str(params, "fullName").unwrap_or_default();
    let user = auth::register_user(
        conn,
        &username,
        &password,
        role,
        &full_name,
        state.config.min_password_len,
    )?;
    tracing::info!(username = %user.username, role = user.role.as_str(), "registered user");
    Ok(json!({ "user": user }))
}

fn handle_register(state: &mut AppState, req: &Request) -> serde_json::Value {
    match register(state, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "auth.login" => Some(handle_login(state, req)),
        "auth.logout" => Some(handle_logout(state, req)),
        "auth.whoami" => Some(handle_whoami(state, req)),
        "auth.register" => Some(handle_register(state, req)),
        _ => None,
    }
}
