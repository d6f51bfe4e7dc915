//! Staff accounts and password checks.
//!
//! New hashes are Argon2id PHC strings with a random salt. Accounts created by
//! older deployments may still hold an unsalted SHA-256 hex digest; those are
//! accepted once and replaced with an Argon2id hash on successful login.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

use crate::db;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Teacher,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Teacher => "teacher",
        }
    }

    pub fn parse(s: &str) -> Option<Role> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Some(Role::Admin),
            "teacher" => Some(Role::Teacher),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub username: String,
    pub role: Role,
    pub full_name: String,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid username or password")]
    InvalidCredentials,
    #[error("username already exists: {0}")]
    UsernameTaken(String),
    #[error("password must be at least {min} characters long")]
    WeakPassword { min: usize },
    #[error("password hashing failed: {0}")]
    Hash(String),
    #[error(transparent)]
    Db(#[from] rusqlite::Error),
}

impl From<argon2::password_hash::Error> for AuthError {
    fn from(e: argon2::password_hash::Error) -> Self {
        AuthError::Hash(e.to_string())
    }
}

pub fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default().hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

fn legacy_digest(password: &str) -> String {
    format!("{:x}", Sha256::digest(password.as_bytes()))
}

/// Unsalted SHA-256 hex, as written by earlier deployments.
pub fn is_legacy_hash(stored: &str) -> bool {
    stored.len() == 64 && stored.chars().all(|c| c.is_ascii_hexdigit())
}

pub fn verify_password(password: &str, stored: &str) -> Result<bool, AuthError> {
    if is_legacy_hash(stored) {
        return Ok(legacy_digest(password).eq_ignore_ascii_case(stored));
    }
    let parsed = PasswordHash::new(stored)?;
    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

pub fn validate_password_strength(password: &str, min_len: usize) -> Result<(), AuthError> {
    if password.chars().count() < min_len {
        return Err(AuthError::WeakPassword { min: min_len });
    }
    Ok(())
}

fn user_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<(User, String)> {
    let role: String = r.get(2)?;
    Ok((
        User {
            id: r.get(0)?,
            username: r.get(1)?,
            role: Role::parse(&role).unwrap_or(Role::Teacher),
            full_name: r.get(3)?,
        },
        r.get(4)?,
    ))
}

fn find_user(conn: &Connection, username: &str) -> Result<Option<(User, String)>, AuthError> {
    Ok(conn
        .query_row(
            "SELECT id, username, role, full_name, password_hash FROM users WHERE username = ?",
            [username],
            user_from_row,
        )
        .optional()?)
}

pub fn register_user(
    conn: &Connection,
    username: &str,
    password: &str,
    role: Role,
    full_name: &str,
    min_password_len: usize,
) -> Result<User, AuthError> {
    let username = username.trim();
    if username.is_empty() {
        return Err(AuthError::InvalidCredentials);
    }
    validate_password_strength(password, min_password_len)?;
    if find_user(conn, username)?.is_some() {
        return Err(AuthError::UsernameTaken(username.to_string()));
    }
    let user = User {
        id: Uuid::new_v4().to_string(),
        username: username.to_string(),
        role,
        full_name: full_name.trim().to_string(),
    };
    conn.execute(
        "INSERT INTO users(id, username, password_hash, role, full_name, created_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &user.id,
            &user.username,
            hash_password(password)?,
            user.role.as_str(),
            &user.full_name,
            db::now_ts(),
        ),
    )?;
    Ok(user)
}

/// Creates the bootstrap administrator when no account exists yet.
/// Returns whether an account was created.
pub fn ensure_default_admin(
    conn: &Connection,
    username: &str,
    password: &str,
) -> Result<bool, AuthError> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))?;
    if count > 0 {
        return Ok(false);
    }
    // The configured bootstrap password is not held to the registration minimum.
    register_user(conn, username, password, Role::Admin, "Administrator", 0)?;
    tracing::info!(username, "created default admin account");
    Ok(true)
}

pub fn authenticate(conn: &Connection, username: &str, password: &str) -> Result<User, AuthError> {
    let Some((user, stored)) = find_user(conn, username.trim())? else {
        return Err(AuthError::InvalidCredentials);
    };
    if !verify_password(password, &stored)? {
        return Err(AuthError::InvalidCredentials);
    }
    if is_legacy_hash(&stored) {
        let upgraded = hash_password(password)?;
        conn.execute(
            "UPDATE users SET password_hash = ? WHERE id = ?",
            (&upgraded, &user.id),
        )?;
        tracing::info!(username = %user.username, "upgraded legacy password hash");
    }
    Ok(user)
}
