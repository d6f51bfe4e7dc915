use std::path::{Path, PathBuf};

use anyhow::Context;
use rusqlite::Connection;
use serde::Deserialize;

use crate::auth::{self, User};
use crate::config::Config;
use crate::db;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub config: Config,
    pub session: Option<User>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        AppState {
            workspace: None,
            db: None,
            config,
            session: None,
        }
    }

    /// Opens (creating if needed) the workspace database and makes sure an
    /// admin account exists. Any previous session ends.
    pub fn open_workspace(&mut self, path: &Path) -> anyhow::Result<()> {
        self.db = None;
        self.session = None;
        let conn = db::open_db(path)
            .with_context(|| format!("failed to open workspace {}", path.to_string_lossy()))?;
        auth::ensure_default_admin(
            &conn,
            &self.config.admin_username,
            &self.config.admin_password,
        )
        .context("failed to create default admin")?;
        self.workspace = Some(path.to_path_buf());
        self.db = Some(conn);
        tracing::info!(workspace = %path.to_string_lossy(), "workspace opened");
        Ok(())
    }
}
