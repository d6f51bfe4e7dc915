mod audit;
mod auth;
mod backup;
mod columns;
mod config;
mod db;
mod duplicates;
mod excel;
mod export;
mod identity;
mod ipc;
mod normalize;
mod reconcile;
mod sheet;
mod store;
mod student;
mod uploads;

use std::io::{self, BufRead, Write};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use config::Config;

const STARTUP_ACTOR: &str = "system";

fn init_tracing() {
    let filter = std::env::var("STUDENTD_LOG")
        .ok()
        .and_then(|v| EnvFilter::try_new(v).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("studentd=info"));
    // stdout carries protocol lines only.
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

/// Opens the configured workspace and runs the configured startup import.
/// Failures are logged; the daemon still starts and serves requests.
fn startup(state: &mut ipc::AppState) {
    let Some(workspace) = state.config.workspace.clone() else {
        return;
    };
    if let Err(e) = state.open_workspace(&workspace) {
        tracing::error!(error = %format!("{e:#}"), "startup workspace could not be opened");
        return;
    }
    let Some(path) = state.config.startup_import.clone() else {
        return;
    };
    if !path.exists() {
        tracing::info!(path = %path.to_string_lossy(), "startup import file absent; skipping");
        return;
    }
    let Some(conn) = state.db.as_ref() else {
        return;
    };
    let sheet_name = sheet::default_sheet_name(&path, &state.config.import_sheet);
    match reconcile::run_import(
        conn,
        &sheet::WorkbookReader,
        &path,
        &sheet_name,
        STARTUP_ACTOR,
    ) {
        Ok(report) => tracing::info!(
            inserted = report.inserted,
            updated = report.updated,
            "startup import applied"
        ),
        Err(e) => tracing::error!(error = %e, "startup import failed"),
    }
}

fn main() {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = Config::from_env();
    tracing::info!(
        workspace = ?config.workspace,
        import_sheet = %config.import_sheet,
        "studentd starting"
    );
    let mut state = ipc::AppState::new(config);
    startup(&mut state);

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(error = %e, "stdin read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let resp = match serde_json::from_str::<ipc::Request>(&line) {
            Ok(req) => {
                tracing::debug!(id = %req.id, method = %req.method, "request");
                ipc::handle_request(&mut state, req)
            }
            Err(e) => ipc::bad_json(e.to_string()),
        };
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
    tracing::info!("stdin closed; exiting");
}
