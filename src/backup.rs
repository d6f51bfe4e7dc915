//! Workspace backup bundles: a zip holding a manifest, the student database
//! and any uploaded photos. Kept free of crate-internal imports.

use anyhow::{anyhow, Context};
use rusqlite::{Connection, OpenFlags};
use serde_json::json;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const MANIFEST_ENTRY: &str = "manifest.json";
const DB_FILE: &str = "students.sqlite3";
const STAGED_DB_FILE: &str = "students.sqlite3.importing";
const DB_ENTRY: &str = "db/students.sqlite3";
const UPLOADS_DIR: &str = "uploads";
const UPLOADS_PREFIX: &str = "uploads/";
pub const BUNDLE_FORMAT: &str = "studentd-workspace-v1";
pub const PLAIN_SQLITE_FORMAT: &str = "sqlite-file";

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub bundle_format: String,
    pub entry_count: usize,
    pub photo_count: usize,
}

#[derive(Debug, Clone)]
pub struct ImportSummary {
    pub bundle_format_detected: String,
    pub photos_restored: usize,
}

pub fn export_workspace_bundle(
    workspace_path: &Path,
    out_path: &Path,
) -> anyhow::Result<ExportSummary> {
    let db_path = workspace_path.join(DB_FILE);
    if !db_path.is_file() {
        return Err(anyhow!(
            "workspace database not found: {}",
            db_path.to_string_lossy()
        ));
    }

    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
    }

    let mut photos: Vec<std::path::PathBuf> = Vec::new();
    let uploads = workspace_path.join(UPLOADS_DIR);
    if uploads.is_dir() {
        for ent in std::fs::read_dir(&uploads)
            .with_context(|| format!("failed to list {}", uploads.to_string_lossy()))?
        {
            let p = ent?.path();
            if p.is_file() {
                photos.push(p);
            }
        }
    }
    photos.sort();

    let out_file = File::create(out_path).with_context(|| {
        format!(
            "failed to create output file {}",
            out_path.to_string_lossy()
        )
    })?;
    let mut zip = ZipWriter::new(out_file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let manifest = json!({
        "format": BUNDLE_FORMAT,
        "appVersion": env!("CARGO_PKG_VERSION"),
        "exportedAt": chrono::Utc::now().to_rfc3339(),
        "photoCount": photos.len(),
    });
    zip.start_file(MANIFEST_ENTRY, opts)
        .context("failed to start manifest entry")?;
    zip.write_all(
        serde_json::to_string_pretty(&manifest)
            .context("failed to serialize manifest")?
            .as_bytes(),
    )
    .context("failed to write manifest entry")?;

    zip.start_file(DB_ENTRY, opts)
        .context("failed to start database entry")?;
    let mut db_file = File::open(&db_path)
        .with_context(|| format!("failed to open database {}", db_path.to_string_lossy()))?;
    std::io::copy(&mut db_file, &mut zip).context("failed to write database entry")?;

    for photo in &photos {
        let Some(name) = photo.file_name().and_then(|s| s.to_str()) else {
            continue;
        };
        zip.start_file(format!("{}{}", UPLOADS_PREFIX, name), opts)
            .with_context(|| format!("failed to start photo entry {}", name))?;
        let mut f = File::open(photo)
            .with_context(|| format!("failed to open photo {}", photo.to_string_lossy()))?;
        std::io::copy(&mut f, &mut zip).with_context(|| format!("failed to write photo {}", name))?;
    }

    zip.finish().context("failed to finalize zip bundle")?;

    Ok(ExportSummary {
        bundle_format: BUNDLE_FORMAT.to_string(),
        entry_count: 2 + photos.len(),
        photo_count: photos.len(),
    })
}

/// Restores a bundle, or a bare SQLite file, into `workspace_path`. The
/// database is staged in a temp file and checked before it replaces the
/// live one; a rejected backup leaves the workspace untouched.
pub fn import_workspace_bundle(
    in_path: &Path,
    workspace_path: &Path,
) -> anyhow::Result<ImportSummary> {
    std::fs::create_dir_all(workspace_path).with_context(|| {
        format!(
            "failed to create workspace {}",
            workspace_path.to_string_lossy()
        )
    })?;
    let dst = workspace_path.join(DB_FILE);
    let staged = workspace_path.join(STAGED_DB_FILE);
    if staged.exists() {
        let _ = std::fs::remove_file(&staged);
    }

    let (format, mut archive) = if is_zip_file(in_path)? {
        let archive = stage_bundle_database(in_path, &staged)?;
        (BUNDLE_FORMAT, Some(archive))
    } else {
        std::fs::copy(in_path, &staged).with_context(|| {
            format!(
                "failed to copy sqlite backup from {} to {}",
                in_path.to_string_lossy(),
                staged.to_string_lossy()
            )
        })?;
        (PLAIN_SQLITE_FORMAT, None)
    };

    if let Err(e) = validate_database(&staged) {
        let _ = std::fs::remove_file(&staged);
        return Err(e);
    }

    for suffix in ["-wal", "-shm"] {
        let side = workspace_path.join(format!("{}{}", DB_FILE, suffix));
        if side.exists() {
            let _ = std::fs::remove_file(&side);
        }
    }
    if dst.exists() {
        std::fs::remove_file(&dst).with_context(|| {
            format!(
                "failed to remove existing database {}",
                dst.to_string_lossy()
            )
        })?;
    }
    std::fs::rename(&staged, &dst).with_context(|| {
        format!(
            "failed to move restored database to {}",
            dst.to_string_lossy()
        )
    })?;

    let photos_restored = match archive.as_mut() {
        Some(archive) => restore_photos(archive, &workspace_path.join(UPLOADS_DIR))?,
        None => 0,
    };

    Ok(ImportSummary {
        bundle_format_detected: format.to_string(),
        photos_restored,
    })
}

/// Checks the manifest and extracts the database entry to `staged`.
fn stage_bundle_database(in_path: &Path, staged: &Path) -> anyhow::Result<ZipArchive<File>> {
    let in_file = File::open(in_path)
        .with_context(|| format!("failed to open bundle {}", in_path.to_string_lossy()))?;
    let mut archive = ZipArchive::new(in_file).context("invalid zip archive")?;

    let mut manifest_text = String::new();
    archive
        .by_name(MANIFEST_ENTRY)
        .context("bundle missing manifest.json")?
        .read_to_string(&mut manifest_text)
        .context("failed to read manifest.json")?;
    let manifest: serde_json::Value =
        serde_json::from_str(&manifest_text).context("manifest.json is invalid JSON")?;
    let format = manifest
        .get("format")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    if format != BUNDLE_FORMAT {
        return Err(anyhow!("unsupported bundle format: {}", format));
    }

    let mut db_out = File::create(staged).with_context(|| {
        format!(
            "failed to create temp database {}",
            staged.to_string_lossy()
        )
    })?;
    {
        let mut db_entry = archive
            .by_name(DB_ENTRY)
            .context("bundle missing db/students.sqlite3")?;
        std::io::copy(&mut db_entry, &mut db_out).context("failed to extract database entry")?;
    }
    db_out
        .flush()
        .context("failed to flush extracted database")?;
    Ok(archive)
}

/// A restorable database opens, passes `integrity_check` and has a students table.
fn validate_database(path: &Path) -> anyhow::Result<()> {
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .context("backup is not a readable database")?;
    let check: String = conn
        .query_row("PRAGMA integrity_check", [], |r| r.get(0))
        .context("backup is not a SQLite database")?;
    if check != "ok" {
        return Err(anyhow!("backup database failed integrity check: {}", check));
    }
    let has_students: bool = conn
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'students')",
            [],
            |r| r.get(0),
        )
        .context("failed to inspect backup schema")?;
    if !has_students {
        return Err(anyhow!("backup database has no students table"));
    }
    Ok(())
}

fn restore_photos(archive: &mut ZipArchive<File>, uploads: &Path) -> anyhow::Result<usize> {
    let mut restored = 0usize;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).context("failed to read bundle entry")?;
        let Some(name) = entry.name().strip_prefix(UPLOADS_PREFIX).map(|s| s.to_string()) else {
            continue;
        };
        // Flat names only; anything with a path component is ignored.
        if name.is_empty() || name.contains('/') || name.contains('\\') || name.starts_with('.') {
            continue;
        }
        std::fs::create_dir_all(uploads)
            .with_context(|| format!("failed to create {}", uploads.to_string_lossy()))?;
        let target = uploads.join(&name);
        let mut out = File::create(&target)
            .with_context(|| format!("failed to create {}", target.to_string_lossy()))?;
        std::io::copy(&mut entry, &mut out)
            .with_context(|| format!("failed to extract photo {}", name))?;
        restored += 1;
    }
    Ok(restored)
}

fn is_zip_file(path: &Path) -> anyhow::Result<bool> {
    let mut f = File::open(path)
        .with_context(|| format!("failed to open input file {}", path.to_string_lossy()))?;
    let mut sig = [0u8; 4];
    let read = f.read(&mut sig).context("failed to read file signature")?;
    if read < 4 {
        return Ok(false);
    }
    Ok(sig == [0x50, 0x4B, 0x03, 0x04])
}
