use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};

pub const UPLOADS_DIR: &str = "uploads";
const ALLOWED_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

pub fn allowed_file(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|s| s.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            ALLOWED_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// Reduces a file name to ASCII letters, digits, `.`, `-` and `_`. Spaces
/// become underscores; leading dots are dropped.
pub fn secure_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or("");
    let mut out = String::with_capacity(base.len());
    for ch in base.chars() {
        match ch {
            c if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' => out.push(c),
            c if c.is_whitespace() => out.push('_'),
            _ => {}
        }
    }
    out.trim_start_matches('.').to_string()
}

/// Copies an allow-listed image into `<workspace>/uploads/` and returns the
/// stored file name.
pub fn store_photo(workspace: &Path, source: &Path) -> anyhow::Result<String> {
    let original = source
        .file_name()
        .and_then(|s| s.to_str())
        .ok_or_else(|| anyhow!("photo path has no file name"))?;
    if !allowed_file(original) {
        return Err(anyhow!(
            "unsupported photo type: {} (allowed: {})",
            original,
            ALLOWED_EXTENSIONS.join(", ")
        ));
    }
    let cleaned = secure_filename(original);
    let stamp = chrono::Utc::now().format("%Y%m%d%H%M%S%f");
    let stored = format!("{}_{}", stamp, cleaned);

    let dir: PathBuf = workspace.join(UPLOADS_DIR);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create {}", dir.to_string_lossy()))?;
    std::fs::copy(source, dir.join(&stored)).with_context(|| {
        format!(
            "failed to copy photo from {}",
            source.to_string_lossy()
        )
    })?;
    Ok(stored)
}
