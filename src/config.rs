use std::path::PathBuf;

pub const DEFAULT_IMPORT_SHEET: &str = "section B (2)";

/// Daemon settings, read once at startup.
///
/// | Env var                     | Default         |
/// |-----------------------------|-----------------|
/// | `STUDENTD_WORKSPACE`        | unset           |
/// | `STUDENTD_IMPORT_SHEET`     | `section B (2)` |
/// | `STUDENTD_STARTUP_IMPORT`   | unset           |
/// | `STUDENTD_ADMIN_USERNAME`   | `admin`         |
/// | `STUDENTD_ADMIN_PASSWORD`   | `admin123`      |
/// | `STUDENTD_MIN_PASSWORD_LEN` | `6`             |
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub workspace: Option<PathBuf>,
    pub import_sheet: String,
    pub startup_import: Option<PathBuf>,
    pub admin_username: String,
    pub admin_password: String,
    pub min_password_len: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            workspace: None,
            import_sheet: DEFAULT_IMPORT_SHEET.to_string(),
            startup_import: None,
            admin_username: "admin".to_string(),
            admin_password: "admin123".to_string(),
            min_password_len: 6,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from any key lookup. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Config::default();

        let min_password_len = match get("STUDENTD_MIN_PASSWORD_LEN") {
            Some(raw) => match raw.trim().parse::<usize>() {
                Ok(v) => v,
                Err(_) => {
                    tracing::warn!(
                        value = %raw,
                        default = defaults.min_password_len,
                        "STUDENTD_MIN_PASSWORD_LEN is not a number; using default"
                    );
                    defaults.min_password_len
                }
            },
            None => defaults.min_password_len,
        };

        Config {
            workspace: get("STUDENTD_WORKSPACE").map(PathBuf::from),
            import_sheet: get("STUDENTD_IMPORT_SHEET").unwrap_or(defaults.import_sheet),
            startup_import: get("STUDENTD_STARTUP_IMPORT").map(PathBuf::from),
            admin_username: get("STUDENTD_ADMIN_USERNAME")
                .map(|s| s.trim().to_string())
                .unwrap_or(defaults.admin_username),
            admin_password: get("STUDENTD_ADMIN_PASSWORD").unwrap_or(defaults.admin_password),
            min_password_len,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> Config {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn empty_environment_gives_defaults() {
        assert_eq!(from_pairs(&[]), Config::default());
    }

    #[test]
    fn values_override_defaults() {
        let cfg = from_pairs(&[
            ("STUDENTD_WORKSPACE", "/tmp/ws"),
            ("STUDENTD_IMPORT_SHEET", "roster"),
            ("STUDENTD_ADMIN_USERNAME", " head "),
            ("STUDENTD_MIN_PASSWORD_LEN", "10"),
        ]);
        assert_eq!(cfg.workspace, Some(PathBuf::from("/tmp/ws")));
        assert_eq!(cfg.import_sheet, "roster");
        assert_eq!(cfg.admin_username, "head");
        assert_eq!(cfg.min_password_len, 10);
    }

    #[test]
    fn malformed_number_and_blank_values_fall_back() {
        let cfg = from_pairs(&[
            ("STUDENTD_MIN_PASSWORD_LEN", "six"),
            ("STUDENTD_IMPORT_SHEET", "   "),
        ]);
        assert_eq!(cfg.min_password_len, 6);
        assert_eq!(cfg.import_sheet, DEFAULT_IMPORT_SHEET);
    }
}
