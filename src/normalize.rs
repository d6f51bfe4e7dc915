//! Field normalization shared by the importer, the identity resolver and
//! the duplicate detector.

/// Cell text as stored: surrounding whitespace removed, missing treated as empty.
pub fn clean(raw: Option<&str>) -> String {
    raw.map(|s| s.trim().to_string()).unwrap_or_default()
}

pub fn non_empty(s: &str) -> Option<&str> {
    let t = s.trim();
    if t.is_empty() {
        None
    } else {
        Some(t)
    }
}

/// Key used for case-insensitive name comparison. Whitespace is significant.
pub fn name_key(name: &str) -> String {
    name.to_lowercase()
}

/// Admission number wins; the serial number is only the fallback when the
/// admission number is blank.
pub fn natural_key_part<'a>(admission_no: &'a str, sl_no: &'a str) -> &'a str {
    if admission_no.trim().is_empty() {
        sl_no
    } else {
        admission_no
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_trims_and_defaults_missing() {
        assert_eq!(clean(Some("  A7 \t")), "A7");
        assert_eq!(clean(None), "");
        assert_eq!(clean(Some("   ")), "");
    }

    #[test]
    fn non_empty_rejects_blank() {
        assert_eq!(non_empty(""), None);
        assert_eq!(non_empty("  "), None);
        assert_eq!(non_empty(" 1234 "), Some("1234"));
    }

    #[test]
    fn name_key_folds_case() {
        assert_eq!(name_key("Asha RANI"), name_key("asha rani"));
        assert_ne!(name_key(" Asha"), name_key("Asha"));
    }

    #[test]
    fn natural_key_prefers_admission_number() {
        assert_eq!(natural_key_part("A7", "12"), "A7");
        assert_eq!(natural_key_part("  ", "12"), "12");
        assert_eq!(natural_key_part("", ""), "");
    }
}
