use sha1::{Digest, Sha1};

use crate::normalize;

/// Joins the two natural-key parts before hashing. Neither a school code nor
/// an admission/serial number contains it.
const KEY_SEPARATOR: char = '|';
pub const STABLE_ID_LEN: usize = 12;

/// Deterministic reconciliation key for a student.
///
/// Only the trimmed inputs take part, so `" S1 "` and `"S1"` resolve to the
/// same id. Nothing stored is consulted. The digest is SHA-1 so that keys
/// already stored by earlier deployments keep resolving.
pub fn compute_stable_id(school_id: &str, admission_or_serial: &str) -> String {
    let base = format!(
        "{}{}{}",
        school_id.trim(),
        KEY_SEPARATOR,
        admission_or_serial.trim()
    );
    let digest = Sha1::digest(base.as_bytes());
    let mut hex = format!("{:x}", digest);
    hex.truncate(STABLE_ID_LEN);
    hex
}

/// Stable id for a record given all three natural-key fields.
pub fn stable_id_for(school_id: &str, admission_no: &str, sl_no: &str) -> String {
    compute_stable_id(school_id, normalize::natural_key_part(admission_no, sl_no))
}
