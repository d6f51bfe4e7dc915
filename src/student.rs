use serde::Serialize;

use crate::identity;

pub const STATUS_ACTIVE: &str = "active";

/// The importable shape of a student: natural key plus the demographic
/// fields a spreadsheet row carries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportRow {
    pub school_id: String,
    pub sl_no: String,
    pub student_name: String,
    pub father_name: String,
    pub mother_name: String,
    pub sex_cast: String,
    pub dob: String,
    pub national_id: String,
    pub mobile_no: String,
    pub admission_class: String,
    pub admission_no: String,
}

impl ImportRow {
    pub fn stable_id(&self) -> String {
        identity::stable_id_for(&self.school_id, &self.admission_no, &self.sl_no)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRecord {
    pub id: String,
    pub stable_id: Option<String>,
    #[serde(flatten)]
    pub identity: ImportRow,
    pub blood_group: String,
    pub address: String,
    pub category: String,
    pub religion: String,
    pub prev_school: String,
    pub transport_required: bool,
    pub medical_issues: String,
    pub emergency_contact: String,
    pub photo: Option<String>,
    pub remarks: String,
    pub status: String,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

impl StudentRecord {
    /// Fresh record for a row that matched nothing in storage.
    pub fn from_import(id: String, stable_id: String, row: &ImportRow, now: &str) -> Self {
        StudentRecord {
            id,
            stable_id: Some(stable_id),
            identity: row.clone(),
            status: STATUS_ACTIVE.to_string(),
            created_at: Some(now.to_string()),
            updated_at: Some(now.to_string()),
            ..Default::default()
        }
    }

    pub fn display_name(&self) -> &str {
        &self.identity.student_name
    }
}
