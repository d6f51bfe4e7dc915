use rusqlite::{Connection, OptionalExtension, Row};
use thiserror::Error;

use crate::student::{ImportRow, StudentRecord};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found: {0}")]
    RecordNotFound(String),
    #[error(transparent)]
    Db(#[from] rusqlite::Error),
}

/// Column order shared by every student read and by the CSV export.
pub const STUDENT_COLUMNS: &[&str] = &[
    "id",
    "stable_id",
    "school_id",
    "sl_no",
    "student_name",
    "father_name",
    "mother_name",
    "sex_cast",
    "dob",
    "aadhaar_no",
    "mobile_no",
    "admission_class",
    "admission_no",
    "blood_group",
    "address",
    "category",
    "religion",
    "prev_school",
    "transport_required",
    "medical_issues",
    "emergency_contact",
    "photo",
    "remarks",
    "status",
    "created_at",
    "updated_at",
];

/// Storage operations the reconciler and the duplicate detector rely on.
pub trait StudentStore {
    fn find_by_stable_id(&self, stable_id: &str) -> Result<Option<StudentRecord>, StoreError>;
    fn insert_student(&self, record: &StudentRecord) -> Result<(), StoreError>;
    /// Overwrites only the importable fields; everything else on the record
    /// is left as it was.
    fn update_identity_fields(
        &self,
        stable_id: &str,
        row: &ImportRow,
        now: &str,
    ) -> Result<(), StoreError>;
    fn scan_students(&self) -> Result<Vec<StudentRecord>, StoreError>;
}

pub fn select_sql(filter: &str) -> String {
    format!("SELECT {} FROM students {}", STUDENT_COLUMNS.join(", "), filter)
}

fn text(row: &Row<'_>, idx: usize) -> rusqlite::Result<String> {
    Ok(row.get::<_, Option<String>>(idx)?.unwrap_or_default())
}

pub fn student_from_row(row: &Row<'_>) -> rusqlite::Result<StudentRecord> {
    Ok(StudentRecord {
        id: row.get(0)?,
        stable_id: row.get(1)?,
        identity: ImportRow {
            school_id: text(row, 2)?,
            sl_no: text(row, 3)?,
            student_name: text(row, 4)?,
            father_name: text(row, 5)?,
            mother_name: text(row, 6)?,
            sex_cast: text(row, 7)?,
            dob: text(row, 8)?,
            national_id: text(row, 9)?,
            mobile_no: text(row, 10)?,
            admission_class: text(row, 11)?,
            admission_no: text(row, 12)?,
        },
        blood_group: text(row, 13)?,
        address: text(row, 14)?,
        category: text(row, 15)?,
        religion: text(row, 16)?,
        prev_school: text(row, 17)?,
        transport_required: row.get::<_, Option<i64>>(18)?.unwrap_or(0) != 0,
        medical_issues: text(row, 19)?,
        emergency_contact: text(row, 20)?,
        photo: row.get(21)?,
        remarks: text(row, 22)?,
        status: row
            .get::<_, Option<String>>(23)?
            .unwrap_or_else(|| crate::student::STATUS_ACTIVE.to_string()),
        created_at: row.get(24)?,
        updated_at: row.get(25)?,
    })
}

pub fn get_student(conn: &Connection, student_id: &str) -> Result<StudentRecord, StoreError> {
    conn.query_row(&select_sql("WHERE id = ?"), [student_id], student_from_row)
        .optional()?
        .ok_or_else(|| StoreError::RecordNotFound(student_id.to_string()))
}

pub fn student_exists(conn: &Connection, student_id: &str) -> Result<bool, StoreError> {
    Ok(conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [student_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()?
        .is_some())
}

impl StudentStore for Connection {
    fn find_by_stable_id(&self, stable_id: &str) -> Result<Option<StudentRecord>, StoreError> {
        Ok(self
            .query_row(
                &select_sql("WHERE stable_id = ?"),
                [stable_id],
                student_from_row,
            )
            .optional()?)
    }

    fn insert_student(&self, r: &StudentRecord) -> Result<(), StoreError> {
        let placeholders = vec!["?"; STUDENT_COLUMNS.len()].join(", ");
        let sql = format!(
            "INSERT INTO students({}) VALUES({})",
            STUDENT_COLUMNS.join(", "),
            placeholders
        );
        let i = &r.identity;
        self.execute(
            &sql,
            rusqlite::params![
                r.id,
                r.stable_id,
                i.school_id,
                i.sl_no,
                i.student_name,
                i.father_name,
                i.mother_name,
                i.sex_cast,
                i.dob,
                i.national_id,
                i.mobile_no,
                i.admission_class,
                i.admission_no,
                r.blood_group,
                r.address,
                r.category,
                r.religion,
                r.prev_school,
                if r.transport_required { 1 } else { 0 },
                r.medical_issues,
                r.emergency_contact,
                r.photo,
                r.remarks,
                r.status,
                r.created_at,
                r.updated_at,
            ],
        )?;
        Ok(())
    }

    fn update_identity_fields(
        &self,
        stable_id: &str,
        row: &ImportRow,
        now: &str,
    ) -> Result<(), StoreError> {
        let changed = self.execute(
            "UPDATE students SET
               school_id = ?, sl_no = ?, student_name = ?, father_name = ?, mother_name = ?,
               sex_cast = ?, dob = ?, aadhaar_no = ?, mobile_no = ?, admission_class = ?,
               admission_no = ?, updated_at = ?
             WHERE stable_id = ?",
            rusqlite::params![
                row.school_id,
                row.sl_no,
                row.student_name,
                row.father_name,
                row.mother_name,
                row.sex_cast,
                row.dob,
                row.national_id,
                row.mobile_no,
                row.admission_class,
                row.admission_no,
                now,
                stable_id,
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::RecordNotFound(stable_id.to_string()));
        }
        Ok(())
    }

    fn scan_students(&self) -> Result<Vec<StudentRecord>, StoreError> {
        let mut stmt = self.prepare(&select_sql("ORDER BY rowid"))?;
        let rows = stmt
            .query_map([], student_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn mem_db() -> Connection {
        let conn = Connection::open_in_memory().expect("open");
        db::init_schema(&conn).expect("schema");
        conn
    }

    fn sample_row() -> ImportRow {
        ImportRow {
            school_id: "S1".into(),
            admission_no: "A7".into(),
            student_name: "Asha Rani".into(),
            dob: "2012-04-01".into(),
            ..Default::default()
        }
    }

    #[test]
    fn insert_then_lookup_by_stable_id() {
        let conn = mem_db();
        let row = sample_row();
        let rec = StudentRecord::from_import("s-1".into(), row.stable_id(), &row, "t0");
        conn.insert_student(&rec).expect("insert");

        let found = conn
            .find_by_stable_id(&row.stable_id())
            .expect("lookup")
            .expect("present");
        assert_eq!(found, rec);
        assert!(conn.find_by_stable_id("000000000000").expect("lookup").is_none());
    }

    #[test]
    fn identity_update_leaves_profile_fields_alone() {
        let conn = mem_db();
        let row = sample_row();
        let mut rec = StudentRecord::from_import("s-1".into(), row.stable_id(), &row, "t0");
        rec.blood_group = "O+".into();
        rec.status = "inactive".into();
        conn.insert_student(&rec).expect("insert");

        let mut changed = row.clone();
        changed.student_name = "Asha R.".into();
        changed.mobile_no = "9000000001".into();
        conn.update_identity_fields(&row.stable_id(), &changed, "t1")
            .expect("update");

        let after = get_student(&conn, "s-1").expect("get");
        assert_eq!(after.identity, changed);
        assert_eq!(after.blood_group, "O+");
        assert_eq!(after.status, "inactive");
        assert_eq!(after.created_at.as_deref(), Some("t0"));
        assert_eq!(after.updated_at.as_deref(), Some("t1"));
    }

    #[test]
    fn point_lookups_report_not_found() {
        let conn = mem_db();
        assert!(matches!(
            get_student(&conn, "missing"),
            Err(StoreError::RecordNotFound(id)) if id == "missing"
        ));
        assert!(matches!(
            conn.update_identity_fields("abc", &sample_row(), "t"),
            Err(StoreError::RecordNotFound(_))
        ));
    }
}
