use serde_json::{json, Map, Value};

use crate::normalize;
use crate::sheet::Sheet;
use crate::student::ImportRow;

/// Logical fields an import sheet may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportField {
    SchoolId,
    SlNo,
    StudentName,
    FatherName,
    MotherName,
    SexCast,
    Dob,
    NationalId,
    MobileNo,
    AdmissionClass,
    AdmissionNo,
}

impl ImportField {
    pub const ALL: [ImportField; 11] = [
        ImportField::SchoolId,
        ImportField::SlNo,
        ImportField::StudentName,
        ImportField::FatherName,
        ImportField::MotherName,
        ImportField::SexCast,
        ImportField::Dob,
        ImportField::NationalId,
        ImportField::MobileNo,
        ImportField::AdmissionClass,
        ImportField::AdmissionNo,
    ];

    pub fn key(self) -> &'static str {
        match self {
            ImportField::SchoolId => "schoolId",
            ImportField::SlNo => "slNo",
            ImportField::StudentName => "studentName",
            ImportField::FatherName => "fatherName",
            ImportField::MotherName => "motherName",
            ImportField::SexCast => "sexCast",
            ImportField::Dob => "dob",
            ImportField::NationalId => "nationalId",
            ImportField::MobileNo => "mobileNo",
            ImportField::AdmissionClass => "admissionClass",
            ImportField::AdmissionNo => "admissionNo",
        }
    }

    /// Accepted header spellings, highest priority first.
    pub fn aliases(self) -> &'static [&'static str] {
        match self {
            ImportField::SchoolId => &["School_ID", "SCHOOL_ID", "School ID", "school_id"],
            ImportField::SlNo => &["SL. NO.", "SL NO", "SL_NO", "S. NO", "Serial", "SL. NO"],
            ImportField::StudentName => &[
                "CANDIDATE_NAME",
                "CANDIDATE NAME",
                "CANDIDATE_NAME ",
                "CANDIDATE",
                "STUDENT_NAME",
                "Name",
            ],
            ImportField::FatherName => &["FATHER_NAME", "FATHER NAME", "Father"],
            ImportField::MotherName => &["MOTHER_NAME", "MOTHER NAME", "Mother"],
            ImportField::SexCast => &["SEX /  CAST", "SEX /  CAST ", "SEX / CAST", "SEX", "GENDER"],
            ImportField::Dob => &["DOB", "Date of Birth", "DATE OF BIRTH"],
            ImportField::NationalId => &["AADHAAR NO.", "AADHAR NO", "AADHAAR", "Aadhaar"],
            ImportField::MobileNo => &["MOBILE NO.", "MOBILE NO", "Mobile", "PHONE", "MOBILE"],
            ImportField::AdmissionClass => &["ADMISSION IN CLASS", "CLASS"],
            ImportField::AdmissionNo => &["ADMISSION NO.", "ADMISSION NO", "ADMISSIONNO", "Admission No"],
        }
    }

    fn slot(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Resolved {
    header: String,
    column: usize,
}

/// Field to sheet-column mapping, resolved once per import run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMap {
    slots: [Option<Resolved>; 11],
}

impl ColumnMap {
    /// For each field, the first alias present among `headers` wins. A field
    /// with no present alias stays unmapped and reads as empty.
    pub fn resolve(sheet: &Sheet) -> Self {
        let mut slots: [Option<Resolved>; 11] = Default::default();
        for field in ImportField::ALL {
            slots[field.slot()] = field.aliases().iter().find_map(|alias| {
                sheet
                    .column_index(alias)
                    .map(|column| Resolved {
                        header: alias.to_string(),
                        column,
                    })
            });
        }
        ColumnMap { slots }
    }

    pub fn header(&self, field: ImportField) -> Option<&str> {
        self.slots[field.slot()].as_ref().map(|r| r.header.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(|s| s.is_none())
    }

    fn value(&self, sheet: &Sheet, row: usize, field: ImportField) -> String {
        let raw = self.slots[field.slot()]
            .as_ref()
            .map(|r| sheet.cell(row, r.column));
        normalize::clean(raw)
    }

    pub fn import_row(&self, sheet: &Sheet, row: usize) -> ImportRow {
        ImportRow {
            school_id: self.value(sheet, row, ImportField::SchoolId),
            sl_no: self.value(sheet, row, ImportField::SlNo),
            student_name: self.value(sheet, row, ImportField::StudentName),
            father_name: self.value(sheet, row, ImportField::FatherName),
            mother_name: self.value(sheet, row, ImportField::MotherName),
            sex_cast: self.value(sheet, row, ImportField::SexCast),
            dob: self.value(sheet, row, ImportField::Dob),
            national_id: self.value(sheet, row, ImportField::NationalId),
            mobile_no: self.value(sheet, row, ImportField::MobileNo),
            admission_class: self.value(sheet, row, ImportField::AdmissionClass),
            admission_no: self.value(sheet, row, ImportField::AdmissionNo),
        }
    }

    pub fn to_json(&self) -> Value {
        let mut out = Map::new();
        for field in ImportField::ALL {
            out.insert(field.key().to_string(), json!(self.header(field)));
        }
        Value::Object(out)
    }
}
