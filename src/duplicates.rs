//! Heuristic detection of stored students that are probably the same person.
//!
//! Every unordered pair is examined once, so the scan is quadratic in the
//! number of students. That is fine for a single school. A much larger
//! population would need blocking (grouping by national ID, mobile and
//! name+dob keys first) while keeping the same pair output.

use serde::Serialize;

use crate::normalize;
use crate::store::{StoreError, StudentStore};
use crate::student::StudentRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchRule {
    NationalId,
    Mobile,
    NameDob,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicatePair {
    pub student_id1: String,
    pub student_id2: String,
    pub name1: String,
    pub name2: String,
    pub national_id1: String,
    pub national_id2: String,
    pub mobile1: String,
    pub mobile2: String,
    pub dob1: String,
    pub dob2: String,
    pub rules: Vec<MatchRule>,
}

impl DuplicatePair {
    fn new(a: &StudentRecord, b: &StudentRecord, rules: Vec<MatchRule>) -> Self {
        DuplicatePair {
            student_id1: a.id.clone(),
            student_id2: b.id.clone(),
            name1: a.identity.student_name.clone(),
            name2: b.identity.student_name.clone(),
            national_id1: a.identity.national_id.clone(),
            national_id2: b.identity.national_id.clone(),
            mobile1: a.identity.mobile_no.clone(),
            mobile2: b.identity.mobile_no.clone(),
            dob1: a.identity.dob.clone(),
            dob2: b.identity.dob.clone(),
            rules,
        }
    }
}

/// Both values present and identical. A blank value never matches anything.
fn same_present(a: &str, b: &str) -> bool {
    normalize::non_empty(a).is_some() && a == b
}

/// Rules that fire for a pair, in reporting order. Empty means no match.
///
/// Values are compared as stored; only the name comparison folds case. The
/// name+dob rule has no blank exemption, so two unnamed records with no date
/// of birth still pair up.
pub fn matching_rules(a: &StudentRecord, b: &StudentRecord) -> Vec<MatchRule> {
    let (x, y) = (&a.identity, &b.identity);
    let mut rules = Vec::new();
    if same_present(&x.national_id, &y.national_id) {
        rules.push(MatchRule::NationalId);
    }
    if same_present(&x.mobile_no, &y.mobile_no) {
        rules.push(MatchRule::Mobile);
    }
    if normalize::name_key(&x.student_name) == normalize::name_key(&y.student_name)
        && x.dob == y.dob
    {
        rules.push(MatchRule::NameDob);
    }
    rules
}

/// Lazy pair scan over a snapshot of the students. Pairs come out in scan
/// order of the first record, then of the second.
pub struct DuplicatePairs {
    records: Vec<StudentRecord>,
    i: usize,
    j: usize,
}

impl DuplicatePairs {
    pub fn new(records: Vec<StudentRecord>) -> Self {
        DuplicatePairs {
            records,
            i: 0,
            j: 1,
        }
    }
}

impl Iterator for DuplicatePairs {
    type Item = DuplicatePair;

    fn next(&mut self) -> Option<DuplicatePair> {
        let n = self.records.len();
        while self.i < n {
            while self.j < n {
                let (a, b) = (&self.records[self.i], &self.records[self.j]);
                self.j += 1;
                if a.id == b.id {
                    continue;
                }
                let rules = matching_rules(a, b);
                if !rules.is_empty() {
                    return Some(DuplicatePair::new(a, b, rules));
                }
            }
            self.i += 1;
            self.j = self.i + 1;
        }
        None
    }
}

pub fn find_duplicates<S: StudentStore + ?Sized>(store: &S) -> Result<DuplicatePairs, StoreError> {
    Ok(DuplicatePairs::new(store.scan_students()?))
}
