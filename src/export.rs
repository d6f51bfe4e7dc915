use std::io::Write;
use std::path::Path;

use anyhow::Context;
use rusqlite::types::ValueRef;
use rusqlite::Connection;

use crate::store::STUDENT_COLUMNS;

pub fn csv_quote(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

fn cell_text(v: ValueRef<'_>) -> String {
    match v {
        ValueRef::Null => String::new(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) => f.to_string(),
        ValueRef::Text(t) => String::from_utf8_lossy(t).to_string(),
        ValueRef::Blob(b) => String::from_utf8_lossy(b).to_string(),
    }
}

/// Every student, every column, in `STUDENT_COLUMNS` order. Returns the
/// number of data rows written.
pub fn write_students_csv<W: Write>(conn: &Connection, out: &mut W) -> anyhow::Result<usize> {
    writeln!(out, "{}", STUDENT_COLUMNS.join(",")).context("failed to write header")?;
    let sql = format!(
        "SELECT {} FROM students ORDER BY rowid",
        STUDENT_COLUMNS.join(", ")
    );
    let mut stmt = conn.prepare(&sql).context("failed to query students")?;
    let mut rows = stmt.query([])?;
    let mut count = 0usize;
    while let Some(row) = rows.next()? {
        let mut cells = Vec::with_capacity(STUDENT_COLUMNS.len());
        for i in 0..STUDENT_COLUMNS.len() {
            cells.push(csv_quote(&cell_text(row.get_ref(i)?)));
        }
        writeln!(out, "{}", cells.join(",")).context("failed to write row")?;
        count += 1;
    }
    Ok(count)
}

pub fn export_students_csv(conn: &Connection, out_path: &Path) -> anyhow::Result<usize> {
    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
    }
    let mut buf: Vec<u8> = Vec::new();
    let count = write_students_csv(conn, &mut buf)?;
    std::fs::write(out_path, buf)
        .with_context(|| format!("failed to write {}", out_path.to_string_lossy()))?;
    tracing::info!(rows = count, path = %out_path.to_string_lossy(), "exported students csv");
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::sheet::parse_csv;
    use crate::store::StudentStore;
    use crate::student::{ImportRow, StudentRecord};

    #[test]
    fn quoting_follows_rfc4180() {
        assert_eq!(csv_quote("plain"), "plain");
        assert_eq!(csv_quote("a,b"), "\"a,b\"");
        assert_eq!(csv_quote("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(csv_quote("two\nlines"), "\"two\nlines\"");
    }

    #[test]
    fn export_preserves_every_column() {
        let conn = rusqlite::Connection::open_in_memory().expect("open");
        db::init_schema(&conn).expect("schema");
        let row = ImportRow {
            school_id: "S1".into(),
            admission_no: "A7".into(),
            student_name: "Rao, Asha".into(),
            ..Default::default()
        };
        let mut rec = StudentRecord::from_import("s-1".into(), row.stable_id(), &row, "t0");
        rec.address = "12 \"Main\" Road\nTown".into();
        rec.transport_required = true;
        conn.insert_student(&rec).expect("insert");

        let mut buf = Vec::new();
        assert_eq!(write_students_csv(&conn, &mut buf).expect("export"), 1);
        let recs = parse_csv(&String::from_utf8(buf).expect("utf8"));
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0].len(), STUDENT_COLUMNS.len());
        let col = |name: &str| {
            STUDENT_COLUMNS
                .iter()
                .position(|c| *c == name)
                .expect("column")
        };
        assert_eq!(recs[1][col("student_name")], "Rao, Asha");
        assert_eq!(recs[1][col("address")], "12 \"Main\" Road\nTown");
        assert_eq!(recs[1][col("transport_required")], "1");
        assert_eq!(recs[1][col("photo")], "");
    }
}
