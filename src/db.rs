use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

use crate::identity;

pub const DB_FILE_NAME: &str = "students.sqlite3";

/// UTC timestamp in RFC 3339 form, as stored in every *_at column.
pub fn now_ts() -> String {
    chrono::Utc::now().to_rfc3339()
}

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    let tx = conn.unchecked_transaction()?;
    let set_aside = set_aside_integer_id_tables(&tx)?;
    create_tables(&tx)?;
    for (table, legacy) in &set_aside {
        copy_legacy_rows(&tx, table, legacy)?;
    }
    ensure_students_profile_columns(&tx)?;
    backfill_stable_ids(&tx)?;
    create_indexes(&tx)?;
    tx.commit()?;
    Ok(())
}

fn create_tables(conn: &Connection) -> anyhow::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            role TEXT NOT NULL,
            full_name TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    // aadhaar_no holds the national ID number.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            stable_id TEXT,
            school_id TEXT,
            sl_no TEXT,
            student_name TEXT,
            father_name TEXT,
            mother_name TEXT,
            sex_cast TEXT,
            dob TEXT,
            aadhaar_no TEXT,
            mobile_no TEXT,
            admission_class TEXT,
            admission_no TEXT,
            blood_group TEXT,
            address TEXT,
            category TEXT,
            religion TEXT,
            prev_school TEXT,
            transport_required INTEGER NOT NULL DEFAULT 0,
            medical_issues TEXT,
            emergency_contact TEXT,
            photo TEXT,
            remarks TEXT,
            status TEXT NOT NULL DEFAULT 'active',
            created_at TEXT,
            updated_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            date TEXT NOT NULL,
            status TEXT NOT NULL,
            note TEXT NOT NULL DEFAULT '',
            FOREIGN KEY(student_id) REFERENCES students(id),
            UNIQUE(student_id, date)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS fees(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            year INTEGER NOT NULL,
            month INTEGER NOT NULL,
            amount REAL NOT NULL,
            paid INTEGER NOT NULL DEFAULT 0,
            paid_on TEXT,
            note TEXT NOT NULL DEFAULT '',
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS remarks(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            author TEXT NOT NULL,
            role TEXT NOT NULL,
            text TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;

    // No foreign key: audit rows outlive the students they describe.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS audit_log(
            id TEXT PRIMARY KEY,
            actor TEXT NOT NULL,
            action TEXT NOT NULL,
            student_id TEXT,
            change_summary TEXT NOT NULL,
            timestamp TEXT NOT NULL
        )",
        [],
    )?;

    Ok(())
}

fn create_indexes(conn: &Connection) -> anyhow::Result<()> {
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_students_stable_id ON students(stable_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class ON students(admission_class)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_date ON attendance(date)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_fees_student ON fees(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_remarks_student ON remarks(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_audit_log_student ON audit_log(student_id)",
        [],
    )?;
    Ok(())
}

/// Tables that older deployments keyed by INTEGER rowid. Current tables use
/// text ids throughout, so such tables are renamed out of the way, recreated
/// and copied back.
const KEYED_TABLES: &[&str] = &[
    "users",
    "students",
    "attendance",
    "fees",
    "remarks",
    "audit_log",
];

/// Rows of these tables are dropped when their student no longer exists.
const STUDENT_CHILD_TABLES: &[&str] = &["attendance", "fees", "remarks"];

/// (table, current column, older column name).
const RENAMED_COLUMNS: &[(&str, &str, &str)] = &[
    ("students", "sex_cast", "sex"),
    ("students", "aadhaar_no", "aadhaar"),
    ("students", "mobile_no", "mobile"),
    ("audit_log", "actor", "user"),
];

struct ColumnInfo {
    name: String,
    decl_type: String,
    not_null: bool,
    default: Option<String>,
}

impl ColumnInfo {
    /// Literal used when an older row has NULL in a column that now forbids it.
    fn fallback(&self) -> String {
        if let Some(d) = &self.default {
            return d.clone();
        }
        let t = self.decl_type.to_ascii_uppercase();
        if t.contains("INT") || t.contains("REAL") {
            "0".to_string()
        } else {
            "''".to_string()
        }
    }
}

fn table_columns(conn: &Connection, table: &str) -> anyhow::Result<Vec<ColumnInfo>> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let cols = stmt
        .query_map([], |r| {
            Ok(ColumnInfo {
                name: r.get(1)?,
                decl_type: r.get(2)?,
                not_null: r.get::<_, i64>(3)? != 0,
                default: r.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(cols)
}

fn has_integer_ids(conn: &Connection, table: &str) -> anyhow::Result<bool> {
    Ok(table_columns(conn, table)?
        .iter()
        .any(|c| c.name == "id" && c.decl_type.eq_ignore_ascii_case("INTEGER")))
}

fn set_aside_integer_id_tables(conn: &Connection) -> anyhow::Result<Vec<(&'static str, String)>> {
    let mut moved = Vec::new();
    for table in KEYED_TABLES {
        if !has_integer_ids(conn, table)? {
            continue;
        }
        let legacy = format!("{}_integer_ids", table);
        conn.execute(&format!("ALTER TABLE {} RENAME TO {}", table, legacy), [])?;
        moved.push((*table, legacy));
    }
    Ok(moved)
}

/// Copies an integer-keyed table into its recreated counterpart. Ids become
/// their decimal text, so references between tables still line up.
fn copy_legacy_rows(conn: &Connection, table: &str, legacy: &str) -> anyhow::Result<()> {
    let source: Vec<String> = table_columns(conn, legacy)?
        .into_iter()
        .map(|c| c.name)
        .collect();
    let has_source = |name: &str| source.iter().any(|s| s == name);

    let mut targets = Vec::new();
    let mut exprs = Vec::new();
    for col in table_columns(conn, table)? {
        let from = RENAMED_COLUMNS
            .iter()
            .find(|(t, c, old)| *t == table && *c == col.name && has_source(old))
            .map(|(_, _, old)| *old)
            .unwrap_or(col.name.as_str());
        let expr = if has_source(from) {
            let value = if col.name == "id" || col.name == "student_id" {
                format!("CAST(\"{}\" AS TEXT)", from)
            } else {
                format!("\"{}\"", from)
            };
            if col.not_null {
                format!("COALESCE({}, {})", value, col.fallback())
            } else {
                value
            }
        } else if col.not_null && col.default.is_none() {
            col.fallback()
        } else {
            continue;
        };
        targets.push(format!("\"{}\"", col.name));
        exprs.push(expr);
    }

    let filter = if STUDENT_CHILD_TABLES.contains(&table) && has_source("student_id") {
        " WHERE CAST(\"student_id\" AS TEXT) IN (SELECT id FROM students)"
    } else {
        ""
    };
    let copied = conn.execute(
        &format!(
            "INSERT INTO {} ({}) SELECT {} FROM {}{} ORDER BY rowid",
            table,
            targets.join(", "),
            exprs.join(", "),
            legacy,
            filter
        ),
        [],
    )?;
    let total: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", legacy), [], |r| {
        r.get(0)
    })?;
    conn.execute(&format!("DROP TABLE {}", legacy), [])?;
    tracing::info!(
        table,
        copied,
        skipped = total.saturating_sub(copied as i64),
        "migrated integer-keyed table"
    );
    Ok(())
}

/// Columns missing from workspaces created before student profiles existed.
const STUDENT_PROFILE_COLUMNS: &[(&str, &str)] = &[
    ("stable_id", "TEXT"),
    ("sex_cast", "TEXT"),
    ("aadhaar_no", "TEXT"),
    ("mobile_no", "TEXT"),
    ("blood_group", "TEXT"),
    ("address", "TEXT"),
    ("category", "TEXT"),
    ("religion", "TEXT"),
    ("prev_school", "TEXT"),
    ("transport_required", "INTEGER NOT NULL DEFAULT 0"),
    ("medical_issues", "TEXT"),
    ("emergency_contact", "TEXT"),
    ("photo", "TEXT"),
    ("remarks", "TEXT"),
    ("status", "TEXT NOT NULL DEFAULT 'active'"),
    ("created_at", "TEXT"),
    ("updated_at", "TEXT"),
];

fn ensure_students_profile_columns(conn: &Connection) -> anyhow::Result<()> {
    for (column, decl) in STUDENT_PROFILE_COLUMNS {
        if table_has_column(conn, "students", column)? {
            continue;
        }
        tracing::info!(column, "adding missing students column");
        conn.execute(
            &format!("ALTER TABLE students ADD COLUMN {} {}", column, decl),
            [],
        )?;
    }
    Ok(())
}

/// Derive stable ids for rows that predate them. A derived id already owned by
/// another row is left unset so the unique index can still be built.
fn backfill_stable_ids(conn: &Connection) -> anyhow::Result<()> {
    let mut stmt = conn.prepare(
        "SELECT rowid, id, COALESCE(school_id, ''), COALESCE(admission_no, ''), COALESCE(sl_no, '')
         FROM students
         WHERE stable_id IS NULL
         ORDER BY rowid",
    )?;
    let pending = stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, i64>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, String>(4)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    if pending.is_empty() {
        return Ok(());
    }

    let mut assigned = 0usize;
    for (rowid, id, school_id, admission_no, sl_no) in pending {
        let stable_id = identity::stable_id_for(&school_id, &admission_no, &sl_no);
        let taken: Option<String> = conn
            .query_row(
                "SELECT id FROM students WHERE stable_id = ?",
                [&stable_id],
                |r| r.get(0),
            )
            .optional()?;
        if let Some(owner) = taken {
            tracing::warn!(
                student_id = %id,
                owner = %owner,
                stable_id = %stable_id,
                "stable id already assigned; leaving row unkeyed"
            );
            continue;
        }
        conn.execute(
            "UPDATE students SET stable_id = ? WHERE rowid = ?",
            (&stable_id, rowid),
        )?;
        assigned += 1;
    }
    tracing::info!(assigned, "backfilled student stable ids");
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    Ok(table_columns(conn, table)?.iter().any(|c| c.name == column))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_schema_is_idempotent() {
        let conn = Connection::open_in_memory().expect("open");
        init_schema(&conn).expect("first init");
        init_schema(&conn).expect("second init");
        assert!(table_has_column(&conn, "students", "stable_id").expect("pragma"));
    }

    #[test]
    fn narrow_student_table_is_upgraded_and_keyed() {
        let conn = Connection::open_in_memory().expect("open");
        conn.execute_batch(
            "CREATE TABLE students(
                id TEXT PRIMARY KEY,
                school_id TEXT,
                sl_no TEXT,
                student_name TEXT,
                father_name TEXT,
                mother_name TEXT,
                dob TEXT,
                admission_class TEXT,
                admission_no TEXT
             );
             INSERT INTO students(id, school_id, sl_no, student_name, admission_no)
               VALUES('a', 'S1', '1', 'Asha', 'A7');
             INSERT INTO students(id, school_id, sl_no, student_name, admission_no)
               VALUES('b', 'S1', '2', 'Asha again', 'A7');
             INSERT INTO students(id, school_id, sl_no, student_name, admission_no)
               VALUES('c', 'S1', '3', 'Ravi', '');",
        )
        .expect("seed legacy table");

        init_schema(&conn).expect("upgrade");

        let keyed: Vec<(String, Option<String>)> = conn
            .prepare("SELECT id, stable_id FROM students ORDER BY id")
            .expect("prepare")
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))
            .expect("query")
            .collect::<Result<_, _>>()
            .expect("collect");
        assert_eq!(
            keyed[0].1.as_deref(),
            Some(identity::compute_stable_id("S1", "A7").as_str())
        );
        assert_eq!(keyed[1].1, None, "colliding legacy row stays unkeyed");
        assert_eq!(
            keyed[2].1.as_deref(),
            Some(identity::compute_stable_id("S1", "3").as_str())
        );

        let status: String = conn
            .query_row("SELECT status FROM students WHERE id = 'a'", [], |r| r.get(0))
            .expect("status");
        assert_eq!(status, "active");
    }

    const EARLIER_APP_SCHEMA: &str = "
        CREATE TABLE users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            username TEXT UNIQUE,
            password_hash TEXT,
            role TEXT,
            full_name TEXT,
            created_at TEXT
        );
        CREATE TABLE students (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            stable_id TEXT UNIQUE,
            school_id TEXT,
            sl_no TEXT,
            student_name TEXT,
            father_name TEXT,
            mother_name TEXT,
            sex_cast TEXT,
            dob TEXT,
            aadhaar_no TEXT,
            mobile_no TEXT,
            admission_class TEXT,
            admission_no TEXT,
            blood_group TEXT,
            address TEXT,
            category TEXT,
            religion TEXT,
            prev_school TEXT,
            transport_required INTEGER DEFAULT 0,
            medical_issues TEXT,
            emergency_contact TEXT,
            photo TEXT,
            remarks TEXT,
            status TEXT DEFAULT 'active',
            created_at TEXT,
            updated_at TEXT
        );
        CREATE TABLE attendance (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            student_id INTEGER,
            date TEXT,
            status TEXT,
            note TEXT,
            UNIQUE(student_id, date)
        );
        CREATE TABLE fees (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            student_id INTEGER,
            year INTEGER,
            month INTEGER,
            amount REAL,
            paid INTEGER DEFAULT 0,
            paid_on TEXT,
            note TEXT
        );
        CREATE TABLE remarks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            student_id INTEGER,
            author TEXT,
            role TEXT,
            text TEXT,
            created_at TEXT
        );
        CREATE TABLE audit_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user TEXT,
            action TEXT,
            student_id INTEGER,
            change_summary TEXT,
            timestamp TEXT
        );";

    #[test]
    fn integer_keyed_tables_are_rekeyed_as_text() {
        use crate::store::StudentStore;

        let conn = Connection::open_in_memory().expect("open");
        conn.execute_batch(EARLIER_APP_SCHEMA).expect("earlier schema");
        conn.execute_batch(
            "INSERT INTO users(username, password_hash, role, full_name, created_at)
               VALUES('admin', '240be518fabd2724ddb6f04eeb1da5967448d7e831c08c8fa822809f74c720a9',
                      'admin', 'Administrator', '2024-01-01 10:00:00');
             INSERT INTO students(stable_id, school_id, sl_no, student_name, admission_no)
               VALUES('f3225187e49e', 'S1', '1', 'Asha', 'A7');
             INSERT INTO students(school_id, sl_no, student_name, admission_no)
               VALUES('S1', '2', 'Ravi', '');
             INSERT INTO attendance(student_id, date, status) VALUES(1, '2024-06-01', 'present');
             INSERT INTO attendance(student_id, date, status) VALUES(99, '2024-06-01', 'absent');
             INSERT INTO fees(student_id, year, month, amount) VALUES(2, 2024, 6, 300);
             INSERT INTO audit_log(user, action, student_id, change_summary, timestamp)
               VALUES('admin', 'CREATE', 1, 'Added student Asha', '2024-01-01 10:00:00');",
        )
        .expect("seed earlier rows");

        init_schema(&conn).expect("upgrade");
        assert!(!has_integer_ids(&conn, "students").expect("pragma"));
        let leftovers: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE name LIKE '%_integer_ids'",
                [],
                |r| r.get(0),
            )
            .expect("count");
        assert_eq!(leftovers, 0);

        let students = conn.scan_students().expect("scan");
        let keys: Vec<(&str, Option<&str>)> = students
            .iter()
            .map(|s| (s.id.as_str(), s.stable_id.as_deref()))
            .collect();
        assert_eq!(
            keys,
            vec![("1", Some("f3225187e49e")), ("2", Some("adb2384b1a86"))]
        );
        assert_eq!(students[0].status, "active");

        let attendance: Vec<(String, String)> = conn
            .prepare("SELECT student_id, note FROM attendance")
            .expect("prepare")
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))
            .expect("query")
            .collect::<Result<_, _>>()
            .expect("collect");
        assert_eq!(attendance, vec![("1".to_string(), String::new())]);

        let (fee_student, paid): (String, i64) = conn
            .query_row("SELECT student_id, paid FROM fees", [], |r| Ok((r.get(0)?, r.get(1)?)))
            .expect("fee");
        assert_eq!((fee_student.as_str(), paid), ("2", 0));

        let (actor, audit_student): (String, String) = conn
            .query_row("SELECT actor, student_id FROM audit_log", [], |r| {
                Ok((r.get(0)?, r.get(1)?))
            })
            .expect("audit");
        assert_eq!((actor.as_str(), audit_student.as_str()), ("admin", "1"));

        let admin = crate::auth::authenticate(&conn, "admin", "admin123").expect("login");
        assert_eq!(admin.id, "1");
        assert!(admin.is_admin());

        init_schema(&conn).expect("reopen");
        assert_eq!(conn.scan_students().expect("rescan").len(), 2);
    }

    #[test]
    fn import_script_column_names_are_carried_over() {
        let conn = Connection::open_in_memory().expect("open");
        conn.execute_batch(
            "CREATE TABLE students(
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                school_id TEXT, sl_no TEXT, student_name TEXT, father_name TEXT,
                mother_name TEXT, sex TEXT, dob TEXT, aadhaar TEXT, mobile TEXT,
                admission_class TEXT, admission_no TEXT, remarks TEXT
             );
             INSERT INTO students(school_id, sl_no, student_name, sex, aadhaar, mobile, admission_no)
               VALUES('S1', '1', 'Asha', 'F / GEN', '1111', '900', 'A7');",
        )
        .expect("seed import table");

        init_schema(&conn).expect("upgrade");

        let row: (String, String, String, String, String) = conn
            .query_row(
                "SELECT id, sex_cast, aadhaar_no, mobile_no, stable_id FROM students",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)),
            )
            .expect("row");
        assert_eq!(
            row,
            (
                "1".to_string(),
                "F / GEN".to_string(),
                "1111".to_string(),
                "900".to_string(),
                identity::compute_stable_id("S1", "A7"),
            )
        );
    }
}
