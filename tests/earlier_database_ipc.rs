use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_studentd");
    let mut child = Command::new(exe)
        .env_remove("STUDENTD_WORKSPACE")
        .env_remove("STUDENTD_STARTUP_IMPORT")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn studentd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
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

// sha256("admin123"), as the earlier app stored it.
const EARLIER_ADMIN_HASH: &str = "240be518fabd2724ddb6f04eeb1da5967448d7e831c08c8fa822809f74c720a9";

const ROSTER: &str = "\
SL. NO.,School_ID,ADMISSION NO.,CANDIDATE_NAME,DOB
1,S1,A7,Asha Rani,2012-04-01
2,S1,,Ravi Kumar,2011-09-15
3,S1,A9,Imran,2012-01-20
";

fn write_earlier_database(path: &Path) {
    let conn = rusqlite::Connection::open(path).expect("create earlier db");
    conn.execute_batch(EARLIER_APP_SCHEMA).expect("earlier schema");
    conn.execute(
        "INSERT INTO users(username, password_hash, role, full_name, created_at)
         VALUES('admin', ?, 'admin', 'Administrator', '2024-01-01 10:00:00')",
        [EARLIER_ADMIN_HASH],
    )
    .expect("seed admin");
    // Keys are the first 12 hex digits of sha1("S1|A7") and sha1("S1|2").
    conn.execute_batch(
        "INSERT INTO students(stable_id, school_id, sl_no, student_name, admission_no, blood_group)
           VALUES('f3225187e49e', 'S1', '1', 'Asha', 'A7', 'O+');
         INSERT INTO students(stable_id, school_id, sl_no, student_name, admission_no)
           VALUES('adb2384b1a86', 'S1', '2', 'Ravi', '');
         INSERT INTO attendance(student_id, date, status, note)
           VALUES(1, '2024-06-01', 'present', '');
         INSERT INTO remarks(student_id, author, role, text, created_at)
           VALUES(2, 'admin', 'admin', 'Needs glasses', '2024-06-02 09:00:00');",
    )
    .expect("seed students");
}

fn login(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>, id: &str) {
    request_ok(
        stdin,
        reader,
        id,
        "auth.login",
        json!({ "username": "admin", "password": "admin123" }),
    );
}

#[test]
fn earlier_database_opens_and_reimports_in_place() {
    let workspace = temp_dir("studentd-earlier-db");
    write_earlier_database(&workspace.join("students.sqlite3"));
    let roster = workspace.join("roster.csv");
    std::fs::write(&roster, ROSTER).expect("write roster");

    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    login(&mut stdin, &mut reader, "l1");

    let asha = request_ok(&mut stdin, &mut reader, "g1", "students.get", json!({ "studentId": "1" }));
    assert_eq!(asha["student"]["stableId"], json!("f3225187e49e"));
    assert_eq!(asha["attendance"][0]["status"], json!("present"));

    let run = request_ok(
        &mut stdin,
        &mut reader,
        "r1",
        "import.run",
        json!({ "path": roster.to_string_lossy() }),
    );
    assert_eq!(run["inserted"], json!(1));
    assert_eq!(run["updated"], json!(2));

    let all = request_ok(&mut stdin, &mut reader, "s1", "students.search", json!({}));
    assert_eq!(all["students"].as_array().map(|a| a.len()), Some(3));

    let asha = request_ok(&mut stdin, &mut reader, "g2", "students.get", json!({ "studentId": "1" }));
    assert_eq!(asha["student"]["studentName"], json!("Asha Rani"));
    assert_eq!(asha["student"]["bloodGroup"], json!("O+"));
    let ravi = request_ok(&mut stdin, &mut reader, "g3", "students.get", json!({ "studentId": "2" }));
    assert_eq!(ravi["remarks"][0]["text"], json!("Needs glasses"));

    let pairs = request_ok(&mut stdin, &mut reader, "d1", "duplicates.find", json!({}));
    assert_eq!(pairs["pairs"], json!([]));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn earlier_database_restores_through_backup_import() {
    let workspace = temp_dir("studentd-earlier-restore");
    let saved = workspace.join("saved").join("students.db");
    std::fs::create_dir_all(saved.parent().expect("parent")).expect("saved dir");
    write_earlier_database(&saved);
    let not_a_db = workspace.join("saved").join("roster.csv");
    std::fs::write(&not_a_db, ROSTER).expect("write roster");
    let live = workspace.join("live");

    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": live.to_string_lossy() }),
    );
    login(&mut stdin, &mut reader, "l1");
    request_ok(&mut stdin, &mut reader, "c1", "students.create", json!({
        "fields": { "schoolId": "S9", "admissionNo": "Z1", "studentName": "Keeper" }
    }));

    let refused = request(
        &mut stdin,
        &mut reader,
        "b1",
        "backup.import",
        json!({ "inPath": not_a_db.to_string_lossy() }),
    );
    assert_eq!(refused["ok"], json!(false));
    login(&mut stdin, &mut reader, "l2");
    let kept = request_ok(&mut stdin, &mut reader, "s1", "students.search", json!({ "q": "keeper" }));
    assert_eq!(kept["students"].as_array().map(|a| a.len()), Some(1));

    let restored = request_ok(
        &mut stdin,
        &mut reader,
        "b2",
        "backup.import",
        json!({ "inPath": saved.to_string_lossy() }),
    );
    assert_eq!(restored["sessionEnded"], json!(true));
    login(&mut stdin, &mut reader, "l3");
    let all = request_ok(&mut stdin, &mut reader, "s2", "students.search", json!({}));
    assert_eq!(all["students"].as_array().map(|a| a.len()), Some(2));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
