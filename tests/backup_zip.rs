#[path = "../src/backup.rs"]
mod backup;

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
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

fn write_student_db(path: &Path, name: &str) {
    let conn = rusqlite::Connection::open(path).expect("create db");
    conn.execute_batch("CREATE TABLE students(id TEXT PRIMARY KEY, student_name TEXT);")
        .expect("schema");
    conn.execute(
        "INSERT INTO students(id, student_name) VALUES('s1', ?)",
        [name],
    )
    .expect("insert student");
}

fn stored_name(path: &Path) -> String {
    let conn = rusqlite::Connection::open(path).expect("open db");
    conn.query_row("SELECT student_name FROM students WHERE id = 's1'", [], |r| r.get(0))
        .expect("read student")
}

#[test]
fn bundle_carries_database_and_photos() {
    let workspace = temp_dir("studentd-backup-src");
    let workspace2 = temp_dir("studentd-backup-dst");
    let out_dir = temp_dir("studentd-backup-out");

    write_student_db(&workspace.join("students.sqlite3"), "Asha");
    std::fs::create_dir_all(workspace.join("uploads")).expect("uploads dir");
    std::fs::write(workspace.join("uploads").join("20260101_face.png"), b"png-bytes")
        .expect("write photo");

    let bundle_path = out_dir.join("nested").join("workspace.zip");
    let export = backup::export_workspace_bundle(&workspace, &bundle_path).expect("export bundle");
    assert_eq!(export.bundle_format, backup::BUNDLE_FORMAT);
    assert_eq!(export.entry_count, 3);
    assert_eq!(export.photo_count, 1);

    let f = File::open(&bundle_path).expect("open bundle");
    let mut archive = zip::ZipArchive::new(f).expect("open zip archive");
    let mut manifest = String::new();
    archive
        .by_name("manifest.json")
        .expect("manifest entry")
        .read_to_string(&mut manifest)
        .expect("read manifest");
    assert!(manifest.contains(backup::BUNDLE_FORMAT));
    archive
        .by_name("db/students.sqlite3")
        .expect("database entry in bundle");
    archive
        .by_name("uploads/20260101_face.png")
        .expect("photo entry in bundle");

    let import = backup::import_workspace_bundle(&bundle_path, &workspace2).expect("import bundle");
    assert_eq!(import.bundle_format_detected, backup::BUNDLE_FORMAT);
    assert_eq!(import.photos_restored, 1);

    assert_eq!(stored_name(&workspace2.join("students.sqlite3")), "Asha");
    assert!(!workspace2.join("students.sqlite3.importing").exists());
    let photo = std::fs::read(workspace2.join("uploads").join("20260101_face.png"))
        .expect("read restored photo");
    assert_eq!(photo, b"png-bytes");

    let _ = std::fs::remove_dir_all(workspace);
    let _ = std::fs::remove_dir_all(workspace2);
    let _ = std::fs::remove_dir_all(out_dir);
}

#[test]
fn bare_sqlite_file_is_accepted() {
    let out_dir = temp_dir("studentd-backup-plain");
    let workspace = temp_dir("studentd-backup-plain-dst");

    let plain = out_dir.join("copy.sqlite3");
    write_student_db(&plain, "Ravi");

    let import = backup::import_workspace_bundle(&plain, &workspace).expect("import sqlite file");
    assert_eq!(import.bundle_format_detected, backup::PLAIN_SQLITE_FORMAT);

    assert_eq!(stored_name(&workspace.join("students.sqlite3")), "Ravi");

    let _ = std::fs::remove_dir_all(out_dir);
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn foreign_bundle_format_is_rejected() {
    let out_dir = temp_dir("studentd-backup-foreign");
    let workspace = temp_dir("studentd-backup-foreign-dst");
    let bundle = out_dir.join("other.zip");
    {
        use std::io::Write;
        let f = File::create(&bundle).expect("create zip");
        let mut zw = zip::ZipWriter::new(f);
        zw.start_file("manifest.json", zip::write::FileOptions::default())
            .expect("start manifest");
        zw.write_all(br#"{"format":"something-else"}"#)
            .expect("write manifest");
        zw.finish().expect("finish zip");
    }

    let e = backup::import_workspace_bundle(&bundle, &workspace).expect_err("must reject");
    assert!(e.to_string().contains("unsupported bundle format"));
    assert!(!workspace.join("students.sqlite3").exists());

    let _ = std::fs::remove_dir_all(out_dir);
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn non_database_file_leaves_workspace_alone() {
    let out_dir = temp_dir("studentd-backup-notdb");
    let workspace = temp_dir("studentd-backup-notdb-dst");
    write_student_db(&workspace.join("students.sqlite3"), "Asha");

    let roster = out_dir.join("roster.csv");
    std::fs::write(&roster, "School_ID,ADMISSION NO.\nS1,A7\n").expect("write csv");
    let e = backup::import_workspace_bundle(&roster, &workspace).expect_err("must reject csv");
    assert!(e.to_string().contains("database"), "error: {:#}", e);

    assert_eq!(stored_name(&workspace.join("students.sqlite3")), "Asha");
    assert!(!workspace.join("students.sqlite3.importing").exists());

    let _ = std::fs::remove_dir_all(out_dir);
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn database_without_students_is_rejected() {
    let out_dir = temp_dir("studentd-backup-other-db");
    let workspace = temp_dir("studentd-backup-other-db-dst");
    write_student_db(&workspace.join("students.sqlite3"), "Asha");

    let other = out_dir.join("grades.sqlite3");
    {
        let conn = rusqlite::Connection::open(&other).expect("create other db");
        conn.execute_batch("CREATE TABLE marks(id INTEGER PRIMARY KEY, score REAL);")
            .expect("schema");
    }
    let e = backup::import_workspace_bundle(&other, &workspace).expect_err("must reject");
    assert!(e.to_string().contains("no students table"));
    assert_eq!(stored_name(&workspace.join("students.sqlite3")), "Asha");

    let _ = std::fs::remove_dir_all(out_dir);
    let _ = std::fs::remove_dir_all(workspace);
}
