//! Runs the built `check_contact_links` binary against small legacy databases
//! and checks its stdout is exactly one JSON report.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use rusqlite::Connection;

fn legacy_db(dir: &Path, rows: &[(&str, Option<i64>, &str)]) -> PathBuf {
    let path = dir.join("database.sqlite");
    let conn = Connection::open(&path).expect("open legacy db");
    conn.execute_batch(
        "CREATE TABLE Contact (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            phoneNumber TEXT,
            email TEXT,
            linkedID INTEGER,
            linkPrecedence TEXT NOT NULL,
            createdAt TEXT NOT NULL,
            updatedAt TEXT NOT NULL,
            deletedAt TEXT
        );",
    )
    .expect("legacy schema");
    for (email, linked_id, precedence) in rows {
        conn.execute(
            "INSERT INTO Contact (email, linkedID, linkPrecedence, createdAt, updatedAt)
             VALUES (?1, ?2, ?3, '2023-04-01T00:00:00.374Z', '2023-04-01T00:00:00.374Z')",
            rusqlite::params![email, linked_id, precedence],
        )
        .expect("insert legacy row");
    }
    path
}

fn run_audit(dir: &Path, db_path: &Path) -> Output {
    Command::new(env!("CARGO_BIN_EXE_check_contact_links"))
        .arg(db_path)
        .env("CONTACTLINK_CONFIG", dir.join("absent-config.json"))
        .env("RUST_LOG", "info")
        .output()
        .expect("run check_contact_links")
}

#[test]
fn test_report_is_the_only_stdout_output() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = legacy_db(dir.path(), &[("a@x.com", Some(99), "secondary")]);

    let output = run_audit(dir.path(), &db_path);
    assert_eq!(output.status.code(), Some(1));

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap_or_else(|e| {
        panic!(
            "stdout is not a JSON document ({}): {}",
            e,
            String::from_utf8_lossy(&output.stdout)
        )
    });
    assert_eq!(report["contacts"], 1);
    assert_eq!(report["issues"][0]["kind"], "danglingLink");
    assert_eq!(report["issues"][0]["linkedId"], 99);

    // The summary log line still goes out, on stderr
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Link audit"), "stderr: {}", stderr);
}

#[test]
fn test_clean_store_exits_zero() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = legacy_db(
        dir.path(),
        &[("a@x.com", None, "primary"), ("b@x.com", Some(1), "secondary")],
    );

    let output = run_audit(dir.path(), &db_path);
    assert_eq!(output.status.code(), Some(0));

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json report");
    assert_eq!(report["contacts"], 2);
    assert_eq!(report["issues"], serde_json::json!([]));
}

#[test]
fn test_missing_database_is_an_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let output = run_audit(dir.path(), &dir.path().join("nope.sqlite"));
    assert_eq!(output.status.code(), Some(2));
    assert!(output.stdout.is_empty());
}
