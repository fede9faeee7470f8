//! Schema migrations for the contact store.
//!
//! Numbered SQL migrations are embedded at compile time via `include_str!`.
//! Each migration runs exactly once, tracked by the `schema_version` table.
//!
//! Databases written by the legacy service already hold a `Contact` table
//! but no `schema_version`. The bootstrap step marks the baseline as applied
//! for those so its `CREATE TABLE` never runs against populated data; later
//! migrations still apply.

use std::path::PathBuf;

use rusqlite::{Connection, DatabaseName};

struct Migration {
    version: i32,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        sql: include_str!("migrations/001_baseline.sql"),
    },
    Migration {
        version: 2,
        sql: include_str!("migrations/002_legacy_indexes.sql"),
    },
];

/// Highest applied migration, or 0 for a database that has never been
/// migrated. Creates the tracking table on first use.
fn schema_version(conn: &Connection) -> Result<i32, String> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )
    .map_err(|e| format!("Cannot create schema_version: {}", e))?;

    conn.query_row("SELECT IFNULL(MAX(version), 0) FROM schema_version", [], |row| {
        row.get(0)
    })
    .map_err(|e| format!("Cannot read schema_version: {}", e))
}

fn record_version(conn: &Connection, version: i32) -> Result<(), String> {
    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [version],
    )
    .map(|_| ())
    .map_err(|e| format!("Cannot record schema v{}: {}", version, e))
}

/// Legacy databases have a `Contact` table but no recorded version. Mark the
/// baseline as applied so its `CREATE TABLE` never runs over their rows.
fn bootstrap_existing_db(conn: &Connection) -> Result<bool, String> {
    if schema_version(conn)? > 0 {
        return Ok(false);
    }

    let has_contact_table: bool = conn
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'Contact')",
            [],
            |row| row.get(0),
        )
        .map_err(|e| format!("Cannot inspect sqlite_master: {}", e))?;

    if !has_contact_table {
        return Ok(false);
    }
    record_version(conn, 1)?;
    log::info!("Legacy Contact table found; baseline schema marked as applied");
    Ok(true)
}

/// File backing the `main` schema, or `None` for in-memory and temp databases.
fn main_db_file(conn: &Connection) -> Result<Option<PathBuf>, String> {
    let file: String = conn
        .query_row(
            "SELECT file FROM pragma_database_list WHERE name = 'main'",
            [],
            |row| row.get(0),
        )
        .map_err(|e| format!("Cannot locate database file: {}", e))?;
    Ok((!file.is_empty()).then(|| PathBuf::from(file)))
}

/// Copy the database to `<file>.v<from_version>.bak` with SQLite's online
/// backup before an upgrade touches it. Returns the copy's path.
fn snapshot_before_upgrade(conn: &Connection, from_version: i32) -> Result<Option<PathBuf>, String> {
    let Some(file) = main_db_file(conn)? else {
        return Ok(None);
    };

    let mut name = file.into_os_string();
    name.push(format!(".v{}.bak", from_version));
    let snapshot = PathBuf::from(name);

    conn.backup(DatabaseName::Main, &snapshot, None)
        .map_err(|e| format!("Snapshot to {} failed: {}", snapshot.display(), e))?;

    log::info!("Schema v{} snapshot written to {}", from_version, snapshot.display());
    Ok(Some(snapshot))
}

/// Run all pending migrations.
///
/// Returns the number of migrations applied (0 if already up-to-date).
///
/// Forward-compat guard: a database with a higher version than the highest
/// known migration is rejected rather than written by an older binary.
pub fn run_migrations(conn: &Connection) -> Result<usize, String> {
    bootstrap_existing_db(conn)?;

    let current = schema_version(conn)?;
    let latest = MIGRATIONS.last().map_or(0, |m| m.version);
    if current > latest {
        return Err(format!(
            "Contact store is at schema v{}, newer than this build of contactlink (v{}). \
             Upgrade contactlink before opening it.",
            current, latest
        ));
    }

    let pending: Vec<&Migration> = MIGRATIONS.iter().filter(|m| m.version > current).collect();
    if pending.is_empty() {
        return Ok(0);
    }

    // A brand-new file has nothing worth keeping
    if current > 0 {
        snapshot_before_upgrade(conn, current)?;
    }

    for migration in &pending {
        conn.execute_batch(migration.sql)
            .map_err(|e| format!("Migration v{} failed: {}", migration.version, e))?;
        record_version(conn, migration.version)?;
        log::info!("Contact store schema now at v{}", migration.version);
    }

    Ok(pending.len())
}
