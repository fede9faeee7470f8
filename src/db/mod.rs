//! SQLite-backed contact store.
//!
//! The database lives at `~/.contactlink/contactlink.db` unless the config or
//! `CONTACTLINK_DB_PATH` points elsewhere. One `ContactDb` owns one
//! connection; the server keeps a single instance behind a mutex so every
//! reconciliation runs against the whole store under one transaction.

use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags};

pub mod contacts;
pub mod types;
pub use types::*;

pub struct ContactDb {
    conn: Connection,
}

impl ContactDb {
    /// Borrow the underlying connection for ad-hoc queries.
    pub fn conn_ref(&self) -> &Connection {
        &self.conn
    }

    /// Execute a closure within a SQLite transaction.
    /// Commits on Ok, rolls back on Err.
    ///
    /// `BEGIN IMMEDIATE` takes the write lock up front, so two processes
    /// sharing the file cannot interleave read-modify-write sequences.
    pub fn with_transaction<F, T, E>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Self) -> Result<T, E>,
        E: From<DbError>,
    {
        self.conn
            .execute_batch("BEGIN IMMEDIATE")
            .map_err(DbError::from)?;
        match f(self) {
            Ok(val) => {
                if let Err(e) = self.conn.execute_batch("COMMIT") {
                    self.rollback();
                    return Err(DbError::from(e).into());
                }
                Ok(val)
            }
            Err(e) => {
                self.rollback();
                Err(e)
            }
        }
    }

    fn rollback(&self) {
        if let Err(e) = self.conn.execute_batch("ROLLBACK") {
            log::warn!("Rollback failed: {}", e);
        }
    }

    /// Open a database at an explicit path, creating parent directories and
    /// running pending migrations.
    pub fn open_at(path: PathBuf) -> Result<Self, DbError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(DbError::CreateDir)?;
            }
        }

        let conn = Connection::open(&path)?;

        // Wait out a writer in another process instead of failing straight away
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        // WAL lets the audit binary read while the server writes
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, DbError> {
        let applied = crate::migrations::run_migrations(&conn).map_err(DbError::Migration)?;
        if applied > 0 {
            log::info!("Contact store schema updated ({} migration(s))", applied);
        }
        Ok(Self { conn })
    }

    /// Open an existing database read-only. Used by the audit binary so it can
    /// run safely alongside the server. No migrations are applied.
    pub fn open_readonly_at(path: &Path) -> Result<Self, DbError> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Ok(Self { conn })
    }

    /// Resolve the default database path: `~/.contactlink/contactlink.db`.
    pub fn default_path() -> Result<PathBuf, DbError> {
        let home = dirs::home_dir().ok_or(DbError::HomeDirNotFound)?;
        Ok(home.join(".contactlink").join("contactlink.db"))
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::ContactDb;

    /// File-backed test database in a leaked temp dir.
    pub fn test_db() -> ContactDb {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("contactlink_test.db");
        std::mem::forget(dir);
        ContactDb::open_at(path).expect("open test db")
    }
}
