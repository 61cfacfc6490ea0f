/*!
SQLite storage plugin.
*/

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, DatabaseName, ErrorCode, OpenFlags, OptionalExtension};
use tracing::{debug, warn};

use super::DatabasePlugin;
use crate::{KeepError, Result};

struct Handle {
    conn: Connection,
    read_only: bool,
    has_table: bool,
}

/// SQLite-backed storage plugin
///
/// All domains share one `entries` table keyed by `(domain, key)`. The
/// database opens read-write when possible and falls back to read-only.
pub struct SqliteDatabase {
    path: PathBuf,
    in_memory: bool,
    handle: Mutex<Option<Handle>>,
}

impl SqliteDatabase {
    /// Create a plugin backed by the database file at `path`
    pub fn open_path<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            in_memory: false,
            handle: Mutex::new(None),
        }
    }

    /// Create a plugin backed by a private in-memory database
    pub fn in_memory() -> Self {
        Self {
            path: PathBuf::from(":memory:"),
            in_memory: true,
            handle: Mutex::new(None),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<Handle>>> {
        self.handle
            .lock()
            .map_err(|_| KeepError::unavailable("sqlite database lock poisoned"))
    }

    fn connect(&self) -> Result<Handle> {
        let (conn, mut read_only) = if self.in_memory {
            (Connection::open_in_memory().map_err(unavailable)?, false)
        } else {
            if let Some(parent) = self.path.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    if let Err(e) = std::fs::create_dir_all(parent) {
                        debug!("Could not create {}: {}", parent.display(), e);
                    }
                }
            }
            match Connection::open(&self.path) {
                Ok(conn) => (conn, false),
                Err(e) => {
                    debug!("Read-write open of {} failed: {}", self.path.display(), e);
                    let conn =
                        Connection::open_with_flags(&self.path, OpenFlags::SQLITE_OPEN_READ_ONLY)
                            .map_err(unavailable)?;
                    (conn, true)
                }
            }
        };

        // A read-write open of a write-protected file silently degrades
        read_only |= conn.is_readonly(DatabaseName::Main).map_err(unavailable)?;

        if !read_only {
            let created = conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS entries (
                    domain TEXT NOT NULL,
                    key TEXT NOT NULL,
                    value TEXT NOT NULL,
                    PRIMARY KEY (domain, key)
                );",
            );
            match created {
                Ok(()) => {}
                Err(e) if e.sqlite_error_code() == Some(ErrorCode::ReadOnly) => read_only = true,
                Err(e) => return Err(unavailable(e)),
            }
        }
        if read_only {
            warn!("Opened sqlite database {} read-only", self.path.display());
        }

        let has_table: bool = conn
            .query_row(
                "SELECT count(*) > 0 FROM sqlite_master WHERE type = 'table' AND name = 'entries'",
                [],
                |row| row.get(0),
            )
            .map_err(unavailable)?;

        Ok(Handle {
            conn,
            read_only,
            has_table,
        })
    }
}

impl DatabasePlugin for SqliteDatabase {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn set_up(&self) -> Result<()> {
        let mut handle = self.lock()?;
        if handle.is_none() {
            *handle = Some(self.connect()?);
        }
        Ok(())
    }

    fn tear_down(&self) {
        if let Ok(mut handle) = self.handle.lock() {
            handle.take();
        }
    }

    fn is_open(&self) -> bool {
        self.handle.lock().map(|h| h.is_some()).unwrap_or(false)
    }

    fn is_read_only(&self) -> bool {
        self.handle
            .lock()
            .map(|h| h.as_ref().is_some_and(|h| h.read_only))
            .unwrap_or(false)
    }

    fn get(&self, domain: &str, key: &str) -> Result<String> {
        let guard = self.lock()?;
        let handle = guard
            .as_ref()
            .ok_or_else(|| KeepError::unavailable("sqlite database is not open"))?;
        if !handle.has_table {
            return Err(KeepError::not_found(domain, key));
        }

        handle
            .conn
            .query_row(
                "SELECT value FROM entries WHERE domain = ?1 AND key = ?2",
                params![domain, key],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .map_err(unavailable)?
            .ok_or_else(|| KeepError::not_found(domain, key))
    }

    fn put(&self, domain: &str, key: &str, value: &str) -> Result<()> {
        let guard = self.lock()?;
        let handle = writable(&guard)?;
        handle
            .conn
            .execute(
                "INSERT INTO entries (domain, key, value) VALUES (?1, ?2, ?3)
                 ON CONFLICT(domain, key) DO UPDATE SET value = excluded.value",
                params![domain, key, value],
            )
            .map_err(write_error)?;
        Ok(())
    }

    fn remove(&self, domain: &str, key: &str) -> Result<()> {
        let guard = self.lock()?;
        let handle = writable(&guard)?;
        handle
            .conn
            .execute(
                "DELETE FROM entries WHERE domain = ?1 AND key = ?2",
                params![domain, key],
            )
            .map_err(write_error)?;
        Ok(())
    }

    fn scan(&self, domain: &str, prefix: &str, max: usize) -> Result<Vec<String>> {
        let guard = self.lock()?;
        let handle = guard
            .as_ref()
            .ok_or_else(|| KeepError::unavailable("sqlite database is not open"))?;
        if !handle.has_table {
            return Ok(Vec::new());
        }

        let limit: i64 = if max == 0 {
            -1
        } else {
            i64::try_from(max).unwrap_or(i64::MAX)
        };
        let mut stmt = handle
            .conn
            .prepare(
                "SELECT key FROM entries
                 WHERE domain = ?1 AND substr(key, 1, length(?2)) = ?2
                 ORDER BY key LIMIT ?3",
            )
            .map_err(unavailable)?;
        let keys = stmt
            .query_map(params![domain, prefix, limit], |row| row.get::<_, String>(0))
            .map_err(unavailable)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(unavailable)?;
        Ok(keys)
    }
}

fn writable<'a>(guard: &'a MutexGuard<'_, Option<Handle>>) -> Result<&'a Handle> {
    match guard.as_ref() {
        None => Err(KeepError::write("sqlite database is not open")),
        Some(handle) if handle.read_only => Err(KeepError::write("sqlite database is read-only")),
        Some(handle) => Ok(handle),
    }
}

fn unavailable(e: rusqlite::Error) -> KeepError {
    KeepError::unavailable(format!("sqlite: {e}"))
}

fn write_error(e: rusqlite::Error) -> KeepError {
    KeepError::write(format!("sqlite: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sqlite_basic_operations() {
        let db = SqliteDatabase::in_memory();
        db.set_up().unwrap();

        db.put("queries", "q1", "one").unwrap();
        db.put("queries", "q1", "two").unwrap();
        assert_eq!(db.get("queries", "q1").unwrap(), "two");

        db.remove("queries", "q1").unwrap();
        assert!(db.get("queries", "q1").unwrap_err().is_not_found());
        assert!(db.remove("queries", "q1").is_ok());
    }

    #[test]
    fn test_sqlite_scan_prefix_with_wildcards() {
        let db = SqliteDatabase::in_memory();
        db.set_up().unwrap();
        for key in ["a%b", "a_c", "abc", "b"] {
            db.put("logs", key, "v").unwrap();
        }
        assert_eq!(db.scan("logs", "a%", 0).unwrap(), vec!["a%b"]);
        assert_eq!(db.scan("logs", "a", 2).unwrap(), vec!["a%b", "a_c"]);
        assert_eq!(db.scan("logs", "", 0).unwrap().len(), 4);
    }

    #[test]
    fn test_sqlite_file_persists_across_reset() {
        let temp_dir = TempDir::new().unwrap();
        let db = SqliteDatabase::open_path(temp_dir.path().join("nested").join("keep.db"));
        db.set_up().unwrap();
        db.put("configurations", "k", "v").unwrap();

        db.reset().unwrap();
        assert_eq!(db.get("configurations", "k").unwrap(), "v");
        assert!(!db.is_read_only());
    }

    #[test]
    fn test_sqlite_closed_refuses_access() {
        let db = SqliteDatabase::in_memory();
        assert!(matches!(db.put("d", "k", "v"), Err(KeepError::Write(_))));
        assert!(matches!(db.get("d", "k"), Err(KeepError::BackendUnavailable(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_sqlite_write_protected_file_opens_read_only() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("keep.db");
        let db = SqliteDatabase::open_path(&file);
        db.set_up().unwrap();
        db.put("queries", "q1", "[]").unwrap();
        db.tear_down();

        std::fs::set_permissions(&file, std::fs::Permissions::from_mode(0o444)).unwrap();
        // Permission bits do not bind a privileged user
        if std::fs::OpenOptions::new().write(true).open(&file).is_ok() {
            std::fs::set_permissions(&file, std::fs::Permissions::from_mode(0o644)).unwrap();
            return;
        }

        assert!(db.check_db(false));
        assert!(!db.check_db(true));

        db.set_up().unwrap();
        assert!(db.is_read_only());
        assert_eq!(db.get("queries", "q1").unwrap(), "[]");
        assert!(matches!(db.put("queries", "q2", "[]"), Err(KeepError::Write(_))));
        db.tear_down();

        std::fs::set_permissions(&file, std::fs::Permissions::from_mode(0o644)).unwrap();
    }

    #[test]
    fn test_sqlite_unopenable_path_is_unhealthy() {
        let temp_dir = TempDir::new().unwrap();
        let db = SqliteDatabase::open_path(temp_dir.path());
        assert!(!db.check_db(false));
        assert!(!db.is_open());
    }
}
