/*!
In-memory storage plugin.

Registered as `ephemeral`. State lives for as long as the plugin stays open;
`tear_down` drops it.
*/

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::{select_keys, DatabasePlugin};
use crate::{KeepError, Result};

type Domains = BTreeMap<String, BTreeMap<String, String>>;

/// Memory-resident storage plugin
///
/// Useful when persistence is disabled and for tests that should not touch
/// the filesystem.
///
/// # Example
/// ```rust
/// use keep_core::storage::{DatabasePlugin, MemoryDatabase};
///
/// let db = MemoryDatabase::new();
/// db.set_up()?;
/// db.put("queries", "q1", "[]")?;
/// assert_eq!(db.get("queries", "q1")?, "[]");
/// # Ok::<(), keep_core::KeepError>(())
/// ```
#[derive(Debug, Default)]
pub struct MemoryDatabase {
    domains: RwLock<Domains>,
    open: AtomicBool,
    read_only: bool,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a plugin that refuses every mutation
    pub fn read_only() -> Self {
        Self {
            read_only: true,
            ..Self::default()
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Domains>> {
        if !self.is_open() {
            return Err(KeepError::unavailable("ephemeral database is not open"));
        }
        self.domains
            .read()
            .map_err(|_| KeepError::unavailable("ephemeral database lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Domains>> {
        if !self.is_open() {
            return Err(KeepError::write("ephemeral database is not open"));
        }
        if self.read_only {
            return Err(KeepError::write("ephemeral database is read-only"));
        }
        self.domains
            .write()
            .map_err(|_| KeepError::write("ephemeral database lock poisoned"))
    }
}

impl DatabasePlugin for MemoryDatabase {
    fn name(&self) -> &str {
        "ephemeral"
    }

    fn set_up(&self) -> Result<()> {
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn tear_down(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            if let Ok(mut domains) = self.domains.write() {
                domains.clear();
            }
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn get(&self, domain: &str, key: &str) -> Result<String> {
        self.read()?
            .get(domain)
            .and_then(|keys| keys.get(key))
            .cloned()
            .ok_or_else(|| KeepError::not_found(domain, key))
    }

    fn put(&self, domain: &str, key: &str, value: &str) -> Result<()> {
        self.write()?
            .entry(domain.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, domain: &str, key: &str) -> Result<()> {
        if let Some(keys) = self.write()?.get_mut(domain) {
            keys.remove(key);
        }
        Ok(())
    }

    fn scan(&self, domain: &str, prefix: &str, max: usize) -> Result<Vec<String>> {
        let domains = self.read()?;
        Ok(domains
            .get(domain)
            .map(|keys| select_keys(keys.keys().map(String::as_str), prefix, max))
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_database_basic_operations() {
        let db = MemoryDatabase::new();
        db.set_up().unwrap();

        db.put("queries", "q1", "first").unwrap();
        db.put("queries", "q1", "second").unwrap();
        assert_eq!(db.get("queries", "q1").unwrap(), "second");

        db.remove("queries", "q1").unwrap();
        assert!(db.get("queries", "q1").unwrap_err().is_not_found());
        assert!(db.remove("queries", "q1").is_ok());
    }

    #[test]
    fn test_domains_are_independent() {
        let db = MemoryDatabase::new();
        db.set_up().unwrap();

        db.put("queries", "shared", "q").unwrap();
        db.put("events", "shared", "e").unwrap();
        assert_eq!(db.get("queries", "shared").unwrap(), "q");
        assert_eq!(db.get("events", "shared").unwrap(), "e");
        assert_eq!(db.scan("logs", "", 0).unwrap(), Vec::<String>::new());
    }

    #[test]
    fn test_closed_database_refuses_access() {
        let db = MemoryDatabase::new();
        assert!(matches!(db.put("d", "k", "v"), Err(KeepError::Write(_))));
        assert!(matches!(db.get("d", "k"), Err(KeepError::BackendUnavailable(_))));
    }

    #[test]
    fn test_tear_down_drops_state() {
        let db = MemoryDatabase::new();
        db.set_up().unwrap();
        db.put("d", "k", "v").unwrap();
        db.reset().unwrap();
        assert!(db.get("d", "k").unwrap_err().is_not_found());
    }

    #[test]
    fn test_read_only_refuses_writes() {
        let db = MemoryDatabase::read_only();
        db.set_up().unwrap();
        assert!(db.is_read_only());
        assert!(matches!(db.put("d", "k", "v"), Err(KeepError::Write(_))));
        assert!(matches!(db.remove("d", "k"), Err(KeepError::Write(_))));
    }

    #[test]
    fn test_check_db_restores_closed_state() {
        let db = MemoryDatabase::new();
        assert!(db.check_db(false));
        assert!(!db.is_open());

        db.set_up().unwrap();
        assert!(db.check_db(true));
        assert!(db.is_open());

        assert!(!MemoryDatabase::read_only().check_db(true));
        assert!(MemoryDatabase::read_only().check_db(false));
    }
}
