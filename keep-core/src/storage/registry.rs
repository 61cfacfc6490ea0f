/*!
Named storage plugins and the single active slot.

The registry also owns the lifecycle locks: ordinary operations run under a
shared lock, while health checks and resets take it exclusively so they never
tear a backend down underneath a caller. A separate check guard lets a second
health check observe that one is already in flight.
*/

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, TryLockError};

use tracing::{debug, info, warn};

use super::{DatabasePlugin, FilesystemDatabase, MemoryDatabase};
use crate::config::{StorageBackend, StorageConfig};
use crate::{KeepError, Result};

/// Outcome of a non-blocking health check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    Healthy,
    Unhealthy,
    /// Another check was running; nothing was checked
    InProgress,
}

/// Registry of storage plugins with one active plugin
pub struct DatabaseRegistry {
    plugins: RwLock<BTreeMap<String, Arc<dyn DatabasePlugin>>>,
    active: RwLock<Option<String>>,
    lifecycle: RwLock<()>,
    check_guard: Mutex<()>,
    checking: AtomicBool,
    require_write: bool,
}

impl DatabaseRegistry {
    /// Create an empty registry
    ///
    /// # Arguments
    /// * `require_write` - Whether health checks fail on read-only backends
    pub fn new(require_write: bool) -> Self {
        Self {
            plugins: RwLock::new(BTreeMap::new()),
            active: RwLock::new(None),
            lifecycle: RwLock::new(()),
            check_guard: Mutex::new(()),
            checking: AtomicBool::new(false),
            require_write,
        }
    }

    /// Build a registry holding every backend and activate the configured one
    ///
    /// The active plugin is set up before returning.
    ///
    /// # Example
    /// ```rust
    /// use keep_core::{DatabaseRegistry, StorageConfig};
    ///
    /// let registry = DatabaseRegistry::from_config(&StorageConfig::ephemeral())?;
    /// assert_eq!(registry.active_name().as_deref(), Some("ephemeral"));
    /// # Ok::<(), keep_core::KeepError>(())
    /// ```
    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        config.validate()?;

        let registry = Self::new(config.require_write);
        registry.register(Arc::new(MemoryDatabase::new()))?;
        registry.register(Arc::new(FilesystemDatabase::with_base_dir(&config.database_path)))?;
        #[cfg(feature = "sqlite")]
        {
            let sqlite = if config.in_memory {
                super::SqliteDatabase::in_memory()
            } else {
                super::SqliteDatabase::open_path(&config.database_path)
            };
            registry.register(Arc::new(sqlite))?;
        }

        let name = config.active_plugin_name();
        if config.disable_database && config.backend != StorageBackend::Ephemeral {
            info!("Persistent storage disabled, using the {} plugin", name);
        }
        registry.set_active(name)?;
        registry.active()?.set_up()?;
        Ok(registry)
    }

    /// Register a plugin under its own name, replacing any previous one
    pub fn register(&self, plugin: Arc<dyn DatabasePlugin>) -> Result<()> {
        let name = plugin.name().to_string();
        debug!("Registering database plugin {}", name);
        self.plugins
            .write()
            .map_err(|_| KeepError::unavailable("database registry lock poisoned"))?
            .insert(name, plugin);
        Ok(())
    }

    /// Remove a plugin, tearing it down; clears the active slot if it matched
    ///
    /// Waits for operations running against the active plugin to finish.
    pub fn remove(&self, name: &str) -> Result<()> {
        let _exclusive = self.lifecycle.write().unwrap_or_else(PoisonError::into_inner);
        let removed = self
            .plugins
            .write()
            .map_err(|_| KeepError::unavailable("database registry lock poisoned"))?
            .remove(name);
        if let Some(plugin) = removed {
            plugin.tear_down();
        }

        let mut active = self
            .active
            .write()
            .map_err(|_| KeepError::unavailable("database registry lock poisoned"))?;
        if active.as_deref() == Some(name) {
            *active = None;
        }
        Ok(())
    }

    /// Names of the registered plugins, in ascending order
    pub fn names(&self) -> Vec<String> {
        self.plugins
            .read()
            .map(|plugins| plugins.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Select the active plugin by name
    pub fn set_active(&self, name: &str) -> Result<()> {
        let _exclusive = self.lifecycle.write().unwrap_or_else(PoisonError::into_inner);
        let known = self
            .plugins
            .read()
            .map_err(|_| KeepError::unavailable("database registry lock poisoned"))?
            .contains_key(name);
        if !known {
            return Err(KeepError::unavailable(format!(
                "Unknown database plugin: {name}"
            )));
        }

        *self
            .active
            .write()
            .map_err(|_| KeepError::unavailable("database registry lock poisoned"))? =
            Some(name.to_string());
        info!("Database plugin {} is active", name);
        Ok(())
    }

    pub fn active_name(&self) -> Option<String> {
        self.active.read().ok().and_then(|active| active.clone())
    }

    /// Resolve the active plugin
    pub fn active(&self) -> Result<Arc<dyn DatabasePlugin>> {
        let name = self
            .active_name()
            .ok_or_else(|| KeepError::unavailable("No active database plugin"))?;
        self.plugins
            .read()
            .map_err(|_| KeepError::unavailable("database registry lock poisoned"))?
            .get(&name)
            .cloned()
            .ok_or_else(|| KeepError::unavailable(format!("Database plugin {name} is not registered")))
    }

    /// Run an operation against the active plugin under the shared lifecycle lock
    pub fn with_active<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&dyn DatabasePlugin) -> Result<T>,
    {
        let _shared = self.lifecycle.read().unwrap_or_else(PoisonError::into_inner);
        let plugin = self.active()?;
        op(plugin.as_ref())
    }

    /// Health-check the active plugin, waiting for any check in flight
    ///
    /// Returns false when no plugin is active or the check fails.
    pub fn check_db(&self) -> bool {
        let _guard = self.check_guard.lock().unwrap_or_else(PoisonError::into_inner);
        self.run_check()
    }

    /// Health-check the active plugin unless a check is already in flight
    pub fn try_check_db(&self) -> CheckStatus {
        let _guard = match self.check_guard.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return CheckStatus::InProgress,
        };
        if self.run_check() {
            CheckStatus::Healthy
        } else {
            CheckStatus::Unhealthy
        }
    }

    /// True while a health check is running
    pub fn is_checking(&self) -> bool {
        self.checking.load(Ordering::SeqCst)
    }

    /// Close and reopen the active plugin
    pub fn reset_active(&self) -> Result<()> {
        let _exclusive = self.lifecycle.write().unwrap_or_else(PoisonError::into_inner);
        self.active()?.reset()
    }

    /// Tear down and remove every registered plugin
    pub fn shutdown(&self) {
        let _exclusive = self.lifecycle.write().unwrap_or_else(PoisonError::into_inner);
        if let Ok(mut plugins) = self.plugins.write() {
            for (name, plugin) in std::mem::take(&mut *plugins) {
                debug!("Removing database plugin {}", name);
                plugin.tear_down();
            }
        }
        if let Ok(mut active) = self.active.write() {
            *active = None;
        }
    }

    fn run_check(&self) -> bool {
        let _exclusive = self.lifecycle.write().unwrap_or_else(PoisonError::into_inner);
        self.checking.store(true, Ordering::SeqCst);

        let healthy = match self.active() {
            Ok(plugin) => plugin.check_db(self.require_write),
            Err(e) => {
                warn!("Database check skipped: {}", e);
                false
            }
        };

        self.checking.store(false, Ordering::SeqCst);
        #[cfg(feature = "metrics")]
        if let Some(metrics) = crate::observability::KeepMetrics::global() {
            metrics.record_check_db(healthy);
        }
        healthy
    }
}

impl std::fmt::Debug for DatabaseRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseRegistry")
            .field("plugins", &self.names())
            .field("active", &self.active_name())
            .field("require_write", &self.require_write)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::{self, TryRecvError};
    use std::thread;
    use std::time::Duration;

    fn memory_registry(require_write: bool) -> DatabaseRegistry {
        let registry = DatabaseRegistry::new(require_write);
        registry.register(Arc::new(MemoryDatabase::new())).unwrap();
        registry.set_active("ephemeral").unwrap();
        registry
    }

    #[test]
    fn test_set_active_unknown_plugin() {
        let registry = DatabaseRegistry::new(false);
        let result = registry.set_active("rocksdb");
        assert!(matches!(result, Err(KeepError::BackendUnavailable(_))));
        assert!(registry.active().is_err());
    }

    #[test]
    fn test_from_config_disabled_database_uses_ephemeral() {
        let mut config = StorageConfig::with_path(StorageBackend::Sqlite, "/nonexistent/keep.db");
        config.disable_database = true;

        let registry = DatabaseRegistry::from_config(&config).unwrap();
        assert_eq!(registry.active_name().as_deref(), Some("ephemeral"));
        assert!(registry.active().unwrap().is_open());
        assert!(registry.names().contains(&"filesystem".to_string()));
    }

    #[test]
    fn test_with_active_runs_against_active_plugin() {
        let registry = memory_registry(false);
        registry.active().unwrap().set_up().unwrap();

        registry.with_active(|db| db.put("queries", "k", "v")).unwrap();
        let value = registry.with_active(|db| db.get("queries", "k")).unwrap();
        assert_eq!(value, "v");
    }

    #[test]
    fn test_check_db_without_active_plugin() {
        let registry = DatabaseRegistry::new(false);
        assert!(!registry.check_db());
        assert_eq!(registry.try_check_db(), CheckStatus::Unhealthy);
    }

    #[test]
    fn test_check_db_require_write() {
        let registry = DatabaseRegistry::new(true);
        registry.register(Arc::new(MemoryDatabase::read_only())).unwrap();
        registry.set_active("ephemeral").unwrap();
        assert!(!registry.check_db());

        let registry = memory_registry(true);
        assert!(registry.check_db());
        assert!(!registry.is_checking());
    }

    #[test]
    fn test_try_check_db_reports_in_progress() {
        let registry = memory_registry(false);
        let _held = registry.check_guard.lock().unwrap();
        assert_eq!(registry.try_check_db(), CheckStatus::InProgress);
    }

    #[test]
    fn test_remove_clears_active() {
        let registry = memory_registry(false);
        registry.remove("ephemeral").unwrap();
        assert!(registry.active_name().is_none());
        assert!(registry.names().is_empty());
    }

    #[test]
    fn test_remove_waits_for_running_operations() {
        let registry = memory_registry(false);
        registry.active().unwrap().set_up().unwrap();
        let registry = &registry;
        let (done_tx, done_rx) = mpsc::channel();

        thread::scope(|scope| {
            registry
                .with_active(|db| {
                    scope.spawn(move || {
                        registry.remove("ephemeral").unwrap();
                        done_tx.send(()).unwrap();
                    });
                    thread::sleep(Duration::from_millis(50));
                    assert!(matches!(done_rx.try_recv(), Err(TryRecvError::Empty)));
                    assert!(db.is_open());
                    db.put("queries", "k", "v")
                })
                .unwrap();
        });

        assert!(done_rx.try_recv().is_ok());
        assert!(registry.active_name().is_none());
    }

    #[test]
    fn test_set_active_switches_between_plugins() {
        let registry = memory_registry(false);
        let dir = tempfile::TempDir::new().unwrap();
        registry
            .register(Arc::new(FilesystemDatabase::with_base_dir(dir.path())))
            .unwrap();

        registry.set_active("filesystem").unwrap();
        assert_eq!(registry.active().unwrap().name(), "filesystem");
        registry.remove("filesystem").unwrap();
        assert!(registry.active().is_err());
        registry.set_active("ephemeral").unwrap();
        assert_eq!(registry.active_name().as_deref(), Some("ephemeral"));
    }

    #[test]
    fn test_shutdown_removes_everything() {
        let registry = DatabaseRegistry::from_config(&StorageConfig::ephemeral()).unwrap();
        let plugin = registry.active().unwrap();
        registry.shutdown();
        assert!(registry.names().is_empty());
        assert!(!plugin.is_open());
        assert!(registry.with_active(|db| db.get("d", "k")).is_err());
    }
}
