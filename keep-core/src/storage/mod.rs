/*!
Storage plugins for persistent key/value state.

This module defines the storage abstraction (port) every backend implements
and the concrete backends (adapters). Keys live in domains; a key in one
domain never collides with the same key in another. Callers go through the
[`Dispatcher`](crate::dispatch::Dispatcher), which only knows the
[`DatabasePlugin`] trait.
*/

pub mod local;
pub mod memory;
pub mod protocol;
pub mod registry;
#[cfg(feature = "sqlite")]
pub mod sqlite;

use std::fmt;

use crate::Result;
use tracing::debug;

pub use local::FilesystemDatabase;
pub use memory::MemoryDatabase;
pub use protocol::{DatabaseRequest, PluginRequest, PluginResponse};
pub use registry::{CheckStatus, DatabaseRegistry};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteDatabase;

/// Known storage domains
///
/// A full dump visits exactly these domains; new domains must be added here
/// to be included.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Domain {
    /// Persistent settings
    PersistentSettings,
    /// Scheduled query state (previous results)
    Queries,
    /// Event publisher state
    Events,
    /// Buffered log lines
    Logs,
}

impl Domain {
    /// Every known domain, in dump order
    pub const ALL: [Domain; 4] = [
        Domain::PersistentSettings,
        Domain::Queries,
        Domain::Events,
        Domain::Logs,
    ];

    /// Stable name used as the storage namespace
    pub fn as_str(self) -> &'static str {
        match self {
            Domain::PersistentSettings => "configurations",
            Domain::Queries => "queries",
            Domain::Events => "events",
            Domain::Logs => "logs",
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AsRef<str> for Domain {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

/// Storage abstraction for domain-scoped key/value state
///
/// Implementations must be safe to share between threads: reads may run
/// concurrently, writes are serialized internally. Every operation reports
/// failure through [`Result`] and never panics.
pub trait DatabasePlugin: Send + Sync {
    /// Registry name of this plugin
    fn name(&self) -> &str;

    /// Open or create the underlying resources
    ///
    /// Calling this on an already open plugin is a no-op.
    fn set_up(&self) -> Result<()>;

    /// Release the underlying resources
    fn tear_down(&self);

    /// True between a successful `set_up` and the next `tear_down`
    fn is_open(&self) -> bool;

    /// True when the backend opened without write access
    fn is_read_only(&self) -> bool;

    /// Fetch the value stored under a key
    ///
    /// # Arguments
    /// * `domain` - The domain holding the key
    /// * `key` - The key to fetch
    ///
    /// # Returns
    /// The stored value, or `KeepError::NotFound` when the key is absent
    fn get(&self, domain: &str, key: &str) -> Result<String>;

    /// Insert or replace the value stored under a key
    ///
    /// # Returns
    /// `KeepError::Write` when the backend is read-only or closed
    fn put(&self, domain: &str, key: &str, value: &str) -> Result<()>;

    /// Delete a key; removing an absent key succeeds
    fn remove(&self, domain: &str, key: &str) -> Result<()>;

    /// List keys of a domain starting with `prefix`
    ///
    /// # Arguments
    /// * `domain` - The domain to scan
    /// * `prefix` - Key prefix to match, empty for all keys
    /// * `max` - Maximum number of keys, 0 for no limit
    ///
    /// # Returns
    /// Matching keys in ascending order
    fn scan(&self, domain: &str, prefix: &str, max: usize) -> Result<Vec<String>>;

    /// List every key of a domain, up to `max`
    fn scan_keys(&self, domain: &str, max: usize) -> Result<Vec<String>> {
        self.scan(domain, "", max)
    }

    /// Close and reopen the backend
    fn reset(&self) -> Result<()> {
        self.tear_down();
        self.set_up()
    }

    /// Probe whether the backend can be opened
    ///
    /// Runs `set_up` and, if the plugin was closed before the check,
    /// `tear_down`, so the open/closed state is unchanged afterwards. Any
    /// failure reports unhealthy. With `require_write`, a read-only open is
    /// unhealthy too.
    fn check_db(&self, require_write: bool) -> bool {
        let was_open = self.is_open();
        let healthy = match self.set_up() {
            Ok(()) => !(require_write && self.is_read_only()),
            Err(e) => {
                debug!("Database plugin {} check failed: {}", self.name(), e);
                false
            }
        };
        if !was_open {
            self.tear_down();
        }
        healthy
    }

    /// Handle a protocol request against this plugin
    ///
    /// This is the entry point used when the plugin is reached from another
    /// process; in-process callers use the typed methods directly.
    fn call(&self, request: &PluginRequest) -> Result<PluginResponse> {
        DatabaseRequest::from_plugin_request(request)?.execute(self)
    }
}

/// Select keys matching `prefix` from an ascending key sequence, capped at `max`
pub(crate) fn select_keys<'a, I>(keys: I, prefix: &str, max: usize) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let limit = if max == 0 { usize::MAX } else { max };
    keys.into_iter()
        .filter(|key| key.starts_with(prefix))
        .take(limit)
        .map(str::to_string)
        .collect()
}
