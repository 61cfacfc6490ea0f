/*!
Storage dispatch for in-process and external callers.

A process either owns storage (it resolves the active plugin from its
[`DatabaseRegistry`] and calls it directly) or is an external extension with
no storage of its own (it sends protocol requests through a [`RemoteCall`]).
The route is chosen once when the [`Dispatcher`] is built; both routes give
the same results.
*/

use std::io::Write;
use std::sync::Arc;

use tracing::{debug, warn};

#[cfg(feature = "metrics")]
use crate::observability::MetricsTimer;
use crate::storage::protocol::{keys_from_response, value_from_response};
use crate::storage::{DatabaseRegistry, DatabaseRequest, Domain, PluginRequest, PluginResponse};
use crate::Result;

/// Registry name that storage requests are addressed to
pub const DATABASE_REGISTRY: &str = "database";

/// Transport to the process that owns storage
///
/// Implementations block until a response arrives or the transport fails.
pub trait RemoteCall: Send + Sync {
    /// Send a request to the active plugin of `registry`
    fn call(&self, registry: &str, request: &PluginRequest) -> Result<PluginResponse>;
}

/// How storage operations reach a plugin
#[derive(Clone)]
pub enum Route {
    /// This process owns storage
    Local(Arc<DatabaseRegistry>),
    /// This process is an extension and must ask its host
    Remote(Arc<dyn RemoteCall>),
}

/// Entry point for storage operations
///
/// # Example
/// ```rust
/// use std::sync::Arc;
/// use keep_core::{DatabaseRegistry, Dispatcher, StorageConfig};
///
/// let registry = DatabaseRegistry::from_config(&StorageConfig::ephemeral())?;
/// let storage = Dispatcher::local(Arc::new(registry));
/// storage.put("queries", "processes", "[]")?;
/// assert_eq!(storage.get("queries", "processes")?, "[]");
/// # Ok::<(), keep_core::KeepError>(())
/// ```
#[derive(Clone)]
pub struct Dispatcher {
    route: Route,
}

impl Dispatcher {
    pub fn new(route: Route) -> Self {
        Self { route }
    }

    /// Dispatch to the active plugin of a local registry
    pub fn local(registry: Arc<DatabaseRegistry>) -> Self {
        Self::new(Route::Local(registry))
    }

    /// Dispatch through a remote call
    pub fn remote(caller: Arc<dyn RemoteCall>) -> Self {
        Self::new(Route::Remote(caller))
    }

    /// True when this process has no storage of its own
    pub fn is_external(&self) -> bool {
        matches!(self.route, Route::Remote(_))
    }

    /// Fetch a value
    ///
    /// # Returns
    /// The stored value, or `KeepError::NotFound` when the key is absent
    pub fn get(&self, domain: &str, key: &str) -> Result<String> {
        self.observe("get", domain, || match &self.route {
            Route::Local(registry) => registry.with_active(|db| db.get(domain, key)),
            Route::Remote(caller) => {
                let request = DatabaseRequest::Get {
                    domain: domain.to_string(),
                    key: key.to_string(),
                };
                let response = caller.call(DATABASE_REGISTRY, &request.to_plugin_request())?;
                Ok(value_from_response(&response).unwrap_or_default())
            }
        })
    }

    /// Insert or replace a value
    pub fn put(&self, domain: &str, key: &str, value: &str) -> Result<()> {
        self.observe("put", domain, || match &self.route {
            Route::Local(registry) => registry.with_active(|db| db.put(domain, key, value)),
            Route::Remote(caller) => {
                let request = DatabaseRequest::Put {
                    domain: domain.to_string(),
                    key: key.to_string(),
                    value: value.to_string(),
                };
                caller.call(DATABASE_REGISTRY, &request.to_plugin_request())?;
                Ok(())
            }
        })
    }

    /// Delete a value; deleting an absent key succeeds
    pub fn remove(&self, domain: &str, key: &str) -> Result<()> {
        self.observe("remove", domain, || match &self.route {
            Route::Local(registry) => registry.with_active(|db| db.remove(domain, key)),
            Route::Remote(caller) => {
                let request = DatabaseRequest::Remove {
                    domain: domain.to_string(),
                    key: key.to_string(),
                };
                caller.call(DATABASE_REGISTRY, &request.to_plugin_request())?;
                Ok(())
            }
        })
    }

    /// List keys of a domain starting with `prefix`, at most `max` (0 = all)
    pub fn scan(&self, domain: &str, prefix: &str, max: usize) -> Result<Vec<String>> {
        self.observe("scan", domain, || match &self.route {
            Route::Local(registry) => registry.with_active(|db| db.scan(domain, prefix, max)),
            Route::Remote(caller) => {
                let request = DatabaseRequest::Scan {
                    domain: domain.to_string(),
                    prefix: prefix.to_string(),
                    max,
                };
                let response = caller.call(DATABASE_REGISTRY, &request.to_plugin_request())?;
                Ok(keys_from_response(&response))
            }
        })
    }

    /// List every key of a domain, at most `max` (0 = all)
    pub fn scan_keys(&self, domain: &str, max: usize) -> Result<Vec<String>> {
        self.scan(domain, "", max)
    }

    /// Write `domain[key]: value` for every key of every known domain
    ///
    /// Domains that cannot be scanned and keys that cannot be read are skipped.
    /// Only errors writing to `out` are returned.
    pub fn dump_database<W: Write>(&self, out: &mut W) -> Result<()> {
        for domain in Domain::ALL {
            let keys = match self.scan_keys(domain.as_str(), 0) {
                Ok(keys) => keys,
                Err(e) => {
                    warn!("Skipping domain {} in dump: {}", domain, e);
                    continue;
                }
            };
            for key in keys {
                match self.get(domain.as_str(), &key) {
                    Ok(value) => writeln!(out, "{domain}[{key}]: {value}")?,
                    Err(e) => warn!("Skipping {}[{}] in dump: {}", domain, key, e),
                }
            }
        }
        Ok(())
    }

    fn observe<T, F>(&self, action: &'static str, domain: &str, op: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        debug!(
            action,
            domain,
            external = self.is_external(),
            "Dispatching storage request"
        );

        #[cfg(feature = "metrics")]
        let timer = MetricsTimer::start(action);

        let result = op();

        #[cfg(feature = "metrics")]
        match &result {
            Err(e) if !e.is_not_found() => timer.finish_with_error(),
            _ => timer.finish(),
        }

        result
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let route = match &self.route {
            Route::Local(_) => "local",
            Route::Remote(_) => "remote",
        };
        f.debug_struct("Dispatcher").field("route", &route).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::protocol::{ACTION_FIELD, MAX_FIELD, PREFIX_FIELD, VALUE_FIELD};
    use crate::{KeepError, StorageConfig};
    use mockall::mock;
    use std::collections::BTreeMap;

    mock! {
        Host {}
        impl RemoteCall for Host {
            fn call(&self, registry: &str, request: &PluginRequest) -> Result<PluginResponse>;
        }
    }

    fn local() -> Dispatcher {
        let registry = DatabaseRegistry::from_config(&StorageConfig::ephemeral()).unwrap();
        Dispatcher::local(Arc::new(registry))
    }

    fn doc(name: &str, value: &str) -> BTreeMap<String, String> {
        BTreeMap::from([(name.to_string(), value.to_string())])
    }

    #[test]
    fn test_local_put_get_remove() {
        let storage = local();
        assert!(!storage.is_external());

        storage.put("queries", "q1", "v1").unwrap();
        assert_eq!(storage.get("queries", "q1").unwrap(), "v1");

        storage.remove("queries", "q1").unwrap();
        assert!(storage.get("queries", "q1").unwrap_err().is_not_found());
        assert!(storage.remove("queries", "q1").is_ok());
    }

    #[test]
    fn test_remote_get_builds_request_and_reads_value() {
        let mut host = MockHost::new();
        host.expect_call()
            .withf(|registry, request| {
                registry == "database"
                    && request.get(ACTION_FIELD).map(String::as_str) == Some("get")
                    && request.get("domain").map(String::as_str) == Some("queries")
                    && request.get("key").map(String::as_str) == Some("q1")
            })
            .times(1)
            .returning(|_, _| Ok(vec![doc("v", "stored")]));

        let storage = Dispatcher::remote(Arc::new(host));
        assert!(storage.is_external());
        assert_eq!(storage.get("queries", "q1").unwrap(), "stored");
    }

    #[test]
    fn test_remote_put_sends_value() {
        let mut host = MockHost::new();
        host.expect_call()
            .withf(|registry, request| {
                registry == "database"
                    && request.get(ACTION_FIELD).map(String::as_str) == Some("put")
                    && request.get(VALUE_FIELD).map(String::as_str) == Some("payload")
            })
            .times(1)
            .returning(|_, _| Ok(Vec::new()));

        let storage = Dispatcher::remote(Arc::new(host));
        storage.put("logs", "k", "payload").unwrap();
    }

    #[test]
    fn test_remote_scan_collects_keys() {
        let mut host = MockHost::new();
        host.expect_call()
            .withf(|_, request| {
                request.get(ACTION_FIELD).map(String::as_str) == Some("scan")
                    && request.get(PREFIX_FIELD).map(String::as_str) == Some("x")
                    && request.get(MAX_FIELD).map(String::as_str) == Some("2")
            })
            .returning(|_, _| Ok(vec![doc("k", "xa"), doc("other", "ignored"), doc("k", "xb")]));

        let storage = Dispatcher::remote(Arc::new(host));
        assert_eq!(storage.scan("events", "x", 2).unwrap(), vec!["xa", "xb"]);
    }

    #[test]
    fn test_remote_errors_propagate() {
        let mut host = MockHost::new();
        host.expect_call()
            .returning(|_, _| Err(KeepError::unavailable("extension socket closed")));

        let storage = Dispatcher::remote(Arc::new(host));
        assert!(matches!(
            storage.remove("logs", "k"),
            Err(KeepError::BackendUnavailable(_))
        ));
    }

    #[test]
    fn test_dump_database_lists_known_domains() {
        let storage = local();
        storage.put("configurations", "node_key", "abc").unwrap();
        storage.put("queries", "q1", "[]").unwrap();
        storage.put("custom", "hidden", "x").unwrap();

        let mut out = Vec::new();
        storage.dump_database(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, "configurations[node_key]: abc\nqueries[q1]: []\n");
    }

    #[test]
    fn test_dump_database_skips_failing_domains() {
        let mut host = MockHost::new();
        host.expect_call().returning(|_, request| {
            match (
                request.get(ACTION_FIELD).map(String::as_str),
                request.get("domain").map(String::as_str),
            ) {
                (Some("scan"), Some("queries")) => Err(KeepError::unavailable("busy")),
                (Some("scan"), Some("logs")) => Ok(vec![doc("k", "l1"), doc("k", "l2")]),
                (Some("get"), Some("logs")) if request.get("key").map(String::as_str) == Some("l1") => {
                    Err(KeepError::not_found("logs", "l1"))
                }
                (Some("get"), _) => Ok(vec![doc("v", "value")]),
                _ => Ok(Vec::new()),
            }
        });

        let storage = Dispatcher::remote(Arc::new(host));
        let mut out = Vec::new();
        storage.dump_database(&mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "logs[l2]: value\n");
    }
}
