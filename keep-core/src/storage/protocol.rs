/*!
Request/response protocol shared by the local and remote storage paths.

A request is a string map carrying `action` (`get`, `put`, `remove`, `scan`)
plus `domain`, `key` and the action-specific fields `value`, `prefix` and
`max`. A response is a list of string maps: `{"v": value}` for `get`, one
`{"k": key}` per key for `scan`, and nothing for `put` and `remove`.
*/

use std::collections::BTreeMap;

use super::DatabasePlugin;
use crate::{KeepError, Result};

/// Flat string map sent to a storage plugin
pub type PluginRequest = BTreeMap<String, String>;

/// Ordered list of result documents returned by a storage plugin
pub type PluginResponse = Vec<BTreeMap<String, String>>;

pub const ACTION_FIELD: &str = "action";
pub const DOMAIN_FIELD: &str = "domain";
pub const KEY_FIELD: &str = "key";
pub const VALUE_FIELD: &str = "value";
pub const PREFIX_FIELD: &str = "prefix";
pub const MAX_FIELD: &str = "max";
pub const VALUE_RESULT: &str = "v";
pub const KEY_RESULT: &str = "k";

/// A parsed storage request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseRequest {
    Get {
        domain: String,
        key: String,
    },
    Put {
        domain: String,
        key: String,
        value: String,
    },
    Remove {
        domain: String,
        key: String,
    },
    Scan {
        domain: String,
        prefix: String,
        max: usize,
    },
}

impl DatabaseRequest {
    /// Parse a protocol request
    ///
    /// Missing `domain`, `key` and `prefix` fields default to the empty
    /// string and a missing `max` means no limit.
    ///
    /// # Errors
    /// `KeepError::Protocol` when `action` is missing or unknown, when a put
    /// has no `value`, or when `max` is not a non-negative integer
    pub fn from_plugin_request(request: &PluginRequest) -> Result<Self> {
        let action = request
            .get(ACTION_FIELD)
            .ok_or_else(|| KeepError::protocol("Database plugin must include a request action"))?;

        let field = |name: &str| request.get(name).cloned().unwrap_or_default();
        let domain = field(DOMAIN_FIELD);

        match action.as_str() {
            "get" => Ok(DatabaseRequest::Get {
                domain,
                key: field(KEY_FIELD),
            }),
            "put" => {
                let value = request.get(VALUE_FIELD).cloned().ok_or_else(|| {
                    KeepError::protocol("Database plugin put action requires a value")
                })?;
                Ok(DatabaseRequest::Put {
                    domain,
                    key: field(KEY_FIELD),
                    value,
                })
            }
            "remove" => Ok(DatabaseRequest::Remove {
                domain,
                key: field(KEY_FIELD),
            }),
            "scan" => {
                let max = match request.get(MAX_FIELD) {
                    Some(max) => max.trim().parse::<usize>().map_err(|e| {
                        KeepError::protocol(format!("Invalid scan max '{max}': {e}"))
                    })?,
                    None => 0,
                };
                Ok(DatabaseRequest::Scan {
                    domain,
                    prefix: field(PREFIX_FIELD),
                    max,
                })
            }
            other => Err(KeepError::protocol(format!(
                "Unknown database plugin action: {other}"
            ))),
        }
    }

    /// Name of the protocol action
    pub fn action(&self) -> &'static str {
        match self {
            DatabaseRequest::Get { .. } => "get",
            DatabaseRequest::Put { .. } => "put",
            DatabaseRequest::Remove { .. } => "remove",
            DatabaseRequest::Scan { .. } => "scan",
        }
    }

    /// Encode as a protocol request
    pub fn to_plugin_request(&self) -> PluginRequest {
        let mut request = PluginRequest::new();
        request.insert(ACTION_FIELD.to_string(), self.action().to_string());
        match self {
            DatabaseRequest::Get { domain, key } | DatabaseRequest::Remove { domain, key } => {
                request.insert(DOMAIN_FIELD.to_string(), domain.clone());
                request.insert(KEY_FIELD.to_string(), key.clone());
            }
            DatabaseRequest::Put { domain, key, value } => {
                request.insert(DOMAIN_FIELD.to_string(), domain.clone());
                request.insert(KEY_FIELD.to_string(), key.clone());
                request.insert(VALUE_FIELD.to_string(), value.clone());
            }
            DatabaseRequest::Scan {
                domain,
                prefix,
                max,
            } => {
                request.insert(DOMAIN_FIELD.to_string(), domain.clone());
                request.insert(PREFIX_FIELD.to_string(), prefix.clone());
                request.insert(MAX_FIELD.to_string(), max.to_string());
            }
        }
        request
    }

    /// Run the request against a plugin and build the protocol response
    pub fn execute<P: DatabasePlugin + ?Sized>(&self, plugin: &P) -> Result<PluginResponse> {
        match self {
            DatabaseRequest::Get { domain, key } => {
                let value = plugin.get(domain, key)?;
                Ok(vec![single(VALUE_RESULT, value)])
            }
            DatabaseRequest::Put { domain, key, value } => {
                plugin.put(domain, key, value)?;
                Ok(PluginResponse::new())
            }
            DatabaseRequest::Remove { domain, key } => {
                plugin.remove(domain, key)?;
                Ok(PluginResponse::new())
            }
            DatabaseRequest::Scan {
                domain,
                prefix,
                max,
            } => Ok(plugin
                .scan(domain, prefix, *max)?
                .into_iter()
                .map(|key| single(KEY_RESULT, key))
                .collect()),
        }
    }
}

/// Value carried by a `get` response, if any
pub fn value_from_response(response: &PluginResponse) -> Option<String> {
    response
        .first()
        .and_then(|item| item.get(VALUE_RESULT))
        .cloned()
}

/// Keys carried by a `scan` response, in response order
pub fn keys_from_response(response: &PluginResponse) -> Vec<String> {
    response
        .iter()
        .filter_map(|item| item.get(KEY_RESULT).cloned())
        .collect()
}

fn single(name: &str, value: String) -> BTreeMap<String, String> {
    BTreeMap::from([(name.to_string(), value)])
}
