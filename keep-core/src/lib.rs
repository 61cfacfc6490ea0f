/*!
# Keep Core

Query result model, differential results and pluggable key/value storage for
a host monitoring agent.

This crate provides:

- Query results as rows of named text columns, with multiset differencing
  between two result sets
- A JSON tree codec for rows, result sets, differential results and log items
- Log item encoding as one combined document or as one event per row
- Domain-scoped key/value storage behind the [`DatabasePlugin`] trait, with
  ephemeral, filesystem and SQLite backends
- A [`Dispatcher`] that reaches the active backend either in-process or
  through a remote call, using the same request protocol

## Architecture

Storage follows a ports-and-adapters layout:
- The [`DatabasePlugin`] trait is the port; every backend is an adapter
- The [`DatabaseRegistry`] holds the backends and the single active one
- Callers only ever talk to the [`Dispatcher`]

## Usage

```rust
use std::sync::Arc;
use keep_core::{diff, serialize_query_log_item_json, DatabaseRegistry, Dispatcher};
use keep_core::{LogPayload, LoggerConfig, QueryLogItem, Row, StorageConfig};

let registry = DatabaseRegistry::from_config(&StorageConfig::ephemeral())?;
let storage = Dispatcher::local(Arc::new(registry));

let previous = vec![Row::from([("pid", "1")])];
let current = vec![Row::from([("pid", "1")]), Row::from([("pid", "2")])];
let changes = diff(&previous, &current);
assert_eq!(changes.added, vec![Row::from([("pid", "2")])]);

let item = QueryLogItem::stamped("processes", "host-1", LogPayload::Diff(changes));
let line = serialize_query_log_item_json(&item, &LoggerConfig::default())?;
storage.put("logs", "processes.1", &line)?;
# Ok::<(), keep_core::KeepError>(())
```
*/

pub mod config;
pub mod diff;
pub mod dispatch;
pub mod error;
pub mod log_item;
pub mod observability;
pub mod results;
pub mod storage;
pub mod tree;

#[cfg(test)]
mod error_tests;

pub use config::{LoggerConfig, StorageBackend, StorageConfig, DEFAULT_DATABASE_PATH};
pub use diff::{add_unique_row, diff};
pub use dispatch::{Dispatcher, RemoteCall, Route};
pub use error::{KeepError, Result};
pub use log_item::{
    deserialize_query_log_item, deserialize_query_log_item_json, serialize_query_log_item,
    serialize_query_log_item_as_events, serialize_query_log_item_as_events_json,
    serialize_query_log_item_json,
};
pub use results::{Decorations, DiffResults, LogPayload, QueryData, QueryLogItem, Row};
pub use storage::{CheckStatus, DatabasePlugin, DatabaseRegistry, Domain, PluginRequest, PluginResponse};
pub use tree::{
    deserialize_diff_results, deserialize_diff_results_json, deserialize_query_data,
    deserialize_query_data_json, deserialize_row, deserialize_row_json, parse_tree,
    serialize_diff_results, serialize_diff_results_json, serialize_query_data,
    serialize_query_data_json, serialize_row, serialize_row_json, write_tree,
};
