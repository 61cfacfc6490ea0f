/*!
Wire documents for query log items.

A [`QueryLogItem`] is logged either as one combined document carrying the
diff (or snapshot) plus host metadata, or exploded into one event document
per added/removed row.
*/

use serde_json::{Map, Value};

use crate::config::LoggerConfig;
use crate::results::{DiffResults, LogPayload, QueryLogItem};
use crate::tree::{
    deserialize_diff_results, deserialize_query_data, kind, leaf_text, parse_tree, row_object,
    serialize_diff_results, serialize_query_data, write_tree,
};
use crate::{KeepError, Result};

const DIFF_RESULTS: &str = "diffResults";
const SNAPSHOT: &str = "snapshot";
const ACTION: &str = "action";
const COLUMNS: &str = "columns";
const DECORATIONS: &str = "decorations";
const NAME: &str = "name";
const HOST_IDENTIFIER: &str = "hostIdentifier";
const CALENDAR_TIME: &str = "calendarTime";
const UNIX_TIME: &str = "unixTime";

/// Build the combined document for a log item
///
/// Items carrying a non-empty diff produce `{"diffResults": ...}`; anything
/// else produces `{"snapshot": [...], "action": "snapshot"}`. Host metadata
/// and decorations follow.
///
/// # Example
/// ```rust
/// use keep_core::{serialize_query_log_item_json, LoggerConfig, LogPayload, QueryLogItem, Row};
///
/// let item = QueryLogItem::new("q1", "host1", LogPayload::Snapshot(vec![Row::from([("a", "1")])]));
/// let text = serialize_query_log_item_json(&item, &LoggerConfig::default())?;
/// assert!(text.starts_with(r#"{"snapshot":[{"a":"1"}],"action":"snapshot""#));
/// # Ok::<(), keep_core::KeepError>(())
/// ```
pub fn serialize_query_log_item(item: &QueryLogItem, config: &LoggerConfig) -> Result<Value> {
    let mut tree = Map::new();
    match &item.payload {
        LogPayload::Diff(results) if !results.is_empty() => {
            tree.insert(DIFF_RESULTS.to_string(), serialize_diff_results(results)?);
        }
        LogPayload::Diff(_) => {
            tree.insert(SNAPSHOT.to_string(), Value::Array(Vec::new()));
            tree.insert(ACTION.to_string(), Value::from(SNAPSHOT));
        }
        LogPayload::Snapshot(rows) => {
            tree.insert(SNAPSHOT.to_string(), serialize_query_data(rows)?);
            tree.insert(ACTION.to_string(), Value::from(SNAPSHOT));
        }
    }

    add_legacy_fields_and_decorations(item, config, &mut tree);
    Ok(Value::Object(tree))
}

pub fn serialize_query_log_item_json(item: &QueryLogItem, config: &LoggerConfig) -> Result<String> {
    write_tree(&serialize_query_log_item(item, config)?)
}

/// Rebuild a log item from a combined document
///
/// `diffResults` wins over `snapshot` when both are present. Decorations are
/// read from the nested `decorations` object only.
pub fn deserialize_query_log_item(tree: &Value) -> Result<QueryLogItem> {
    let object = tree.as_object().ok_or_else(|| {
        KeepError::format(format!("expected log item object, found {}", kind(tree)))
    })?;

    let payload = if let Some(results) = object.get(DIFF_RESULTS) {
        LogPayload::Diff(deserialize_diff_results(results)?)
    } else if let Some(rows) = object.get(SNAPSHOT) {
        LogPayload::Snapshot(deserialize_query_data(rows)?)
    } else {
        LogPayload::Diff(DiffResults::default())
    };

    let mut item = QueryLogItem {
        payload,
        name: text_field(object, NAME)?,
        identifier: text_field(object, HOST_IDENTIFIER)?,
        calendar_time: text_field(object, CALENDAR_TIME)?,
        time: unix_time(object)?,
        ..Default::default()
    };

    if let Some(decorations) = object.get(DECORATIONS) {
        let decorations = decorations.as_object().ok_or_else(|| {
            KeepError::format(format!("expected decorations object, found {}", kind(decorations)))
        })?;
        for (name, value) in decorations {
            item.decorations.insert(name.clone(), leaf_text(name, value)?);
        }
    }

    Ok(item)
}

pub fn deserialize_query_log_item_json(text: &str) -> Result<QueryLogItem> {
    deserialize_query_log_item(&parse_tree(text)?)
}

/// Explode a diff-carrying log item into one document per row
///
/// All `added` events come first, then all `removed` events, each group in
/// its result order. Row columns sit under `columns` so they never collide
/// with the host metadata fields. A snapshot item yields no events.
pub fn serialize_query_log_item_as_events(
    item: &QueryLogItem,
    config: &LoggerConfig,
) -> Result<Vec<Value>> {
    let Some(results) = item.diff_results() else {
        return Ok(Vec::new());
    };

    let actions = [("added", &results.added), ("removed", &results.removed)];
    let mut events = Vec::with_capacity(results.added.len() + results.removed.len());
    for (action, rows) in actions {
        for row in rows {
            let mut event = Map::new();
            add_legacy_fields_and_decorations(item, config, &mut event);
            event.insert(COLUMNS.to_string(), Value::Object(row_object(row)));
            event.insert(ACTION.to_string(), Value::from(action));
            events.push(Value::Object(event));
        }
    }
    Ok(events)
}

pub fn serialize_query_log_item_as_events_json(
    item: &QueryLogItem,
    config: &LoggerConfig,
) -> Result<Vec<String>> {
    serialize_query_log_item_as_events(item, config)?
        .iter()
        .map(write_tree)
        .collect()
}

fn add_legacy_fields_and_decorations(
    item: &QueryLogItem,
    config: &LoggerConfig,
    tree: &mut Map<String, Value>,
) {
    tree.insert(NAME.to_string(), Value::from(item.name.as_str()));
    tree.insert(HOST_IDENTIFIER.to_string(), Value::from(item.identifier.as_str()));
    tree.insert(CALENDAR_TIME.to_string(), Value::from(item.calendar_time.as_str()));
    tree.insert(UNIX_TIME.to_string(), Value::from(item.time));

    if item.decorations.is_empty() {
        return;
    }

    let decorations = item
        .decorations
        .iter()
        .map(|(name, value)| (name.clone(), Value::from(value.as_str())));
    if config.decorations_top_level {
        tree.extend(decorations);
    } else {
        tree.insert(DECORATIONS.to_string(), Value::Object(decorations.collect()));
    }
}

fn text_field(object: &Map<String, Value>, name: &str) -> Result<String> {
    match object.get(name) {
        Some(value) => leaf_text(name, value),
        None => Ok(String::new()),
    }
}

fn unix_time(object: &Map<String, Value>) -> Result<i64> {
    match object.get(UNIX_TIME) {
        None => Ok(0),
        Some(Value::Number(number)) => number
            .as_i64()
            .ok_or_else(|| KeepError::format(format!("unixTime is not an integer: {number}"))),
        Some(Value::String(text)) => text
            .parse()
            .map_err(|e| KeepError::format(format!("unixTime is not an integer: {e}"))),
        Some(other) => Err(KeepError::format(format!(
            "unixTime must be an integer, found {}",
            kind(other)
        ))),
    }
}
