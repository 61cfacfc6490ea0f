/*!
Tree codec for the result model.

Result values convert to and from an ordered JSON tree ([`serde_json::Value`]
with insertion order preserved), and trees convert to and from UTF-8 text.
The diff and log item layers only ever see trees; text is produced at the
edge by [`write_tree`] and consumed by [`parse_tree`].
*/

use serde_json::{Map, Value};

use crate::results::{DiffResults, QueryData, Row};
use crate::{KeepError, Result};

/// Parse UTF-8 JSON text into a tree
pub fn parse_tree(text: &str) -> Result<Value> {
    Ok(serde_json::from_str(text)?)
}

/// Render a tree as compact JSON text
pub fn write_tree(tree: &Value) -> Result<String> {
    Ok(serde_json::to_string(tree)?)
}

/// Convert a row into a flat object of column names to values
pub fn serialize_row(row: &Row) -> Result<Value> {
    Ok(Value::Object(row_object(row)))
}

pub fn serialize_row_json(row: &Row) -> Result<String> {
    write_tree(&serialize_row(row)?)
}

/// Rebuild a row from a flat object
///
/// Columns with an empty name are skipped. Numeric and boolean leaves are
/// kept as their text form and `null` becomes an empty value. Nested objects
/// or arrays are not valid column values.
pub fn deserialize_row(tree: &Value) -> Result<Row> {
    let object = tree
        .as_object()
        .ok_or_else(|| KeepError::format(format!("expected row object, found {}", kind(tree))))?;

    let mut row = Row::new();
    for (column, value) in object {
        if column.is_empty() {
            continue;
        }
        row.insert(column.as_str(), leaf_text(column, value)?);
    }
    Ok(row)
}

pub fn deserialize_row_json(text: &str) -> Result<Row> {
    deserialize_row(&parse_tree(text)?)
}

/// Convert a result set into an array of row objects
pub fn serialize_query_data(rows: &QueryData) -> Result<Value> {
    rows.iter()
        .map(serialize_row)
        .collect::<Result<Vec<_>>>()
        .map(Value::Array)
}

pub fn serialize_query_data_json(rows: &QueryData) -> Result<String> {
    write_tree(&serialize_query_data(rows)?)
}

/// Rebuild a result set from an array of row objects
pub fn deserialize_query_data(tree: &Value) -> Result<QueryData> {
    let elements = tree.as_array().ok_or_else(|| {
        KeepError::format(format!("expected array of rows, found {}", kind(tree)))
    })?;
    elements.iter().map(deserialize_row).collect()
}

pub fn deserialize_query_data_json(text: &str) -> Result<QueryData> {
    deserialize_query_data(&parse_tree(text)?)
}

/// Convert diff results into `{"added": [...], "removed": [...]}`
pub fn serialize_diff_results(results: &DiffResults) -> Result<Value> {
    let mut tree = Map::new();
    tree.insert("added".to_string(), serialize_query_data(&results.added)?);
    tree.insert("removed".to_string(), serialize_query_data(&results.removed)?);
    Ok(Value::Object(tree))
}

pub fn serialize_diff_results_json(results: &DiffResults) -> Result<String> {
    write_tree(&serialize_diff_results(results)?)
}

/// Rebuild diff results; a missing side decodes as empty
pub fn deserialize_diff_results(tree: &Value) -> Result<DiffResults> {
    let object = tree.as_object().ok_or_else(|| {
        KeepError::format(format!("expected diff results object, found {}", kind(tree)))
    })?;

    let side = |name: &str| match object.get(name) {
        Some(rows) => deserialize_query_data(rows),
        None => Ok(QueryData::new()),
    };

    Ok(DiffResults {
        added: side("added")?,
        removed: side("removed")?,
    })
}

pub fn deserialize_diff_results_json(text: &str) -> Result<DiffResults> {
    deserialize_diff_results(&parse_tree(text)?)
}

pub(crate) fn row_object(row: &Row) -> Map<String, Value> {
    row.iter()
        .map(|(column, value)| (column.to_string(), Value::String(value.to_string())))
        .collect()
}

pub(crate) fn leaf_text(name: &str, value: &Value) -> Result<String> {
    match value {
        Value::String(text) => Ok(text.clone()),
        Value::Number(number) => Ok(number.to_string()),
        Value::Bool(flag) => Ok(flag.to_string()),
        Value::Null => Ok(String::new()),
        Value::Array(_) | Value::Object(_) => Err(KeepError::format(format!(
            "value for '{name}' must be a scalar, found {}",
            kind(value)
        ))),
    }
}

pub(crate) fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn sample_rows() -> QueryData {
        vec![
            Row::from([("pid", "1"), ("name", "init")]),
            Row::from([("pid", "2"), ("name", "kthreadd")]),
            Row::from([("pid", "1"), ("name", "init")]),
        ]
    }

    #[test]
    fn test_row_roundtrip_preserves_column_order() {
        let row = Row::from([("z", "last"), ("a", "first")]);
        let text = serialize_row_json(&row).unwrap();
        assert_eq!(text, r#"{"z":"last","a":"first"}"#);

        let decoded = deserialize_row_json(&text).unwrap();
        assert_eq!(decoded, row);
        let columns: Vec<&str> = decoded.iter().map(|(c, _)| c).collect();
        assert_eq!(columns, vec!["z", "a"]);
    }

    #[test]
    fn test_query_data_roundtrip_keeps_duplicates_and_order() {
        let rows = sample_rows();
        let text = serialize_query_data_json(&rows).unwrap();
        let decoded = deserialize_query_data_json(&text).unwrap();
        assert_eq!(decoded, rows);
    }

    #[test]
    fn test_diff_results_roundtrip() {
        let results = DiffResults::new(sample_rows(), vec![Row::from([("pid", "9")])]);
        let text = serialize_diff_results_json(&results).unwrap();
        assert_eq!(deserialize_diff_results_json(&text).unwrap(), results);
    }

    #[test]
    fn test_diff_results_missing_side_is_empty() {
        let decoded = deserialize_diff_results(&json!({"added": [{"a": "1"}]})).unwrap();
        assert_eq!(decoded.added, vec![Row::from([("a", "1")])]);
        assert!(decoded.removed.is_empty());

        let decoded = deserialize_diff_results(&json!({})).unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn test_row_skips_empty_column_names() {
        let row = deserialize_row(&json!({"": "ignored", "a": "1"})).unwrap();
        assert_eq!(row, Row::from([("a", "1")]));
    }

    #[test]
    fn test_row_scalar_leaves_become_text() {
        let row = deserialize_row(&json!({"n": 5, "b": true, "z": null})).unwrap();
        assert_eq!(row.get("n"), Some("5"));
        assert_eq!(row.get("b"), Some("true"));
        assert_eq!(row.get("z"), Some(""));
    }

    #[test]
    fn test_nested_column_value_is_format_error() {
        let result = deserialize_row(&json!({"a": {"b": "c"}}));
        assert!(matches!(result, Err(KeepError::Format(_))));
    }

    #[test]
    fn test_malformed_text_is_format_error() {
        let result = deserialize_query_data_json("[{\"a\": \"1\"");
        match result {
            Err(KeepError::Format(msg)) => assert!(msg.contains("EOF")),
            other => panic!("Expected format error, got {other:?}"),
        }
    }

    #[test]
    fn test_query_data_requires_array() {
        let result = deserialize_query_data(&json!({"a": "1"}));
        assert!(matches!(result, Err(KeepError::Format(_))));
    }

    fn row() -> impl Strategy<Value = Row> {
        prop::collection::vec(("[a-z_]{1,6}", "\\PC{0,8}"), 0..5)
            .prop_map(|columns| columns.into_iter().collect())
    }

    fn query_data() -> impl Strategy<Value = QueryData> {
        prop::collection::vec(row(), 0..6)
    }

    proptest! {
        #[test]
        fn prop_row_roundtrip(original in row()) {
            let text = serialize_row_json(&original).unwrap();
            prop_assert_eq!(deserialize_row_json(&text).unwrap(), original);
        }

        #[test]
        fn prop_query_data_roundtrip(rows in query_data()) {
            let text = serialize_query_data_json(&rows).unwrap();
            prop_assert_eq!(deserialize_query_data_json(&text).unwrap(), rows);
        }

        #[test]
        fn prop_diff_results_roundtrip(added in query_data(), removed in query_data()) {
            let results = DiffResults::new(added, removed);
            let text = serialize_diff_results_json(&results).unwrap();
            prop_assert_eq!(deserialize_diff_results_json(&text).unwrap(), results);
        }
    }
}
