/*!
Result model for query evaluations.

A [`Row`] is one result tuple, [`QueryData`] an ordered result set that may
contain duplicate rows, [`DiffResults`] the added/removed partition between two
result sets, and [`QueryLogItem`] the loggable record of one evaluation.
*/

use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Ordered, duplicate-permitting sequence of rows in evaluation order
pub type QueryData = Vec<Row>;

/// Decorations attached to a log item at log time
pub type Decorations = BTreeMap<String, String>;

/// A single result tuple mapping column names to column values
///
/// Column names are unique. Insertion order is kept for serialization but is
/// ignored by equality and ordering, which compare the sorted column set.
///
/// # Example
/// ```rust
/// use keep_core::Row;
///
/// let a = Row::from([("pid", "1"), ("name", "init")]);
/// let b = Row::from([("name", "init"), ("pid", "1")]);
/// assert_eq!(a, b);
/// assert_eq!(a.get("name"), Some("init"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct Row {
    columns: Vec<(String, String)>,
}

impl Row {
    /// Create an empty row
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a column value, replacing any previous value for the column
    ///
    /// Returns the previous value if the column already existed. A replaced
    /// column keeps its original position.
    pub fn insert<K, V>(&mut self, column: K, value: V) -> Option<String>
    where
        K: Into<String>,
        V: Into<String>,
    {
        let column = column.into();
        let value = value.into();
        match self.columns.iter_mut().find(|(name, _)| *name == column) {
            Some((_, existing)) => Some(std::mem::replace(existing, value)),
            None => {
                self.columns.push((column, value));
                None
            }
        }
    }

    /// Builder-style variant of [`Row::insert`]
    pub fn with<K, V>(mut self, column: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.insert(column, value);
        self
    }

    /// Look up a column value
    pub fn get(&self, column: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value.as_str())
    }

    pub fn contains_column(&self, column: &str) -> bool {
        self.get(column).is_some()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Iterate columns in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.columns
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    fn sorted(&self) -> Vec<(&str, &str)> {
        let mut pairs: Vec<(&str, &str)> = self.iter().collect();
        pairs.sort_unstable();
        pairs
    }
}

impl PartialEq for Row {
    fn eq(&self, other: &Self) -> bool {
        self.columns.len() == other.columns.len() && self.sorted() == other.sorted()
    }
}

impl Eq for Row {}

impl PartialOrd for Row {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Row {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sorted().cmp(&other.sorted())
    }
}

impl<K, V> FromIterator<(K, V)> for Row
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut row = Row::new();
        for (column, value) in iter {
            row.insert(column, value);
        }
        row
    }
}

impl<K, V, const N: usize> From<[(K, V); N]> for Row
where
    K: Into<String>,
    V: Into<String>,
{
    fn from(columns: [(K, V); N]) -> Self {
        columns.into_iter().collect()
    }
}

/// The added/removed partition between two result sets
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffResults {
    /// Rows present in the current result set but not the previous one
    pub added: QueryData,
    /// Rows present in the previous result set but not the current one
    pub removed: QueryData,
}

impl DiffResults {
    pub fn new(added: QueryData, removed: QueryData) -> Self {
        Self { added, removed }
    }

    /// True when neither side carries a row
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Results carried by a log item: a diff or a full snapshot, never both
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogPayload {
    Diff(DiffResults),
    Snapshot(QueryData),
}

impl Default for LogPayload {
    fn default() -> Self {
        Self::Diff(DiffResults::default())
    }
}

/// Loggable record of one scheduled query evaluation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryLogItem {
    /// Diff or snapshot results
    pub payload: LogPayload,
    /// Query name
    pub name: String,
    /// Host identifier
    pub identifier: String,
    /// Human readable evaluation time
    pub calendar_time: String,
    /// Unix evaluation time in seconds
    pub time: i64,
    /// Contextual tags attached at log time
    pub decorations: Decorations,
}

/// Calendar time format used for `calendar_time`
pub const CALENDAR_TIME_FORMAT: &str = "%a %b %e %H:%M:%S %Y UTC";

impl QueryLogItem {
    /// Create a log item with empty metadata
    pub fn new<S1, S2>(name: S1, identifier: S2, payload: LogPayload) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
    {
        Self {
            payload,
            name: name.into(),
            identifier: identifier.into(),
            ..Default::default()
        }
    }

    /// Create a log item stamped with the current time
    ///
    /// # Example
    /// ```rust
    /// use keep_core::{DiffResults, LogPayload, QueryLogItem};
    ///
    /// let item = QueryLogItem::stamped("processes", "host1", LogPayload::Diff(DiffResults::default()));
    /// assert!(item.time > 0);
    /// assert!(item.calendar_time.ends_with("UTC"));
    /// ```
    pub fn stamped<S1, S2>(name: S1, identifier: S2, payload: LogPayload) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
    {
        Self::new(name, identifier, payload).with_time(chrono::Utc::now())
    }

    /// Set both `time` and `calendar_time` from a UTC timestamp
    pub fn with_time(mut self, at: chrono::DateTime<chrono::Utc>) -> Self {
        self.time = at.timestamp();
        self.calendar_time = at.format(CALENDAR_TIME_FORMAT).to_string();
        self
    }

    /// Attach a decoration
    pub fn with_decoration<K: Into<String>, V: Into<String>>(mut self, name: K, value: V) -> Self {
        self.decorations.insert(name.into(), value.into());
        self
    }

    /// Diff results, if this item carries a diff
    pub fn diff_results(&self) -> Option<&DiffResults> {
        match &self.payload {
            LogPayload::Diff(results) => Some(results),
            LogPayload::Snapshot(_) => None,
        }
    }

    /// Snapshot rows, if this item carries a snapshot
    pub fn snapshot(&self) -> Option<&QueryData> {
        match &self.payload {
            LogPayload::Snapshot(rows) => Some(rows),
            LogPayload::Diff(_) => None,
        }
    }
}
