/*!
Result-set differencing.

Rows are compared by content. Duplicate rows are tracked as a multiset so a
result set that drops from three identical rows to one reports two removals.
*/

use std::collections::BTreeMap;

use crate::results::{DiffResults, QueryData, Row};

/// Compute the rows added and removed between two result sets
///
/// Each row of `current` consumes one matching copy from `old` when one is
/// left; otherwise it is added. `added` follows `current` order. `removed` is
/// the multiset difference of `old` and the consumed rows, emitted in row
/// order rather than `old`'s positional order.
///
/// # Example
/// ```rust
/// use keep_core::{diff, Row};
///
/// let a = Row::from([("n", "a")]);
/// let b = Row::from([("n", "b")]);
/// let results = diff(&vec![a.clone(), a.clone(), b.clone()], &vec![a.clone(), b.clone(), b.clone()]);
/// assert_eq!(results.added, vec![b]);
/// assert_eq!(results.removed, vec![a]);
/// ```
pub fn diff(old: &QueryData, current: &QueryData) -> DiffResults {
    let old_set = multiset(old);
    let mut remaining = old_set.clone();
    let mut overlap: BTreeMap<&Row, usize> = BTreeMap::new();
    let mut added = QueryData::new();

    for row in current {
        match remaining.get_mut(row) {
            Some(count) if *count > 0 => {
                *count -= 1;
                *overlap.entry(row).or_insert(0) += 1;
            }
            _ => added.push(row.clone()),
        }
    }

    let mut removed = QueryData::new();
    for (row, count) in old_set {
        let kept = overlap.get(row).copied().unwrap_or(0);
        for _ in kept..count {
            removed.push(row.clone());
        }
    }

    DiffResults { added, removed }
}

/// Append a row only when an equal row is not already present
///
/// Returns true when the row was appended.
pub fn add_unique_row(rows: &mut QueryData, row: Row) -> bool {
    if rows.contains(&row) {
        return false;
    }
    rows.push(row);
    true
}

fn multiset(rows: &QueryData) -> BTreeMap<&Row, usize> {
    let mut counts = BTreeMap::new();
    for row in rows {
        *counts.entry(row).or_insert(0) += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn row(value: &str) -> Row {
        Row::from([("v", value)])
    }

    #[test]
    fn test_diff_identical_is_empty() {
        let q = vec![row("a"), row("a"), row("b")];
        assert!(diff(&q, &q).is_empty());
    }

    #[test]
    fn test_diff_duplicates_across_both_sides() {
        let old = vec![row("a"), row("a"), row("b")];
        let current = vec![row("a"), row("b"), row("b")];
        let results = diff(&old, &current);
        assert_eq!(results.added, vec![row("b")]);
        assert_eq!(results.removed, vec![row("a")]);
    }

    #[test]
    fn test_diff_from_empty() {
        let results = diff(&vec![], &vec![row("x")]);
        assert_eq!(results.added, vec![row("x")]);
        assert!(results.removed.is_empty());
    }

    #[test]
    fn test_diff_to_empty() {
        let results = diff(&vec![row("x")], &vec![]);
        assert!(results.added.is_empty());
        assert_eq!(results.removed, vec![row("x")]);
    }

    #[test]
    fn test_diff_three_copies_shrink_to_one() {
        let old = vec![row("a"), row("a"), row("a")];
        let current = vec![row("a")];
        let results = diff(&old, &current);
        assert!(results.added.is_empty());
        assert_eq!(results.removed, vec![row("a"), row("a")]);
    }

    #[test]
    fn test_diff_added_keeps_current_order() {
        let old = vec![row("m")];
        let current = vec![row("z"), row("m"), row("a"), row("z")];
        let results = diff(&old, &current);
        assert_eq!(results.added, vec![row("z"), row("a"), row("z")]);
        assert!(results.removed.is_empty());
    }

    #[test]
    fn test_diff_removed_is_in_row_order() {
        let old = vec![row("c"), row("a"), row("b")];
        let results = diff(&old, &vec![]);
        assert_eq!(results.removed, vec![row("a"), row("b"), row("c")]);
    }

    #[test]
    fn test_diff_matches_reordered_columns() {
        let old = vec![Row::from([("a", "1"), ("b", "2")])];
        let current = vec![Row::from([("b", "2"), ("a", "1")])];
        assert!(diff(&old, &current).is_empty());
    }

    #[test]
    fn test_add_unique_row() {
        let mut rows = QueryData::new();
        assert!(add_unique_row(&mut rows, row("a")));
        assert!(!add_unique_row(&mut rows, row("a")));
        assert!(add_unique_row(&mut rows, row("b")));
        assert_eq!(rows.len(), 2);
    }

    fn query_data() -> impl Strategy<Value = QueryData> {
        prop::collection::vec(0u8..4, 0..12)
            .prop_map(|values| values.iter().map(|v| row(&v.to_string())).collect())
    }

    proptest! {
        #[test]
        fn prop_diff_conserves_rows(old in query_data(), current in query_data()) {
            let results = diff(&old, &current);
            let overlap = current.len() - results.added.len();
            prop_assert_eq!(old.len(), overlap + results.removed.len());
        }

        #[test]
        fn prop_diff_with_self_is_empty(q in query_data()) {
            prop_assert!(diff(&q, &q).is_empty());
        }

        #[test]
        fn prop_added_rows_come_from_current(old in query_data(), current in query_data()) {
            let results = diff(&old, &current);
            for added in &results.added {
                prop_assert!(current.contains(added));
            }
            for removed in &results.removed {
                prop_assert!(old.contains(removed));
            }
        }
    }
}
