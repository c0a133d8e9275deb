use std::collections::HashMap;

use super::flatten::{FlatRow, ForeignKeyRef};
use super::ConflictPolicy;
use crate::catalog::CompileCache;
use crate::literal::SqlValue;

/// One deduplicated value-set for a table. `paths` lists every tree
/// position that contributed the same `(keys, values)` tuple; the group is
/// inserted once and each path resolves back to the surviving identifier
/// through the rank stage.
#[derive(Debug)]
pub(crate) struct RowGroup {
    pub paths: Vec<Vec<i32>>,
    pub values: Vec<SqlValue>,
}

/// Everything needed to compile one table's three-stage chain. Key order,
/// foreign keys and conflict policy come from the table's first-seen row;
/// later rows are not reconciled against that shape.
#[derive(Debug)]
pub(crate) struct TableBatch {
    pub table: String,
    pub keys: Vec<String>,
    pub foreign_keys: Vec<ForeignKeyRef>,
    pub on_conflict: Option<ConflictPolicy>,
    pub unique_keys: Vec<String>,
    pub groups: Vec<RowGroup>,
}

pub(crate) fn build_table_batches(rows: &[FlatRow], cache: &CompileCache) -> Vec<TableBatch> {
    let mut table_order: Vec<&str> = Vec::new();
    let mut by_table: HashMap<&str, Vec<&FlatRow>> = HashMap::new();
    for row in rows {
        let entry = by_table.entry(row.table.as_str()).or_default();
        if entry.is_empty() {
            table_order.push(row.table.as_str());
        }
        entry.push(row);
    }

    table_order
        .into_iter()
        .map(|table| {
            let table_rows = &by_table[table];
            let first = table_rows[0];

            let mut group_order: Vec<String> = Vec::new();
            let mut groups: HashMap<String, RowGroup> = HashMap::new();
            for row in table_rows {
                let group_key = format!("{:?}", (&row.keys, &row.values));
                let group = groups.entry(group_key.clone()).or_insert_with(|| {
                    group_order.push(group_key);
                    RowGroup { paths: Vec::new(), values: row.values.clone() }
                });
                group.paths.push(row.index_path.clone());
            }

            TableBatch {
                table: table.to_string(),
                keys: first.keys.clone(),
                foreign_keys: first.foreign_keys.clone(),
                on_conflict: first.on_conflict.clone(),
                unique_keys: unique_keys_for(first, cache),
                groups: group_order
                    .iter()
                    .filter_map(|key| groups.remove(key))
                    .collect(),
            }
        })
        .collect()
}

fn unique_keys_for(row: &FlatRow, cache: &CompileCache) -> Vec<String> {
    let Some(policy) = &row.on_conflict else { return Vec::new() };
    if let Some(keys) = &policy.unique_keys {
        return keys.clone();
    }
    let Some(constraint) = &policy.constraint else { return Vec::new() };
    let schema = row.schema.as_deref().unwrap_or("public");
    cache.get(constraint, &row.table, schema).cloned().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::insert::flatten::flatten;
    use crate::insert::{InsertRequest, Returning};
    use serde_json::json;

    fn batches_for(data: serde_json::Value) -> Vec<TableBatch> {
        let request = InsertRequest {
            table: "parents".to_string(),
            schema: None,
            on_conflict: None,
            returning: Returning::Count,
            data,
        };
        build_table_batches(&flatten(&request), &CompileCache::default())
    }

    #[test]
    fn test_identical_values_collapse_into_one_group() {
        let batches = batches_for(json!([
            {"text": "a", "child": {"table": "children", "key": "child_id", "data": {"v": 1}}},
            {"text": "b", "child": {"table": "children", "key": "child_id", "data": {"v": 1}}},
        ]));
        let children = batches.iter().find(|b| b.table == "children").unwrap();
        assert_eq!(children.groups.len(), 1);
        assert_eq!(children.groups[0].paths, vec![vec![1, 1], vec![2, 1]]);
    }

    #[test]
    fn test_distinct_values_keep_their_groups() {
        let batches = batches_for(json!([
            {"child": {"table": "children", "key": "child_id", "data": {"v": 1}}},
            {"child": {"table": "children", "key": "child_id", "data": {"v": 2}}},
        ]));
        let children = batches.iter().find(|b| b.table == "children").unwrap();
        assert_eq!(children.groups.len(), 2);
        assert_eq!(children.groups[0].paths, vec![vec![1, 1]]);
        assert_eq!(children.groups[1].paths, vec![vec![2, 1]]);
    }

    #[test]
    fn test_later_rows_keep_first_seen_shape() {
        // rows of one table are not validated against each other: the first
        // row's keys win, later values land positionally
        let batches = batches_for(json!([
            {"text": "a", "n": 1},
            {"different": true},
        ]));
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].keys, vec!["n", "text"]);
        assert_eq!(batches[0].groups.len(), 2);
        assert_eq!(batches[0].groups[1].values.len(), 1);
    }

    #[test]
    fn test_explicit_unique_keys_bypass_resolution() {
        let request = InsertRequest {
            table: "parents".to_string(),
            schema: None,
            on_conflict: Some(ConflictPolicy {
                constraint: Some("parents_text_key".to_string()),
                update_columns: vec![],
                unique_keys: Some(vec!["text".to_string()]),
            }),
            returning: Returning::Count,
            data: json!({"text": "a"}),
        };
        let batches = build_table_batches(&flatten(&request), &CompileCache::default());
        assert_eq!(batches[0].unique_keys, vec!["text"]);
    }

    #[test]
    fn test_resolved_unique_keys_come_from_cache() {
        let request = InsertRequest {
            table: "parents".to_string(),
            schema: None,
            on_conflict: Some(ConflictPolicy {
                constraint: Some("parents_text_key".to_string()),
                update_columns: vec![],
                unique_keys: None,
            }),
            returning: Returning::Count,
            data: json!({"text": "a"}),
        };
        let mut cache = CompileCache::default();
        cache.insert(
            ("parents_text_key".to_string(), "parents".to_string(), "public".to_string()),
            vec!["text".to_string()],
        );
        let batches = build_table_batches(&flatten(&request), &cache);
        assert_eq!(batches[0].unique_keys, vec!["text"]);
    }
}
