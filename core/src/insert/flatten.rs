use serde_json::Value as JsonValue;

use super::{ConflictPolicy, InsertRequest};
use crate::literal::SqlValue;

/// One row destined for insertion, pulled out of the nested input tree.
///
/// `index_path` is the row's position in the original tree: its parent's
/// path with the 1-based sibling position appended. Paths exist only to
/// correlate generated identifiers back to tree positions inside the
/// compiled statement; they are never persisted.
#[derive(Debug, Clone)]
pub struct FlatRow {
    pub table: String,
    pub schema: Option<String>,
    pub on_conflict: Option<ConflictPolicy>,
    pub depth: u32,
    pub index_path: Vec<i32>,
    pub keys: Vec<String>,
    pub values: Vec<SqlValue>,
    pub foreign_keys: Vec<ForeignKeyRef>,
    pub is_array: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForeignKeyRef {
    pub key: String,
    pub table: String,
}

/// A nested field that targets another table. Classification is by shape:
/// an object carrying a `"table"` string is a link, anything else is a
/// plain value. A link missing its `"key"` still gets its rows inserted;
/// only the foreign-key association is dropped.
struct LinkSpec<'a> {
    table: &'a str,
    schema: Option<&'a str>,
    key: Option<&'a str>,
    on_conflict: Option<ConflictPolicy>,
    data: Option<&'a JsonValue>,
}

/// A field of one tree node, after classification.
enum FieldKind<'a> {
    Scalar(&'a JsonValue),
    Link(LinkSpec<'a>),
    LinkArray(LinkSpec<'a>),
}

fn classify(value: &JsonValue) -> FieldKind<'_> {
    let Some(obj) = value.as_object() else { return FieldKind::Scalar(value) };
    let Some(table) = obj.get("table").and_then(JsonValue::as_str) else {
        return FieldKind::Scalar(value);
    };

    let link = LinkSpec {
        table,
        schema: obj.get("schema").and_then(JsonValue::as_str),
        key: obj.get("key").and_then(JsonValue::as_str),
        on_conflict: obj
            .get("on_conflict")
            .and_then(|v| serde_json::from_value(v.clone()).ok()),
        data: obj.get("data"),
    };

    if link.data.is_some_and(JsonValue::is_array) {
        FieldKind::LinkArray(link)
    } else {
        FieldKind::Link(link)
    }
}

/// Flattens the request tree into one row per (table, position) pair and
/// sorts them so every table lands before the tables that reference it:
/// non-array rows deepest first (parents reference their one-to-one
/// children), then array rows shallowest first (array children reference
/// their parents). The sort is stable, so rows keep walk order within a
/// rank.
pub(crate) fn flatten(request: &InsertRequest) -> Vec<FlatRow> {
    let root = LinkSpec {
        table: &request.table,
        schema: request.schema.as_deref(),
        key: None,
        on_conflict: request.on_conflict.clone(),
        data: Some(&request.data),
    };

    let mut rows = Vec::new();
    walk(&root, None, &[], 1, &mut rows);

    rows.sort_by_key(|row| {
        let rank = if row.is_array { -(row.depth as i64) } else { row.depth as i64 };
        std::cmp::Reverse(rank)
    });
    rows
}

fn walk(
    link: &LinkSpec<'_>,
    parent_table: Option<&str>,
    parent_path: &[i32],
    depth: u32,
    rows: &mut Vec<FlatRow>,
) {
    let (elements, is_array): (Vec<&JsonValue>, bool) = match link.data {
        None | Some(JsonValue::Null) => (Vec::new(), false),
        Some(JsonValue::Array(items)) => (items.iter().collect(), true),
        Some(other) => (vec![other], false),
    };

    for (position, element) in elements.into_iter().enumerate() {
        let mut index_path = parent_path.to_vec();
        index_path.push(position as i32 + 1);

        let mut keys = Vec::new();
        let mut values = Vec::new();
        let mut foreign_keys = Vec::new();
        let mut children: Vec<LinkSpec<'_>> = Vec::new();

        if let JsonValue::Object(fields) = element {
            for (name, value) in fields {
                match classify(value) {
                    FieldKind::Scalar(v) => {
                        keys.push(name.clone());
                        values.push(SqlValue::from_json(v));
                    }
                    FieldKind::Link(child) => {
                        // no rows on the other side means nothing to join to
                        let has_rows = child.data.is_some_and(|d| !d.is_null());
                        if let (Some(key), true) = (child.key, has_rows) {
                            foreign_keys.push(ForeignKeyRef {
                                key: key.to_string(),
                                table: child.table.to_string(),
                            });
                        }
                        children.push(child);
                    }
                    FieldKind::LinkArray(child) => children.push(child),
                }
            }
        }

        // an array element references its parent, not the other way round
        if is_array {
            if let (Some(parent), Some(key)) = (parent_table, link.key) {
                foreign_keys
                    .push(ForeignKeyRef { key: key.to_string(), table: parent.to_string() });
            }
        }

        rows.push(FlatRow {
            table: link.table.to_string(),
            schema: link.schema.map(str::to_string),
            on_conflict: link.on_conflict.clone(),
            depth,
            index_path: index_path.clone(),
            keys,
            values,
            foreign_keys,
            is_array,
        });

        for child in &children {
            walk(child, Some(link.table), &index_path, depth + 1, rows);
        }
    }
}
