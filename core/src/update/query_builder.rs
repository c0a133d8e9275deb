//! Builds the batched update: a set-values stage (one row per op), a
//! where-values stage (one row per rank class) and a single UPDATE with
//! per-row conditional assignment and per-class-scoped predicates.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value as JsonValue;

use super::operator::CompareOperator;
use super::{UpdateError, UpdateOp};
use crate::helpers::{format_table_name, quote_identifier};
use crate::literal::{escape_literal, SqlValue};

static PREDICATE_KEY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(.*)_(_.*)$").expect("predicate key pattern is valid"));

/// One predicate key from the where-union, split into its column and
/// operator.
#[derive(Debug)]
pub(crate) struct PredicateColumn {
    pub key: String,
    pub column: String,
    pub operator: CompareOperator,
}

/// One row of the set-values stage: the op's rank class, the column names
/// it actually sets, and the union-aligned value tuple (absent slots are
/// null, guarded by the membership array).
#[derive(Debug)]
pub(crate) struct SetRow {
    pub rank: usize,
    pub to_update: Vec<String>,
    pub values: Vec<SqlValue>,
}

/// One row of the where-values stage, per distinct rank class.
#[derive(Debug)]
pub(crate) struct WhereRow {
    pub rank: usize,
    pub keys: Vec<String>,
    pub values: Vec<SqlValue>,
}

#[derive(Debug)]
pub(crate) struct PreparedUpdate {
    pub set_union: Vec<String>,
    pub predicates: Vec<PredicateColumn>,
    pub set_rows: Vec<SetRow>,
    pub where_rows: Vec<WhereRow>,
}

/// Flattens a nested where object into `col__op` predicate keys. Property
/// keys not starting with `_` descend into object values; keys starting
/// with `_` are operator leaves, so an operand that is itself an object
/// (`_contains`) is never descended into.
pub(crate) fn flatten_where(filter: &JsonValue) -> BTreeMap<String, JsonValue> {
    let mut out = BTreeMap::new();
    if let Some(obj) = filter.as_object() {
        collect_predicates(obj, &mut Vec::new(), &mut out);
    }
    out
}

fn collect_predicates(
    obj: &serde_json::Map<String, JsonValue>,
    path: &mut Vec<String>,
    out: &mut BTreeMap<String, JsonValue>,
) {
    for (key, value) in obj {
        if !key.starts_with('_') {
            if let Some(nested) = value.as_object() {
                path.push(key.clone());
                collect_predicates(nested, path, out);
                path.pop();
                continue;
            }
        }
        let mut segments = path.clone();
        segments.push(key.clone());
        out.insert(segments.join("_"), value.clone());
    }
}

fn parse_predicate_key(key: &str) -> Result<PredicateColumn, UpdateError> {
    let caps = PREDICATE_KEY_RE
        .captures(key)
        .ok_or_else(|| UpdateError::UnknownOperator(key.to_string()))?;
    let operator = CompareOperator::from_suffix(&caps[2])
        .ok_or_else(|| UpdateError::UnknownOperator(key.to_string()))?;
    Ok(PredicateColumn { key: key.to_string(), column: caps[1].to_string(), operator })
}

/// Computes the column unions and rank classes. Ops with identical
/// `(sorted predicate keys, union-aligned values)` share one where row;
/// every op keeps its own set row. Fails fast on a malformed predicate
/// key, before any SQL exists.
pub(crate) fn prepare_update(updates: &[UpdateOp]) -> Result<PreparedUpdate, UpdateError> {
    let flattened: Vec<BTreeMap<String, JsonValue>> =
        updates.iter().map(|op| flatten_where(&op.filter)).collect();

    let set_union: Vec<String> = updates
        .iter()
        .flat_map(|op| op.set.keys().cloned())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let where_union: Vec<String> = flattened
        .iter()
        .flat_map(|flat| flat.keys().cloned())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let predicates: Vec<PredicateColumn> = where_union
        .iter()
        .map(|key| parse_predicate_key(key))
        .collect::<Result<_, _>>()?;

    let mut class_index: HashMap<String, usize> = HashMap::new();
    let mut set_rows = Vec::new();
    let mut where_rows: Vec<WhereRow> = Vec::new();

    for (op, flat) in updates.iter().zip(&flattened) {
        let op_keys: Vec<String> = flat.keys().cloned().collect();
        let aligned: Vec<Option<&JsonValue>> = where_union.iter().map(|k| flat.get(k)).collect();

        let signature = format!("{:?}", (&op_keys, &aligned));
        let rank = match class_index.get(&signature) {
            Some(rank) => *rank,
            None => {
                let rank = where_rows.len();
                class_index.insert(signature, rank);
                where_rows.push(WhereRow {
                    rank,
                    keys: op_keys,
                    values: aligned
                        .iter()
                        .map(|value| value.map(SqlValue::from_json).unwrap_or(SqlValue::Null))
                        .collect(),
                });
                rank
            }
        };

        set_rows.push(SetRow {
            rank,
            to_update: op.set.keys().cloned().collect(),
            values: set_union
                .iter()
                .map(|key| op.set.get(key).map(SqlValue::from_json).unwrap_or(SqlValue::Null))
                .collect(),
        });
    }

    Ok(PreparedUpdate { set_union, predicates, set_rows, where_rows })
}

fn column_type<'a>(
    types: &'a HashMap<String, String>,
    table: &str,
    column: &str,
) -> Result<&'a str, UpdateError> {
    types.get(column).map(String::as_str).ok_or_else(|| UpdateError::UnknownColumn {
        column: column.to_string(),
        table: table.to_string(),
    })
}

fn text_array_literal(items: &[String]) -> String {
    if items.is_empty() {
        return "ARRAY[]::text[]".to_string();
    }
    let quoted: Vec<String> = items.iter().map(|item| escape_literal(item)).collect();
    format!("ARRAY[{}]", quoted.join(","))
}

/// Renders the full statement. Every SET assignment is guarded by the
/// row's membership array and cast to the column's catalog type, so the
/// CASE arms type-check; every WHERE conjunct lets rows of other classes
/// pass (`key != ALL(__where_keys)`) before applying the operator.
pub(crate) fn build_update_statement(
    table: &str,
    prepared: &PreparedUpdate,
    types: &HashMap<String, String>,
) -> Result<String, UpdateError> {
    let mut set_header = vec!["__where_rank".to_string(), "__to_update".to_string()];
    set_header.extend(prepared.set_union.iter().map(|column| quote_identifier(column)));

    let set_values: Vec<String> = prepared
        .set_rows
        .iter()
        .map(|row| {
            let mut cells = vec![row.rank.to_string(), text_array_literal(&row.to_update)];
            cells.extend(row.values.iter().map(|value| value.encode()));
            format!("({})", cells.join(", "))
        })
        .collect();

    let mut where_header = vec!["rank".to_string(), "__where_keys".to_string()];
    where_header.extend(prepared.predicates.iter().map(|p| quote_identifier(&p.key)));

    let where_values: Vec<String> = prepared
        .where_rows
        .iter()
        .map(|row| {
            let mut cells = vec![row.rank.to_string(), text_array_literal(&row.keys)];
            cells.extend(row.values.iter().map(|value| value.encode()));
            format!("({})", cells.join(", "))
        })
        .collect();

    let assignments: Vec<String> = prepared
        .set_union
        .iter()
        .map(|column| {
            let cast = column_type(types, table, column)?;
            let quoted = quote_identifier(column);
            Ok(format!(
                "{quoted} = (CASE WHEN {name} = ANY(cte_values.__to_update) \
                 THEN cte_values.{quoted}::{cast} ELSE t.{quoted} END)",
                name = escape_literal(column),
            ))
        })
        .collect::<Result<_, UpdateError>>()?;

    let conditions: Vec<String> = prepared
        .predicates
        .iter()
        .map(|predicate| {
            let cast = column_type(types, table, &predicate.column)?;
            let column_expr = format!("t.{}::{}", quote_identifier(&predicate.column), cast);
            let operand = format!("cte_where.{}", quote_identifier(&predicate.key));
            Ok(format!(
                "({} != ALL(cte_where.__where_keys) OR {})",
                escape_literal(&predicate.key),
                predicate.operator.render(&column_expr, &operand),
            ))
        })
        .collect::<Result<_, UpdateError>>()?;

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("\nWHERE\n  {}", conditions.join("\n\tAND\n\t"))
    };

    Ok(format!(
        "WITH cte_values ({set_header}) AS (\nVALUES {set_values}\n), \
         cte_where ({where_header}) AS (\nVALUES {where_values}\n), \
         cte_update AS (\nUPDATE {table} t\nSET {assignments}\n\
         FROM cte_values JOIN cte_where ON cte_values.__where_rank = cte_where.rank\
         {where_clause}\nRETURNING\n*\n)\n\nSELECT count(*) AS affected_rows FROM cte_update",
        set_header = set_header.join(", "),
        set_values = set_values.join(",\n\t"),
        where_header = where_header.join(", "),
        where_values = where_values.join(",\n\t"),
        table = format_table_name(table),
        assignments = assignments.join(",\n\t "),
    ))
}
