//! Assembles the per-table three-stage chain (values / insert / rank) and
//! the final root projection into one `WITH` statement.
//!
//! Stage conventions, shared by every fragment here: `column1` is the
//! `int[]` correlation path, scalar values sit in `column2..columnN`, and
//! generated identifiers are a column named `id`.

use super::batch::TableBatch;
use super::Returning;
use crate::helpers::{format_table_name, quote_identifier, table_ident};
use crate::literal::escape_literal;

/// Builds `values_<t>_raw` (one literal row per group, correlation array
/// first) and `values_<t>`, which re-expands each group to one row per
/// contributing index path.
pub(crate) fn build_values_stage(batch: &TableBatch) -> String {
    let name = table_ident(&batch.table);

    let rows: Vec<String> = batch
        .groups
        .iter()
        .map(|group| {
            let mut cells = Vec::with_capacity(group.values.len() + 1);
            cells.push(escape_literal(&paths_json(&group.paths)));
            cells.extend(group.values.iter().map(|value| value.encode()));
            format!("({})", cells.join(", "))
        })
        .collect();

    format!(
        "values_{name}_raw (__id) AS (\nVALUES {values}\n), values_{name} AS (\n  \
         SELECT t.*, (ARRAY(SELECT jsonb_array_elements(d.value)))::int[] AS column1\n  \
         FROM values_{name}_raw t, jsonb_array_elements(t.__id::jsonb) AS d\n)",
        values = rows.join(",\n\t"),
    )
}

fn paths_json(paths: &[Vec<i32>]) -> String {
    let rendered: Vec<String> = paths
        .iter()
        .map(|path| {
            let positions: Vec<String> = path.iter().map(|p| p.to_string()).collect();
            format!("[{}]", positions.join(","))
        })
        .collect();
    format!("[{}]", rendered.join(","))
}

/// Builds `cte_<t>`: the INSERT that selects from the values stage and
/// joins every referenced table's rank stage by prefix containment of the
/// correlation path, in either direction of path-length difference.
pub(crate) fn build_insert_stage(batch: &TableBatch) -> String {
    let name = table_ident(&batch.table);

    let mut columns: Vec<String> =
        batch.keys.iter().map(|key| quote_identifier(key)).collect();
    columns.extend(batch.foreign_keys.iter().map(|fk| quote_identifier(&fk.key)));

    let mut select_columns: Vec<String> =
        (0..batch.keys.len()).map(|i| format!("v.column{}", i + 2)).collect();
    select_columns.extend((0..batch.foreign_keys.len()).map(|i| format!("sq{i}.id")));

    let joins: Vec<String> = batch
        .foreign_keys
        .iter()
        .enumerate()
        .map(|(i, fk)| {
            let foreign = table_ident(&fk.table);
            format!(
                "LEFT JOIN cte_{foreign}_rn sq{i} ON \
                 v.column1[:array_length(sq{i}.column1,1)] = sq{i}.column1 \
                 OR v.column1 = sq{i}.column1[:array_length(v.column1,1)]"
            )
        })
        .collect();

    let conflict = batch.on_conflict.as_ref().map(conflict_clause).unwrap_or_default();

    format!(
        "cte_{name} AS (\nINSERT INTO {table} ({columns})\n  \
         SELECT {distinct}{select} FROM values_{name} v\n  {joins}\n{conflict}RETURNING\n*\n)",
        table = format_table_name(&batch.table),
        columns = columns.join(", "),
        distinct = distinct_on_clause(batch),
        select = select_columns.join(", "),
        joins = joins.join(" "),
    )
}

fn conflict_clause(policy: &super::ConflictPolicy) -> String {
    let Some(constraint) = &policy.constraint else { return String::new() };

    let action = if policy.update_columns.is_empty() {
        "NOTHING".to_string()
    } else {
        let assignments: Vec<String> = policy
            .update_columns
            .iter()
            .map(|column| {
                let column = quote_identifier(column);
                format!("{column} = EXCLUDED.{column}")
            })
            .collect();
        format!("\nUPDATE SET {}", assignments.join(", "))
    };

    format!("ON CONFLICT ON CONSTRAINT {} DO {}\n", quote_identifier(constraint), action)
}

/// `DISTINCT ON` collapses the per-path expansion back to one row per
/// unique-key tuple; the key list mixes positional value columns and
/// joined parent identifiers depending on where each key lives.
fn distinct_on_clause(batch: &TableBatch) -> String {
    if batch.unique_keys.is_empty() {
        return String::new();
    }

    let mut columns = Vec::new();
    for key in &batch.unique_keys {
        if let Some(i) = batch.keys.iter().position(|k| k == key) {
            columns.push(format!("v.column{}", i + 2));
        }
    }
    for key in &batch.unique_keys {
        if let Some(i) = batch.foreign_keys.iter().position(|fk| &fk.key == key) {
            columns.push(format!("sq{i}.id"));
        }
    }

    if columns.is_empty() {
        String::new()
    } else {
        format!("DISTINCT ON ({}) ", columns.join(", "))
    }
}

/// Builds `cte_<t>_rn`: a dense rank over the values stage joined
/// positionally against a dense rank over the insert stage's returned
/// rows. This re-attaches each surviving identifier to every correlation
/// path that collapsed into its group, which is the only way to recover
/// per-origin identifiers once deduplication or ON CONFLICT has changed
/// row cardinality.
pub(crate) fn build_rank_stage(batch: &TableBatch) -> String {
    let name = table_ident(&batch.table);

    let value_columns: Vec<String> = batch
        .unique_keys
        .iter()
        .filter_map(|key| {
            batch.keys.iter().position(|k| k == key).map(|i| format!("v.column{}", i + 2))
        })
        .collect();
    let values_order = if value_columns.is_empty() {
        String::new()
    } else {
        format!("ORDER BY {}", value_columns.join(", "))
    };

    let returned_order = if batch.unique_keys.is_empty() {
        String::new()
    } else {
        let columns: Vec<String> = batch
            .unique_keys
            .iter()
            .map(|key| format!("cte.{}", quote_identifier(key)))
            .collect();
        format!("ORDER BY {}", columns.join(", "))
    };

    format!(
        "cte_{name}_rn AS (\nSELECT sq.column1, sq2.id FROM \n\
         (SELECT *, (DENSE_RANK() OVER ({values_order})) AS row_number \
         FROM values_{name} v ORDER BY v.column1 ASC) sq\nLEFT JOIN \n\
         (SELECT *, (DENSE_RANK() OVER ({returned_order})) AS row_number \
         FROM cte_{name} cte) sq2\nON sq.row_number = sq2.row_number\n)"
    )
}

/// The final read of the root table's results. A correlation array of
/// length 1 marks a true top-level input row; longer arrays mark rows
/// merged from several occurrences and are never surfaced as an instance.
pub(crate) fn build_projection(root_table: &str, returning: &Returning) -> String {
    let name = table_ident(root_table);

    let select = match returning {
        Returning::Count => "count(*) AS affected_rows".to_string(),
        Returning::Columns(columns) => {
            let projected: Vec<String> = columns
                .iter()
                .map(|column| {
                    if column == "*" {
                        "t1.*".to_string()
                    } else {
                        format!("t1.{}", quote_identifier(column))
                    }
                })
                .collect();
            projected.join(", ")
        }
    };

    format!(
        "SELECT {select} FROM cte_{name} t1 JOIN cte_{name}_rn t2 \
         ON array_length(t2.column1, 1) = 1 AND t1.id = t2.id;"
    )
}

/// Chains everything: all values stages first, then per table (already in
/// dependency order) its insert stage immediately followed by its rank
/// stage, then the root projection.
pub(crate) fn assemble_insert(
    batches: &[TableBatch],
    root_table: &str,
    returning: &Returning,
) -> String {
    let mut ctes: Vec<String> = batches.iter().map(build_values_stage).collect();
    for batch in batches {
        ctes.push(build_insert_stage(batch));
        ctes.push(build_rank_stage(batch));
    }

    format!("WITH {}\n\n{}", ctes.join(", "), build_projection(root_table, returning))
}
