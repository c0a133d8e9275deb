//! Dependency-ordered multi-table inserts compiled from a nested JSON
//! tree into one statement.

pub(crate) mod batch;
pub(crate) mod flatten;
pub(crate) mod query_builder;

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::catalog::{CatalogError, CompileCache, ConstraintKey, SchemaCatalog};
use crate::client::{PostgresClient, PostgresError};

pub use flatten::{FlatRow, ForeignKeyRef};

/// How duplicate-key rows are handled, per table.
///
/// No `constraint` means no conflict clause at all: duplicate violations
/// are fatal at execution time. An empty `update_columns` list means
/// ignore-on-conflict; a non-empty list overwrites exactly those columns
/// from the candidate row. Explicit `unique_keys` skip the catalog lookup
/// for the constraint's column list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictPolicy {
    #[serde(default)]
    pub constraint: Option<String>,

    #[serde(default)]
    pub update_columns: Vec<String>,

    #[serde(default)]
    pub unique_keys: Option<Vec<String>>,
}

/// What the final projection returns. `Count` is the default
/// `affected_rows` count; `Columns` projects the listed root-table
/// columns instead (a literal `"*"` entry projects the whole row). The
/// two are mutually exclusive by construction.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Returning {
    #[default]
    Count,
    Columns(Vec<String>),
}

/// A nested insert: the root table plus a tree of scalar fields and link
/// nodes destined for foreign-key-linked tables.
#[derive(Debug, Clone)]
pub struct InsertRequest {
    pub table: String,
    pub schema: Option<String>,
    pub on_conflict: Option<ConflictPolicy>,
    pub returning: Returning,
    pub data: JsonValue,
}

impl InsertRequest {
    pub fn new(table: impl Into<String>, data: JsonValue) -> Self {
        InsertRequest {
            table: table.into(),
            schema: None,
            on_conflict: None,
            returning: Returning::Count,
            data,
        }
    }
}

pub enum InsertOutcome {
    Count(i64),
    Rows(Vec<tokio_postgres::Row>),
}

#[derive(thiserror::Error, Debug)]
pub enum InsertError {
    #[error("{0}")]
    CatalogError(#[from] CatalogError),

    #[error("{0}")]
    PostgresError(#[from] PostgresError),
}

/// Compiles the request into a single statement, or `None` when the tree
/// holds no rows (an empty batch never emits a command).
///
/// Constraint lookups are memoized for this call only; distinct pending
/// keys are issued concurrently, repeated keys resolve exactly once.
pub async fn compile_insert<C>(
    request: &InsertRequest,
    catalog: &C,
) -> Result<Option<String>, InsertError>
where
    C: SchemaCatalog + ?Sized,
{
    let rows = flatten::flatten(request);
    if rows.is_empty() {
        return Ok(None);
    }

    let mut cache = CompileCache::default();
    let pending = pending_constraint_keys(&rows, &cache);
    if !pending.is_empty() {
        let lookups = pending
            .iter()
            .map(|(constraint, table, schema)| catalog.constraint_columns(constraint, table, schema));
        let resolved = futures::future::try_join_all(lookups).await?;
        for (key, columns) in pending.into_iter().zip(resolved) {
            cache.insert(key, columns);
        }
    }

    let batches = batch::build_table_batches(&rows, &cache);

    let root_table = rows
        .iter()
        .find(|row| row.index_path.len() == 1)
        .map(|row| row.table.clone())
        .unwrap_or_else(|| request.table.clone());

    let returning = match &request.returning {
        Returning::Columns(columns) if columns.is_empty() => Returning::Count,
        other => other.clone(),
    };

    let sql = query_builder::assemble_insert(&batches, &root_table, &returning);
    debug!("Compiled insert statement: {}", sql);
    Ok(Some(sql))
}

fn pending_constraint_keys(rows: &[FlatRow], cache: &CompileCache) -> Vec<ConstraintKey> {
    let mut seen = HashSet::new();
    let mut keys = Vec::new();
    for row in rows {
        let Some(policy) = &row.on_conflict else { continue };
        if policy.unique_keys.is_some() {
            continue;
        }
        let Some(constraint) = &policy.constraint else { continue };
        let key = (
            constraint.clone(),
            row.table.clone(),
            row.schema.clone().unwrap_or_else(|| "public".to_string()),
        );
        if !cache.contains(&key) && seen.insert(key.clone()) {
            keys.push(key);
        }
    }
    keys
}

/// Compiles and executes in one round trip.
pub async fn insert(
    client: &PostgresClient,
    request: &InsertRequest,
) -> Result<InsertOutcome, InsertError> {
    let Some(sql) = compile_insert(request, client).await? else {
        return Ok(match request.returning {
            Returning::Count => InsertOutcome::Count(0),
            Returning::Columns(_) => InsertOutcome::Rows(Vec::new()),
        });
    };

    let rows = client.query(&sql, &[]).await?;
    match request.returning {
        Returning::Count => {
            let affected = rows
                .first()
                .map(|row| row.get::<_, i64>("affected_rows"))
                .unwrap_or(0);
            Ok(InsertOutcome::Count(affected))
        }
        Returning::Columns(_) => Ok(InsertOutcome::Rows(rows)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Counting catalog: every lookup is recorded so memoization is
    /// observable.
    struct FakeCatalog {
        constraints: HashMap<(String, String), Vec<String>>,
        lookups: Mutex<Vec<String>>,
    }

    impl FakeCatalog {
        fn new(constraints: &[(&str, &str, &[&str])]) -> Self {
            FakeCatalog {
                constraints: constraints
                    .iter()
                    .map(|(constraint, table, columns)| {
                        (
                            (constraint.to_string(), table.to_string()),
                            columns.iter().map(|c| c.to_string()).collect(),
                        )
                    })
                    .collect(),
                lookups: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl SchemaCatalog for FakeCatalog {
        async fn constraint_columns(
            &self,
            constraint: &str,
            table: &str,
            schema: &str,
        ) -> Result<Vec<String>, CatalogError> {
            self.lookups.lock().unwrap().push(format!("{constraint}:{table}:{schema}"));
            self.constraints
                .get(&(constraint.to_string(), table.to_string()))
                .cloned()
                .ok_or_else(|| CatalogError::ConstraintNotFound {
                    constraint: constraint.to_string(),
                    table: table.to_string(),
                    schema: schema.to_string(),
                })
        }

        async fn column_types(
            &self,
            _table: &str,
        ) -> Result<HashMap<String, String>, CatalogError> {
            Ok(HashMap::new())
        }
    }

    #[tokio::test]
    async fn test_empty_batch_compiles_to_nothing() {
        let catalog = FakeCatalog::new(&[]);
        let request = InsertRequest::new("parents", json!([]));
        assert!(compile_insert(&request, &catalog).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_single_table_statement_shape() {
        let catalog = FakeCatalog::new(&[]);
        let request = InsertRequest::new("parents", json!({"text": "a"}));
        let sql = compile_insert(&request, &catalog).await.unwrap().unwrap();
        assert!(sql.starts_with("WITH values_parents_raw (__id) AS (\nVALUES ('[[1]]', 'a')"));
        assert!(sql.contains("cte_parents AS (\nINSERT INTO parents (text)"));
        assert!(sql.ends_with(
            "SELECT count(*) AS affected_rows FROM cte_parents t1 JOIN cte_parents_rn t2 \
             ON array_length(t2.column1, 1) = 1 AND t1.id = t2.id;"
        ));
    }

    #[tokio::test]
    async fn test_dependency_order_child_before_parent() {
        let catalog = FakeCatalog::new(&[]);
        let request = InsertRequest::new(
            "parents",
            json!({
                "text": "a",
                "child": {"table": "children", "key": "child_id", "data": {"v": 1}}
            }),
        );
        let sql = compile_insert(&request, &catalog).await.unwrap().unwrap();
        let child_insert = sql.find("cte_children AS (\nINSERT INTO children").unwrap();
        let parent_insert = sql.find("cte_parents AS (\nINSERT INTO parents").unwrap();
        assert!(child_insert < parent_insert);
        // the parent picks up the child's generated identifier via the
        // prefix-containment join against the child's rank stage
        assert!(sql.contains("INSERT INTO parents (text, child_id)"));
        assert!(sql.contains("LEFT JOIN cte_children_rn sq0"));
    }

    #[tokio::test]
    async fn test_array_children_compile_after_parent() {
        let catalog = FakeCatalog::new(&[]);
        let request = InsertRequest::new(
            "parents",
            json!({
                "text": "a",
                "items": {
                    "table": "items",
                    "key": "parent_id",
                    "data": [{"label": "x"}, {"label": "y"}]
                }
            }),
        );
        let sql = compile_insert(&request, &catalog).await.unwrap().unwrap();
        let parent_insert = sql.find("cte_parents AS (").unwrap();
        let item_insert = sql.find("cte_items AS (").unwrap();
        assert!(parent_insert < item_insert);
        assert!(sql.contains("INSERT INTO items (label, parent_id)"));
        // the projection still reads the root table
        assert!(sql.ends_with("AND t1.id = t2.id;"));
        assert!(sql.contains("FROM cte_parents t1 JOIN cte_parents_rn t2"));
    }

    #[tokio::test]
    async fn test_shared_child_dedups_into_one_group() {
        let catalog = FakeCatalog::new(&[]);
        let request = InsertRequest::new(
            "parents",
            json!([
                {"text": "a", "child": {"table": "children", "key": "child_id", "data": {"v": 1}}},
                {"text": "b", "child": {"table": "children", "key": "child_id", "data": {"v": 1}}},
            ]),
        );
        let sql = compile_insert(&request, &catalog).await.unwrap().unwrap();
        // both parents' paths collapse into one child literal row
        assert!(sql.contains("values_children_raw (__id) AS (\nVALUES ('[[1,1],[2,1]]', 1)"));
    }

    #[tokio::test]
    async fn test_constraint_resolved_once_per_distinct_key() {
        let catalog = FakeCatalog::new(&[("children_v_key", "children", &["v"])]);
        let child = json!({
            "table": "children",
            "key": "child_id",
            "on_conflict": {"constraint": "children_v_key"},
            "data": {"v": 1}
        });
        let request = InsertRequest::new(
            "parents",
            json!([
                {"text": "a", "child": child.clone()},
                {"text": "b", "child": child}
            ]),
        );
        let sql = compile_insert(&request, &catalog).await.unwrap().unwrap();
        assert_eq!(
            *catalog.lookups.lock().unwrap(),
            vec!["children_v_key:children:public".to_string()]
        );
        assert!(sql.contains("ON CONFLICT ON CONSTRAINT children_v_key DO NOTHING"));
        assert!(sql.contains("SELECT DISTINCT ON (v.column2) v.column2"));
    }

    #[tokio::test]
    async fn test_missing_constraint_aborts_compile() {
        let catalog = FakeCatalog::new(&[]);
        let request = InsertRequest {
            table: "parents".to_string(),
            schema: None,
            on_conflict: Some(ConflictPolicy {
                constraint: Some("nope".to_string()),
                update_columns: vec![],
                unique_keys: None,
            }),
            returning: Returning::Count,
            data: json!({"text": "a"}),
        };
        let err = compile_insert(&request, &catalog).await.unwrap_err();
        assert!(matches!(
            err,
            InsertError::CatalogError(CatalogError::ConstraintNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_explicit_unique_keys_skip_the_catalog() {
        let catalog = FakeCatalog::new(&[]);
        let request = InsertRequest {
            table: "parents".to_string(),
            schema: None,
            on_conflict: Some(ConflictPolicy {
                constraint: Some("parents_text_key".to_string()),
                update_columns: vec!["text".to_string()],
                unique_keys: Some(vec!["text".to_string()]),
            }),
            returning: Returning::Count,
            data: json!({"text": "a"}),
        };
        let sql = compile_insert(&request, &catalog).await.unwrap().unwrap();
        assert!(catalog.lookups.lock().unwrap().is_empty());
        assert!(sql.contains("DISTINCT ON (v.column2)"));
        assert!(sql.contains("DO \nUPDATE SET text = EXCLUDED.text"));
    }

    #[tokio::test]
    async fn test_returning_columns_projects_instead_of_count() {
        let catalog = FakeCatalog::new(&[]);
        let mut request = InsertRequest::new("parents", json!({"text": "a"}));
        request.returning = Returning::Columns(vec!["id".to_string()]);
        let sql = compile_insert(&request, &catalog).await.unwrap().unwrap();
        assert!(sql.contains("SELECT t1.id FROM cte_parents t1"));
        assert!(!sql.contains("affected_rows"));

        // an empty column list falls back to the count
        request.returning = Returning::Columns(vec![]);
        let sql = compile_insert(&request, &catalog).await.unwrap().unwrap();
        assert!(sql.contains("count(*) AS affected_rows"));
    }
}
