use std::collections::HashMap;

use async_trait::async_trait;

use crate::client::{PostgresClient, PostgresError};

#[derive(thiserror::Error, Debug)]
pub enum CatalogError {
    #[error("Constraint {constraint} does not exist on {schema}.{table}")]
    ConstraintNotFound { constraint: String, table: String, schema: String },

    #[error("{0}")]
    PostgresError(#[from] PostgresError),
}

/// Catalog lookups the compilers depend on: the ordered column list behind a
/// named uniqueness constraint, and a table's column types for cast
/// expressions. Implementations must be cheap to call repeatedly; the
/// compilers memoize per compile call, never across calls.
#[async_trait]
pub trait SchemaCatalog: Send + Sync {
    async fn constraint_columns(
        &self,
        constraint: &str,
        table: &str,
        schema: &str,
    ) -> Result<Vec<String>, CatalogError>;

    async fn column_types(&self, table: &str) -> Result<HashMap<String, String>, CatalogError>;
}

const CONSTRAINT_COLUMNS_SQL: &str = r#"
SELECT
  con.conname "constraint",
  concat(nsp.nspname, '.', rel.relname) "table",
  (
    SELECT
      array_agg(att.attname::text)
    FROM
      pg_attribute att
      INNER JOIN unnest(con.conkey)
      unnest(conkey) ON unnest.conkey = att.attnum
    WHERE
      att.attrelid = con.conrelid) "columns"
FROM
  pg_constraint con
  INNER JOIN pg_class rel ON rel.oid = con.conrelid
  INNER JOIN pg_namespace nsp ON nsp.oid = rel.relnamespace
WHERE
  nsp.nspname = $1
  AND rel.relname = $2
  AND con.conname = $3;
"#;

const COLUMN_TYPES_SQL: &str = r#"
SELECT
  column_name,
  data_type
FROM
  information_schema.columns
WHERE
  table_name = $1;
"#;

#[async_trait]
impl SchemaCatalog for PostgresClient {
    async fn constraint_columns(
        &self,
        constraint: &str,
        table: &str,
        schema: &str,
    ) -> Result<Vec<String>, CatalogError> {
        let rows = self.query(CONSTRAINT_COLUMNS_SQL, &[&schema, &table, &constraint]).await?;

        let mut columns: Vec<String> = Vec::new();
        for row in rows {
            if let Ok(Some(cols)) = row.try_get::<_, Option<Vec<String>>>("columns") {
                columns.extend(cols);
            }
        }

        if columns.is_empty() {
            return Err(CatalogError::ConstraintNotFound {
                constraint: constraint.to_string(),
                table: table.to_string(),
                schema: schema.to_string(),
            });
        }

        Ok(columns)
    }

    async fn column_types(&self, table: &str) -> Result<HashMap<String, String>, CatalogError> {
        let rows = self.query(COLUMN_TYPES_SQL, &[&table]).await?;
        Ok(rows
            .iter()
            .map(|row| (row.get("column_name"), row.get("data_type")))
            .collect())
    }
}

pub(crate) type ConstraintKey = (String, String, String);

/// Memoized constraint lookups, scoped to one compile call. Passed through
/// the compile explicitly so no state survives between calls.
#[derive(Debug, Default)]
pub(crate) struct CompileCache {
    unique_keys: HashMap<ConstraintKey, Vec<String>>,
}

impl CompileCache {
    pub(crate) fn contains(&self, key: &ConstraintKey) -> bool {
        self.unique_keys.contains_key(key)
    }

    pub(crate) fn get(&self, constraint: &str, table: &str, schema: &str) -> Option<&Vec<String>> {
        self.unique_keys
            .get(&(constraint.to_string(), table.to_string(), schema.to_string()))
    }

    pub(crate) fn insert(&mut self, key: ConstraintKey, columns: Vec<String>) {
        self.unique_keys.insert(key, columns);
    }
}
