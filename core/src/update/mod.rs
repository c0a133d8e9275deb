//! Batched updates: N heterogeneous ops against one table compiled into a
//! single statement.

pub(crate) mod operator;
pub(crate) mod query_builder;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::catalog::{CatalogError, SchemaCatalog};
use crate::client::{PostgresClient, PostgresError};

pub use operator::CompareOperator;

/// One row mutation: the columns to set and a nested predicate object in
/// the `{"column": {"_op": value}}` shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateOp {
    #[serde(rename = "_set")]
    pub set: BTreeMap<String, JsonValue>,

    #[serde(rename = "where", default)]
    pub filter: JsonValue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateRequest {
    pub table: String,
    pub updates: Vec<UpdateOp>,
}

#[derive(thiserror::Error, Debug)]
pub enum UpdateError {
    #[error("Unknown operator suffix in predicate key: {0}")]
    UnknownOperator(String),

    #[error("Column {column} does not exist on table {table}")]
    UnknownColumn { column: String, table: String },

    #[error("{0}")]
    CatalogError(#[from] CatalogError),

    #[error("{0}")]
    PostgresError(#[from] PostgresError),
}

/// Compiles the batch into a single statement, or `None` when there is
/// nothing to update. Malformed predicate keys fail before the catalog is
/// consulted or any SQL is rendered.
pub async fn compile_update<C>(
    request: &UpdateRequest,
    catalog: &C,
) -> Result<Option<String>, UpdateError>
where
    C: SchemaCatalog + ?Sized,
{
    if request.updates.is_empty() {
        return Ok(None);
    }

    let prepared = query_builder::prepare_update(&request.updates)?;
    if prepared.set_union.is_empty() {
        return Ok(None);
    }

    let types = catalog.column_types(&request.table).await?;
    let sql = query_builder::build_update_statement(&request.table, &prepared, &types)?;
    debug!("Compiled update statement: {}", sql);
    Ok(Some(sql))
}

/// Compiles and executes, returning the affected-row count.
pub async fn update(client: &PostgresClient, request: &UpdateRequest) -> Result<u64, UpdateError> {
    let Some(sql) = compile_update(request, client).await? else {
        return Ok(0);
    };

    let row = client.query_one(&sql, &[]).await?;
    let affected: i64 = row.get("affected_rows");
    Ok(affected as u64)
}
