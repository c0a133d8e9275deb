// public
pub mod insert;
pub mod update;

mod catalog;
mod client;
mod helpers;
mod literal;
mod logger;
mod querier;

pub use catalog::{CatalogError, SchemaCatalog};
pub use client::{connection_string, PostgresClient, PostgresConnectionError, PostgresError};
pub use insert::{ConflictPolicy, InsertError, InsertOutcome, InsertRequest, Returning};
pub use literal::{escape_literal, is_uuid, SqlValue};
pub use logger::{setup_info_logger, setup_logger};
pub use querier::JsonQuerier;
pub use update::{CompareOperator, UpdateError, UpdateOp, UpdateRequest};

// export 3rd party dependencies
pub use async_trait::async_trait;
pub use serde_json::json;
pub use tokio_postgres::Row;
pub use tracing::{debug as pgnest_debug, error as pgnest_error};
