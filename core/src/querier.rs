use crate::client::{PostgresClient, PostgresConnectionError};
use crate::insert::{self, InsertError, InsertOutcome, InsertRequest};
use crate::update::{self, UpdateError, UpdateRequest};

/// Owns a connection pool and exposes the two batch entry points. The
/// compile layers underneath stay usable on their own against any
/// `SchemaCatalog`.
pub struct JsonQuerier {
    client: PostgresClient,
}

impl JsonQuerier {
    pub fn new(client: PostgresClient) -> Self {
        JsonQuerier { client }
    }

    /// Connects using `DATABASE_URL` from the environment.
    pub async fn connect() -> Result<Self, PostgresConnectionError> {
        Ok(JsonQuerier::new(PostgresClient::new().await?))
    }

    pub async fn insert(&self, request: &InsertRequest) -> Result<InsertOutcome, InsertError> {
        insert::insert(&self.client, request).await
    }

    pub async fn update(&self, request: &UpdateRequest) -> Result<u64, UpdateError> {
        update::update(&self.client, request).await
    }

    pub fn client(&self) -> &PostgresClient {
        &self.client
    }
}
