//! `redshift_database` data source.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{not_found, required_name, DataSource};
use crate::client::Client;
use crate::error::ProviderError;
use crate::resources::database::{fetch_database, DatabaseState, RESOURCE_TYPE};
use crate::resources::Lookup;
use crate::schema::{Attribute, Schema};

/// Reads `redshift_database`.
pub struct DatabaseDataSource;

#[async_trait]
impl DataSource for DatabaseDataSource {
    fn type_name(&self) -> &'static str {
        RESOURCE_TYPE
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_description("Look up an existing database.")
            .with_attribute("name", Attribute::required_string())
            .with_attribute("id", Attribute::computed_string())
            .with_attribute("owner", Attribute::computed_string())
            .with_attribute("connection_limit", Attribute::computed_int64())
    }

    async fn read(&self, client: &Client, config: Value) -> Result<Value, ProviderError> {
        let name = required_name(&config)?;
        let pool = client.default_pool().await?;
        let database = fetch_database(&pool, Lookup::Name(name), &DatabaseState::default())
            .await?
            .ok_or_else(|| not_found(RESOURCE_TYPE, name))?;
        Ok(json!({
            "id": database.id,
            "name": database.name,
            "owner": database.owner,
            "connection_limit": database.connection_limit,
        }))
    }
}
