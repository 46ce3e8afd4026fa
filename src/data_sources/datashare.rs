//! `redshift_datashare` data source.

use async_trait::async_trait;
use serde_json::Value;

use super::{not_found, required_name, DataSource};
use crate::client::Client;
use crate::error::ProviderError;
use crate::resources::datashare::{fetch_datashare, RESOURCE_TYPE};
use crate::resources::{to_state, Lookup};
use crate::schema::{Attribute, Schema};

/// Reads `redshift_datashare`.
pub struct DatashareDataSource;

#[async_trait]
impl DataSource for DatashareDataSource {
    fn type_name(&self) -> &'static str {
        RESOURCE_TYPE
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_description("Look up an outbound datashare on this cluster.")
            .with_attribute("name", Attribute::required_string())
            .with_attribute("id", Attribute::computed_string())
            .with_attribute("owner", Attribute::computed_string())
            .with_attribute("publicly_accessible", Attribute::computed_bool())
            .with_attribute("producer_account", Attribute::computed_string())
            .with_attribute("producer_namespace", Attribute::computed_string())
            .with_attribute("created", Attribute::computed_string())
            .with_attribute("schemas", Attribute::computed_string_set())
    }

    async fn read(&self, client: &Client, config: Value) -> Result<Value, ProviderError> {
        let name = required_name(&config)?;
        let pool = client.default_pool().await?;
        let share = fetch_datashare(&pool, Lookup::Name(name))
            .await?
            .ok_or_else(|| not_found(RESOURCE_TYPE, name))?;
        to_state(&share)
    }
}
