//! `redshift_group` data source.

use async_trait::async_trait;
use serde_json::Value;

use super::{not_found, required_name, DataSource};
use crate::client::Client;
use crate::error::ProviderError;
use crate::resources::group::{fetch_group, RESOURCE_TYPE};
use crate::resources::{to_state, Lookup};
use crate::schema::{Attribute, Schema};

/// Reads `redshift_group`.
pub struct GroupDataSource;

#[async_trait]
impl DataSource for GroupDataSource {
    fn type_name(&self) -> &'static str {
        RESOURCE_TYPE
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_description("Look up an existing group and its members.")
            .with_attribute("name", Attribute::required_string())
            .with_attribute("id", Attribute::computed_string())
            .with_attribute("users", Attribute::computed_string_set())
    }

    async fn read(&self, client: &Client, config: Value) -> Result<Value, ProviderError> {
        let name = required_name(&config)?;
        let pool = client.default_pool().await?;
        let group = fetch_group(&pool, Lookup::Name(name))
            .await?
            .ok_or_else(|| not_found(RESOURCE_TYPE, name))?;
        to_state(&group)
    }
}
