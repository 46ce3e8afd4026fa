//! `redshift_user` data source.

use async_trait::async_trait;
use serde_json::Value;

use super::{not_found, required_name, DataSource};
use crate::client::Client;
use crate::error::ProviderError;
use crate::resources::user::{fetch_user, UserState, RESOURCE_TYPE};
use crate::resources::{to_state, Lookup};
use crate::schema::{Attribute, Schema};

/// Schema of the `redshift_user` data source.
pub fn user_data_source_schema() -> Schema {
    Schema::v0()
        .with_description("Look up an existing user.")
        .with_attribute("name", Attribute::required_string())
        .with_attribute("id", Attribute::computed_string())
        .with_attribute("valid_until", Attribute::computed_string())
        .with_attribute("create_database", Attribute::computed_bool())
        .with_attribute("superuser", Attribute::computed_bool())
        .with_attribute("connection_limit", Attribute::computed_int64())
        .with_attribute("syslog_access", Attribute::computed_string())
        .with_attribute("session_timeout", Attribute::computed_int64())
}

/// Reads `redshift_user`.
pub struct UserDataSource;

#[async_trait]
impl DataSource for UserDataSource {
    fn type_name(&self) -> &'static str {
        RESOURCE_TYPE
    }

    fn schema(&self) -> Schema {
        user_data_source_schema()
    }

    async fn read(&self, client: &Client, config: Value) -> Result<Value, ProviderError> {
        let name = required_name(&config)?;
        let pool = client.default_pool().await?;
        let user = fetch_user(&pool, Lookup::Name(name), &UserState::default())
            .await?
            .ok_or_else(|| not_found(RESOURCE_TYPE, name))?;
        let mut state = to_state(&user)?;
        if let Value::Object(map) = &mut state {
            map.remove("password");
        }
        Ok(state)
    }
}
