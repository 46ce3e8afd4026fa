//! `redshift_namespace` data source: the namespace of the connected cluster,
//! which consumers need to reference its datashares.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::DataSource;
use crate::client::Client;
use crate::error::ProviderError;
use crate::schema::{Attribute, Schema};

/// Data source type name.
pub const DATA_SOURCE_TYPE: &str = "redshift_namespace";

/// Reads `redshift_namespace`.
pub struct NamespaceDataSource;

#[async_trait]
impl DataSource for NamespaceDataSource {
    fn type_name(&self) -> &'static str {
        DATA_SOURCE_TYPE
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_description("The namespace GUID of the connected cluster.")
            .with_attribute("id", Attribute::computed_string())
            .with_attribute("namespace", Attribute::computed_string())
    }

    async fn read(&self, client: &Client, _config: Value) -> Result<Value, ProviderError> {
        let pool = client.default_pool().await?;
        let namespace = sqlx::query_scalar::<_, String>("SELECT current_namespace::varchar")
            .fetch_one(&pool)
            .await?;
        Ok(json!({"id": namespace, "namespace": namespace}))
    }
}
