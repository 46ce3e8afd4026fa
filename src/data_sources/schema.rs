//! `redshift_schema` data source.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{not_found, required_name, DataSource};
use crate::client::Client;
use crate::error::ProviderError;
use crate::resources::schema::{fetch_schema, SchemaState, RESOURCE_TYPE};
use crate::resources::Lookup;
use crate::schema::{Attribute, Schema};

/// `external_schema_type` of an external schema: `data_catalog` when the
/// catalog reports catalog options, otherwise `redshift`.
fn external_schema_type(schema: &SchemaState) -> Option<&'static str> {
    schema.external_schema.as_ref().map(|external| {
        if external.data_catalog_source.is_some() {
            "data_catalog"
        } else {
            "redshift"
        }
    })
}

/// Reads `redshift_schema`.
pub struct SchemaDataSource;

#[async_trait]
impl DataSource for SchemaDataSource {
    fn type_name(&self) -> &'static str {
        RESOURCE_TYPE
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_description("Look up an existing schema in the provider database.")
            .with_attribute("name", Attribute::required_string())
            .with_attribute("id", Attribute::computed_string())
            .with_attribute("owner", Attribute::computed_string())
            .with_attribute(
                "quota",
                Attribute::computed_int64().with_description("Quota in MB; 0 is unlimited."),
            )
            .with_attribute(
                "external_schema_type",
                Attribute::computed_string()
                    .with_description("`data_catalog` or `redshift`; null for local schemas."),
            )
            .with_attribute("external_database_name", Attribute::computed_string())
    }

    async fn read(&self, client: &Client, config: Value) -> Result<Value, ProviderError> {
        let name = required_name(&config)?;
        let pool = client.default_pool().await?;
        let schema = fetch_schema(&pool, Lookup::Name(name), &SchemaState::default())
            .await?
            .ok_or_else(|| not_found(RESOURCE_TYPE, name))?;
        Ok(json!({
            "id": schema.id,
            "name": schema.name,
            "owner": schema.owner,
            "quota": schema.quota,
            "external_schema_type": external_schema_type(&schema),
            "external_database_name": schema.external_schema.as_ref().map(|e| e.database_name.clone()),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::schema::{DataCatalogSource, ExternalSchema};

    #[test]
    fn test_external_schema_type() {
        let mut schema = SchemaState::default();
        assert_eq!(external_schema_type(&schema), None);

        schema.external_schema = Some(ExternalSchema {
            database_name: "lake".into(),
            data_catalog_source: Some(DataCatalogSource::default()),
            redshift_source: None,
        });
        assert_eq!(external_schema_type(&schema), Some("data_catalog"));

        schema.external_schema = Some(ExternalSchema::default());
        assert_eq!(external_schema_type(&schema), Some("redshift"));
    }
}
