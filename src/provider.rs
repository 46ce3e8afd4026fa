//! The Redshift provider.
//!
//! [`RedshiftProvider`] implements [`ProviderService`] by dispatching each
//! request to the registered [`Resource`] or [`DataSource`] for its type name.
//! Database access goes through a single [`Client`] created by `Configure`.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::client::Client;
use crate::config::{self, ProviderConfig};
use crate::data_sources::{self, DataSource};
use crate::error::ProviderError;
use crate::plan;
use crate::resources::{self, Resource};
use crate::schema::{Diagnostic, ProviderSchema};
use crate::server::ProviderService;
use crate::types::{ImportedResource, PlanResult};
use crate::validation;

/// Provider exposing Redshift users, groups, roles, databases, schemas,
/// grants and datashares.
pub struct RedshiftProvider {
    resources: BTreeMap<&'static str, Box<dyn Resource>>,
    data_sources: BTreeMap<&'static str, Box<dyn DataSource>>,
    client: RwLock<Option<Arc<Client>>>,
}

impl Default for RedshiftProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl RedshiftProvider {
    /// Create an unconfigured provider with every resource and data source registered.
    pub fn new() -> Self {
        Self {
            resources: resources::all()
                .into_iter()
                .map(|r| (r.type_name(), r))
                .collect(),
            data_sources: data_sources::all()
                .into_iter()
                .map(|d| (d.type_name(), d))
                .collect(),
            client: RwLock::new(None),
        }
    }

    /// Create a provider that uses an existing client.
    pub fn with_client(client: Client) -> Self {
        Self {
            client: RwLock::new(Some(Arc::new(client))),
            ..Self::new()
        }
    }

    fn resource(&self, resource_type: &str) -> Result<&dyn Resource, ProviderError> {
        self.resources
            .get(resource_type)
            .map(|r| r.as_ref())
            .ok_or_else(|| ProviderError::UnknownResource(resource_type.to_string()))
    }

    fn data_source(&self, data_source_type: &str) -> Result<&dyn DataSource, ProviderError> {
        self.data_sources
            .get(data_source_type)
            .map(|d| d.as_ref())
            .ok_or_else(|| ProviderError::UnknownResource(data_source_type.to_string()))
    }

    async fn client(&self) -> Result<Arc<Client>, ProviderError> {
        self.client.read().await.clone().ok_or_else(|| {
            ProviderError::Configuration("provider has not been configured".to_string())
        })
    }
}

#[async_trait::async_trait]
impl ProviderService for RedshiftProvider {
    fn schema(&self) -> ProviderSchema {
        let mut schema = ProviderSchema::new().with_provider_config(config::provider_schema());
        for (name, resource) in &self.resources {
            schema = schema.with_resource(*name, resource.schema());
        }
        for (name, source) in &self.data_sources {
            schema = schema.with_data_source(*name, source.schema());
        }
        schema
    }

    async fn validate_provider_config(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        Ok(ProviderConfig::validate(&config))
    }

    async fn configure(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        let config = ProviderConfig::from_value(&config)?;
        info!(host = %config.host, port = config.port, database = %config.database, "Configuring provider");

        let client = Client::new(config);
        let connected = async {
            Ok::<_, ProviderError>((client.current_user().await?, client.current_database().await?))
        }
        .await;
        let (user, database) = match connected {
            Ok(identity) => identity,
            Err(e) => {
                client.close().await;
                return Err(e);
            }
        };
        info!(user = %user, database = %database, "Connected to Redshift");

        let previous = self.client.write().await.replace(Arc::new(client));
        if let Some(previous) = previous {
            debug!("Replacing existing client");
            previous.close().await;
        }
        Ok(vec![])
    }

    async fn stop(&self) -> Result<(), ProviderError> {
        if let Some(client) = self.client.write().await.take() {
            client.close().await;
        }
        Ok(())
    }

    async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let resource = self.resource(resource_type)?;
        let mut diagnostics = validation::validate(&resource.schema(), &config);
        diagnostics.extend(resource.validate(&config));
        Ok(diagnostics)
    }

    async fn upgrade_resource_state(
        &self,
        resource_type: &str,
        version: i64,
        state: Value,
    ) -> Result<Value, ProviderError> {
        let resource = self.resource(resource_type)?;
        let current = resource.schema().version as i64;
        if version > current {
            return Err(ProviderError::FailedPrecondition(format!(
                "{} state version {} is newer than schema version {}",
                resource_type, version, current
            )));
        }
        Ok(state)
    }

    async fn plan(
        &self,
        resource_type: &str,
        prior_state: Option<Value>,
        proposed_state: Value,
        _config: Value,
    ) -> Result<PlanResult, ProviderError> {
        let resource = self.resource(resource_type)?;
        let result = plan::plan(&resource.schema(), prior_state.as_ref(), &proposed_state);
        debug!(
            resource_type,
            changes = result.changes.len(),
            requires_replace = result.requires_replace,
            "Planned"
        );
        Ok(result)
    }

    async fn create(&self, resource_type: &str, planned_state: Value) -> Result<Value, ProviderError> {
        let resource = self.resource(resource_type)?;
        let client = self.client().await?;
        let state = resource.create(&client, planned_state).await?;
        if state.is_null() {
            return Err(ProviderError::Sdk(format!("{} create returned no state", resource_type)));
        }
        Ok(state)
    }

    async fn read(&self, resource_type: &str, current_state: Value) -> Result<Value, ProviderError> {
        let resource = self.resource(resource_type)?;
        let client = self.client().await?;
        match resource.read(&client, current_state).await? {
            Some(state) => Ok(state),
            None => {
                warn!(resource_type, "Object no longer exists, removing from state");
                Ok(Value::Null)
            }
        }
    }

    async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        let resource = self.resource(resource_type)?;
        let client = self.client().await?;
        resource.update(&client, prior_state, planned_state).await
    }

    async fn delete(&self, resource_type: &str, current_state: Value) -> Result<(), ProviderError> {
        let resource = self.resource(resource_type)?;
        let client = self.client().await?;
        resource.delete(&client, current_state).await
    }

    async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        let resource = self.resource(resource_type)?;
        let client = self.client().await?;
        match resource.import(&client, id).await? {
            Some(state) => Ok(vec![ImportedResource::new(resource_type, state)]),
            None => Err(ProviderError::NotFound(format!("{} `{}`", resource_type, id))),
        }
    }

    async fn validate_data_source_config(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let source = self.data_source(data_source_type)?;
        Ok(validation::validate(&source.schema(), &config))
    }

    async fn read_data_source(&self, data_source_type: &str, config: Value) -> Result<Value, ProviderError> {
        let source = self.data_source(data_source_type)?;
        let client = self.client().await?;
        source.read(&client, config).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_schema_registers_everything() {
        let schema = RedshiftProvider::new().schema();
        assert_eq!(schema.resources.len(), 9);
        assert_eq!(schema.data_sources.len(), 6);
        assert!(schema.provider.attribute("host").is_some());
        assert!(schema.resources.contains_key("redshift_default_privileges"));
        assert!(schema.data_sources.contains_key("redshift_namespace"));
    }

    #[test]
    fn test_metadata_is_sorted() {
        let metadata = RedshiftProvider::new().metadata();
        let mut sorted = metadata.resources.clone();
        sorted.sort();
        assert_eq!(metadata.resources, sorted);
        assert!(metadata.resources.contains(&"redshift_user".to_string()));
    }

    #[tokio::test]
    async fn test_unknown_type() {
        let provider = RedshiftProvider::new();
        let err = provider
            .validate_resource_config("redshift_table", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::UnknownResource(_)));

        let err = provider
            .read_data_source("redshift_table", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::UnknownResource(_)));
    }

    #[tokio::test]
    async fn test_unconfigured_operations_fail() {
        let provider = RedshiftProvider::new();
        let err = provider
            .create("redshift_group", json!({"name": "analysts"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Configuration(_)));

        let err = provider
            .import_resource("redshift_user", "alice")
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_validate_resource_config_reports_missing_name() {
        let provider = RedshiftProvider::new();
        let diagnostics = provider
            .validate_resource_config("redshift_group", json!({}))
            .await
            .unwrap();
        assert!(diagnostics.iter().any(|d| d.is_error()));
    }

    #[tokio::test]
    async fn test_upgrade_rejects_newer_state() {
        let provider = RedshiftProvider::new();
        let state = json!({"name": "alice"});
        let same = provider
            .upgrade_resource_state("redshift_user", 0, state.clone())
            .await
            .unwrap();
        assert_eq!(same, state);
        assert!(provider
            .upgrade_resource_state("redshift_user", 7, state)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_stop_without_configure() {
        assert!(RedshiftProvider::new().stop().await.is_ok());
    }
}
