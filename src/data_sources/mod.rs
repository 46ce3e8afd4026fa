//! Read-only lookups of existing Redshift objects.
//!
//! Data sources share the catalog queries of the matching resources and
//! return the same attribute names, minus anything secret.

use async_trait::async_trait;
use serde_json::Value;

use crate::client::Client;
use crate::error::ProviderError;
use crate::schema::Schema;

pub mod database;
pub mod datashare;
pub mod group;
pub mod namespace;
pub mod schema;
pub mod user;

/// A data source the provider registers.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Type name as used in configuration, e.g. `redshift_user`.
    fn type_name(&self) -> &'static str;

    /// Attribute schema.
    fn schema(&self) -> Schema;

    /// Look the object up. A missing object is [`ProviderError::NotFound`].
    async fn read(&self, client: &Client, config: Value) -> Result<Value, ProviderError>;
}

/// Every data source the provider registers.
pub fn all() -> Vec<Box<dyn DataSource>> {
    vec![
        Box::new(user::UserDataSource),
        Box::new(group::GroupDataSource),
        Box::new(database::DatabaseDataSource),
        Box::new(schema::SchemaDataSource),
        Box::new(namespace::NamespaceDataSource),
        Box::new(datashare::DatashareDataSource),
    ]
}

/// The `name` a lookup is keyed on.
pub(crate) fn required_name(config: &Value) -> Result<&str, ProviderError> {
    config
        .get("name")
        .and_then(Value::as_str)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| ProviderError::Validation("`name` is required".to_string()))
}

pub(crate) fn not_found(type_name: &str, name: &str) -> ProviderError {
    ProviderError::NotFound(format!("{} `{}` does not exist", type_name, name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;

    #[test]
    fn test_registry() {
        let names: HashSet<&str> = all().iter().map(|d| d.type_name()).collect();
        assert_eq!(names.len(), 6);
        assert!(names.contains("redshift_namespace"));
    }

    #[test]
    fn test_lookups_take_name_as_input() {
        for source in all() {
            let schema = source.schema();
            match schema.attribute("name") {
                Some(name) => assert!(name.flags.required, "{}", source.type_name()),
                None => assert_eq!(source.type_name(), "redshift_namespace"),
            }
        }
    }

    #[test]
    fn test_required_name() {
        assert_eq!(required_name(&json!({"name": "dev"})).unwrap(), "dev");
        assert!(required_name(&json!({"name": ""})).is_err());
        assert!(required_name(&json!({})).is_err());
    }
}
