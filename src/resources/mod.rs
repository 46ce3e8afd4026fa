//! Managed Redshift objects.
//!
//! Each resource maps its attributes onto DDL/DCL and reads them back from the
//! system catalog. Resource state is a typed struct converted to and from the
//! JSON the host stores.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::client::Client;
use crate::error::ProviderError;
use crate::schema::{Diagnostic, Schema};

pub mod database;
pub mod datashare;
pub mod datashare_privilege;
pub mod default_privileges;
pub mod grant;
pub mod group;
pub mod role;
pub mod schema;
pub mod user;

/// A resource type the provider manages.
#[async_trait]
pub trait Resource: Send + Sync {
    /// Type name as used in configuration, e.g. `redshift_user`.
    fn type_name(&self) -> &'static str;

    /// Attribute schema.
    fn schema(&self) -> Schema;

    /// Checks that span attributes and cannot be expressed in the schema.
    fn validate(&self, config: &Value) -> Vec<Diagnostic> {
        let _ = config;
        Vec::new()
    }

    /// Create the object and return its state.
    async fn create(&self, client: &Client, planned: Value) -> Result<Value, ProviderError>;

    /// Refresh state from the catalog. `None` means the object is gone.
    async fn read(&self, client: &Client, state: Value) -> Result<Option<Value>, ProviderError>;

    /// Apply the difference between `prior` and `planned`.
    async fn update(
        &self,
        client: &Client,
        prior: Value,
        planned: Value,
    ) -> Result<Value, ProviderError>;

    /// Drop the object.
    async fn delete(&self, client: &Client, state: Value) -> Result<(), ProviderError>;

    /// Build state for an existing object from its import identifier.
    async fn import(&self, client: &Client, id: &str) -> Result<Option<Value>, ProviderError>;
}

/// Every resource the provider registers.
pub fn all() -> Vec<Box<dyn Resource>> {
    vec![
        Box::new(user::UserResource),
        Box::new(group::GroupResource),
        Box::new(role::RoleResource),
        Box::new(database::DatabaseResource),
        Box::new(schema::SchemaResource),
        Box::new(grant::GrantResource),
        Box::new(default_privileges::DefaultPrivilegesResource),
        Box::new(datashare::DatashareResource),
        Box::new(datashare_privilege::DatasharePrivilegeResource),
    ]
}

/// Deserialize resource state, treating null as an empty object.
pub(crate) fn from_state<T: DeserializeOwned>(value: &Value) -> Result<T, ProviderError> {
    match value {
        Value::Null => Ok(serde_json::from_value(Value::Object(Default::default()))?),
        other => Ok(serde_json::from_value(other.clone())?),
    }
}

/// Serialize resource state.
pub(crate) fn to_state<T: Serialize>(state: &T) -> Result<Value, ProviderError> {
    Ok(serde_json::to_value(state)?)
}

/// Deserialize a possibly-null field into its default.
pub(crate) fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Deserialize a single nested block sent either as an object or as a
/// one-element list.
pub(crate) fn single_block<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Array(mut items)) => {
            if items.is_empty() {
                return Ok(None);
            }
            items.swap_remove(0)
        },
        Some(other) => other,
    };
    serde_json::from_value(value)
        .map(Some)
        .map_err(serde::de::Error::custom)
}

/// The state's `id`, or an error if it has none.
pub(crate) fn require_id(id: &Option<String>, type_name: &str) -> Result<String, ProviderError> {
    id.clone()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ProviderError::InvalidRequest(format!("{} state has no id", type_name)))
}

/// Treat an empty string as unset.
pub(crate) fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

/// Whether an import identifier is a numeric system id rather than a name.
pub(crate) fn is_numeric_id(id: &str) -> bool {
    !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit())
}

/// How a catalog row is located.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Lookup<'a> {
    /// By system id (oid, usesysid, grosysid, role_id).
    Id(&'a str),
    /// By object name.
    Name(&'a str),
}

impl<'a> Lookup<'a> {
    /// Numeric import identifiers are ids, anything else is a name.
    pub(crate) fn from_import(id: &'a str) -> Self {
        if is_numeric_id(id) {
            Self::Id(id)
        } else {
            Self::Name(id)
        }
    }

    /// The bound value.
    pub(crate) fn value(&self) -> &'a str {
        match self {
            Self::Id(v) | Self::Name(v) => v,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::{BTreeSet, HashSet};

    #[derive(Debug, Default, Deserialize)]
    #[serde(default)]
    struct Sample {
        #[serde(deserialize_with = "nullable")]
        users: BTreeSet<String>,
        #[serde(deserialize_with = "single_block")]
        source: Option<Source>,
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Source {
        name: String,
    }

    #[test]
    fn test_registry_names_are_unique() {
        let names: HashSet<&str> = all().iter().map(|r| r.type_name()).collect();
        assert_eq!(names.len(), 9);
        assert!(names.iter().all(|n| n.starts_with("redshift_")));
    }

    #[test]
    fn test_every_resource_has_computed_id() {
        for resource in all() {
            let schema = resource.schema();
            let id = schema
                .attribute("id")
                .unwrap_or_else(|| panic!("{} has no id", resource.type_name()));
            assert!(id.flags.computed, "{} id is not computed", resource.type_name());
        }
    }

    #[test]
    fn test_nullable_and_single_block() {
        let sample: Sample = from_state(&json!({"users": null, "source": [{"name": "s"}]})).unwrap();
        assert!(sample.users.is_empty());
        assert_eq!(sample.source, Some(Source { name: "s".into() }));

        let sample: Sample = from_state(&json!({"source": {"name": "t"}})).unwrap();
        assert_eq!(sample.source.unwrap().name, "t");

        let sample: Sample = from_state(&json!({"source": []})).unwrap();
        assert!(sample.source.is_none());

        let sample: Sample = from_state(&Value::Null).unwrap();
        assert!(sample.source.is_none());
    }

    #[test]
    fn test_require_id() {
        assert_eq!(require_id(&Some("100".into()), "redshift_user").unwrap(), "100");
        assert!(require_id(&Some(String::new()), "redshift_user").is_err());
        assert!(require_id(&None, "redshift_user").is_err());
    }

    #[test]
    fn test_is_numeric_id() {
        assert!(is_numeric_id("100"));
        assert!(!is_numeric_id("alice"));
        assert!(!is_numeric_id(""));
        assert_eq!(Lookup::from_import("100"), Lookup::Id("100"));
        assert_eq!(Lookup::from_import("alice"), Lookup::Name("alice"));
        assert_eq!(Lookup::from_import("alice").value(), "alice");
    }
}
