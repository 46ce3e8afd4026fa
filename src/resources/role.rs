//! `redshift_role`

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::postgres::PgPool;
use tracing::info;

use super::{from_state, nullable, require_id, to_state, Lookup, Resource};
use crate::client::Client;
use crate::error::ProviderError;
use crate::schema::{Attribute, Schema};
use crate::sql::quote_ident;

/// Resource type name.
pub const RESOURCE_TYPE: &str = "redshift_role";

/// Schema of `redshift_role`.
pub fn role_schema() -> Schema {
    Schema::v0()
        .with_description("A Redshift role for role-based access control.")
        .with_attribute(
            "id",
            Attribute::computed_string().with_description("The role's id (role_id)."),
        )
        .with_attribute("name", Attribute::required_string().with_description("Role name."))
}

/// State of a `redshift_role`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoleState {
    /// role_id
    pub id: Option<String>,
    /// Role name.
    #[serde(deserialize_with = "nullable")]
    pub name: String,
}

/// `CREATE ROLE` for `role`.
pub fn create_statement(role: &RoleState) -> String {
    format!("CREATE ROLE {}", quote_ident(&role.name))
}

/// Statements that turn `prior` into `planned`. Only the name can change.
pub fn update_statements(prior: &RoleState, planned: &RoleState) -> Vec<String> {
    if prior.name == planned.name {
        return vec![];
    }
    vec![format!(
        "ALTER ROLE {} RENAME TO {}",
        quote_ident(&prior.name),
        quote_ident(&planned.name)
    )]
}

/// `DROP ROLE … FORCE`, which also revokes the role from its members.
pub fn drop_statement(role: &RoleState) -> String {
    format!("DROP ROLE {} FORCE", quote_ident(&role.name))
}

pub(crate) async fn fetch_role(
    pool: &PgPool,
    lookup: Lookup<'_>,
) -> Result<Option<RoleState>, ProviderError> {
    let sql = match lookup {
        Lookup::Id(_) => "SELECT role_id::varchar, role_name::varchar FROM svv_roles WHERE role_id::varchar = $1",
        Lookup::Name(_) => "SELECT role_id::varchar, role_name::varchar FROM svv_roles WHERE role_name = $1",
    };
    let row = sqlx::query_as::<_, (String, String)>(sql)
        .bind(lookup.value())
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|(id, name)| RoleState { id: Some(id), name }))
}

/// Manages `redshift_role`.
pub struct RoleResource;

#[async_trait]
impl Resource for RoleResource {
    fn type_name(&self) -> &'static str {
        RESOURCE_TYPE
    }

    fn schema(&self) -> Schema {
        role_schema()
    }

    async fn create(&self, client: &Client, planned: Value) -> Result<Value, ProviderError> {
        let role: RoleState = from_state(&planned)?;
        let statement = create_statement(&role);
        let database = client.default_database();
        client
            .retry("create role", || client.execute(database, &statement))
            .await?;
        info!(role = %role.name, "Created role");

        let pool = client.default_pool().await?;
        let created = fetch_role(&pool, Lookup::Name(&role.name))
            .await?
            .ok_or_else(|| ProviderError::NotFound(format!("role {} after create", role.name)))?;
        to_state(&created)
    }

    async fn read(&self, client: &Client, state: Value) -> Result<Option<Value>, ProviderError> {
        let prior: RoleState = from_state(&state)?;
        let id = require_id(&prior.id, RESOURCE_TYPE)?;
        let pool = client.default_pool().await?;
        match fetch_role(&pool, Lookup::Id(&id)).await? {
            Some(role) => Ok(Some(to_state(&role)?)),
            None => Ok(None),
        }
    }

    async fn update(
        &self,
        client: &Client,
        prior: Value,
        planned: Value,
    ) -> Result<Value, ProviderError> {
        let prior: RoleState = from_state(&prior)?;
        let planned: RoleState = from_state(&planned)?;
        let statements = update_statements(&prior, &planned);
        if !statements.is_empty() {
            let database = client.default_database();
            client
                .retry("rename role", || client.execute_in_transaction(database, &statements))
                .await?;
            info!(from = %prior.name, to = %planned.name, "Renamed role");
        }
        to_state(&RoleState {
            id: prior.id,
            name: planned.name,
        })
    }

    async fn delete(&self, client: &Client, state: Value) -> Result<(), ProviderError> {
        let role: RoleState = from_state(&state)?;
        let statement = drop_statement(&role);
        let database = client.default_database();
        client
            .retry("drop role", || client.execute(database, &statement))
            .await?;
        info!(role = %role.name, "Dropped role");
        Ok(())
    }

    async fn import(&self, client: &Client, id: &str) -> Result<Option<Value>, ProviderError> {
        let pool = client.default_pool().await?;
        match fetch_role(&pool, Lookup::from_import(id)).await? {
            Some(role) => Ok(Some(to_state(&role)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_schema() {
        let schema = role_schema();
        assert!(schema.attribute("name").unwrap().flags.required);
        assert!(schema.attribute("id").unwrap().flags.is_computed_only());
    }

    fn role(name: &str) -> RoleState {
        RoleState {
            id: Some("7".into()),
            name: name.into(),
        }
    }

    #[test]
    fn test_create_statement() {
        assert_eq!(create_statement(&role("etl")), "CREATE ROLE \"etl\"");
        assert_eq!(
            create_statement(&role("Data \"Eng\"")),
            "CREATE ROLE \"Data \"\"Eng\"\"\""
        );
    }

    #[test]
    fn test_update_statements() {
        assert!(update_statements(&role("etl"), &role("etl")).is_empty());
        assert_eq!(
            update_statements(&role("etl"), &role("etl-v2")),
            vec!["ALTER ROLE \"etl\" RENAME TO \"etl-v2\""]
        );
    }

    #[test]
    fn test_drop_statement() {
        assert_eq!(drop_statement(&role("etl")), "DROP ROLE \"etl\" FORCE");
        assert_eq!(drop_statement(&role("my role")), "DROP ROLE \"my role\" FORCE");
    }

    #[test]
    fn test_state_round_trip() {
        let state: RoleState = from_state(&json!({"id": "7", "name": "etl"})).unwrap();
        assert_eq!(state.name, "etl");
        assert_eq!(to_state(&state).unwrap(), json!({"id": "7", "name": "etl"}));
    }
}
