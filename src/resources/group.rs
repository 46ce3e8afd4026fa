//! `redshift_group`

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::postgres::PgPool;
use tracing::info;

use super::{from_state, nullable, require_id, to_state, Lookup, Resource};
use crate::client::Client;
use crate::error::ProviderError;
use crate::schema::{Attribute, Schema};
use crate::sql::{quote_ident, quote_ident_list};

/// Resource type name.
pub const RESOURCE_TYPE: &str = "redshift_group";

/// Schema of `redshift_group`.
pub fn group_schema() -> Schema {
    Schema::v0()
        .with_description("A Redshift user group.")
        .with_attribute(
            "id",
            Attribute::computed_string().with_description("The group's system id (grosysid)."),
        )
        .with_attribute("name", Attribute::required_string().with_description("Group name."))
        .with_attribute(
            "users",
            Attribute::optional_string_set().with_description("Names of the group's members."),
        )
}

/// State of a `redshift_group`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupState {
    /// grosysid
    pub id: Option<String>,
    /// Group name.
    #[serde(deserialize_with = "nullable")]
    pub name: String,
    /// Member user names.
    #[serde(deserialize_with = "nullable")]
    pub users: BTreeSet<String>,
}

/// `CREATE GROUP` for `group`.
pub fn create_statement(group: &GroupState) -> String {
    let mut sql = format!("CREATE GROUP {}", quote_ident(&group.name));
    if !group.users.is_empty() {
        sql.push_str(" WITH USER ");
        sql.push_str(&quote_ident_list(&group.users));
    }
    sql
}

/// `ALTER GROUP` statements that turn `prior` into `planned`.
pub fn update_statements(prior: &GroupState, planned: &GroupState) -> Vec<String> {
    let mut statements = Vec::new();
    let name = quote_ident(&planned.name);
    if prior.name != planned.name {
        statements.push(format!(
            "ALTER GROUP {} RENAME TO {}",
            quote_ident(&prior.name),
            name
        ));
    }
    let removed: Vec<&String> = prior.users.difference(&planned.users).collect();
    if !removed.is_empty() {
        statements.push(format!(
            "ALTER GROUP {} DROP USER {}",
            name,
            quote_ident_list(removed)
        ));
    }
    let added: Vec<&String> = planned.users.difference(&prior.users).collect();
    if !added.is_empty() {
        statements.push(format!(
            "ALTER GROUP {} ADD USER {}",
            name,
            quote_ident_list(added)
        ));
    }
    statements
}

/// Statements that empty and drop `group`.
pub fn delete_statements(group: &GroupState) -> Vec<String> {
    let name = quote_ident(&group.name);
    let mut statements = Vec::new();
    if !group.users.is_empty() {
        statements.push(format!(
            "ALTER GROUP {} DROP USER {}",
            name,
            quote_ident_list(&group.users)
        ));
    }
    statements.push(format!("DROP GROUP {}", name));
    statements
}

/// Look up a group and its members.
pub(crate) async fn fetch_group(
    pool: &PgPool,
    lookup: Lookup<'_>,
) -> Result<Option<GroupState>, ProviderError> {
    let sql = match lookup {
        Lookup::Id(_) => "SELECT grosysid::varchar, groname::varchar FROM pg_group WHERE grosysid::varchar = $1",
        Lookup::Name(_) => "SELECT grosysid::varchar, groname::varchar FROM pg_group WHERE groname = $1",
    };
    let Some((id, name)) = sqlx::query_as::<_, (String, String)>(sql)
        .bind(lookup.value())
        .fetch_optional(pool)
        .await?
    else {
        return Ok(None);
    };

    let users: Vec<String> = sqlx::query_scalar(
        "SELECT u.usename::varchar \
         FROM pg_group g, pg_user_info u \
         WHERE g.grosysid::varchar = $1 AND u.usesysid = ANY(g.grolist) \
         ORDER BY 1",
    )
    .bind(&id)
    .fetch_all(pool)
    .await?;

    Ok(Some(GroupState {
        id: Some(id),
        name,
        users: users.into_iter().collect(),
    }))
}

/// Manages `redshift_group`.
pub struct GroupResource;

#[async_trait]
impl Resource for GroupResource {
    fn type_name(&self) -> &'static str {
        RESOURCE_TYPE
    }

    fn schema(&self) -> Schema {
        group_schema()
    }

    async fn create(&self, client: &Client, planned: Value) -> Result<Value, ProviderError> {
        let group: GroupState = from_state(&planned)?;
        let statement = create_statement(&group);
        let database = client.default_database();
        client
            .retry("create group", || {
                client.execute_in_transaction(database, std::slice::from_ref(&statement))
            })
            .await?;
        info!(group = %group.name, members = group.users.len(), "Created group");

        let pool = client.default_pool().await?;
        let created = fetch_group(&pool, Lookup::Name(&group.name))
            .await?
            .ok_or_else(|| ProviderError::NotFound(format!("group {} after create", group.name)))?;
        to_state(&created)
    }

    async fn read(&self, client: &Client, state: Value) -> Result<Option<Value>, ProviderError> {
        let prior: GroupState = from_state(&state)?;
        let id = require_id(&prior.id, RESOURCE_TYPE)?;
        let pool = client.default_pool().await?;
        match fetch_group(&pool, Lookup::Id(&id)).await? {
            Some(group) => Ok(Some(to_state(&group)?)),
            None => Ok(None),
        }
    }

    async fn update(
        &self,
        client: &Client,
        prior: Value,
        planned: Value,
    ) -> Result<Value, ProviderError> {
        let prior: GroupState = from_state(&prior)?;
        let planned: GroupState = from_state(&planned)?;
        let id = require_id(&prior.id, RESOURCE_TYPE)?;

        let statements = update_statements(&prior, &planned);
        let database = client.default_database();
        client
            .retry("update group", || client.execute_in_transaction(database, &statements))
            .await?;
        info!(group = %planned.name, statements = statements.len(), "Updated group");

        let pool = client.default_pool().await?;
        let updated = fetch_group(&pool, Lookup::Id(&id))
            .await?
            .ok_or_else(|| ProviderError::NotFound(format!("group {} after update", planned.name)))?;
        to_state(&updated)
    }

    async fn delete(&self, client: &Client, state: Value) -> Result<(), ProviderError> {
        let group: GroupState = from_state(&state)?;
        let statements = delete_statements(&group);
        let database = client.default_database();
        client
            .retry("drop group", || client.execute_in_transaction(database, &statements))
            .await?;
        info!(group = %group.name, "Dropped group");
        Ok(())
    }

    async fn import(&self, client: &Client, id: &str) -> Result<Option<Value>, ProviderError> {
        let pool = client.default_pool().await?;
        match fetch_group(&pool, Lookup::from_import(id)).await? {
            Some(group) => Ok(Some(to_state(&group)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn group(name: &str, users: &[&str]) -> GroupState {
        GroupState {
            id: Some("100".into()),
            name: name.into(),
            users: users.iter().map(|u| u.to_string()).collect(),
        }
    }

    #[test]
    fn test_create_statement() {
        assert_eq!(create_statement(&group("bi", &[])), "CREATE GROUP \"bi\"");
        assert_eq!(
            create_statement(&group("bi", &["bob", "alice"])),
            "CREATE GROUP \"bi\" WITH USER \"alice\", \"bob\""
        );
    }

    #[test]
    fn test_update_statements_membership() {
        let prior = group("bi", &["alice", "bob"]);
        let planned = group("bi", &["bob", "carol"]);
        assert_eq!(
            update_statements(&prior, &planned),
            vec![
                "ALTER GROUP \"bi\" DROP USER \"alice\"",
                "ALTER GROUP \"bi\" ADD USER \"carol\"",
            ]
        );
    }

    #[test]
    fn test_update_statements_rename_first() {
        let prior = group("bi", &[]);
        let planned = group("analytics", &["alice"]);
        assert_eq!(
            update_statements(&prior, &planned),
            vec![
                "ALTER GROUP \"bi\" RENAME TO \"analytics\"",
                "ALTER GROUP \"analytics\" ADD USER \"alice\"",
            ]
        );
    }

    #[test]
    fn test_delete_statements() {
        assert_eq!(
            delete_statements(&group("bi", &["alice"])),
            vec!["ALTER GROUP \"bi\" DROP USER \"alice\"", "DROP GROUP \"bi\""]
        );
        assert_eq!(delete_statements(&group("bi", &[])), vec!["DROP GROUP \"bi\""]);
    }

    #[test]
    fn test_state_tolerates_null_users() {
        let state: GroupState = from_state(&json!({"name": "bi", "users": null})).unwrap();
        assert!(state.users.is_empty());
        assert_eq!(
            to_state(&state).unwrap(),
            json!({"id": null, "name": "bi", "users": []})
        );
    }
}
