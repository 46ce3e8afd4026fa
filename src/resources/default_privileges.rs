//! `redshift_default_privileges`
//!
//! Privileges applied to objects an owner creates in the future, either in
//! one schema or database-wide.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::postgres::PgPool;
use tracing::{debug, info};

use super::grant::{grantee_exists, schema_exists};
use super::{from_state, non_empty, nullable, to_state, Resource};
use crate::acl::{
    parse_acl, privileges_for, reconcile_privileges, validate_privileges, Grantee, ObjectType,
    Privilege,
};
use crate::client::Client;
use crate::error::ProviderError;
use crate::schema::{Attribute, Diagnostic, Schema};
use crate::sql::{format_privileges, quote_ident};
use crate::validation::exactly_one_of;

/// Resource type name.
pub const RESOURCE_TYPE: &str = "redshift_default_privileges";

const NO_SCHEMA: &str = "noschema";

const OBJECT_TYPES: &[&str] = &["table", "function", "procedure"];

/// Schema of `redshift_default_privileges`.
pub fn default_privileges_schema() -> Schema {
    Schema::v0()
        .with_description("Privileges granted on objects an owner creates from now on.")
        .with_attribute("id", Attribute::computed_string())
        .with_attribute(
            "user",
            Attribute::optional_string()
                .with_force_new()
                .with_conflicts_with(&["group", "role"]),
        )
        .with_attribute(
            "group",
            Attribute::optional_string()
                .with_force_new()
                .with_conflicts_with(&["user", "role"])
                .with_description("Group to grant to; `public` grants to everyone."),
        )
        .with_attribute(
            "role",
            Attribute::optional_string()
                .with_force_new()
                .with_conflicts_with(&["user", "group"]),
        )
        .with_attribute(
            "owner",
            Attribute::required_string()
                .with_force_new()
                .with_description("User whose new objects receive the privileges."),
        )
        .with_attribute(
            "schema",
            Attribute::optional_string()
                .with_force_new()
                .with_description("Limit to objects created in this schema; unset means database-wide."),
        )
        .with_attribute(
            "object_type",
            Attribute::required_string()
                .with_force_new()
                .with_allowed_values(OBJECT_TYPES),
        )
        .with_attribute("privileges", Attribute::required_string_set())
}

/// State of a `redshift_default_privileges`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultPrivilegesState {
    /// Composite id.
    pub id: Option<String>,
    /// Grantee user.
    pub user: Option<String>,
    /// Grantee group.
    pub group: Option<String>,
    /// Grantee role.
    pub role: Option<String>,
    /// Object owner.
    #[serde(deserialize_with = "nullable")]
    pub owner: String,
    /// Schema scope.
    pub schema: Option<String>,
    /// `table`, `function` or `procedure`.
    #[serde(deserialize_with = "nullable")]
    pub object_type: String,
    /// Privilege names.
    #[serde(deserialize_with = "nullable")]
    pub privileges: BTreeSet<String>,
}

impl DefaultPrivilegesState {
    fn grantee(&self) -> Result<Grantee, ProviderError> {
        Grantee::from_attributes(
            self.user.as_deref(),
            self.group.as_deref(),
            self.role.as_deref(),
        )
    }

    fn object_type(&self) -> Result<ObjectType, ProviderError> {
        ObjectType::parse(&self.object_type)
            .filter(|t| t.default_acl_code().is_some())
            .ok_or_else(|| {
                ProviderError::Validation(format!(
                    "object_type `{}` has no default privileges",
                    self.object_type
                ))
            })
    }

    fn privileges(&self, object_type: ObjectType) -> Result<BTreeSet<Privilege>, ProviderError> {
        let names: Vec<&String> = self.privileges.iter().collect();
        validate_privileges(object_type, &names)
    }
}

fn validate_default_privileges(config: &Value) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    exactly_one_of(config, &["user", "group", "role"], &mut diagnostics);
    let Ok(state) = from_state::<DefaultPrivilegesState>(config) else {
        return diagnostics;
    };
    let Ok(object_type) = state.object_type() else {
        return diagnostics;
    };
    if let Err(e) = state.privileges(object_type) {
        diagnostics.push(
            Diagnostic::error("Invalid privileges")
                .with_detail(e.message())
                .with_attribute("privileges"),
        );
    }
    diagnostics
}

/// Revoke everything `grantee` would receive, then grant `privileges`.
pub fn default_privileges_statements(
    owner: &str,
    schema: Option<&str>,
    object_type: ObjectType,
    grantee: &Grantee,
    privileges: &BTreeSet<Privilege>,
) -> Vec<String> {
    let mut prefix = format!("ALTER DEFAULT PRIVILEGES FOR USER {}", quote_ident(owner));
    if let Some(schema) = schema.filter(|s| !s.is_empty()) {
        prefix.push_str(&format!(" IN SCHEMA {}", quote_ident(schema)));
    }
    let objects = object_type.as_sql_plural().unwrap_or("TABLES");

    let mut statements = vec![format!(
        "{} REVOKE ALL ON {} FROM {}",
        prefix,
        objects,
        grantee.to_sql()
    )];
    if !privileges.is_empty() {
        let privileges: Vec<Privilege> = privileges.iter().copied().collect();
        statements.push(format!(
            "{} GRANT {} ON {} TO {}",
            prefix,
            format_privileges(&privileges),
            objects,
            grantee.to_sql()
        ));
    }
    statements
}

/// Composite id: `<kind>:<grantee>_<schema>_<owner>_<object_type>`.
pub fn default_privileges_id(
    grantee: &Grantee,
    schema: Option<&str>,
    owner: &str,
    object_type: ObjectType,
) -> String {
    format!(
        "{}:{}_{}_{}_{}",
        grantee.kind(),
        grantee.name(),
        schema.filter(|s| !s.is_empty()).unwrap_or(NO_SCHEMA),
        owner,
        object_type.name()
    )
}

/// Parse an id produced by [`default_privileges_id`].
pub fn parse_default_privileges_id(id: &str) -> Result<DefaultPrivilegesState, ProviderError> {
    let invalid = |reason: &str| {
        ProviderError::Validation(format!(
            "invalid {} id `{}`: {}; expected \
             <user|group|role>:<grantee>_<schema|{}>_<owner>_<table|function|procedure>",
            RESOURCE_TYPE, id, reason, NO_SCHEMA
        ))
    };
    let parts: Vec<&str> = id.split('_').collect();
    if parts.len() != 4 {
        return Err(invalid("expected four segments"));
    }
    let (kind, name) = parts[0]
        .split_once(':')
        .ok_or_else(|| invalid("missing grantee kind"))?;
    let object_type = ObjectType::parse(parts[3])
        .filter(|t| t.default_acl_code().is_some())
        .ok_or_else(|| invalid("last segment must be table, function or procedure"))?;

    let mut state = DefaultPrivilegesState {
        owner: parts[2].to_string(),
        schema: Some(parts[1].to_string()).filter(|s| s != NO_SCHEMA),
        object_type: object_type.name().to_string(),
        ..Default::default()
    };
    match kind {
        "user" => state.user = Some(name.to_string()),
        "group" => state.group = Some(name.to_string()),
        "role" => state.role = Some(name.to_string()),
        _ => return Err(invalid("grantee kind must be user, group or role")),
    }
    Ok(state)
}

/// `svv_default_privileges.object_type` for `object_type`.
fn svv_object_type(object_type: ObjectType) -> &'static str {
    match object_type {
        ObjectType::Table => "RELATION",
        other => other.as_sql(),
    }
}

async fn current_default_privileges(
    pool: &PgPool,
    state: &DefaultPrivilegesState,
    grantee: &Grantee,
    object_type: ObjectType,
) -> Result<BTreeSet<Privilege>, ProviderError> {
    let schema = non_empty(&state.schema).unwrap_or_default();
    if let Grantee::Role(role) = grantee {
        let rows = sqlx::query_scalar::<_, String>(
            "SELECT privilege_type::varchar FROM svv_default_privileges \
             WHERE grantee_type = 'role' AND grantee_name = $1 AND owner_name = $2 \
             AND object_type = $3 AND COALESCE(schema_name, '') = $4",
        )
        .bind(role)
        .bind(&state.owner)
        .bind(svv_object_type(object_type))
        .bind(schema)
        .fetch_all(pool)
        .await?;
        return Ok(rows.iter().filter_map(|p| Privilege::parse(p)).collect());
    }

    let code = object_type.default_acl_code().unwrap_or('r').to_string();
    let acls = sqlx::query_scalar::<_, String>(
        "SELECT COALESCE(array_to_string(d.defaclacl, '|'), '')::varchar \
         FROM pg_default_acl d \
         JOIN pg_user_info u ON u.usesysid = d.defacluser \
         LEFT JOIN pg_namespace n ON n.oid = d.defaclnamespace \
         WHERE u.usename = $1 AND d.defaclobjtype::varchar = $2 \
         AND COALESCE(n.nspname, '') = $3",
    )
    .bind(&state.owner)
    .bind(code)
    .bind(schema)
    .fetch_all(pool)
    .await?;
    Ok(acls
        .iter()
        .flat_map(|acl| privileges_for(&parse_acl(acl), grantee, object_type))
        .collect())
}

/// Read the default privileges back. `None` when the grantee, owner or
/// schema is gone.
pub(crate) async fn fetch_default_privileges(
    client: &Client,
    prior: &DefaultPrivilegesState,
) -> Result<Option<DefaultPrivilegesState>, ProviderError> {
    let grantee = prior.grantee()?;
    let object_type = prior.object_type()?;
    let pool = client.default_pool().await?;

    if !grantee_exists(&pool, &grantee).await?
        || !grantee_exists(&pool, &Grantee::User(prior.owner.clone())).await?
    {
        debug!(owner = %prior.owner, grantee = grantee.name(), "Owner or grantee no longer exists");
        return Ok(None);
    }
    if let Some(schema) = non_empty(&prior.schema) {
        if !schema_exists(&pool, schema).await? {
            return Ok(None);
        }
    }

    let actual = current_default_privileges(&pool, prior, &grantee, object_type).await?;
    let mut state = prior.clone();
    state.privileges = reconcile_privileges(object_type, &prior.privileges, &actual);
    state.id = Some(default_privileges_id(
        &grantee,
        non_empty(&prior.schema),
        &prior.owner,
        object_type,
    ));
    Ok(Some(state))
}

async fn apply(
    client: &Client,
    state: &DefaultPrivilegesState,
    privileges: &BTreeSet<Privilege>,
) -> Result<(), ProviderError> {
    let statements = default_privileges_statements(
        &state.owner,
        non_empty(&state.schema),
        state.object_type()?,
        &state.grantee()?,
        privileges,
    );
    let database = client.default_database();
    let _guard = client.grant_lock().await;
    client
        .retry("alter default privileges", || {
            client.execute_in_transaction(database, &statements)
        })
        .await
}

/// Manages `redshift_default_privileges`.
pub struct DefaultPrivilegesResource;

impl DefaultPrivilegesResource {
    async fn apply_and_read(&self, client: &Client, planned: Value) -> Result<Value, ProviderError> {
        let state: DefaultPrivilegesState = from_state(&planned)?;
        let object_type = state.object_type()?;
        apply(client, &state, &state.privileges(object_type)?).await?;
        info!(owner = %state.owner, object_type = %object_type, "Applied default privileges");

        let refreshed = fetch_default_privileges(client, &state)
            .await?
            .ok_or_else(|| {
                ProviderError::NotFound(format!("{} owner or grantee after apply", RESOURCE_TYPE))
            })?;
        to_state(&refreshed)
    }
}

#[async_trait]
impl Resource for DefaultPrivilegesResource {
    fn type_name(&self) -> &'static str {
        RESOURCE_TYPE
    }

    fn schema(&self) -> Schema {
        default_privileges_schema()
    }

    fn validate(&self, config: &Value) -> Vec<Diagnostic> {
        validate_default_privileges(config)
    }

    async fn create(&self, client: &Client, planned: Value) -> Result<Value, ProviderError> {
        self.apply_and_read(client, planned).await
    }

    async fn read(&self, client: &Client, state: Value) -> Result<Option<Value>, ProviderError> {
        let prior: DefaultPrivilegesState = from_state(&state)?;
        match fetch_default_privileges(client, &prior).await? {
            Some(state) => Ok(Some(to_state(&state)?)),
            None => Ok(None),
        }
    }

    async fn update(
        &self,
        client: &Client,
        _prior: Value,
        planned: Value,
    ) -> Result<Value, ProviderError> {
        self.apply_and_read(client, planned).await
    }

    async fn delete(&self, client: &Client, state: Value) -> Result<(), ProviderError> {
        let state: DefaultPrivilegesState = from_state(&state)?;
        apply(client, &state, &BTreeSet::new()).await?;
        info!(owner = %state.owner, object_type = %state.object_type, "Revoked default privileges");
        Ok(())
    }

    async fn import(&self, client: &Client, id: &str) -> Result<Option<Value>, ProviderError> {
        let prior = parse_default_privileges_id(id)?;
        match fetch_default_privileges(client, &prior).await? {
            Some(state) => Ok(Some(to_state(&state)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_statements_in_schema() {
        let privileges: BTreeSet<Privilege> = [Privilege::Select, Privilege::Update].into();
        assert_eq!(
            default_privileges_statements(
                "etl",
                Some("sales"),
                ObjectType::Table,
                &Grantee::Group("analysts".into()),
                &privileges,
            ),
            vec![
                "ALTER DEFAULT PRIVILEGES FOR USER \"etl\" IN SCHEMA \"sales\" \
                 REVOKE ALL ON TABLES FROM GROUP \"analysts\"",
                "ALTER DEFAULT PRIVILEGES FOR USER \"etl\" IN SCHEMA \"sales\" \
                 GRANT SELECT, UPDATE ON TABLES TO GROUP \"analysts\"",
            ]
        );
    }

    #[test]
    fn test_statements_database_wide_revoke_only() {
        assert_eq!(
            default_privileges_statements(
                "etl",
                None,
                ObjectType::Procedure,
                &Grantee::Role("runner".into()),
                &BTreeSet::new(),
            ),
            vec!["ALTER DEFAULT PRIVILEGES FOR USER \"etl\" REVOKE ALL ON PROCEDURES FROM ROLE \"runner\""]
        );
    }

    #[test]
    fn test_id_round_trip() {
        let id = default_privileges_id(
            &Grantee::Role("reader".into()),
            None,
            "etl",
            ObjectType::Function,
        );
        assert_eq!(id, "role:reader_noschema_etl_function");

        let state = parse_default_privileges_id(&id).unwrap();
        assert_eq!(state.role.as_deref(), Some("reader"));
        assert_eq!(state.owner, "etl");
        assert!(state.schema.is_none());
        assert_eq!(state.object_type, "function");

        assert!(parse_default_privileges_id("user:a_s_etl_schema").is_err());
        assert!(parse_default_privileges_id("user:a_s_etl").is_err());
        assert!(parse_default_privileges_id("a_s_etl_table").is_err());
    }

    #[test]
    fn test_validate() {
        assert!(validate_default_privileges(&json!({
            "user": "alice",
            "owner": "etl",
            "object_type": "table",
            "privileges": ["select", "insert"]
        }))
        .is_empty());

        let diagnostics = validate_default_privileges(&json!({
            "owner": "etl",
            "object_type": "function",
            "privileges": ["select"]
        }));
        assert_eq!(diagnostics.len(), 2);
        assert_eq!(diagnostics[1].attribute.as_deref(), Some("privileges"));
    }
}
