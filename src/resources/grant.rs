//! `redshift_grant`
//!
//! A grant owns the complete privilege set of one grantee on one target:
//! applying it revokes everything the grantee holds there and grants the
//! configured privileges back. Users, groups and PUBLIC are read from the
//! object's ACL; roles are read from the `svv_*_privileges` views, which
//! are the only place Redshift reports role privileges.

use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::postgres::PgPool;
use tracing::{debug, info};

use super::{from_state, non_empty, nullable, to_state, Resource};
use crate::acl::{
    common_privileges, parse_acl, privileges_for, reconcile_privileges, validate_privileges,
    Grantee, ObjectType, Privilege,
};
use crate::client::Client;
use crate::error::ProviderError;
use crate::schema::{Attribute, Diagnostic, Schema};
use crate::sql::{format_privileges, qualified, quote_ident, quote_ident_list};
use crate::validation::exactly_one_of;

/// Resource type name.
pub const RESOURCE_TYPE: &str = "redshift_grant";

/// Placeholder for the schema segment of ids whose object type has no schema.
const NO_SCHEMA: &str = "noschema";

const OBJECT_TYPES: &[&str] = &["database", "schema", "table", "function", "procedure", "language"];

/// Schema of `redshift_grant`.
pub fn grant_schema() -> Schema {
    Schema::v0()
        .with_description(
            "The privileges of one user, group or role on a database, schema, \
             set of tables, functions, procedures or languages.",
        )
        .with_attribute("id", Attribute::computed_string())
        .with_attribute(
            "user",
            Attribute::optional_string()
                .with_force_new()
                .with_conflicts_with(&["group", "role"])
                .with_description("User to grant to."),
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
                .with_conflicts_with(&["user", "group"])
                .with_description("Role to grant to."),
        )
        .with_attribute(
            "database",
            Attribute::optional_computed_string()
                .with_force_new()
                .with_description("Target database; defaults to the provider database."),
        )
        .with_attribute(
            "schema",
            Attribute::optional_string()
                .with_force_new()
                .with_description("Target schema. Not used for database and language grants."),
        )
        .with_attribute(
            "object_type",
            Attribute::required_string()
                .with_force_new()
                .with_allowed_values(OBJECT_TYPES),
        )
        .with_attribute(
            "objects",
            Attribute::optional_string_set().with_force_new().with_description(
                "Tables, functions, procedures or languages. Empty means every object \
                 of the type in the schema.",
            ),
        )
        .with_attribute(
            "privileges",
            Attribute::required_string_set()
                .with_description("Privileges to hold; `all` expands to every privilege."),
        )
}

/// State of a `redshift_grant`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GrantState {
    /// Composite id.
    pub id: Option<String>,
    /// Grantee user.
    pub user: Option<String>,
    /// Grantee group.
    pub group: Option<String>,
    /// Grantee role.
    pub role: Option<String>,
    /// Target database.
    pub database: Option<String>,
    /// Target schema.
    pub schema: Option<String>,
    /// Object type name.
    #[serde(deserialize_with = "nullable")]
    pub object_type: String,
    /// Object names.
    #[serde(deserialize_with = "nullable")]
    pub objects: BTreeSet<String>,
    /// Privilege names.
    #[serde(deserialize_with = "nullable")]
    pub privileges: BTreeSet<String>,
}

impl GrantState {
    fn grantee(&self) -> Result<Grantee, ProviderError> {
        Grantee::from_attributes(
            self.user.as_deref(),
            self.group.as_deref(),
            self.role.as_deref(),
        )
    }

    fn object_type(&self) -> Result<ObjectType, ProviderError> {
        ObjectType::parse(&self.object_type).ok_or_else(|| {
            ProviderError::Validation(format!("unknown object_type `{}`", self.object_type))
        })
    }

    fn privileges(&self, object_type: ObjectType) -> Result<BTreeSet<Privilege>, ProviderError> {
        let names: Vec<&String> = self.privileges.iter().collect();
        validate_privileges(object_type, &names)
    }

    fn schema_name(&self) -> &str {
        non_empty(&self.schema).unwrap_or_default()
    }

    fn database_or<'a>(&'a self, default: &'a str) -> &'a str {
        non_empty(&self.database).unwrap_or(default)
    }
}

fn validate_grant(config: &Value) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    exactly_one_of(config, &["user", "group", "role"], &mut diagnostics);
    let Ok(grant) = from_state::<GrantState>(config) else {
        return diagnostics;
    };
    let Some(object_type) = ObjectType::parse(&grant.object_type) else {
        return diagnostics;
    };

    match (object_type.requires_schema(), non_empty(&grant.schema)) {
        (true, None) => diagnostics.push(
            Diagnostic::error(format!("schema is required for {} grants", object_type))
                .with_attribute("schema"),
        ),
        (false, Some(_)) => diagnostics.push(
            Diagnostic::error(format!("schema cannot be set for {} grants", object_type))
                .with_attribute("schema"),
        ),
        _ => {},
    }

    match object_type {
        ObjectType::Database | ObjectType::Schema if !grant.objects.is_empty() => {
            diagnostics.push(
                Diagnostic::error(format!("objects cannot be set for {} grants", object_type))
                    .with_attribute("objects"),
            )
        },
        ObjectType::Language if grant.objects.is_empty() => diagnostics.push(
            Diagnostic::error("language grants must name at least one language")
                .with_attribute("objects"),
        ),
        _ => {},
    }

    if let Err(e) = grant.privileges(object_type) {
        diagnostics.push(
            Diagnostic::error("Invalid privileges")
                .with_detail(e.message())
                .with_attribute("privileges"),
        );
    }
    diagnostics
}

/// The target of a GRANT/REVOKE, as written after `ON`.
///
/// `objects` must already be rendered: qualified table names, routine
/// signatures or language names.
pub fn grant_target(
    object_type: ObjectType,
    database: &str,
    schema: &str,
    objects: &[String],
) -> String {
    match (object_type, object_type.as_sql_plural()) {
        (ObjectType::Database, _) => format!("DATABASE {}", quote_ident(database)),
        (ObjectType::Schema, _) => format!("SCHEMA {}", quote_ident(schema)),
        (ObjectType::Language, _) => format!("LANGUAGE {}", quote_ident_list(objects)),
        (_, Some(plural)) if objects.is_empty() => {
            format!("ALL {} IN SCHEMA {}", plural, quote_ident(schema))
        },
        _ => format!("{} {}", object_type.as_sql(), objects.join(", ")),
    }
}

/// Revoke everything `grantee` holds on `target`, then grant `privileges`.
pub fn grant_statements(
    grantee: &Grantee,
    target: &str,
    privileges: &BTreeSet<Privilege>,
) -> Vec<String> {
    let mut statements = vec![revoke_statement(grantee, target)];
    if !privileges.is_empty() {
        let privileges: Vec<Privilege> = privileges.iter().copied().collect();
        statements.push(format!(
            "GRANT {} ON {} TO {}",
            format_privileges(&privileges),
            target,
            grantee.to_sql()
        ));
    }
    statements
}

fn revoke_statement(grantee: &Grantee, target: &str) -> String {
    format!("REVOKE ALL ON {} FROM {}", target, grantee.to_sql())
}

/// Composite id: `<kind>:<grantee>_<database>_<schema>_<object_type>[_<object>…]`.
pub fn grant_id(
    grantee: &Grantee,
    database: &str,
    schema: Option<&str>,
    object_type: ObjectType,
    objects: &BTreeSet<String>,
) -> String {
    let mut parts = vec![
        format!("{}:{}", grantee.kind(), grantee.name()),
        database.to_string(),
        schema.filter(|s| !s.is_empty()).unwrap_or(NO_SCHEMA).to_string(),
        object_type.name().to_string(),
    ];
    parts.extend(objects.iter().cloned());
    parts.join("_")
}

/// Parse an id produced by [`grant_id`] into a state with no privileges.
pub fn parse_grant_id(id: &str) -> Result<GrantState, ProviderError> {
    let invalid = |reason: &str| {
        ProviderError::Validation(format!(
            "invalid {} id `{}`: {}; expected \
             <user|group|role>:<grantee>_<database>_<schema|{}>_<object_type>[_<object>...]",
            RESOURCE_TYPE, id, reason, NO_SCHEMA
        ))
    };
    let parts: Vec<&str> = id.split('_').collect();
    if parts.len() < 4 {
        return Err(invalid("too few segments"));
    }
    let (kind, name) = parts[0]
        .split_once(':')
        .ok_or_else(|| invalid("missing grantee kind"))?;
    let object_type = ObjectType::parse(parts[3])
        .ok_or_else(|| invalid("fourth segment is not an object type"))?;

    let mut state = GrantState {
        database: Some(parts[1].to_string()),
        schema: Some(parts[2].to_string()).filter(|s| s != NO_SCHEMA),
        object_type: object_type.name().to_string(),
        objects: parts[4..].iter().map(|o| o.to_string()).collect(),
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

/// Whether `grantee` exists on the cluster.
pub(crate) async fn grantee_exists(pool: &PgPool, grantee: &Grantee) -> Result<bool, ProviderError> {
    let sql = match grantee {
        Grantee::Public => return Ok(true),
        Grantee::User(_) => "SELECT 1 FROM pg_user_info WHERE usename = $1",
        Grantee::Group(_) => "SELECT 1 FROM pg_group WHERE groname = $1",
        Grantee::Role(_) => "SELECT 1 FROM svv_roles WHERE role_name = $1",
    };
    Ok(sqlx::query_scalar::<_, i32>(sql)
        .bind(grantee.name())
        .fetch_optional(pool)
        .await?
        .is_some())
}

/// Whether `schema` exists in the pool's database.
pub(crate) async fn schema_exists(pool: &PgPool, schema: &str) -> Result<bool, ProviderError> {
    Ok(sqlx::query_scalar::<_, i32>("SELECT 1 FROM pg_namespace WHERE nspname = $1")
        .bind(schema)
        .fetch_optional(pool)
        .await?
        .is_some())
}

fn routine_kind(object_type: ObjectType) -> &'static str {
    if object_type == ObjectType::Procedure {
        "p"
    } else {
        "f"
    }
}

/// Argument type lists of every routine in `schema`, by name.
async fn routine_signatures(
    pool: &PgPool,
    object_type: ObjectType,
    schema: &str,
) -> Result<HashMap<String, Vec<String>>, ProviderError> {
    let rows = sqlx::query_as::<_, (String, String)>(
        "SELECT p.proname::varchar, oidvectortypes(p.proargtypes)::varchar \
         FROM pg_proc_info p JOIN pg_namespace n ON n.oid = p.pronamespace \
         WHERE n.nspname = $1 AND p.prokind = $2",
    )
    .bind(schema)
    .bind(routine_kind(object_type))
    .fetch_all(pool)
    .await?;
    let mut signatures: HashMap<String, Vec<String>> = HashMap::new();
    for (name, args) in rows {
        signatures.entry(name).or_default().push(args);
    }
    Ok(signatures)
}

/// Render configured objects for a GRANT target. Every overload of a named
/// routine is included.
pub fn render_objects(
    object_type: ObjectType,
    schema: &str,
    objects: &BTreeSet<String>,
    signatures: &HashMap<String, Vec<String>>,
) -> Result<Vec<String>, ProviderError> {
    match object_type {
        ObjectType::Table => Ok(objects.iter().map(|o| qualified(schema, o)).collect()),
        ObjectType::Function | ObjectType::Procedure => {
            let mut rendered = Vec::new();
            for name in objects {
                let overloads = signatures.get(name).ok_or_else(|| {
                    ProviderError::NotFound(format!("{} {}.{}", object_type, schema, name))
                })?;
                rendered.extend(
                    overloads
                        .iter()
                        .map(|args| format!("{}({})", qualified(schema, name), args)),
                );
            }
            Ok(rendered)
        },
        _ => Ok(objects.iter().cloned().collect()),
    }
}

/// Every object of the grant's type with its serialized ACL.
async fn object_acls(
    pool: &PgPool,
    object_type: ObjectType,
    database: &str,
    schema: &str,
) -> Result<Vec<(String, String)>, ProviderError> {
    let (sql, binds): (&str, Vec<&str>) = match object_type {
        ObjectType::Database => (
            "SELECT datname::varchar, COALESCE(array_to_string(datacl, '|'), '')::varchar \
             FROM pg_database WHERE datname = $1",
            vec![database],
        ),
        ObjectType::Schema => (
            "SELECT nspname::varchar, COALESCE(array_to_string(nspacl, '|'), '')::varchar \
             FROM pg_namespace WHERE nspname = $1",
            vec![schema],
        ),
        ObjectType::Table => (
            "SELECT c.relname::varchar, COALESCE(array_to_string(c.relacl, '|'), '')::varchar \
             FROM pg_class c JOIN pg_namespace n ON n.oid = c.relnamespace \
             WHERE n.nspname = $1 AND c.relkind IN ('r', 'v', 'm')",
            vec![schema],
        ),
        ObjectType::Function | ObjectType::Procedure => (
            "SELECT p.proname::varchar, COALESCE(array_to_string(p.proacl, '|'), '')::varchar \
             FROM pg_proc_info p JOIN pg_namespace n ON n.oid = p.pronamespace \
             WHERE n.nspname = $1 AND p.prokind = $2",
            vec![schema, routine_kind(object_type)],
        ),
        ObjectType::Language => (
            "SELECT lanname::varchar, COALESCE(array_to_string(lanacl, '|'), '')::varchar \
             FROM pg_language",
            vec![],
        ),
    };
    let mut query = sqlx::query_as::<_, (String, String)>(sql);
    for bind in binds {
        query = query.bind(bind);
    }
    Ok(query.fetch_all(pool).await?)
}

/// Privileges a role holds, as (object name, argument types, privilege).
/// Argument types are empty for everything but functions and procedures.
async fn role_privileges(
    pool: &PgPool,
    role: &str,
    object_type: ObjectType,
    database: &str,
    schema: &str,
) -> Result<BTreeSet<(String, String, Privilege)>, ProviderError> {
    let (sql, scope) = match object_type {
        ObjectType::Database => (
            "SELECT database_name::varchar, ''::varchar, privilege_type::varchar \
             FROM svv_database_privileges \
             WHERE identity_type = 'role' AND identity_name = $1 AND database_name = $2",
            Some(database),
        ),
        ObjectType::Schema => (
            "SELECT namespace_name::varchar, ''::varchar, privilege_type::varchar \
             FROM svv_schema_privileges \
             WHERE identity_type = 'role' AND identity_name = $1 AND namespace_name = $2",
            Some(schema),
        ),
        ObjectType::Table => (
            "SELECT relation_name::varchar, ''::varchar, privilege_type::varchar \
             FROM svv_relation_privileges \
             WHERE identity_type = 'role' AND identity_name = $1 AND namespace_name = $2",
            Some(schema),
        ),
        ObjectType::Function | ObjectType::Procedure => (
            "SELECT function_name::varchar, COALESCE(argument_types, '')::varchar, \
                    privilege_type::varchar \
             FROM svv_function_privileges \
             WHERE identity_type = 'role' AND identity_name = $1 AND namespace_name = $2",
            Some(schema),
        ),
        ObjectType::Language => (
            "SELECT language_name::varchar, ''::varchar, privilege_type::varchar \
             FROM svv_language_privileges \
             WHERE identity_type = 'role' AND identity_name = $1",
            None,
        ),
    };
    let mut query = sqlx::query_as::<_, (String, String, String)>(sql).bind(role);
    if let Some(scope) = scope {
        query = query.bind(scope);
    }
    let rows = query.fetch_all(pool).await?;

    Ok(rows
        .into_iter()
        .filter_map(|(object, arguments, privilege)| {
            Privilege::parse(&privilege).map(|p| (object, arguments, p))
        })
        .collect())
}

/// Merge per-row privileges by object name, keeping only what every row
/// holds. Overloaded functions and procedures share a name and produce one
/// row per signature.
pub fn intersect_by_name<I>(rows: I) -> HashMap<String, BTreeSet<Privilege>>
where
    I: IntoIterator<Item = (String, BTreeSet<Privilege>)>,
{
    let mut merged: HashMap<String, BTreeSet<Privilege>> = HashMap::new();
    for (name, privileges) in rows {
        match merged.entry(name) {
            Entry::Occupied(mut entry) => {
                let common = entry.get().intersection(&privileges).copied().collect();
                entry.insert(common);
            },
            Entry::Vacant(entry) => {
                entry.insert(privileges);
            },
        }
    }
    merged
}

/// Per-name privileges of a role: a privilege counts only when it is held on
/// as many distinct signatures as the object has overloads.
pub fn role_privileges_by_name(
    overloads: &HashMap<String, usize>,
    held: &BTreeSet<(String, String, Privilege)>,
) -> HashMap<String, BTreeSet<Privilege>> {
    let mut counts: HashMap<(&str, Privilege), usize> = HashMap::new();
    for (name, _, privilege) in held {
        *counts.entry((name.as_str(), *privilege)).or_default() += 1;
    }
    overloads
        .iter()
        .map(|(name, &total)| {
            let privileges = counts
                .iter()
                .filter(|((held_name, _), count)| held_name == name && **count >= total)
                .map(|((_, privilege), _)| *privilege)
                .collect();
            (name.clone(), privileges)
        })
        .collect()
}

/// Reduce per-object privileges to the grant's privilege set.
///
/// Named objects that do not exist hold nothing. When the grant covers every
/// object of a type and the schema has none, the configured set stands.
pub fn effective_privileges(
    object_type: ObjectType,
    configured_objects: &BTreeSet<String>,
    per_object: &HashMap<String, BTreeSet<Privilege>>,
    configured: &BTreeSet<Privilege>,
) -> BTreeSet<Privilege> {
    let empty = BTreeSet::new();
    let sets: Vec<&BTreeSet<Privilege>> = if configured_objects.is_empty() {
        per_object.values().collect()
    } else {
        configured_objects
            .iter()
            .map(|o| per_object.get(o).unwrap_or(&empty))
            .collect()
    };
    let allowed = object_type.allowed_privileges();
    common_privileges(sets)
        .unwrap_or_else(|| configured.clone())
        .into_iter()
        .filter(|p| allowed.contains(p))
        .collect()
}

/// Read the grant back. `None` when the grantee, database, schema or
/// single target object is gone.
pub(crate) async fn fetch_grant(
    client: &Client,
    prior: &GrantState,
) -> Result<Option<GrantState>, ProviderError> {
    let grantee = prior.grantee()?;
    let object_type = prior.object_type()?;
    let database = prior.database_or(client.default_database()).to_string();
    let schema = prior.schema_name();

    let default_pool = client.default_pool().await?;
    if !grantee_exists(&default_pool, &grantee).await? {
        debug!(grantee = grantee.name(), "Grantee no longer exists");
        return Ok(None);
    }
    let pool = match client.pool(&database).await {
        Ok(pool) => pool,
        Err(ProviderError::NotFound(_)) => return Ok(None),
        Err(e) => return Err(e),
    };
    if object_type.requires_schema() && !schema_exists(&pool, schema).await? {
        return Ok(None);
    }

    let acls = object_acls(&pool, object_type, &database, schema).await?;
    if matches!(object_type, ObjectType::Database | ObjectType::Schema) && acls.is_empty() {
        return Ok(None);
    }

    let per_object: HashMap<String, BTreeSet<Privilege>> = match &grantee {
        Grantee::Role(role) => {
            let held = role_privileges(&pool, role, object_type, &database, schema).await?;
            let mut overloads: HashMap<String, usize> = HashMap::new();
            for (name, _) in acls {
                *overloads.entry(name).or_default() += 1;
            }
            role_privileges_by_name(&overloads, &held)
        },
        _ => intersect_by_name(acls.into_iter().map(|(name, acl)| {
            let privileges = privileges_for(&parse_acl(&acl), &grantee, object_type);
            (name, privileges)
        })),
    };

    let configured = prior.privileges(object_type).unwrap_or_default();
    let actual = effective_privileges(object_type, &prior.objects, &per_object, &configured);

    let mut state = prior.clone();
    state.database = Some(database.clone());
    state.privileges = reconcile_privileges(object_type, &prior.privileges, &actual);
    state.id = Some(grant_id(
        &grantee,
        &database,
        non_empty(&prior.schema),
        object_type,
        &prior.objects,
    ));
    Ok(Some(state))
}

/// Revoke and re-grant. An empty `privileges` only revokes.
async fn apply(
    client: &Client,
    grant: &GrantState,
    privileges: &BTreeSet<Privilege>,
) -> Result<String, ProviderError> {
    let grantee = grant.grantee()?;
    let object_type = grant.object_type()?;
    let database = grant.database_or(client.default_database()).to_string();
    let schema = grant.schema_name();

    let signatures = if matches!(object_type, ObjectType::Function | ObjectType::Procedure)
        && !grant.objects.is_empty()
    {
        let pool = client.pool(&database).await?;
        routine_signatures(&pool, object_type, schema).await?
    } else {
        HashMap::new()
    };
    let objects = render_objects(object_type, schema, &grant.objects, &signatures)?;
    let target = grant_target(object_type, &database, schema, &objects);
    let statements = grant_statements(&grantee, &target, privileges);

    let _guard = client.grant_lock().await;
    client
        .retry("grant", || client.execute_in_transaction(&database, &statements))
        .await?;
    Ok(database)
}

/// Manages `redshift_grant`.
pub struct GrantResource;

impl GrantResource {
    async fn apply_and_read(&self, client: &Client, planned: Value) -> Result<Value, ProviderError> {
        let mut grant: GrantState = from_state(&planned)?;
        let object_type = grant.object_type()?;
        let privileges = grant.privileges(object_type)?;
        let database = apply(client, &grant, &privileges).await?;
        grant.database = Some(database);
        info!(
            grantee = %grant.grantee()?.name(),
            object_type = %object_type,
            "Applied grant"
        );

        let refreshed = fetch_grant(client, &grant).await?.ok_or_else(|| {
            ProviderError::NotFound(format!("{} target after apply", RESOURCE_TYPE))
        })?;
        to_state(&refreshed)
    }
}

#[async_trait]
impl Resource for GrantResource {
    fn type_name(&self) -> &'static str {
        RESOURCE_TYPE
    }

    fn schema(&self) -> Schema {
        grant_schema()
    }

    fn validate(&self, config: &Value) -> Vec<Diagnostic> {
        validate_grant(config)
    }

    async fn create(&self, client: &Client, planned: Value) -> Result<Value, ProviderError> {
        self.apply_and_read(client, planned).await
    }

    async fn read(&self, client: &Client, state: Value) -> Result<Option<Value>, ProviderError> {
        let prior: GrantState = from_state(&state)?;
        match fetch_grant(client, &prior).await? {
            Some(grant) => Ok(Some(to_state(&grant)?)),
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
        let grant: GrantState = from_state(&state)?;
        apply(client, &grant, &BTreeSet::new()).await?;
        info!(grantee = %grant.grantee()?.name(), object_type = %grant.object_type, "Revoked grant");
        Ok(())
    }

    async fn import(&self, client: &Client, id: &str) -> Result<Option<Value>, ProviderError> {
        let prior = parse_grant_id(id)?;
        match fetch_grant(client, &prior).await? {
            Some(grant) => Ok(Some(to_state(&grant)?)),
            None => Ok(None),
        }
    }
}
