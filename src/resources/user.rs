//! `redshift_user`

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;
use tracing::{debug, info};

use super::{from_state, non_empty, nullable, require_id, to_state, Lookup, Resource};
use crate::acl::{parse_acl, Grantee};
use crate::client::Client;
use crate::error::ProviderError;
use crate::schema::{Attribute, Diagnostic, Schema};
use crate::sql::{qualified, quote_ident, quote_literal};

/// Resource type name.
pub const RESOURCE_TYPE: &str = "redshift_user";

/// Longest session timeout Redshift accepts, in seconds.
pub const MAX_SESSION_TIMEOUT: i64 = 1_728_000;

const SYSLOG_RESTRICTED: &str = "RESTRICTED";
const SYSLOG_UNRESTRICTED: &str = "UNRESTRICTED";

/// Schema of `redshift_user`.
pub fn user_schema() -> Schema {
    Schema::v0()
        .with_description("A Redshift database user.")
        .with_attribute(
            "id",
            Attribute::computed_string().with_description("The user's system id (usesysid)."),
        )
        .with_attribute(
            "name",
            Attribute::required_string().with_description("User name."),
        )
        .with_attribute(
            "password",
            Attribute::optional_string().sensitive().with_description(
                "Clear text password or an md5/sha256 hash. Unset disables password login.",
            ),
        )
        .with_attribute(
            "valid_until",
            Attribute::optional_string()
                .with_default(json!("infinity"))
                .with_description("Absolute time after which the password is no longer valid."),
        )
        .with_attribute(
            "create_database",
            Attribute::optional_bool()
                .with_default(json!(false))
                .with_description("Whether the user can create databases."),
        )
        .with_attribute(
            "superuser",
            Attribute::optional_bool()
                .with_default(json!(false))
                .with_description("Whether the user is a superuser. Requires a password."),
        )
        .with_attribute(
            "connection_limit",
            Attribute::optional_int64()
                .with_default(json!(-1))
                .with_description("Maximum concurrent connections; -1 is unlimited."),
        )
        .with_attribute(
            "syslog_access",
            Attribute::optional_string()
                .with_allowed_values(&[SYSLOG_RESTRICTED, SYSLOG_UNRESTRICTED])
                .with_default(json!(SYSLOG_RESTRICTED))
                .with_description("Access to system tables and views for other users' rows."),
        )
        .with_attribute(
            "session_timeout",
            Attribute::optional_int64()
                .with_default(json!(0))
                .with_description("Idle session timeout in seconds; 0 disables it."),
        )
}

/// State of a `redshift_user`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserState {
    /// usesysid
    pub id: Option<String>,
    /// User name.
    #[serde(deserialize_with = "nullable")]
    pub name: String,
    /// Password or password hash.
    pub password: Option<String>,
    /// Password expiry.
    pub valid_until: Option<String>,
    /// CREATEDB
    pub create_database: Option<bool>,
    /// CREATEUSER
    pub superuser: Option<bool>,
    /// CONNECTION LIMIT, -1 for unlimited.
    pub connection_limit: Option<i64>,
    /// SYSLOG ACCESS
    pub syslog_access: Option<String>,
    /// SESSION TIMEOUT, 0 for none.
    pub session_timeout: Option<i64>,
}

impl UserState {
    fn valid_until(&self) -> &str {
        non_empty(&self.valid_until).unwrap_or("infinity")
    }

    fn create_database(&self) -> bool {
        self.create_database.unwrap_or(false)
    }

    fn superuser(&self) -> bool {
        self.superuser.unwrap_or(false)
    }

    fn connection_limit(&self) -> i64 {
        self.connection_limit.unwrap_or(-1)
    }

    fn syslog_access(&self) -> String {
        non_empty(&self.syslog_access)
            .unwrap_or(SYSLOG_RESTRICTED)
            .to_ascii_uppercase()
    }

    fn session_timeout(&self) -> i64 {
        self.session_timeout.unwrap_or(0)
    }
}

/// Whether `password` is an md5 or sha256 hash rather than clear text.
pub fn is_password_hash(password: &str) -> bool {
    let md5 = password
        .strip_prefix("md5")
        .is_some_and(|hex| hex.len() == 32 && hex.bytes().all(|b| b.is_ascii_hexdigit()));
    md5 || password.starts_with("sha256|")
}

/// Check a clear text password against Redshift's rules.
pub fn validate_password(password: &str) -> Result<(), String> {
    if is_password_hash(password) {
        return Ok(());
    }
    let length = password.chars().count();
    if !(8..=64).contains(&length) {
        return Err("must be between 8 and 64 characters long".to_string());
    }
    if !password.chars().any(|c| c.is_ascii_uppercase())
        || !password.chars().any(|c| c.is_ascii_lowercase())
        || !password.chars().any(|c| c.is_ascii_digit())
    {
        return Err("must contain an uppercase letter, a lowercase letter and a digit".to_string());
    }
    if let Some(c) = password
        .chars()
        .find(|&c| matches!(c, '\'' | '"' | '\\' | '/' | '@') || !c.is_ascii_graphic())
    {
        return Err(format!("must not contain {:?}", c));
    }
    Ok(())
}

fn validate_user(config: &Value) -> Vec<Diagnostic> {
    let Ok(user) = from_state::<UserState>(config) else {
        return Vec::new();
    };
    let mut diagnostics = Vec::new();

    if let Some(password) = non_empty(&user.password) {
        if let Err(reason) = validate_password(password) {
            diagnostics.push(
                Diagnostic::error("Invalid password")
                    .with_detail(format!("The password {}", reason))
                    .with_attribute("password"),
            );
        }
    }
    if user.superuser() && non_empty(&user.password).is_none() {
        diagnostics.push(
            Diagnostic::error("Superusers must have a password")
                .with_attribute("password"),
        );
    }
    if user.superuser() && user.syslog_access() == SYSLOG_UNRESTRICTED {
        diagnostics.push(
            Diagnostic::error("Invalid syslog_access for a superuser")
                .with_detail("Superusers always have unrestricted access; leave syslog_access unset")
                .with_attribute("syslog_access"),
        );
    }
    if user.connection_limit() < -1 {
        diagnostics.push(
            Diagnostic::error("Invalid connection_limit")
                .with_detail("Use -1 for unlimited connections")
                .with_attribute("connection_limit"),
        );
    }
    if !(0..=MAX_SESSION_TIMEOUT).contains(&user.session_timeout()) {
        diagnostics.push(
            Diagnostic::error("Invalid session_timeout")
                .with_detail(format!("Must be between 0 and {} seconds", MAX_SESSION_TIMEOUT))
                .with_attribute("session_timeout"),
        );
    }
    diagnostics
}

fn password_clause(password: Option<&str>) -> String {
    match password {
        Some(password) => format!("PASSWORD {}", quote_literal(password)),
        None => "PASSWORD DISABLE".to_string(),
    }
}

fn connection_limit_clause(limit: i64) -> String {
    if limit < 0 {
        "CONNECTION LIMIT UNLIMITED".to_string()
    } else {
        format!("CONNECTION LIMIT {}", limit)
    }
}

/// `CREATE USER` for `user`.
pub fn create_statement(user: &UserState) -> String {
    let mut sql = format!(
        "CREATE USER {} {} VALID UNTIL {}",
        quote_ident(&user.name),
        password_clause(non_empty(&user.password)),
        quote_literal(user.valid_until()),
    );
    sql.push_str(if user.create_database() { " CREATEDB" } else { " NOCREATEDB" });
    sql.push_str(if user.superuser() { " CREATEUSER" } else { " NOCREATEUSER" });
    sql.push(' ');
    sql.push_str(&connection_limit_clause(user.connection_limit()));
    if !user.superuser() {
        sql.push_str(&format!(" SYSLOG ACCESS {}", user.syslog_access()));
    }
    if user.session_timeout() > 0 {
        sql.push_str(&format!(" SESSION TIMEOUT {}", user.session_timeout()));
    }
    sql
}

/// `ALTER USER` statements that turn `prior` into `planned`.
pub fn update_statements(prior: &UserState, planned: &UserState) -> Vec<String> {
    let mut statements = Vec::new();
    let name = quote_ident(&planned.name);
    let alter = |clause: String| format!("ALTER USER {} {}", name, clause);

    let renamed = prior.name != planned.name;
    if renamed {
        statements.push(format!(
            "ALTER USER {} RENAME TO {}",
            quote_ident(&prior.name),
            name
        ));
    }
    // Renaming clears an MD5 password, so it is always set again.
    if renamed || non_empty(&prior.password) != non_empty(&planned.password) {
        statements.push(alter(password_clause(non_empty(&planned.password))));
    }
    if prior.create_database() != planned.create_database() {
        let flag = if planned.create_database() { "CREATEDB" } else { "NOCREATEDB" };
        statements.push(alter(flag.to_string()));
    }
    if prior.superuser() != planned.superuser() {
        let flag = if planned.superuser() { "CREATEUSER" } else { "NOCREATEUSER" };
        statements.push(alter(flag.to_string()));
    }
    if prior.connection_limit() != planned.connection_limit() {
        statements.push(alter(connection_limit_clause(planned.connection_limit())));
    }
    if !planned.superuser()
        && (prior.syslog_access() != planned.syslog_access() || prior.superuser())
    {
        statements.push(alter(format!("SYSLOG ACCESS {}", planned.syslog_access())));
    }
    if prior.valid_until() != planned.valid_until() {
        statements.push(alter(format!(
            "VALID UNTIL {}",
            quote_literal(planned.valid_until())
        )));
    }
    if prior.session_timeout() != planned.session_timeout() {
        if planned.session_timeout() > 0 {
            statements.push(alter(format!("SESSION TIMEOUT {}", planned.session_timeout())));
        } else {
            statements.push(alter("RESET SESSION TIMEOUT".to_string()));
        }
    }
    statements
}

/// Parse `useconnlimit`, which is `UNLIMITED` or a number.
fn parse_connection_limit(raw: &str) -> i64 {
    raw.trim().parse().unwrap_or(-1)
}

/// Keep the configured spelling of `valid_until` when the catalog reports the
/// same instant in its own format.
fn reconcile_valid_until(configured: Option<&str>, actual: &str) -> String {
    let actual = actual.trim();
    if actual.is_empty() || actual.eq_ignore_ascii_case("infinity") {
        return "infinity".to_string();
    }
    match configured {
        Some(configured) if actual.starts_with(configured.trim()) => configured.to_string(),
        _ => actual.to_string(),
    }
}

const SELECT_USER: &str = "SELECT usesysid::varchar AS id, usename::varchar AS name, \
    usecreatedb, usesuper, \
    COALESCE(syslogaccess, 'RESTRICTED')::varchar AS syslog_access, \
    COALESCE(useconnlimit::varchar, 'UNLIMITED')::varchar AS connection_limit, \
    COALESCE(sessiontimeout, 0)::int AS session_timeout, \
    COALESCE(valuntil::varchar, 'infinity')::varchar AS valid_until \
    FROM pg_user_info";

fn user_from_row(row: &PgRow, prior: &UserState) -> Result<UserState, sqlx::Error> {
    let valid_until: String = row.try_get("valid_until")?;
    let superuser: bool = row.try_get("usesuper")?;
    let syslog_access: String = row.try_get("syslog_access")?;
    let connection_limit: String = row.try_get("connection_limit")?;
    let session_timeout: i32 = row.try_get("session_timeout")?;
    Ok(UserState {
        id: Some(row.try_get("id")?),
        name: row.try_get("name")?,
        password: prior.password.clone(),
        valid_until: Some(reconcile_valid_until(non_empty(&prior.valid_until), &valid_until)),
        create_database: Some(row.try_get("usecreatedb")?),
        superuser: Some(superuser),
        connection_limit: Some(parse_connection_limit(&connection_limit)),
        // Superusers read back as unrestricted; keep the configured value.
        syslog_access: Some(if superuser {
            prior.syslog_access()
        } else {
            syslog_access.to_ascii_uppercase()
        }),
        session_timeout: Some(i64::from(session_timeout)),
    })
}

/// Look up a user, carrying over what the catalog cannot report.
pub(crate) async fn fetch_user(
    pool: &PgPool,
    lookup: Lookup<'_>,
    prior: &UserState,
) -> Result<Option<UserState>, ProviderError> {
    let sql = match lookup {
        Lookup::Id(_) => format!("{} WHERE usesysid::varchar = $1", SELECT_USER),
        Lookup::Name(_) => format!("{} WHERE usename = $1", SELECT_USER),
    };
    let row = sqlx::query(&sql)
        .bind(lookup.value())
        .fetch_optional(pool)
        .await?;
    match row {
        Some(row) => Ok(Some(user_from_row(&row, prior)?)),
        None => Ok(None),
    }
}

/// Objects in one database that must be released before a user can be dropped.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UserFootprint {
    /// Every user schema in the database, with whether the user owns it.
    pub schemas: Vec<(String, bool)>,
    /// Tables, views and materialized views the user owns, as (schema, name).
    pub owned_relations: Vec<(String, String)>,
    /// Functions and procedures the user owns.
    pub owned_routines: Vec<OwnedRoutine>,
    /// Default ACLs the user owns, as (schema, defaclobjtype, acl).
    pub default_acls: Vec<(Option<String>, String, String)>,
}

/// A function or procedure, identified by its argument types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedRoutine {
    /// Schema the routine lives in.
    pub schema: String,
    /// Routine name.
    pub name: String,
    /// Argument types as `oidvectortypes` prints them.
    pub arguments: String,
    /// Stored procedure rather than a function.
    pub procedure: bool,
}

impl OwnedRoutine {
    fn alter_owner(&self, owner_sql: &str) -> String {
        format!(
            "ALTER {} {}({}) OWNER TO {}",
            if self.procedure { "PROCEDURE" } else { "FUNCTION" },
            qualified(&self.schema, &self.name),
            self.arguments,
            owner_sql
        )
    }
}

/// Statements that revoke everything `user` holds in `database` and hand its
/// objects to `new_owner`.
pub fn release_statements(
    footprint: &UserFootprint,
    database: &str,
    user: &str,
    new_owner: &str,
) -> Vec<String> {
    let user_sql = quote_ident(user);
    let owner_sql = quote_ident(new_owner);
    let mut statements = Vec::new();

    for (schema, _) in footprint.schemas.iter().filter(|(_, owned)| *owned) {
        statements.push(format!(
            "ALTER SCHEMA {} OWNER TO {}",
            quote_ident(schema),
            owner_sql
        ));
    }
    for (schema, relation) in &footprint.owned_relations {
        statements.push(format!(
            "ALTER TABLE {} OWNER TO {}",
            qualified(schema, relation),
            owner_sql
        ));
    }
    for routine in &footprint.owned_routines {
        statements.push(routine.alter_owner(&owner_sql));
    }
    for (schema, _) in &footprint.schemas {
        let schema = quote_ident(schema);
        statements.push(format!("REVOKE ALL ON SCHEMA {} FROM {}", schema, user_sql));
        for kind in ["TABLES", "FUNCTIONS", "PROCEDURES"] {
            statements.push(format!(
                "REVOKE ALL ON ALL {} IN SCHEMA {} FROM {}",
                kind, schema, user_sql
            ));
        }
    }
    statements.push(format!(
        "REVOKE ALL ON DATABASE {} FROM {}",
        quote_ident(database),
        user_sql
    ));

    for (schema, objtype, acl) in &footprint.default_acls {
        let kind = match objtype.as_str() {
            "r" => "TABLES",
            "f" => "FUNCTIONS",
            "p" => "PROCEDURES",
            _ => continue,
        };
        let scope = match schema {
            Some(schema) => format!(" IN SCHEMA {}", quote_ident(schema)),
            None => String::new(),
        };
        let grantees: BTreeSet<String> = parse_acl(acl)
            .into_iter()
            .map(|item| match item.grantee {
                Grantee::User(name) if name == user => user_sql.clone(),
                other => other.to_sql(),
            })
            .collect();
        for grantee in grantees {
            statements.push(format!(
                "ALTER DEFAULT PRIVILEGES FOR USER {}{} REVOKE ALL ON {} FROM {}",
                user_sql, scope, kind, grantee
            ));
        }
    }
    statements
}

async fn fetch_footprint(pool: &PgPool, user_id: &str) -> Result<UserFootprint, ProviderError> {
    let schemas: Vec<(String, bool)> = sqlx::query_as(
        "SELECT nspname::varchar, nspowner::varchar = $1 \
         FROM pg_namespace \
         WHERE nspname NOT LIKE 'pg_%' AND nspname <> 'information_schema' \
           AND oid NOT IN (SELECT esoid FROM pg_external_schema) \
         ORDER BY nspname",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    let owned_relations: Vec<(String, String)> = sqlx::query_as(
        "SELECT n.nspname::varchar, c.relname::varchar \
         FROM pg_class c JOIN pg_namespace n ON n.oid = c.relnamespace \
         WHERE c.relowner::varchar = $1 AND c.relkind IN ('r', 'v', 'm') \
         ORDER BY 1, 2",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    let owned_routines = sqlx::query_as::<_, (String, String, String, String)>(
        "SELECT n.nspname::varchar, p.proname::varchar, \
                oidvectortypes(p.proargtypes)::varchar, p.prokind::varchar \
         FROM pg_proc_info p JOIN pg_namespace n ON n.oid = p.pronamespace \
         WHERE p.proowner::varchar = $1 AND n.nspname NOT LIKE 'pg_%' \
           AND n.nspname <> 'information_schema' \
         ORDER BY 1, 2, 3",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?
    .into_iter()
    .map(|(schema, name, arguments, kind)| OwnedRoutine {
        schema,
        name,
        arguments,
        procedure: kind == "p",
    })
    .collect();

    let default_acls: Vec<(Option<String>, String, String)> = sqlx::query_as(
        "SELECT n.nspname::varchar, d.defaclobjtype::varchar, \
                COALESCE(array_to_string(d.defaclacl, '|'), '')::varchar \
         FROM pg_default_acl d LEFT JOIN pg_namespace n ON n.oid = d.defaclnamespace \
         WHERE d.defacluser::varchar = $1",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(UserFootprint {
        schemas,
        owned_relations,
        owned_routines,
        default_acls,
    })
}

async fn release_in_database(
    client: &Client,
    database: &str,
    user: &UserState,
    new_owner: &str,
) -> Result<(), ProviderError> {
    let pool = client.pool(database).await?;
    let Some(found) = fetch_user(&pool, Lookup::Name(&user.name), user).await? else {
        return Ok(());
    };
    let user_id = require_id(&found.id, RESOURCE_TYPE)?;
    let footprint = fetch_footprint(&pool, &user_id).await?;
    let statements = release_statements(&footprint, database, &user.name, new_owner);
    debug!(database, user = %user.name, statements = statements.len(), "Releasing user objects");
    client.execute_in_transaction(database, &statements).await
}

/// Manages `redshift_user`.
pub struct UserResource;

#[async_trait]
impl Resource for UserResource {
    fn type_name(&self) -> &'static str {
        RESOURCE_TYPE
    }

    fn schema(&self) -> Schema {
        user_schema()
    }

    fn validate(&self, config: &Value) -> Vec<Diagnostic> {
        validate_user(config)
    }

    async fn create(&self, client: &Client, planned: Value) -> Result<Value, ProviderError> {
        let user: UserState = from_state(&planned)?;
        let statement = create_statement(&user);
        let database = client.default_database();
        client
            .retry("create user", || {
                client.execute_in_transaction(database, std::slice::from_ref(&statement))
            })
            .await?;
        info!(user = %user.name, "Created user");

        let pool = client.default_pool().await?;
        let created = fetch_user(&pool, Lookup::Name(&user.name), &user)
            .await?
            .ok_or_else(|| ProviderError::NotFound(format!("user {} after create", user.name)))?;
        to_state(&created)
    }

    async fn read(&self, client: &Client, state: Value) -> Result<Option<Value>, ProviderError> {
        let prior: UserState = from_state(&state)?;
        let id = require_id(&prior.id, RESOURCE_TYPE)?;
        let pool = client.default_pool().await?;
        match fetch_user(&pool, Lookup::Id(&id), &prior).await? {
            Some(user) => Ok(Some(to_state(&user)?)),
            None => Ok(None),
        }
    }

    async fn update(
        &self,
        client: &Client,
        prior: Value,
        planned: Value,
    ) -> Result<Value, ProviderError> {
        let prior: UserState = from_state(&prior)?;
        let mut planned: UserState = from_state(&planned)?;
        planned.id = prior.id.clone();
        let id = require_id(&planned.id, RESOURCE_TYPE)?;

        let statements = update_statements(&prior, &planned);
        let database = client.default_database();
        client
            .retry("update user", || client.execute_in_transaction(database, &statements))
            .await?;
        info!(user = %planned.name, statements = statements.len(), "Updated user");

        let pool = client.default_pool().await?;
        let updated = fetch_user(&pool, Lookup::Id(&id), &planned)
            .await?
            .ok_or_else(|| ProviderError::NotFound(format!("user {} after update", planned.name)))?;
        to_state(&updated)
    }

    async fn delete(&self, client: &Client, state: Value) -> Result<(), ProviderError> {
        let user: UserState = from_state(&state)?;
        let _guard = client.grant_lock().await;
        let new_owner = client.current_user().await?;

        for database in client.databases().await? {
            client
                .retry("release user objects", || {
                    Box::pin(release_in_database(client, &database, &user, &new_owner))
                })
                .await?;
        }

        let statement = format!("DROP USER {}", quote_ident(&user.name));
        let database = client.default_database();
        client
            .retry("drop user", || {
                client.execute_in_transaction(database, std::slice::from_ref(&statement))
            })
            .await?;
        info!(user = %user.name, "Dropped user");
        Ok(())
    }

    async fn import(&self, client: &Client, id: &str) -> Result<Option<Value>, ProviderError> {
        let pool = client.default_pool().await?;
        let defaults = UserState::default();
        match fetch_user(&pool, Lookup::from_import(id), &defaults).await? {
            Some(user) => Ok(Some(to_state(&user)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> UserState {
        UserState {
            id: Some("100".into()),
            name: "alice".into(),
            password: Some("Secret123".into()),
            valid_until: Some("infinity".into()),
            create_database: Some(false),
            superuser: Some(false),
            connection_limit: Some(-1),
            syslog_access: Some("RESTRICTED".into()),
            session_timeout: Some(0),
        }
    }

    #[test]
    fn test_create_statement() {
        assert_eq!(
            create_statement(&alice()),
            "CREATE USER \"alice\" PASSWORD 'Secret123' VALID UNTIL 'infinity' \
             NOCREATEDB NOCREATEUSER CONNECTION LIMIT UNLIMITED SYSLOG ACCESS RESTRICTED"
        );

        let mut admin = alice();
        admin.superuser = Some(true);
        admin.connection_limit = Some(5);
        admin.session_timeout = Some(300);
        let sql = create_statement(&admin);
        assert!(sql.contains(" CREATEUSER CONNECTION LIMIT 5 SESSION TIMEOUT 300"));
        assert!(!sql.contains("SYSLOG"));
    }

    #[test]
    fn test_create_statement_without_password() {
        let mut user = alice();
        user.password = None;
        assert!(create_statement(&user).contains("PASSWORD DISABLE"));
    }

    #[test]
    fn test_update_statements_noop() {
        assert!(update_statements(&alice(), &alice()).is_empty());
    }

    #[test]
    fn test_update_statements_rename_resets_password() {
        let mut planned = alice();
        planned.name = "alicia".into();
        assert_eq!(
            update_statements(&alice(), &planned),
            vec![
                "ALTER USER \"alice\" RENAME TO \"alicia\"".to_string(),
                "ALTER USER \"alicia\" PASSWORD 'Secret123'".to_string(),
            ]
        );
    }

    #[test]
    fn test_update_statements_flags() {
        let mut planned = alice();
        planned.create_database = Some(true);
        planned.connection_limit = Some(10);
        planned.syslog_access = Some("UNRESTRICTED".into());
        planned.session_timeout = Some(60);
        assert_eq!(
            update_statements(&alice(), &planned),
            vec![
                "ALTER USER \"alice\" CREATEDB",
                "ALTER USER \"alice\" CONNECTION LIMIT 10",
                "ALTER USER \"alice\" SYSLOG ACCESS UNRESTRICTED",
                "ALTER USER \"alice\" SESSION TIMEOUT 60",
            ]
        );

        let statements = update_statements(&planned, &alice());
        assert!(statements.contains(&"ALTER USER \"alice\" RESET SESSION TIMEOUT".to_string()));
        assert!(statements.contains(&"ALTER USER \"alice\" CONNECTION LIMIT UNLIMITED".to_string()));
    }

    #[test]
    fn test_update_statements_password_removed() {
        let mut planned = alice();
        planned.password = None;
        assert_eq!(
            update_statements(&alice(), &planned),
            vec!["ALTER USER \"alice\" PASSWORD DISABLE"]
        );
    }

    #[test]
    fn test_password_rules() {
        assert!(validate_password("Secret123").is_ok());
        assert!(validate_password("md5d41d8cd98f00b204e9800998ecf8427e").is_ok());
        assert!(validate_password("sha256|Mypassword1|salt").is_ok());
        assert!(validate_password("short1A").is_err());
        assert!(validate_password("alllowercase1").is_err());
        assert!(validate_password("Has space 1").is_err());
        assert!(validate_password("Quote'd123").is_err());
    }

    #[test]
    fn test_validate_user() {
        let diagnostics = validate_user(&json!({"name": "root", "superuser": true}));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute.as_deref(), Some("password"));

        let diagnostics = validate_user(&json!({
            "name": "root",
            "password": "Secret123",
            "superuser": true,
            "syslog_access": "UNRESTRICTED",
            "session_timeout": MAX_SESSION_TIMEOUT + 1,
            "connection_limit": -2,
        }));
        let attrs: Vec<_> = diagnostics.iter().filter_map(|d| d.attribute.as_deref()).collect();
        assert_eq!(attrs, vec!["syslog_access", "connection_limit", "session_timeout"]);

        assert!(validate_user(&json!({"name": "bob"})).is_empty());
    }

    #[test]
    fn test_reconcile_valid_until() {
        assert_eq!(reconcile_valid_until(Some("2030-01-01"), "2030-01-01 00:00:00+00"), "2030-01-01");
        assert_eq!(reconcile_valid_until(Some("2030-01-01"), "2031-01-01 00:00:00+00"), "2031-01-01 00:00:00+00");
        assert_eq!(reconcile_valid_until(None, "infinity"), "infinity");
        assert_eq!(reconcile_valid_until(Some("2030-01-01"), ""), "infinity");
    }

    #[test]
    fn test_parse_connection_limit() {
        assert_eq!(parse_connection_limit("UNLIMITED"), -1);
        assert_eq!(parse_connection_limit("25"), 25);
    }

    #[test]
    fn test_release_statements() {
        let footprint = UserFootprint {
            schemas: vec![("public".into(), false), ("alice_data".into(), true)],
            owned_relations: vec![
                ("public".into(), "events".into()),
                ("public".into(), "daily_events_mv".into()),
            ],
            owned_routines: vec![
                OwnedRoutine {
                    schema: "alice_data".into(),
                    name: "f_score".into(),
                    arguments: "integer, character varying".into(),
                    procedure: false,
                },
                OwnedRoutine {
                    schema: "public".into(),
                    name: "sp_refresh".into(),
                    arguments: String::new(),
                    procedure: true,
                },
            ],
            default_acls: vec![(None, "r".into(), "bob=r/alice|group bi=r/alice".into())],
        };
        let statements = release_statements(&footprint, "dev", "alice", "admin");
        assert_eq!(statements[0], "ALTER SCHEMA \"alice_data\" OWNER TO \"admin\"");
        assert_eq!(statements[1], "ALTER TABLE \"public\".\"events\" OWNER TO \"admin\"");
        assert_eq!(
            statements[2],
            "ALTER TABLE \"public\".\"daily_events_mv\" OWNER TO \"admin\""
        );
        assert_eq!(
            statements[3],
            "ALTER FUNCTION \"alice_data\".\"f_score\"(integer, character varying) OWNER TO \"admin\""
        );
        assert_eq!(
            statements[4],
            "ALTER PROCEDURE \"public\".\"sp_refresh\"() OWNER TO \"admin\""
        );
        let first_revoke = statements.iter().position(|s| s.starts_with("REVOKE")).unwrap();
        assert_eq!(first_revoke, 5);
        assert!(statements.contains(&"REVOKE ALL ON ALL TABLES IN SCHEMA \"public\" FROM \"alice\"".to_string()));
        assert!(statements.contains(&"REVOKE ALL ON DATABASE \"dev\" FROM \"alice\"".to_string()));
        assert!(statements.contains(
            &"ALTER DEFAULT PRIVILEGES FOR USER \"alice\" REVOKE ALL ON TABLES FROM GROUP \"bi\"".to_string()
        ));
        assert!(statements.contains(
            &"ALTER DEFAULT PRIVILEGES FOR USER \"alice\" REVOKE ALL ON TABLES FROM \"bob\"".to_string()
        ));
    }

    #[test]
    fn test_schema_defaults() {
        let schema = user_schema();
        assert_eq!(schema.attribute("connection_limit").unwrap().default, Some(json!(-1)));
        assert!(schema.attribute("password").unwrap().flags.sensitive);
    }
}
