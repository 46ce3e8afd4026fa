//! `redshift_database`
//!
//! `CREATE DATABASE`, `ALTER DATABASE` and `DROP DATABASE` cannot run inside a
//! transaction block, so every statement here goes through
//! [`Client::execute`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::postgres::PgPool;
use sqlx::Row;
use tracing::info;

use super::{from_state, non_empty, nullable, require_id, single_block, to_state, Lookup, Resource};
use crate::client::Client;
use crate::error::ProviderError;
use crate::schema::{Attribute, Block, Diagnostic, NestedBlock, Schema};
use crate::sql::{quote_ident, quote_literal};

/// Resource type name.
pub const RESOURCE_TYPE: &str = "redshift_database";

/// Schema of `redshift_database`.
pub fn database_schema() -> Schema {
    Schema::v0()
        .with_description("A Redshift database, local or created from a datashare.")
        .with_attribute(
            "id",
            Attribute::computed_string().with_description("The database oid."),
        )
        .with_attribute("name", Attribute::required_string().with_description("Database name."))
        .with_attribute(
            "owner",
            Attribute::optional_computed_string().with_description("Owning user."),
        )
        .with_attribute(
            "connection_limit",
            Attribute::optional_int64()
                .with_default(json!(-1))
                .with_description("Maximum concurrent connections; -1 is unlimited."),
        )
        .with_block(
            "datashare_source",
            NestedBlock::single(
                Block::new()
                    .with_description("Create the database from a datashare.")
                    .with_attribute(
                        "share_name",
                        Attribute::required_string().with_description("Name of the datashare."),
                    )
                    .with_attribute(
                        "account_id",
                        Attribute::optional_string()
                            .with_description("Producer AWS account; omit for the same account."),
                    )
                    .with_attribute(
                        "namespace",
                        Attribute::required_string()
                            .with_description("Producer cluster namespace GUID."),
                    ),
            )
            .with_force_new(),
        )
}

/// Where a shared database comes from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatashareSource {
    /// Datashare name.
    #[serde(deserialize_with = "nullable")]
    pub share_name: String,
    /// Producer account.
    pub account_id: Option<String>,
    /// Producer namespace.
    #[serde(deserialize_with = "nullable")]
    pub namespace: String,
}

/// State of a `redshift_database`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseState {
    /// Database oid.
    pub id: Option<String>,
    /// Database name.
    #[serde(deserialize_with = "nullable")]
    pub name: String,
    /// Owning user.
    pub owner: Option<String>,
    /// CONNECTION LIMIT, -1 for unlimited.
    pub connection_limit: Option<i64>,
    /// Source datashare for consumer databases.
    #[serde(deserialize_with = "single_block")]
    pub datashare_source: Option<DatashareSource>,
}

impl DatabaseState {
    fn connection_limit(&self) -> i64 {
        self.connection_limit.unwrap_or(-1)
    }
}

fn validate_database(config: &Value) -> Vec<Diagnostic> {
    let Ok(database) = from_state::<DatabaseState>(config) else {
        return Vec::new();
    };
    let mut diagnostics = Vec::new();
    if database.connection_limit() < -1 {
        diagnostics.push(
            Diagnostic::error("Invalid connection_limit")
                .with_detail("Use -1 for unlimited connections")
                .with_attribute("connection_limit"),
        );
    }
    if let Some(source) = &database.datashare_source {
        if let Some(account) = non_empty(&source.account_id) {
            if !super::datashare_privilege::is_account_id(account) {
                diagnostics.push(
                    Diagnostic::error("Invalid account_id")
                        .with_detail("AWS account ids are 12 digits")
                        .with_attribute("datashare_source.account_id"),
                );
            }
        }
        if database.connection_limit() != -1 {
            diagnostics.push(
                Diagnostic::warning("connection_limit is ignored for datashare databases")
                    .with_attribute("connection_limit"),
            );
        }
    }
    diagnostics
}

fn connection_limit_clause(limit: i64) -> String {
    if limit < 0 {
        "CONNECTION LIMIT UNLIMITED".to_string()
    } else {
        format!("CONNECTION LIMIT {}", limit)
    }
}

/// Statements that create `database`, in order.
pub fn create_statements(database: &DatabaseState) -> Vec<String> {
    let name = quote_ident(&database.name);
    match &database.datashare_source {
        Some(source) => {
            let mut producer = String::new();
            if let Some(account) = non_empty(&source.account_id) {
                producer.push_str(&format!("ACCOUNT {} ", quote_literal(account)));
            }
            producer.push_str(&format!("NAMESPACE {}", quote_literal(&source.namespace)));
            let mut statements = vec![format!(
                "CREATE DATABASE {} FROM DATASHARE {} OF {}",
                name,
                quote_ident(&source.share_name),
                producer
            )];
            if let Some(owner) = non_empty(&database.owner) {
                statements.push(format!("ALTER DATABASE {} OWNER TO {}", name, quote_ident(owner)));
            }
            statements
        },
        None => {
            let mut sql = format!("CREATE DATABASE {}", name);
            if let Some(owner) = non_empty(&database.owner) {
                sql.push_str(&format!(" OWNER {}", quote_ident(owner)));
            }
            sql.push(' ');
            sql.push_str(&connection_limit_clause(database.connection_limit()));
            vec![sql]
        },
    }
}

/// `ALTER DATABASE` statements that turn `prior` into `planned`.
pub fn update_statements(prior: &DatabaseState, planned: &DatabaseState) -> Vec<String> {
    let mut statements = Vec::new();
    let name = quote_ident(&planned.name);
    if prior.name != planned.name {
        statements.push(format!(
            "ALTER DATABASE {} RENAME TO {}",
            quote_ident(&prior.name),
            name
        ));
    }
    if let Some(owner) = non_empty(&planned.owner) {
        if non_empty(&prior.owner) != Some(owner) {
            statements.push(format!("ALTER DATABASE {} OWNER TO {}", name, quote_ident(owner)));
        }
    }
    if planned.datashare_source.is_none() && prior.connection_limit() != planned.connection_limit() {
        statements.push(format!(
            "ALTER DATABASE {} {}",
            name,
            connection_limit_clause(planned.connection_limit())
        ));
    }
    statements
}

/// Look up a database. `prior` supplies what the catalog cannot report.
pub(crate) async fn fetch_database(
    pool: &PgPool,
    lookup: Lookup<'_>,
    prior: &DatabaseState,
) -> Result<Option<DatabaseState>, ProviderError> {
    let filter = match lookup {
        Lookup::Id(_) => "d.datid::varchar = $1",
        Lookup::Name(_) => "d.datname = $1",
    };
    let sql = format!(
        "SELECT d.datid::varchar AS id, d.datname::varchar AS name, \
                COALESCE(u.usename, '')::varchar AS owner, \
                COALESCE(d.datconnlimit::varchar, 'UNLIMITED')::varchar AS connection_limit \
         FROM pg_database_info d LEFT JOIN pg_user_info u ON u.usesysid = d.datdba \
         WHERE {}",
        filter
    );
    let Some(row) = sqlx::query(&sql)
        .bind(lookup.value())
        .fetch_optional(pool)
        .await?
    else {
        return Ok(None);
    };

    let name: String = row.try_get("name")?;
    let owner: String = row.try_get("owner")?;
    let connection_limit: String = row.try_get("connection_limit")?;

    let source = sqlx::query_as::<_, (String, String, String)>(
        "SELECT share_name::varchar, COALESCE(producer_account, '')::varchar, \
                COALESCE(producer_namespace, '')::varchar \
         FROM svv_datashares WHERE share_type = 'INBOUND' AND consumer_database = $1",
    )
    .bind(&name)
    .fetch_optional(pool)
    .await?
    .map(|(share_name, account, namespace)| DatashareSource {
        share_name,
        // Same-account shares are created without ACCOUNT; keep that shape.
        account_id: prior
            .datashare_source
            .as_ref()
            .and_then(|s| non_empty(&s.account_id))
            .map(|_| account),
        namespace,
    });

    Ok(Some(DatabaseState {
        id: Some(row.try_get("id")?),
        name,
        owner: Some(owner).filter(|o| !o.is_empty()),
        connection_limit: Some(connection_limit.trim().parse().unwrap_or(-1)),
        datashare_source: source,
    }))
}

/// Manages `redshift_database`.
pub struct DatabaseResource;

#[async_trait]
impl Resource for DatabaseResource {
    fn type_name(&self) -> &'static str {
        RESOURCE_TYPE
    }

    fn schema(&self) -> Schema {
        database_schema()
    }

    fn validate(&self, config: &Value) -> Vec<Diagnostic> {
        validate_database(config)
    }

    async fn create(&self, client: &Client, planned: Value) -> Result<Value, ProviderError> {
        let database: DatabaseState = from_state(&planned)?;
        let default_database = client.default_database();
        for statement in create_statements(&database) {
            client
                .retry("create database", || client.execute(default_database, &statement))
                .await?;
        }
        info!(database = %database.name, "Created database");

        let pool = client.default_pool().await?;
        let created = fetch_database(&pool, Lookup::Name(&database.name), &database)
            .await?
            .ok_or_else(|| {
                ProviderError::NotFound(format!("database {} after create", database.name))
            })?;
        to_state(&created)
    }

    async fn read(&self, client: &Client, state: Value) -> Result<Option<Value>, ProviderError> {
        let prior: DatabaseState = from_state(&state)?;
        let id = require_id(&prior.id, RESOURCE_TYPE)?;
        let pool = client.default_pool().await?;
        match fetch_database(&pool, Lookup::Id(&id), &prior).await? {
            Some(database) => Ok(Some(to_state(&database)?)),
            None => Ok(None),
        }
    }

    async fn update(
        &self,
        client: &Client,
        prior: Value,
        planned: Value,
    ) -> Result<Value, ProviderError> {
        let prior: DatabaseState = from_state(&prior)?;
        let planned: DatabaseState = from_state(&planned)?;
        let id = require_id(&prior.id, RESOURCE_TYPE)?;

        if prior.name != planned.name {
            client.close_pool(&prior.name).await;
        }
        let default_database = client.default_database();
        for statement in update_statements(&prior, &planned) {
            client
                .retry("alter database", || client.execute(default_database, &statement))
                .await?;
        }
        info!(database = %planned.name, "Updated database");

        let pool = client.default_pool().await?;
        let updated = fetch_database(&pool, Lookup::Id(&id), &planned)
            .await?
            .ok_or_else(|| {
                ProviderError::NotFound(format!("database {} after update", planned.name))
            })?;
        to_state(&updated)
    }

    async fn delete(&self, client: &Client, state: Value) -> Result<(), ProviderError> {
        let database: DatabaseState = from_state(&state)?;
        client.close_pool(&database.name).await;
        let statement = format!("DROP DATABASE {}", quote_ident(&database.name));
        let default_database = client.default_database();
        client
            .retry("drop database", || client.execute(default_database, &statement))
            .await?;
        info!(database = %database.name, "Dropped database");
        Ok(())
    }

    async fn import(&self, client: &Client, id: &str) -> Result<Option<Value>, ProviderError> {
        let pool = client.default_pool().await?;
        match fetch_database(&pool, Lookup::from_import(id), &DatabaseState::default()).await? {
            Some(database) => Ok(Some(to_state(&database)?)),
            None => Ok(None),
        }
    }
}
