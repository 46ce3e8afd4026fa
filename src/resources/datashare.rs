//! `redshift_datashare`
//!
//! An outbound datashare on the producer cluster and the schemas it exposes.
//! Each listed schema is shared together with all of its tables.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::postgres::PgPool;
use sqlx::Row;
use tracing::info;

use super::{from_state, non_empty, nullable, require_id, to_state, Lookup, Resource};
use crate::client::Client;
use crate::error::ProviderError;
use crate::schema::{Attribute, Schema};
use crate::sql::quote_ident;

/// Resource type name.
pub const RESOURCE_TYPE: &str = "redshift_datashare";

/// Schema of `redshift_datashare`.
pub fn datashare_schema() -> Schema {
    Schema::v0()
        .with_description("An outbound datashare.")
        .with_attribute(
            "id",
            Attribute::computed_string().with_description("The share id."),
        )
        .with_attribute(
            "name",
            Attribute::required_string()
                .with_force_new()
                .with_description("Datashare name."),
        )
        .with_attribute(
            "owner",
            Attribute::optional_computed_string().with_description("Owning user."),
        )
        .with_attribute(
            "publicly_accessible",
            Attribute::optional_bool()
                .with_default(Value::Bool(false))
                .with_description("Allow consumers with publicly accessible clusters."),
        )
        .with_attribute("producer_account", Attribute::computed_string())
        .with_attribute("producer_namespace", Attribute::computed_string())
        .with_attribute(
            "created",
            Attribute::computed_string().with_description("Creation timestamp."),
        )
        .with_attribute(
            "schemas",
            Attribute::optional_string_set()
                .with_description("Schemas shared with all their tables."),
        )
}

/// State of a `redshift_datashare`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatashareState {
    /// share_id
    pub id: Option<String>,
    /// Datashare name.
    #[serde(deserialize_with = "nullable")]
    pub name: String,
    /// Owning user.
    pub owner: Option<String>,
    /// SET PUBLICACCESSIBLE
    pub publicly_accessible: Option<bool>,
    /// Producer AWS account.
    pub producer_account: Option<String>,
    /// Producer namespace.
    pub producer_namespace: Option<String>,
    /// Creation timestamp.
    pub created: Option<String>,
    /// Shared schemas.
    #[serde(deserialize_with = "nullable")]
    pub schemas: BTreeSet<String>,
}

impl DatashareState {
    fn publicly_accessible(&self) -> bool {
        self.publicly_accessible.unwrap_or(false)
    }
}

fn add_schema_statements(share: &str, schema: &str) -> [String; 2] {
    [
        format!("ALTER DATASHARE {} ADD SCHEMA {}", share, quote_ident(schema)),
        format!(
            "ALTER DATASHARE {} ADD ALL TABLES IN SCHEMA {}",
            share,
            quote_ident(schema)
        ),
    ]
}

fn remove_schema_statements(share: &str, schema: &str) -> [String; 2] {
    [
        format!(
            "ALTER DATASHARE {} REMOVE ALL TABLES IN SCHEMA {}",
            share,
            quote_ident(schema)
        ),
        format!("ALTER DATASHARE {} REMOVE SCHEMA {}", share, quote_ident(schema)),
    ]
}

/// Statements that create `share`, in order.
pub fn create_statements(share: &DatashareState) -> Vec<String> {
    let name = quote_ident(&share.name);
    let mut create = format!("CREATE DATASHARE {}", name);
    if share.publicly_accessible() {
        create.push_str(" SET PUBLICACCESSIBLE TRUE");
    }
    let mut statements = vec![create];
    if let Some(owner) = non_empty(&share.owner) {
        statements.push(format!("ALTER DATASHARE {} OWNER TO {}", name, quote_ident(owner)));
    }
    for schema in &share.schemas {
        statements.extend(add_schema_statements(&name, schema));
    }
    statements
}

/// Statements that turn `prior` into `planned`. Removed schemas go first.
pub fn update_statements(prior: &DatashareState, planned: &DatashareState) -> Vec<String> {
    let name = quote_ident(&planned.name);
    let mut statements = Vec::new();
    if let Some(owner) = non_empty(&planned.owner) {
        if non_empty(&prior.owner) != Some(owner) {
            statements.push(format!("ALTER DATASHARE {} OWNER TO {}", name, quote_ident(owner)));
        }
    }
    if prior.publicly_accessible() != planned.publicly_accessible() {
        statements.push(format!(
            "ALTER DATASHARE {} SET PUBLICACCESSIBLE = {}",
            name,
            if planned.publicly_accessible() {
                "TRUE"
            } else {
                "FALSE"
            }
        ));
    }
    for schema in prior.schemas.difference(&planned.schemas) {
        statements.extend(remove_schema_statements(&name, schema));
    }
    for schema in planned.schemas.difference(&prior.schemas) {
        statements.extend(add_schema_statements(&name, schema));
    }
    statements
}

/// Look up an outbound datashare by id or name.
pub(crate) async fn fetch_datashare(
    pool: &PgPool,
    lookup: Lookup<'_>,
) -> Result<Option<DatashareState>, ProviderError> {
    let filter = match lookup {
        Lookup::Id(_) => "d.share_id::varchar = $1",
        Lookup::Name(_) => "d.share_name = $1",
    };
    let sql = format!(
        "SELECT d.share_id::varchar AS id, d.share_name::varchar AS name, \
                COALESCE(u.usename, '')::varchar AS owner, \
                COALESCE(d.is_publicaccessible, false) AS publicly_accessible, \
                COALESCE(d.producer_account, '')::varchar AS producer_account, \
                COALESCE(d.producer_namespace, '')::varchar AS producer_namespace, \
                COALESCE(d.createdate::varchar, '')::varchar AS created \
         FROM svv_datashares d LEFT JOIN pg_user_info u ON u.usesysid = d.share_owner \
         WHERE d.share_type = 'OUTBOUND' AND {}",
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

    let schemas = sqlx::query_scalar::<_, String>(
        "SELECT object_name::varchar FROM svv_datashare_objects \
         WHERE share_type = 'OUTBOUND' AND share_name = $1 AND object_type = 'schema'",
    )
    .bind(&name)
    .fetch_all(pool)
    .await?;

    let text = |column: &str| -> Result<Option<String>, sqlx::Error> {
        let value: String = row.try_get(column)?;
        Ok(Some(value).filter(|v| !v.is_empty()))
    };
    Ok(Some(DatashareState {
        id: Some(row.try_get("id")?),
        owner: text("owner")?,
        publicly_accessible: Some(row.try_get("publicly_accessible")?),
        producer_account: text("producer_account")?,
        producer_namespace: text("producer_namespace")?,
        created: text("created")?,
        schemas: schemas.into_iter().collect(),
        name,
    }))
}

/// Manages `redshift_datashare`.
pub struct DatashareResource;

#[async_trait]
impl Resource for DatashareResource {
    fn type_name(&self) -> &'static str {
        RESOURCE_TYPE
    }

    fn schema(&self) -> Schema {
        datashare_schema()
    }

    async fn create(&self, client: &Client, planned: Value) -> Result<Value, ProviderError> {
        let share: DatashareState = from_state(&planned)?;
        let statements = create_statements(&share);
        let database = client.default_database();
        client
            .retry("create datashare", || {
                client.execute_in_transaction(database, &statements)
            })
            .await?;
        info!(datashare = %share.name, schemas = share.schemas.len(), "Created datashare");

        let pool = client.default_pool().await?;
        let created = fetch_datashare(&pool, Lookup::Name(&share.name))
            .await?
            .ok_or_else(|| {
                ProviderError::NotFound(format!("datashare {} after create", share.name))
            })?;
        to_state(&created)
    }

    async fn read(&self, client: &Client, state: Value) -> Result<Option<Value>, ProviderError> {
        let prior: DatashareState = from_state(&state)?;
        let id = require_id(&prior.id, RESOURCE_TYPE)?;
        let pool = client.default_pool().await?;
        match fetch_datashare(&pool, Lookup::Id(&id)).await? {
            Some(share) => Ok(Some(to_state(&share)?)),
            None => Ok(None),
        }
    }

    async fn update(
        &self,
        client: &Client,
        prior: Value,
        planned: Value,
    ) -> Result<Value, ProviderError> {
        let prior: DatashareState = from_state(&prior)?;
        let planned: DatashareState = from_state(&planned)?;
        let id = require_id(&prior.id, RESOURCE_TYPE)?;

        let statements = update_statements(&prior, &planned);
        let database = client.default_database();
        client
            .retry("alter datashare", || {
                client.execute_in_transaction(database, &statements)
            })
            .await?;
        info!(datashare = %planned.name, "Updated datashare");

        let pool = client.default_pool().await?;
        let updated = fetch_datashare(&pool, Lookup::Id(&id)).await?.ok_or_else(|| {
            ProviderError::NotFound(format!("datashare {} after update", planned.name))
        })?;
        to_state(&updated)
    }

    async fn delete(&self, client: &Client, state: Value) -> Result<(), ProviderError> {
        let share: DatashareState = from_state(&state)?;
        let statement = format!("DROP DATASHARE {}", quote_ident(&share.name));
        let database = client.default_database();
        client
            .retry("drop datashare", || client.execute(database, &statement))
            .await?;
        info!(datashare = %share.name, "Dropped datashare");
        Ok(())
    }

    async fn import(&self, client: &Client, id: &str) -> Result<Option<Value>, ProviderError> {
        let pool = client.default_pool().await?;
        match fetch_datashare(&pool, Lookup::from_import(id)).await? {
            Some(share) => Ok(Some(to_state(&share)?)),
            None => Ok(None),
        }
    }
}
