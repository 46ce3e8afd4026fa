//! `redshift_schema`
//!
//! Local schemas carry an owner and a disk quota. External schemas point at an
//! AWS Glue Data Catalog database or at a schema in another Redshift database;
//! their source is fixed at creation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::postgres::PgPool;
use sqlx::Row;
use tracing::{info, warn};

use super::{from_state, non_empty, nullable, require_id, single_block, to_state, Lookup, Resource};
use crate::client::Client;
use crate::error::ProviderError;
use crate::schema::{Attribute, Block, Diagnostic, NestedBlock, Schema};
use crate::sql::{quote_ident, quote_literal};

/// Resource type name.
pub const RESOURCE_TYPE: &str = "redshift_schema";

/// Schema of `redshift_schema`.
pub fn schema_schema() -> Schema {
    Schema::v0()
        .with_description("A schema in the provider's database.")
        .with_attribute(
            "id",
            Attribute::computed_string().with_description("The schema oid."),
        )
        .with_attribute("name", Attribute::required_string().with_description("Schema name."))
        .with_attribute(
            "owner",
            Attribute::optional_computed_string().with_description("Owning user."),
        )
        .with_attribute(
            "quota",
            Attribute::optional_computed_int64()
                .with_description("Disk quota in MB; 0 is unlimited. Local schemas only."),
        )
        .with_attribute(
            "cascade_on_delete",
            Attribute::optional_bool()
                .with_default(Value::Bool(false))
                .with_description("Drop contained objects when the schema is destroyed."),
        )
        .with_block(
            "external_schema",
            NestedBlock::single(
                Block::new()
                    .with_description("Create an external schema instead of a local one.")
                    .with_attribute(
                        "database_name",
                        Attribute::required_string()
                            .with_description("Source database in the catalog or cluster."),
                    )
                    .with_block(
                        "data_catalog_source",
                        NestedBlock::single(
                            Block::new()
                                .with_attribute(
                                    "region",
                                    Attribute::optional_computed_string()
                                        .with_description("Region of the Data Catalog."),
                                )
                                .with_attribute(
                                    "iam_role_arns",
                                    Attribute::required_string_list().with_description(
                                        "Role chain used to access the catalog and data.",
                                    ),
                                )
                                .with_attribute(
                                    "catalog_role_arns",
                                    Attribute::optional_string_list().with_description(
                                        "Role chain used to access the catalog only.",
                                    ),
                                )
                                .with_attribute(
                                    "create_external_database_if_not_exists",
                                    Attribute::optional_bool().with_default(Value::Bool(false)),
                                ),
                        ),
                    )
                    .with_block(
                        "redshift_source",
                        NestedBlock::single(Block::new().with_attribute(
                            "schema",
                            Attribute::optional_string()
                                .with_description("Source schema; defaults to public."),
                        )),
                    ),
            )
            .with_force_new(),
        )
}

/// Glue Data Catalog source of an external schema.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataCatalogSource {
    /// Catalog region.
    pub region: Option<String>,
    /// IAM role chain.
    #[serde(deserialize_with = "nullable")]
    pub iam_role_arns: Vec<String>,
    /// Catalog role chain.
    #[serde(deserialize_with = "nullable")]
    pub catalog_role_arns: Vec<String>,
    /// CREATE EXTERNAL DATABASE IF NOT EXISTS
    pub create_external_database_if_not_exists: Option<bool>,
}

/// Redshift database source of an external schema.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedshiftSource {
    /// Source schema.
    pub schema: Option<String>,
}

/// External schema definition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExternalSchema {
    /// Database in the source.
    #[serde(deserialize_with = "nullable")]
    pub database_name: String,
    /// Glue Data Catalog source.
    #[serde(deserialize_with = "single_block")]
    pub data_catalog_source: Option<DataCatalogSource>,
    /// Redshift source.
    #[serde(deserialize_with = "single_block")]
    pub redshift_source: Option<RedshiftSource>,
}

/// State of a `redshift_schema`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaState {
    /// Schema oid.
    pub id: Option<String>,
    /// Schema name.
    #[serde(deserialize_with = "nullable")]
    pub name: String,
    /// Owning user.
    pub owner: Option<String>,
    /// Quota in MB, 0 for unlimited.
    pub quota: Option<i64>,
    /// DROP ... CASCADE
    pub cascade_on_delete: Option<bool>,
    /// External schema definition.
    #[serde(deserialize_with = "single_block")]
    pub external_schema: Option<ExternalSchema>,
}

impl SchemaState {
    fn quota(&self) -> i64 {
        self.quota.unwrap_or(0)
    }
}

fn validate_schema(config: &Value) -> Vec<Diagnostic> {
    let Ok(schema) = from_state::<SchemaState>(config) else {
        return Vec::new();
    };
    let mut diagnostics = Vec::new();
    if schema.quota() < 0 {
        diagnostics.push(
            Diagnostic::error("Invalid quota")
                .with_detail("Use 0 for an unlimited quota")
                .with_attribute("quota"),
        );
    }
    if let Some(external) = &schema.external_schema {
        if schema.quota.is_some() {
            diagnostics.push(
                Diagnostic::error("quota cannot be set on an external schema")
                    .with_attribute("quota"),
            );
        }
        match (&external.data_catalog_source, &external.redshift_source) {
            (Some(_), None) | (None, Some(_)) => {},
            _ => diagnostics.push(
                Diagnostic::error(
                    "Exactly one of data_catalog_source, redshift_source must be set",
                )
                .with_attribute("external_schema"),
            ),
        }
        if let Some(source) = &external.data_catalog_source {
            if source.iam_role_arns.is_empty() {
                diagnostics.push(
                    Diagnostic::error("At least one IAM role is required")
                        .with_attribute("external_schema.data_catalog_source.iam_role_arns"),
                );
            }
        }
    }
    diagnostics
}

fn quota_clause(quota: i64) -> String {
    if quota <= 0 {
        "QUOTA UNLIMITED".to_string()
    } else {
        format!("QUOTA {} MB", quota)
    }
}

/// `CREATE SCHEMA` or `CREATE EXTERNAL SCHEMA` for `schema`.
pub fn create_statement(schema: &SchemaState) -> String {
    let name = quote_ident(&schema.name);
    let Some(external) = &schema.external_schema else {
        let mut sql = format!("CREATE SCHEMA {}", name);
        if let Some(owner) = non_empty(&schema.owner) {
            sql.push_str(&format!(" AUTHORIZATION {}", quote_ident(owner)));
        }
        sql.push(' ');
        sql.push_str(&quota_clause(schema.quota()));
        return sql;
    };

    let mut sql = format!("CREATE EXTERNAL SCHEMA {} FROM ", name);
    if let Some(source) = &external.data_catalog_source {
        sql.push_str(&format!(
            "DATA CATALOG DATABASE {}",
            quote_literal(&external.database_name)
        ));
        if let Some(region) = non_empty(&source.region) {
            sql.push_str(&format!(" REGION {}", quote_literal(region)));
        }
        sql.push_str(&format!(
            " IAM_ROLE {}",
            quote_literal(&source.iam_role_arns.join(","))
        ));
        if !source.catalog_role_arns.is_empty() {
            sql.push_str(&format!(
                " CATALOG_ROLE {}",
                quote_literal(&source.catalog_role_arns.join(","))
            ));
        }
        if source.create_external_database_if_not_exists.unwrap_or(false) {
            sql.push_str(" CREATE EXTERNAL DATABASE IF NOT EXISTS");
        }
    } else {
        sql.push_str(&format!(
            "REDSHIFT DATABASE {}",
            quote_literal(&external.database_name)
        ));
        if let Some(source_schema) = external
            .redshift_source
            .as_ref()
            .and_then(|s| non_empty(&s.schema))
        {
            sql.push_str(&format!(" SCHEMA {}", quote_literal(source_schema)));
        }
    }
    sql
}

/// `ALTER SCHEMA` statements that turn `prior` into `planned`.
pub fn update_statements(prior: &SchemaState, planned: &SchemaState) -> Vec<String> {
    let mut statements = Vec::new();
    let name = quote_ident(&planned.name);
    if prior.name != planned.name {
        statements.push(format!(
            "ALTER SCHEMA {} RENAME TO {}",
            quote_ident(&prior.name),
            name
        ));
    }
    if let Some(owner) = non_empty(&planned.owner) {
        if non_empty(&prior.owner) != Some(owner) {
            statements.push(format!("ALTER SCHEMA {} OWNER TO {}", name, quote_ident(owner)));
        }
    }
    if planned.external_schema.is_none() && prior.quota() != planned.quota() {
        statements.push(format!("ALTER SCHEMA {} {}", name, quota_clause(planned.quota())));
    }
    statements
}

fn drop_statement(schema: &SchemaState) -> String {
    format!(
        "DROP SCHEMA {} {}",
        quote_ident(&schema.name),
        if schema.cascade_on_delete.unwrap_or(false) {
            "CASCADE"
        } else {
            "RESTRICT"
        }
    )
}

/// Rebuild a data catalog source from `svv_external_schemas.esoptions`,
/// keeping configured values the catalog does not report.
fn data_catalog_from_options(options: &str, prior: Option<&DataCatalogSource>) -> DataCatalogSource {
    let mut source = prior.cloned().unwrap_or_default();
    let Ok(Value::Object(options)) = serde_json::from_str::<Value>(options) else {
        return source;
    };
    let split = |v: &Value| -> Vec<String> {
        v.as_str()
            .map(|s| s.split(',').map(|a| a.trim().to_string()).collect())
            .unwrap_or_default()
    };
    for (key, value) in &options {
        match key.to_ascii_uppercase().as_str() {
            "REGION" => source.region = value.as_str().map(str::to_string),
            "IAM_ROLE" => source.iam_role_arns = split(value),
            "CATALOG_ROLE" => source.catalog_role_arns = split(value),
            _ => {},
        }
    }
    source
}

/// Look up a schema. `prior` supplies what the catalog cannot report.
pub(crate) async fn fetch_schema(
    pool: &PgPool,
    lookup: Lookup<'_>,
    prior: &SchemaState,
) -> Result<Option<SchemaState>, ProviderError> {
    let filter = match lookup {
        Lookup::Id(_) => "n.oid::varchar = $1",
        Lookup::Name(_) => "n.nspname = $1",
    };
    let sql = format!(
        "SELECT n.oid::varchar AS id, n.nspname::varchar AS name, \
                COALESCE(u.usename, '')::varchar AS owner \
         FROM pg_namespace n LEFT JOIN pg_user_info u ON u.usesysid = n.nspowner \
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
    let id: String = row.try_get("id")?;
    let owner: String = row.try_get("owner")?;

    let external = sqlx::query_as::<_, (String, String)>(
        "SELECT COALESCE(databasename, '')::varchar, COALESCE(esoptions, '')::varchar \
         FROM svv_external_schemas WHERE esoid::varchar = $1",
    )
    .bind(&id)
    .fetch_optional(pool)
    .await?;

    let (quota, external_schema) = match external {
        Some((database_name, options)) => {
            let prior_external = prior.external_schema.clone().unwrap_or_default();
            let data_catalog_source = match (&prior_external.redshift_source, options.is_empty()) {
                (Some(_), _) => None,
                (None, true) => prior_external.data_catalog_source.clone(),
                (None, false) => Some(data_catalog_from_options(
                    &options,
                    prior_external.data_catalog_source.as_ref(),
                )),
            };
            (
                None,
                Some(ExternalSchema {
                    database_name,
                    data_catalog_source,
                    redshift_source: prior_external.redshift_source,
                }),
            )
        },
        None => {
            let quota = sqlx::query_scalar::<_, i64>(
                "SELECT COALESCE(quota, 0)::bigint FROM svv_schema_quota_state \
                 WHERE schema_id::varchar = $1",
            )
            .bind(&id)
            .fetch_optional(pool)
            .await?
            .unwrap_or(0);
            (Some(quota), None)
        },
    };

    Ok(Some(SchemaState {
        id: Some(id),
        name: row.try_get("name")?,
        owner: Some(owner).filter(|o| !o.is_empty()),
        quota,
        cascade_on_delete: Some(prior.cascade_on_delete.unwrap_or(false)),
        external_schema,
    }))
}

/// Manages `redshift_schema`.
pub struct SchemaResource;

#[async_trait]
impl Resource for SchemaResource {
    fn type_name(&self) -> &'static str {
        RESOURCE_TYPE
    }

    fn schema(&self) -> Schema {
        schema_schema()
    }

    fn validate(&self, config: &Value) -> Vec<Diagnostic> {
        validate_schema(config)
    }

    async fn create(&self, client: &Client, planned: Value) -> Result<Value, ProviderError> {
        let schema: SchemaState = from_state(&planned)?;
        let database = client.default_database();
        let create = create_statement(&schema);
        if schema.external_schema.is_some() {
            // CREATE EXTERNAL DATABASE cannot run in a transaction block.
            client
                .retry("create external schema", || client.execute(database, &create))
                .await?;
            if let Some(owner) = non_empty(&schema.owner) {
                let alter = format!(
                    "ALTER SCHEMA {} OWNER TO {}",
                    quote_ident(&schema.name),
                    quote_ident(owner)
                );
                client
                    .retry("alter schema owner", || client.execute(database, &alter))
                    .await?;
            }
        } else {
            client
                .retry("create schema", || {
                    client.execute_in_transaction(database, std::slice::from_ref(&create))
                })
                .await?;
        }
        info!(schema = %schema.name, "Created schema");

        let pool = client.default_pool().await?;
        let created = fetch_schema(&pool, Lookup::Name(&schema.name), &schema)
            .await?
            .ok_or_else(|| ProviderError::NotFound(format!("schema {} after create", schema.name)))?;
        to_state(&created)
    }

    async fn read(&self, client: &Client, state: Value) -> Result<Option<Value>, ProviderError> {
        let prior: SchemaState = from_state(&state)?;
        let id = require_id(&prior.id, RESOURCE_TYPE)?;
        let pool = client.default_pool().await?;
        match fetch_schema(&pool, Lookup::Id(&id), &prior).await? {
            Some(schema) => {
                if prior.name != schema.name {
                    warn!(from = %prior.name, to = %schema.name, "Schema renamed outside the provider");
                }
                Ok(Some(to_state(&schema)?))
            },
            None => Ok(None),
        }
    }

    async fn update(
        &self,
        client: &Client,
        prior: Value,
        planned: Value,
    ) -> Result<Value, ProviderError> {
        let prior: SchemaState = from_state(&prior)?;
        let planned: SchemaState = from_state(&planned)?;
        let id = require_id(&prior.id, RESOURCE_TYPE)?;

        let statements = update_statements(&prior, &planned);
        let database = client.default_database();
        client
            .retry("alter schema", || client.execute_in_transaction(database, &statements))
            .await?;
        info!(schema = %planned.name, "Updated schema");

        let pool = client.default_pool().await?;
        let updated = fetch_schema(&pool, Lookup::Id(&id), &planned)
            .await?
            .ok_or_else(|| ProviderError::NotFound(format!("schema {} after update", planned.name)))?;
        to_state(&updated)
    }

    async fn delete(&self, client: &Client, state: Value) -> Result<(), ProviderError> {
        let schema: SchemaState = from_state(&state)?;
        let statement = drop_statement(&schema);
        let database = client.default_database();
        client
            .retry("drop schema", || client.execute(database, &statement))
            .await?;
        info!(schema = %schema.name, "Dropped schema");
        Ok(())
    }

    async fn import(&self, client: &Client, id: &str) -> Result<Option<Value>, ProviderError> {
        let pool = client.default_pool().await?;
        match fetch_schema(&pool, Lookup::from_import(id), &SchemaState::default()).await? {
            Some(schema) => Ok(Some(to_state(&schema)?)),
            None => Ok(None),
        }
    }
}
