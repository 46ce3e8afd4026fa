//! `redshift_datashare_privilege`
//!
//! Usage of an outbound datashare granted to another AWS account or to a
//! cluster namespace.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::postgres::PgPool;
use tracing::info;

use super::{from_state, non_empty, nullable, to_state, Resource};
use crate::client::Client;
use crate::error::ProviderError;
use crate::schema::{Attribute, Diagnostic, Schema};
use crate::sql::{quote_ident, quote_literal};
use crate::validation::exactly_one_of;

/// Resource type name.
pub const RESOURCE_TYPE: &str = "redshift_datashare_privilege";

/// Status reported while the consumer holds usage.
const STATUS_ACTIVE: &str = "ACTIVE";

/// Whether `value` is a 12-digit AWS account id.
pub fn is_account_id(value: &str) -> bool {
    value.len() == 12 && value.bytes().all(|b| b.is_ascii_digit())
}

/// Whether `value` is a namespace GUID (`8-4-4-4-12` hex digits).
pub fn is_namespace(value: &str) -> bool {
    let groups: Vec<&str> = value.split('-').collect();
    groups.len() == 5
        && groups
            .iter()
            .zip([8, 4, 4, 4, 12])
            .all(|(group, len)| group.len() == len && group.bytes().all(|b| b.is_ascii_hexdigit()))
}

/// Schema of `redshift_datashare_privilege`.
pub fn datashare_privilege_schema() -> Schema {
    Schema::v0()
        .with_description("Usage of a datashare granted to an account or namespace.")
        .with_attribute("id", Attribute::computed_string())
        .with_attribute(
            "share_name",
            Attribute::required_string()
                .with_force_new()
                .with_description("Datashare to grant usage on."),
        )
        .with_attribute(
            "account",
            Attribute::optional_string()
                .with_force_new()
                .with_conflicts_with(&["namespace"])
                .with_description("Consumer AWS account id."),
        )
        .with_attribute(
            "namespace",
            Attribute::optional_string()
                .with_force_new()
                .with_conflicts_with(&["account"])
                .with_description("Consumer cluster namespace GUID."),
        )
        .with_attribute("status", Attribute::computed_string())
        .with_attribute(
            "share_date",
            Attribute::computed_string().with_description("When usage was granted."),
        )
}

/// State of a `redshift_datashare_privilege`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasharePrivilegeState {
    /// Composite id.
    pub id: Option<String>,
    /// Datashare name.
    #[serde(deserialize_with = "nullable")]
    pub share_name: String,
    /// Consumer account.
    pub account: Option<String>,
    /// Consumer namespace.
    pub namespace: Option<String>,
    /// Grant status.
    pub status: Option<String>,
    /// Grant timestamp.
    pub share_date: Option<String>,
}

/// Who receives usage of a datashare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Consumer<'a> {
    /// Another AWS account.
    Account(&'a str),
    /// A cluster namespace.
    Namespace(&'a str),
}

impl<'a> Consumer<'a> {
    fn kind(&self) -> &'static str {
        match self {
            Self::Account(_) => "account",
            Self::Namespace(_) => "namespace",
        }
    }

    fn value(&self) -> &'a str {
        match self {
            Self::Account(v) | Self::Namespace(v) => v,
        }
    }

    fn to_sql(self) -> String {
        format!("{} {}", self.kind().to_ascii_uppercase(), quote_literal(self.value()))
    }
}

impl DatasharePrivilegeState {
    fn consumer(&self) -> Result<Consumer<'_>, ProviderError> {
        match (non_empty(&self.account), non_empty(&self.namespace)) {
            (Some(account), None) => Ok(Consumer::Account(account)),
            (None, Some(namespace)) => Ok(Consumer::Namespace(namespace)),
            _ => Err(ProviderError::Validation(
                "exactly one of `account` or `namespace` must be set".to_string(),
            )),
        }
    }
}

fn validate_datashare_privilege(config: &Value) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    exactly_one_of(config, &["account", "namespace"], &mut diagnostics);
    let Ok(state) = from_state::<DatasharePrivilegeState>(config) else {
        return diagnostics;
    };
    if let Some(account) = non_empty(&state.account) {
        if !is_account_id(account) {
            diagnostics.push(
                Diagnostic::error("Invalid account")
                    .with_detail("AWS account ids are 12 digits")
                    .with_attribute("account"),
            );
        }
    }
    if let Some(namespace) = non_empty(&state.namespace) {
        if !is_namespace(namespace) {
            diagnostics.push(
                Diagnostic::error("Invalid namespace")
                    .with_detail("Namespaces are GUIDs like 13b8833d-17c6-4f16-8fe4-1a018f5ed00d")
                    .with_attribute("namespace"),
            );
        }
    }
    diagnostics
}

/// `GRANT USAGE ON DATASHARE …`
pub fn grant_statement(share_name: &str, consumer: Consumer<'_>) -> String {
    format!(
        "GRANT USAGE ON DATASHARE {} TO {}",
        quote_ident(share_name),
        consumer.to_sql()
    )
}

/// `REVOKE USAGE ON DATASHARE …`
pub fn revoke_statement(share_name: &str, consumer: Consumer<'_>) -> String {
    format!(
        "REVOKE USAGE ON DATASHARE {} FROM {}",
        quote_ident(share_name),
        consumer.to_sql()
    )
}

/// Composite id: `<share>:account:<id>` or `<share>:namespace:<guid>`.
pub fn datashare_privilege_id(share_name: &str, consumer: Consumer<'_>) -> String {
    format!("{}:{}:{}", share_name, consumer.kind(), consumer.value())
}

/// Parse an id produced by [`datashare_privilege_id`].
pub fn parse_datashare_privilege_id(id: &str) -> Result<DatasharePrivilegeState, ProviderError> {
    let mut parts = id.rsplitn(3, ':');
    let (value, kind, share) = match (parts.next(), parts.next(), parts.next()) {
        (Some(value), Some(kind), Some(share)) if !share.is_empty() && !value.is_empty() => {
            (value, kind, share)
        },
        _ => {
            return Err(ProviderError::Validation(format!(
                "invalid {} id `{}`; expected <share>:account:<id> or <share>:namespace:<guid>",
                RESOURCE_TYPE, id
            )))
        },
    };
    let mut state = DatasharePrivilegeState {
        share_name: share.to_string(),
        ..Default::default()
    };
    match kind {
        "account" => state.account = Some(value.to_string()),
        "namespace" => state.namespace = Some(value.to_string()),
        _ => {
            return Err(ProviderError::Validation(format!(
                "invalid {} id `{}`: consumer kind must be account or namespace",
                RESOURCE_TYPE, id
            )))
        },
    }
    Ok(state)
}

/// Read the grant from `svv_datashare_consumers`. `None` when it is gone.
pub(crate) async fn fetch_datashare_privilege(
    pool: &PgPool,
    prior: &DatasharePrivilegeState,
) -> Result<Option<DatasharePrivilegeState>, ProviderError> {
    let consumer = prior.consumer()?;
    let sql = match consumer {
        Consumer::Account(_) => {
            "SELECT COALESCE(share_date::varchar, '')::varchar FROM svv_datashare_consumers \
             WHERE share_name = $1 AND consumer_account = $2"
        },
        Consumer::Namespace(_) => {
            "SELECT COALESCE(share_date::varchar, '')::varchar FROM svv_datashare_consumers \
             WHERE share_name = $1 AND consumer_namespace = $2"
        },
    };
    let share_date = sqlx::query_scalar::<_, String>(sql)
        .bind(&prior.share_name)
        .bind(consumer.value())
        .fetch_optional(pool)
        .await?;

    Ok(share_date.map(|share_date| DatasharePrivilegeState {
        id: Some(datashare_privilege_id(&prior.share_name, consumer)),
        share_name: prior.share_name.clone(),
        account: prior.account.clone(),
        namespace: prior.namespace.clone(),
        status: Some(STATUS_ACTIVE.to_string()),
        share_date: Some(share_date).filter(|d| !d.is_empty()),
    }))
}

/// Manages `redshift_datashare_privilege`.
pub struct DatasharePrivilegeResource;

#[async_trait]
impl Resource for DatasharePrivilegeResource {
    fn type_name(&self) -> &'static str {
        RESOURCE_TYPE
    }

    fn schema(&self) -> Schema {
        datashare_privilege_schema()
    }

    fn validate(&self, config: &Value) -> Vec<Diagnostic> {
        validate_datashare_privilege(config)
    }

    async fn create(&self, client: &Client, planned: Value) -> Result<Value, ProviderError> {
        let state: DatasharePrivilegeState = from_state(&planned)?;
        let consumer = state.consumer()?;
        let statement = grant_statement(&state.share_name, consumer);
        let database = client.default_database();
        {
            let _guard = client.grant_lock().await;
            client
                .retry("grant datashare usage", || client.execute(database, &statement))
                .await?;
        }
        info!(
            datashare = %state.share_name,
            consumer = consumer.value(),
            "Granted datashare usage"
        );

        let pool = client.default_pool().await?;
        let created = fetch_datashare_privilege(&pool, &state)
            .await?
            .ok_or_else(|| {
                ProviderError::NotFound(format!(
                    "usage of datashare {} after grant",
                    state.share_name
                ))
            })?;
        to_state(&created)
    }

    async fn read(&self, client: &Client, state: Value) -> Result<Option<Value>, ProviderError> {
        let prior: DatasharePrivilegeState = from_state(&state)?;
        let pool = client.default_pool().await?;
        match fetch_datashare_privilege(&pool, &prior).await? {
            Some(state) => Ok(Some(to_state(&state)?)),
            None => Ok(None),
        }
    }

    async fn update(
        &self,
        _client: &Client,
        _prior: Value,
        planned: Value,
    ) -> Result<Value, ProviderError> {
        // Every configurable attribute forces replacement.
        Ok(planned)
    }

    async fn delete(&self, client: &Client, state: Value) -> Result<(), ProviderError> {
        let state: DatasharePrivilegeState = from_state(&state)?;
        let consumer = state.consumer()?;
        let statement = revoke_statement(&state.share_name, consumer);
        let database = client.default_database();
        let _guard = client.grant_lock().await;
        client
            .retry("revoke datashare usage", || client.execute(database, &statement))
            .await?;
        info!(
            datashare = %state.share_name,
            consumer = consumer.value(),
            "Revoked datashare usage"
        );
        Ok(())
    }

    async fn import(&self, client: &Client, id: &str) -> Result<Option<Value>, ProviderError> {
        let prior = parse_datashare_privilege_id(id)?;
        let pool = client.default_pool().await?;
        match fetch_datashare_privilege(&pool, &prior).await? {
            Some(state) => Ok(Some(to_state(&state)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const NAMESPACE: &str = "13b8833d-17c6-4f16-8fe4-1a018f5ed00d";

    #[test]
    fn test_is_account_id() {
        assert!(is_account_id("123456789012"));
        assert!(!is_account_id("12345678901"));
        assert!(!is_account_id("12345678901a"));
    }

    #[test]
    fn test_is_namespace() {
        assert!(is_namespace(NAMESPACE));
        assert!(is_namespace(&NAMESPACE.to_uppercase()));
        assert!(!is_namespace("13b8833d-17c6-4f16-8fe4"));
        assert!(!is_namespace("13b8833d-17c6-4f16-8fe4-1a018f5ed00z"));
    }

    #[test]
    fn test_statements() {
        assert_eq!(
            grant_statement("sales", Consumer::Account("123456789012")),
            "GRANT USAGE ON DATASHARE \"sales\" TO ACCOUNT '123456789012'"
        );
        assert_eq!(
            revoke_statement("sales", Consumer::Namespace(NAMESPACE)),
            format!("REVOKE USAGE ON DATASHARE \"sales\" FROM NAMESPACE '{}'", NAMESPACE)
        );
    }

    #[test]
    fn test_id_round_trip() {
        let id = datashare_privilege_id("sales", Consumer::Namespace(NAMESPACE));
        assert_eq!(id, format!("sales:namespace:{}", NAMESPACE));
        let state = parse_datashare_privilege_id(&id).unwrap();
        assert_eq!(state.share_name, "sales");
        assert_eq!(state.namespace.as_deref(), Some(NAMESPACE));
        assert!(state.account.is_none());

        let state = parse_datashare_privilege_id("sales:account:123456789012").unwrap();
        assert_eq!(state.account.as_deref(), Some("123456789012"));

        assert!(parse_datashare_privilege_id("sales:123456789012").is_err());
        assert!(parse_datashare_privilege_id("sales:cluster:x").is_err());
    }

    #[test]
    fn test_validate() {
        assert!(validate_datashare_privilege(&json!({
            "share_name": "sales",
            "account": "123456789012"
        }))
        .is_empty());

        let diagnostics = validate_datashare_privilege(&json!({
            "share_name": "sales",
            "account": "1234",
            "namespace": "nope"
        }));
        assert_eq!(diagnostics.len(), 3);

        assert_eq!(
            validate_datashare_privilege(&json!({"share_name": "sales"})).len(),
            1
        );
    }
}
