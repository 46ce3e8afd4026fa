//! Test harness for the provider.
//!
//! [`ProviderTester`] drives a [`ProviderService`] directly, without a gRPC
//! server, and turns error diagnostics into [`TestError`]s. The assertion
//! helpers check plans and diagnostics with readable panic messages.
//!
//! Tests against a live cluster use [`ProviderTester::from_env`], which
//! configures the provider from the `REDSHIFT_*` variables and returns `None`
//! when `REDSHIFT_HOST` is unset:
//!
//! ```ignore
//! use redshift_provider::testing::{unique_name, ProviderTester};
//! use serde_json::json;
//!
//! #[tokio::test]
//! #[ignore]
//! async fn group_lifecycle() {
//!     let Some(tester) = ProviderTester::from_env().await.unwrap() else { return };
//!     let name = unique_name("tf_group");
//!     let state = tester.apply("redshift_group", json!({ "name": name })).await.unwrap();
//!     tester.destroy("redshift_group", state).await.unwrap();
//! }
//! ```

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{json, Value};
use thiserror::Error;

use crate::error::ProviderError;
use crate::provider::RedshiftProvider;
use crate::schema::{Diagnostic, ProviderSchema};
use crate::server::ProviderService;
use crate::types::{ImportedResource, PlanResult};

/// Failure of a tester operation.
#[derive(Debug, Error)]
pub enum TestError {
    /// The provider returned error diagnostics.
    #[error("{}", describe(.0))]
    Diagnostics(Vec<Diagnostic>),
    /// The provider returned an error.
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),
}

fn describe(diagnostics: &[Diagnostic]) -> String {
    let mut out = format!("{} error diagnostic(s):", diagnostics.len());
    for d in diagnostics {
        out.push_str("\n  ");
        out.push_str(&d.summary);
        if let Some(detail) = &d.detail {
            out.push_str(": ");
            out.push_str(detail);
        }
        if let Some(attribute) = &d.attribute {
            out.push_str(&format!(" (at {})", attribute));
        }
    }
    out
}

/// Keep only errors; an empty result is success.
fn errors_only(diagnostics: Vec<Diagnostic>) -> Result<(), TestError> {
    let errors: Vec<Diagnostic> = diagnostics.into_iter().filter(Diagnostic::is_error).collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(TestError::Diagnostics(errors))
    }
}

/// A name unlikely to collide with other test runs against the same cluster.
pub fn unique_name(prefix: &str) -> String {
    static COUNTER: AtomicU32 = AtomicU32::new(0);
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    format!(
        "{}_{}_{}",
        prefix,
        millis,
        COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}

/// Drives a provider without a server.
pub struct ProviderTester<P: ProviderService = RedshiftProvider> {
    provider: P,
}

impl ProviderTester<RedshiftProvider> {
    /// An unconfigured Redshift provider.
    pub fn redshift() -> Self {
        Self::new(RedshiftProvider::new())
    }

    /// A Redshift provider configured from `REDSHIFT_*`, or `None` when
    /// `REDSHIFT_HOST` is unset.
    pub async fn from_env() -> Result<Option<Self>, TestError> {
        if std::env::var("REDSHIFT_HOST").map_or(true, |h| h.is_empty()) {
            return Ok(None);
        }
        let tester = Self::redshift();
        tester.configure(json!({})).await?;
        Ok(Some(tester))
    }
}

impl<P: ProviderService> ProviderTester<P> {
    /// Wrap `provider`.
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    /// The wrapped provider.
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Provider schema.
    pub fn schema(&self) -> ProviderSchema {
        self.provider.schema()
    }

    /// Sorted resource type names.
    pub fn resource_types(&self) -> Vec<String> {
        self.provider.metadata().resources
    }

    /// Sorted data source type names.
    pub fn data_source_types(&self) -> Vec<String> {
        self.provider.metadata().data_sources
    }

    /// Validate the provider block.
    pub async fn validate_provider_config(&self, config: Value) -> Result<(), TestError> {
        errors_only(self.provider.validate_provider_config(config).await?)
    }

    /// Configure the provider.
    pub async fn configure(&self, config: Value) -> Result<(), TestError> {
        errors_only(self.provider.configure(config).await?)
    }

    /// Stop the provider.
    pub async fn stop(&self) -> Result<(), ProviderError> {
        self.provider.stop().await
    }

    /// Validate a resource configuration.
    pub async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<(), TestError> {
        errors_only(
            self.provider
                .validate_resource_config(resource_type, config)
                .await?,
        )
    }

    /// All diagnostics for a resource configuration, warnings included.
    pub async fn resource_diagnostics(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        self.provider
            .validate_resource_config(resource_type, config)
            .await
    }

    /// Validate a data source configuration.
    pub async fn validate_data_source_config(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<(), TestError> {
        errors_only(
            self.provider
                .validate_data_source_config(data_source_type, config)
                .await?,
        )
    }

    /// Plan a create.
    pub async fn plan_create(&self, resource_type: &str, config: Value) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(resource_type, None, config.clone(), config)
            .await
    }

    /// Plan moving `prior` to `config`.
    pub async fn plan_update(
        &self,
        resource_type: &str,
        prior: Value,
        config: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(resource_type, Some(prior), config.clone(), config)
            .await
    }

    /// Plan a destroy.
    pub async fn plan_delete(&self, resource_type: &str, prior: Value) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(resource_type, Some(prior), Value::Null, Value::Null)
            .await
    }

    /// Create from a planned state.
    pub async fn create(&self, resource_type: &str, planned: Value) -> Result<Value, ProviderError> {
        self.provider.create(resource_type, planned).await
    }

    /// Refresh state. `None` when the object no longer exists.
    pub async fn read(&self, resource_type: &str, state: Value) -> Result<Option<Value>, ProviderError> {
        let refreshed = self.provider.read(resource_type, state).await?;
        Ok(Some(refreshed).filter(|s| !s.is_null()))
    }

    /// Apply a planned update.
    pub async fn update(
        &self,
        resource_type: &str,
        prior: Value,
        planned: Value,
    ) -> Result<Value, ProviderError> {
        self.provider.update(resource_type, prior, planned).await
    }

    /// Drop the object.
    pub async fn delete(&self, resource_type: &str, state: Value) -> Result<(), ProviderError> {
        self.provider.delete(resource_type, state).await
    }

    /// Import an existing object.
    pub async fn import(&self, resource_type: &str, id: &str) -> Result<Vec<ImportedResource>, ProviderError> {
        self.provider.import_resource(resource_type, id).await
    }

    /// Upgrade stored state.
    pub async fn upgrade_resource_state(
        &self,
        resource_type: &str,
        version: i64,
        state: Value,
    ) -> Result<Value, ProviderError> {
        self.provider
            .upgrade_resource_state(resource_type, version, state)
            .await
    }

    /// Look up an existing object.
    pub async fn read_data_source(&self, data_source_type: &str, config: Value) -> Result<Value, ProviderError> {
        self.provider.read_data_source(data_source_type, config).await
    }

    /// Validate, plan and create, returning the refreshed state.
    pub async fn apply(&self, resource_type: &str, config: Value) -> Result<Value, TestError> {
        self.validate_resource_config(resource_type, config.clone())
            .await?;
        let plan = self.plan_create(resource_type, config).await?;
        let created = self.create(resource_type, plan.planned_state).await?;
        self.read(resource_type, created)
            .await?
            .ok_or_else(|| ProviderError::NotFound(format!("{} vanished after create", resource_type)).into())
    }

    /// Plan and apply an update in place, returning the refreshed state.
    ///
    /// Fails if the plan requires replacement.
    pub async fn apply_update(
        &self,
        resource_type: &str,
        prior: Value,
        config: Value,
    ) -> Result<Value, TestError> {
        let plan = self.plan_update(resource_type, prior.clone(), config).await?;
        if plan.requires_replace {
            return Err(ProviderError::FailedPrecondition(format!(
                "{} update requires replacement",
                resource_type
            ))
            .into());
        }
        if !plan.has_changes() {
            return Ok(prior);
        }
        let updated = self
            .update(resource_type, prior, plan.planned_state)
            .await?;
        self.read(resource_type, updated)
            .await?
            .ok_or_else(|| ProviderError::NotFound(format!("{} vanished after update", resource_type)).into())
    }

    /// Delete and check that a refresh reports the object gone.
    pub async fn destroy(&self, resource_type: &str, state: Value) -> Result<(), TestError> {
        self.plan_delete(resource_type, state.clone()).await?;
        self.delete(resource_type, state.clone()).await?;
        match self.read(resource_type, state).await? {
            None => Ok(()),
            Some(_) => Err(ProviderError::FailedPrecondition(format!(
                "{} still exists after delete",
                resource_type
            ))
            .into()),
        }
    }

    /// Create, update in place and destroy. Returns the updated state.
    pub async fn lifecycle(
        &self,
        resource_type: &str,
        initial: Value,
        updated: Value,
    ) -> Result<Value, TestError> {
        let created = self.apply(resource_type, initial).await?;
        let state = self.apply_update(resource_type, created, updated).await?;
        self.destroy(resource_type, state.clone()).await?;
        Ok(state)
    }
}

fn changed_paths(plan: &PlanResult) -> Vec<&str> {
    plan.changes.iter().map(|c| c.path.as_str()).collect()
}

/// The plan creates the object.
pub fn assert_plan_creates(plan: &PlanResult) {
    assert!(plan.has_changes(), "expected a create, got an empty plan");
    assert!(
        plan.changes.iter().all(|c| c.before.is_none()),
        "expected a create, got modifications of {:?}",
        changed_paths(plan)
    );
}

/// The plan is empty.
pub fn assert_plan_no_changes(plan: &PlanResult) {
    assert!(
        !plan.has_changes(),
        "expected no changes, got {:?}",
        changed_paths(plan)
    );
}

/// The plan replaces the object.
pub fn assert_plan_replaces(plan: &PlanResult) {
    assert!(
        plan.requires_replace,
        "expected replacement, plan changes {:?} in place",
        changed_paths(plan)
    );
}

/// The plan changes something without replacing the object.
pub fn assert_plan_updates_in_place(plan: &PlanResult) {
    assert!(plan.has_changes(), "expected an update, got an empty plan");
    assert!(
        !plan.requires_replace,
        "expected an in-place update, plan replaces because of {:?}",
        changed_paths(plan)
    );
}

/// The plan changes `path`.
pub fn assert_plan_changes_attribute(plan: &PlanResult, path: &str) {
    assert!(
        plan.changes.iter().any(|c| c.path == path),
        "expected `{}` to change, changed: {:?}",
        path,
        changed_paths(plan)
    );
}

/// The plan leaves `path` alone.
pub fn assert_plan_does_not_change_attribute(plan: &PlanResult, path: &str) {
    assert!(
        !plan.changes.iter().any(|c| c.path == path),
        "expected `{}` to be unchanged",
        path
    );
}

/// No error diagnostics.
pub fn assert_no_errors(diagnostics: &[Diagnostic]) {
    let errors: Vec<&str> = diagnostics
        .iter()
        .filter(|d| d.is_error())
        .map(|d| d.summary.as_str())
        .collect();
    assert!(errors.is_empty(), "expected no errors, got {:?}", errors);
}

/// At least one error diagnostic.
pub fn assert_has_errors(diagnostics: &[Diagnostic]) {
    assert!(
        diagnostics.iter().any(Diagnostic::is_error),
        "expected at least one error"
    );
}

/// An error diagnostic whose summary or detail contains `needle`.
pub fn assert_error_contains(diagnostics: &[Diagnostic], needle: &str) {
    let found = diagnostics.iter().filter(|d| d.is_error()).any(|d| {
        d.summary.contains(needle) || d.detail.as_deref().is_some_and(|detail| detail.contains(needle))
    });
    assert!(
        found,
        "expected an error mentioning `{}`, got {:?}",
        needle,
        diagnostics.iter().map(|d| &d.summary).collect::<Vec<_>>()
    );
}

/// An error diagnostic attached to `attribute`.
pub fn assert_error_at(diagnostics: &[Diagnostic], attribute: &str) {
    assert!(
        diagnostics
            .iter()
            .any(|d| d.is_error() && d.attribute.as_deref() == Some(attribute)),
        "expected an error at `{}`, got {:?}",
        attribute,
        diagnostics
            .iter()
            .map(|d| (d.attribute.as_deref(), d.summary.as_str()))
            .collect::<Vec<_>>()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan;
    use crate::resources::datashare::datashare_schema;
    use crate::resources::group::group_schema;
    use crate::schema::Schema;
    use std::collections::HashMap;
    use tokio::sync::Mutex;

    /// Keeps objects in memory by name and plans with a real resource schema.
    struct MemoryProvider {
        schema: Schema,
        objects: Mutex<HashMap<String, Value>>,
    }

    impl Default for MemoryProvider {
        fn default() -> Self {
            Self::with_schema(group_schema())
        }
    }

    impl MemoryProvider {
        fn with_schema(schema: Schema) -> Self {
            Self {
                schema,
                objects: Mutex::new(HashMap::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl ProviderService for MemoryProvider {
        fn schema(&self) -> ProviderSchema {
            ProviderSchema::new().with_resource("redshift_group", self.schema.clone())
        }

        async fn configure(&self, _config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
            Ok(vec![])
        }

        async fn validate_resource_config(
            &self,
            _resource_type: &str,
            config: Value,
        ) -> Result<Vec<Diagnostic>, ProviderError> {
            Ok(crate::validation::validate(&self.schema, &config))
        }

        async fn plan(
            &self,
            _resource_type: &str,
            prior: Option<Value>,
            proposed: Value,
            _config: Value,
        ) -> Result<PlanResult, ProviderError> {
            Ok(plan::plan(&self.schema, prior.as_ref(), &proposed))
        }

        async fn create(&self, _resource_type: &str, planned: Value) -> Result<Value, ProviderError> {
            let mut state = planned;
            let name = state["name"].as_str().unwrap_or_default().to_string();
            state["id"] = json!("100");
            self.objects.lock().await.insert(name, state.clone());
            Ok(state)
        }

        async fn read(&self, _resource_type: &str, state: Value) -> Result<Value, ProviderError> {
            let name = state["name"].as_str().unwrap_or_default();
            Ok(self.objects.lock().await.get(name).cloned().unwrap_or(Value::Null))
        }

        async fn update(&self, resource_type: &str, prior: Value, planned: Value) -> Result<Value, ProviderError> {
            self.delete(resource_type, prior).await?;
            self.create(resource_type, planned).await
        }

        async fn delete(&self, _resource_type: &str, state: Value) -> Result<(), ProviderError> {
            let name = state["name"].as_str().unwrap_or_default();
            self.objects.lock().await.remove(name);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_apply_and_destroy() {
        let tester = ProviderTester::new(MemoryProvider::default());
        let state = tester
            .apply("redshift_group", json!({"name": "analysts", "users": ["alice"]}))
            .await
            .unwrap();
        assert_eq!(state["id"], "100");

        tester.destroy("redshift_group", state.clone()).await.unwrap();
        assert!(tester.read("redshift_group", state).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lifecycle_updates_members_in_place() {
        let tester = ProviderTester::new(MemoryProvider::default());
        let state = tester
            .lifecycle(
                "redshift_group",
                json!({"name": "analysts", "users": ["alice"]}),
                json!({"name": "analysts", "users": ["alice", "bob"]}),
            )
            .await
            .unwrap();
        assert_eq!(state["users"], json!(["alice", "bob"]));
    }

    #[tokio::test]
    async fn test_apply_update_refuses_replacement() {
        let tester = ProviderTester::new(MemoryProvider::with_schema(datashare_schema()));
        let state = tester
            .apply("redshift_group", json!({"name": "sales"}))
            .await
            .unwrap();
        let err = tester
            .apply_update("redshift_group", state, json!({"name": "orders"}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("requires replacement"));
    }

    #[tokio::test]
    async fn test_apply_rejects_invalid_config() {
        let tester = ProviderTester::new(MemoryProvider::default());
        let err = tester.apply("redshift_group", json!({})).await.unwrap_err();
        assert!(matches!(err, TestError::Diagnostics(_)));
    }

    #[tokio::test]
    async fn test_default_import_is_unimplemented() {
        let tester = ProviderTester::new(MemoryProvider::default());
        let err = tester.import("redshift_group", "analysts").await.unwrap_err();
        assert!(matches!(err, ProviderError::Unimplemented(_)));
    }

    #[test]
    fn test_unique_name() {
        let a = unique_name("tf_user");
        let b = unique_name("tf_user");
        assert!(a.starts_with("tf_user_"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_error_assertions() {
        let diagnostics = vec![
            Diagnostic::warning("password is not set"),
            Diagnostic::error("Invalid privilege")
                .with_detail("`drop` is not valid on a schema")
                .with_attribute("privileges"),
        ];
        assert_has_errors(&diagnostics);
        assert_error_contains(&diagnostics, "drop");
        assert_error_at(&diagnostics, "privileges");
        assert_no_errors(&diagnostics[..1]);
    }

    #[test]
    #[should_panic(expected = "expected no errors")]
    fn test_assert_no_errors_panics() {
        assert_no_errors(&[Diagnostic::error("boom")]);
    }

    #[test]
    fn test_test_error_display() {
        let err = TestError::Diagnostics(vec![Diagnostic::error("Missing attribute")
            .with_detail("`name` is required")
            .with_attribute("name")]);
        let text = err.to_string();
        assert!(text.contains("1 error diagnostic(s)"));
        assert!(text.contains("`name` is required"));
        assert!(text.contains("(at name)"));
    }
}
