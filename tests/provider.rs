//! Provider behaviour that needs no cluster: schemas, validation and planning.

use redshift_provider::testing::{
    assert_error_at, assert_error_contains, assert_has_errors, assert_no_errors,
    assert_plan_changes_attribute, assert_plan_creates, assert_plan_does_not_change_attribute,
    assert_plan_no_changes, assert_plan_replaces, assert_plan_updates_in_place, ProviderTester,
    TestError,
};
use redshift_provider::ProviderError;
use serde_json::{json, Value};

const RESOURCES: &[&str] = &[
    "redshift_database",
    "redshift_datashare",
    "redshift_datashare_privilege",
    "redshift_default_privileges",
    "redshift_grant",
    "redshift_group",
    "redshift_role",
    "redshift_schema",
    "redshift_user",
];

const DATA_SOURCES: &[&str] = &[
    "redshift_database",
    "redshift_datashare",
    "redshift_group",
    "redshift_namespace",
    "redshift_schema",
    "redshift_user",
];

fn provider_config() -> Value {
    json!({
        "host": "examplecluster.abc123xyz789.us-west-2.redshift.amazonaws.com",
        "username": "admin",
        "password": "Secret123",
        "database": "dev",
    })
}

#[test]
fn metadata_lists_every_type_sorted() {
    let tester = ProviderTester::redshift();
    assert_eq!(tester.resource_types(), RESOURCES);
    assert_eq!(tester.data_source_types(), DATA_SOURCES);
}

#[test]
fn every_resource_has_computed_id() {
    let schema = ProviderTester::redshift().schema();
    for name in RESOURCES {
        let id = schema.resources[*name]
            .attribute("id")
            .unwrap_or_else(|| panic!("{} has no id", name));
        assert!(id.flags.is_computed_only(), "{}", name);
    }
}

#[test]
fn secrets_are_sensitive() {
    let schema = ProviderTester::redshift().schema();
    assert!(schema.provider.attribute("password").unwrap().flags.sensitive);
    assert!(
        schema.resources["redshift_user"]
            .attribute("password")
            .unwrap()
            .flags
            .sensitive
    );
    assert!(schema.data_sources["redshift_user"].attribute("password").is_none());
}

#[tokio::test]
async fn provider_config_validation() {
    let tester = ProviderTester::redshift();
    tester
        .validate_provider_config(provider_config())
        .await
        .unwrap();

    let mut config = provider_config();
    config["port"] = json!(70000);
    config["sslmode"] = json!("always");
    let err = tester.validate_provider_config(config).await.unwrap_err();
    match err {
        TestError::Diagnostics(diagnostics) => assert_has_errors(&diagnostics),
        other => panic!("unexpected {}", other),
    }
}

#[tokio::test]
async fn unconfigured_provider_refuses_database_work() {
    let tester = ProviderTester::redshift();
    let err = tester
        .create("redshift_role", json!({"name": "analyst"}))
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::Configuration(_)));

    let err = tester
        .read_data_source("redshift_namespace", json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::Configuration(_)));
}

#[tokio::test]
async fn unknown_types_are_rejected() {
    let tester = ProviderTester::redshift();
    let err = tester
        .plan_create("redshift_table", json!({"name": "t"}))
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::UnknownResource(_)));
}

#[tokio::test]
async fn user_validation() {
    let tester = ProviderTester::redshift();
    tester
        .validate_resource_config(
            "redshift_user",
            json!({"name": "alice", "password": "Passw0rdOK", "connection_limit": 5}),
        )
        .await
        .unwrap();

    let diagnostics = tester
        .resource_diagnostics(
            "redshift_user",
            json!({"name": "root", "superuser": true, "password": "short"}),
        )
        .await
        .unwrap();
    assert_error_contains(&diagnostics, "Invalid password");
    assert_error_at(&diagnostics, "password");

    let diagnostics = tester
        .resource_diagnostics("redshift_user", json!({"name": "root", "superuser": true}))
        .await
        .unwrap();
    assert_error_contains(&diagnostics, "Superusers must have a password");
}

#[tokio::test]
async fn grant_validation() {
    let tester = ProviderTester::redshift();
    tester
        .validate_resource_config(
            "redshift_grant",
            json!({
                "group": "analysts",
                "schema": "sales",
                "object_type": "table",
                "privileges": ["select", "insert"],
            }),
        )
        .await
        .unwrap();

    let diagnostics = tester
        .resource_diagnostics(
            "redshift_grant",
            json!({
                "user": "alice",
                "group": "analysts",
                "object_type": "table",
                "privileges": ["select"],
            }),
        )
        .await
        .unwrap();
    assert_error_contains(&diagnostics, "Exactly one of user, group, role");
    assert_error_contains(&diagnostics, "schema is required");

    let diagnostics = tester
        .resource_diagnostics(
            "redshift_grant",
            json!({
                "role": "etl",
                "schema": "sales",
                "object_type": "schema",
                "privileges": ["select"],
            }),
        )
        .await
        .unwrap();
    assert_error_at(&diagnostics, "privileges");
}

#[tokio::test]
async fn grant_object_type_must_be_known() {
    let tester = ProviderTester::redshift();
    let diagnostics = tester
        .resource_diagnostics(
            "redshift_grant",
            json!({"user": "alice", "object_type": "view", "privileges": ["select"]}),
        )
        .await
        .unwrap();
    assert_error_at(&diagnostics, "object_type");
}

#[tokio::test]
async fn datashare_privilege_needs_one_consumer() {
    let tester = ProviderTester::redshift();
    let diagnostics = tester
        .resource_diagnostics("redshift_datashare_privilege", json!({"share_name": "sales"}))
        .await
        .unwrap();
    assert_error_contains(&diagnostics, "Exactly one of account, namespace");

    tester
        .validate_resource_config(
            "redshift_datashare_privilege",
            json!({"share_name": "sales", "account": "123456789012"}),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn external_schema_needs_one_source() {
    let tester = ProviderTester::redshift();
    let diagnostics = tester
        .resource_diagnostics(
            "redshift_schema",
            json!({"name": "spectrum", "external_schema": {"database_name": "lake"}}),
        )
        .await
        .unwrap();
    assert_error_at(&diagnostics, "external_schema");

    let diagnostics = tester
        .resource_diagnostics(
            "redshift_schema",
            json!({
                "name": "spectrum",
                "external_schema": {
                    "database_name": "lake",
                    "data_catalog_source": {
                        "iam_role_arns": ["arn:aws:iam::123456789012:role/spectrum"],
                    },
                },
            }),
        )
        .await
        .unwrap();
    assert_no_errors(&diagnostics);
}

#[tokio::test]
async fn data_source_needs_name() {
    let tester = ProviderTester::redshift();
    assert!(tester
        .validate_data_source_config("redshift_user", json!({}))
        .await
        .is_err());
    tester
        .validate_data_source_config("redshift_namespace", json!({}))
        .await
        .unwrap();
}

#[tokio::test]
async fn plan_create_user_leaves_computed_unknown() {
    let tester = ProviderTester::redshift();
    let plan = tester
        .plan_create("redshift_user", json!({"name": "alice"}))
        .await
        .unwrap();
    assert_plan_creates(&plan);
    assert!(plan.planned_state["id"].is_null());
    assert_plan_changes_attribute(&plan, "name");
}

#[tokio::test]
async fn plan_group_membership_in_place() {
    let tester = ProviderTester::redshift();
    let prior = json!({"id": "104", "name": "analysts", "users": ["alice", "bob"]});

    let plan = tester
        .plan_update(
            "redshift_group",
            prior.clone(),
            json!({"name": "analysts", "users": ["bob", "alice"]}),
        )
        .await
        .unwrap();
    assert_plan_no_changes(&plan);
    assert_eq!(plan.planned_state["id"], "104");

    let plan = tester
        .plan_update(
            "redshift_group",
            prior,
            json!({"name": "analysts", "users": ["alice"]}),
        )
        .await
        .unwrap();
    assert_plan_updates_in_place(&plan);
    assert_plan_changes_attribute(&plan, "users");
}

#[tokio::test]
async fn plan_grant_target_change_replaces() {
    let tester = ProviderTester::redshift();
    let prior = json!({
        "id": "gn:analysts_sales_noobj_table",
        "group": "analysts",
        "schema": "sales",
        "object_type": "table",
        "objects": [],
        "privileges": ["select"],
    });

    let plan = tester
        .plan_update(
            "redshift_grant",
            prior.clone(),
            json!({
                "group": "analysts",
                "schema": "sales",
                "object_type": "table",
                "privileges": ["select", "update"],
            }),
        )
        .await
        .unwrap();
    assert_plan_updates_in_place(&plan);
    assert_plan_does_not_change_attribute(&plan, "objects");

    let plan = tester
        .plan_update(
            "redshift_grant",
            prior,
            json!({
                "group": "analysts",
                "schema": "marketing",
                "object_type": "table",
                "privileges": ["select"],
            }),
        )
        .await
        .unwrap();
    assert_plan_replaces(&plan);
    assert!(plan.planned_state["id"].is_null());
}

#[tokio::test]
async fn plan_external_schema_block() {
    let tester = ProviderTester::redshift();
    let prior = json!({
        "id": "108",
        "name": "spectrum",
        "owner": "admin",
        "quota": null,
        "cascade_on_delete": false,
        "external_schema": {
            "database_name": "lake",
            "data_catalog_source": {
                "region": "us-west-2",
                "iam_role_arns": ["arn:aws:iam::123456789012:role/spectrum"],
                "catalog_role_arns": [],
                "create_external_database_if_not_exists": false,
            },
            "redshift_source": null,
        },
    });

    // Region is computed and the block may arrive as a one-element list.
    let plan = tester
        .plan_update(
            "redshift_schema",
            prior.clone(),
            json!({
                "name": "spectrum",
                "external_schema": [{
                    "database_name": "lake",
                    "data_catalog_source": [{
                        "iam_role_arns": ["arn:aws:iam::123456789012:role/spectrum"],
                    }],
                }],
            }),
        )
        .await
        .unwrap();
    assert_plan_does_not_change_attribute(&plan, "external_schema");

    let plan = tester
        .plan_update(
            "redshift_schema",
            prior,
            json!({
                "name": "spectrum",
                "external_schema": {
                    "database_name": "lake_v2",
                    "data_catalog_source": {
                        "iam_role_arns": ["arn:aws:iam::123456789012:role/spectrum"],
                    },
                },
            }),
        )
        .await
        .unwrap();
    assert_plan_replaces(&plan);
    assert_plan_changes_attribute(&plan, "external_schema");
}

#[tokio::test]
async fn plan_delete_removes_everything() {
    let tester = ProviderTester::redshift();
    let plan = tester
        .plan_delete("redshift_role", json!({"id": "5", "name": "analyst"}))
        .await
        .unwrap();
    assert!(plan.planned_state.is_null());
    assert_eq!(plan.changes.len(), 2);
}
