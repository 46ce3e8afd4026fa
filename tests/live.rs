//! Tests against a real cluster.
//!
//! Run with the connection in the environment:
//!
//! ```bash
//! REDSHIFT_HOST=... REDSHIFT_USER=... REDSHIFT_PASSWORD=... REDSHIFT_DATABASE=dev \
//!     cargo test --test live -- --ignored --test-threads=1
//! ```

use redshift_provider::testing::{assert_plan_no_changes, unique_name, ProviderTester};
use serde_json::{json, Value};

async fn tester() -> Option<ProviderTester> {
    let _ = redshift_provider::try_init_logging();
    ProviderTester::from_env().await.expect("configure provider")
}

async fn assert_converged(tester: &ProviderTester, resource_type: &str, config: Value, state: &Value) {
    let plan = tester
        .plan_update(resource_type, state.clone(), config)
        .await
        .unwrap();
    assert_plan_no_changes(&plan);
}

#[tokio::test]
#[ignore]
async fn user_lifecycle() {
    let Some(tester) = tester().await else { return };
    let name = unique_name("tf_user");

    let config = json!({"name": name, "password": "Passw0rdOne", "connection_limit": 3});
    let state = tester.apply("redshift_user", config.clone()).await.unwrap();
    assert_eq!(state["connection_limit"], 3);
    assert_converged(&tester, "redshift_user", config, &state).await;

    let updated = tester
        .apply_update(
            "redshift_user",
            state,
            json!({"name": name, "password": "Passw0rdTwo", "create_database": true}),
        )
        .await
        .unwrap();
    assert_eq!(updated["create_database"], true);

    let looked_up = tester
        .read_data_source("redshift_user", json!({"name": name}))
        .await
        .unwrap();
    assert_eq!(looked_up["id"], updated["id"]);
    assert!(looked_up.get("password").is_none());

    tester.destroy("redshift_user", updated).await.unwrap();
}

#[tokio::test]
#[ignore]
async fn group_membership_and_import() {
    let Some(tester) = tester().await else { return };
    let user = tester
        .apply(
            "redshift_user",
            json!({"name": unique_name("tf_member"), "password": "Passw0rdOne"}),
        )
        .await
        .unwrap();
    let user_name = user["name"].as_str().unwrap().to_string();
    let group_name = unique_name("tf_group");

    let config = json!({"name": group_name, "users": [user_name]});
    let group = tester.apply("redshift_group", config.clone()).await.unwrap();
    assert_eq!(group["users"], json!([user_name]));
    assert_converged(&tester, "redshift_group", config, &group).await;

    let imported = tester.import("redshift_group", &group_name).await.unwrap();
    assert_eq!(imported[0].state["id"], group["id"]);

    tester.destroy("redshift_group", group).await.unwrap();
    tester.destroy("redshift_user", user).await.unwrap();
}

#[tokio::test]
#[ignore]
async fn schema_grant_and_default_privileges() {
    let Some(tester) = tester().await else { return };
    let group = tester
        .apply("redshift_group", json!({"name": unique_name("tf_readers")}))
        .await
        .unwrap();
    let group_name = group["name"].as_str().unwrap().to_string();
    let schema = tester
        .apply("redshift_schema", json!({"name": unique_name("tf_schema"), "quota": 100}))
        .await
        .unwrap();
    let schema_name = schema["name"].as_str().unwrap().to_string();
    assert_eq!(schema["quota"], 100);

    let usage = json!({
        "group": group_name,
        "schema": schema_name,
        "object_type": "schema",
        "privileges": ["usage"],
    });
    let usage_grant = tester.apply("redshift_grant", usage.clone()).await.unwrap();
    assert_converged(&tester, "redshift_grant", usage, &usage_grant).await;

    let tables = json!({
        "group": group_name,
        "schema": schema_name,
        "object_type": "table",
        "privileges": ["select"],
    });
    let defaults = tester
        .apply("redshift_default_privileges", tables.clone())
        .await
        .unwrap();
    assert_converged(&tester, "redshift_default_privileges", tables, &defaults).await;

    tester
        .destroy("redshift_default_privileges", defaults)
        .await
        .unwrap();
    tester.destroy("redshift_grant", usage_grant).await.unwrap();
    tester.destroy("redshift_schema", schema).await.unwrap();
    tester.destroy("redshift_group", group).await.unwrap();
}

#[tokio::test]
#[ignore]
async fn datashare_lifecycle() {
    let Some(tester) = tester().await else { return };
    let schema = tester
        .apply("redshift_schema", json!({"name": unique_name("tf_shared")}))
        .await
        .unwrap();
    let schema_name = schema["name"].as_str().unwrap().to_string();
    let share_name = unique_name("tf_share");

    let config = json!({"name": share_name, "schemas": [schema_name]});
    let share = tester.apply("redshift_datashare", config.clone()).await.unwrap();
    assert!(share["producer_namespace"].is_string());
    assert_converged(&tester, "redshift_datashare", config, &share).await;

    let namespace = tester
        .read_data_source("redshift_namespace", json!({}))
        .await
        .unwrap();
    assert_eq!(namespace["id"], share["producer_namespace"]);

    tester.destroy("redshift_datashare", share).await.unwrap();
    tester.destroy("redshift_schema", schema).await.unwrap();
}
