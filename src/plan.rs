//! Schema-driven planning.
//!
//! Every resource plans the same way: the proposed configuration is merged
//! with the prior state according to the attribute flags in its [`Schema`],
//! and each attribute whose value differs becomes an [`AttributeChange`].

use crate::schema::{AttributeType, Block, BlockNestingMode, NestedBlock, Schema};
use crate::types::{AttributeChange, PlanResult};
use serde_json::{Map, Value};

/// Compute the plan for one resource instance.
///
/// - `prior == None` plans a create.
/// - `proposed == Null` plans a destroy.
/// - Otherwise an update: configurable-and-computed attributes left unset keep
///   their prior value, computed-only attributes always do, and
///   `requires_replace` is set when a `force_new` attribute or block changes.
pub fn plan(schema: &Schema, prior: Option<&Value>, proposed: &Value) -> PlanResult {
    match prior {
        None | Some(Value::Null) => plan_create(schema, proposed),
        Some(prior) if proposed.is_null() => plan_destroy(prior),
        Some(prior) => plan_update(schema, prior, proposed),
    }
}

fn plan_create(schema: &Schema, proposed: &Value) -> PlanResult {
    let mut planned = as_object(proposed);
    apply_defaults(&schema.block, &mut planned);

    for (name, attr) in &schema.block.attributes {
        if attr.flags.is_computed_only() {
            // Unknown until the object exists.
            planned.insert(name.clone(), Value::Null);
        }
    }

    let changes = sorted_keys(&planned)
        .into_iter()
        .filter(|name| !planned[name.as_str()].is_null())
        .map(|name| AttributeChange::added(name.clone(), planned[name.as_str()].clone()))
        .collect();

    PlanResult::with_changes(Value::Object(planned), changes, false)
}

fn plan_destroy(prior: &Value) -> PlanResult {
    let prior = as_object(prior);
    let changes = sorted_keys(&prior)
        .into_iter()
        .filter(|name| !prior[name.as_str()].is_null())
        .map(|name| AttributeChange::removed(name.clone(), prior[name.as_str()].clone()))
        .collect();
    PlanResult::with_changes(Value::Null, changes, false)
}

fn plan_update(schema: &Schema, prior: &Value, proposed: &Value) -> PlanResult {
    let prior = as_object(prior);
    let mut planned = as_object(proposed);
    apply_defaults(&schema.block, &mut planned);

    for (name, attr) in &schema.block.attributes {
        let unset = planned.get(name).map_or(true, Value::is_null);
        if attr.flags.is_computed_only() || (attr.flags.computed && unset) {
            planned.insert(
                name.clone(),
                prior.get(name).cloned().unwrap_or(Value::Null),
            );
        }
    }

    let mut changes = Vec::new();
    let mut requires_replace = false;

    let mut names: Vec<&String> = schema.block.attributes.keys().collect();
    names.sort();
    for name in names {
        let attr = &schema.block.attributes[name];
        let before = prior.get(name).unwrap_or(&Value::Null);
        let after = planned.get(name).unwrap_or(&Value::Null);
        if values_equal(&attr.attr_type, before, after) {
            continue;
        }
        requires_replace |= attr.force_new;
        changes.push(change(name, before, after));
    }

    let mut blocks: Vec<&String> = schema.block.blocks.keys().collect();
    blocks.sort();
    for name in blocks {
        let nested = &schema.block.blocks[name];
        if nested_equal(nested, prior.get(name), planned.get(name)) {
            continue;
        }
        let before = normalize_block(nested.nesting_mode, prior.get(name));
        let after = normalize_block(nested.nesting_mode, planned.get(name));
        requires_replace |= nested.force_new;
        changes.push(change(name, &before, &after));
    }

    if requires_replace {
        for (name, attr) in &schema.block.attributes {
            if attr.flags.is_computed_only() {
                planned.insert(name.clone(), Value::Null);
            }
        }
    }

    PlanResult::with_changes(Value::Object(planned), changes, requires_replace)
}

fn change(name: &str, before: &Value, after: &Value) -> AttributeChange {
    match (before.is_null(), after.is_null()) {
        (true, _) => AttributeChange::added(name, after.clone()),
        (false, true) => AttributeChange::removed(name, before.clone()),
        (false, false) => AttributeChange::modified(name, before.clone(), after.clone()),
    }
}

fn apply_defaults(block: &Block, values: &mut Map<String, Value>) {
    for (name, attr) in &block.attributes {
        if let Some(default) = &attr.default {
            let unset = values.get(name).map_or(true, Value::is_null);
            if unset {
                values.insert(name.clone(), default.clone());
            }
        }
    }
}

/// Compare two attribute values; sets ignore order, and an empty collection
/// equals null.
pub fn values_equal(attr_type: &AttributeType, a: &Value, b: &Value) -> bool {
    match attr_type {
        AttributeType::Set(_) | AttributeType::List(_) => {
            let a = collection(a);
            let b = collection(b);
            if attr_type.is_set() {
                let mut a: Vec<String> = a.iter().map(Value::to_string).collect();
                let mut b: Vec<String> = b.iter().map(Value::to_string).collect();
                a.sort();
                b.sort();
                a == b
            } else {
                a == b
            }
        },
        _ => a == b,
    }
}

fn collection(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.clone(),
        Value::Null => Vec::new(),
        other => vec![other.clone()],
    }
}

/// Compare nested block values attribute by attribute. Defaults apply,
/// computed attributes left unset match anything, and single blocks may be an
/// object or a one-element list.
fn nested_equal(nested: &NestedBlock, before: Option<&Value>, after: Option<&Value>) -> bool {
    match nested.nesting_mode {
        BlockNestingMode::Single => {
            let before = normalize_block(BlockNestingMode::Single, before);
            let after = normalize_block(BlockNestingMode::Single, after);
            match (before.is_null(), after.is_null()) {
                (true, true) => true,
                (false, false) => block_equal(&nested.block, &before, &after),
                _ => false,
            }
        },
        BlockNestingMode::List => {
            let before = collection(before.unwrap_or(&Value::Null));
            let after = collection(after.unwrap_or(&Value::Null));
            before.len() == after.len()
                && before
                    .iter()
                    .zip(&after)
                    .all(|(b, a)| block_equal(&nested.block, b, a))
        },
    }
}

fn block_equal(block: &Block, before: &Value, after: &Value) -> bool {
    let mut before = as_object(before);
    let mut after = as_object(after);
    apply_defaults(block, &mut before);
    apply_defaults(block, &mut after);

    let attributes_equal = block.attributes.iter().all(|(name, attr)| {
        let b = before.get(name).unwrap_or(&Value::Null);
        let a = after.get(name).unwrap_or(&Value::Null);
        (attr.flags.computed && a.is_null()) || values_equal(&attr.attr_type, b, a)
    });
    attributes_equal
        && block
            .blocks
            .iter()
            .all(|(name, nested)| nested_equal(nested, before.get(name), after.get(name)))
}

/// Single blocks may arrive as an object or as a one-element list.
fn normalize_block(mode: BlockNestingMode, value: Option<&Value>) -> Value {
    match (mode, value) {
        (_, None) | (_, Some(Value::Null)) => Value::Null,
        (BlockNestingMode::Single, Some(Value::Array(items))) => {
            items.first().cloned().unwrap_or(Value::Null)
        },
        (BlockNestingMode::List, Some(Value::Array(items))) if items.is_empty() => Value::Null,
        (_, Some(v)) => v.clone(),
    }
}

fn as_object(value: &Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    }
}

fn sorted_keys(map: &Map<String, Value>) -> Vec<String> {
    let mut keys: Vec<String> = map.keys().cloned().collect();
    keys.sort();
    keys
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Attribute, Block, NestedBlock};
    use serde_json::json;

    fn group_schema() -> Schema {
        Schema::v0()
            .with_attribute("id", Attribute::computed_string())
            .with_attribute("name", Attribute::required_string())
            .with_attribute("users", Attribute::optional_string_set())
    }

    #[test]
    fn test_plan_create_marks_computed_unknown() {
        let plan = plan(&group_schema(), None, &json!({"name": "analysts", "users": ["a"]}));
        assert!(!plan.requires_replace);
        assert_eq!(plan.planned_state["id"], Value::Null);
        let paths: Vec<&str> = plan.changes.iter().map(|c| c.path.as_str()).collect();
        assert_eq!(paths, vec!["name", "users"]);
    }

    #[test]
    fn test_plan_create_applies_defaults() {
        let schema = Schema::v0()
            .with_attribute("name", Attribute::required_string())
            .with_attribute(
                "connection_limit",
                Attribute::optional_int64().with_default(json!(-1)),
            );
        let plan = plan(&schema, None, &json!({"name": "alice"}));
        assert_eq!(plan.planned_state["connection_limit"], json!(-1));
    }

    #[test]
    fn test_plan_update_ignores_set_order() {
        let prior = json!({"id": "100", "name": "analysts", "users": ["a", "b"]});
        let proposed = json!({"name": "analysts", "users": ["b", "a"]});
        let plan = plan(&group_schema(), Some(&prior), &proposed);
        assert!(plan.changes.is_empty());
        assert_eq!(plan.planned_state["id"], "100");
    }

    #[test]
    fn test_plan_update_empty_set_equals_null() {
        let prior = json!({"id": "100", "name": "analysts", "users": []});
        let proposed = json!({"name": "analysts"});
        let plan = plan(&group_schema(), Some(&prior), &proposed);
        assert!(plan.changes.is_empty());
    }

    #[test]
    fn test_plan_update_in_place() {
        let prior = json!({"id": "100", "name": "analysts", "users": ["a"]});
        let proposed = json!({"name": "analytics", "users": ["a"]});
        let plan = plan(&group_schema(), Some(&prior), &proposed);
        assert_eq!(plan.changes.len(), 1);
        assert_eq!(plan.changes[0].path, "name");
        assert!(!plan.requires_replace);
        assert_eq!(plan.planned_state["id"], "100");
    }

    #[test]
    fn test_plan_update_force_new_replaces() {
        let schema = Schema::v0()
            .with_attribute("id", Attribute::computed_string())
            .with_attribute("object_type", Attribute::required_string().with_force_new());
        let prior = json!({"id": "x", "object_type": "table"});
        let plan = plan(&schema, Some(&prior), &json!({"object_type": "schema"}));
        assert!(plan.requires_replace);
        assert_eq!(plan.planned_state["id"], Value::Null);
    }

    #[test]
    fn test_plan_optional_computed_keeps_prior() {
        let schema = Schema::v0()
            .with_attribute("name", Attribute::required_string())
            .with_attribute("owner", Attribute::optional_computed_string());
        let prior = json!({"name": "dev", "owner": "admin"});
        let plan = plan(&schema, Some(&prior), &json!({"name": "dev"}));
        assert!(plan.changes.is_empty());
        assert_eq!(plan.planned_state["owner"], "admin");
    }

    #[test]
    fn test_plan_block_change_forces_replacement() {
        let schema = Schema::v0()
            .with_attribute("name", Attribute::required_string())
            .with_block(
                "datashare_source",
                NestedBlock::single(
                    Block::new().with_attribute("share_name", Attribute::required_string()),
                )
                .with_force_new(),
            );
        let prior = json!({"name": "db", "datashare_source": [{"share_name": "a"}]});

        let same = plan(
            &schema,
            Some(&prior),
            &json!({"name": "db", "datashare_source": {"share_name": "a"}}),
        );
        assert!(same.changes.is_empty());

        let changed = plan(
            &schema,
            Some(&prior),
            &json!({"name": "db", "datashare_source": {"share_name": "b"}}),
        );
        assert!(changed.requires_replace);
    }

    #[test]
    fn test_plan_nested_block_defaults_and_computed() {
        let source = Block::new()
            .with_attribute("region", Attribute::optional_computed_string())
            .with_attribute(
                "create_database",
                Attribute::optional_bool().with_default(json!(false)),
            );
        let schema = Schema::v0()
            .with_attribute("name", Attribute::required_string())
            .with_block(
                "external",
                NestedBlock::single(
                    Block::new()
                        .with_attribute("database_name", Attribute::required_string())
                        .with_block("source", NestedBlock::single(source)),
                )
                .with_force_new(),
            );
        let prior = json!({
            "name": "s",
            "external": {
                "database_name": "lake",
                "source": {"region": "us-east-1", "create_database": false}
            }
        });
        let proposed = json!({
            "name": "s",
            "external": [{"database_name": "lake", "source": [{}]}]
        });
        let plan = plan(&schema, Some(&prior), &proposed);
        assert!(plan.changes.is_empty());
        assert!(!plan.requires_replace);
    }

    #[test]
    fn test_plan_destroy() {
        let prior = json!({"id": "100", "name": "analysts", "users": null});
        let plan = plan(&group_schema(), Some(&prior), &Value::Null);
        assert_eq!(plan.planned_state, Value::Null);
        assert_eq!(plan.changes.len(), 2);
        assert!(plan.changes.iter().all(|c| c.after.is_none()));
    }
}
