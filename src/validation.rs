//! Schema validation of configuration values.
//!
//! Checks a `serde_json::Value` against a [`Schema`] and reports every problem
//! as a [`Diagnostic`] whose `attribute` is the dotted path to the value.
//!
//! ```
//! use redshift_provider::schema::{Attribute, Schema};
//! use redshift_provider::validation::validate;
//! use serde_json::json;
//!
//! let schema = Schema::v0()
//!     .with_attribute("name", Attribute::required_string())
//!     .with_attribute(
//!         "syslog_access",
//!         Attribute::optional_string().with_allowed_values(&["RESTRICTED", "UNRESTRICTED"]),
//!     );
//!
//! assert!(validate(&schema, &json!({"name": "alice"})).is_empty());
//!
//! let diagnostics = validate(&schema, &json!({"name": "alice", "syslog_access": "OPEN"}));
//! assert_eq!(diagnostics.len(), 1);
//! assert_eq!(diagnostics[0].attribute, Some("syslog_access".to_string()));
//! ```

use crate::schema::{
    Attribute, AttributeType, Block, BlockNestingMode, Diagnostic, NestedBlock, Schema,
};
use serde_json::Value;

/// Validate a JSON value against a schema.
///
/// - Required attributes must be present and non-null
/// - Computed-only attributes are skipped
/// - Attribute types must match
/// - String attributes with allowed values must use one of them (case-insensitive)
/// - Attributes declaring `conflicts_with` may not be set alongside those siblings
/// - Nested blocks are validated recursively with min/max item constraints
pub fn validate(schema: &Schema, value: &Value) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    validate_block(&schema.block, value, "", &mut diagnostics);
    diagnostics
}

/// Like [`validate`], returning `Err` with the diagnostics when any were produced.
pub fn validate_result(schema: &Schema, value: &Value) -> Result<(), Vec<Diagnostic>> {
    let diagnostics = validate(schema, value);
    if diagnostics.is_empty() {
        Ok(())
    } else {
        Err(diagnostics)
    }
}

/// Check if a JSON value is valid against a schema.
pub fn is_valid(schema: &Schema, value: &Value) -> bool {
    validate(schema, value).is_empty()
}

/// Report an error unless exactly one of `names` is set (non-null, non-empty).
pub fn exactly_one_of(value: &Value, names: &[&str], diagnostics: &mut Vec<Diagnostic>) {
    let set: Vec<&str> = names
        .iter()
        .copied()
        .filter(|name| is_set(value.get(*name)))
        .collect();
    if set.len() != 1 {
        diagnostics.push(
            Diagnostic::error(format!("Exactly one of {} must be set", names.join(", ")))
                .with_detail(if set.is_empty() {
                    "None of them is set".to_string()
                } else {
                    format!("Got {}", set.join(", "))
                })
                .with_attribute(names[0]),
        );
    }
}

fn is_set(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(a)) => !a.is_empty(),
        Some(_) => true,
    }
}

fn validate_block(block: &Block, value: &Value, path: &str, diagnostics: &mut Vec<Diagnostic>) {
    let obj = match value {
        Value::Object(map) => map,
        Value::Null => return,
        _ => {
            let diagnostic =
                Diagnostic::error("Expected object").with_detail(format!("Got {}", type_name(value)));
            diagnostics.push(if path.is_empty() {
                diagnostic
            } else {
                diagnostic.with_attribute(path)
            });
            return;
        },
    };

    for (name, attr) in &block.attributes {
        let attr_path = join_path(path, name);
        validate_attribute(attr, obj.get(name), &attr_path, diagnostics);

        if is_set(obj.get(name)) {
            for other in &attr.conflicts_with {
                if is_set(obj.get(other)) {
                    diagnostics.push(
                        Diagnostic::error(format!(
                            "Conflicting attributes '{}' and '{}'",
                            attr_path,
                            join_path(path, other)
                        ))
                        .with_detail("Only one of these attributes may be set")
                        .with_attribute(&attr_path),
                    );
                }
            }
        }
    }

    for (name, nested) in &block.blocks {
        let block_path = join_path(path, name);
        validate_nested_block(nested, obj.get(name), &block_path, diagnostics);
    }
}

fn validate_attribute(
    attr: &Attribute,
    value: Option<&Value>,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    if attr.flags.is_computed_only() {
        return;
    }

    match value {
        None | Some(Value::Null) => {
            if attr.flags.required {
                diagnostics.push(
                    Diagnostic::error(format!("Missing required attribute '{}'", path))
                        .with_detail("This attribute is required and must be provided")
                        .with_attribute(path),
                );
            }
        },
        Some(v) => {
            if validate_attribute_type(&attr.attr_type, v, path, diagnostics) {
                validate_allowed_values(attr, v, path, diagnostics);
            }
        },
    }
}

/// Returns true if the value has the expected type.
fn validate_attribute_type(
    attr_type: &AttributeType,
    value: &Value,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) -> bool {
    let before = diagnostics.len();
    match attr_type {
        AttributeType::String => {
            if !value.is_string() {
                diagnostics.push(type_error(path, "string", value));
            }
        },
        AttributeType::Int64 => {
            if !is_int64(value) {
                diagnostics.push(type_error(path, "int64", value));
            }
        },
        AttributeType::Bool => {
            if !value.is_boolean() {
                diagnostics.push(type_error(path, "bool", value));
            }
        },
        AttributeType::List(element_type) | AttributeType::Set(element_type) => {
            if let Some(arr) = value.as_array() {
                for (i, elem) in arr.iter().enumerate() {
                    let elem_path = format!("{}.{}", path, i);
                    validate_attribute_type(element_type, elem, &elem_path, diagnostics);
                }
                if attr_type.is_set() {
                    for (i, elem) in arr.iter().enumerate() {
                        if arr[..i].contains(elem) {
                            diagnostics.push(
                                Diagnostic::error(format!("Duplicate value in set '{}'", path))
                                    .with_detail(format!("{} appears more than once", elem))
                                    .with_attribute(path),
                            );
                        }
                    }
                }
            } else {
                let expected = if attr_type.is_set() { "set" } else { "list" };
                diagnostics.push(type_error(path, expected, value));
            }
        },
    }
    diagnostics.len() == before
}

fn validate_allowed_values(
    attr: &Attribute,
    value: &Value,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    if attr.allowed_values.is_empty() {
        return;
    }
    let candidates: Vec<&str> = match value {
        Value::String(s) => vec![s.as_str()],
        Value::Array(items) => items.iter().filter_map(Value::as_str).collect(),
        _ => return,
    };
    for candidate in candidates {
        if !attr
            .allowed_values
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(candidate))
        {
            diagnostics.push(
                Diagnostic::error(format!("Invalid value for attribute '{}'", path))
                    .with_detail(format!(
                        "\"{}\" is not one of: {}",
                        candidate,
                        attr.allowed_values.join(", ")
                    ))
                    .with_attribute(path),
            );
        }
    }
}

fn validate_nested_block(
    nested: &NestedBlock,
    value: Option<&Value>,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let items: Vec<(String, &Value)> = match (nested.nesting_mode, value) {
        (_, None) | (_, Some(Value::Null)) => Vec::new(),
        (BlockNestingMode::Single, Some(v @ Value::Object(_))) => vec![(path.to_string(), v)],
        // A single block may also arrive wrapped in a one-element list.
        (_, Some(Value::Array(arr))) => arr
            .iter()
            .enumerate()
            .map(|(i, item)| {
                let item_path = match nested.nesting_mode {
                    BlockNestingMode::Single => path.to_string(),
                    BlockNestingMode::List => format!("{}.{}", path, i),
                };
                (item_path, item)
            })
            .collect(),
        (_, Some(v)) => {
            diagnostics.push(
                Diagnostic::error(format!("Invalid block '{}'", path))
                    .with_detail(format!("Got {}", type_name(v)))
                    .with_attribute(path),
            );
            return;
        },
    };

    let len = items.len() as u32;
    if len < nested.min_items {
        diagnostics.push(
            Diagnostic::error(format!(
                "Block '{}' requires at least {} item(s), got {}",
                path, nested.min_items, len
            ))
            .with_attribute(path),
        );
    }
    if nested.max_items > 0 && len > nested.max_items {
        diagnostics.push(
            Diagnostic::error(format!(
                "Block '{}' allows at most {} item(s), got {}",
                path, nested.max_items, len
            ))
            .with_attribute(path),
        );
    }

    for (item_path, item) in items {
        validate_block(&nested.block, item, &item_path, diagnostics);
    }
}

fn join_path(base: &str, name: &str) -> String {
    if base.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", base, name)
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn is_int64(value: &Value) -> bool {
    match value {
        Value::Number(n) => {
            n.as_i64().is_some()
                || n
                    .as_f64()
                    .map(|f| f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64)
                    .unwrap_or(false)
        },
        _ => false,
    }
}

fn type_error(path: &str, expected: &str, got: &Value) -> Diagnostic {
    Diagnostic::error(format!("Invalid type for attribute '{}'", path))
        .with_detail(format!("Expected {}, got {}", expected, type_name(got)))
        .with_attribute(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Attribute, Block, NestedBlock, Schema};
    use serde_json::json;

    fn user_schema() -> Schema {
        Schema::v0()
            .with_attribute("id", Attribute::computed_string())
            .with_attribute("name", Attribute::required_string())
            .with_attribute("password", Attribute::optional_string().sensitive())
            .with_attribute("connection_limit", Attribute::optional_int64())
            .with_attribute("superuser", Attribute::optional_bool())
            .with_attribute(
                "syslog_access",
                Attribute::optional_string().with_allowed_values(&["RESTRICTED", "UNRESTRICTED"]),
            )
    }

    #[test]
    fn test_validate_required_string() {
        let schema = user_schema();
        assert!(validate(&schema, &json!({"name": "alice"})).is_empty());

        let diagnostics = validate(&schema, &json!({}));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute, Some("name".to_string()));

        let diagnostics = validate(&schema, &json!({"name": null}));
        assert_eq!(diagnostics.len(), 1);

        let diagnostics = validate(&schema, &json!({"name": 123}));
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("Invalid type"));
    }

    #[test]
    fn test_computed_attributes_are_not_validated() {
        let schema = user_schema();
        // The host may send the computed id back with an unexpected type.
        assert!(validate(&schema, &json!({"name": "alice", "id": 100})).is_empty());
    }

    #[test]
    fn test_int_and_bool_types() {
        let schema = user_schema();
        assert!(validate(&schema, &json!({"name": "a", "connection_limit": -1})).is_empty());
        assert!(validate(&schema, &json!({"name": "a", "connection_limit": 10.0})).is_empty());

        let diagnostics = validate(&schema, &json!({"name": "a", "connection_limit": 1.5}));
        assert_eq!(diagnostics.len(), 1);

        let diagnostics = validate(&schema, &json!({"name": "a", "superuser": "yes"}));
        assert_eq!(diagnostics[0].attribute, Some("superuser".to_string()));
    }

    #[test]
    fn test_allowed_values_are_case_insensitive() {
        let schema = user_schema();
        assert!(validate(&schema, &json!({"name": "a", "syslog_access": "restricted"})).is_empty());

        let diagnostics = validate(&schema, &json!({"name": "a", "syslog_access": "OPEN"}));
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].detail.as_ref().unwrap().contains("OPEN"));
    }

    #[test]
    fn test_allowed_values_apply_to_set_elements() {
        let schema = Schema::v0().with_attribute(
            "privileges",
            Attribute::required_string_set().with_allowed_values(&["select", "insert"]),
        );
        assert!(validate(&schema, &json!({"privileges": ["SELECT", "insert"]})).is_empty());

        let diagnostics = validate(&schema, &json!({"privileges": ["select", "usage"]}));
        assert_eq!(diagnostics.len(), 1);
    }

    #[test]
    fn test_set_rejects_duplicates() {
        let schema = Schema::v0().with_attribute("users", Attribute::optional_string_set());
        let diagnostics = validate(&schema, &json!({"users": ["a", "b", "a"]}));
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("Duplicate"));

        let diagnostics = validate(&schema, &json!({"users": "a"}));
        assert!(diagnostics[0].detail.as_ref().unwrap().contains("Expected set"));
    }

    #[test]
    fn test_conflicts_with() {
        let schema = Schema::v0()
            .with_attribute(
                "account",
                Attribute::optional_string().with_conflicts_with(&["namespace"]),
            )
            .with_attribute("namespace", Attribute::optional_string());

        assert!(validate(&schema, &json!({"account": "123456789012"})).is_empty());

        let diagnostics = validate(
            &schema,
            &json!({"account": "123456789012", "namespace": "abc"}),
        );
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("Conflicting"));
    }

    #[test]
    fn test_exactly_one_of() {
        let mut diagnostics = Vec::new();
        exactly_one_of(&json!({"user": "a"}), &["user", "group", "role"], &mut diagnostics);
        assert!(diagnostics.is_empty());

        exactly_one_of(&json!({"user": "a", "group": "g"}), &["user", "group", "role"], &mut diagnostics);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].detail.as_deref(), Some("Got user, group"));

        let mut diagnostics = Vec::new();
        exactly_one_of(&json!({"user": ""}), &["user", "group", "role"], &mut diagnostics);
        assert_eq!(diagnostics[0].detail.as_deref(), Some("None of them is set"));
    }

    #[test]
    fn test_single_block() {
        let schema = Schema::v0().with_block(
            "datashare_source",
            NestedBlock::single(
                Block::new()
                    .with_attribute("share_name", Attribute::required_string())
                    .with_attribute("namespace", Attribute::required_string()),
            ),
        );

        assert!(validate(&schema, &json!({})).is_empty());
        assert!(validate(
            &schema,
            &json!({"datashare_source": {"share_name": "s", "namespace": "n"}})
        )
        .is_empty());
        assert!(validate(
            &schema,
            &json!({"datashare_source": [{"share_name": "s", "namespace": "n"}]})
        )
        .is_empty());

        let diagnostics = validate(&schema, &json!({"datashare_source": {"share_name": "s"}}));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(
            diagnostics[0].attribute,
            Some("datashare_source.namespace".to_string())
        );

        let diagnostics = validate(&schema, &json!({"datashare_source": [{}, {}]}));
        assert!(diagnostics.iter().any(|d| d.summary.contains("at most 1")));
    }

    #[test]
    fn test_list_block_min_items() {
        let schema = Schema::v0().with_block(
            "items",
            NestedBlock::list(Block::new().with_attribute("v", Attribute::required_string()))
                .with_min_items(1),
        );
        let diagnostics = validate(&schema, &json!({"items": []}));
        assert_eq!(diagnostics.len(), 1);

        let diagnostics = validate(&schema, &json!({"items": [{"v": 1}]}));
        assert_eq!(diagnostics[0].attribute, Some("items.0.v".to_string()));
    }

    #[test]
    fn test_validate_result_and_is_valid() {
        let schema = user_schema();
        assert!(is_valid(&schema, &json!({"name": "a"})));
        assert!(validate_result(&schema, &json!({})).is_err());
        assert!(!is_valid(&schema, &json!("not an object")));
    }
}
