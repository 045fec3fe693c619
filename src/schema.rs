//! C3 — Schema Generator (spec.md §4.3).
//!
//! Derives the client-visible JSON Schema of a tool from the backend's
//! schema plus its `ArgumentMapping`. Pure; never suspends.

use serde_json::{Map, Value};

use crate::log_warn;
use crate::mapping::{ArgumentMapping, ParameterMapping};

/// Generate the client schema per §4.3's four numbered steps.
pub fn generate_client_schema(backend_schema: &Value, mapping: Option<&ArgumentMapping>) -> Value {
    let Some(backend_obj) = backend_schema.as_object() else {
        return backend_schema.clone();
    };

    // Step 1: copy all top-level fields except `properties` and `required`.
    let mut client = Map::new();
    for (key, value) in backend_obj {
        if key != "properties" && key != "required" {
            client.insert(key.clone(), value.clone());
        }
    }

    let backend_properties = backend_obj
        .get("properties")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    let backend_required: Vec<String> = backend_obj
        .get("required")
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default();

    let mut client_properties = Map::new();
    let mut client_required = Vec::new();
    let mut handled_backend_params = std::collections::HashSet::new();

    if let Some(mapping) = mapping {
        for (backend_param, param_mapping) in &mapping.mappings {
            // Step 4: mapping entries referencing a non-existent backend
            // property are logged and skipped (soft error).
            let Some(backend_property) = backend_properties.get(backend_param) else {
                log_warn!(
                    backend_param = %backend_param,
                    "argument mapping references a backend property that does not exist; skipping"
                );
                continue;
            };
            handled_backend_params.insert(backend_param.clone());

            match param_mapping {
                ParameterMapping::Constant { .. } | ParameterMapping::Omit => {
                    // Step 2: drop from client schema entirely.
                }
                ParameterMapping::Passthrough { .. }
                | ParameterMapping::Rename { .. }
                | ParameterMapping::Default { .. } => {
                    let client_name = client_facing_name(param_mapping, backend_param);
                    let mut property = backend_property.clone();
                    if let Some(desc) = param_mapping.description_override()
                        && let Some(obj) = property.as_object_mut()
                    {
                        obj.insert("description".to_string(), Value::String(desc.to_string()));
                    }
                    client_properties.insert(client_name.clone(), property);

                    let is_required = match param_mapping {
                        ParameterMapping::Passthrough { .. } | ParameterMapping::Rename { .. } => {
                            backend_required.contains(backend_param)
                        }
                        // `default` is always optional.
                        ParameterMapping::Default { .. } => false,
                        _ => unreachable!(),
                    };
                    if is_required {
                        client_required.push(client_name);
                    }
                }
            }
        }
    }

    // Step 3: backend properties not mentioned in mappings are copied
    // through unchanged, preserving their required status.
    for (name, property) in &backend_properties {
        if handled_backend_params.contains(name) {
            continue;
        }
        client_properties.insert(name.clone(), property.clone());
        if backend_required.contains(name) {
            client_required.push(name.clone());
        }
    }

    client.insert("properties".to_string(), Value::Object(client_properties));
    if !client_required.is_empty() {
        client.insert(
            "required".to_string(),
            Value::Array(client_required.into_iter().map(Value::String).collect()),
        );
    }

    Value::Object(client)
}

fn client_facing_name(mapping: &ParameterMapping, backend_param: &str) -> String {
    match mapping {
        ParameterMapping::Rename { name, .. } => name.clone(),
        ParameterMapping::Default { source, .. } => source.clone(),
        _ => backend_param.to_string(),
    }
}
