//! C5 — Group Manager / Router (spec.md §4.5, §4.6).
//!
//! Loads `groups.json`, validates a group's invariants, composes the virtual
//! catalog presented to the client, and routes `tools/call` /
//! `resources/read` / `prompts/get` through the first matching entry.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use rmcp::model::{Prompt, PromptArgument, Resource, ResourceTemplate, Tool};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::backend::Catalog;
use crate::error::ProxyError;
use crate::log_warn;
use crate::mapping::{self, ArgumentMapping};
use crate::uri_template;

/// `{ serverName, originalName, name?, description?, inputSchema?, argumentMapping? }` (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ToolOverride {
    pub server_name: String,
    pub original_name: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub input_schema: Option<Value>,
    #[serde(default)]
    pub argument_mapping: Option<ArgumentMapping>,
}

impl ToolOverride {
    pub fn client_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.original_name)
    }
}

/// `{ serverName, uri, name?, description?, mimeType? }` (spec.md §3).
///
/// `uri` both selects the backend resource (by exact match, or by template
/// shape) and is what the client sees — this repo does not implement a
/// separate client-visible-URI override (see DESIGN.md, Open Question 1).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ResourceRef {
    pub server_name: String,
    pub uri: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
}

/// `{ serverName, name, description?, arguments? }` (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PromptRef {
    pub server_name: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub arguments: Option<Vec<PromptArgument>>,
}

/// `{ name, description?, tools, resources, prompts }` — arrays are
/// priority-ordered, position 0 highest (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct GroupConfig {
    pub name: String,
    pub description: Option<String>,
    pub tools: Vec<ToolOverride>,
    pub resources: Vec<ResourceRef>,
    pub prompts: Vec<PromptRef>,
}

/// The parsed contents of `groups.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupsConfig {
    pub groups: HashMap<String, GroupConfig>,
}

impl GroupsConfig {
    pub fn load(path: &std::path::Path) -> Result<Self, ProxyError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ProxyError::ConfigInvalid {
            path: path.display().to_string(),
            message: format!("failed to read: {e}"),
        })?;
        let mut parsed: Self = serde_json::from_str(&contents).map_err(|e| ProxyError::ConfigInvalid {
            path: path.display().to_string(),
            message: format!("invalid JSON: {e}"),
        })?;
        for (key, group) in parsed.groups.iter_mut() {
            if group.name.is_empty() {
                group.name = key.clone();
            }
        }
        Ok(parsed)
    }
}

/// `"<serverName>:<id>"`, split on the *first* `:` only (spec.md §3, §6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionKey {
    pub server_name: String,
    pub id: String,
}

impl SelectionKey {
    pub fn parse(raw: &str) -> Option<Self> {
        let (server_name, id) = raw.split_once(':')?;
        Some(Self {
            server_name: server_name.to_string(),
            id: id.to_string(),
        })
    }
}

impl fmt::Display for SelectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.server_name, self.id)
    }
}

/// Diagnostic produced during group composition (spec.md §3, §4.6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictKind {
    ExactDuplicate,
    TemplateCoversExact,
    ExactCoveredByTemplate,
    TemplateOverlap,
    DuplicatePromptName,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    pub kind: ConflictKind,
    /// Priority positions of the two conflicting entries, lower index first.
    pub priority: (usize, usize),
    pub example: String,
}

/// `exact-duplicate`/`template-covers-exact`/`exact-covered-by-template`/
/// `template-overlap`, O(n²) pairwise over a group's resources (spec.md §4.6).
pub fn detect_resource_conflicts(resources: &[ResourceRef]) -> Vec<Conflict> {
    let mut conflicts = Vec::new();
    for i in 0..resources.len() {
        for j in (i + 1)..resources.len() {
            let a = &resources[i].uri;
            let b = &resources[j].uri;
            let a_is_template = uri_template::is_template(a);
            let b_is_template = uri_template::is_template(b);

            if !a_is_template && !b_is_template {
                if a == b {
                    conflicts.push(Conflict {
                        kind: ConflictKind::ExactDuplicate,
                        priority: (i, j),
                        example: a.clone(),
                    });
                }
            } else if a_is_template && !b_is_template {
                if uri_template::template_covers_exact(a, b) {
                    conflicts.push(Conflict {
                        kind: ConflictKind::TemplateCoversExact,
                        priority: (i, j),
                        example: b.clone(),
                    });
                }
            } else if !a_is_template && b_is_template {
                if uri_template::template_covers_exact(b, a) {
                    conflicts.push(Conflict {
                        kind: ConflictKind::ExactCoveredByTemplate,
                        priority: (i, j),
                        example: a.clone(),
                    });
                }
            } else if uri_template::templates_overlap(a, b) {
                conflicts.push(Conflict {
                    kind: ConflictKind::TemplateOverlap,
                    priority: (i, j),
                    example: uri_template::example_uri(a),
                });
            }
        }
    }
    conflicts
}

/// Duplicate `name` among a group's prompts (spec.md §4.6).
pub fn detect_prompt_conflicts(prompts: &[PromptRef]) -> Vec<Conflict> {
    let mut conflicts = Vec::new();
    for i in 0..prompts.len() {
        for j in (i + 1)..prompts.len() {
            if prompts[i].name == prompts[j].name {
                conflicts.push(Conflict {
                    kind: ConflictKind::DuplicatePromptName,
                    priority: (i, j),
                    example: prompts[i].name.clone(),
                });
            }
        }
    }
    conflicts
}

fn is_fatal(kind: &ConflictKind) -> bool {
    matches!(kind, ConflictKind::ExactDuplicate | ConflictKind::DuplicatePromptName)
}

/// Load-time validation (spec.md §4.5, §3 invariants). Returns the
/// non-fatal conflicts (warnings) on success; fatal conflicts or invariant
/// violations return `Err`.
pub fn validate(group: &GroupConfig, known_backends: &HashSet<String>) -> Result<Vec<Conflict>, ProxyError> {
    for tool in &group.tools {
        if !known_backends.contains(&tool.server_name) {
            return Err(ProxyError::ConfigInvalid {
                path: group.name.clone(),
                message: format!("tool '{}' references unknown backend '{}'", tool.original_name, tool.server_name),
            });
        }
        if let Some(mapping) = &tool.argument_mapping {
            let result = mapping::validate(mapping);
            if !result.valid {
                return Err(ProxyError::ConfigInvalid {
                    path: group.name.clone(),
                    message: format!("tool '{}' argument mapping invalid: {}", tool.original_name, result.errors.join("; ")),
                });
            }
        }
    }
    for resource in &group.resources {
        if !known_backends.contains(&resource.server_name) {
            return Err(ProxyError::ConfigInvalid {
                path: group.name.clone(),
                message: format!("resource '{}' references unknown backend '{}'", resource.uri, resource.server_name),
            });
        }
    }
    for prompt in &group.prompts {
        if !known_backends.contains(&prompt.server_name) {
            return Err(ProxyError::ConfigInvalid {
                path: group.name.clone(),
                message: format!("prompt '{}' references unknown backend '{}'", prompt.name, prompt.server_name),
            });
        }
    }

    let mut seen_tool_names = HashSet::new();
    for tool in &group.tools {
        if !seen_tool_names.insert(tool.client_name()) {
            return Err(ProxyError::ConfigInvalid {
                path: group.name.clone(),
                message: format!("duplicate client-visible tool name '{}'", tool.client_name()),
            });
        }
    }

    let mut conflicts = detect_resource_conflicts(&group.resources);
    conflicts.extend(detect_prompt_conflicts(&group.prompts));

    if let Some(fatal) = conflicts.iter().find(|c| is_fatal(&c.kind)) {
        return Err(ProxyError::ConfigInvalid {
            path: group.name.clone(),
            message: format!("{:?} conflict at priority {:?} ({})", fatal.kind, fatal.priority, fatal.example),
        });
    }

    Ok(conflicts.into_iter().filter(|c| !is_fatal(&c.kind)).collect())
}

/// A tool in the composed virtual catalog.
#[derive(Debug, Clone)]
pub struct VirtualTool {
    pub server_name: String,
    pub original_name: String,
    pub client_name: String,
    pub tool: Tool,
    pub argument_mapping: Option<ArgumentMapping>,
}

/// A resource or resource-template in the composed virtual catalog.
#[derive(Debug, Clone)]
pub struct VirtualResourceEntry {
    pub server_name: String,
    pub uri: String,
    pub is_template: bool,
    pub resource: Option<Resource>,
    pub template: Option<ResourceTemplate>,
}

/// A prompt in the composed virtual catalog.
#[derive(Debug, Clone)]
pub struct VirtualPromptEntry {
    pub server_name: String,
    pub prompt: Prompt,
}

#[derive(Debug, Clone, Default)]
pub struct VirtualCatalog {
    pub tools: Vec<VirtualTool>,
    pub resources: Vec<VirtualResourceEntry>,
    pub prompts: Vec<VirtualPromptEntry>,
}

/// `getVirtualCatalog(groupName, backendCatalogs)` (spec.md §4.5).
///
/// Missing backend items produce a `warn!` and are omitted, never a hard
/// failure — the catalog composes from whatever is actually available.
pub fn compose(group: &GroupConfig, backend_catalogs: &HashMap<String, Catalog>) -> VirtualCatalog {
    let mut catalog = VirtualCatalog::default();

    for ov in &group.tools {
        let Some(backend_catalog) = backend_catalogs.get(&ov.server_name) else {
            log_warn!(group = %group.name, tool = %ov.original_name, backend = %ov.server_name, "backend not in catalog map; omitting tool");
            continue;
        };
        let Some(backend_tool) = backend_catalog.tools.iter().find(|t| t.name == ov.original_name) else {
            log_warn!(group = %group.name, tool = %ov.original_name, backend = %ov.server_name, "backend does not currently expose this tool; omitting");
            continue;
        };

        let mut tool = backend_tool.clone();
        let client_name = ov.client_name().to_string();
        tool.name = client_name.clone().into();

        let description = ov.description.clone().or_else(|| backend_tool.description.clone().map(|d| d.to_string()));
        tool.description = description.map(Into::into);

        let backend_schema_value = Value::Object((*backend_tool.input_schema).clone());
        let schema_value = if let Some(schema) = &ov.input_schema {
            schema.clone()
        } else if let Some(mapping) = &ov.argument_mapping {
            crate::schema::generate_client_schema(&backend_schema_value, Some(mapping))
        } else {
            backend_schema_value
        };
        if let Some(obj) = schema_value.as_object() {
            tool.input_schema = Arc::new(obj.clone());
        }

        catalog.tools.push(VirtualTool {
            server_name: ov.server_name.clone(),
            original_name: ov.original_name.clone(),
            client_name,
            tool,
            argument_mapping: ov.argument_mapping.clone(),
        });
    }

    for rref in &group.resources {
        let Some(backend_catalog) = backend_catalogs.get(&rref.server_name) else {
            log_warn!(group = %group.name, uri = %rref.uri, backend = %rref.server_name, "backend not in catalog map; omitting resource");
            continue;
        };

        if uri_template::is_template(&rref.uri) {
            let Some(backend_template) = backend_catalog
                .resource_templates
                .iter()
                .find(|t| t.raw.uri_template == rref.uri)
            else {
                log_warn!(group = %group.name, uri = %rref.uri, backend = %rref.server_name, "backend does not expose this resource template; omitting");
                continue;
            };
            let mut template = backend_template.clone();
            if let Some(name) = &rref.name {
                template.raw.name = name.clone();
            }
            if rref.description.is_some() {
                template.raw.description = rref.description.clone();
            }
            if rref.mime_type.is_some() {
                template.raw.mime_type = rref.mime_type.clone();
            }
            catalog.resources.push(VirtualResourceEntry {
                server_name: rref.server_name.clone(),
                uri: rref.uri.clone(),
                is_template: true,
                resource: None,
                template: Some(template),
            });
        } else {
            let Some(backend_resource) = backend_catalog.resources.iter().find(|r| r.raw.uri == rref.uri) else {
                log_warn!(group = %group.name, uri = %rref.uri, backend = %rref.server_name, "backend does not expose this resource; omitting");
                continue;
            };
            let mut resource = backend_resource.clone();
            if let Some(name) = &rref.name {
                resource.raw.name = name.clone();
            }
            if rref.description.is_some() {
                resource.raw.description = rref.description.clone();
            }
            if rref.mime_type.is_some() {
                resource.raw.mime_type = rref.mime_type.clone();
            }
            catalog.resources.push(VirtualResourceEntry {
                server_name: rref.server_name.clone(),
                uri: rref.uri.clone(),
                is_template: false,
                resource: Some(resource),
                template: None,
            });
        }
    }

    for pref in &group.prompts {
        let Some(backend_catalog) = backend_catalogs.get(&pref.server_name) else {
            log_warn!(group = %group.name, prompt = %pref.name, backend = %pref.server_name, "backend not in catalog map; omitting prompt");
            continue;
        };
        let Some(backend_prompt) = backend_catalog.prompts.iter().find(|p| p.name == pref.name) else {
            log_warn!(group = %group.name, prompt = %pref.name, backend = %pref.server_name, "backend does not currently expose this prompt; omitting");
            continue;
        };
        let mut prompt = backend_prompt.clone();
        if pref.description.is_some() {
            prompt.description = pref.description.clone();
        }
        if let Some(arguments) = &pref.arguments {
            prompt.arguments = Some(arguments.clone());
        }
        catalog.prompts.push(VirtualPromptEntry {
            server_name: pref.server_name.clone(),
            prompt,
        });
    }

    catalog
}

/// `tools/call(name, args)` — first tool in the catalog with this
/// client-visible name (spec.md §4.5 "Routing").
pub fn find_tool<'a>(catalog: &'a VirtualCatalog, client_name: &str) -> Option<&'a VirtualTool> {
    catalog.tools.iter().find(|t| t.client_name == client_name)
}

/// `resources/read(uri)` — first ref matching by URI/template shape
/// (spec.md §4.5 "Routing", testable property #4).
pub fn find_resource_for_uri<'a>(
    catalog: &'a VirtualCatalog,
    uri: &str,
) -> Option<(&'a VirtualResourceEntry, HashMap<String, String>)> {
    for entry in &catalog.resources {
        let result = uri_template::match_uri(uri, &entry.uri);
        if result.matches {
            return Some((entry, result.vars));
        }
    }
    None
}

/// `prompts/get(name, args)` — first prompt with matching name (spec.md §4.5 "Routing").
pub fn find_prompt<'a>(catalog: &'a VirtualCatalog, name: &str) -> Option<&'a VirtualPromptEntry> {
    catalog.prompts.iter().find(|p| p.prompt.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rref(server: &str, uri: &str) -> ResourceRef {
        ResourceRef {
            server_name: server.to_string(),
            uri: uri.to_string(),
            name: None,
            description: None,
            mime_type: None,
        }
    }

    #[test]
    fn invariant_3_selection_key_round_trips_when_id_has_no_colon() {
        let key = SelectionKey {
            server_name: "time".to_string(),
            id: "get_current_time".to_string(),
        };
        let serialized = key.to_string();
        let parsed = SelectionKey::parse(&serialized).unwrap();
        assert_eq!(parsed, key);
    }

    #[test]
    fn selection_key_splits_on_first_colon_only() {
        let parsed = SelectionKey::parse("files:docs:intro.md").unwrap();
        assert_eq!(parsed.server_name, "files");
        assert_eq!(parsed.id, "docs:intro.md");
    }

    #[test]
    fn s4_priority_resource_resolution_and_conflict() {
        let resources = vec![
            rref("A", "files://docs/intro.md"),
            rref("B", "files://docs/{name}"),
        ];
        let conflicts = detect_resource_conflicts(&resources);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].kind, ConflictKind::ExactCoveredByTemplate);
        assert_eq!(conflicts[0].priority, (0, 1));
    }

    #[test]
    fn invariant_5_conflict_priority_ordering_is_i_less_than_j() {
        let resources = vec![rref("A", "files://{name}"), rref("B", "files://docs/intro.md")];
        let conflicts = detect_resource_conflicts(&resources);
        assert_eq!(conflicts.len(), 1);
        let (i, j) = conflicts[0].priority;
        assert!(i < j);
    }

    #[test]
    fn exact_duplicate_resources_detected() {
        let resources = vec![rref("A", "files://x"), rref("B", "files://x")];
        let conflicts = detect_resource_conflicts(&resources);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].kind, ConflictKind::ExactDuplicate);
    }

    #[test]
    fn duplicate_prompt_names_detected() {
        let prompts = vec![
            PromptRef { server_name: "A".into(), name: "p".into(), description: None, arguments: None },
            PromptRef { server_name: "B".into(), name: "p".into(), description: None, arguments: None },
        ];
        let conflicts = detect_prompt_conflicts(&prompts);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].kind, ConflictKind::DuplicatePromptName);
    }

    #[test]
    fn property_7_empty_group_composes_to_empty_catalog() {
        let group = GroupConfig {
            name: "empty".to_string(),
            ..Default::default()
        };
        let catalog = compose(&group, &HashMap::new());
        assert!(catalog.tools.is_empty());
        assert!(catalog.resources.is_empty());
        assert!(catalog.prompts.is_empty());
        assert!(find_tool(&catalog, "anything").is_none());
    }

    #[test]
    fn validate_rejects_unknown_backend() {
        let group = GroupConfig {
            name: "g".to_string(),
            tools: vec![ToolOverride {
                server_name: "ghost".to_string(),
                original_name: "x".to_string(),
                name: None,
                description: None,
                input_schema: None,
                argument_mapping: None,
            }],
            ..Default::default()
        };
        let known: HashSet<String> = HashSet::new();
        assert!(validate(&group, &known).is_err());
    }

    #[test]
    fn validate_rejects_exact_duplicate_resources_but_keeps_overlap_as_warning() {
        let mut known = HashSet::new();
        known.insert("A".to_string());
        known.insert("B".to_string());

        let group = GroupConfig {
            name: "g".to_string(),
            resources: vec![rref("A", "files://x"), rref("B", "files://x")],
            ..Default::default()
        };
        assert!(validate(&group, &known).is_err());

        let group_overlap = GroupConfig {
            name: "g2".to_string(),
            resources: vec![rref("A", "files://{a}"), rref("B", "files://{b}")],
            ..Default::default()
        };
        let warnings = validate(&group_overlap, &known).unwrap();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].kind, ConflictKind::TemplateOverlap);
    }

    #[test]
    fn loads_groups_json_and_defaults_name_from_map_key() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(
            file.path(),
            r#"{ "groups": { "dev": { "tools": [], "resources": [], "prompts": [] } } }"#,
        )
        .unwrap();
        let config = GroupsConfig::load(file.path()).unwrap();
        assert_eq!(config.groups["dev"].name, "dev");
    }
}
