//! Non-interactive admin surface (spec.md §1 "admin UI is peripheral"; SPEC_FULL.md
//! §9 "Admin mode").
//!
//! The interactive terminal UI itself stays out of scope — this is the
//! read/validate/discover slice it would be built on top of: print the
//! loaded configs, validate every group and report conflicts, then connect
//! to every configured backend and print what it discovers.

use std::collections::HashSet;
use std::path::Path;

use crate::backend::BackendManager;
use crate::config::BackendsConfig;
use crate::group::{self, GroupsConfig};
use crate::paths;
use crate::{log_error, log_info};

/// Runs the read/validate/discover pass once. Returns `false` if any config
/// file fails to load or any group fails to validate (`main` maps that to
/// exit code 1).
pub async fn run(config_dir: &Path) -> bool {
    let backends_path = config_dir.join(paths::BACKEND_SERVERS_FILE);
    let groups_path = config_dir.join(paths::GROUPS_FILE);

    let backends_config = match BackendsConfig::load(&backends_path) {
        Ok(c) => c,
        Err(e) => {
            log_error!(path = %backends_path.display(), error = %e, "failed to load backend-servers.json");
            return false;
        }
    };
    let groups_config = match GroupsConfig::load(&groups_path) {
        Ok(c) => c,
        Err(e) => {
            log_error!(path = %groups_path.display(), error = %e, "failed to load groups.json");
            return false;
        }
    };

    println!("backends ({}):", backends_config.mcp_servers.len());
    for name in backends_config.names() {
        println!("  - {name}");
    }

    let known: HashSet<String> = backends_config.mcp_servers.keys().cloned().collect();
    let mut all_valid = true;

    println!("groups ({}):", groups_config.groups.len());
    for (name, group_config) in &groups_config.groups {
        match group::validate(group_config, &known) {
            Ok(warnings) => {
                println!(
                    "  - {name}: valid ({} tools, {} resources, {} prompts)",
                    group_config.tools.len(),
                    group_config.resources.len(),
                    group_config.prompts.len(),
                );
                for w in &warnings {
                    println!(
                        "      warning: {:?} at priority {:?} (example: {})",
                        w.kind, w.priority, w.example
                    );
                }
            }
            Err(e) => {
                println!("  - {name}: INVALID — {e}");
                all_valid = false;
            }
        }
    }

    if !all_valid {
        return false;
    }

    log_info!("connecting to backends for discovery");
    let manager = BackendManager::new(backends_config.mcp_servers.clone());
    let discovered = manager.discover_all().await;

    println!("discovery:");
    for (name, (catalog, discovery_error)) in &discovered {
        println!(
            "  - {name}: {} tools, {} resources, {} resource templates, {} prompts",
            catalog.tools.len(),
            catalog.resources.len(),
            catalog.resource_templates.len(),
            catalog.prompts.len(),
        );
        if let Some(e) = discovery_error {
            println!("      error: {e}");
        }
    }
    manager.shutdown().await;

    true
}
