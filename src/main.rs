mod admin;
mod backend;
mod cli;
mod config;
mod error;
mod group;
mod logging;
mod mapping;
mod paths;
mod schema;
mod server;
#[cfg(test)]
mod testutil;
mod uri_template;

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use rmcp::ServiceExt;
use rmcp::transport::stdio;

use backend::BackendManager;
use config::BackendsConfig;
use group::GroupsConfig;
use crate::{log_error, log_info, log_warn};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = cli::Cli::parse();
    let mode = match cli.mode() {
        Ok(mode) => mode,
        Err(message) => {
            eprintln!("mcp-proxy: {message}");
            eprintln!("usage: mcp-proxy --serve <GROUP> | --admin");
            return ExitCode::from(2);
        }
    };

    if matches!(mode, cli::Mode::Admin) {
        // SAFETY: set before any other task is spawned, so there is no
        // concurrent reader of the environment yet.
        unsafe {
            std::env::set_var("ADMIN_MODE", "true");
        }
    }
    logging::init_tracing("info");

    let config_dir = cli
        .config_dir
        .clone()
        .unwrap_or_else(paths::user_config_dir);
    if let Err(e) =
        paths::migrate_legacy_configs(&config_dir, &paths::legacy_config_dir())
    {
        log_warn!(error = %e, "legacy config migration failed");
    }

    match mode {
        cli::Mode::Admin => {
            if admin::run(&config_dir).await {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        cli::Mode::Serve(group_name) => match run_serve(&config_dir, &group_name).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                log_error!(error = %e, "mcp-proxy exited with an error");
                ExitCode::FAILURE
            }
        },
    }
}

async fn run_serve(config_dir: &std::path::Path, group_name: &str) -> anyhow::Result<()> {
    let backends_path = config_dir.join(paths::BACKEND_SERVERS_FILE);
    let groups_path = config_dir.join(paths::GROUPS_FILE);

    let backends_config = BackendsConfig::load(&backends_path)?;
    let groups_config = GroupsConfig::load(&groups_path)?;
    let group_config = groups_config
        .groups
        .get(group_name)
        .ok_or_else(|| anyhow::anyhow!("no such group: {group_name}"))?;

    let known: std::collections::HashSet<String> =
        backends_config.mcp_servers.keys().cloned().collect();
    let warnings = group::validate(group_config, &known)?;
    for warning in &warnings {
        log_warn!(
            kind = ?warning.kind,
            priority = ?warning.priority,
            example = %warning.example,
            "group composition conflict"
        );
    }

    let backend_manager = BackendManager::new(backends_config.mcp_servers.clone());
    let discovered = backend_manager.discover_all().await;
    for (name, (_, discovery_error)) in &discovered {
        if let Some(e) = discovery_error {
            log_warn!(backend = %name, error = %e, "backend discovery failed");
        }
    }
    let catalogs = discovered
        .into_iter()
        .map(|(name, (catalog, _))| (name, catalog))
        .collect();
    let catalog = group::compose(group_config, &catalogs);

    log_info!(
        group = %group_name,
        tools = catalog.tools.len(),
        resources = catalog.resources.len(),
        prompts = catalog.prompts.len(),
        "serving group"
    );

    let server = server::GroupServer::new(group_name.to_string(), catalog, Arc::clone(&backend_manager));
    let service = server.serve(stdio()).await?;

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())?;
        let mut sighup = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup())?;

        loop {
            tokio::select! {
                result = service.waiting() => {
                    if let Err(e) = result {
                        log_warn!(error = %e, "MCP service exited with error");
                    }
                    break;
                }
                _ = sigterm.recv() => {
                    log_info!("received SIGTERM");
                    break;
                }
                _ = sigint.recv() => {
                    log_info!("received SIGINT");
                    break;
                }
                _ = sighup.recv() => {
                    log_info!("received SIGHUP, reloading group catalog");
                    if let Err(e) = reload_catalog(&server, &backend_manager, &groups_path, group_name).await {
                        log_warn!(error = %e, "catalog reload failed, keeping previous catalog");
                    }
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = service.waiting().await {
            log_warn!(error = %e, "MCP service exited with error");
        }
    }

    log_info!("shutting down");
    backend_manager.shutdown().await;
    Ok(())
}

/// Re-reads `groups.json`, re-runs backend discovery, recomposes the virtual
/// catalog for `group_name`, and atomically swaps it into the running server
/// (spec.md §5 "reload is explicit ... triggered by ... a SIGHUP-style
/// signal the CLI may expose").
#[cfg(unix)]
async fn reload_catalog(
    server: &server::GroupServer,
    backend_manager: &BackendManager,
    groups_path: &std::path::Path,
    group_name: &str,
) -> anyhow::Result<()> {
    let groups_config = GroupsConfig::load(groups_path)?;
    let group_config = groups_config
        .groups
        .get(group_name)
        .ok_or_else(|| anyhow::anyhow!("no such group: {group_name}"))?;

    let discovered = backend_manager.discover_all().await;
    for (name, (_, discovery_error)) in &discovered {
        if let Some(e) = discovery_error {
            log_warn!(backend = %name, error = %e, "backend discovery failed during reload");
        }
    }
    let catalogs = discovered
        .into_iter()
        .map(|(name, (catalog, _))| (name, catalog))
        .collect();
    let catalog = group::compose(group_config, &catalogs);

    log_info!(
        group = %group_name,
        tools = catalog.tools.len(),
        resources = catalog.resources.len(),
        prompts = catalog.prompts.len(),
        "reloaded group catalog"
    );
    server.reload_catalog(catalog);
    Ok(())
}
