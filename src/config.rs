//! `backend-servers.json` loading (spec.md §3 `BackendServerConfig`, §6).

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ProxyError;

/// How to launch one backend (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackendServerConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub cwd: Option<String>,
}

/// The parsed contents of `backend-servers.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackendsConfig {
    #[serde(rename = "mcpServers")]
    pub mcp_servers: HashMap<String, BackendServerConfig>,
}

impl BackendsConfig {
    pub fn load(path: &Path) -> Result<Self, ProxyError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ProxyError::ConfigInvalid {
            path: path.display().to_string(),
            message: format!("failed to read: {e}"),
        })?;
        serde_json::from_str(&contents).map_err(|e| ProxyError::ConfigInvalid {
            path: path.display().to_string(),
            message: format!("invalid JSON: {e}"),
        })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.mcp_servers.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn loads_minimal_backend_servers_json() {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(
            file.path(),
            r#"{ "mcpServers": { "time": { "command": "uvx", "args": ["mcp-server-time"] } } }"#,
        )
        .unwrap();
        let config = BackendsConfig::load(file.path()).unwrap();
        assert_eq!(config.mcp_servers.len(), 1);
        let time = &config.mcp_servers["time"];
        assert_eq!(time.command, "uvx");
        assert_eq!(time.args, vec!["mcp-server-time".to_string()]);
    }

    #[test]
    fn rejects_unknown_top_level_keys() {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), r#"{ "mcpServers": {}, "bogus": 1 }"#).unwrap();
        assert!(BackendsConfig::load(file.path()).is_err());
    }

    #[test]
    fn missing_file_is_config_invalid() {
        let result = BackendsConfig::load(Path::new("/nonexistent/backend-servers.json"));
        assert!(matches!(result, Err(ProxyError::ConfigInvalid { .. })));
    }
}
