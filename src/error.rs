//! The error taxonomy surfaced across the proxy (spec §7).
//!
//! `ProxyError` is the single closed enum every component's public API
//! returns. Internal plumbing still uses `anyhow::Result` (config I/O,
//! process spawning) and is wrapped into `ProxyError::Internal` or a more
//! specific variant at the boundary where the error becomes client-visible.

use rmcp::model::ErrorCode;
use rmcp::ErrorData as McpError;
use thiserror::Error;

/// JSON-RPC 2.0 reserves -32000..-32099 for server-defined errors; spec §7
/// places `BackendUnavailable` in that range.
const BACKEND_UNAVAILABLE_CODE: ErrorCode = ErrorCode(-32000);

#[derive(Error, Debug)]
pub enum ProxyError {
    /// Schema or invariant violation while loading backend-servers.json / groups.json.
    #[error("config invalid at {path}: {message}")]
    ConfigInvalid { path: String, message: String },

    /// The requested backend is not in the `ready` state.
    #[error("backend '{name}' unavailable")]
    BackendUnavailable { name: String },

    /// No tool/resource/prompt in the group matches the request.
    #[error("{kind} '{id}' not found")]
    ItemNotFound { kind: &'static str, id: String },

    /// Argument mapping produced an invalid payload.
    #[error("argument transform failed: {message}")]
    TransformError { message: String },

    /// A backend returned an MCP error; forwarded verbatim.
    #[error("backend '{name}' returned an error: {message}")]
    BackendError {
        name: String,
        code: i32,
        message: String,
    },

    /// Request was cancelled before completion.
    #[error("request cancelled")]
    Cancelled,

    /// Request exceeded its deadline.
    #[error("request timed out")]
    Timeout,

    /// Bug / unreachable branch.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ProxyError {
    pub fn item_not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::ItemNotFound {
            kind,
            id: id.into(),
        }
    }
}

/// Surfaces each `ProxyError` kind with the code spec §7 mandates:
/// `BackendUnavailable` gets a -32000-range server-defined code,
/// `ItemNotFound` the method-not-found code, and `BackendError` forwards the
/// backend's own code & message verbatim instead of collapsing into
/// `invalid_params`.
impl From<ProxyError> for McpError {
    fn from(err: ProxyError) -> Self {
        match err {
            ProxyError::ConfigInvalid { path, message } => {
                McpError::invalid_params(format!("config invalid at {path}: {message}"), None)
            }
            ProxyError::BackendUnavailable { name } => McpError::new(
                BACKEND_UNAVAILABLE_CODE,
                format!("backend '{name}' unavailable"),
                None,
            ),
            ProxyError::ItemNotFound { kind, id } => McpError::new(
                ErrorCode::METHOD_NOT_FOUND,
                format!("{kind} '{id}' not found"),
                None,
            ),
            ProxyError::TransformError { message } => McpError::invalid_params(message, None),
            ProxyError::BackendError {
                name,
                code,
                message,
            } => McpError::new(ErrorCode(code), format!("backend '{name}': {message}"), None),
            ProxyError::Cancelled => McpError::invalid_params("request cancelled", None),
            ProxyError::Timeout => McpError::invalid_params("request timed out", None),
            ProxyError::Internal(msg) => McpError::internal_error(msg, None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_invalid_carries_message() {
        let err = ProxyError::ConfigInvalid {
            path: "groups.json".into(),
            message: "duplicate tool name".into(),
        };
        assert!(err.to_string().contains("duplicate tool name"));
    }

    #[test]
    fn item_not_found_names_kind_and_id() {
        let err = ProxyError::item_not_found("tool", "get_current_time");
        assert_eq!(err.to_string(), "tool 'get_current_time' not found");
    }
}
