//! Stdio child-process backend (spec.md §4.4, §6 "Process Management").

use std::process::Stdio;
use std::sync::atomic::AtomicU8;

use rmcp::model::{
    CallToolRequestParams, GetPromptRequestParams, GetPromptResult, JsonObject, Prompt,
    ReadResourceRequestParams, ReadResourceResult, Resource, ResourceTemplate, Tool,
};
use rmcp::service::RunningService;
use rmcp::ServiceExt;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{ChildStderr, Command};
use tokio::sync::{Notify, RwLock};
use tracing::debug;

use super::{state_from_atomic, store_state, Backend, BackendState, STATE_STARTING};
use crate::config::BackendServerConfig;
use crate::error::ProxyError;
use crate::{log_error, log_info, log_warn};

/// Environment variables inherited from the proxy's own process regardless
/// of `env` config (spec.md §6 "Process Management" supplement) — enough
/// for interpreters (`uvx`, `npx`) to resolve without leaking the full
/// proxy environment to every backend.
const INHERITED_ENV_VARS: &[&str] = &["PATH", "HOME", "LANG", "TMPDIR", "USER"];

pub struct StdioBackend {
    name: String,
    config: BackendServerConfig,
    service: RwLock<Option<RunningService<rmcp::RoleClient, ()>>>,
    state: AtomicU8,
    child: RwLock<Option<tokio::process::Child>>,
    /// Wakes a `wait_for_exit` that has already taken the child out of
    /// `self.child` and is blocked on `child.wait()`, so `stop()` never needs
    /// to hold `self.child`'s lock across that wait (see `stop`/`wait_for_exit`).
    stop_signal: Notify,
}

impl StdioBackend {
    pub fn new(name: String, config: BackendServerConfig) -> Self {
        Self {
            name,
            config,
            service: RwLock::new(None),
            state: AtomicU8::new(STATE_STARTING),
            child: RwLock::new(None),
            stop_signal: Notify::new(),
        }
    }

    fn build_command(&self) -> Command {
        let mut cmd = Command::new(&self.config.command);
        cmd.args(&self.config.args);
        cmd.env_clear();
        for var in INHERITED_ENV_VARS {
            if let Ok(value) = std::env::var(var) {
                cmd.env(var, value);
            }
        }
        for (key, value) in &self.config.env {
            cmd.env(key, value);
        }
        if let Some(cwd) = &self.config.cwd {
            cmd.current_dir(cwd);
        }
        cmd
    }

    /// Kill the child's entire process group (unix only); falls back to
    /// killing just the child elsewhere or if the group signal fails.
    async fn kill_child(&self, child: &mut tokio::process::Child) {
        #[cfg(unix)]
        if let Some(pid) = child.id() {
            let ret = unsafe { libc::kill(-(pid as i32), libc::SIGTERM) };
            if ret == 0 {
                debug!(backend = %self.name, pid, "sent SIGTERM to process group");
                tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            } else {
                log_warn!(backend = %self.name, pid, "failed to signal process group, killing child directly");
            }
        }
        let _ = child.kill().await;
    }

    /// Streams the child's stderr into the proxy's logger, one line at a
    /// time, tagged with `serverName` (spec.md §4.4 "stdio specifics").
    fn spawn_stderr_reader(&self, stderr: ChildStderr) {
        let name = self.name.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        log_warn!(backend = %name, line = %line, "backend stderr");
                    }
                    Ok(None) => break,
                    Err(e) => {
                        log_warn!(backend = %name, error = %e, "error reading backend stderr");
                        break;
                    }
                }
            }
        });
    }
}

#[async_trait::async_trait]
impl Backend for StdioBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> BackendState {
        state_from_atomic(&self.state)
    }

    fn set_state(&self, state: BackendState) {
        store_state(&self.state, state);
    }

    async fn start(&self) -> Result<(), ProxyError> {
        self.set_state(BackendState::Starting);

        let mut cmd = self.build_command();
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|e| {
            self.set_state(BackendState::Failed);
            ProxyError::Internal(format!("failed to spawn backend '{}': {e}", self.name))
        })?;

        let pid = child.id();
        debug!(backend = %self.name, pid = ?pid, "spawned child process");

        let stdout = child.stdout.take().ok_or_else(|| {
            ProxyError::Internal(format!("failed to capture stdout from backend '{}'", self.name))
        })?;
        let stdin = child.stdin.take().ok_or_else(|| {
            ProxyError::Internal(format!("failed to capture stdin from backend '{}'", self.name))
        })?;
        if let Some(stderr) = child.stderr.take() {
            self.spawn_stderr_reader(stderr);
        }

        let service = ().serve((stdout, stdin)).await.map_err(|e| {
            self.set_state(BackendState::Failed);
            ProxyError::Internal(format!("MCP handshake with backend '{}' failed: {e}", self.name))
        })?;

        if let Some(peer) = service.peer_info() {
            log_info!(
                backend = %self.name,
                pid = ?pid,
                server_name = %peer.server_info.name,
                server_version = %peer.server_info.version,
                "MCP handshake complete"
            );
        } else {
            log_info!(backend = %self.name, pid = ?pid, "MCP handshake complete (no peer info)");
        }

        *self.service.write().await = Some(service);
        *self.child.write().await = Some(child);
        self.set_state(BackendState::Ready);
        Ok(())
    }

    async fn stop(&self) -> Result<(), ProxyError> {
        self.set_state(BackendState::Stopping);

        if let Some(service) = self.service.write().await.take()
            && let Err(e) = service.cancel().await
        {
            log_error!(backend = %self.name, error = %e, "error cancelling service");
        }

        // Whichever of `stop` or the reaper's `wait_for_exit` takes the child
        // out from behind the lock first owns killing it; the lock is never
        // held across a wait. If the reaper already has it, wake it instead
        // of waiting on the lock ourselves.
        match self.child.write().await.take() {
            Some(mut child) => self.kill_child(&mut child).await,
            None => self.stop_signal.notify_one(),
        }

        self.set_state(BackendState::Stopped);
        log_info!(backend = %self.name, "backend stopped");
        Ok(())
    }

    async fn list_tools(&self) -> Result<Vec<Tool>, ProxyError> {
        let guard = self.service.read().await;
        let service = guard.as_ref().ok_or_else(|| not_started(&self.name))?;
        service
            .list_all_tools()
            .await
            .map_err(|e| discovery_failed(&self.name, "tools", e))
    }

    async fn list_resources(&self) -> Result<Vec<Resource>, ProxyError> {
        let guard = self.service.read().await;
        let service = guard.as_ref().ok_or_else(|| not_started(&self.name))?;
        match service.list_resources(None).await {
            Ok(result) => Ok(result.resources),
            // Resources are an optional MCP capability; treat an unsupported
            // backend as "no resources" rather than a hard failure.
            Err(_) => Ok(Vec::new()),
        }
    }

    async fn list_resource_templates(&self) -> Result<Vec<ResourceTemplate>, ProxyError> {
        let guard = self.service.read().await;
        let service = guard.as_ref().ok_or_else(|| not_started(&self.name))?;
        match service.list_resource_templates(None).await {
            Ok(result) => Ok(result.resource_templates),
            Err(_) => Ok(Vec::new()),
        }
    }

    async fn list_prompts(&self) -> Result<Vec<Prompt>, ProxyError> {
        let guard = self.service.read().await;
        let service = guard.as_ref().ok_or_else(|| not_started(&self.name))?;
        match service.list_prompts(None).await {
            Ok(result) => Ok(result.prompts),
            Err(_) => Ok(Vec::new()),
        }
    }

    async fn call_tool(
        &self,
        params: CallToolRequestParams,
    ) -> Result<rmcp::model::CallToolResult, ProxyError> {
        let guard = self.service.read().await;
        let service = guard.as_ref().ok_or_else(|| not_started(&self.name))?;
        let tool_name = params.name.clone();
        debug!(backend = %self.name, tool = %tool_name, "calling tool");
        service
            .call_tool(params)
            .await
            .map_err(|e| backend_error(&self.name, e))
    }

    async fn read_resource(&self, uri: &str) -> Result<ReadResourceResult, ProxyError> {
        let guard = self.service.read().await;
        let service = guard.as_ref().ok_or_else(|| not_started(&self.name))?;
        service
            .read_resource(ReadResourceRequestParams {
                meta: None,
                uri: uri.to_string(),
            })
            .await
            .map_err(|e| backend_error(&self.name, e))
    }

    async fn get_prompt(
        &self,
        name: &str,
        arguments: Option<JsonObject>,
    ) -> Result<GetPromptResult, ProxyError> {
        let guard = self.service.read().await;
        let service = guard.as_ref().ok_or_else(|| not_started(&self.name))?;
        service
            .get_prompt(GetPromptRequestParams {
                meta: None,
                name: name.to_string(),
                arguments,
            })
            .await
            .map_err(|e| backend_error(&self.name, e))
    }

    async fn wait_for_exit(&self) {
        let child = self.child.write().await.take();
        let Some(mut child) = child else { return };
        tokio::select! {
            _ = child.wait() => {}
            _ = self.stop_signal.notified() => {
                self.kill_child(&mut child).await;
                let _ = child.wait().await;
            }
        }
    }
}

fn not_started(name: &str) -> ProxyError {
    ProxyError::BackendUnavailable { name: name.to_string() }
}

fn discovery_failed(name: &str, kind: &str, err: rmcp::ErrorData) -> ProxyError {
    ProxyError::BackendError {
        name: name.to_string(),
        code: err.code.0,
        message: format!("{kind} discovery failed: {}", err.message),
    }
}

/// Forwards a backend's MCP error verbatim (spec §7 `BackendError`:
/// "preserving code & message") instead of collapsing it to a fixed code.
fn backend_error(name: &str, err: rmcp::ErrorData) -> ProxyError {
    ProxyError::BackendError {
        name: name.to_string(),
        code: err.code.0,
        message: err.message.to_string(),
    }
}
