pub mod stdio;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use rmcp::model::{CallToolRequestParams, GetPromptResult, Prompt, ReadResourceResult, Resource, ResourceTemplate, Tool};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::config::BackendServerConfig;
use crate::error::ProxyError;
use crate::{log_info, log_warn};

/// State machine per backend (spec.md §4.4): `new → starting → ready →
/// (stopping → stopped) | failed`. `failed → starting` only via `ensure_started`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendState {
    New,
    Starting,
    Ready,
    Stopping,
    Stopped,
    Failed,
}

const STATE_NEW: u8 = 0;
const STATE_STARTING: u8 = 1;
const STATE_READY: u8 = 2;
const STATE_STOPPING: u8 = 3;
const STATE_STOPPED: u8 = 4;
const STATE_FAILED: u8 = 5;

pub(crate) fn state_from_atomic(atomic: &AtomicU8) -> BackendState {
    match atomic.load(Ordering::Acquire) {
        STATE_NEW => BackendState::New,
        STATE_STARTING => BackendState::Starting,
        STATE_READY => BackendState::Ready,
        STATE_STOPPING => BackendState::Stopping,
        STATE_STOPPED => BackendState::Stopped,
        _ => BackendState::Failed,
    }
}

pub(crate) fn store_state(atomic: &AtomicU8, state: BackendState) {
    let value = match state {
        BackendState::New => STATE_NEW,
        BackendState::Starting => STATE_STARTING,
        BackendState::Ready => STATE_READY,
        BackendState::Stopping => STATE_STOPPING,
        BackendState::Stopped => STATE_STOPPED,
        BackendState::Failed => STATE_FAILED,
    };
    atomic.store(value, Ordering::Release);
}

/// The last-known catalog discovered from one backend (spec.md §3 "BackendServer (live)").
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub tools: Vec<Tool>,
    pub resources: Vec<Resource>,
    pub resource_templates: Vec<ResourceTemplate>,
    pub prompts: Vec<Prompt>,
}

/// One live backend session. Implemented by `stdio::StdioBackend`; the
/// trait boundary exists so `BackendManager` can hold heterogeneous
/// backends and so tests can substitute a mock without a real child process.
#[async_trait]
pub trait Backend: Send + Sync {
    fn name(&self) -> &str;
    fn state(&self) -> BackendState;
    fn set_state(&self, state: BackendState);

    /// Idempotent: spawn the child process, handshake MCP, transition to `Ready`.
    async fn start(&self) -> Result<(), ProxyError>;
    async fn stop(&self) -> Result<(), ProxyError>;

    async fn list_tools(&self) -> Result<Vec<Tool>, ProxyError>;
    async fn list_resources(&self) -> Result<Vec<Resource>, ProxyError>;
    async fn list_resource_templates(&self) -> Result<Vec<ResourceTemplate>, ProxyError>;
    async fn list_prompts(&self) -> Result<Vec<Prompt>, ProxyError>;

    async fn call_tool(
        &self,
        params: CallToolRequestParams,
    ) -> Result<rmcp::model::CallToolResult, ProxyError>;
    async fn read_resource(&self, uri: &str) -> Result<ReadResourceResult, ProxyError>;
    async fn get_prompt(
        &self,
        name: &str,
        arguments: Option<rmcp::model::JsonObject>,
    ) -> Result<GetPromptResult, ProxyError>;

    /// Sends a best-effort cancellation toward the backend for a pending
    /// request. `StdioBackend` has no way to cancel a single in-flight
    /// client-side request against a `rmcp::Peer` (only whole-session
    /// `cancel()`), so this is a no-op there; the discard side of
    /// cancellation (spec.md §4.4, §5) is handled by the caller racing the
    /// operation against the same token in `BackendManager`'s `with_cancel`.
    async fn cancel_request(&self) {}

    /// Waits for the child process to exit unexpectedly (crash detection).
    /// Resolves only once; returns immediately if the backend has no
    /// process to monitor.
    async fn wait_for_exit(&self) {}
}

/// Exponential backoff schedule for `ensure_started` retries (spec.md §4.4: N=3, 200ms/1s/5s).
const RESTART_BACKOFF: [Duration; 3] = [
    Duration::from_millis(200),
    Duration::from_secs(1),
    Duration::from_secs(5),
];

/// Handshake timeout (spec.md §4.4: T=30s).
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Discovery-per-backend timeout (spec.md §5: 10s).
pub const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Races `op` against `ct` being cancelled (spec.md §4.4 "requests carry a
/// cancellation token"; §9 "explicit is required for correct fan-out
/// cancellation"). On cancellation, sends a best-effort cancel signal toward
/// the backend and discards whatever `op` eventually resolves to — the
/// caller never sees a response that arrived after it stopped waiting.
async fn with_cancel<F, T>(ct: &CancellationToken, backend: &dyn Backend, op: F) -> Result<T, ProxyError>
where
    F: std::future::Future<Output = Result<T, ProxyError>>,
{
    tokio::select! {
        biased;
        _ = ct.cancelled() => {
            backend.cancel_request().await;
            Err(ProxyError::Cancelled)
        }
        result = op => result,
    }
}

/// Owns the set of live backend sessions (C4). Single owner of every
/// `BackendServer` handle; everyone else references by `serverName`
/// (spec.md §3 "Ownership").
pub struct BackendManager {
    backends: DashMap<String, Arc<dyn Backend>>,
    configs: RwLock<HashMap<String, BackendServerConfig>>,
    /// Coalesces concurrent `ensure_started` calls for the same backend.
    starting: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl BackendManager {
    pub fn new(configs: HashMap<String, BackendServerConfig>) -> Arc<Self> {
        Arc::new(Self {
            backends: DashMap::new(),
            configs: RwLock::new(configs),
            starting: DashMap::new(),
        })
    }

    /// `ensureStarted(serverName)` — idempotent; concurrent calls coalesce.
    pub async fn ensure_started(&self, server_name: &str) -> Result<(), ProxyError> {
        if let Some(existing) = self.backends.get(server_name)
            && matches!(existing.state(), BackendState::Ready | BackendState::Starting)
        {
            return Ok(());
        }

        let lock = self
            .starting
            .entry(server_name.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        // Re-check after acquiring the coalescing lock: another caller may have finished starting it.
        if let Some(existing) = self.backends.get(server_name)
            && matches!(existing.state(), BackendState::Ready)
        {
            return Ok(());
        }

        let config = {
            let configs = self.configs.read().await;
            configs
                .get(server_name)
                .cloned()
                .ok_or_else(|| ProxyError::ConfigInvalid {
                    path: server_name.to_string(),
                    message: "no such backend server configured".to_string(),
                })?
        };

        let mut last_err = None;
        for (attempt, delay) in std::iter::once(Duration::ZERO)
            .chain(RESTART_BACKOFF)
            .enumerate()
        {
            if attempt > 0 {
                tokio::time::sleep(delay).await;
            }

            let backend: Arc<dyn Backend> =
                Arc::new(stdio::StdioBackend::new(server_name.to_string(), config.clone()));
            match tokio::time::timeout(HANDSHAKE_TIMEOUT, backend.start()).await {
                Ok(Ok(())) => {
                    self.backends.insert(server_name.to_string(), Arc::clone(&backend));
                    self.spawn_reaper(server_name.to_string(), backend);
                    log_info!(backend = %server_name, attempt, "backend started");
                    return Ok(());
                }
                Ok(Err(e)) => {
                    log_warn!(backend = %server_name, attempt, error = %e, "backend start failed");
                    last_err = Some(e);
                }
                Err(_) => {
                    log_warn!(backend = %server_name, attempt, "backend handshake timed out");
                    last_err = Some(ProxyError::Timeout);
                }
            }
        }

        Err(last_err.unwrap_or(ProxyError::BackendUnavailable {
            name: server_name.to_string(),
        }))
    }

    /// Reaper task: detects unexpected child exit and flips state to `Failed`
    /// immediately, so `failed` is observed without waiting for the next call.
    fn spawn_reaper(&self, name: String, backend: Arc<dyn Backend>) {
        tokio::spawn(async move {
            backend.wait_for_exit().await;
            if backend.state() != BackendState::Stopped {
                log_warn!(backend = %name, "backend process exited unexpectedly");
                backend.set_state(BackendState::Failed);
            }
        });
    }

    /// `discoverAll() → Map<serverName, Catalog>` per spec.md §4.4: fans out
    /// concurrently; per-backend failures produce an empty catalog plus an
    /// error entry, never a whole-operation failure.
    pub async fn discover_all(&self) -> HashMap<String, (Catalog, Option<ProxyError>)> {
        let names: Vec<String> = {
            let configs = self.configs.read().await;
            configs.keys().cloned().collect()
        };

        let results = futures::future::join_all(names.into_iter().map(|name| async move {
            let outcome = self.discover_one(&name).await;
            (name, outcome)
        }))
        .await;

        results.into_iter().collect()
    }

    async fn discover_one(&self, name: &str) -> (Catalog, Option<ProxyError>) {
        if let Err(e) = self.ensure_started(name).await {
            return (Catalog::default(), Some(e));
        }
        let backend = match self.backends.get(name) {
            Some(b) => Arc::clone(b.value()),
            None => {
                return (
                    Catalog::default(),
                    Some(ProxyError::BackendUnavailable {
                        name: name.to_string(),
                    }),
                );
            }
        };

        let discovery = async {
            let tools = backend.list_tools().await?;
            let resources = backend.list_resources().await?;
            let resource_templates = backend.list_resource_templates().await?;
            let prompts = backend.list_prompts().await?;
            Ok::<_, ProxyError>(Catalog {
                tools,
                resources,
                resource_templates,
                prompts,
            })
        };

        match tokio::time::timeout(DISCOVERY_TIMEOUT, discovery).await {
            Ok(Ok(catalog)) => (catalog, None),
            Ok(Err(e)) => (Catalog::default(), Some(e)),
            Err(_) => (Catalog::default(), Some(ProxyError::Timeout)),
        }
    }

    fn ready_backend(&self, server_name: &str) -> Result<Arc<dyn Backend>, ProxyError> {
        let entry = self
            .backends
            .get(server_name)
            .ok_or_else(|| ProxyError::BackendUnavailable {
                name: server_name.to_string(),
            })?;
        // Observe current state now — a reference acquired earlier must not
        // be trusted if the session transitioned to `failed` meanwhile
        // (spec.md §9 "Ownership of child processes").
        if entry.state() != BackendState::Ready {
            return Err(ProxyError::BackendUnavailable {
                name: server_name.to_string(),
            });
        }
        Ok(Arc::clone(entry.value()))
    }

    pub async fn call_tool(
        &self,
        server_name: &str,
        params: CallToolRequestParams,
    ) -> Result<rmcp::model::CallToolResult, ProxyError> {
        self.call_tool_cancellable(server_name, params, CancellationToken::new())
            .await
    }

    /// As `call_tool`, but the caller supplies the cancellation token (spec.md
    /// §5 "every C4 operation accepts a cancellation signal"). Cancelling
    /// `ct` before the backend responds discards the in-flight call: the
    /// caller observes `ProxyError::Cancelled` and the eventual backend
    /// response (if any) is dropped, never returned (§4.4 "cancellation is
    /// never retroactive").
    pub async fn call_tool_cancellable(
        &self,
        server_name: &str,
        params: CallToolRequestParams,
        ct: CancellationToken,
    ) -> Result<rmcp::model::CallToolResult, ProxyError> {
        let backend = self.ready_backend(server_name)?;
        with_cancel(&ct, backend.as_ref(), backend.call_tool(params)).await
    }

    pub async fn read_resource(
        &self,
        server_name: &str,
        uri: &str,
    ) -> Result<ReadResourceResult, ProxyError> {
        self.read_resource_cancellable(server_name, uri, CancellationToken::new())
            .await
    }

    pub async fn read_resource_cancellable(
        &self,
        server_name: &str,
        uri: &str,
        ct: CancellationToken,
    ) -> Result<ReadResourceResult, ProxyError> {
        let backend = self.ready_backend(server_name)?;
        with_cancel(&ct, backend.as_ref(), backend.read_resource(uri)).await
    }

    pub async fn get_prompt(
        &self,
        server_name: &str,
        name: &str,
        arguments: Option<rmcp::model::JsonObject>,
    ) -> Result<GetPromptResult, ProxyError> {
        self.get_prompt_cancellable(server_name, name, arguments, CancellationToken::new())
            .await
    }

    pub async fn get_prompt_cancellable(
        &self,
        server_name: &str,
        name: &str,
        arguments: Option<rmcp::model::JsonObject>,
        ct: CancellationToken,
    ) -> Result<GetPromptResult, ProxyError> {
        let backend = self.ready_backend(server_name)?;
        with_cancel(&ct, backend.as_ref(), backend.get_prompt(name, arguments)).await
    }

    pub fn state_of(&self, server_name: &str) -> BackendState {
        self.backends
            .get(server_name)
            .map(|b| b.state())
            .unwrap_or(BackendState::New)
    }

    /// Test-only seam: inject a backend (typically a mock) directly into the
    /// registry, bypassing `ensure_started`'s spawn-and-handshake path.
    #[cfg(test)]
    pub(crate) fn insert_test_backend(&self, name: &str, backend: Arc<dyn Backend>) {
        self.backends.insert(name.to_string(), backend);
    }

    /// `shutdown()` — close all sessions, terminate children; idempotent.
    pub async fn shutdown(&self) {
        let backends: Vec<(String, Arc<dyn Backend>)> = self
            .backends
            .iter()
            .map(|r| (r.key().clone(), Arc::clone(r.value())))
            .collect();
        self.backends.clear();

        let mut join_set = tokio::task::JoinSet::new();
        for (name, backend) in backends {
            join_set.spawn(async move {
                if let Err(e) = backend.stop().await {
                    log_warn!(backend = %name, error = %e, "error stopping backend");
                }
            });
        }
        while join_set.join_next().await.is_some() {}
        log_info!("all backends stopped");
    }
}
