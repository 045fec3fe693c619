//! Test-only mock backend implementing the `Backend` trait directly, so
//! `BackendManager` routing and `GroupServer` routing can be exercised
//! without a real child process.

use std::sync::atomic::AtomicU8;
use std::sync::Arc;

use async_trait::async_trait;
use rmcp::model::{
    CallToolRequestParams, CallToolResult, Content, GetPromptResult, JsonObject, Prompt,
    PromptMessage, PromptMessageRole, ReadResourceResult, Resource, ResourceContents,
    ResourceTemplate, Tool,
};
use tokio::sync::Mutex;

use crate::backend::{Backend, BackendState, state_from_atomic, store_state};
use crate::error::ProxyError;

/// A controllable in-process stand-in for a backend MCP server. Every
/// response is a fixture the test supplies up front; `call_tool` echoes the
/// arguments it received back as JSON text so tests can assert on what C2
/// actually forwarded.
pub struct MockBackend {
    name: String,
    state: AtomicU8,
    tools: Vec<Tool>,
    resources: Vec<Resource>,
    resource_templates: Vec<ResourceTemplate>,
    prompts: Vec<Prompt>,
    calls: Mutex<Vec<(String, Option<JsonObject>)>>,
}

impl MockBackend {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: AtomicU8::new(0),
            tools: Vec::new(),
            resources: Vec::new(),
            resource_templates: Vec::new(),
            prompts: Vec::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// A backend exposing a single `get_current_time` tool, matching
    /// spec.md §8 scenario S1.
    pub fn with_fixtures() -> Self {
        let mut backend = Self::new("time");
        backend.state = AtomicU8::new(2); // Ready
        backend.tools.push(Tool::new(
            "get_current_time".to_string(),
            "Returns the current time in a timezone".to_string(),
            Arc::new(serde_json::Map::new()),
        ));
        backend
    }

    pub fn with_tools(name: &str, tools: Vec<Tool>) -> Self {
        let mut backend = Self::new(name);
        backend.state = AtomicU8::new(2); // Ready
        backend.tools = tools;
        backend
    }

    pub async fn recorded_calls(&self) -> Vec<(String, Option<JsonObject>)> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl Backend for MockBackend {
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
        self.set_state(BackendState::Ready);
        Ok(())
    }

    async fn stop(&self) -> Result<(), ProxyError> {
        self.set_state(BackendState::Stopped);
        Ok(())
    }

    async fn list_tools(&self) -> Result<Vec<Tool>, ProxyError> {
        Ok(self.tools.clone())
    }

    async fn list_resources(&self) -> Result<Vec<Resource>, ProxyError> {
        Ok(self.resources.clone())
    }

    async fn list_resource_templates(&self) -> Result<Vec<ResourceTemplate>, ProxyError> {
        Ok(self.resource_templates.clone())
    }

    async fn list_prompts(&self) -> Result<Vec<Prompt>, ProxyError> {
        Ok(self.prompts.clone())
    }

    async fn call_tool(
        &self,
        params: CallToolRequestParams,
    ) -> Result<CallToolResult, ProxyError> {
        self.calls
            .lock()
            .await
            .push((params.name.to_string(), params.arguments.clone()));
        let echoed = serde_json::to_string(&params.arguments.unwrap_or_default())
            .unwrap_or_else(|_| "{}".to_string());
        Ok(CallToolResult::success(vec![Content::text(echoed)]))
    }

    async fn read_resource(&self, uri: &str) -> Result<ReadResourceResult, ProxyError> {
        Ok(ReadResourceResult {
            contents: vec![ResourceContents::TextResourceContents {
                uri: uri.to_string(),
                mime_type: Some("text/plain".to_string()),
                text: uri.to_string(),
                meta: None,
            }],
        })
    }

    async fn get_prompt(
        &self,
        name: &str,
        _arguments: Option<JsonObject>,
    ) -> Result<GetPromptResult, ProxyError> {
        Ok(GetPromptResult {
            description: None,
            messages: vec![PromptMessage::new_text(PromptMessageRole::User, name.to_string())],
        })
    }
}
