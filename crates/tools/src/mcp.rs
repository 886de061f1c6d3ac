//! MCP tool discovery over HTTP.
//!
//! [`McpHttpClient`] speaks JSON-RPC 2.0 to one server using the streamable
//! HTTP transport: every message is a POST, responses come back either as a
//! JSON body or as a `text/event-stream`. The `initialize` handshake runs
//! lazily on first use and the server's session id is echoed on every later
//! request. A server that forgets the session answers 404; the client then
//! drops it, runs the handshake again and retries the request once.
//!
//! [`MultiServerDiscovery`] aggregates several servers behind one
//! [`ToolDiscovery`] and routes calls by tool name.

use async_trait::async_trait;
use futures::future::join_all;
use reactloop_config::{DiscoveryConfig, McpServerConfig};
use reactloop_core::discovery::{DiscoveredTool, RemoteCallResult, ToolDiscovery};
use reactloop_core::error::DiscoveryError;
use reactloop_core::tool::{ParameterMap, ParameterSpec};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const PROTOCOL_VERSION: &str = "2025-03-26";
const SESSION_HEADER: &str = "mcp-session-id";
const MAX_LIST_PAGES: usize = 32;

/// Append `key=<token>` to a URL unless it already carries one.
pub fn with_service_token(url: &str, token: Option<&str>) -> String {
    match token {
        Some(token) if !token.is_empty() && !url.contains("key=") => {
            let sep = if url.contains('?') { '&' } else { '?' };
            format!("{url}{sep}key={token}")
        }
        _ => url.to_string(),
    }
}

/// Convert a JSON Schema `inputSchema` into parameter specs.
pub fn parameters_from_schema(schema: &Value) -> ParameterMap {
    let required: Vec<&str> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|r| r.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    schema
        .get("properties")
        .and_then(Value::as_object)
        .map(|props| {
            props
                .iter()
                .map(|(name, prop)| {
                    let description = prop
                        .get("description")
                        .and_then(Value::as_str)
                        .or_else(|| prop.get("type").and_then(Value::as_str))
                        .unwrap_or_default()
                        .to_string();
                    let spec = ParameterSpec {
                        description,
                        required: required.contains(&name.as_str()),
                    };
                    (name.clone(), spec)
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Normalize a `tools/call` result.
///
/// `isError` results become `ok = false` with the text content as error.
/// Otherwise `structuredContent` wins, then the first text item parsed as
/// JSON, then the joined text.
pub fn call_result(result: &Value, server_label: &str) -> RemoteCallResult {
    let texts: Vec<&str> = result
        .get("content")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter(|i| i.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|i| i.get("text").and_then(Value::as_str))
                .collect()
        })
        .unwrap_or_default();

    if result.get("isError").and_then(Value::as_bool) == Some(true) {
        let error = if texts.is_empty() {
            "Unknown error".to_string()
        } else {
            texts.join("\n")
        };
        return RemoteCallResult {
            ok: false,
            result: None,
            error: Some(error),
            server_label: server_label.to_string(),
        };
    }

    let value = if let Some(structured) = result.get("structuredContent").filter(|v| !v.is_null()) {
        structured.clone()
    } else if let Some(first) = texts.first() {
        serde_json::from_str(first).unwrap_or_else(|_| Value::String(texts.join("\n")))
    } else {
        result.get("content").cloned().unwrap_or(Value::Null)
    };

    RemoteCallResult {
        ok: true,
        result: Some(value),
        error: None,
        server_label: server_label.to_string(),
    }
}

/// Extract the JSON payloads of a server-sent event stream.
fn sse_messages(body: &str) -> Vec<Value> {
    body.split("\n\n")
        .filter_map(|event| {
            let data: Vec<&str> = event
                .lines()
                .filter_map(|line| line.strip_prefix("data:"))
                .map(str::trim_start)
                .collect();
            if data.is_empty() {
                return None;
            }
            serde_json::from_str(&data.join("\n")).ok()
        })
        .collect()
}

struct RawResponse {
    session_id: Option<String>,
    body: String,
    event_stream: bool,
}

impl RawResponse {
    /// Find the response to request `id`.
    fn decode(&self, id: i64) -> Result<Value, DiscoveryError> {
        let messages = if self.event_stream {
            sse_messages(&self.body)
        } else {
            match serde_json::from_str(&self.body) {
                Ok(Value::Array(items)) => items,
                Ok(single) => vec![single],
                Err(e) => {
                    return Err(DiscoveryError::Transport(format!(
                        "Failed to parse JSON-RPC response: {e}"
                    )));
                }
            }
        };

        for message in messages {
            if message.get("id").and_then(Value::as_i64) != Some(id) {
                continue;
            }
            if let Some(error) = message.get("error") {
                return Err(DiscoveryError::Rpc {
                    code: error.get("code").and_then(Value::as_i64).unwrap_or(0),
                    message: error
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown error")
                        .to_string(),
                });
            }
            return Ok(message.get("result").cloned().unwrap_or(Value::Null));
        }

        Err(DiscoveryError::Transport(format!(
            "Missing response for request id {id}"
        )))
    }
}

/// An initialized MCP session. Servers that do not track sessions leave
/// `id` empty.
struct Session {
    id: Option<String>,
}

/// JSON-RPC client for one MCP server.
pub struct McpHttpClient {
    label: String,
    endpoint: String,
    client: reqwest::Client,
    timeout: Duration,
    next_id: AtomicI64,
    session: Mutex<Option<Session>>,
}

impl McpHttpClient {
    pub fn new(
        label: impl Into<String>,
        url: &str,
        service_token: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, DiscoveryError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DiscoveryError::Transport(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            label: label.into(),
            endpoint: with_service_token(url, service_token),
            client,
            timeout,
            next_id: AtomicI64::new(1),
            session: Mutex::new(None),
        })
    }

    pub fn from_config(config: &McpServerConfig, default_timeout_secs: u64) -> Result<Self, DiscoveryError> {
        Self::new(
            config.label.clone(),
            &config.url,
            config.service_token.as_deref(),
            Duration::from_secs(config.timeout_secs.unwrap_or(default_timeout_secs)),
        )
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    async fn post(&self, body: &Value, session: Option<&str>) -> Result<RawResponse, DiscoveryError> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .header("Accept", "application/json, text/event-stream")
            .json(body);
        if let Some(session) = session {
            request = request.header(SESSION_HEADER, session);
        }

        let response = request.send().await.map_err(|e| self.transport_error(e))?;
        let status = response.status();
        let session_id = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let event_stream = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status == reqwest::StatusCode::NOT_FOUND && session.is_some() {
                return Err(DiscoveryError::SessionExpired(format!("{}: {body}", self.label)));
            }
            return Err(DiscoveryError::Transport(format!(
                "{}: HTTP error: {status} - {body}",
                self.label
            )));
        }

        let body = response.text().await.map_err(|e| self.transport_error(e))?;
        Ok(RawResponse {
            session_id,
            body,
            event_stream,
        })
    }

    fn transport_error(&self, e: reqwest::Error) -> DiscoveryError {
        if e.is_timeout() {
            DiscoveryError::Timeout(self.timeout.as_secs())
        } else {
            DiscoveryError::Transport(format!("{}: {e}", self.label))
        }
    }

    async fn initialize(&self) -> Result<Option<String>, DiscoveryError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "initialize",
            "params": {
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": { "name": "reactloop", "version": env!("CARGO_PKG_VERSION") }
            }
        });
        let raw = self.post(&request, None).await?;
        raw.decode(id)?;

        let initialized = json!({ "jsonrpc": "2.0", "method": "notifications/initialized" });
        if let Err(e) = self.post(&initialized, raw.session_id.as_deref()).await {
            debug!(server = %self.label, error = %e, "initialized notification not accepted");
        }

        info!(server = %self.label, "MCP session initialized");
        Ok(raw.session_id)
    }

    /// The current session id, running the handshake if there is none.
    async fn session(&self) -> Result<Option<String>, DiscoveryError> {
        let mut slot = self.session.lock().await;
        if let Some(session) = slot.as_ref() {
            return Ok(session.id.clone());
        }
        let id = self.initialize().await?;
        *slot = Some(Session { id: id.clone() });
        Ok(id)
    }

    /// Forget `stale` unless another request already replaced it.
    async fn reset_session(&self, stale: Option<&str>) {
        let mut slot = self.session.lock().await;
        if slot.as_ref().is_some_and(|s| s.id.as_deref() == stale) {
            *slot = None;
        }
    }

    async fn send(&self, method: &str, params: &Value, session: Option<&str>) -> Result<Value, DiscoveryError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });
        debug!(server = %self.label, method, id, "MCP request");
        self.post(&request, session).await?.decode(id)
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, DiscoveryError> {
        let session = self.session().await?;
        match self.send(method, &params, session.as_deref()).await {
            Err(DiscoveryError::SessionExpired(reason)) => {
                warn!(server = %self.label, reason = %reason, "MCP session expired, re-initializing");
                self.reset_session(session.as_deref()).await;
                let session = self.session().await?;
                self.send(method, &params, session.as_deref()).await
            }
            other => other,
        }
    }

    fn to_discovered(&self, tool: &Value) -> Option<DiscoveredTool> {
        let name = tool.get("name")?.as_str()?.to_string();
        Some(DiscoveredTool {
            name,
            description: tool
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            parameters: tool
                .get("inputSchema")
                .map(parameters_from_schema)
                .unwrap_or_default(),
            server_label: self.label.clone(),
        })
    }
}

#[async_trait]
impl ToolDiscovery for McpHttpClient {
    async fn list_tools(&self) -> Result<Vec<DiscoveredTool>, DiscoveryError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_LIST_PAGES {
            let params = match &cursor {
                Some(c) => json!({ "cursor": c }),
                None => json!({}),
            };
            let result = self.request("tools/list", params).await?;
            if let Some(items) = result.get("tools").and_then(Value::as_array) {
                tools.extend(items.iter().filter_map(|t| self.to_discovered(t)));
            }
            match result.get("nextCursor").and_then(Value::as_str) {
                Some(next) if !next.is_empty() => cursor = Some(next.to_string()),
                _ => break,
            }
        }

        debug!(server = %self.label, count = tools.len(), "Listed MCP tools");
        Ok(tools)
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<RemoteCallResult, DiscoveryError> {
        let result = self
            .request("tools/call", json!({ "name": name, "arguments": arguments }))
            .await?;
        Ok(call_result(&result, &self.label))
    }
}

/// Several MCP servers behind one discovery source.
///
/// `list_tools` rebuilds the name → server index; the first server to
/// advertise a name owns it. `call_tool` only reads the index, so any
/// number of runs can call through it concurrently.
pub struct MultiServerDiscovery {
    servers: Vec<McpHttpClient>,
    index: RwLock<HashMap<String, usize>>,
}

impl MultiServerDiscovery {
    pub fn new(servers: Vec<McpHttpClient>) -> Self {
        Self {
            servers,
            index: RwLock::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &DiscoveryConfig) -> Result<Self, DiscoveryError> {
        let servers = config
            .servers
            .iter()
            .map(|s| McpHttpClient::from_config(s, config.timeout_secs))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(servers))
    }

    pub fn labels(&self) -> Vec<&str> {
        self.servers.iter().map(McpHttpClient::label).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// Which server currently owns `tool`.
    pub fn server_for(&self, tool: &str) -> Option<&str> {
        let index = self.index.read().unwrap_or_else(|e| e.into_inner());
        index.get(tool).map(|&i| self.servers[i].label())
    }
}

#[async_trait]
impl ToolDiscovery for MultiServerDiscovery {
    async fn list_tools(&self) -> Result<Vec<DiscoveredTool>, DiscoveryError> {
        let listings = join_all(self.servers.iter().map(|s| s.list_tools())).await;

        let mut index: HashMap<String, usize> = HashMap::new();
        let mut tools = Vec::new();
        let mut failures = 0;

        for (i, listing) in listings.into_iter().enumerate() {
            let label = self.servers[i].label();
            match listing {
                Ok(listed) => {
                    for tool in listed {
                        if let Some(&owner) = index.get(&tool.name) {
                            warn!(
                                tool = %tool.name,
                                server = %label,
                                owner = %self.servers[owner].label(),
                                "Duplicate tool name, keeping first server"
                            );
                            continue;
                        }
                        index.insert(tool.name.clone(), i);
                        tools.push(tool);
                    }
                }
                Err(e) => {
                    warn!(server = %label, error = %e, "MCP server unavailable, skipping");
                    failures += 1;
                }
            }
        }

        *self.index.write().unwrap_or_else(|e| e.into_inner()) = index;

        if failures > 0 && failures == self.servers.len() {
            return Err(DiscoveryError::Unavailable(format!(
                "all {failures} discovery servers failed"
            )));
        }

        info!(servers = self.servers.len(), tools = tools.len(), "Tool discovery complete");
        Ok(tools)
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<RemoteCallResult, DiscoveryError> {
        let server = {
            let index = self.index.read().unwrap_or_else(|e| e.into_inner());
            index.get(name).copied()
        };
        match server {
            Some(i) => self.servers[i].call_tool(name, arguments).await,
            None => Err(DiscoveryError::ToolNotFound(name.to_string())),
        }
    }
}
