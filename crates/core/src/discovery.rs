//! Tool discovery boundary — an external source that lists remote tools
//! and invokes them by name.
//!
//! The loop never talks to a discovery server directly. The registry
//! bootstrap lists tools once and wraps each in a handle that routes
//! `call_tool` back through this trait; the connection itself stays owned
//! by the discovery client and is shared by every handle.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use crate::error::DiscoveryError;
use crate::tool::ParameterMap;

/// One tool advertised by a discovery server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredTool {
    pub name: String,
    pub description: String,
    pub parameters: ParameterMap,
    pub server_label: String,
}

/// Outcome of a remote invocation. `ok = false` means the server answered
/// with a tool-level error; transport problems are `Err` instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteCallResult {
    pub ok: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub server_label: String,
}

/// A source of remote tools.
///
/// Implementations must be safe for concurrent reads: many runs call
/// `call_tool` at once through shared handles.
#[async_trait]
pub trait ToolDiscovery: Send + Sync {
    /// List every tool the source currently offers.
    async fn list_tools(&self) -> std::result::Result<Vec<DiscoveredTool>, DiscoveryError>;

    /// Invoke a tool by name.
    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> std::result::Result<RemoteCallResult, DiscoveryError>;
}
