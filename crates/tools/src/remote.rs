//! Remote tool handles — a discovered tool invoked back through its
//! discovery source.

use async_trait::async_trait;
use reactloop_core::discovery::{DiscoveredTool, ToolDiscovery};
use reactloop_core::error::{DiscoveryError, ToolError};
use reactloop_core::tool::{ParameterMap, Tool, ToolOutput};
use std::sync::Arc;

/// A discovered tool. The connection belongs to the shared discovery
/// client; the handle only holds a reference to it.
pub struct RemoteTool {
    spec: DiscoveredTool,
    discovery: Arc<dyn ToolDiscovery>,
}

impl RemoteTool {
    pub fn new(spec: DiscoveredTool, discovery: Arc<dyn ToolDiscovery>) -> Self {
        Self { spec, discovery }
    }
}

#[async_trait]
impl Tool for RemoteTool {
    fn name(&self) -> &str {
        &self.spec.name
    }

    fn description(&self) -> &str {
        &self.spec.description
    }

    fn parameters(&self) -> ParameterMap {
        self.spec.parameters.clone()
    }

    fn server_label(&self) -> Option<&str> {
        Some(&self.spec.server_label)
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        match self.discovery.call_tool(&self.spec.name, arguments).await {
            Ok(call) if call.ok => Ok(ToolOutput::new(call.result.unwrap_or(serde_json::Value::Null))
                .with_server(call.server_label)),
            Ok(call) => Err(ToolError::ExecutionFailed {
                tool_name: self.spec.name.clone(),
                reason: call
                    .error
                    .unwrap_or_else(|| "remote tool reported an error".into()),
            }),
            Err(DiscoveryError::ToolNotFound(name)) => Err(ToolError::NotFound(name)),
            Err(DiscoveryError::Timeout(secs)) => Err(ToolError::Timeout {
                tool_name: self.spec.name.clone(),
                timeout_secs: secs,
            }),
            Err(e) => Err(ToolError::ExecutionFailed {
                tool_name: self.spec.name.clone(),
                reason: e.to_string(),
            }),
        }
    }
}
