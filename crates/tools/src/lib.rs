//! Tool layer for reactloop.
//!
//! Local tools, MCP discovery, remote tool handles and tiered capabilities,
//! plus [`build_registry`] which assembles them into the immutable
//! [`ToolRegistry`] a run works from.

pub mod capability;
pub mod current_time;
pub mod mcp;
pub mod remote;
pub mod tiered;

pub use capability::build_capability;
pub use current_time::CurrentTimeTool;
pub use mcp::{McpHttpClient, MultiServerDiscovery};
pub use remote::RemoteTool;
pub use tiered::{Tier, TieredTool};

use reactloop_config::AppConfig;
use reactloop_core::discovery::ToolDiscovery;
use reactloop_core::tool::{FINISH_TOOL, Tool, ToolRegistry};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Built-in tools that need no network.
pub fn local_tools() -> Vec<Arc<dyn Tool>> {
    vec![Arc::new(CurrentTimeTool)]
}

/// Assemble the registry: local tools, then configured capabilities, then
/// every discovered tool not already registered.
///
/// Discovery failures are logged; the registry then holds the local tools
/// and whatever capabilities could still be built.
pub async fn build_registry(
    config: &AppConfig,
    discovery: Option<Arc<dyn ToolDiscovery>>,
) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    let local: HashMap<String, Arc<dyn Tool>> = local_tools()
        .into_iter()
        .map(|t| (t.name().to_string(), t))
        .collect();

    let mut remote: Vec<Arc<dyn Tool>> = Vec::new();
    if let Some(discovery) = &discovery {
        match discovery.list_tools().await {
            Ok(discovered) => {
                remote = discovered
                    .into_iter()
                    .filter(|t| t.name != FINISH_TOOL)
                    .map(|t| Arc::new(RemoteTool::new(t, discovery.clone())) as Arc<dyn Tool>)
                    .collect();
            }
            Err(e) => warn!(error = %e, "Tool discovery failed, continuing with local tools"),
        }
    }

    let resolve = |name: &str| -> Option<Arc<dyn Tool>> {
        local
            .get(name)
            .cloned()
            .or_else(|| remote.iter().find(|t| t.name() == name).cloned())
    };

    let mut handles: Vec<Arc<dyn Tool>> = local.values().cloned().collect();
    let tier_timeout = Duration::from_secs(config.agent.tool_timeout_secs);
    for capability in &config.capabilities {
        if let Some(tool) = build_capability(capability, &resolve, tier_timeout) {
            handles.push(Arc::new(tool));
        }
    }
    handles.extend(remote.iter().cloned());

    for handle in handles {
        let name = handle.name().to_string();
        if let Err(e) = registry.register(handle) {
            warn!(tool = %name, error = %e, "Skipping tool");
        }
    }

    info!(tools = registry.len(), names = ?registry.names(), "Tool registry built");
    registry
}
