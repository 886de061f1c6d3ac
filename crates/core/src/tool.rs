//! Tool trait — the abstraction over agent capabilities.
//!
//! Tools are what give the agent the ability to act in the world: a local
//! function, a remote capability reached through a discovery server, or a
//! tiered chain of both. The reserved [`FINISH_TOOL`] is not a handle at all;
//! it is the terminal pseudo-tool that ends a run and carries the answer.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use crate::error::ToolError;

/// Name of the terminal pseudo-tool.
pub const FINISH_TOOL: &str = "finish";

/// Description of one tool parameter, as shown to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub description: String,

    #[serde(default)]
    pub required: bool,
}

impl ParameterSpec {
    pub fn required(description: impl Into<String>) -> Self {
        Self { description: description.into(), required: true }
    }

    pub fn optional(description: impl Into<String>) -> Self {
        Self { description: description.into(), required: false }
    }
}

/// Parameter name → spec, ordered by name so prompts render deterministically.
pub type ParameterMap = BTreeMap<String, ParameterSpec>;

/// A tool as listed in the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: ParameterMap,

    /// Discovery server the tool came from, if remote
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_label: Option<String>,
}

impl ToolSpec {
    /// The catalog entry for the terminal pseudo-tool.
    pub fn finish() -> Self {
        let mut parameters = ParameterMap::new();
        parameters.insert(
            "answer".into(),
            ParameterSpec::required("The final answer to give the user"),
        );
        Self {
            name: FINISH_TOOL.into(),
            description: "Finish the task and return the final answer to the user".into(),
            parameters,
            server_label: None,
        }
    }
}

/// How much a tool outcome can be trusted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    /// Answered by the preferred capability
    #[default]
    High,
    /// Answered by a fallback capability with an equivalent purpose
    Medium,
    /// Synthesized locally, no capability answered
    Low,
}

/// What a tool handle returns on success.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub value: serde_json::Value,

    /// Which tier of a tiered capability answered
    pub tier: Option<String>,

    pub confidence: Confidence,

    /// Discovery server that produced the value, if remote
    pub server_label: Option<String>,
}

impl ToolOutput {
    pub fn new(value: serde_json::Value) -> Self {
        Self {
            value,
            tier: None,
            confidence: Confidence::High,
            server_label: None,
        }
    }

    pub fn with_tier(mut self, tier: impl Into<String>, confidence: Confidence) -> Self {
        self.tier = Some(tier.into());
        self.confidence = confidence;
        self
    }

    pub fn with_server(mut self, label: impl Into<String>) -> Self {
        self.server_label = Some(label.into());
        self
    }

    pub fn is_degraded(&self) -> bool {
        self.confidence != Confidence::High
    }
}

/// The normalized outcome of executing a tool — the observation fed back
/// to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub ok: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub degraded: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<Confidence>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
}

impl ToolResult {
    pub fn success(result: serde_json::Value) -> Self {
        Self {
            ok: true,
            result: Some(result),
            error: None,
            degraded: false,
            confidence: None,
            tier: None,
            server: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            result: None,
            error: Some(error.into()),
            degraded: false,
            confidence: None,
            tier: None,
            server: None,
        }
    }
}

impl From<ToolOutput> for ToolResult {
    fn from(output: ToolOutput) -> Self {
        let degraded = output.is_degraded();
        Self {
            ok: true,
            result: Some(output.value),
            error: None,
            degraded,
            confidence: degraded.then_some(output.confidence),
            tier: output.tier,
            server: output.server_label,
        }
    }
}

/// The core Tool trait.
///
/// Each capability implements this trait. Tools are registered in the
/// ToolRegistry and made available to the agent loop.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "current_time", "weather").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the LLM).
    fn description(&self) -> &str;

    /// The parameters this tool accepts.
    fn parameters(&self) -> ParameterMap;

    /// Discovery server backing this tool, for remote tools.
    fn server_label(&self) -> Option<&str> {
        None
    }

    /// Time this tool may need, when it exceeds the executor's default
    /// (a tiered chain needs room for every tier).
    fn timeout(&self) -> Option<std::time::Duration> {
        None
    }

    /// Execute the tool with the given arguments.
    async fn execute(&self, arguments: serde_json::Value) -> std::result::Result<ToolOutput, ToolError>;

    /// Convert this tool into its catalog entry.
    fn to_spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
            server_label: self.server_label().map(str::to_string),
        }
    }
}

/// A registry of available tools.
///
/// Built once, then shared read-only (behind an `Arc`) by every run. A
/// refresh builds a new registry rather than mutating a shared one.
/// The terminal tool is always present in the catalog and can never be
/// registered.
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
        }
    }

    /// Register a tool. Names are unique and `finish` is reserved.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> std::result::Result<(), ToolError> {
        let name = tool.name().to_string();
        if name == FINISH_TOOL {
            return Err(ToolError::ReservedName(name));
        }
        if self.tools.contains_key(&name) {
            return Err(ToolError::DuplicateName(name));
        }
        self.tools.insert(name, tool);
        Ok(())
    }

    /// Get a tool handle by name. The terminal tool has no handle.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        name == FINISH_TOOL || self.tools.contains_key(name)
    }

    /// The catalog shown to the model: registered tools by name, then `finish`.
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools
            .values()
            .map(|t| t.to_spec())
            .chain(std::iter::once(ToolSpec::finish()))
            .collect()
    }

    /// List all registered tool names, excluding `finish`.
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}
