//! Tool dispatch.
//!
//! [`ToolExecutor::execute`] always returns a [`ToolResult`]: unknown
//! tools, tool errors, panics and timeouts all become `ok = false`
//! observations the model can react to on its next turn.

use futures::FutureExt;
use reactloop_core::error::ToolError;
use reactloop_core::tool::{FINISH_TOOL, ToolRegistry, ToolResult};
use serde_json::Value;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub struct ToolExecutor {
    tools: Arc<ToolRegistry>,
    default_timeout: Duration,
}

impl ToolExecutor {
    pub fn new(tools: Arc<ToolRegistry>, default_timeout: Duration) -> Self {
        Self {
            tools,
            default_timeout,
        }
    }

    /// Execute `tool_name`. The terminal tool echoes its arguments.
    pub async fn execute(&self, tool_name: &str, arguments: Value) -> ToolResult {
        if tool_name == FINISH_TOOL {
            return ToolResult::success(arguments);
        }

        let Some(tool) = self.tools.get(tool_name) else {
            warn!(tool = %tool_name, "Model chose an unknown tool");
            return ToolResult::failure(format!(
                "Unknown tool: {tool_name}. Available tools: {}",
                self.available()
            ));
        };

        let limit = tool
            .timeout()
            .map_or(self.default_timeout, |hint| hint.max(self.default_timeout));
        let call = AssertUnwindSafe(tool.execute(arguments)).catch_unwind();

        match tokio::time::timeout(limit, call).await {
            Ok(Ok(Ok(output))) => {
                debug!(tool = %tool_name, degraded = output.is_degraded(), "Tool succeeded");
                output.into()
            }
            Ok(Ok(Err(e))) => {
                warn!(tool = %tool_name, error = %e, "Tool failed");
                ToolResult::failure(e.to_string())
            }
            Ok(Err(panic)) => {
                let message = panic_message(panic.as_ref());
                warn!(tool = %tool_name, panic = %message, "Tool panicked");
                ToolResult::failure(format!("Tool {tool_name} panicked: {message}"))
            }
            Err(_) => {
                let e = ToolError::Timeout {
                    tool_name: tool_name.to_string(),
                    timeout_secs: limit.as_secs(),
                };
                warn!(tool = %tool_name, timeout_secs = limit.as_secs(), "Tool timed out");
                ToolResult::failure(e.to_string())
            }
        }
    }

    fn available(&self) -> String {
        let mut names = self.tools.names();
        names.push(FINISH_TOOL);
        names.join(", ")
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{MockTool, ToolBehavior};
    use reactloop_core::tool::Confidence;
    use serde_json::json;

    fn executor(tools: Vec<MockTool>) -> ToolExecutor {
        let mut registry = ToolRegistry::new();
        for tool in tools {
            registry.register(Arc::new(tool)).unwrap();
        }
        ToolExecutor::new(Arc::new(registry), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn finish_echoes_arguments() {
        let res = executor(vec![]).execute("finish", json!({"answer": "X"})).await;
        assert!(res.ok);
        assert_eq!(res.result, Some(json!({"answer": "X"})));
    }

    #[tokio::test]
    async fn unknown_tool_is_reported() {
        let ex = executor(vec![MockTool::new("web_search", ToolBehavior::Echo)]);
        let res = ex.execute("teleport", json!({})).await;
        assert!(!res.ok);
        let error = res.error.unwrap();
        assert!(error.starts_with("Unknown tool: teleport"));
        assert!(error.contains("web_search, finish"));
    }

    #[tokio::test]
    async fn success_passes_result_through() {
        let ex = executor(vec![MockTool::new("echo", ToolBehavior::Echo)]);
        let res = ex.execute("echo", json!({"q": 1})).await;
        assert!(res.ok);
        assert_eq!(res.result, Some(json!({"q": 1})));
        assert!(!res.degraded);
    }

    #[tokio::test]
    async fn degraded_output_is_tagged() {
        let ex = executor(vec![MockTool::new("weather", ToolBehavior::Degraded(json!({"temp": null})))]);
        let res = ex.execute("weather", json!({})).await;
        assert!(res.ok);
        assert!(res.degraded);
        assert_eq!(res.confidence, Some(Confidence::Low));
    }

    #[tokio::test]
    async fn tool_error_becomes_failure() {
        let ex = executor(vec![MockTool::new("flaky", ToolBehavior::Fail("upstream 503".into()))]);
        let res = ex.execute("flaky", json!({})).await;
        assert!(!res.ok);
        assert!(res.error.unwrap().contains("upstream 503"));
    }

    #[tokio::test]
    async fn panic_is_contained() {
        let ex = executor(vec![MockTool::new("bomb", ToolBehavior::Panic)]);
        let res = ex.execute("bomb", json!({})).await;
        assert!(!res.ok);
        assert!(res.error.unwrap().contains("panicked"));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_tool_times_out() {
        let ex = executor(vec![MockTool::new("slow", ToolBehavior::Hang)]);
        let res = ex.execute("slow", json!({})).await;
        assert!(!res.ok);
        assert!(res.error.unwrap().contains("timed out"));
    }
}
