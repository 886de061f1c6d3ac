//! Current time tool — the one built-in local tool.

use async_trait::async_trait;
use reactloop_core::error::ToolError;
use reactloop_core::tool::{ParameterMap, Tool, ToolOutput};

pub struct CurrentTimeTool;

#[async_trait]
impl Tool for CurrentTimeTool {
    fn name(&self) -> &str {
        "current_time"
    }

    fn description(&self) -> &str {
        "Get the current date and time in UTC (RFC 3339)."
    }

    fn parameters(&self) -> ParameterMap {
        ParameterMap::new()
    }

    async fn execute(&self, _arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let now = chrono::Utc::now();
        Ok(ToolOutput::new(serde_json::json!({
            "utc": now.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            "unix": now.timestamp(),
        })))
    }
}
