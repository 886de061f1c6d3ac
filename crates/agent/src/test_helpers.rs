//! Shared test helpers for agent tests.

use async_trait::async_trait;
use reactloop_core::error::{ProviderError, ToolError};
use reactloop_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use reactloop_core::tool::{Confidence, ParameterMap, ParameterSpec, Tool, ToolOutput};
use serde_json::Value;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// A mock provider that returns a sequence of scripted responses.
///
/// Each call to `complete` returns the next entry. Once the script runs
/// out the last entry is repeated. Every request is recorded.
pub struct SequentialMockProvider {
    responses: Vec<Result<ProviderResponse, ProviderError>>,
    call_count: AtomicUsize,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl SequentialMockProvider {
    pub fn new(responses: Vec<Result<ProviderResponse, ProviderError>>) -> Self {
        assert!(!responses.is_empty(), "script at least one response");
        Self {
            responses,
            call_count: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Scripted raw completion texts.
    pub fn texts(texts: &[&str]) -> Self {
        Self::new(texts.iter().map(|t| Ok(make_text_response(t))).collect())
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for SequentialMockProvider {
    fn name(&self) -> &str {
        "sequential_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.requests.lock().unwrap().push(request);
        let n = self.call_count.fetch_add(1, Ordering::SeqCst);
        self.responses[n.min(self.responses.len() - 1)].clone()
    }
}

/// A provider that never answers.
pub struct HangingProvider;

#[async_trait]
impl Provider for HangingProvider {
    fn name(&self) -> &str {
        "hanging"
    }

    async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Err(ProviderError::Timeout("unreachable".into()))
    }
}

pub fn make_text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        content: text.to_string(),
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        model: "mock-model".into(),
    }
}

/// Canonical model output choosing `tool` with `arguments`.
pub fn action_json(reasoning: &str, tool: &str, arguments: Value) -> String {
    serde_json::json!({
        "reasoning": reasoning,
        "action": { "tool": tool, "arguments": arguments }
    })
    .to_string()
}

pub fn finish_json(reasoning: &str, answer: &str) -> String {
    action_json(reasoning, "finish", serde_json::json!({ "answer": answer }))
}

pub enum ToolBehavior {
    /// Return the arguments
    Echo,
    Fixed(Value),
    /// Low-confidence synthetic output
    Degraded(Value),
    Fail(String),
    Panic,
    Hang,
}

pub struct MockTool {
    name: String,
    behavior: ToolBehavior,
    pub calls: AtomicUsize,
}

impl MockTool {
    pub fn new(name: &str, behavior: ToolBehavior) -> Self {
        Self {
            name: name.to_string(),
            behavior,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Tool for MockTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "mock tool"
    }

    fn parameters(&self) -> ParameterMap {
        let mut params = ParameterMap::new();
        params.insert("query".into(), ParameterSpec::optional("Input"));
        params
    }

    async fn execute(&self, arguments: Value) -> Result<ToolOutput, ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            ToolBehavior::Echo => Ok(ToolOutput::new(arguments)),
            ToolBehavior::Fixed(v) => Ok(ToolOutput::new(v.clone())),
            ToolBehavior::Degraded(v) => {
                Ok(ToolOutput::new(v.clone()).with_tier("synthetic", Confidence::Low))
            }
            ToolBehavior::Fail(reason) => Err(ToolError::ExecutionFailed {
                tool_name: self.name.clone(),
                reason: reason.clone(),
            }),
            ToolBehavior::Panic => panic!("mock tool exploded"),
            ToolBehavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(ToolOutput::new(Value::Null))
            }
        }
    }
}
